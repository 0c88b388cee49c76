use chrono::NaiveDate;
use serde::Serialize;
use std::collections::HashSet;
use tabled::Tabled;

use crate::util::format_number;

/// Untyped table as read from a sheet, CSV export or SQL query.
///
/// Cells are kept as trimmed strings; `None` marks an empty or NULL cell.
#[derive(Debug, Clone, Default)]
pub struct RawTable {
    pub name: String,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl RawTable {
    pub fn empty(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn column_index(&self, column: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == column)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// The three source tables of one load.
#[derive(Debug, Clone, Default)]
pub struct RawDataset {
    pub sales: RawTable,
    pub collections: RawTable,
    pub staff: RawTable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableKind {
    Sales,
    Collections,
}

impl TableKind {
    pub fn label(&self) -> &'static str {
        match self {
            TableKind::Sales => "Sales",
            TableKind::Collections => "Recolt",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transaction {
    pub identifier: Option<String>,
    pub reference: Option<String>,
    pub date: Option<NaiveDate>,
    pub country: Option<String>,
    pub city: Option<String>,
    pub bank: Option<String>,
    pub amount: f64,
    pub rating: Option<String>,
    pub message: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

impl Transaction {
    #[cfg(test)]
    pub fn new(identifier: Option<&str>, amount: f64) -> Self {
        Self {
            identifier: identifier.map(str::to_string),
            reference: None,
            date: None,
            country: None,
            city: None,
            bank: None,
            amount,
            rating: None,
            message: None,
            latitude: None,
            longitude: None,
        }
    }
}

/// Sales or collection rows together with the table-level facts the
/// pipeline keys off.
#[derive(Debug, Clone)]
pub struct TransactionTable {
    pub kind: TableKind,
    pub rows: Vec<Transaction>,
    /// The source carried a date column; date filtering only applies then.
    pub has_date_column: bool,
    /// Latitude/longitude have been populated for this table.
    pub has_coordinates: bool,
}

impl TransactionTable {
    pub fn new(kind: TableKind, rows: Vec<Transaction>) -> Self {
        Self {
            kind,
            rows,
            has_date_column: true,
            has_coordinates: false,
        }
    }

    pub fn empty(kind: TableKind) -> Self {
        Self::new(kind, Vec::new())
    }

    /// Same table facts, different rows.
    pub fn with_rows(&self, rows: Vec<Transaction>) -> Self {
        Self {
            kind: self.kind,
            rows,
            has_date_column: self.has_date_column,
            has_coordinates: self.has_coordinates,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct StaffMember {
    pub identifier: String,
    pub user_name: Option<String>,
    pub last_name: Option<String>,
    pub first_name: Option<String>,
    pub team: Option<String>,
    pub department: Option<String>,
    pub activity: Option<String>,
    pub role: Option<String>,
    pub hire_date: Option<NaiveDate>,
}

impl StaffMember {
    #[cfg(test)]
    pub fn new(identifier: &str) -> Self {
        Self {
            identifier: identifier.to_string(),
            ..Default::default()
        }
    }
}

/// Staff reference table, deduplicated by identifier (first occurrence wins).
#[derive(Debug, Clone, Default)]
pub struct Roster {
    members: Vec<StaffMember>,
}

impl Roster {
    pub fn new(members: Vec<StaffMember>) -> Self {
        let mut seen = HashSet::new();
        let members = members
            .into_iter()
            .filter(|m| seen.insert(m.identifier.clone()))
            .collect();
        Self { members }
    }

    pub fn members(&self) -> &[StaffMember] {
        &self.members
    }

    #[cfg(test)]
    pub fn find(&self, identifier: &str) -> Option<&StaffMember> {
        self.members.iter().find(|m| m.identifier == identifier)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Normalized tables of one load.
#[derive(Debug, Clone)]
pub struct Dataset {
    pub sales: TransactionTable,
    pub collections: TransactionTable,
    pub roster: Roster,
}

impl Dataset {
    pub fn table(&self, kind: TableKind) -> &TransactionTable {
        match kind {
            TableKind::Sales => &self.sales,
            TableKind::Collections => &self.collections,
        }
    }
}

#[derive(Debug, Serialize, Tabled, Clone)]
pub struct GroupTotalRow {
    #[serde(rename = "Group")]
    #[tabled(rename = "Group")]
    pub group: String,
    #[serde(rename = "Total")]
    #[tabled(rename = "Total")]
    pub total: String,
    #[serde(rename = "Count")]
    #[tabled(rename = "Count")]
    pub count: usize,
    #[serde(rename = "Average")]
    #[tabled(rename = "Average")]
    pub average: String,
}

#[derive(Debug, Serialize, Tabled, Clone)]
pub struct MapPointRow {
    #[serde(rename = "City")]
    #[tabled(rename = "City")]
    pub city: String,
    #[serde(rename = "Latitude")]
    #[tabled(rename = "Latitude")]
    pub latitude: String,
    #[serde(rename = "Longitude")]
    #[tabled(rename = "Longitude")]
    pub longitude: String,
    #[serde(rename = "TOTAL_SALES")]
    #[tabled(rename = "TOTAL_SALES")]
    pub total: String,
    #[serde(rename = "TRANSACTION_COUNT")]
    #[tabled(rename = "TRANSACTION_COUNT")]
    pub count: usize,
}

#[derive(Debug, Serialize, Tabled, Clone)]
pub struct HeadcountRow {
    #[serde(rename = "Group")]
    #[tabled(rename = "Group")]
    pub group: String,
    #[serde(rename = "Count")]
    #[tabled(rename = "Count")]
    pub count: usize,
}

#[derive(Debug, Serialize, Tabled, Clone)]
pub struct TransactionRow {
    #[serde(rename = "Hyp")]
    #[tabled(rename = "Hyp")]
    pub identifier: String,
    #[serde(rename = "ORDER_REFERENCE")]
    #[tabled(rename = "ORDER_REFERENCE")]
    pub reference: String,
    #[serde(rename = "ORDER_DATE")]
    #[tabled(rename = "ORDER_DATE")]
    pub date: String,
    #[serde(rename = "Country")]
    #[tabled(rename = "Country")]
    pub country: String,
    #[serde(rename = "City")]
    #[tabled(rename = "City")]
    pub city: String,
    #[serde(rename = "Banques")]
    #[tabled(rename = "Banques")]
    pub bank: String,
    #[serde(rename = "Amount")]
    #[tabled(rename = "Amount")]
    pub amount: String,
    #[serde(rename = "Rating")]
    #[tabled(rename = "Rating")]
    pub rating: String,
    #[serde(rename = "SHORT_MESSAGE")]
    #[tabled(rename = "SHORT_MESSAGE")]
    pub message: String,
}

impl From<&Transaction> for TransactionRow {
    fn from(t: &Transaction) -> Self {
        let text = |v: &Option<String>| v.clone().unwrap_or_default();
        Self {
            identifier: text(&t.identifier),
            reference: text(&t.reference),
            date: t.date.map(|d| d.to_string()).unwrap_or_default(),
            country: text(&t.country),
            city: text(&t.city),
            bank: text(&t.bank),
            amount: format_number(t.amount, 2),
            rating: text(&t.rating),
            message: text(&t.message),
        }
    }
}

/// Headline metrics of a filtered table, also written as the JSON summary.
#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct MetricSummary {
    pub table: String,
    pub total: f64,
    pub average: f64,
    pub transactions: usize,
}
