// Normalizer: maps untyped tables onto typed records through the configured
// column mapping. Dates that do not parse become `None`; amounts that do not
// parse become zero.
use tracing::{debug, info};

use crate::config::{ColumnMap, ColumnsConfig, StaffColumns};
use crate::error::{DashboardError, Result};
use crate::types::{
    Dataset, RawDataset, RawTable, Roster, StaffMember, TableKind, Transaction, TransactionTable,
};
use crate::util::{clean_text, parse_amount, parse_date_safe, parse_f64_safe};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NormalizeReport {
    pub total_rows: usize,
    pub unparsed_dates: usize,
    pub zeroed_amounts: usize,
    pub skipped_staff: usize,
}

impl NormalizeReport {
    fn absorb(&mut self, other: &NormalizeReport) {
        self.total_rows += other.total_rows;
        self.unparsed_dates += other.unparsed_dates;
        self.zeroed_amounts += other.zeroed_amounts;
        self.skipped_staff += other.skipped_staff;
    }
}

pub fn normalize(raw: &RawDataset, columns: &ColumnsConfig) -> Result<(Dataset, NormalizeReport)> {
    let mut report = NormalizeReport::default();

    let (sales, r) = normalize_transactions(&raw.sales, TableKind::Sales, &columns.sales)?;
    report.absorb(&r);
    let (collections, r) =
        normalize_transactions(&raw.collections, TableKind::Collections, &columns.collections)?;
    report.absorb(&r);
    let (roster, r) = normalize_staff(&raw.staff, &columns.staff)?;
    report.absorb(&r);

    info!(
        "Normalized {} rows ({} unparsed dates, {} amounts set to zero, {} staff rows skipped)",
        report.total_rows, report.unparsed_dates, report.zeroed_amounts, report.skipped_staff
    );
    Ok((
        Dataset {
            sales,
            collections,
            roster,
        },
        report,
    ))
}

fn required(table: &RawTable, column: &str) -> Result<usize> {
    table
        .column_index(column)
        .ok_or_else(|| DashboardError::MissingColumn {
            table: table.name.clone(),
            column: column.to_string(),
        })
}

fn optional(table: &RawTable, column: &Option<String>) -> Option<usize> {
    column.as_deref().and_then(|c| table.column_index(c))
}

fn cell(row: &[Option<String>], idx: Option<usize>) -> Option<&str> {
    idx.and_then(|i| row.get(i)).and_then(|c| c.as_deref())
}

pub fn normalize_transactions(
    table: &RawTable,
    kind: TableKind,
    columns: &ColumnMap,
) -> Result<(TransactionTable, NormalizeReport)> {
    let mut report = NormalizeReport::default();
    if table.headers.is_empty() {
        return Ok((TransactionTable::empty(kind), report));
    }

    let id_idx = Some(required(table, &columns.identifier)?);
    let amount_idx = Some(required(table, &columns.amount)?);
    let date_idx = optional(table, &columns.date);
    let country_idx = optional(table, &columns.country);
    let city_idx = optional(table, &columns.city);
    let reference_idx = optional(table, &columns.reference);
    let bank_idx = optional(table, &columns.bank);
    let rating_idx = optional(table, &columns.rating);
    let message_idx = optional(table, &columns.message);
    // Coordinates enriched upstream skip geocoding.
    let lat_idx = table.column_index("Latitude");
    let lon_idx = table.column_index("Longitude");
    let has_coordinates = lat_idx.is_some() && lon_idx.is_some();

    let mut rows = Vec::with_capacity(table.len());
    for row in &table.rows {
        report.total_rows += 1;

        let raw_date = cell(row, date_idx);
        let date = parse_date_safe(raw_date);
        if date.is_none() && raw_date.is_some() {
            report.unparsed_dates += 1;
        }

        let raw_amount = cell(row, amount_idx);
        if parse_f64_safe(raw_amount).is_none() {
            report.zeroed_amounts += 1;
        }

        rows.push(Transaction {
            identifier: clean_text(cell(row, id_idx)),
            reference: clean_text(cell(row, reference_idx)),
            date,
            country: clean_text(cell(row, country_idx)),
            city: clean_text(cell(row, city_idx)),
            bank: clean_text(cell(row, bank_idx)),
            amount: parse_amount(raw_amount),
            rating: clean_text(cell(row, rating_idx)),
            message: clean_text(cell(row, message_idx)),
            latitude: parse_f64_safe(cell(row, lat_idx)),
            longitude: parse_f64_safe(cell(row, lon_idx)),
        });
    }
    debug!("{}: {} rows normalized", table.name, rows.len());

    Ok((
        TransactionTable {
            kind,
            rows,
            has_date_column: date_idx.is_some(),
            has_coordinates,
        },
        report,
    ))
}

pub fn normalize_staff(table: &RawTable, columns: &StaffColumns) -> Result<(Roster, NormalizeReport)> {
    let mut report = NormalizeReport::default();
    if table.headers.is_empty() {
        return Ok((Roster::default(), report));
    }

    let id_idx = Some(required(table, &columns.identifier)?);
    let team_idx = optional(table, &columns.team);
    let department_idx = optional(table, &columns.department);
    let activity_idx = optional(table, &columns.activity);
    let role_idx = optional(table, &columns.role);
    let hire_idx = optional(table, &columns.hire_date);
    let user_idx = optional(table, &columns.user_name);
    let last_idx = optional(table, &columns.last_name);
    let first_idx = optional(table, &columns.first_name);

    let mut members = Vec::with_capacity(table.len());
    for row in &table.rows {
        report.total_rows += 1;
        let Some(identifier) = clean_text(cell(row, id_idx)) else {
            report.skipped_staff += 1;
            continue;
        };
        let raw_hire = cell(row, hire_idx);
        let hire_date = parse_date_safe(raw_hire);
        if hire_date.is_none() && raw_hire.is_some() {
            report.unparsed_dates += 1;
        }
        members.push(StaffMember {
            identifier,
            user_name: clean_text(cell(row, user_idx)),
            last_name: clean_text(cell(row, last_idx)),
            first_name: clean_text(cell(row, first_idx)),
            team: clean_text(cell(row, team_idx)),
            department: clean_text(cell(row, department_idx)),
            activity: clean_text(cell(row, activity_idx)),
            role: clean_text(cell(row, role_idx)),
            hire_date,
        });
    }

    let before = members.len();
    let roster = Roster::new(members);
    report.skipped_staff += before - roster.len();
    Ok((roster, report))
}
