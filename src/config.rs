use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::aggregate::GroupBy;
use crate::error::Result;
use crate::filter::UnmatchedPolicy;

pub const CONFIG_FILE: &str = "sales_console.toml";
pub const CONFIG_ENV: &str = "SALES_CONSOLE_CONFIG";

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub source: SourceConfig,
    pub columns: ColumnsConfig,
    pub dashboard: DashboardLayout,
    pub filter: FilterConfig,
    pub geocoder: GeocoderConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// `.xlsx` / `.xlsm` workbook with one sheet per table.
    Workbook,
    /// Directory holding one `<sheet>.csv` export per table.
    Csv,
    /// SQLite database file.
    Database,
}

/// Where the tables come from. Doubles as the load cache key.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq, Hash)]
#[serde(default)]
pub struct SourceConfig {
    pub kind: SourceKind,
    pub path: String,
    pub sales: String,
    /// Optional: a missing collections sheet/table loads as empty.
    pub collections: String,
    pub staff: String,
    pub users: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            kind: SourceKind::Workbook,
            path: "Sources.xlsm".to_string(),
            sales: "Sales".to_string(),
            collections: "Recolt".to_string(),
            staff: "Effectif".to_string(),
            users: "Users".to_string(),
        }
    }
}

/// Column names of a sales or collections table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMap {
    pub identifier: String,
    pub amount: String,
    pub date: Option<String>,
    pub country: Option<String>,
    pub city: Option<String>,
    pub reference: Option<String>,
    pub bank: Option<String>,
    pub rating: Option<String>,
    pub message: Option<String>,
}

impl Default for ColumnMap {
    fn default() -> Self {
        Self {
            identifier: "Hyp".to_string(),
            amount: "Montant".to_string(),
            date: Some("ORDER_DATE".to_string()),
            country: Some("Country".to_string()),
            city: Some("City".to_string()),
            reference: Some("ORDER_REFERENCE".to_string()),
            bank: None,
            rating: Some("Rating".to_string()),
            message: Some("SHORT_MESSAGE".to_string()),
        }
    }
}

impl ColumnMap {
    pub fn collections() -> Self {
        Self {
            amount: "TRANSACTION".to_string(),
            bank: Some("Banques".to_string()),
            rating: None,
            ..Self::default()
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct StaffColumns {
    pub identifier: String,
    pub team: Option<String>,
    pub department: Option<String>,
    pub activity: Option<String>,
    pub role: Option<String>,
    pub hire_date: Option<String>,
    pub user_name: Option<String>,
    pub last_name: Option<String>,
    pub first_name: Option<String>,
}

impl Default for StaffColumns {
    fn default() -> Self {
        Self {
            identifier: "Hyp".to_string(),
            team: Some("Team".to_string()),
            department: Some("Departement".to_string()),
            activity: Some("Activité".to_string()),
            role: Some("Type".to_string()),
            hire_date: Some("Date_In".to_string()),
            user_name: Some("UserName".to_string()),
            last_name: Some("NOM".to_string()),
            first_name: Some("PRENOM".to_string()),
        }
    }
}

/// Fields set in a `[columns.sales]` or `[columns.collections]` section.
/// Anything omitted keeps that table's own default.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct ColumnOverrides {
    identifier: Option<String>,
    amount: Option<String>,
    date: Option<String>,
    country: Option<String>,
    city: Option<String>,
    reference: Option<String>,
    bank: Option<String>,
    rating: Option<String>,
    message: Option<String>,
}

impl ColumnOverrides {
    fn apply(self, base: ColumnMap) -> ColumnMap {
        ColumnMap {
            identifier: self.identifier.unwrap_or(base.identifier),
            amount: self.amount.unwrap_or(base.amount),
            date: self.date.or(base.date),
            country: self.country.or(base.country),
            city: self.city.or(base.city),
            reference: self.reference.or(base.reference),
            bank: self.bank.or(base.bank),
            rating: self.rating.or(base.rating),
            message: self.message.or(base.message),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct ColumnSections {
    sales: ColumnOverrides,
    collections: ColumnOverrides,
    staff: StaffColumns,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(from = "ColumnSections")]
pub struct ColumnsConfig {
    pub sales: ColumnMap,
    pub collections: ColumnMap,
    pub staff: StaffColumns,
}

impl From<ColumnSections> for ColumnsConfig {
    fn from(sections: ColumnSections) -> Self {
        Self {
            sales: sections.sales.apply(ColumnMap::default()),
            collections: sections.collections.apply(ColumnMap::collections()),
            staff: sections.staff,
        }
    }
}

impl Default for ColumnsConfig {
    fn default() -> Self {
        Self {
            sales: ColumnMap::default(),
            collections: ColumnMap::collections(),
            staff: StaffColumns::default(),
        }
    }
}

/// Grouping dimensions rendered on the dashboard page.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct DashboardLayout {
    pub sales_groups: Vec<GroupBy>,
    pub collections_groups: Vec<GroupBy>,
    pub map_top_cities: usize,
}

impl Default for DashboardLayout {
    fn default() -> Self {
        Self {
            sales_groups: vec![GroupBy::City, GroupBy::Team],
            collections_groups: vec![GroupBy::City, GroupBy::Bank],
            map_top_cities: 10,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct FilterConfig {
    pub unmatched: UnmatchedPolicy,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct GeocoderConfig {
    pub base_url: String,
    pub user_agent: String,
    pub min_delay_ms: u64,
    pub timeout_secs: u64,
}

impl Default for GeocoderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://nominatim.openstreetmap.org".to_string(),
            user_agent: "sales_dashboard".to_string(),
            min_delay_ms: 1000,
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct OutputConfig {
    pub export_dir: String,
    pub preview_rows: usize,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            export_dir: ".".to_string(),
            preview_rows: 10,
        }
    }
}

impl OutputConfig {
    pub fn export_path(&self, file: &str) -> PathBuf {
        Path::new(&self.export_dir).join(file)
    }
}

pub fn parse_config(contents: &str) -> Result<Config> {
    Ok(toml::from_str(contents)?)
}

/// Load configuration.
///
/// Search order:
/// 1. The file named by `SALES_CONSOLE_CONFIG`
/// 2. `sales_console.toml` in the working directory
/// 3. Built-in defaults (workbook `Sources.xlsm`)
pub fn load_config() -> Result<Config> {
    let candidate = std::env::var_os(CONFIG_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(CONFIG_FILE));

    if candidate.exists() {
        tracing::info!("Loading config from: {}", candidate.display());
        let contents = std::fs::read_to_string(&candidate)?;
        return parse_config(&contents);
    }

    tracing::info!("{} not found, using built-in defaults", candidate.display());
    Ok(Config::default())
}
