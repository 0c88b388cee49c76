use thiserror::Error;

#[derive(Error, Debug)]
pub enum DashboardError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Workbook error: {0}")]
    Workbook(#[from] calamine::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("Sheet '{0}' not found in workbook")]
    MissingSheet(String),

    #[error("Column '{column}' missing from table '{table}'")]
    MissingColumn { table: String, column: String },

    #[error("Geocoding error: {0}")]
    Geocode(String),
}

pub type Result<T> = std::result::Result<T, DashboardError>;
