// Data source adapter: reads the sales, collections and staff tables as
// untyped `RawTable`s from a workbook, a directory of CSV exports or a
// SQLite database. Typing happens later in `normalize`.
use calamine::{open_workbook_auto, Data, Reader, Sheets};
use csv::ReaderBuilder;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::config::{SourceConfig, SourceKind};
use crate::error::{DashboardError, Result};
use crate::types::{RawDataset, RawTable};
use crate::util::{clean_text, excel_serial_to_date};

pub fn load(source: &SourceConfig) -> Result<RawDataset> {
    info!("Loading {:?} source from {}", source.kind, source.path);
    let data = match source.kind {
        SourceKind::Workbook => load_workbook(Path::new(&source.path), source)?,
        SourceKind::Csv => load_csv_dir(Path::new(&source.path), source)?,
        SourceKind::Database => {
            let conn = open_database(Path::new(&source.path))?;
            load_database(&conn, source)?
        }
    };
    info!(
        "Loaded {} sales, {} collections, {} staff rows",
        data.sales.len(),
        data.collections.len(),
        data.staff.len()
    );
    Ok(data)
}

pub fn load_workbook(path: &Path, source: &SourceConfig) -> Result<RawDataset> {
    let mut workbook = open_workbook_auto(path)?;
    let sales = read_sheet(&mut workbook, &source.sales)?;
    let staff = read_sheet(&mut workbook, &source.staff)?;
    let collections = optional(read_sheet(&mut workbook, &source.collections), &source.collections)?;
    Ok(RawDataset {
        sales,
        collections,
        staff,
    })
}

fn read_sheet(workbook: &mut Sheets<BufReader<File>>, name: &str) -> Result<RawTable> {
    if !workbook.sheet_names().iter().any(|s| s == name) {
        return Err(DashboardError::MissingSheet(name.to_string()));
    }
    let range = workbook.worksheet_range(name)?;
    let mut rows = range.rows();
    let headers: Vec<String> = match rows.next() {
        Some(header) => header
            .iter()
            .map(|c| cell_text(c).unwrap_or_default())
            .collect(),
        None => return Ok(RawTable::empty(name)),
    };
    let rows = rows
        .map(|r| r.iter().map(cell_text).collect::<Vec<_>>())
        .filter(|r| r.iter().any(Option::is_some))
        .collect();
    Ok(RawTable {
        name: name.to_string(),
        headers,
        rows,
    })
}

fn cell_text(cell: &Data) -> Option<String> {
    match cell {
        Data::Empty | Data::Error(_) => None,
        Data::String(s) => clean_text(Some(s)),
        Data::Float(f) => Some(float_text(*f)),
        Data::Int(i) => Some(i.to_string()),
        Data::DateTime(dt) => excel_serial_to_date(dt.as_f64()).map(|d| d.to_string()),
        other => clean_text(Some(other.to_string().as_str())),
    }
}

/// Whole floats print without a fractional part so numeric identifiers read
/// from a workbook (`1.0`) match the same identifier typed as text (`1`).
fn float_text(f: f64) -> String {
    if f.fract() == 0.0 && f.abs() < 1e15 {
        format!("{}", f as i64)
    } else {
        f.to_string()
    }
}

pub fn load_csv_dir(dir: &Path, source: &SourceConfig) -> Result<RawDataset> {
    let sales = read_csv(dir, &source.sales)?;
    let staff = read_csv(dir, &source.staff)?;
    let collections = optional(read_csv(dir, &source.collections), &source.collections)?;
    Ok(RawDataset {
        sales,
        collections,
        staff,
    })
}

fn read_csv(dir: &Path, name: &str) -> Result<RawTable> {
    let path = dir.join(format!("{}.csv", name));
    if !path.exists() {
        return Err(DashboardError::MissingSheet(name.to_string()));
    }
    let mut rdr = ReaderBuilder::new().flexible(true).from_path(&path)?;
    let headers: Vec<String> = rdr.headers()?.iter().map(|h| h.trim().to_string()).collect();
    let mut rows = Vec::new();
    let mut parse_errors = 0usize;
    for result in rdr.records() {
        match result {
            Ok(record) => rows.push(record.iter().map(|c| clean_text(Some(c))).collect()),
            Err(e) => {
                parse_errors += 1;
                debug!("Skipping malformed row in {}: {}", path.display(), e);
            }
        }
    }
    if parse_errors > 0 {
        warn!("{} rows skipped in {}", parse_errors, path.display());
    }
    Ok(RawTable {
        name: name.to_string(),
        headers,
        rows,
    })
}

pub fn open_database(path: &Path) -> Result<Connection> {
    if !path.exists() {
        return Err(DashboardError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("database not found: {}", path.display()),
        )));
    }
    Ok(Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?)
}

pub fn load_database(conn: &Connection, source: &SourceConfig) -> Result<RawDataset> {
    let sales = read_sql_table(conn, &source.sales)?;
    let staff = read_sql_table(conn, &source.staff)?;
    let collections = optional(read_sql_table(conn, &source.collections), &source.collections)?;
    Ok(RawDataset {
        sales,
        collections,
        staff,
    })
}

pub fn table_exists(conn: &Connection, table: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type IN ('table', 'view') AND name = ?1",
        [table],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

fn read_sql_table(conn: &Connection, table: &str) -> Result<RawTable> {
    if !table_exists(conn, table)? {
        return Err(DashboardError::MissingSheet(table.to_string()));
    }
    let sql = format!("SELECT * FROM {}", quote_ident(table));
    let mut stmt = conn.prepare(&sql)?;
    let headers: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
    let width = headers.len();
    let rows = stmt
        .query_map([], |row| {
            (0..width)
                .map(|i| row.get_ref(i).map(value_text))
                .collect::<rusqlite::Result<Vec<_>>>()
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(RawTable {
        name: table.to_string(),
        headers,
        rows,
    })
}

fn value_text(value: ValueRef<'_>) -> Option<String> {
    match value {
        ValueRef::Null | ValueRef::Blob(_) => None,
        ValueRef::Integer(i) => Some(i.to_string()),
        ValueRef::Real(f) => Some(float_text(f)),
        ValueRef::Text(t) => clean_text(Some(&*String::from_utf8_lossy(t))),
    }
}

pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// The collections table is optional: a missing sheet/table loads as empty.
fn optional(table: Result<RawTable>, name: &str) -> Result<RawTable> {
    match table {
        Err(DashboardError::MissingSheet(_)) => {
            warn!("Table '{}' not found, continuing without it", name);
            Ok(RawTable::empty(name))
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn csv_source(dir: &Path) -> SourceConfig {
        SourceConfig {
            kind: SourceKind::Csv,
            path: dir.display().to_string(),
            ..SourceConfig::default()
        }
    }

    #[test]
    fn test_load_csv_dir() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("Sales.csv"),
            "Hyp,ORDER_DATE,Country,City,Montant\n1,2024-01-05,France,Paris,100\n2,,France, Lyon ,\n",
        )
        .unwrap();
        fs::write(dir.path().join("Effectif.csv"), "Hyp,Team\n1,A\n").unwrap();

        let data = load(&csv_source(dir.path())).unwrap();
        assert_eq!(data.sales.len(), 2);
        assert_eq!(data.sales.column_index("City"), Some(3));
        assert_eq!(data.sales.rows[1][3].as_deref(), Some("Lyon"));
        assert_eq!(data.sales.rows[1][4], None);
        assert_eq!(data.staff.len(), 1);
        // No Recolt.csv: collections are optional.
        assert!(data.collections.is_empty());
        assert_eq!(data.collections.name, "Recolt");
    }

    #[test]
    fn test_missing_sales_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("Effectif.csv"), "Hyp,Team\n1,A\n").unwrap();
        let err = load(&csv_source(dir.path())).unwrap_err();
        assert!(matches!(err, DashboardError::MissingSheet(ref s) if s == "Sales"));
    }

    #[test]
    fn test_missing_workbook_is_an_error() {
        let source = SourceConfig {
            path: "does/not/exist.xlsx".to_string(),
            ..SourceConfig::default()
        };
        assert!(load(&source).is_err());
    }

    #[test]
    fn test_load_database() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE Sales (Hyp TEXT, ORDER_DATE TEXT, Total_sale REAL, Rating INTEGER);
             INSERT INTO Sales VALUES ('7', '2024-03-01 10:00:00', 12.5, 4);
             INSERT INTO Sales VALUES ('8', NULL, 3.0, NULL);
             CREATE TABLE Effectifs (Hyp TEXT, Team TEXT, Type TEXT);
             INSERT INTO Effectifs VALUES ('7', 'A', 'Agent');",
        )
        .unwrap();
        let source = SourceConfig {
            kind: SourceKind::Database,
            staff: "Effectifs".to_string(),
            ..SourceConfig::default()
        };
        let data = load_database(&conn, &source).unwrap();
        assert_eq!(data.sales.headers, vec!["Hyp", "ORDER_DATE", "Total_sale", "Rating"]);
        assert_eq!(data.sales.rows[0][2].as_deref(), Some("12.5"));
        assert_eq!(data.sales.rows[0][3].as_deref(), Some("4"));
        assert_eq!(data.sales.rows[1][1], None);
        assert_eq!(data.sales.rows[1][2].as_deref(), Some("3"));
        assert_eq!(data.staff.len(), 1);
        assert!(data.collections.is_empty());
    }

    #[test]
    fn test_open_missing_database() {
        let dir = tempfile::tempdir().unwrap();
        assert!(open_database(&dir.path().join("none.db")).is_err());
    }

    #[test]
    fn test_float_text() {
        assert_eq!(float_text(1.0), "1");
        assert_eq!(float_text(12.5), "12.5");
        assert_eq!(float_text(-3.0), "-3");
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("Sales"), "\"Sales\"");
        assert_eq!(quote_ident("a\"b"), "\"a\"\"b\"");
    }
}
