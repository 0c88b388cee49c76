use serde::Serialize;
use std::path::Path;
use tabled::{settings::Style, Table, Tabled};

use crate::aggregate::{GroupBy, GroupTotal};
use crate::error::Result;
use crate::filter::Selection;
use crate::pipeline::{MapView, TableView};
use crate::types::{GroupTotalRow, MapPointRow, MetricSummary, TransactionRow, TransactionTable};
use crate::util::{format_int, format_number};

pub fn write_csv<T: Serialize>(path: &Path, rows: &[T]) -> Result<()> {
    let mut wtr = csv::Writer::from_path(path)?;
    for r in rows {
        wtr.serialize(r)?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let s = serde_json::to_string_pretty(value)?;
    std::fs::write(path, s)?;
    Ok(())
}

pub fn render_table<T>(rows: &[T], max_rows: usize) -> String
where
    T: Tabled + Clone,
{
    let slice: Vec<T> = rows.iter().take(max_rows).cloned().collect();
    if slice.is_empty() {
        return "(no rows)".to_string();
    }
    Table::new(slice).with(Style::markdown()).to_string()
}

pub fn preview_table_rows<T>(rows: &[T], max_rows: usize)
where
    T: Tabled + Clone,
{
    println!("{}\n", render_table(rows, max_rows));
}

/// The three metric tiles of a table.
pub fn render_metrics(m: &MetricSummary) -> String {
    format!(
        "Total: ${}  |  Average: ${}  |  Transactions: {}",
        format_number(m.total, 2),
        format_number(m.average, 2),
        format_int(m.transactions)
    )
}

pub fn group_rows(groups: &[GroupTotal]) -> Vec<GroupTotalRow> {
    groups.iter().map(GroupTotalRow::from).collect()
}

pub fn transaction_rows(table: &TransactionTable) -> Vec<TransactionRow> {
    table.rows.iter().map(TransactionRow::from).collect()
}

pub fn print_table_view(title: &str, view: &TableView, max_rows: usize) {
    println!("{}", title);
    if view.metrics.transactions == 0 {
        println!("No data to display.\n");
        return;
    }
    println!("{}\n", render_metrics(&view.metrics));
    for (by, groups) in &view.groups {
        println!("{} by {}", view.metrics.table, by.label());
        preview_table_rows(&group_rows(groups), max_rows);
    }
}

pub fn print_map_view(view: &MapView, max_rows: usize) {
    let points: Vec<MapPointRow> = view.points.iter().map(MapPointRow::from).collect();
    if points.is_empty() {
        println!("No geographic data available for the selected country\n");
    } else {
        if let Some((lat, lon)) = view.center {
            println!("Map centre: ({:.4}, {:.4})", lat, lon);
        }
        let country = match &view.country {
            Selection::All => "all countries",
            Selection::Only(c) => c.as_str(),
        };
        println!("Top cities by sales in {}", country);
        preview_table_rows(&points, max_rows);
    }
}

/// Sort by amount, largest first, for the detailed data table.
pub fn by_amount_desc(table: &TransactionTable) -> TransactionTable {
    let mut rows = table.rows.clone();
    rows.sort_by(|a, b| {
        b.amount
            .partial_cmp(&a.amount)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    table.with_rows(rows)
}

pub fn export_name(prefix: &str, by: GroupBy) -> String {
    format!("{}_by_{}.csv", prefix, by.label().to_lowercase())
}
