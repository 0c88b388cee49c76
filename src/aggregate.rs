use serde::Deserialize;
use std::cmp::Ordering;
use std::collections::HashMap;

use crate::types::{
    GroupTotalRow, HeadcountRow, MapPointRow, MetricSummary, Roster, StaffMember, Transaction,
    TransactionTable,
};
use crate::util::{average, format_number};

pub const UNKNOWN_GROUP: &str = "(unknown)";

/// Dimension a table can be grouped by. Team, department and activity are
/// not on the transactions themselves and come from the roster.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum GroupBy {
    City,
    Country,
    Bank,
    Team,
    Department,
    Activity,
    Day,
}

impl GroupBy {
    pub fn label(&self) -> &'static str {
        match self {
            GroupBy::City => "City",
            GroupBy::Country => "Country",
            GroupBy::Bank => "Bank",
            GroupBy::Team => "Team",
            GroupBy::Department => "Department",
            GroupBy::Activity => "Activity",
            GroupBy::Day => "Date",
        }
    }

    pub fn uses_roster(&self) -> bool {
        matches!(self, GroupBy::Team | GroupBy::Department | GroupBy::Activity)
    }
}

impl StaffMember {
    pub fn attribute(&self, by: GroupBy) -> Option<&str> {
        match by {
            GroupBy::Team => self.team.as_deref(),
            GroupBy::Department => self.department.as_deref(),
            GroupBy::Activity => self.activity.as_deref(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroupTotal {
    /// `None` is the unknown group: no value, or no roster match.
    pub group: Option<String>,
    pub total: f64,
    pub count: usize,
}

impl GroupTotal {
    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.total / self.count as f64
        }
    }
}

impl From<&GroupTotal> for GroupTotalRow {
    fn from(g: &GroupTotal) -> Self {
        Self {
            group: g.group.clone().unwrap_or_else(|| UNKNOWN_GROUP.to_string()),
            total: format_number(g.total, 2),
            count: g.count,
            average: format_number(g.mean(), 2),
        }
    }
}

fn group_label(t: &Transaction, by: GroupBy, staff: &HashMap<&str, &StaffMember>) -> Option<String> {
    match by {
        GroupBy::City => t.city.clone(),
        GroupBy::Country => t.country.clone(),
        GroupBy::Bank => t.bank.clone(),
        GroupBy::Day => t.date.map(|d| d.to_string()),
        GroupBy::Team | GroupBy::Department | GroupBy::Activity => t
            .identifier
            .as_deref()
            .and_then(|id| staff.get(id))
            .and_then(|m| m.attribute(by))
            .map(str::to_string),
    }
}

// Known labels ascending, the unknown group last.
fn label_order(a: &Option<String>, b: &Option<String>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Group `table` by `by` and total the amount column.
///
/// Roster dimensions left-join on identifier first; identifiers missing from
/// the roster land in the unknown group rather than being dropped.
pub fn aggregate(table: &TransactionTable, roster: &Roster, by: GroupBy) -> Vec<GroupTotal> {
    let staff: HashMap<&str, &StaffMember> = if by.uses_roster() {
        roster
            .members()
            .iter()
            .map(|m| (m.identifier.as_str(), m))
            .collect()
    } else {
        HashMap::new()
    };

    let mut map: HashMap<Option<String>, (f64, usize)> = HashMap::new();
    for t in &table.rows {
        let e = map.entry(group_label(t, by, &staff)).or_insert((0.0, 0));
        e.0 += t.amount;
        e.1 += 1;
    }

    let mut groups: Vec<GroupTotal> = map
        .into_iter()
        .map(|(group, (total, count))| GroupTotal {
            group,
            total,
            count,
        })
        .collect();
    groups.sort_by(|a, b| label_order(&a.group, &b.group));
    groups
}

/// Metric tiles: total, mean and count of the amount column.
pub fn metrics(table: &TransactionTable) -> MetricSummary {
    let amounts: Vec<f64> = table.rows.iter().map(|t| t.amount).collect();
    MetricSummary {
        table: table.kind.label().to_string(),
        total: amounts.iter().sum(),
        average: average(&amounts),
        transactions: amounts.len(),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MapPoint {
    pub city: String,
    pub latitude: f64,
    pub longitude: f64,
    pub total: f64,
    pub count: usize,
}

impl From<&MapPoint> for MapPointRow {
    fn from(p: &MapPoint) -> Self {
        Self {
            city: p.city.clone(),
            latitude: format!("{:.4}", p.latitude),
            longitude: format!("{:.4}", p.longitude),
            total: format_number(p.total, 2),
            count: p.count,
        }
    }
}

/// Group geocoded rows by (city, latitude, longitude), largest total first.
/// Rows without a city or coordinates cannot be placed and are dropped.
pub fn map_points(table: &TransactionTable) -> Vec<MapPoint> {
    let mut map: HashMap<(String, u64, u64), MapPoint> = HashMap::new();
    for t in &table.rows {
        let (Some(city), Some(lat), Some(lon)) = (&t.city, t.latitude, t.longitude) else {
            continue;
        };
        let e = map
            .entry((city.clone(), lat.to_bits(), lon.to_bits()))
            .or_insert_with(|| MapPoint {
                city: city.clone(),
                latitude: lat,
                longitude: lon,
                total: 0.0,
                count: 0,
            });
        e.total += t.amount;
        e.count += 1;
    }
    let mut points: Vec<MapPoint> = map.into_values().collect();
    points.sort_by(|a, b| {
        b.total
            .partial_cmp(&a.total)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.city.cmp(&b.city))
    });
    points
}

/// Centre of the map: mean of the point coordinates.
pub fn map_center(points: &[MapPoint]) -> Option<(f64, f64)> {
    if points.is_empty() {
        return None;
    }
    let lats: Vec<f64> = points.iter().map(|p| p.latitude).collect();
    let lons: Vec<f64> = points.iter().map(|p| p.longitude).collect();
    Some((average(&lats), average(&lons)))
}

/// Staff counts per roster dimension (team, department or activity).
pub fn headcount(roster: &Roster, by: GroupBy) -> Vec<HeadcountRow> {
    let mut map: HashMap<Option<String>, usize> = HashMap::new();
    for m in roster.members() {
        *map.entry(m.attribute(by).map(str::to_string)).or_insert(0) += 1;
    }
    let mut counts: Vec<(Option<String>, usize)> = map.into_iter().collect();
    counts.sort_by(|a, b| label_order(&a.0, &b.0));
    counts
        .into_iter()
        .map(|(group, count)| HeadcountRow {
            group: group.unwrap_or_else(|| UNKNOWN_GROUP.to_string()),
            count,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{filter, FilterSelection, UnmatchedPolicy};
    use crate::types::TableKind;
    use chrono::NaiveDate;

    fn sale(id: &str, city: &str, amount: f64) -> Transaction {
        let mut t = Transaction::new(Some(id), amount);
        t.city = Some(city.to_string());
        t
    }

    fn roster() -> Roster {
        Roster::new(vec![
            StaffMember {
                team: Some("A".to_string()),
                department: Some("Sales".to_string()),
                ..StaffMember::new("1")
            },
            StaffMember {
                team: Some("B".to_string()),
                ..StaffMember::new("2")
            },
        ])
    }

    #[test]
    fn test_filter_then_aggregate_by_city() {
        let mut jan = sale("1", "Paris", 100.0);
        jan.date = NaiveDate::from_ymd_opt(2024, 1, 5);
        let mut feb = sale("1", "Paris", 50.0);
        feb.date = NaiveDate::from_ymd_opt(2024, 2, 1);
        let table = TransactionTable::new(TableKind::Sales, vec![jan, feb]);

        let selection = FilterSelection::default().between(
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
        );
        let filtered = filter(&table, &roster(), &selection, UnmatchedPolicy::Exclude);
        assert_eq!(filtered.len(), 1);

        let groups = aggregate(&filtered, &roster(), GroupBy::City);
        assert_eq!(
            groups,
            vec![GroupTotal {
                group: Some("Paris".to_string()),
                total: 100.0,
                count: 1,
            }]
        );
    }

    #[test]
    fn test_sums_and_counts_per_group() {
        let table = TransactionTable::new(
            TableKind::Sales,
            vec![
                sale("1", "Paris", 10.0),
                sale("2", "Lyon", 20.0),
                sale("1", "Paris", 5.0),
                sale("2", "Lyon", 0.0),
            ],
        );
        let groups = aggregate(&table, &roster(), GroupBy::City);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].group.as_deref(), Some("Lyon"));
        assert_eq!((groups[0].total, groups[0].count), (20.0, 2));
        assert_eq!(groups[0].mean(), 10.0);
        assert_eq!(groups[1].group.as_deref(), Some("Paris"));
        assert_eq!((groups[1].total, groups[1].count), (15.0, 2));
    }

    #[test]
    fn test_team_breakdown_keeps_unmatched_as_unknown() {
        let table = TransactionTable::new(
            TableKind::Sales,
            vec![
                sale("1", "Paris", 10.0),
                sale("2", "Paris", 20.0),
                sale("3", "Paris", 5.0),
                Transaction::new(None, 1.0),
            ],
        );
        let groups = aggregate(&table, &roster(), GroupBy::Team);
        let labels: Vec<Option<&str>> = groups.iter().map(|g| g.group.as_deref()).collect();
        assert_eq!(labels, vec![Some("A"), Some("B"), None]);
        assert_eq!((groups[2].total, groups[2].count), (6.0, 2));

        let rows: Vec<GroupTotalRow> = groups.iter().map(GroupTotalRow::from).collect();
        assert_eq!(rows[2].group, UNKNOWN_GROUP);
        assert_eq!(rows[2].total, "6.00");
    }

    #[test]
    fn test_department_breakdown_missing_attribute_is_unknown() {
        let table = TransactionTable::new(
            TableKind::Sales,
            vec![sale("1", "Paris", 10.0), sale("2", "Paris", 20.0)],
        );
        let groups = aggregate(&table, &roster(), GroupBy::Department);
        assert_eq!(groups[0].group.as_deref(), Some("Sales"));
        assert_eq!(groups[1].group, None);
        assert_eq!(groups[1].total, 20.0);
    }

    #[test]
    fn test_bank_and_day_groups() {
        let mut a = Transaction::new(Some("1"), 3.0);
        a.bank = Some("BNP".to_string());
        a.date = NaiveDate::from_ymd_opt(2024, 3, 2);
        let mut b = Transaction::new(Some("1"), 4.0);
        b.bank = Some("BNP".to_string());
        b.date = NaiveDate::from_ymd_opt(2024, 3, 1);
        let table = TransactionTable::new(TableKind::Collections, vec![a, b]);

        let banks = aggregate(&table, &Roster::default(), GroupBy::Bank);
        assert_eq!(banks.len(), 1);
        assert_eq!(banks[0].total, 7.0);

        let days = aggregate(&table, &Roster::default(), GroupBy::Day);
        assert_eq!(days[0].group.as_deref(), Some("2024-03-01"));
        assert_eq!(days[1].group.as_deref(), Some("2024-03-02"));
    }

    #[test]
    fn test_empty_table_aggregates_to_nothing() {
        let table = TransactionTable::empty(TableKind::Sales);
        assert!(aggregate(&table, &roster(), GroupBy::City).is_empty());
        let m = metrics(&table);
        assert_eq!((m.total, m.average, m.transactions), (0.0, 0.0, 0));
    }

    #[test]
    fn test_metrics() {
        let table = TransactionTable::new(
            TableKind::Sales,
            vec![sale("1", "Paris", 10.0), sale("2", "Lyon", 0.0)],
        );
        let m = metrics(&table);
        assert_eq!(m.table, "Sales");
        assert_eq!(m.total, 10.0);
        assert_eq!(m.average, 5.0);
        assert_eq!(m.transactions, 2);
    }

    #[test]
    fn test_map_points_drop_missing_coordinates() {
        let mut paris = sale("1", "Paris", 10.0);
        paris.latitude = Some(48.85);
        paris.longitude = Some(2.35);
        let mut paris2 = paris.clone();
        paris2.amount = 5.0;
        let mut lyon = sale("2", "Lyon", 30.0);
        lyon.latitude = Some(45.76);
        lyon.longitude = Some(4.83);
        let nowhere = sale("3", "Atlantis", 99.0);
        let table = TransactionTable::new(TableKind::Sales, vec![paris, paris2, lyon, nowhere]);

        let points = map_points(&table);
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].city, "Lyon");
        assert_eq!(points[1].city, "Paris");
        assert_eq!((points[1].total, points[1].count), (15.0, 2));

        let (lat, lon) = map_center(&points).unwrap();
        assert!((lat - (48.85 + 45.76) / 2.0).abs() < 1e-9);
        assert!((lon - (2.35 + 4.83) / 2.0).abs() < 1e-9);
        assert_eq!(map_center(&[]), None);
    }

    #[test]
    fn test_headcount() {
        let rows = headcount(&roster(), GroupBy::Department);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].group, "Sales");
        assert_eq!(rows[1].group, UNKNOWN_GROUP);
        let rows = headcount(&roster(), GroupBy::Team);
        assert_eq!(rows.iter().map(|r| r.count).sum::<usize>(), 2);
    }
}
