// Filter engine: narrows a sales or collections table by identifier, date
// range, country and, through a semi-join on the staff roster, by team,
// department and activity.
use chrono::{Local, NaiveDate};
use once_cell::sync::Lazy;
use serde::Deserialize;
use std::collections::{BTreeSet, HashSet};
use tracing::debug;

use crate::types::{Roster, StaffMember, Transaction, TransactionTable};

// Inputs that mean "no restriction" on a selector, compared lowercase.
static ALL_SENTINELS: Lazy<HashSet<&'static str>> =
    Lazy::new(|| ["", "*", "all", "tous", "toutes"].into_iter().collect());

/// One selector: either the "all" sentinel or an exact value.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Selection {
    #[default]
    All,
    Only(String),
}

impl Selection {
    pub fn parse(input: &str) -> Self {
        let trimmed = input.trim();
        if ALL_SENTINELS.contains(trimmed.to_lowercase().as_str()) {
            Selection::All
        } else {
            Selection::Only(trimmed.to_string())
        }
    }

    pub fn only(value: &str) -> Self {
        Selection::Only(value.to_string())
    }

    pub fn is_all(&self) -> bool {
        matches!(self, Selection::All)
    }

    pub fn matches(&self, value: Option<&str>) -> bool {
        match self {
            Selection::All => true,
            Selection::Only(wanted) => value == Some(wanted.as_str()),
        }
    }
}

/// How transactions whose identifier is absent from the roster are treated
/// by the organizational filters.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum UnmatchedPolicy {
    /// The roster semi-join always applies (when the roster is non-empty),
    /// so unmatched rows are dropped even with every selector on "all".
    #[default]
    Exclude,
    /// The semi-join is skipped when team, department and activity are all
    /// on "all", keeping unmatched rows in unrestricted views.
    KeepWhenUnrestricted,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterSelection {
    pub country: Selection,
    pub team: Selection,
    pub department: Selection,
    pub activity: Selection,
    pub date_start: Option<NaiveDate>,
    pub date_end: Option<NaiveDate>,
    /// Restricts to one staff member and bypasses every other selector.
    pub identifier: Option<String>,
}

impl FilterSelection {
    pub fn for_identifier(identifier: &str) -> Self {
        Self {
            identifier: Some(identifier.to_string()),
            ..Default::default()
        }
    }

    pub fn between(mut self, start: NaiveDate, end: NaiveDate) -> Self {
        self.date_start = Some(start);
        self.date_end = Some(end);
        self
    }

    fn org_unrestricted(&self) -> bool {
        self.team.is_all() && self.department.is_all() && self.activity.is_all()
    }

    fn staff_matches(&self, member: &StaffMember) -> bool {
        self.team.matches(member.team.as_deref())
            && self.department.matches(member.department.as_deref())
            && self.activity.matches(member.activity.as_deref())
    }

    fn date_matches(&self, date: Option<NaiveDate>) -> bool {
        if self.date_start.is_none() && self.date_end.is_none() {
            return true;
        }
        let Some(d) = date else {
            return false;
        };
        self.date_start.map_or(true, |s| d >= s) && self.date_end.map_or(true, |e| d <= e)
    }
}

/// Apply `selection` to `table`. Never fails: no match yields an empty table.
pub fn filter(
    table: &TransactionTable,
    roster: &Roster,
    selection: &FilterSelection,
    policy: UnmatchedPolicy,
) -> TransactionTable {
    if let Some(id) = selection.identifier.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        let rows = table
            .rows
            .iter()
            .filter(|t| t.identifier.as_deref() == Some(id))
            .cloned()
            .collect();
        return table.with_rows(rows);
    }

    let semi_join = !roster.is_empty()
        && !(policy == UnmatchedPolicy::KeepWhenUnrestricted && selection.org_unrestricted());
    let allowed: HashSet<&str> = if semi_join {
        roster
            .members()
            .iter()
            .filter(|m| selection.staff_matches(m))
            .map(|m| m.identifier.as_str())
            .collect()
    } else {
        HashSet::new()
    };

    let keep = |t: &&Transaction| {
        (!table.has_date_column || selection.date_matches(t.date))
            && selection.country.matches(t.country.as_deref())
            && (!semi_join
                || t.identifier
                    .as_deref()
                    .map_or(false, |id| allowed.contains(id)))
    };
    let rows: Vec<Transaction> = table.rows.iter().filter(keep).cloned().collect();
    debug!(
        "{}: {} of {} rows kept",
        table.kind.label(),
        rows.len(),
        table.len()
    );
    table.with_rows(rows)
}

fn distinct_sorted<'a>(values: impl Iterator<Item = Option<&'a str>>) -> Vec<String> {
    values
        .flatten()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .map(str::to_string)
        .collect()
}

/// Selector options: distinct, sorted, non-empty values.
pub fn country_options(table: &TransactionTable) -> Vec<String> {
    distinct_sorted(table.rows.iter().map(|t| t.country.as_deref()))
}

pub fn team_options(roster: &Roster) -> Vec<String> {
    distinct_sorted(roster.members().iter().map(|m| m.team.as_deref()))
}

pub fn department_options(roster: &Roster) -> Vec<String> {
    distinct_sorted(roster.members().iter().map(|m| m.department.as_deref()))
}

pub fn activity_options(roster: &Roster) -> Vec<String> {
    distinct_sorted(roster.members().iter().map(|m| m.activity.as_deref()))
}

/// Earliest and latest date across the given tables.
pub fn date_bounds(tables: &[&TransactionTable]) -> Option<(NaiveDate, NaiveDate)> {
    let dates = tables.iter().flat_map(|t| t.rows.iter().filter_map(|r| r.date));
    dates.fold(None, |acc, d| match acc {
        None => Some((d, d)),
        Some((lo, hi)) => Some((lo.min(d), hi.max(d))),
    })
}

/// Date range preselected in the session: the data's bounds, or today when
/// nothing is loaded.
pub fn default_date_range(tables: &[&TransactionTable]) -> (NaiveDate, NaiveDate) {
    date_bounds(tables).unwrap_or_else(|| {
        let today = Local::now().date_naive();
        (today, today)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TableKind;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn sale(id: &str, amount: f64, country: &str, day: Option<NaiveDate>) -> Transaction {
        let mut t = Transaction::new(Some(id), amount);
        t.country = Some(country.to_string());
        t.city = Some("Paris".to_string());
        t.date = day;
        t
    }

    fn member(id: &str, team: &str, department: &str, activity: &str) -> StaffMember {
        StaffMember {
            team: Some(team.to_string()),
            department: Some(department.to_string()),
            activity: Some(activity.to_string()),
            ..StaffMember::new(id)
        }
    }

    fn ids(table: &TransactionTable) -> Vec<&str> {
        table
            .rows
            .iter()
            .filter_map(|t| t.identifier.as_deref())
            .collect()
    }

    fn sample() -> (TransactionTable, Roster) {
        let table = TransactionTable::new(
            TableKind::Sales,
            vec![
                sale("1", 10.0, "France", Some(date(2024, 1, 5))),
                sale("2", 20.0, "France", Some(date(2024, 2, 1))),
                sale("3", 5.0, "Spain", Some(date(2024, 1, 20))),
                sale("1", 7.0, "Spain", None),
            ],
        );
        let roster = Roster::new(vec![
            member("1", "A", "Sales", "Phone"),
            member("2", "B", "Sales", "Mail"),
        ]);
        (table, roster)
    }

    #[test]
    fn test_selection_parse() {
        assert_eq!(Selection::parse(""), Selection::All);
        assert_eq!(Selection::parse(" Tous "), Selection::All);
        assert_eq!(Selection::parse("toutes"), Selection::All);
        assert_eq!(Selection::parse(" A "), Selection::only("A"));
    }

    #[test]
    fn test_identifier_bypasses_other_filters() {
        let (table, roster) = sample();
        let selection = FilterSelection {
            country: Selection::only("Germany"),
            team: Selection::only("B"),
            identifier: Some("1".to_string()),
            ..FilterSelection::default()
        }
        .between(date(2030, 1, 1), date(2030, 12, 31));
        let out = filter(&table, &roster, &selection, UnmatchedPolicy::Exclude);
        assert_eq!(ids(&out), vec!["1", "1"]);
    }

    #[test]
    fn test_blank_identifier_is_ignored() {
        let (table, roster) = sample();
        let selection = FilterSelection {
            identifier: Some("  ".to_string()),
            ..FilterSelection::default()
        };
        let out = filter(&table, &roster, &selection, UnmatchedPolicy::Exclude);
        assert_eq!(ids(&out), vec!["1", "2", "1"]);
    }

    #[test]
    fn test_date_range_is_inclusive_and_drops_missing_dates() {
        let (table, roster) = sample();
        let selection = FilterSelection::default().between(date(2024, 1, 5), date(2024, 2, 1));
        let out = filter(&table, &roster, &selection, UnmatchedPolicy::KeepWhenUnrestricted);
        assert_eq!(ids(&out), vec!["1", "2", "3"]);
        assert!(out
            .rows
            .iter()
            .all(|t| t.date.map_or(false, |d| d >= date(2024, 1, 5) && d <= date(2024, 2, 1))));
    }

    #[test]
    fn test_no_date_column_skips_date_filter() {
        let (mut table, roster) = sample();
        table.has_date_column = false;
        let selection = FilterSelection::default().between(date(2030, 1, 1), date(2030, 1, 2));
        let out = filter(&table, &roster, &selection, UnmatchedPolicy::KeepWhenUnrestricted);
        assert_eq!(out.len(), 4);
    }

    #[test]
    fn test_country_filter() {
        let (table, roster) = sample();
        let selection = FilterSelection {
            country: Selection::only("Spain"),
            ..FilterSelection::default()
        };
        let out = filter(&table, &roster, &selection, UnmatchedPolicy::KeepWhenUnrestricted);
        assert_eq!(ids(&out), vec!["3", "1"]);
    }

    #[test]
    fn test_team_filter_excludes_unmatched_identifiers() {
        let roster = Roster::new(vec![member("1", "A", "D", "X"), member("2", "B", "D", "X")]);
        let table = TransactionTable::new(
            TableKind::Sales,
            vec![
                Transaction::new(Some("1"), 10.0),
                Transaction::new(Some("2"), 20.0),
                Transaction::new(Some("3"), 5.0),
            ],
        );
        let selection = FilterSelection {
            team: Selection::only("A"),
            ..FilterSelection::default()
        };
        for policy in [UnmatchedPolicy::Exclude, UnmatchedPolicy::KeepWhenUnrestricted] {
            let out = filter(&table, &roster, &selection, policy);
            assert_eq!(ids(&out), vec!["1"]);
        }
    }

    #[test]
    fn test_unmatched_policy_when_unrestricted() {
        let (table, roster) = sample();
        let selection = FilterSelection::default();
        let excluded = filter(&table, &roster, &selection, UnmatchedPolicy::Exclude);
        assert_eq!(ids(&excluded), vec!["1", "2", "1"]);
        let kept = filter(&table, &roster, &selection, UnmatchedPolicy::KeepWhenUnrestricted);
        assert_eq!(ids(&kept), vec!["1", "2", "3", "1"]);
    }

    #[test]
    fn test_empty_roster_disables_semi_join() {
        let (table, _) = sample();
        let selection = FilterSelection {
            team: Selection::only("A"),
            ..FilterSelection::default()
        };
        let out = filter(&table, &Roster::default(), &selection, UnmatchedPolicy::Exclude);
        assert_eq!(out.len(), 4);
    }

    #[test]
    fn test_all_sentinel_imposes_no_restriction() {
        let (table, roster) = sample();
        let with_dept = FilterSelection {
            team: Selection::only("B"),
            department: Selection::All,
            ..FilterSelection::default()
        };
        let without = FilterSelection {
            team: Selection::only("B"),
            ..FilterSelection::default()
        };
        assert_eq!(
            filter(&table, &roster, &with_dept, UnmatchedPolicy::Exclude).rows,
            filter(&table, &roster, &without, UnmatchedPolicy::Exclude).rows
        );
    }

    #[test]
    fn test_department_and_activity_combine() {
        let (table, roster) = sample();
        let selection = FilterSelection {
            department: Selection::only("Sales"),
            activity: Selection::only("Mail"),
            ..FilterSelection::default()
        };
        let out = filter(&table, &roster, &selection, UnmatchedPolicy::Exclude);
        assert_eq!(ids(&out), vec!["2"]);
    }

    #[test]
    fn test_no_match_returns_empty() {
        let (table, roster) = sample();
        let selection = FilterSelection {
            team: Selection::only("Z"),
            ..FilterSelection::default()
        };
        let out = filter(&table, &roster, &selection, UnmatchedPolicy::Exclude);
        assert!(out.is_empty());
        assert_eq!(out.kind, TableKind::Sales);
    }

    #[test]
    fn test_options_and_bounds() {
        let (table, roster) = sample();
        assert_eq!(country_options(&table), vec!["France", "Spain"]);
        assert_eq!(team_options(&roster), vec!["A", "B"]);
        assert_eq!(department_options(&roster), vec!["Sales"]);
        assert_eq!(activity_options(&roster), vec!["Mail", "Phone"]);
        assert_eq!(
            date_bounds(&[&table]),
            Some((date(2024, 1, 5), date(2024, 2, 1)))
        );
        let empty = TransactionTable::empty(TableKind::Collections);
        assert_eq!(date_bounds(&[&empty]), None);
        let (lo, hi) = default_date_range(&[&empty]);
        assert_eq!(lo, hi);
    }
}
