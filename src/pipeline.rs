// One parameterized pipeline behind every console page:
// load (cached) -> normalize -> filter -> aggregate, with an explicit
// `Session` carrying the logged-in user and the selected date range.
use chrono::NaiveDate;
use once_cell::unsync::OnceCell;
use std::collections::HashMap;
use tracing::{error, info};

use crate::aggregate::{aggregate, map_center, map_points, metrics, GroupBy, GroupTotal, MapPoint};
use crate::auth::AuthenticatedUser;
use crate::config::{Config, SourceConfig, SourceKind};
use crate::error::Result;
use crate::filter::{default_date_range, filter, FilterSelection, Selection};
use crate::geocode::{geocode, GeocodeService};
use crate::loader;
use crate::normalize::{normalize, NormalizeReport};
use crate::types::{Dataset, MetricSummary, RawDataset, Roster, TableKind, TransactionTable};

/// Raw loads keyed by their source parameters, kept for the process lifetime.
#[derive(Default)]
pub struct LoadCache {
    entries: HashMap<SourceConfig, RawDataset>,
}

impl LoadCache {
    pub fn get_or_load(&mut self, source: &SourceConfig) -> Result<&RawDataset> {
        if !self.entries.contains_key(source) {
            let data = loader::load(source)?;
            self.entries.insert(source.clone(), data);
        } else {
            info!("Using cached load of {}", source.path);
        }
        Ok(&self.entries[source])
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Who is looking and over which period.
#[derive(Debug, Clone)]
pub struct Session {
    pub user: Option<AuthenticatedUser>,
    pub date_start: NaiveDate,
    pub date_end: NaiveDate,
    /// Set for sources that carry a credential table.
    login_required: bool,
}

impl Session {
    /// Anonymous session over the full date range of `dataset`.
    pub fn new(dataset: &Dataset, source: SourceKind) -> Self {
        let (date_start, date_end) = default_date_range(&[&dataset.sales, &dataset.collections]);
        Self {
            user: None,
            date_start,
            date_end,
            login_required: source == SourceKind::Database,
        }
    }

    /// Only sources without a credential table run in manager mode anonymously.
    pub fn is_manager(&self) -> bool {
        match &self.user {
            Some(user) => user.is_manager(),
            None => !self.login_required,
        }
    }

    pub fn needs_login(&self) -> bool {
        self.login_required && self.user.is_none()
    }

    /// Record the outcome of a login attempt. A failed attempt signs out
    /// whoever was logged in before.
    pub fn sign_in(&mut self, user: Option<AuthenticatedUser>) -> Option<&AuthenticatedUser> {
        self.user = user;
        self.user.as_ref()
    }

    /// Manager selection from the page selectors plus the session period.
    pub fn selection(
        &self,
        country: Selection,
        team: Selection,
        department: Selection,
        activity: Selection,
    ) -> FilterSelection {
        FilterSelection {
            country,
            team,
            department,
            activity,
            ..FilterSelection::default()
        }
        .between(self.date_start, self.date_end)
    }

    /// Agent selection: the logged-in user's own rows only.
    pub fn own_selection(&self) -> Option<FilterSelection> {
        self.user
            .as_ref()
            .map(|u| FilterSelection::for_identifier(&u.identifier))
    }
}

/// Normalized tables of one load, plus the geocoded sales table computed at
/// most once per load.
pub struct Workspace {
    pub dataset: Dataset,
    pub report: NormalizeReport,
    geocoded_sales: OnceCell<TransactionTable>,
}

impl Workspace {
    pub fn new(dataset: Dataset, report: NormalizeReport) -> Self {
        Self {
            dataset,
            report,
            geocoded_sales: OnceCell::new(),
        }
    }

    pub fn empty() -> Self {
        Self::new(
            Dataset {
                sales: TransactionTable::empty(TableKind::Sales),
                collections: TransactionTable::empty(TableKind::Collections),
                roster: Roster::default(),
            },
            NormalizeReport::default(),
        )
    }

    pub fn geocoded_sales<S: GeocodeService + ?Sized>(&self, service: &S) -> &TransactionTable {
        self.geocoded_sales
            .get_or_init(|| geocode(&self.dataset.sales, service))
    }
}

pub struct LoadOutcome {
    pub workspace: Workspace,
    /// Message shown to the user when the load failed and tables are empty.
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TableView {
    pub metrics: MetricSummary,
    pub groups: Vec<(GroupBy, Vec<GroupTotal>)>,
}

#[derive(Debug, Clone)]
pub struct DashboardView {
    pub sales: TableView,
    pub collections: TableView,
}

#[derive(Debug, Clone)]
pub struct MapView {
    pub country: Selection,
    pub points: Vec<MapPoint>,
    pub center: Option<(f64, f64)>,
    pub rows: TransactionTable,
}

pub struct Pipeline {
    pub config: Config,
    cache: LoadCache,
}

impl Pipeline {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            cache: LoadCache::default(),
        }
    }

    /// Load and normalize. Failures are logged and degrade to empty tables so
    /// every page still renders.
    pub fn load(&mut self) -> LoadOutcome {
        let result = self
            .cache
            .get_or_load(&self.config.source)
            .and_then(|raw| normalize(raw, &self.config.columns));
        match result {
            Ok((dataset, report)) => LoadOutcome {
                workspace: Workspace::new(dataset, report),
                error: None,
            },
            Err(e) => {
                error!("Data load failed: {}", e);
                LoadOutcome {
                    workspace: Workspace::empty(),
                    error: Some(e.to_string()),
                }
            }
        }
    }

    /// Session for a fresh load; a logged-in user carries over from the
    /// previous session.
    pub fn session(&self, dataset: &Dataset, previous: Option<Session>) -> Session {
        let mut session = Session::new(dataset, self.config.source.kind);
        session.user = previous.and_then(|p| p.user);
        session
    }

    pub fn filtered(
        &self,
        dataset: &Dataset,
        kind: TableKind,
        selection: &FilterSelection,
    ) -> TransactionTable {
        filter(
            dataset.table(kind),
            &dataset.roster,
            selection,
            self.config.filter.unmatched,
        )
    }

    fn table_view(&self, dataset: &Dataset, table: &TransactionTable, dims: &[GroupBy]) -> TableView {
        TableView {
            metrics: metrics(table),
            groups: dims
                .iter()
                .map(|by| (*by, aggregate(table, &dataset.roster, *by)))
                .collect(),
        }
    }

    /// Manager dashboard: metrics and configured breakdowns for sales and
    /// collections, each under its own selection.
    pub fn dashboard(
        &self,
        dataset: &Dataset,
        sales: &FilterSelection,
        collections: &FilterSelection,
    ) -> DashboardView {
        let sales = self.filtered(dataset, TableKind::Sales, sales);
        let collections = self.filtered(dataset, TableKind::Collections, collections);
        DashboardView {
            sales: self.table_view(dataset, &sales, &self.config.dashboard.sales_groups),
            collections: self.table_view(
                dataset,
                &collections,
                &self.config.dashboard.collections_groups,
            ),
        }
    }

    /// Agent page: own sales with totals per day. `None` without a user.
    pub fn agent_view(&self, dataset: &Dataset, session: &Session) -> Option<TableView> {
        let selection = session.own_selection()?;
        let own = self.filtered(dataset, TableKind::Sales, &selection);
        Some(self.table_view(dataset, &own, &[GroupBy::Day]))
    }

    /// Sales map for one country over the geocoded sales table.
    pub fn sales_map<S: GeocodeService + ?Sized>(
        &self,
        workspace: &Workspace,
        country: Selection,
        service: &S,
    ) -> MapView {
        let geocoded = workspace.geocoded_sales(service);
        let rows = geocoded.with_rows(
            geocoded
                .rows
                .iter()
                .filter(|t| country.matches(t.country.as_deref()))
                .cloned()
                .collect(),
        );
        let mut points = map_points(&rows);
        let center = map_center(&points);
        points.truncate(self.config.dashboard.map_top_cities);
        MapView {
            country,
            points,
            center,
            rows,
        }
    }
}
