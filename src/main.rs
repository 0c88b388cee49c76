// Entry point and interactive console flow.
//
// - [1] loads and normalizes the configured source (cached per source).
// - [2] logs in against the database credential table; agents only ever see
//   their own sales.
// - [3]..[7] render the dashboard pages and export their tables.
// - [8] changes the session period used by every page.
mod aggregate;
mod auth;
mod config;
mod error;
mod filter;
mod geocode;
mod loader;
mod normalize;
mod output;
mod pipeline;
mod types;
mod util;

use chrono::NaiveDate;
use std::io::{self, Write};
use std::path::Path;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

use aggregate::{headcount, GroupBy};
use config::{Config, SourceKind};
use filter::{FilterSelection, Selection};
use pipeline::{Pipeline, Session, Workspace};
use types::{HeadcountRow, TableKind};

struct AppState {
    pipeline: Pipeline,
    loaded: Option<(Workspace, Session)>,
}

fn prompt(label: &str) -> String {
    print!("{}", label);
    let _ = io::stdout().flush();
    let mut buf = String::new();
    io::stdin().read_line(&mut buf).ok();
    buf.trim().to_string()
}

/// Read a single line of input after printing the common "Enter choice:" prompt.
fn read_choice() -> String {
    prompt("Enter choice: ")
}

/// Show the available values and read one; blank or "all" means no restriction.
fn prompt_selection(label: &str, options: &[String]) -> Selection {
    if options.is_empty() {
        return Selection::All;
    }
    println!("{} options: {}", label, options.join(", "));
    Selection::parse(&prompt(&format!("{} (blank = all): ", label)))
}

fn prompt_date(label: &str, current: NaiveDate) -> NaiveDate {
    loop {
        let input = prompt(&format!("{} [{}]: ", label, current));
        if input.is_empty() {
            return current;
        }
        match util::parse_date_safe(Some(&input)) {
            Some(d) => return d,
            None => println!("Invalid date. Use YYYY-MM-DD or DD/MM/YYYY."),
        }
    }
}

fn manager_selection(workspace: &Workspace, session: &Session, kind: TableKind) -> FilterSelection {
    let data = &workspace.dataset;
    session.selection(
        prompt_selection(
            &format!("{} country", kind.label()),
            &filter::country_options(data.table(kind)),
        ),
        prompt_selection("Team", &filter::team_options(&data.roster)),
        prompt_selection("Department", &filter::department_options(&data.roster)),
        prompt_selection("Activity", &filter::activity_options(&data.roster)),
    )
}

fn export_csv<T: serde::Serialize>(config: &Config, file: &str, rows: &[T]) {
    let path = config.output.export_path(file);
    match output::write_csv(&path, rows) {
        Ok(()) => println!("(Full table exported to {})", path.display()),
        Err(e) => eprintln!("Write error: {}", e),
    }
}

/// Handle option [1]: load and normalize the configured source.
fn handle_load(state: &mut AppState) {
    let outcome = state.pipeline.load();
    if let Some(e) = &outcome.error {
        eprintln!("Failed to load data: {}\n", e);
    }
    let ws = outcome.workspace;
    let data = &ws.dataset;
    println!(
        "Processing dataset... ({} sales, {} collections, {} staff)",
        util::format_int(data.sales.len()),
        util::format_int(data.collections.len()),
        util::format_int(data.roster.len())
    );
    if ws.report.unparsed_dates > 0 || ws.report.zeroed_amounts > 0 {
        println!(
            "Note: {} unparseable dates, {} amounts counted as zero.",
            util::format_int(ws.report.unparsed_dates),
            util::format_int(ws.report.zeroed_amounts)
        );
    }
    let previous = state.loaded.take().map(|(_, session)| session);
    let session = state.pipeline.session(data, previous);
    println!("Period: {} to {}\n", session.date_start, session.date_end);
    if session.needs_login() {
        println!("Please log in to access the dashboard (option 2).\n");
    }
    state.loaded = Some((ws, session));
}

/// Handle option [2]: credential check against the database.
fn handle_login(state: &mut AppState) {
    let config = &state.pipeline.config;
    if config.source.kind != SourceKind::Database {
        println!("Login is only available with a database source.\n");
        return;
    }
    let Some((_, session)) = state.loaded.as_mut() else {
        println!("Error: No data loaded. Please load the data first (option 1).\n");
        return;
    };
    let user_name = prompt("User name: ");
    let password = prompt("Password: ");
    let user = match loader::open_database(Path::new(&config.source.path)) {
        Ok(conn) => auth::login(&conn, &config.source, &config.columns.staff, &user_name, &password),
        Err(e) => {
            error!("Authentication backend unavailable: {}", e);
            None
        }
    };
    match session.sign_in(user) {
        Some(user) => {
            println!("Welcome {}", user.user_name);
            if let Some(d) = user.hire_date {
                println!("Your start date: {}", d.format("%d/%m/%Y"));
            }
            if !user.is_manager() {
                println!("You have limited access to the application.");
            }
            println!();
        }
        None => println!("Invalid credentials\n"),
    }
}

/// Handle option [3]: manager dashboard, or the agent's own performance page.
fn handle_dashboard(state: &AppState, workspace: &Workspace, session: &Session) {
    let config = &state.pipeline.config;
    let rows = config.output.preview_rows;

    if !session.is_manager() {
        let Some(view) = state.pipeline.agent_view(&workspace.dataset, session) else {
            return;
        };
        output::print_table_view("Your performance", &view, rows);
        for (by, groups) in &view.groups {
            export_csv(config, &output::export_name("my_sales", *by), &output::group_rows(groups));
        }
        return;
    }

    let sales = manager_selection(workspace, session, TableKind::Sales);
    let collections = FilterSelection {
        country: prompt_selection(
            &format!("{} country", TableKind::Collections.label()),
            &filter::country_options(&workspace.dataset.collections),
        ),
        ..sales.clone()
    };
    let view = state.pipeline.dashboard(&workspace.dataset, &sales, &collections);
    println!();
    output::print_table_view("Sales analysis", &view.sales, rows);
    output::print_table_view("Collections analysis", &view.collections, rows);

    for (prefix, table_view) in [("sales", &view.sales), ("collections", &view.collections)] {
        for (by, groups) in &table_view.groups {
            export_csv(config, &output::export_name(prefix, *by), &output::group_rows(groups));
        }
    }
    let summary = [&view.sales.metrics, &view.collections.metrics];
    let path = config.output.export_path("summary.json");
    if let Err(e) = output::write_json(&path, &summary) {
        eprintln!("Write error: {}", e);
    }
    println!("Summary saved to {}\n", path.display());
}

/// Handle options [4] and [5]: filtered detail table.
fn handle_detail(state: &AppState, workspace: &Workspace, session: &Session, kind: TableKind) {
    let config = &state.pipeline.config;
    let selection = if session.is_manager() {
        manager_selection(workspace, session, kind)
    } else {
        match session.own_selection() {
            Some(s) => s,
            None => return,
        }
    };
    let filtered = state.pipeline.filtered(&workspace.dataset, kind, &selection);
    if filtered.is_empty() {
        println!("\nNo {} rows match the selection.\n", kind.label().to_lowercase());
        return;
    }
    println!("\n{} detail ({} rows)", kind.label(), util::format_int(filtered.len()));
    let rows = output::transaction_rows(&filtered);
    output::preview_table_rows(&rows, config.output.preview_rows);
    export_csv(config, &format!("{}_detail.csv", kind.label().to_lowercase()), &rows);
    println!();
}

/// Handle option [6]: geocode sales and show the per-city map data.
fn handle_map(state: &AppState, workspace: &Workspace, session: &Session) {
    if !session.is_manager() {
        println!("The sales map is only available to managers.\n");
        return;
    }
    let config = &state.pipeline.config;
    let countries = filter::country_options(&workspace.dataset.sales);
    let Some(first) = countries.first() else {
        println!("No sales data to map.\n");
        return;
    };
    println!("Country options: {}", countries.join(", "));
    let input = prompt(&format!("Select country [{}]: ", first));
    let country = if input.is_empty() {
        Selection::only(first)
    } else {
        Selection::only(&input)
    };

    let service = match geocode::service_from_config(&config.geocoder) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Geocoder unavailable: {}\n", e);
            return;
        }
    };
    println!("Geocoding cities... This may take a while for large datasets");
    let view = state.pipeline.sales_map(workspace, country, &service);
    output::print_map_view(&view, config.output.preview_rows);

    let detail = output::transaction_rows(&output::by_amount_desc(&view.rows));
    println!("Detailed sales data");
    output::preview_table_rows(&detail, config.output.preview_rows);
    let points: Vec<types::MapPointRow> = view.points.iter().map(types::MapPointRow::from).collect();
    export_csv(config, "sales_map.csv", &points);
    println!();
}

/// Handle option [7]: staff counts per department and team.
fn handle_staff(state: &AppState, workspace: &Workspace, session: &Session) {
    if !session.is_manager() {
        println!("The staff breakdown is only available to managers.\n");
        return;
    }
    let roster = &workspace.dataset.roster;
    if roster.is_empty() {
        warn!("Staff table is empty");
        println!("No staff data.\n");
        return;
    }
    for by in [GroupBy::Department, GroupBy::Team] {
        let rows: Vec<HeadcountRow> = headcount(roster, by);
        println!("Staff by {}", by.label());
        output::preview_table_rows(&rows, state.pipeline.config.output.preview_rows);
    }
}

/// Handle option [8]: change the session period.
fn handle_period(session: &mut Session) {
    let start = prompt_date("Start date", session.date_start);
    let end = prompt_date("End date", session.date_end);
    if start > end {
        println!("Start date is after end date; period unchanged.\n");
        return;
    }
    session.date_start = start;
    session.date_end = end;
    println!("Period: {} to {}\n", start, end);
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    let config = match config::load_config() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to read configuration: {}", e);
            std::process::exit(1);
        }
    };
    let mut state = AppState {
        pipeline: Pipeline::new(config),
        loaded: None,
    };

    loop {
        println!("Global Sales Dashboard");
        println!("[1] Load data");
        println!("[2] Log in");
        println!("[3] Dashboard");
        println!("[4] Sales detail");
        println!("[5] Collections detail");
        println!("[6] Sales map");
        println!("[7] Staff breakdown");
        println!("[8] Set period");
        println!("[0] Exit\n");
        let choice = read_choice();
        match choice.as_str() {
            "0" => {
                println!("Exiting the program.");
                break;
            }
            "1" => handle_load(&mut state),
            "2" => handle_login(&mut state),
            "3" | "4" | "5" | "6" | "7" | "8" => {
                let Some((workspace, mut session)) = state.loaded.take() else {
                    println!("Error: No data loaded. Please load the data first (option 1).\n");
                    continue;
                };
                if session.needs_login() && choice != "8" {
                    println!("Please log in first (option 2).\n");
                    state.loaded = Some((workspace, session));
                    continue;
                }
                match choice.as_str() {
                    "3" => handle_dashboard(&state, &workspace, &session),
                    "4" => handle_detail(&state, &workspace, &session, TableKind::Sales),
                    "5" => handle_detail(&state, &workspace, &session, TableKind::Collections),
                    "6" => handle_map(&state, &workspace, &session),
                    "7" => handle_staff(&state, &workspace, &session),
                    _ => handle_period(&mut session),
                }
                state.loaded = Some((workspace, session));
            }
            _ => println!("Invalid choice. Please enter a number from 0 to 8.\n"),
        }
    }
}
