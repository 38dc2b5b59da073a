//! Operator command surface for the hunt store.
//!
//! - [`run_cli`] executes a parsed [`Cli`].
//! - [`run_command`] executes a [`Command`] against an open [`SqliteHuntStore`].
//!
//! Every command prepares the schema first; only `init` writes rows.

use std::path::PathBuf;

use anyhow::{anyhow, Result};
use clap::{Args, Parser, Subcommand};
use threat_hunt_core::{Dashboard, DashboardSummary, HuntView};
use threat_hunt_store_sqlite::{seed_if_empty, SqliteHuntStore};

#[derive(Debug, Parser)]
#[command(name = "hunts")]
#[command(about = "Threat hunt store CLI")]
pub struct Cli {
    #[arg(long, default_value = "./acthp.db")]
    db: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Create the schema and write the example hunts into an empty store.
    Init,
    /// List every hunt, most recent first.
    List(ListArgs),
    /// Print status and severity totals.
    Summary(SummaryArgs),
}

#[derive(Debug, Args)]
pub struct ListArgs {
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
pub struct SummaryArgs {
    #[arg(long)]
    json: bool,
}

/// Executes the parsed top-level CLI command.
///
/// # Errors
/// Returns an error when the store cannot be opened or the command fails.
pub fn run_cli(cli: Cli) -> Result<()> {
    let mut store = SqliteHuntStore::open(&cli.db)?;
    run_command(cli.command, &mut store)
}

/// Executes a command against an existing store handle.
///
/// # Errors
/// Returns an error when schema setup, seeding, or reads fail.
pub fn run_command(command: Command, store: &mut SqliteHuntStore) -> Result<()> {
    match command {
        Command::Init => {
            let report = seed_if_empty(store)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Command::List(args) => {
            store.ensure_schema()?;
            let dashboard = load_dashboard(store)?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&dashboard.hunts)?);
            } else {
                print_hunt_table(&dashboard.hunts);
            }
            Ok(())
        }
        Command::Summary(args) => {
            store.ensure_schema()?;
            let dashboard = load_dashboard(store)?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&dashboard.summary)?);
            } else {
                print_summary(&dashboard.summary);
            }
            Ok(())
        }
    }
}

/// Loads and aggregates every hunt.
///
/// # Errors
/// Returns an error when the listing fails or a row cannot be serialized.
pub fn load_dashboard(store: &SqliteHuntStore) -> Result<Dashboard> {
    let records = store.list_all()?;
    Dashboard::from_records(&records).map_err(|err| anyhow!(err.to_string()))
}

fn print_hunt_table(hunts: &[HuntView]) {
    println!(
        "{:<5} {:<36} {:<9} {:<9} {:<14} {:<6} tags",
        "id", "name", "source", "severity", "status", "score"
    );
    println!("{}", "-".repeat(110));
    for hunt in hunts {
        println!(
            "{:<5} {:<36} {:<9} {:<9} {:<14} {:<6} {}",
            hunt.id,
            hunt.name,
            hunt.datasource,
            hunt.severity,
            hunt.status,
            hunt.ai_score
                .map_or_else(|| "n/a".to_string(), |score| format!("{score:.2}")),
            hunt.tags.join(",")
        );
    }
}

fn print_summary(summary: &DashboardSummary) {
    println!(
        "total={} open={} investigating={} closed={}",
        summary.total_hunts,
        summary.open_hunts,
        summary.investigating_hunts,
        summary.closed_hunts
    );
    let severities = summary
        .severity_counts
        .iter()
        .map(|(severity, count)| format!("{severity}={count}"))
        .collect::<Vec<_>>()
        .join(" ");
    println!("severity {severities}");
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;
    use std::path::Path;
    use ulid::Ulid;

    fn must<T>(result: Result<T>) -> T {
        match result {
            Ok(value) => value,
            Err(err) => panic!("test failure: {err:#}"),
        }
    }

    fn execute_cli(args: &[&str]) -> Result<()> {
        let cli = Cli::try_parse_from(args)?;
        run_cli(cli)
    }

    fn temp_db_path(label: &str) -> PathBuf {
        std::env::temp_dir().join(format!("threat-hunt-cli-{label}-{}.sqlite3", Ulid::new()))
    }

    fn cleanup(db_path: &Path) {
        let _ = std::fs::remove_file(db_path);
        let _ = std::fs::remove_file(db_path.with_extension("sqlite3-wal"));
        let _ = std::fs::remove_file(db_path.with_extension("sqlite3-shm"));
    }

    #[test]
    fn init_then_summary_matches_seed_catalogue() {
        let db_path = temp_db_path("summary");
        let db = db_path.to_string_lossy().to_string();

        must(execute_cli(&["hunts", "--db", &db, "init"]));
        must(execute_cli(&["hunts", "--db", &db, "summary", "--json"]));
        must(execute_cli(&["hunts", "--db", &db, "list"]));

        let store = must(SqliteHuntStore::open(&db_path));
        let summary = must(load_dashboard(&store)).summary;
        assert_eq!(summary.total_hunts, 4);
        assert_eq!(summary.open_hunts, 2);
        assert_eq!(summary.investigating_hunts, 1);
        assert_eq!(summary.closed_hunts, 1);
        assert_eq!(summary.severity_counts.get("critical"), 1);
        assert_eq!(summary.severity_counts.get("high"), 2);
        assert_eq!(summary.severity_counts.get("medium"), 1);
        assert_eq!(summary.severity_counts.get("low"), 0);

        drop(store);
        cleanup(&db_path);
    }

    #[test]
    fn list_on_fresh_database_is_empty_and_does_not_seed() {
        let db_path = temp_db_path("fresh");
        let db = db_path.to_string_lossy().to_string();

        must(execute_cli(&["hunts", "--db", &db, "list", "--json"]));

        let store = must(SqliteHuntStore::open(&db_path));
        assert_eq!(must(store.count()), 0);

        drop(store);
        cleanup(&db_path);
    }

    #[test]
    fn repeated_init_keeps_a_single_catalogue() {
        let db_path = temp_db_path("repeat");
        let db = db_path.to_string_lossy().to_string();

        must(execute_cli(&["hunts", "--db", &db, "init"]));
        must(execute_cli(&["hunts", "--db", &db, "init"]));

        let store = must(SqliteHuntStore::open(&db_path));
        assert_eq!(must(store.count()), 4);

        drop(store);
        cleanup(&db_path);
    }

    #[test]
    fn init_respects_rows_written_by_other_tools() {
        let db_path = temp_db_path("foreign");
        {
            let store = must(SqliteHuntStore::open(&db_path));
            must(store.ensure_schema());
        }
        {
            let conn = match Connection::open(&db_path) {
                Ok(conn) => conn,
                Err(err) => panic!("failed to open setup db: {err}"),
            };
            if let Err(err) = conn.execute(
                "INSERT INTO hunts(name, query_str, severity, status) VALUES ('Manual', 'q', 'informational', 'parked')",
                [],
            ) {
                panic!("failed to insert foreign row: {err}");
            }
        }

        let db = db_path.to_string_lossy().to_string();
        must(execute_cli(&["hunts", "--db", &db, "init"]));

        let store = must(SqliteHuntStore::open(&db_path));
        let summary = must(load_dashboard(&store)).summary;
        assert_eq!(summary.total_hunts, 1);
        assert_eq!(summary.open_hunts + summary.investigating_hunts + summary.closed_hunts, 0);
        assert_eq!(summary.severity_counts.get("informational"), 1);
        assert_eq!(summary.severity_counts.total(), 1);

        drop(store);
        cleanup(&db_path);
    }

    #[test]
    fn unknown_subcommand_is_rejected() {
        let parsed = Cli::try_parse_from(["hunts", "create", "--name", "x"]);
        assert!(parsed.is_err());
    }
}
