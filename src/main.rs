//! Graphkeeper CLI - schema reconciliation and maintenance for a graph store directory

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use graphkeeper::backup::{list_backups, BackupCoordinator, BackupTrigger};
use graphkeeper::config::{default_config_path, load_config, write_config};
use graphkeeper::recovery::{read_incidents, IncidentLog, ProcessLock};
use graphkeeper::schema::LiveSchemaSnapshot;
use graphkeeper::startup::{self, StartupReport};
use graphkeeper::storage::GraphStore;
use graphkeeper::ui::{self, Icons};
use graphkeeper::{Config, ConnectionManager, SchemaDescriptor};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "graphkeeper")]
#[command(version)]
#[command(about = "Schema reconciliation and safe access for a single-writer graph store")]
#[command(long_about = r#"
Graphkeeper keeps an embedded graph database in step with a declarative
schema descriptor. Changes are strictly additive: tables, columns and
relationship tables are created, never dropped, renamed or retyped.

Example usage:
  graphkeeper plan
  graphkeeper reconcile
  graphkeeper inspect
  graphkeeper backups
"#)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to the config file (defaults to graphkeeper.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the startup reconciliation sequence
    Reconcile {
        /// Inspect the live schema even if the descriptor is unchanged
        #[arg(short, long)]
        force: bool,

        /// Do not take a pre-migration backup
        #[arg(long)]
        skip_backup: bool,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the operations reconciliation would apply
    Plan,

    /// Show the live schema
    Inspect,

    /// Take a manual backup of the database directory
    Backup,

    /// List backup archives, newest first
    Backups,

    /// Show the recovery incident log
    Incidents,

    /// Show the effective configuration, or write it to the config file
    Config {
        /// Write the effective configuration to the config file
        #[arg(short, long)]
        write: bool,

        /// Overwrite an existing config file
        #[arg(short, long)]
        force: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    if let Err(e) = run(cli) {
        let fatal = e
            .downcast_ref::<graphkeeper::Error>()
            .is_some_and(graphkeeper::Error::is_fatal);
        ui::error(&format!("{:#}", e));
        std::process::exit(if fatal { 2 } else { 1 });
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Reconcile {
            force,
            skip_backup,
            json,
        } => {
            config.force_reconcile |= force;
            config.skip_backup |= skip_backup;
            let manager = ConnectionManager::new(config)?;
            let report = manager.initialize()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_report(&report);
            }
        }

        Commands::Plan => {
            config.validate()?;
            let descriptor = SchemaDescriptor::load(&config.schema)?;
            let diff = if GraphStore::exists(&config.database) {
                let _lock = exclusive(&config)?;
                let store = GraphStore::open(&config.database)?;
                let (_, diff) = startup::plan(&descriptor, &store, config.scope())?;
                store.close()?;
                diff
            } else {
                ui::warn(&format!(
                    "No database at {}; planning against an empty one",
                    config.database.display()
                ));
                let store = GraphStore::open_in_memory()?;
                startup::plan(&descriptor, &store, config.scope())?.1
            };

            ui::header(&format!("Plan for {}", config.database.display()));
            ui::info("Descriptor version", &descriptor.version.to_string());
            ui::info("Content hash", &descriptor.content_hash());
            ui::info("Scope", &config.scope().to_string());
            if diff.is_empty() {
                ui::success("Schema already current");
            } else {
                ui::section(&format!(" {} operations ", diff.len()));
                for op in diff.operations() {
                    ui::op_pending(&op.describe());
                }
            }
        }

        Commands::Inspect => {
            if !GraphStore::exists(&config.database) {
                ui::warn(&format!("No database at {}", config.database.display()));
                return Ok(());
            }
            let _lock = exclusive(&config)?;
            let store = GraphStore::open(&config.database)?;
            let live = LiveSchemaSnapshot::introspect(store.conn())?;
            let state = store.load_state()?;
            store.close()?;

            ui::header(&format!("Live schema of {}", config.database.display()));
            match state {
                Some(state) => {
                    ui::status(Icons::HASH, "Reconciled version", &state.version.to_string());
                    ui::status(Icons::HASH, "Content hash", &state.content_hash);
                    ui::status(Icons::CLOCK, "Reconciled at", &state.reconciled_at);
                }
                None => println!("{}", ui::muted("never reconciled")),
            }
            ui::summary_row("entity tables", &live.entity_tables.len().to_string());
            ui::summary_row("relationship tables", &live.relationship_tables.len().to_string());
            let table = ui::columns_table(&live);
            if !table.is_empty() {
                println!("{}", table);
            }
        }

        Commands::Backup => {
            let _lock = exclusive(&config)?;
            let coordinator = BackupCoordinator::from_config(&config);
            let record = coordinator.snapshot(&config.database, BackupTrigger::Manual)?;
            ui::success(&format!("Backup created: {}", record.archive_path.display()));
            ui::summary_row("size", &ui::human_bytes(record.size_bytes));
            ui::summary_row("id", &record.id.to_string());
        }

        Commands::Backups => {
            let records = list_backups(&config.backup_dir)?;
            ui::header(&format!("Backups in {}", config.backup_dir.display()));
            if records.is_empty() {
                println!("{}", ui::muted("no backups"));
            } else {
                println!("{}", ui::backups_table(&records));
            }
        }

        Commands::Incidents => {
            let path = config.incident_log_path();
            let incidents = read_incidents(&path)?;
            ui::header(&format!("Incidents in {}", path.display()));
            if incidents.is_empty() {
                ui::success("No incidents recorded");
            } else {
                println!("{}", ui::incidents_table(&incidents));
            }
        }

        Commands::Config { write, force } => {
            if write {
                let path = cli.config.unwrap_or_else(default_config_path);
                write_config(&path, &config, force)?;
                ui::success(&format!("Wrote {}", path.display()));
            } else {
                print!("{}", toml::to_string_pretty(&config)?);
            }
        }
    }

    Ok(())
}

/// Hold the process lock for commands that touch the database outside a manager
fn exclusive(config: &Config) -> graphkeeper::Result<ProcessLock> {
    let path = config.lock_file_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    ProcessLock::acquire(&path, &IncidentLog::new(config.incident_log_path()))
}

fn print_report(report: &StartupReport) {
    ui::header("Schema reconciliation");
    ui::info("Descriptor version", &report.schema_version.to_string());
    ui::info("Content hash", &report.content_hash);

    if let Some(outcome) = &report.recovery {
        ui::warn(&format!("{} Database recovered: {}", Icons::SIREN, outcome));
    }

    for op in &report.operations {
        ui::op_pending(op);
    }
    for op in &report.present_operations {
        ui::op_present(op);
    }

    let backup = report
        .backup
        .as_ref()
        .map(|b| b.archive_path.display().to_string())
        .unwrap_or_else(|| "none".to_string());
    println!(
        "{}",
        ui::stats_table(&[
            ("status", report.status.as_str()),
            ("scope", &report.scope.to_string()),
            ("applied", &report.applied.to_string()),
            ("already present", &report.already_present.to_string()),
            ("backup", &backup),
        ])
    );

    match report.status {
        graphkeeper::startup::ReconcileStatus::Disabled => {
            ui::warn("Reconciliation is disabled by configuration")
        }
        graphkeeper::startup::ReconcileStatus::Reconciled => {
            ui::success(&format!("Reconciled {} changes", report.applied))
        }
        _ => ui::success("Schema already current"),
    }
}
