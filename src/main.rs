//! # DocuChat management CLI (`docuchat`)
//!
//! Database lifecycle commands for the DocuChat API, plus the HTTP server.
//!
//! ## Usage
//!
//! ```bash
//! docuchat --config ./config/docuchat.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docuchat db init` | Set up migrations, create the schema, seed, verify health |
//! | `docuchat db migrate -m "<msg>"` | Create a new empty migration |
//! | `docuchat db upgrade [REV]` | Apply migrations up to `REV` (default `head`) |
//! | `docuchat db downgrade <REV>` | Revert to `REV` (`-1`, `base`, or a revision) |
//! | `docuchat db status` | Health, tables, and migration state |
//! | `docuchat db history` | List all revisions |
//! | `docuchat db reset --confirm` | Drop, recreate and reseed every table |
//! | `docuchat db health` | Run the health checks |
//! | `docuchat db seed` | Insert baseline plans and the test user |
//! | `docuchat serve` | Start the HTTP server |
//!
//! Every `db` command closes its connections before exiting, and exits with
//! status 1 on failure.

use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use docuchat_api::config::{self, LoggingConfig};
use docuchat_api::error::{DbError, DbResult, ErrorCode};
use docuchat_api::health::HealthReport;
use docuchat_api::logging;
use docuchat_api::migrate::MigrationRecord;
use docuchat_api::orchestrator::{
    DatabaseSetupOrchestrator, ResetConfirmation, StatusReport, RESET_PHRASE,
};
use docuchat_api::seed::SeedOutcome;
use docuchat_api::server;

/// DocuChat API management CLI.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/docuchat.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "docuchat",
    about = "DocuChat API management CLI: database setup, migrations and server",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/docuchat.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Database operations.
    Db {
        #[command(subcommand)]
        action: DbAction,
    },

    /// Start the HTTP server.
    ///
    /// Sets up the database on startup and shuts it down on ctrl-c.
    Serve,
}

#[derive(Subcommand)]
enum DbAction {
    /// Initialize the database with migrations.
    ///
    /// Idempotent: running it again only applies what is missing.
    Init {
        /// Skip seeding plans and the test user.
        #[arg(long)]
        no_seed: bool,
    },

    /// Create a new migration.
    Migrate {
        /// Migration message.
        #[arg(short, long)]
        message: String,
    },

    /// Upgrade the database to a revision.
    Upgrade {
        /// Target revision, or `head`.
        #[arg(default_value = "head")]
        revision: String,
    },

    /// Downgrade the database to a revision.
    Downgrade {
        /// Target revision, `-1` for the previous one, or `base`.
        #[arg(allow_hyphen_values = true)]
        revision: String,
    },

    /// Show current migration status.
    Status,

    /// Show migration history.
    History,

    /// Reset the database. DESTROYS ALL DATA.
    ///
    /// Requires `--confirm` and typing the confirmation phrase.
    Reset {
        #[arg(long)]
        confirm: bool,
    },

    /// Check database health.
    Health {
        /// Print the report as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Seed the database with initial data.
    Seed {
        /// Skip seeding plans.
        #[arg(long)]
        skip_plans: bool,

        /// Skip creating the test user.
        #[arg(long)]
        skip_users: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let cfg = match config::load_config(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            logging::init(&LoggingConfig::default(), false);
            tracing::error!(code = %ErrorCode::Config, "Failed to load configuration: {:#}", e);
            return ExitCode::FAILURE;
        }
    };
    logging::init(&cfg.logging, cfg.db.echo);

    match cli.command {
        Commands::Db { action } => {
            let mut orchestrator = DatabaseSetupOrchestrator::new(&cfg);
            let result = run_db(&mut orchestrator, action).await;
            orchestrator.cleanup().await;

            match result {
                Ok(()) => ExitCode::SUCCESS,
                Err(e) => {
                    report_error(&e);
                    ExitCode::FAILURE
                }
            }
        }
        Commands::Serve => match server::run_server(&cfg).await {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                match e.downcast_ref::<DbError>() {
                    Some(db) => report_error(db),
                    None => tracing::error!("Server failed: {:#}", e),
                }
                ExitCode::FAILURE
            }
        },
    }
}

async fn run_db(orchestrator: &mut DatabaseSetupOrchestrator, action: DbAction) -> DbResult<()> {
    match action {
        DbAction::Init { no_seed } => {
            tracing::info!("Starting database initialization...");
            let report = orchestrator.init(!no_seed).await?;
            println!("Database initialization complete.");
            print_health(&report);
        }
        DbAction::Migrate { message } => {
            let rev = orchestrator.create_migration(&message).await?;
            println!("Migration created with revision ID: {}", rev);
        }
        DbAction::Upgrade { revision } => {
            tracing::info!("Upgrading database to revision: {}", revision);
            let applied = orchestrator.upgrade(&revision).await?;
            println!(
                "Database upgraded to {} ({} revision(s) applied).",
                revision,
                applied.len()
            );
        }
        DbAction::Downgrade { revision } => {
            tracing::warn!("Downgrading database to revision: {}", revision);
            let reverted = orchestrator.downgrade(&revision).await?;
            println!(
                "Database downgraded to {} ({} revision(s) reverted).",
                revision,
                reverted.len()
            );
        }
        DbAction::Status => {
            let report = orchestrator.status().await;
            print_status(&report);
        }
        DbAction::History => {
            let (history, current) = orchestrator.history().await?;
            print_history(&history, current);
        }
        DbAction::Reset { confirm } => {
            let confirmation = prompt_reset(confirm)?;
            if orchestrator.reset_database(confirmation).await? {
                println!("Database reset completed.");
            } else {
                println!("Reset cancelled.");
            }
        }
        DbAction::Health { json } => {
            let report = orchestrator.health().await;
            if json {
                let rendered = serde_json::to_string_pretty(&report).map_err(|e| {
                    DbError::new(ErrorCode::HealthCheckFailed, "Failed to render health report")
                        .with_source(e)
                })?;
                println!("{}", rendered);
            } else {
                print_health(&report);
            }
            if !report.healthy {
                return Err(DbError::new(
                    ErrorCode::HealthCheckFailed,
                    "Database is unhealthy",
                )
                .with_details(report.errors.join("; ")));
            }
        }
        DbAction::Seed {
            skip_plans,
            skip_users,
        } => {
            tracing::info!("Seeding database with initial data...");
            for (name, outcome) in orchestrator.seed(skip_plans, skip_users).await? {
                match outcome {
                    SeedOutcome::Inserted(n) => println!("{:<10} inserted {}", name, n),
                    SeedOutcome::Skipped => println!("{:<10} already present", name),
                }
            }
            println!("Database seeding completed.");
        }
    }
    Ok(())
}

fn prompt_reset(confirm: bool) -> DbResult<ResetConfirmation> {
    if confirm {
        eprintln!("DANGEROUS OPERATION: this will delete ALL data!");
        print!("Type '{}' to confirm: ", RESET_PHRASE);
        // Prompt must be visible before blocking on stdin.
        if let Err(e) = std::io::stdout().flush() {
            tracing::debug!("Failed to flush reset prompt: {}", e);
        }
    }
    ResetConfirmation::from_input(confirm, std::io::stdin().lock()).map_err(|e| {
        DbError::new(ErrorCode::ResetFailed, "Failed to read confirmation").with_source(e)
    })
}

fn report_error(err: &DbError) {
    tracing::error!(code = %err.code, "Database operation failed: {}", err.message);
    if let Some(details) = &err.details {
        tracing::error!("Details: {}", details);
    }
    if let Some(trace) = &err.trace {
        tracing::debug!("Trace: {}", trace);
    }
}

fn print_status(report: &StatusReport) {
    println!("=== Database Status ===");
    println!(
        "Database Health:  {}",
        if report.healthy { "✓ Healthy" } else { "✗ Unhealthy" }
    );
    println!("Database URL:     {}", report.database_url);
    if report.tables.is_empty() {
        println!("Existing Tables:  None");
    } else {
        println!("Existing Tables:  {}", report.tables.join(", "));
    }

    println!();
    println!("=== Migration Status ===");
    match report.current_revision {
        Some(rev) => println!("Current Revision: {}", rev),
        None => println!("Current Revision: None (no migrations applied)"),
    }
    match report.head_revision {
        Some(rev) => println!("Head Revision:    {}", rev),
        None => println!("Head Revision:    None"),
    }
    println!(
        "Pending:          {}",
        if report.has_pending_migrations { "Yes" } else { "No" }
    );
    if !report.recent_migrations.is_empty() {
        println!("Recent Migrations:");
        for m in &report.recent_migrations {
            let mark = if Some(m.revision) == report.current_revision { "✓" } else { " " };
            println!("  {} {}: {}", mark, m.revision, m.message);
        }
    }
    println!("Migrations Path:  {}", report.migrations_path.display());

    if !report.errors.is_empty() {
        println!();
        println!("Errors:");
        for e in &report.errors {
            println!("  - {}", e);
        }
    }
}

fn print_history(history: &[MigrationRecord], current: Option<i64>) {
    if history.is_empty() {
        println!("No migrations found.");
        return;
    }

    println!("Migration History:");
    for m in history {
        let mark = if Some(m.revision) == current { "✓" } else { " " };
        let revises = m
            .down_revision
            .map(|r| r.to_string())
            .unwrap_or_else(|| "base".to_string());
        let reversible = if m.reversible { "" } else { " [irreversible]" };
        println!(
            "  {} {} -> {}: {}{}",
            mark, revises, m.revision, m.message, reversible
        );
    }
}

fn print_health(report: &HealthReport) {
    println!(
        "Database Health: {}",
        if report.healthy { "✅ Healthy" } else { "❌ Unhealthy" }
    );

    println!("Checks:");
    let checks = [
        ("connectivity", report.checks.connectivity),
        ("tables_exist", report.checks.tables_exist),
        ("migrations_current", report.checks.migrations_current),
    ];
    for (name, ok) in checks {
        println!("  {} {:<20} {}", if ok { "✅" } else { "❌" }, name, ok);
    }

    if let Ok(serde_json::Value::Object(metrics)) = serde_json::to_value(&report.metrics) {
        println!("Metrics:");
        for (name, value) in metrics {
            if !value.is_null() {
                println!("  {:<24} {}", name, value);
            }
        }
    }

    if !report.errors.is_empty() {
        println!("Errors:");
        for e in &report.errors {
            println!("  - {}", e);
        }
    }
}
