//! End-to-end database lifecycle: the sequencing behind every `docuchat db`
//! command.
//!
//! `init` runs in a fixed order:
//!
//! ```text
//! migration infra ─▶ connect + tables ─▶ initial migration ─▶ upgrade ─▶ seed ─▶ health
//! ```
//!
//! Every step is idempotent, so `init` can be rerun against a database in
//! any state. [`DatabaseSetupOrchestrator::cleanup`] closes the pool and is
//! always called by the CLI, whether the command succeeded or not.

use serde::Serialize;
use std::io::BufRead;
use std::path::PathBuf;

use crate::config::Config;
use crate::error::{DbError, DbResult, ErrorCode};
use crate::health::{mask_db_url, run_health_check, HealthReport};
use crate::manager::DatabaseManager;
use crate::migrate::{InitialMigration, MigrationManager, MigrationRecord, MigrationSetup};
use crate::seed::SeedOutcome;

/// Phrase a user must type before `db reset` destroys data.
pub const RESET_PHRASE: &str = "DELETE-ALL-DATA";

/// How many revisions `status` lists.
const RECENT_MIGRATIONS: usize = 5;

/// The two-step confirmation guarding `db reset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetConfirmation {
    /// `--confirm` was not passed.
    Missing,
    /// The typed phrase did not match.
    Declined,
    Confirmed,
}

impl ResetConfirmation {
    /// Read the typed phrase from `input`, but only when `flag` is set.
    pub fn from_input<R: BufRead>(flag: bool, mut input: R) -> std::io::Result<Self> {
        if !flag {
            return Ok(Self::Missing);
        }
        let mut line = String::new();
        input.read_line(&mut line)?;
        Ok(Self::from_phrase(&line))
    }

    pub fn from_phrase(typed: &str) -> Self {
        if typed.trim() == RESET_PHRASE {
            Self::Confirmed
        } else {
            Self::Declined
        }
    }
}

/// Snapshot printed by `db status`.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub healthy: bool,
    pub database_url: String,
    pub tables: Vec<String>,
    pub current_revision: Option<i64>,
    pub head_revision: Option<i64>,
    pub has_pending_migrations: bool,
    pub recent_migrations: Vec<MigrationRecord>,
    pub migrations_path: PathBuf,
    pub errors: Vec<String>,
}

pub struct DatabaseSetupOrchestrator {
    manager: DatabaseManager,
    migrations: MigrationManager,
    setup: MigrationSetup,
    database_url: String,
}

impl DatabaseSetupOrchestrator {
    pub fn new(config: &Config) -> Self {
        Self {
            manager: DatabaseManager::new(config),
            migrations: MigrationManager::new(&config.migrations.dir),
            setup: MigrationSetup::new(&config.migrations.dir),
            database_url: config.db.url.clone(),
        }
    }

    pub fn manager(&self) -> &DatabaseManager {
        &self.manager
    }

    pub fn migrations(&self) -> &MigrationManager {
        &self.migrations
    }

    pub fn setup_migrations_infrastructure(&self) -> DbResult<()> {
        tracing::info!("Setting up migration infrastructure...");
        self.setup.setup_migration_infrastructure().inspect_err(|e| {
            tracing::error!("Migration setup failed: {}", e);
        })?;
        tracing::info!("Migration infrastructure setup complete");
        Ok(())
    }

    pub async fn initialize_database(&mut self, with_seed: bool) -> DbResult<()> {
        tracing::info!("Initializing database...");
        self.manager.setup_database(with_seed).await.inspect_err(|e| {
            tracing::error!("Database initialization failed: {}", e);
        })?;
        tracing::info!("Database initialization complete");
        Ok(())
    }

    pub async fn create_initial_migration(&mut self) -> DbResult<InitialMigration> {
        tracing::info!("Creating initial migration...");
        self.ensure_connected().await?;

        let created = self.migrations.create_initial_migration().await?;
        if let InitialMigration::Created(rev) = created {
            tracing::info!(revision = rev, "Initial migration created");
        }
        Ok(created)
    }

    /// Upgrade to head when the database is behind. Returns the applied
    /// revisions, empty when there was nothing to do.
    pub async fn apply_migrations(&mut self) -> DbResult<Vec<i64>> {
        tracing::info!("Applying database migrations...");
        self.ensure_connected().await?;
        let pool = self.manager.engine().pool()?;

        if !self.migrations.check_pending(pool).await? {
            tracing::info!("No pending migrations found");
            return Ok(Vec::new());
        }

        let applied = self.migrations.upgrade(pool, "head").await.inspect_err(|e| {
            tracing::error!("Migration application failed: {}", e);
        })?;
        tracing::info!(count = applied.len(), "Migrations applied successfully");
        Ok(applied)
    }

    /// Full initialization. Seeding runs after the schema is at head, and an
    /// unhealthy final report fails the command.
    pub async fn init(&mut self, with_seed: bool) -> DbResult<HealthReport> {
        self.setup_migrations_infrastructure()?;
        self.initialize_database(false).await?;
        self.create_initial_migration().await?;
        self.apply_migrations().await?;

        if with_seed {
            self.manager
                .seeder()
                .seed_all(self.manager.engine().pool()?)
                .await?;
        }

        let report = self.health().await;
        if !report.healthy {
            return Err(DbError::new(
                ErrorCode::HealthCheckFailed,
                "Database health check failed after initialization",
            )
            .with_details(report.errors.join("; ")));
        }
        Ok(report)
    }

    pub async fn create_migration(&self, message: &str) -> DbResult<i64> {
        tracing::info!("Creating new migration: {}", message);
        self.migrations.create_migration(message).await
    }

    pub async fn upgrade(&mut self, target: &str) -> DbResult<Vec<i64>> {
        self.ensure_connected().await?;
        self.migrations
            .upgrade(self.manager.engine().pool()?, target)
            .await
    }

    pub async fn downgrade(&mut self, target: &str) -> DbResult<Vec<i64>> {
        self.ensure_existing().await?;
        self.migrations
            .downgrade(self.manager.engine().pool()?, target)
            .await
    }

    /// Revisions newest first, paired with the applied revision.
    pub async fn history(&mut self) -> DbResult<(Vec<MigrationRecord>, Option<i64>)> {
        let history = self.migrations.history().await?;
        self.ensure_existing().await?;
        let current = self
            .migrations
            .current_revision(self.manager.engine().pool()?)
            .await?;
        Ok((history, current))
    }

    /// Destroy and rebuild all data. Returns `false` when the user declined.
    pub async fn reset_database(&mut self, confirmation: ResetConfirmation) -> DbResult<bool> {
        match confirmation {
            ResetConfirmation::Missing => Err(DbError::new(
                ErrorCode::NoResetConfirmation,
                "No database reset confirmation provided",
            )
            .with_details("Use: docuchat db reset --confirm")),
            ResetConfirmation::Declined => {
                tracing::info!("Reset cancelled");
                Ok(false)
            }
            ResetConfirmation::Confirmed => {
                tracing::warn!("RESETTING DATABASE - ALL DATA WILL BE LOST");
                self.manager.reset_database(&self.migrations).await?;
                tracing::info!("Database reset complete");
                Ok(true)
            }
        }
    }

    /// Seed selected data sets on an existing schema.
    pub async fn seed(
        &mut self,
        skip_plans: bool,
        skip_users: bool,
    ) -> DbResult<Vec<(String, SeedOutcome)>> {
        self.ensure_connected().await?;
        let pool = self.manager.engine().pool()?;
        let seeder = self.manager.seeder();
        let mut outcomes = Vec::new();

        if !skip_plans {
            tracing::info!("Seeding subscription plans...");
            outcomes.push(("plans".to_string(), seeder.seed_plans(pool).await?));
        }
        if !skip_users {
            tracing::info!("Creating test user...");
            outcomes.push(("test_user".to_string(), seeder.create_test_user(pool).await?));
        }
        Ok(outcomes)
    }

    /// Health report. A database that cannot be reached, or does not exist
    /// yet, yields an unhealthy report rather than an error. Nothing is
    /// created on disk.
    pub async fn health(&mut self) -> HealthReport {
        if let Err(e) = self.ensure_existing().await {
            tracing::error!(code = %e.code, "Database connection failed: {}", e);
        }
        run_health_check(self.manager.engine(), &self.migrations).await
    }

    /// Never fails: each section that cannot be read is noted in `errors`.
    pub async fn status(&mut self) -> StatusReport {
        let health = self.health().await;
        let mut errors = health.errors;

        let recent_migrations = match self.migrations.history().await {
            Ok(history) => history.into_iter().take(RECENT_MIGRATIONS).collect(),
            Err(e) => {
                errors.push(format!("Migration history unavailable: {e}"));
                Vec::new()
            }
        };

        StatusReport {
            healthy: health.healthy,
            database_url: mask_db_url(&self.database_url),
            tables: health.metrics.existing_tables,
            current_revision: health.metrics.current_revision,
            head_revision: health.metrics.head_revision,
            has_pending_migrations: health.metrics.pending_migrations.unwrap_or(false),
            recent_migrations,
            migrations_path: self.migrations.migrations_path().to_path_buf(),
            errors,
        }
    }

    pub async fn cleanup(&mut self) {
        self.manager.shutdown().await;
        tracing::info!("Cleanup complete");
    }

    async fn ensure_connected(&mut self) -> DbResult<()> {
        if !self.manager.engine().is_initialized() {
            self.manager.engine_mut().initialize().await?;
        }
        Ok(())
    }

    /// Connect without creating a missing database.
    async fn ensure_existing(&mut self) -> DbResult<()> {
        if !self.manager.engine().is_initialized() {
            self.manager.engine_mut().open_existing().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn confirmation_requires_flag_and_phrase() {
        let missing = ResetConfirmation::from_input(false, Cursor::new("DELETE-ALL-DATA\n")).unwrap();
        assert_eq!(missing, ResetConfirmation::Missing);

        let declined = ResetConfirmation::from_input(true, Cursor::new("yes\n")).unwrap();
        assert_eq!(declined, ResetConfirmation::Declined);

        let empty = ResetConfirmation::from_input(true, Cursor::new("")).unwrap();
        assert_eq!(empty, ResetConfirmation::Declined);

        let confirmed = ResetConfirmation::from_input(true, Cursor::new("DELETE-ALL-DATA\n")).unwrap();
        assert_eq!(confirmed, ResetConfirmation::Confirmed);
    }

    #[test]
    fn phrase_is_case_sensitive() {
        assert_eq!(
            ResetConfirmation::from_phrase("delete-all-data"),
            ResetConfirmation::Declined
        );
    }
}
