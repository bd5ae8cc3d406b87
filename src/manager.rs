//! High-level database operations over one engine and seeder.

use crate::config::Config;
use crate::engine::DatabaseEngine;
use crate::error::{DbError, DbResult, ErrorCode};
use crate::migrate::MigrationManager;
use crate::seed::DatabaseSeeder;

pub struct DatabaseManager {
    engine: DatabaseEngine,
    seeder: DatabaseSeeder,
}

impl DatabaseManager {
    pub fn new(config: &Config) -> Self {
        Self {
            engine: DatabaseEngine::new(config.db.clone()),
            seeder: DatabaseSeeder::new(&config.seed),
        }
    }

    pub fn engine(&self) -> &DatabaseEngine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut DatabaseEngine {
        &mut self.engine
    }

    pub fn seeder(&self) -> &DatabaseSeeder {
        &self.seeder
    }

    /// Initialize, create tables, optionally seed, then ping.
    ///
    /// Any failure shuts the engine down and surfaces as `DB_SETUP_FAILED`
    /// with the cause in `details`.
    pub async fn setup_database(&mut self, with_seed: bool) -> DbResult<()> {
        tracing::info!("Starting database setup...");

        match self.run_setup(with_seed).await {
            Ok(()) => {
                tracing::info!("Database setup completed successfully");
                Ok(())
            }
            Err(e) => {
                tracing::error!("Database setup failed: {}", e);
                self.engine.shutdown().await;
                Err(DbError::wrap(ErrorCode::SetupFailed, "Database setup failed", e))
            }
        }
    }

    async fn run_setup(&mut self, with_seed: bool) -> DbResult<()> {
        self.engine.initialize().await?;
        self.engine.create_tables().await?;

        if with_seed {
            self.seeder.seed_all(self.engine.pool()?).await?;
        }

        if !self.engine.ping().await {
            return Err(DbError::new(
                ErrorCode::HealthCheckFailed,
                "Database health check failed after setup",
            ));
        }
        Ok(())
    }

    /// Drop every table, rebuild the schema and reseed. Subject to
    /// `db.safety_enabled`.
    ///
    /// When `migrations` has scripts the schema is rebuilt by replaying them
    /// to head, so the result matches a freshly migrated database; otherwise
    /// the base tables are created directly.
    pub async fn reset_database(&mut self, migrations: &MigrationManager) -> DbResult<()> {
        tracing::warn!("Starting database reset - ALL DATA WILL BE LOST");

        let result = async {
            if !self.engine.is_initialized() {
                self.engine.initialize().await?;
            }
            self.engine.drop_tables().await?;
            match migrations.existing_head().await? {
                Some(head) => {
                    let applied = migrations.upgrade(self.engine.pool()?, "head").await?;
                    tracing::info!(head, count = applied.len(), "Schema rebuilt from migrations");
                }
                None => self.engine.create_tables().await?,
            }
            self.seeder.seed_all(self.engine.pool()?).await?;
            Ok::<(), DbError>(())
        }
        .await;

        match result {
            Ok(()) => {
                tracing::info!("Database reset completed successfully");
                Ok(())
            }
            Err(e) => {
                tracing::error!("Database reset failed: {}", e);
                Err(DbError::wrap(ErrorCode::ResetFailed, "Database failed to reset", e))
            }
        }
    }

    pub async fn shutdown(&mut self) {
        self.engine.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config(tmp: &TempDir, safety: bool) -> Config {
        let mut config = Config::minimal();
        config.db.url = format!("sqlite://{}", tmp.path().join("m.sqlite").display());
        config.db.safety_enabled = safety;
        config
    }

    fn no_migrations(tmp: &TempDir) -> MigrationManager {
        MigrationManager::new(tmp.path().join("migrations"))
    }

    async fn users(manager: &DatabaseManager) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(manager.engine().pool().unwrap())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn setup_with_and_without_seed() {
        let tmp = TempDir::new().unwrap();
        let mut manager = DatabaseManager::new(&config(&tmp, true));

        manager.setup_database(false).await.unwrap();
        assert_eq!(users(&manager).await, 0);

        manager.setup_database(true).await.unwrap();
        assert_eq!(users(&manager).await, 1);
        manager.shutdown().await;
        assert!(!manager.engine().is_initialized());
    }

    #[tokio::test]
    async fn setup_failure_shuts_down_engine() {
        let tmp = TempDir::new().unwrap();
        let mut cfg = config(&tmp, true);
        cfg.seed.test_email = "broken".to_string();
        let mut manager = DatabaseManager::new(&cfg);

        let err = manager.setup_database(true).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::SetupFailed);
        assert!(err.details.unwrap().contains("DB_SEEDING_FAILED"));
        assert!(!manager.engine().is_initialized());
    }

    #[tokio::test]
    async fn reset_is_refused_while_safety_enabled() {
        let tmp = TempDir::new().unwrap();
        let mut manager = DatabaseManager::new(&config(&tmp, true));
        manager.setup_database(true).await.unwrap();

        let err = manager
            .reset_database(&no_migrations(&tmp))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::ResetFailed);
        assert!(err.details.unwrap().contains("DB_SAFETY_ENABLED"));
        assert_eq!(users(&manager).await, 1);
    }

    #[tokio::test]
    async fn reset_recreates_seed_data() {
        let tmp = TempDir::new().unwrap();
        let mut manager = DatabaseManager::new(&config(&tmp, false));
        manager.setup_database(true).await.unwrap();

        sqlx::query("DELETE FROM users")
            .execute(manager.engine().pool().unwrap())
            .await
            .unwrap();
        manager.reset_database(&no_migrations(&tmp)).await.unwrap();
        assert_eq!(users(&manager).await, 1);
    }
}
