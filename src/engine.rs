//! Database engine: connection lifecycle and schema management.

use sqlx::SqlitePool;

use crate::config::DbConfig;
use crate::db::DatabaseConnection;
use crate::error::{DbError, DbResult, ErrorCode};
use crate::schema;

#[derive(Debug)]
pub struct DatabaseEngine {
    connection: DatabaseConnection,
    is_initialized: bool,
}

impl DatabaseEngine {
    pub fn new(config: DbConfig) -> Self {
        Self {
            connection: DatabaseConnection::new(config),
            is_initialized: false,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.is_initialized
    }

    pub fn url(&self) -> &str {
        self.connection.url()
    }

    /// Open the connection pool and verify it answers, creating the
    /// database file when it does not exist yet.
    ///
    /// On failure the half-open pool is closed and the engine stays
    /// uninitialized.
    pub async fn initialize(&mut self) -> DbResult<()> {
        self.open(true).await
    }

    /// Like [`initialize`](Self::initialize), but fails instead of creating
    /// a missing database. Used by commands that only inspect state.
    pub async fn open_existing(&mut self) -> DbResult<()> {
        self.open(false).await
    }

    async fn open(&mut self, create_if_missing: bool) -> DbResult<()> {
        let result = async {
            self.connection.connect(create_if_missing).await?;
            if let Some(pool) = self.connection.pool() {
                sqlx::query("SELECT 1").execute(pool).await?;
            }
            Ok::<(), sqlx::Error>(())
        }
        .await;

        match result {
            Ok(()) => {
                self.is_initialized = true;
                tracing::info!("Database engine initialized successfully");
                Ok(())
            }
            Err(e) => {
                self.connection.disconnect().await;
                self.is_initialized = false;
                Err(DbError::new(ErrorCode::InitFailed, "Database initialization failed.")
                    .with_details(crate::health::mask_db_url(self.url()))
                    .with_source(e))
            }
        }
    }

    pub async fn shutdown(&mut self) {
        self.connection.disconnect().await;
        if self.is_initialized {
            tracing::info!("Database engine shutdown completed");
        }
        self.is_initialized = false;
    }

    /// The live pool. Fails with `DB_ENGINE_NOT_INIT` before
    /// [`initialize`](Self::initialize).
    pub fn pool(&self) -> DbResult<&SqlitePool> {
        match (self.is_initialized, self.connection.pool()) {
            (true, Some(pool)) => Ok(pool),
            _ => Err(DbError::new(
                ErrorCode::EngineNotInitialized,
                "Database engine has not been initialized",
            )),
        }
    }

    pub fn pool_size(&self) -> Option<(u32, usize)> {
        self.connection.pool().map(|p| (p.size(), p.num_idle()))
    }

    /// Create every table and index that does not exist yet.
    pub async fn create_tables(&mut self) -> DbResult<()> {
        if !self.is_initialized {
            tracing::warn!("Database has not been initialized yet. Initializing now...");
            self.initialize().await?;
        }

        let pool = self.pool()?;
        let mut tx = pool.begin().await.map_err(table_creation_failed)?;
        for stmt in schema::create_statements() {
            sqlx::query(stmt)
                .execute(&mut *tx)
                .await
                .map_err(table_creation_failed)?;
        }
        tx.commit().await.map_err(table_creation_failed)?;

        tracing::info!("Database tables created successfully");
        Ok(())
    }

    /// Drop every table in the database, including ones added by later
    /// migrations and the migration history. Refused while
    /// `db.safety_enabled` is set.
    pub async fn drop_tables(&mut self) -> DbResult<()> {
        if self.connection.config().safety_enabled {
            tracing::warn!(
                "Database safety enabled! Set db.safety_enabled = false to drop tables"
            );
            return Err(DbError::new(
                ErrorCode::SafetyEnabled,
                "Refusing to drop tables while database safety is enabled",
            )
            .with_details("Set `safety_enabled = false` under [db] in the config file"));
        }

        if !self.is_initialized {
            self.initialize().await?;
        }

        let pool = self.pool()?;
        let mut tx = pool.begin().await.map_err(table_drop_failed)?;
        // Tables from later migrations may reference each other in any order.
        sqlx::query("PRAGMA defer_foreign_keys = ON")
            .execute(&mut *tx)
            .await
            .map_err(table_drop_failed)?;
        for stmt in schema::drop_statements() {
            sqlx::query(stmt)
                .execute(&mut *tx)
                .await
                .map_err(table_drop_failed)?;
        }

        let leftover: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'",
        )
        .fetch_all(&mut *tx)
        .await
        .map_err(table_drop_failed)?;
        for table in leftover {
            tracing::debug!(table = %table, "Dropping table");
            sqlx::query(&format!("DROP TABLE IF EXISTS \"{}\"", table.replace('"', "\"\"")))
                .execute(&mut *tx)
                .await
                .map_err(table_drop_failed)?;
        }
        tx.commit().await.map_err(table_drop_failed)?;

        tracing::warn!("All database tables dropped - DATA LOST");
        Ok(())
    }

    /// `SELECT 1` round trip. Never errors; failures are logged and reported
    /// as `false`.
    pub async fn ping(&self) -> bool {
        let pool = match self.pool() {
            Ok(pool) => pool,
            Err(e) => {
                tracing::error!(code = %e.code, "Database health check failed: {}", e);
                return false;
            }
        };

        match sqlx::query("SELECT 1").execute(pool).await {
            Ok(_) => true,
            Err(e) => {
                tracing::error!("Database health check failed: {}", e);
                false
            }
        }
    }
}

fn table_creation_failed(e: sqlx::Error) -> DbError {
    tracing::error!("Failed to create database tables: {}", e);
    DbError::new(ErrorCode::TableCreationFailed, format!("Table creation failed: {e}"))
        .with_source(e)
}

fn table_drop_failed(e: sqlx::Error) -> DbError {
    tracing::error!("Failed to drop database tables: {}", e);
    DbError::new(ErrorCode::TableDropFailed, format!("Table dropping failed: {e}"))
        .with_source(e)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn engine(tmp: &TempDir, safety: bool) -> DatabaseEngine {
        DatabaseEngine::new(DbConfig {
            url: format!("sqlite://{}", tmp.path().join("engine.sqlite").display()),
            max_connections: 2,
            safety_enabled: safety,
            echo: false,
        })
    }

    async fn table_count(engine: &DatabaseEngine) -> i64 {
        sqlx::query_scalar(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN ('plans', 'users', 'chat_sessions')",
        )
        .fetch_one(engine.pool().unwrap())
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn pool_is_unavailable_before_initialize() {
        let tmp = TempDir::new().unwrap();
        let engine = engine(&tmp, true);
        let err = engine.pool().unwrap_err();
        assert_eq!(err.code, ErrorCode::EngineNotInitialized);
        assert!(!engine.ping().await);
    }

    #[tokio::test]
    async fn create_tables_initializes_on_demand() {
        let tmp = TempDir::new().unwrap();
        let mut engine = engine(&tmp, true);

        engine.create_tables().await.unwrap();
        assert!(engine.is_initialized());
        assert_eq!(table_count(&engine).await, 3);

        // Idempotent.
        engine.create_tables().await.unwrap();
        assert_eq!(table_count(&engine).await, 3);
        assert!(engine.ping().await);
    }

    #[tokio::test]
    async fn safety_flag_blocks_drop() {
        let tmp = TempDir::new().unwrap();
        let mut engine = engine(&tmp, true);
        engine.create_tables().await.unwrap();

        let err = engine.drop_tables().await.unwrap_err();
        assert_eq!(err.code, ErrorCode::SafetyEnabled);
        assert_eq!(table_count(&engine).await, 3);
    }

    #[tokio::test]
    async fn drop_tables_removes_schema_when_unsafe() {
        let tmp = TempDir::new().unwrap();
        let mut engine = engine(&tmp, false);
        engine.create_tables().await.unwrap();

        for ddl in [
            "CREATE TABLE _sqlx_migrations (version BIGINT PRIMARY KEY)",
            "CREATE TABLE tags (name TEXT PRIMARY KEY)",
            "CREATE TABLE user_tags (user_id TEXT REFERENCES users(id), tag TEXT REFERENCES tags(name))",
        ] {
            sqlx::query(ddl).execute(engine.pool().unwrap()).await.unwrap();
        }

        engine.drop_tables().await.unwrap();
        assert_eq!(table_count(&engine).await, 0);
        let remaining: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'",
        )
        .fetch_one(engine.pool().unwrap())
        .await
        .unwrap();
        assert_eq!(remaining, 0);
    }

    #[tokio::test]
    async fn failed_initialize_leaves_engine_uninitialized() {
        let tmp = TempDir::new().unwrap();
        // The parent "directory" is a regular file, so it cannot be created.
        let blocker = tmp.path().join("blocker");
        std::fs::write(&blocker, b"").unwrap();
        let mut engine = DatabaseEngine::new(DbConfig {
            url: format!("sqlite://{}", blocker.join("db.sqlite").display()),
            max_connections: 1,
            safety_enabled: true,
            echo: false,
        });

        let err = engine.initialize().await.unwrap_err();
        assert_eq!(err.code, ErrorCode::InitFailed);
        assert!(err.trace.is_some());
        assert!(!engine.is_initialized());
    }

    #[tokio::test]
    async fn open_existing_refuses_missing_database() {
        let tmp = TempDir::new().unwrap();
        let mut engine = engine(&tmp, true);

        let err = engine.open_existing().await.unwrap_err();
        assert_eq!(err.code, ErrorCode::InitFailed);
        assert!(!engine.is_initialized());
        assert!(!tmp.path().join("engine.sqlite").exists());

        engine.initialize().await.unwrap();
        engine.shutdown().await;
        engine.open_existing().await.unwrap();
        assert!(engine.ping().await);
    }

    #[tokio::test]
    async fn shutdown_resets_state() {
        let tmp = TempDir::new().unwrap();
        let mut engine = engine(&tmp, true);
        engine.initialize().await.unwrap();
        engine.shutdown().await;
        assert!(!engine.is_initialized());
        assert!(engine.pool().is_err());
    }
}
