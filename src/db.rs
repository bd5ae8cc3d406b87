use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::PathBuf;
use std::str::FromStr;

use crate::config::DbConfig;

/// Owns the connection pool for one database URL.
#[derive(Debug)]
pub struct DatabaseConnection {
    config: DbConfig,
    pool: Option<SqlitePool>,
}

impl DatabaseConnection {
    pub fn new(config: DbConfig) -> Self {
        Self { config, pool: None }
    }

    pub fn url(&self) -> &str {
        &self.config.url
    }

    pub fn config(&self) -> &DbConfig {
        &self.config
    }

    /// Open the pool. Reconnecting replaces (and closes) any existing pool.
    ///
    /// With `create_if_missing` unset, a missing database file is an error
    /// and nothing is written to disk.
    pub async fn connect(&mut self, create_if_missing: bool) -> Result<(), sqlx::Error> {
        if create_if_missing {
            // Ensure parent directory exists
            if let Some(file) = database_file(&self.config.url) {
                if let Some(parent) = file.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent)?;
                }
            }
        }

        let options = SqliteConnectOptions::from_str(&self.config.url)?
            .create_if_missing(create_if_missing)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(self.config.max_connections)
            .connect_with(options)
            .await?;

        if let Some(old) = self.pool.replace(pool) {
            old.close().await;
        }
        Ok(())
    }

    pub async fn disconnect(&mut self) {
        if let Some(pool) = self.pool.take() {
            pool.close().await;
        }
    }

    pub fn pool(&self) -> Option<&SqlitePool> {
        self.pool.as_ref()
    }
}

/// The on-disk file behind a `sqlite:` URL, if any.
pub fn database_file(url: &str) -> Option<PathBuf> {
    let rest = url
        .strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))?;
    let path = rest.split('?').next().unwrap_or_default();
    if path.is_empty() || path == ":memory:" {
        return None;
    }
    Some(PathBuf::from(path))
}
