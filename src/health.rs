//! Database health aggregation.
//!
//! Checks run independently and each one records its own failure. Only
//! connectivity and table presence decide the overall verdict; migration
//! currency and the metrics are informational.

use chrono::Utc;
use serde::Serialize;
use sqlx::SqlitePool;
use std::time::Instant;

use crate::engine::DatabaseEngine;
use crate::migrate::{has_pending, MigrationManager};
use crate::schema::EXPECTED_TABLES;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HealthChecks {
    pub connectivity: bool,
    pub tables_exist: bool,
    pub migrations_current: bool,
}

impl HealthChecks {
    pub fn healthy(&self) -> bool {
        self.connectivity && self.tables_exist
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct HealthMetrics {
    pub query_response_time_ms: Option<f64>,
    pub database_size_bytes: Option<i64>,
    pub pool_size: Option<u32>,
    pub idle_connections: Option<usize>,
    pub existing_tables: Vec<String>,
    pub current_revision: Option<i64>,
    pub head_revision: Option<i64>,
    pub pending_migrations: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub healthy: bool,
    pub checked_at: String,
    pub checks: HealthChecks,
    pub metrics: HealthMetrics,
    pub errors: Vec<String>,
}

impl HealthReport {
    pub fn new(checks: HealthChecks, metrics: HealthMetrics, errors: Vec<String>) -> Self {
        Self {
            healthy: checks.healthy(),
            checked_at: Utc::now().to_rfc3339(),
            checks,
            metrics,
            errors,
        }
    }
}

/// Run every check against `engine` and fold the results into a report.
///
/// Never fails: problems are reported in `errors`. When the database cannot
/// be reached the remaining checks are skipped and stay `false`.
pub async fn run_health_check(
    engine: &DatabaseEngine,
    migrations: &MigrationManager,
) -> HealthReport {
    let mut checks = HealthChecks::default();
    let mut metrics = HealthMetrics::default();
    let mut errors = Vec::new();

    let started = Instant::now();
    checks.connectivity = engine.ping().await;
    if !checks.connectivity {
        errors.push("Database connectivity check failed".to_string());
        return HealthReport::new(checks, metrics, errors);
    }
    metrics.query_response_time_ms = Some(started.elapsed().as_secs_f64() * 1000.0);

    if let Some((size, idle)) = engine.pool_size() {
        metrics.pool_size = Some(size);
        metrics.idle_connections = Some(idle);
    }

    let pool = match engine.pool() {
        Ok(pool) => pool,
        Err(e) => {
            errors.push(e.to_string());
            return HealthReport::new(checks, metrics, errors);
        }
    };

    match existing_tables(pool).await {
        Ok(tables) => {
            let missing = missing_tables(&tables);
            checks.tables_exist = missing.is_empty();
            if !missing.is_empty() {
                errors.push(format!("Missing tables: {}", missing.join(", ")));
            }
            metrics.existing_tables = tables;
        }
        Err(e) => errors.push(format!("Table check failed: {e}")),
    }

    match database_size(pool).await {
        Ok(bytes) => metrics.database_size_bytes = Some(bytes),
        Err(e) => errors.push(format!("Size check failed: {e}")),
    }

    match revisions(pool, migrations).await {
        Ok((current, head)) => {
            let pending = has_pending(current, head);
            checks.migrations_current = !pending;
            metrics.current_revision = current;
            metrics.head_revision = head;
            metrics.pending_migrations = Some(pending);
            if pending {
                tracing::warn!(?current, ?head, "Database has pending migrations");
            }
        }
        Err(e) => errors.push(format!("Migration check failed: {e}")),
    }

    HealthReport::new(checks, metrics, errors)
}

async fn existing_tables(pool: &SqlitePool) -> Result<Vec<String>, sqlx::Error> {
    sqlx::query_scalar(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
    )
    .fetch_all(pool)
    .await
}

async fn database_size(pool: &SqlitePool) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar(
        "SELECT page_count * page_size FROM pragma_page_count(), pragma_page_size()",
    )
    .fetch_one(pool)
    .await
}

async fn revisions(
    pool: &SqlitePool,
    migrations: &MigrationManager,
) -> crate::error::DbResult<(Option<i64>, Option<i64>)> {
    let current = migrations.current_revision(pool).await?;
    let head = migrations.head_revision().await?;
    Ok((current, head))
}

fn missing_tables(existing: &[String]) -> Vec<&'static str> {
    EXPECTED_TABLES
        .iter()
        .copied()
        .filter(|t| !existing.iter().any(|e| e == t))
        .collect()
}

/// Replace the password in a connection URL with `***`.
///
/// `postgres://app:secret@db:5432/x` becomes `postgres://app:***@db:5432/x`;
/// URLs without credentials are returned unchanged.
pub fn mask_db_url(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_string();
    };
    let Some((userinfo, host)) = rest.rsplit_once('@') else {
        return url.to_string();
    };
    match userinfo.split_once(':') {
        Some((user, _)) => format!("{scheme}://{user}:***@{host}"),
        None => format!("{scheme}://***@{host}"),
    }
}
