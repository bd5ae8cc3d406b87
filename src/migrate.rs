//! Schema migrations on top of the sqlx migrator.
//!
//! Layout under `[migrations].dir`:
//!
//! ```text
//! migrations/
//! ├── migrate.toml            # migration tool settings
//! └── versions/
//!     ├── 20250101120000_initial_database_schema.up.sql
//!     └── 20250101120000_initial_database_schema.down.sql
//! ```
//!
//! A revision is the numeric prefix of a script pair. The database records
//! applied revisions in `_sqlx_migrations`; the head is the newest revision
//! on disk. The two differ exactly when migrations are pending.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::error::BoxDynError;
use sqlx::migrate::{Migration, MigrationSource, MigrationType, Migrator};
use sqlx::SqlitePool;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use crate::error::{DbError, DbResult, ErrorCode};
use crate::schema;

pub const TOOL_CONFIG_FILE: &str = "migrate.toml";

const TOOL_CONFIG_TEMPLATE: &str = r#"# Migration tool settings.
#
# Scripts live in `versions_dir`, relative to this file. File names are
# rendered from `file_template`, which must start with "{rev}_"; the
# migrator reads the numeric prefix as the revision.

versions_dir = "versions"
file_template = "{rev}_{slug}"
"#;

/// Settings read from `migrate.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationToolConfig {
    #[serde(default = "default_versions_dir")]
    pub versions_dir: String,
    #[serde(default = "default_file_template")]
    pub file_template: String,
}

fn default_versions_dir() -> String {
    "versions".to_string()
}
fn default_file_template() -> String {
    "{rev}_{slug}".to_string()
}

impl Default for MigrationToolConfig {
    fn default() -> Self {
        Self {
            versions_dir: default_versions_dir(),
            file_template: default_file_template(),
        }
    }
}

impl MigrationToolConfig {
    /// Load `migrate.toml` from `dir`, falling back to defaults when absent.
    pub fn load(dir: &Path) -> DbResult<Self> {
        let path = dir.join(TOOL_CONFIG_FILE);
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path).map_err(|e| {
            DbError::new(ErrorCode::MigrationInitFailed, "Failed to read migration config")
                .with_details(path.display().to_string())
                .with_source(e)
        })?;
        let config: Self = toml::from_str(&content).map_err(|e| {
            DbError::new(ErrorCode::MigrationInitFailed, "Failed to parse migration config")
                .with_details(path.display().to_string())
                .with_source(e)
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> DbResult<()> {
        if !self.file_template.starts_with("{rev}_") || !self.file_template.contains("{slug}") {
            return Err(DbError::new(
                ErrorCode::MigrationInitFailed,
                "file_template must start with \"{rev}_\" and contain \"{slug}\"",
            )
            .with_details(self.file_template.clone()));
        }
        Ok(())
    }

    fn render(&self, rev: i64, slug: &str) -> String {
        self.file_template
            .replace("{rev}", &rev.to_string())
            .replace("{slug}", slug)
    }
}

/// Creates the migrations directory, versions directory and tool config.
pub struct MigrationSetup {
    migrations_path: PathBuf,
}

impl MigrationSetup {
    pub fn new(migrations_path: impl Into<PathBuf>) -> Self {
        Self {
            migrations_path: migrations_path.into(),
        }
    }

    /// Idempotent: existing files are left untouched.
    pub fn setup_migration_infrastructure(&self) -> DbResult<()> {
        let setup_failed = |e: std::io::Error| {
            DbError::new(
                ErrorCode::MigrationInitFailed,
                "Migration infrastructure setup failed",
            )
            .with_details(self.migrations_path.display().to_string())
            .with_source(e)
        };

        std::fs::create_dir_all(&self.migrations_path).map_err(setup_failed)?;

        let config_path = self.migrations_path.join(TOOL_CONFIG_FILE);
        if !config_path.exists() {
            std::fs::write(&config_path, TOOL_CONFIG_TEMPLATE).map_err(setup_failed)?;
        }

        let tool = MigrationToolConfig::load(&self.migrations_path)?;
        std::fs::create_dir_all(self.migrations_path.join(&tool.versions_dir))
            .map_err(setup_failed)?;

        tracing::info!(
            path = %self.migrations_path.display(),
            "Migration infrastructure set up"
        );
        Ok(())
    }
}

/// One revision as listed by `db history`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationRecord {
    pub revision: i64,
    pub message: String,
    pub down_revision: Option<i64>,
    pub reversible: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct MigrationInfo {
    pub current_revision: Option<i64>,
    pub head_revision: Option<i64>,
    pub has_pending_migrations: bool,
    pub migrations_path: PathBuf,
}

/// Result of [`MigrationManager::create_initial_migration`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitialMigration {
    Created(i64),
    /// Migrations already exist; carries the current head.
    Existing(i64),
}

/// Pending means the database is not at head, in either direction.
pub fn has_pending(current: Option<i64>, head: Option<i64>) -> bool {
    current != head
}

pub struct MigrationManager {
    migrations_path: PathBuf,
}

impl MigrationManager {
    pub fn new(migrations_path: impl Into<PathBuf>) -> Self {
        Self {
            migrations_path: migrations_path.into(),
        }
    }

    pub fn migrations_path(&self) -> &Path {
        &self.migrations_path
    }

    pub fn versions_path(&self) -> DbResult<PathBuf> {
        let tool = MigrationToolConfig::load(&self.migrations_path)?;
        Ok(self.migrations_path.join(tool.versions_dir))
    }

    async fn migrator(&self) -> DbResult<Migrator> {
        self.migrator_up_to(None).await
    }

    /// A migrator over the scripts on disk, restricted to revisions at or
    /// below `limit` when one is given.
    async fn migrator_up_to(&self, limit: Option<i64>) -> DbResult<Migrator> {
        let versions = self.versions_path()?;
        if !versions.is_dir() {
            return Err(DbError::new(
                ErrorCode::MigrationInitFailed,
                "Migration versions directory does not exist",
            )
            .with_details(format!(
                "{} (run `docuchat db init` first)",
                versions.display()
            )));
        }

        let source = VersionsUpTo {
            dir: versions.clone(),
            limit,
        };
        Migrator::new(source).await.map_err(|e| {
            DbError::new(ErrorCode::MigrationInitFailed, "Failed to load migrations")
                .with_details(versions.display().to_string())
                .with_source(e)
        })
    }

    /// Revisions on disk, newest first.
    pub async fn history(&self) -> DbResult<Vec<MigrationRecord>> {
        let migrator = self.migrator().await?;
        Ok(records(&migrator))
    }

    pub async fn head_revision(&self) -> DbResult<Option<i64>> {
        let migrator = self.migrator().await?;
        Ok(up_migrations(&migrator).map(|m| m.version).max())
    }

    /// [`head_revision`](Self::head_revision), or `None` when the versions
    /// directory has not been set up yet.
    pub async fn existing_head(&self) -> DbResult<Option<i64>> {
        if !self.versions_path()?.is_dir() {
            return Ok(None);
        }
        self.head_revision().await
    }

    /// Highest successfully applied revision, `None` on a database that has
    /// never been migrated.
    pub async fn current_revision(&self, pool: &SqlitePool) -> DbResult<Option<i64>> {
        let tracked: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = '_sqlx_migrations'",
        )
        .fetch_one(pool)
        .await
        .map_err(revision_lookup_failed)?;

        if tracked == 0 {
            return Ok(None);
        }

        sqlx::query_scalar("SELECT MAX(version) FROM _sqlx_migrations WHERE success = 1")
            .fetch_one(pool)
            .await
            .map_err(revision_lookup_failed)
    }

    pub async fn check_pending(&self, pool: &SqlitePool) -> DbResult<bool> {
        let current = self.current_revision(pool).await?;
        let head = self.head_revision().await?;
        Ok(has_pending(current, head))
    }

    pub async fn info(&self, pool: &SqlitePool) -> DbResult<MigrationInfo> {
        let current_revision = self.current_revision(pool).await?;
        let head_revision = self.head_revision().await?;
        Ok(MigrationInfo {
            current_revision,
            head_revision,
            has_pending_migrations: has_pending(current_revision, head_revision),
            migrations_path: self.migrations_path.clone(),
        })
    }

    /// Write an empty reversible script pair and return its revision.
    pub async fn create_migration(&self, message: &str) -> DbResult<i64> {
        self.write_migration(
            message,
            "-- Write the schema change here.\n",
            "-- Revert the schema change here.\n",
        )
        .await
    }

    /// Write the full schema as the first revision. No-op when any
    /// revision already exists.
    pub async fn create_initial_migration(&self) -> DbResult<InitialMigration> {
        if let Some(head) = self.head_revision().await? {
            tracing::info!(revision = head, "Initial migration already exists");
            return Ok(InitialMigration::Existing(head));
        }

        let up = schema::as_script(&schema::create_statements());
        let down = schema::as_script(&schema::drop_statements());
        let rev = self
            .write_migration("Initial database schema", &up, &down)
            .await?;
        Ok(InitialMigration::Created(rev))
    }

    async fn write_migration(
        &self,
        message: &str,
        up_body: &str,
        down_body: &str,
    ) -> DbResult<i64> {
        let message = message.trim();
        if message.is_empty() {
            return Err(DbError::new(
                ErrorCode::MigrationCreationFailed,
                "Migration message must not be empty",
            ));
        }

        let tool = MigrationToolConfig::load(&self.migrations_path)?;
        let head = self.head_revision().await?;
        let now = Utc::now();
        let rev = next_revision(now.format("%Y%m%d%H%M%S").to_string(), head);

        let stem = tool.render(rev, &slugify(message));
        let versions = self.migrations_path.join(&tool.versions_dir);
        let header = format!(
            "-- {message}\n--\n-- Revision: {rev}\n-- Revises: {}\n-- Create Date: {}\n\n",
            head.map(|h| h.to_string()).unwrap_or_else(|| "base".to_string()),
            now.to_rfc3339(),
        );

        let write = |suffix: &str, body: &str| {
            let path = versions.join(format!("{stem}.{suffix}.sql"));
            std::fs::write(&path, format!("{header}{body}")).map_err(|e| {
                tracing::error!("Failed to create migration: {}", e);
                DbError::new(
                    ErrorCode::MigrationCreationFailed,
                    format!("Migration creation failed: {e}"),
                )
                .with_details(path.display().to_string())
                .with_source(e)
            })
        };
        write("up", up_body)?;
        write("down", down_body)?;

        tracing::debug!(revision = rev, msg = message, "Migration created");
        Ok(rev)
    }

    /// Apply revisions up to `target` (`head` or a revision). Returns the
    /// revisions applied by this call.
    pub async fn upgrade(&self, pool: &SqlitePool, target: &str) -> DbResult<Vec<i64>> {
        let known: Vec<i64> = up_migrations(&self.migrator().await?)
            .map(|m| m.version)
            .collect();
        let current = self.current_revision(pool).await?;

        let target_rev = match target.trim() {
            "head" | "" => None,
            raw => {
                let rev = parse_revision(raw)?;
                if !known.contains(&rev) {
                    return Err(unknown_revision(rev));
                }
                if current.is_some_and(|c| c > rev) {
                    return Err(DbError::new(
                        ErrorCode::InvalidRevision,
                        format!("Revision {rev} is below the current revision"),
                    )
                    .with_details("Use `docuchat db downgrade` to move backwards"));
                }
                Some(rev)
            }
        };

        let migrator = self.migrator_up_to(target_rev).await?;
        migrator.run(pool).await.map_err(|e| {
            tracing::error!("Failed to upgrade database: {}", e);
            DbError::new(ErrorCode::UpgradeFailed, format!("Database upgrade failed: {e}"))
                .with_source(e)
        })?;

        let after = self.current_revision(pool).await?;
        let applied = revisions_between(&known, current, after);
        tracing::debug!(?applied, "Database upgraded to {}", target);
        Ok(applied)
    }

    /// Revert to `target`: `-1` for the previous revision, `base` for an
    /// empty schema, or a specific revision. Returns the reverted revisions,
    /// newest first.
    pub async fn downgrade(&self, pool: &SqlitePool, target: &str) -> DbResult<Vec<i64>> {
        let migrator = self.migrator().await?;
        let known: Vec<i64> = up_migrations(&migrator).map(|m| m.version).collect();
        let current = self.current_revision(pool).await?;

        let Some(current_rev) = current else {
            return Err(DbError::new(
                ErrorCode::InvalidRevision,
                "No migrations have been applied; nothing to downgrade",
            ));
        };

        let target_rev = resolve_downgrade_target(target, current_rev, &known)?;

        let mut reverted: Vec<i64> = known
            .iter()
            .copied()
            .filter(|v| *v > target_rev && *v <= current_rev)
            .collect();
        reverted.sort_unstable_by(|a, b| b.cmp(a));

        if let Some(missing) = reverted.iter().find(|v| !has_down_script(&migrator, **v)) {
            return Err(DbError::new(
                ErrorCode::DowngradeFailed,
                format!("Revision {missing} has no down script and cannot be reverted"),
            ));
        }

        migrator.undo(pool, target_rev).await.map_err(|e| {
            tracing::error!("Failed to downgrade database: {}", e);
            DbError::new(ErrorCode::DowngradeFailed, format!("Database downgrade failed: {e}"))
                .with_source(e)
        })?;

        tracing::debug!(?reverted, "Database downgraded to {}", target_rev);
        Ok(reverted)
    }
}

/// Script directory source that drops revisions above `limit`.
#[derive(Debug)]
struct VersionsUpTo {
    dir: PathBuf,
    limit: Option<i64>,
}

impl<'s> MigrationSource<'s> for VersionsUpTo {
    fn resolve(
        self,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Migration>, BoxDynError>> + Send + 's>> {
        Box::pin(async move {
            let mut migrations = self.dir.resolve().await?;
            if let Some(limit) = self.limit {
                migrations.retain(|m| m.version <= limit);
            }
            Ok(migrations)
        })
    }
}

fn up_migrations(migrator: &Migrator) -> impl Iterator<Item = &Migration> {
    migrator
        .iter()
        .filter(|m| !m.migration_type.is_down_migration())
}

fn has_down_script(migrator: &Migrator, version: i64) -> bool {
    migrator
        .iter()
        .any(|m| m.version == version && m.migration_type == MigrationType::ReversibleDown)
}

fn records(migrator: &Migrator) -> Vec<MigrationRecord> {
    let mut ups: Vec<&Migration> = up_migrations(migrator).collect();
    ups.sort_by_key(|m| m.version);

    let mut out: Vec<MigrationRecord> = ups
        .iter()
        .enumerate()
        .map(|(i, m)| MigrationRecord {
            revision: m.version,
            message: script_message(&m.sql).unwrap_or_else(|| m.description.to_string()),
            down_revision: if i == 0 { None } else { Some(ups[i - 1].version) },
            reversible: has_down_script(migrator, m.version),
        })
        .collect();
    out.reverse();
    out
}

/// The message recorded on the first line of a generated script.
fn script_message(sql: &str) -> Option<String> {
    let first = sql.lines().next()?.strip_prefix("-- ")?.trim();
    (!first.is_empty()).then(|| first.to_string())
}

fn resolve_downgrade_target(target: &str, current: i64, known: &[i64]) -> DbResult<i64> {
    match target.trim() {
        "base" => Ok(0),
        "-1" => Ok(known
            .iter()
            .copied()
            .filter(|v| *v < current)
            .max()
            .unwrap_or(0)),
        raw => {
            let rev = parse_revision(raw)?;
            if !known.contains(&rev) {
                return Err(unknown_revision(rev));
            }
            if rev > current {
                return Err(DbError::new(
                    ErrorCode::InvalidRevision,
                    format!("Revision {rev} is above the current revision {current}"),
                )
                .with_details("Use `docuchat db upgrade` to move forwards"));
            }
            Ok(rev)
        }
    }
}

fn parse_revision(raw: &str) -> DbResult<i64> {
    raw.parse::<i64>().map_err(|_| {
        DbError::new(ErrorCode::InvalidRevision, format!("Invalid revision: '{raw}'"))
            .with_details("Expected `head`, `base`, `-1` or a numeric revision")
    })
}

fn unknown_revision(rev: i64) -> DbError {
    DbError::new(ErrorCode::InvalidRevision, format!("Unknown revision: {rev}"))
        .with_details("Run `docuchat db history` to list revisions")
}

fn revision_lookup_failed(e: sqlx::Error) -> DbError {
    DbError::new(ErrorCode::MigrationInitFailed, "Failed to read the current revision")
        .with_source(e)
}

/// Known revisions in `(before, after]`.
fn revisions_between(known: &[i64], before: Option<i64>, after: Option<i64>) -> Vec<i64> {
    let lo = before.unwrap_or(i64::MIN);
    let hi = after.unwrap_or(i64::MIN);
    let mut out: Vec<i64> = known.iter().copied().filter(|v| *v > lo && *v <= hi).collect();
    out.sort_unstable();
    out
}

/// A timestamp revision, bumped past `head` when two are created within the
/// same second.
fn next_revision(timestamp: String, head: Option<i64>) -> i64 {
    let ts: i64 = timestamp.parse().unwrap_or(0);
    match head {
        Some(h) if h >= ts => h + 1,
        _ => ts,
    }
}

fn slugify(message: &str) -> String {
    let mut slug = String::with_capacity(message.len());
    for c in message.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('_') {
            slug.push('_');
        }
    }
    let slug: String = slug.trim_matches('_').chars().take(60).collect();
    let slug = slug.trim_end_matches('_').to_string();
    if slug.is_empty() {
        "migration".to_string()
    } else {
        slug
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_reflects_revision_mismatch() {
        assert!(!has_pending(None, None));
        assert!(!has_pending(Some(3), Some(3)));
        assert!(has_pending(None, Some(3)));
        assert!(has_pending(Some(2), Some(3)));
        // Applied revision no longer on disk.
        assert!(has_pending(Some(4), Some(3)));
    }

    #[test]
    fn slugify_collapses_punctuation() {
        assert_eq!(slugify("Add user table"), "add_user_table");
        assert_eq!(slugify("  Drop 'legacy' -- columns!! "), "drop_legacy_columns");
        assert_eq!(slugify("!!!"), "migration");
    }

    #[test]
    fn next_revision_never_goes_backwards() {
        assert_eq!(next_revision("20250101120000".into(), None), 20250101120000);
        assert_eq!(
            next_revision("20250101120000".into(), Some(20250101120000)),
            20250101120001
        );
        assert_eq!(
            next_revision("20250101120000".into(), Some(20240101000000)),
            20250101120000
        );
    }

    #[test]
    fn downgrade_targets() {
        let known = [10, 20, 30];
        assert_eq!(resolve_downgrade_target("-1", 30, &known).unwrap(), 20);
        assert_eq!(resolve_downgrade_target("-1", 10, &known).unwrap(), 0);
        assert_eq!(resolve_downgrade_target("base", 30, &known).unwrap(), 0);
        assert_eq!(resolve_downgrade_target("10", 30, &known).unwrap(), 10);

        let above = resolve_downgrade_target("30", 20, &known).unwrap_err();
        assert_eq!(above.code, ErrorCode::InvalidRevision);
        let unknown = resolve_downgrade_target("15", 30, &known).unwrap_err();
        assert_eq!(unknown.code, ErrorCode::InvalidRevision);
        let garbage = resolve_downgrade_target("abc", 30, &known).unwrap_err();
        assert_eq!(garbage.code, ErrorCode::InvalidRevision);
    }

    #[test]
    fn revisions_between_is_half_open() {
        let known = [10, 20, 30];
        assert_eq!(revisions_between(&known, None, Some(20)), vec![10, 20]);
        assert_eq!(revisions_between(&known, Some(10), Some(30)), vec![20, 30]);
        assert!(revisions_between(&known, Some(30), Some(30)).is_empty());
    }

    #[test]
    fn script_message_reads_header() {
        assert_eq!(
            script_message("-- Add notes\n--\n-- Revision: 1\n").as_deref(),
            Some("Add notes")
        );
        assert_eq!(script_message("CREATE TABLE x (id INTEGER);"), None);
    }

    #[test]
    fn tool_config_template_parses_and_validates() {
        let cfg: MigrationToolConfig = toml::from_str(TOOL_CONFIG_TEMPLATE).unwrap();
        assert_eq!(cfg, MigrationToolConfig::default());
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.render(42, "add_x"), "42_add_x");

        let bad = MigrationToolConfig {
            file_template: "{slug}_{rev}".to_string(),
            ..MigrationToolConfig::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn setup_is_idempotent() {
        let tmp = tempfile::TempDir::new().unwrap();
        let dir = tmp.path().join("migrations");
        let setup = MigrationSetup::new(&dir);

        setup.setup_migration_infrastructure().unwrap();
        std::fs::write(dir.join(TOOL_CONFIG_FILE), "versions_dir = \"scripts\"\n").unwrap();
        setup.setup_migration_infrastructure().unwrap();

        assert!(dir.join("versions").is_dir());
        assert!(dir.join("scripts").is_dir());
        let kept = std::fs::read_to_string(dir.join(TOOL_CONFIG_FILE)).unwrap();
        assert!(kept.contains("scripts"));
    }

    fn write_scripts(dir: &Path) {
        std::fs::create_dir_all(dir).unwrap();
        std::fs::write(dir.join("10_first.up.sql"), "-- First\nCREATE TABLE a (id INTEGER);\n").unwrap();
        std::fs::write(dir.join("10_first.down.sql"), "-- First\nDROP TABLE a;\n").unwrap();
        std::fs::write(dir.join("20_second.up.sql"), "-- Second\nCREATE TABLE b (id INTEGER);\n").unwrap();
    }

    #[tokio::test]
    async fn versions_source_stops_at_limit() {
        let tmp = tempfile::TempDir::new().unwrap();
        let dir = tmp.path().join("versions");
        write_scripts(&dir);

        let all = VersionsUpTo { dir: dir.clone(), limit: None }.resolve().await.unwrap();
        assert_eq!(all.len(), 3);

        let limited = VersionsUpTo { dir, limit: Some(10) }.resolve().await.unwrap();
        assert_eq!(limited.len(), 2);
        assert!(limited.iter().all(|m| m.version == 10));
    }

    #[tokio::test]
    async fn history_marks_scripts_without_down_as_irreversible() {
        let tmp = tempfile::TempDir::new().unwrap();
        let root = tmp.path().join("migrations");
        write_scripts(&root.join("versions"));

        let history = MigrationManager::new(&root).history().await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].revision, 20);
        assert!(!history[0].reversible);
        assert_eq!(history[1].revision, 10);
        assert!(history[1].reversible);
    }
}
