//! Settings loaded from a TOML file, with `.env` / environment overrides.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub app: AppConfig,
    pub db: DbConfig,
    #[serde(default)]
    pub migrations: MigrationsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub seed: SeedConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default = "default_app_name")]
    pub name: String,
    #[serde(default = "default_environment")]
    pub environment: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            environment: default_environment(),
        }
    }
}

fn default_app_name() -> String {
    "DocuChatAPI".to_string()
}
fn default_environment() -> String {
    "development".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    /// Connection string, e.g. `sqlite://data/docuchat.sqlite`.
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// While set, table drops are refused.
    #[serde(default = "default_safety_enabled")]
    pub safety_enabled: bool,
    /// Log every statement at debug level.
    #[serde(default)]
    pub echo: bool,
}

fn default_max_connections() -> u32 {
    5
}
fn default_safety_enabled() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct MigrationsConfig {
    #[serde(default = "default_migrations_dir")]
    pub dir: PathBuf,
}

impl Default for MigrationsConfig {
    fn default() -> Self {
        Self {
            dir: default_migrations_dir(),
        }
    }
}

fn default_migrations_dir() -> PathBuf {
    PathBuf::from("migrations")
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// `pretty` or `json`.
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "pretty".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:5000".to_string()
}

/// Development user created by `db seed`.
#[derive(Debug, Deserialize, Clone)]
pub struct SeedConfig {
    #[serde(default = "default_test_username")]
    pub test_username: String,
    #[serde(default = "default_test_email")]
    pub test_email: String,
    #[serde(default = "default_test_password")]
    pub test_password: String,
}

impl Default for SeedConfig {
    fn default() -> Self {
        Self {
            test_username: default_test_username(),
            test_email: default_test_email(),
            test_password: default_test_password(),
        }
    }
}

fn default_test_username() -> String {
    "TestUser".to_string()
}
fn default_test_email() -> String {
    "test@example.com".to_string()
}
fn default_test_password() -> String {
    "P@ssword123".to_string()
}

impl Config {
    /// Built-in defaults, for embedding the library without a settings file.
    /// The CLI always requires one.
    pub fn minimal() -> Self {
        Self {
            app: AppConfig::default(),
            db: DbConfig {
                url: "sqlite://data/docuchat.sqlite".to_string(),
                max_connections: default_max_connections(),
                safety_enabled: default_safety_enabled(),
                echo: false,
            },
            migrations: MigrationsConfig::default(),
            logging: LoggingConfig::default(),
            server: ServerConfig::default(),
            seed: SeedConfig::default(),
        }
    }
}

/// Read, override from the environment, and validate the settings file.
///
/// A `.env` file in the working directory is loaded first; `DATABASE_URL`
/// then takes precedence over `db.url`.
pub fn load_config(path: &Path) -> Result<Config> {
    dotenvy::dotenv().ok();

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config: Config =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    apply_env_overrides(&mut config);
    validate(&config)?;

    Ok(config)
}

fn apply_env_overrides(config: &mut Config) {
    if let Ok(url) = std::env::var("DATABASE_URL") {
        if !url.trim().is_empty() {
            config.db.url = url;
        }
    }
}

pub fn validate(config: &Config) -> Result<()> {
    if !config.db.url.starts_with("sqlite:") {
        anyhow::bail!(
            "db.url must be a sqlite connection string (got '{}')",
            config.db.url
        );
    }

    if config.db.max_connections == 0 {
        anyhow::bail!("db.max_connections must be >= 1");
    }

    match config.logging.format.as_str() {
        "pretty" | "json" => {}
        other => anyhow::bail!(
            "Unknown logging format: '{}'. Must be pretty or json.",
            other
        ),
    }

    if !crate::models::is_valid_email(&config.seed.test_email) {
        anyhow::bail!("seed.test_email is not a valid email address");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_src: &str) -> Config {
        toml::from_str(toml_src).unwrap()
    }

    #[test]
    fn defaults_fill_optional_sections() {
        let cfg = parse(
            r#"
            [db]
            url = "sqlite://data/app.sqlite"
            "#,
        );

        assert_eq!(cfg.app.name, "DocuChatAPI");
        assert_eq!(cfg.db.max_connections, 5);
        assert!(cfg.db.safety_enabled);
        assert_eq!(cfg.migrations.dir, PathBuf::from("migrations"));
        assert_eq!(cfg.logging.format, "pretty");
        assert_eq!(cfg.seed.test_email, "test@example.com");
        assert!(validate(&cfg).is_ok());
    }

    #[test]
    fn rejects_non_sqlite_url() {
        let cfg = parse(
            r#"
            [db]
            url = "postgres://user:pw@localhost/app"
            "#,
        );
        let err = validate(&cfg).unwrap_err();
        assert!(err.to_string().contains("db.url"));
    }

    #[test]
    fn rejects_unknown_log_format() {
        let cfg = parse(
            r#"
            [db]
            url = "sqlite://x.sqlite"

            [logging]
            format = "xml"
            "#,
        );
        assert!(validate(&cfg).is_err());
    }

    #[test]
    fn rejects_zero_pool_size() {
        let cfg = parse(
            r#"
            [db]
            url = "sqlite://x.sqlite"
            max_connections = 0
            "#,
        );
        assert!(validate(&cfg).is_err());
    }

    #[test]
    fn minimal_config_validates() {
        let cfg = Config::minimal();
        assert!(validate(&cfg).is_ok());
        assert_eq!(cfg.db.url, "sqlite://data/docuchat.sqlite");
        assert!(cfg.db.safety_enabled);
    }
}
