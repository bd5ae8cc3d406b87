//! Structured database error.
//!
//! Every fallible database lifecycle operation returns [`DbError`]: a
//! human-readable message, a machine-readable [`ErrorCode`], optional
//! details for the operator, and an optional trace rendered from the
//! underlying error chain. The CLI logs all four and exits with status 1.

use std::fmt;

/// Machine-readable error codes surfaced to the CLI and HTTP layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    CommandNotFound,
    InitFailed,
    ShutdownError,
    EngineNotInitialized,
    TableCreationFailed,
    TableDropFailed,
    SafetyEnabled,
    SeedingFailed,
    NoFreePlanFound,
    SetupFailed,
    ResetFailed,
    HealthCheckFailed,
    NoResetConfirmation,
    MigrationInitFailed,
    MigrationCreationFailed,
    UpgradeFailed,
    DowngradeFailed,
    InvalidRevision,
    InvalidModel,
    Config,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::CommandNotFound => "DB_CMD_NOT_FOUND",
            ErrorCode::InitFailed => "DB_INIT_FAILED",
            ErrorCode::ShutdownError => "DB_SHUTDOWN_ERROR",
            ErrorCode::EngineNotInitialized => "DB_ENGINE_NOT_INIT",
            ErrorCode::TableCreationFailed => "TABLE_CREATION_FAILED",
            ErrorCode::TableDropFailed => "TABLE_DROP_FAILED",
            ErrorCode::SafetyEnabled => "DB_SAFETY_ENABLED",
            ErrorCode::SeedingFailed => "DB_SEEDING_FAILED",
            ErrorCode::NoFreePlanFound => "NO_FREE_PLAN_FOUND",
            ErrorCode::SetupFailed => "DB_SETUP_FAILED",
            ErrorCode::ResetFailed => "DB_RESET_FAILED",
            ErrorCode::HealthCheckFailed => "DB_HEALTH_CHECK_FAILED",
            ErrorCode::NoResetConfirmation => "NO_DB_RESET_CONFIRMATION",
            ErrorCode::MigrationInitFailed => "MIGRATION_INIT_FAILED",
            ErrorCode::MigrationCreationFailed => "MIGRATION_CREATION_FAILED",
            ErrorCode::UpgradeFailed => "DB_UPGRADE_FAILED",
            ErrorCode::DowngradeFailed => "DB_DOWNGRADE_FAILED",
            ErrorCode::InvalidRevision => "INVALID_REVISION",
            ErrorCode::InvalidModel => "INVALID_MODEL",
            ErrorCode::Config => "CONFIG_ERROR",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The single error type of the database layer.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct DbError {
    pub code: ErrorCode,
    pub message: String,
    pub details: Option<String>,
    /// Rendered source chain, kept for debug-level logging.
    pub trace: Option<String>,
    #[source]
    source: Option<BoxError>,
}

pub type DbResult<T> = Result<T, DbError>;

impl DbError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
            trace: None,
            source: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Attach the underlying cause. The trace is rendered from the cause's
    /// own source chain so it survives after the error is logged.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: Into<BoxError>,
    {
        let source: BoxError = source.into();
        self.trace = Some(render_chain(source.as_ref()));
        self.source = Some(source);
        self
    }

    /// Wrap a lower-level `DbError` under a new code, keeping the inner
    /// message as details.
    pub fn wrap(code: ErrorCode, message: impl Into<String>, inner: DbError) -> Self {
        let details = match &inner.details {
            Some(d) => format!("{} [{}]: {}", inner.message, inner.code, d),
            None => format!("{} [{}]", inner.message, inner.code),
        };
        DbError::new(code, message)
            .with_details(details)
            .with_source(inner)
    }
}

fn render_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut out = err.to_string();
    let mut current = err.source();
    while let Some(cause) = current {
        out.push_str(": ");
        out.push_str(&cause.to_string());
        current = cause.source();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_render_in_screaming_snake_case() {
        assert_eq!(ErrorCode::InitFailed.to_string(), "DB_INIT_FAILED");
        assert_eq!(
            ErrorCode::NoResetConfirmation.as_str(),
            "NO_DB_RESET_CONFIRMATION"
        );
    }

    #[test]
    fn source_chain_is_rendered_into_trace() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "no such file");
        let err = DbError::new(ErrorCode::InitFailed, "Database initialization failed.")
            .with_source(io);

        assert_eq!(err.to_string(), "Database initialization failed.");
        assert_eq!(err.trace.as_deref(), Some("no such file"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn wrap_keeps_inner_code_in_details() {
        let inner = DbError::new(ErrorCode::NoFreePlanFound, "Free plan not found");
        let outer = DbError::wrap(ErrorCode::SeedingFailed, "seeding failed", inner);

        assert_eq!(outer.code, ErrorCode::SeedingFailed);
        let details = outer.details.unwrap();
        assert!(details.contains("NO_FREE_PLAN_FOUND"));
        assert!(details.contains("Free plan not found"));
    }
}
