//! Tracing subscriber setup.
//!
//! Logs go to stderr so that command reports on stdout stay clean. `RUST_LOG`
//! overrides `logging.level` when set.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;

/// Install the global subscriber. Safe to call more than once; later calls
/// are ignored.
pub fn init(config: &LoggingConfig, echo_sql: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(&config.level, echo_sql)));

    let ansi = atty::is(atty::Stream::Stderr);

    let result = if config.format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_ansi(ansi)
                    .with_writer(std::io::stderr),
            )
            .try_init()
    };

    if result.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}

/// Our crate logs at the configured level; third-party crates stay at warn
/// unless statement echo is on.
fn default_directives(level: &str, echo_sql: bool) -> String {
    let mut directives = format!("warn,docuchat={level},tower_http={level}");
    if echo_sql {
        directives.push_str(",sqlx::query=debug");
    }
    directives
}
