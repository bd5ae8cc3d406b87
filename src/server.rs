//! HTTP scaffold for the DocuChat API.
//!
//! Only operational routes live here; the database is set up when the
//! server starts and shut down after it stops.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Database health report (200 healthy, 503 otherwise) |
//!
//! # Error Contract
//!
//! Every error response has the same shape:
//!
//! ```json
//! {
//!   "message": "Resource not found",
//!   "status_code": 404,
//!   "error": { "code": "NOT_FOUND", "details": "/nope" }
//! }
//! ```

use anyhow::Context;
use axum::{
    extract::{Request, State},
    http::{StatusCode, Uri},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::error::{DbError, ErrorCode};
use crate::health::{run_health_check, HealthReport};
use crate::manager::DatabaseManager;
use crate::migrate::MigrationManager;

#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<RwLock<DatabaseManager>>,
    pub migrations: Arc<MigrationManager>,
}

impl AppState {
    pub fn new(manager: DatabaseManager, migrations: MigrationManager) -> Self {
        Self {
            manager: Arc::new(RwLock::new(manager)),
            migrations: Arc::new(migrations),
        }
    }
}

/// Build the router with request logging and CORS applied.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .fallback(handle_not_found)
        .layer(middleware::from_fn(log_requests))
        .layer(cors)
        .with_state(state)
}

/// Set up the database, serve until ctrl-c, then shut the database down.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let mut manager = DatabaseManager::new(config);
    manager.setup_database(true).await?;

    let state = AppState::new(manager, MigrationManager::new(&config.migrations.dir));
    let app = build_router(state.clone());

    let listener = tokio::net::TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind))?;
    tracing::info!("{} listening on http://{}", config.app.name, config.server.bind);

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    state.manager.write().await.shutdown().await;
    served?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
    tracing::info!("Shutdown signal received");
}

// ============ Middleware ============

async fn log_requests(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let started = Instant::now();

    tracing::info!(%method, %path, "HTTP request");
    let response = next.run(req).await;
    tracing::info!(
        %method,
        %path,
        status = response.status().as_u16(),
        duration_ms = started.elapsed().as_secs_f64() * 1000.0,
        "HTTP response"
    );
    response
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    message: String,
    status_code: u16,
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    details: Option<String>,
}

/// Error type that renders as the JSON error body.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: String,
    pub message: String,
    pub details: Option<String>,
}

impl ApiError {
    pub fn not_found(details: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            code: "NOT_FOUND".to_string(),
            message: "Resource not found".to_string(),
            details: Some(details.into()),
        }
    }
}

impl From<DbError> for ApiError {
    fn from(err: DbError) -> Self {
        let status = match err.code {
            ErrorCode::InitFailed | ErrorCode::EngineNotInitialized => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ErrorCode::InvalidModel | ErrorCode::InvalidRevision => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            code: err.code.to_string(),
            message: err.message,
            details: err.details,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(code = %self.code, details = ?self.details, "API error: {}", self.message);
        } else {
            tracing::warn!(code = %self.code, details = ?self.details, "API error: {}", self.message);
        }

        let body = ErrorBody {
            message: self.message,
            status_code: self.status.as_u16(),
            error: ErrorDetail {
                code: self.code,
                details: self.details,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

// ============ Handlers ============

async fn handle_health(State(state): State<AppState>) -> (StatusCode, Json<HealthReport>) {
    let manager = state.manager.read().await;
    let report = run_health_check(manager.engine(), &state.migrations).await;
    let status = if report.healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report))
}

async fn handle_not_found(uri: Uri) -> ApiError {
    ApiError::not_found(uri.path())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn db_errors_map_to_status_codes() {
        let unavailable: ApiError =
            DbError::new(ErrorCode::EngineNotInitialized, "not ready").into();
        assert_eq!(unavailable.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(unavailable.code, "DB_ENGINE_NOT_INIT");

        let bad: ApiError = DbError::new(ErrorCode::InvalidModel, "bad email")
            .with_details("x")
            .into();
        assert_eq!(bad.status, StatusCode::BAD_REQUEST);
        assert_eq!(bad.details.as_deref(), Some("x"));

        let other: ApiError = DbError::new(ErrorCode::SeedingFailed, "boom").into();
        assert_eq!(other.status, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
