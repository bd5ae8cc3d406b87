//! # DocuChat API
//!
//! Database lifecycle tooling for the DocuChat API: connection management,
//! reversible schema migrations, idempotent seeding, and aggregated health
//! checks, driven from the `docuchat` CLI and a small HTTP scaffold.
//!
//! ## Architecture
//!
//! ```text
//!                ┌──────────────────────────┐
//!                │ DatabaseSetupOrchestrator│◀── CLI (docuchat db ...)
//!                └─────┬──────────┬─────────┘
//!                      │          │
//!          ┌───────────▼───┐  ┌───▼──────────────┐
//!          │DatabaseManager│  │ MigrationManager │
//!          │ engine+seeder │  │ versions/*.sql   │
//!          └───────┬───────┘  └───┬──────────────┘
//!                  ▼              ▼
//!              ┌────────────────────┐
//!              │  SQLite (sqlx pool)│◀── HTTP /health
//!              └────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! docuchat db init                      # migrations, schema, seed, health
//! docuchat db migrate -m "add notes"    # new reversible migration
//! docuchat db upgrade                   # apply pending migrations
//! docuchat db status
//! docuchat serve                        # HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Structured `DbError` with machine-readable codes |
//! | [`logging`] | Tracing subscriber setup |
//! | [`db`] | Connection pool |
//! | [`engine`] | Engine lifecycle, table creation and drops |
//! | [`schema`] | Table definitions |
//! | [`models`] | Row types and validation |
//! | [`password`] | Argon2 password hashing |
//! | [`seed`] | Idempotent seed steps |
//! | [`migrate`] | Schema migrations |
//! | [`health`] | Health check aggregation |
//! | [`manager`] | Setup and reset over engine + seeder |
//! | [`orchestrator`] | Full lifecycle sequencing for the CLI |
//! | [`server`] | HTTP server |

pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod health;
pub mod logging;
pub mod manager;
pub mod migrate;
pub mod models;
pub mod orchestrator;
pub mod password;
pub mod schema;
pub mod seed;
pub mod server;
