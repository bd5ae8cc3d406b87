//! Baseline data for a fresh schema.
//!
//! Each [`Seed`] checks for existing rows before inserting, so running the
//! seeder any number of times leaves the same data behind.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::config::SeedConfig;
use crate::error::{DbError, DbResult, ErrorCode};
use crate::models::{default_plans, NewPlan, NewUser};
use crate::password;

/// What a seed step did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeedOutcome {
    Inserted(usize),
    Skipped,
}

/// One idempotent seeding step.
#[async_trait]
pub trait Seed: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, pool: &SqlitePool) -> DbResult<SeedOutcome>;
}

/// Inserts the plan catalogue when the `plans` table is empty.
pub struct PlanSeed {
    plans: Vec<NewPlan>,
}

impl PlanSeed {
    pub fn new(plans: Vec<NewPlan>) -> Self {
        Self { plans }
    }
}

impl Default for PlanSeed {
    fn default() -> Self {
        Self::new(default_plans())
    }
}

#[async_trait]
impl Seed for PlanSeed {
    fn name(&self) -> &str {
        "plans"
    }

    async fn run(&self, pool: &SqlitePool) -> DbResult<SeedOutcome> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM plans")
            .fetch_one(pool)
            .await
            .map_err(seeding_failed)?;

        if count > 0 {
            tracing::info!("Plans already exist, skipping seed");
            return Ok(SeedOutcome::Skipped);
        }

        let now = Utc::now().timestamp();
        let mut tx = pool.begin().await.map_err(seeding_failed)?;
        for plan in &self.plans {
            sqlx::query(
                r#"
                INSERT INTO plans (id, name, token_limit_daily, document_limit,
                                   session_limit, price_monthly_cents, is_active, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(Uuid::new_v4().to_string())
            .bind(plan.name)
            .bind(plan.token_limit_daily)
            .bind(plan.document_limit)
            .bind(plan.session_limit)
            .bind(plan.price_monthly_cents)
            .bind(plan.is_active)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(seeding_failed)?;
        }
        tx.commit().await.map_err(seeding_failed)?;

        tracing::info!(count = self.plans.len(), "Default subscription plans created");
        Ok(SeedOutcome::Inserted(self.plans.len()))
    }
}

/// Creates a verified development user on the `free` plan.
pub struct TestUserSeed {
    username: String,
    email: String,
    password: String,
}

impl TestUserSeed {
    pub fn new(config: &SeedConfig) -> Self {
        Self {
            username: config.test_username.clone(),
            email: config.test_email.clone(),
            password: config.test_password.clone(),
        }
    }
}

#[async_trait]
impl Seed for TestUserSeed {
    fn name(&self) -> &str {
        "test_user"
    }

    async fn run(&self, pool: &SqlitePool) -> DbResult<SeedOutcome> {
        let plan_id: Option<String> =
            sqlx::query_scalar("SELECT id FROM plans WHERE name = 'free' LIMIT 1")
                .fetch_optional(pool)
                .await
                .map_err(seeding_failed)?;

        let Some(plan_id) = plan_id else {
            tracing::error!("Free plan not found. Seed plans first.");
            return Err(DbError::new(ErrorCode::NoFreePlanFound, "Free plan not found")
                .with_details("Run `docuchat db seed` without --skip-plans first"));
        };

        let existing: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE email = ?")
            .bind(self.email.to_lowercase())
            .fetch_one(pool)
            .await
            .map_err(seeding_failed)?;

        if existing > 0 {
            tracing::info!(email = %self.email, "Test user already exists");
            return Ok(SeedOutcome::Skipped);
        }

        let hashed_password = password::hash_password(&self.password).map_err(|e| {
            DbError::new(ErrorCode::SeedingFailed, "Password hashing failed")
                .with_details(e.to_string())
        })?;

        let user = NewUser {
            username: self.username.clone(),
            email: self.email.clone(),
            hashed_password,
            plan_id,
            total_tokens_used: 0,
            email_verified: true,
            is_active: true,
        }
        .validated()?;

        let now = Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT INTO users (id, username, email, hashed_password, plan_id,
                               total_tokens_used, is_active, email_verified,
                               last_login_at, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, NULL, ?, ?)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.hashed_password)
        .bind(&user.plan_id)
        .bind(user.total_tokens_used)
        .bind(user.is_active)
        .bind(user.email_verified)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await
        .map_err(seeding_failed)?;

        tracing::info!(email = %user.email, "Test user created");
        Ok(SeedOutcome::Inserted(1))
    }
}

/// Runs seed steps in registration order.
pub struct DatabaseSeeder {
    plans: PlanSeed,
    test_user: TestUserSeed,
}

impl DatabaseSeeder {
    pub fn new(config: &SeedConfig) -> Self {
        Self {
            plans: PlanSeed::default(),
            test_user: TestUserSeed::new(config),
        }
    }

    pub async fn seed_plans(&self, pool: &SqlitePool) -> DbResult<SeedOutcome> {
        self.plans.run(pool).await
    }

    pub async fn create_test_user(&self, pool: &SqlitePool) -> DbResult<SeedOutcome> {
        self.test_user.run(pool).await
    }

    /// Plans before users, since users reference a plan.
    pub async fn seed_all(&self, pool: &SqlitePool) -> DbResult<Vec<(String, SeedOutcome)>> {
        let steps: [&dyn Seed; 2] = [&self.plans, &self.test_user];
        let mut outcomes = Vec::with_capacity(steps.len());

        for step in steps {
            match step.run(pool).await {
                Ok(outcome) => outcomes.push((step.name().to_string(), outcome)),
                Err(e) => {
                    tracing::error!(step = step.name(), "Database seeding failed: {}", e);
                    return Err(DbError::wrap(
                        ErrorCode::SeedingFailed,
                        "An error occurred during database seeding",
                        e,
                    ));
                }
            }
        }

        tracing::info!("Database seeding completed successfully");
        Ok(outcomes)
    }
}

fn seeding_failed(e: sqlx::Error) -> DbError {
    DbError::new(ErrorCode::SeedingFailed, format!("Seeding query failed: {e}")).with_source(e)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DbConfig;
    use crate::engine::DatabaseEngine;
    use tempfile::TempDir;

    async fn ready_engine(tmp: &TempDir) -> DatabaseEngine {
        let mut engine = DatabaseEngine::new(DbConfig {
            url: format!("sqlite://{}", tmp.path().join("seed.sqlite").display()),
            max_connections: 2,
            safety_enabled: true,
            echo: false,
        });
        engine.create_tables().await.unwrap();
        engine
    }

    async fn count(pool: &SqlitePool, table: &str) -> i64 {
        sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
            .fetch_one(pool)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn seed_all_twice_keeps_row_counts() {
        let tmp = TempDir::new().unwrap();
        let engine = ready_engine(&tmp).await;
        let pool = engine.pool().unwrap();
        let seeder = DatabaseSeeder::new(&SeedConfig::default());

        let first = seeder.seed_all(pool).await.unwrap();
        assert_eq!(first[0], ("plans".to_string(), SeedOutcome::Inserted(3)));
        assert_eq!(first[1], ("test_user".to_string(), SeedOutcome::Inserted(1)));

        let second = seeder.seed_all(pool).await.unwrap();
        assert!(second.iter().all(|(_, o)| *o == SeedOutcome::Skipped));

        assert_eq!(count(pool, "plans").await, 3);
        assert_eq!(count(pool, "users").await, 1);
    }

    #[tokio::test]
    async fn test_user_requires_free_plan() {
        let tmp = TempDir::new().unwrap();
        let engine = ready_engine(&tmp).await;
        let seeder = DatabaseSeeder::new(&SeedConfig::default());

        let err = seeder.create_test_user(engine.pool().unwrap()).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::NoFreePlanFound);
        assert_eq!(count(engine.pool().unwrap(), "users").await, 0);
    }

    #[tokio::test]
    async fn seeded_password_verifies() {
        let tmp = TempDir::new().unwrap();
        let engine = ready_engine(&tmp).await;
        let pool = engine.pool().unwrap();
        let seeder = DatabaseSeeder::new(&SeedConfig::default());
        seeder.seed_all(pool).await.unwrap();

        let user: crate::models::User =
            sqlx::query_as("SELECT * FROM users WHERE email = 'test@example.com'")
                .fetch_one(pool)
                .await
                .unwrap();
        assert!(user.email_verified);
        assert!(password::verify_password("P@ssword123", &user.hashed_password).unwrap());
    }

    #[tokio::test]
    async fn seed_all_wraps_step_failures() {
        let tmp = TempDir::new().unwrap();
        let engine = ready_engine(&tmp).await;
        let pool = engine.pool().unwrap();
        let seeder = DatabaseSeeder::new(&SeedConfig {
            test_email: "not-an-email".to_string(),
            ..SeedConfig::default()
        });

        let err = seeder.seed_all(pool).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::SeedingFailed);
        assert!(err.details.unwrap().contains("INVALID_MODEL"));
    }
}
