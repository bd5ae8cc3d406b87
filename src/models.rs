//! Row types for the DocuChat schema.
//!
//! Timestamps are Unix seconds; prices are whole cents.

use serde::Serialize;

use crate::error::{DbError, DbResult, ErrorCode};

/// A subscription tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct Plan {
    pub id: String,
    pub name: String,
    pub token_limit_daily: i64,
    pub document_limit: i64,
    pub session_limit: i64,
    pub price_monthly_cents: i64,
    pub is_active: bool,
    pub created_at: i64,
}

/// A user account. `hashed_password` is never serialized.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub hashed_password: String,
    pub plan_id: String,
    pub total_tokens_used: i64,
    pub is_active: bool,
    pub email_verified: bool,
    pub last_login_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// One conversation thread. Message and token totals are cached counters.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ChatSession {
    pub id: String,
    pub user_id: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub total_messages: i64,
    pub total_tokens: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPlan {
    pub name: &'static str,
    pub token_limit_daily: i64,
    pub document_limit: i64,
    pub session_limit: i64,
    pub price_monthly_cents: i64,
    pub is_active: bool,
}

/// The plan catalogue inserted by `db seed`.
pub fn default_plans() -> Vec<NewPlan> {
    vec![
        NewPlan {
            name: "free",
            token_limit_daily: 10_000,
            document_limit: 5,
            session_limit: 3,
            price_monthly_cents: 0,
            is_active: true,
        },
        NewPlan {
            name: "pro",
            token_limit_daily: 100_000,
            document_limit: 50,
            session_limit: 25,
            price_monthly_cents: 1_999,
            is_active: true,
        },
        NewPlan {
            name: "enterprise",
            token_limit_daily: 1_000_000,
            document_limit: 500,
            session_limit: 100,
            price_monthly_cents: 9_999,
            is_active: true,
        },
    ]
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub hashed_password: String,
    pub plan_id: String,
    pub total_tokens_used: i64,
    pub email_verified: bool,
    pub is_active: bool,
}

impl NewUser {
    /// Check field rules and normalize the email to lowercase.
    pub fn validated(mut self) -> DbResult<Self> {
        if self.username.trim().is_empty() || self.username.len() > 50 {
            return Err(DbError::new(
                ErrorCode::InvalidModel,
                "Username must be between 1 and 50 characters",
            ));
        }
        if !is_valid_email(&self.email) {
            return Err(DbError::new(ErrorCode::InvalidModel, "Invalid email format")
                .with_details(self.email.clone()));
        }
        if self.total_tokens_used < 0 {
            return Err(DbError::new(
                ErrorCode::InvalidModel,
                "Token count cannot be negative",
            ));
        }
        self.email = self.email.to_lowercase();
        Ok(self)
    }
}

/// Minimal shape check: one `@`, and a dot somewhere in the domain.
pub fn is_valid_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
        }
        None => false,
    }
}

/// Format a cent amount as dollars, e.g. `1999` → `"$19.99"`.
pub fn format_price(cents: i64) -> String {
    format!("${}.{:02}", cents / 100, cents % 100)
}
