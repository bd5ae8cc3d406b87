//! Table definitions.
//!
//! The same statements back [`crate::engine::DatabaseEngine::create_tables`]
//! and the generated initial migration, so both paths converge on one schema.

/// Tables the application cannot run without. Health checks require all of
/// them.
pub const EXPECTED_TABLES: &[&str] = &["plans", "users", "chat_sessions"];

const CREATE_PLANS: &str = r#"
CREATE TABLE IF NOT EXISTS plans (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL UNIQUE CHECK (length(name) <= 50),
    token_limit_daily INTEGER NOT NULL CHECK (token_limit_daily >= 0),
    document_limit INTEGER NOT NULL CHECK (document_limit >= 0),
    session_limit INTEGER NOT NULL CHECK (session_limit >= 0),
    price_monthly_cents INTEGER NOT NULL DEFAULT 0 CHECK (price_monthly_cents >= 0),
    is_active INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL
)"#;

const CREATE_USERS: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    username TEXT NOT NULL UNIQUE CHECK (length(username) <= 50),
    email TEXT NOT NULL UNIQUE CHECK (length(email) <= 255),
    hashed_password TEXT NOT NULL,
    plan_id TEXT NOT NULL REFERENCES plans(id),
    total_tokens_used INTEGER NOT NULL DEFAULT 0 CHECK (total_tokens_used >= 0),
    is_active INTEGER NOT NULL DEFAULT 1,
    email_verified INTEGER NOT NULL DEFAULT 0,
    last_login_at INTEGER,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
)"#;

const CREATE_CHAT_SESSIONS: &str = r#"
CREATE TABLE IF NOT EXISTS chat_sessions (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    title TEXT CHECK (title IS NULL OR length(title) <= 255),
    description TEXT,
    total_messages INTEGER NOT NULL DEFAULT 0 CHECK (total_messages >= 0),
    total_tokens INTEGER NOT NULL DEFAULT 0 CHECK (total_tokens >= 0),
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
)"#;

const CREATE_INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_users_plan_id ON users(plan_id)",
    "CREATE INDEX IF NOT EXISTS idx_session_user_created ON chat_sessions(user_id, created_at)",
];

/// Statements that create the full schema, in dependency order.
pub fn create_statements() -> Vec<&'static str> {
    let mut stmts = vec![CREATE_PLANS, CREATE_USERS, CREATE_CHAT_SESSIONS];
    stmts.extend_from_slice(CREATE_INDEXES);
    stmts
}

/// Statements that remove the schema, children before parents.
pub fn drop_statements() -> Vec<&'static str> {
    vec![
        "DROP TABLE IF EXISTS chat_sessions",
        "DROP TABLE IF EXISTS users",
        "DROP TABLE IF EXISTS plans",
    ]
}

/// Render a statement list as a migration script body.
pub fn as_script(stmts: &[&str]) -> String {
    let mut out = String::new();
    for stmt in stmts {
        out.push_str(stmt.trim());
        out.push_str(";\n\n");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_expected_table_is_created_and_dropped() {
        let creates = create_statements().join("\n");
        let drops = drop_statements().join("\n");
        for table in EXPECTED_TABLES {
            assert!(creates.contains(&format!("CREATE TABLE IF NOT EXISTS {table}")));
            assert!(drops.contains(&format!("DROP TABLE IF EXISTS {table}")));
        }
    }

    #[test]
    fn drops_children_first() {
        let drops = drop_statements();
        assert!(drops[0].ends_with("chat_sessions"));
        assert!(drops.last().unwrap().ends_with("plans"));
    }

    #[test]
    fn script_terminates_each_statement() {
        let script = as_script(&drop_statements());
        assert_eq!(script.matches(';').count(), 3);
    }
}
