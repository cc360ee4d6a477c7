//! SQLite pool construction and schema bootstrap.

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::str::FromStr;
use switchboard_core::error::StoreError;
use tracing::{debug, info};

/// Handle on the shared SQLite database.
///
/// All timestamps are stored as RFC 3339 TEXT in UTC, which sorts and
/// compares correctly as strings.
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (or create) the database at the given URL.
    ///
    /// Pass `"sqlite::memory:"` for an in-process ephemeral database
    /// (useful for tests).
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| StoreError::Database(format!("Invalid SQLite URL: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .pragma("foreign_keys", "ON");

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Database(format!("Failed to open SQLite: {e}")))?;

        let db = Self { pool };
        db.run_migrations().await?;
        info!("SQLite database initialized at {url}");
        Ok(db)
    }

    /// Wrap an existing pool (useful for testing).
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        let db = Self { pool };
        db.run_migrations().await?;
        Ok(db)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create the directory, conversation, cursor, and settings tables.
    async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS agents (
                id         TEXT PRIMARY KEY,
                name       TEXT NOT NULL,
                is_active  INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("agents table: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS teams (
                id         TEXT PRIMARY KEY,
                name       TEXT NOT NULL,
                is_active  INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("teams table: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS team_members (
                team_id   TEXT NOT NULL,
                agent_id  TEXT NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 1,
                added_at  TEXT NOT NULL,
                PRIMARY KEY (team_id, agent_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("team_members table: {e}")))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_team_members_team
             ON team_members(team_id, is_active)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("team_members index: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS conversations (
                id                TEXT PRIMARY KEY,
                channel_type      TEXT NOT NULL,
                channel_target_id TEXT,
                is_resolved       INTEGER NOT NULL DEFAULT 0,
                created_at        TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("conversations table: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS conversation_assignments (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                conversation_id TEXT NOT NULL,
                agent_id        TEXT,
                team_id         TEXT,
                assigned_by_id  TEXT,
                assigned_at     TEXT NOT NULL,
                is_active       INTEGER NOT NULL DEFAULT 1
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("assignments table: {e}")))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_assignments_conversation
             ON conversation_assignments(conversation_id, is_active)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("assignments conversation index: {e}")))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_assignments_agent
             ON conversation_assignments(agent_id, is_active)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("assignments agent index: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS routing_cursors (
                team_id    TEXT NOT NULL,
                rule_id    TEXT NOT NULL,
                agent_id   TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (team_id, rule_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("routing_cursors table: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS settings (
                key        TEXT PRIMARY KEY,
                value      TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("settings table: {e}")))?;

        debug!("store migrations complete");
        Ok(())
    }
}

/// Parse an RFC 3339 TEXT column back into a UTC timestamp.
///
/// Bad stored data is an error, not a silent fallback: these timestamps
/// feed interval arithmetic in the reporting layer.
pub fn parse_timestamp(column: &str, value: &str) -> Result<DateTime<Utc>, StoreError> {
    chrono::DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::QueryFailed(format!("{column} timestamp '{value}': {e}")))
}

/// Parse a nullable RFC 3339 TEXT column.
pub fn parse_opt_timestamp(
    column: &str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, StoreError> {
    value.map(|v| parse_timestamp(column, &v)).transpose()
}
