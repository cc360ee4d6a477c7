//! Append-only presence event ledger.
//!
//! The ledger records **effective-status intervals**: each row says the
//! agent held one status from `started_at` until `ended_at`, with at most
//! one open row (`ended_at IS NULL`) per agent. Rows are only ever appended
//! or closed, never rewritten, so historical reports stay stable.

use chrono::{DateTime, Utc};
use sqlx::{Row, SqliteConnection, SqlitePool};
use switchboard_core::error::StoreError;
use switchboard_core::ids::AgentId;
use switchboard_core::presence::{AgentStatus, PresenceEvent, PresenceSource};
use switchboard_store::db::{parse_opt_timestamp, parse_timestamp};

/// Close the open interval and start a new one when the effective status
/// changed. A same-status call is a no-op and returns `false`.
///
/// Runs on the caller's transaction: a failed ledger write rolls back the
/// presence update it belongs to, keeping snapshot and ledger in step.
pub async fn record_transition(
    conn: &mut SqliteConnection,
    agent_id: &AgentId,
    new_status: AgentStatus,
    source: PresenceSource,
    now: DateTime<Utc>,
) -> Result<bool, StoreError> {
    let open = sqlx::query(
        "SELECT id, status FROM agent_presence_events
         WHERE agent_id = ?1 AND ended_at IS NULL
         ORDER BY started_at DESC LIMIT 1",
    )
    .bind(agent_id.as_str())
    .fetch_optional(&mut *conn)
    .await
    .map_err(|e| StoreError::QueryFailed(format!("open event lookup: {e}")))?;

    if let Some(row) = open {
        let status: String = row
            .try_get("status")
            .map_err(|e| StoreError::QueryFailed(format!("status column: {e}")))?;
        if status == new_status.as_str() {
            return Ok(false);
        }

        let id: i64 = row
            .try_get("id")
            .map_err(|e| StoreError::QueryFailed(format!("id column: {e}")))?;
        sqlx::query("UPDATE agent_presence_events SET ended_at = ?1 WHERE id = ?2")
            .bind(now.to_rfc3339())
            .bind(id)
            .execute(&mut *conn)
            .await
            .map_err(|e| StoreError::Database(format!("event close: {e}")))?;
    }

    sqlx::query(
        r#"
        INSERT INTO agent_presence_events (agent_id, status, started_at, ended_at, source)
        VALUES (?1, ?2, ?3, NULL, ?4)
        "#,
    )
    .bind(agent_id.as_str())
    .bind(new_status.as_str())
    .bind(now.to_rfc3339())
    .bind(source.as_str())
    .execute(&mut *conn)
    .await
    .map_err(|e| StoreError::Database(format!("event insert: {e}")))?;

    Ok(true)
}

/// The agent's open interval, if any.
pub async fn open_event(
    pool: &SqlitePool,
    agent_id: &AgentId,
) -> Result<Option<PresenceEvent>, StoreError> {
    let row = sqlx::query(
        "SELECT * FROM agent_presence_events
         WHERE agent_id = ?1 AND ended_at IS NULL
         ORDER BY started_at DESC LIMIT 1",
    )
    .bind(agent_id.as_str())
    .fetch_optional(pool)
    .await
    .map_err(|e| StoreError::QueryFailed(format!("open event lookup: {e}")))?;

    row.as_ref().map(row_to_event).transpose()
}

pub(crate) fn row_to_event(row: &sqlx::sqlite::SqliteRow) -> Result<PresenceEvent, StoreError> {
    let id: i64 = row
        .try_get("id")
        .map_err(|e| StoreError::QueryFailed(format!("id column: {e}")))?;
    let agent_id: String = row
        .try_get("agent_id")
        .map_err(|e| StoreError::QueryFailed(format!("agent_id column: {e}")))?;
    let status: String = row
        .try_get("status")
        .map_err(|e| StoreError::QueryFailed(format!("status column: {e}")))?;
    let started_at: String = row
        .try_get("started_at")
        .map_err(|e| StoreError::QueryFailed(format!("started_at column: {e}")))?;
    let ended_at: Option<String> = row
        .try_get("ended_at")
        .map_err(|e| StoreError::QueryFailed(format!("ended_at column: {e}")))?;
    let source: String = row
        .try_get("source")
        .map_err(|e| StoreError::QueryFailed(format!("source column: {e}")))?;

    Ok(PresenceEvent {
        id,
        agent_id: AgentId(agent_id),
        status: AgentStatus::parse(&status)
            .ok_or_else(|| StoreError::QueryFailed(format!("unknown status '{status}'")))?,
        started_at: parse_timestamp("started_at", &started_at)?,
        ended_at: parse_opt_timestamp("ended_at", ended_at)?,
        source: PresenceSource::parse(&source)
            .ok_or_else(|| StoreError::QueryFailed(format!("unknown source '{source}'")))?,
    })
}
