//! Time-in-status reporting over the presence ledger.
//!
//! Ledger events are half-open intervals; an open event (no `ended_at`)
//! is treated as running to the end of the queried window. Each
//! overlapping event is clipped to the window before its seconds are
//! counted, so an event is never billed for time outside the window.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use switchboard_core::error::{Result, StoreError};
use switchboard_core::ids::AgentId;
use switchboard_core::presence::{AgentStatus, StatusSeconds};
use switchboard_store::db::{parse_opt_timestamp, parse_timestamp};

use crate::shift::ShiftWindow;

/// Seconds per status for the shift window containing `as_of`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShiftActivity {
    pub window: ShiftWindow,
    pub as_of: DateTime<Utc>,
    pub seconds: StatusSeconds,
}

/// Aggregates ledger events into per-status second counts.
pub struct TimeInStatusAggregator {
    pool: SqlitePool,
}

impl TimeInStatusAggregator {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Seconds per status for one agent over `[start, end)`. An empty or
    /// inverted window returns all zeroes.
    pub async fn seconds_by_status(
        &self,
        agent_id: &AgentId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<StatusSeconds> {
        if end <= start {
            return Ok(StatusSeconds::zeroed());
        }

        let rows = sqlx::query(
            "SELECT status, started_at, ended_at FROM agent_presence_events
             WHERE agent_id = ?1
               AND started_at < ?2
               AND COALESCE(ended_at, ?2) > ?3",
        )
        .bind(agent_id.as_str())
        .bind(end.to_rfc3339())
        .bind(start.to_rfc3339())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("time in status: {e}")))?;

        let mut totals = StatusSeconds::zeroed();
        for row in &rows {
            let (status, started_at, ended_at) = decode_interval(row)?;
            totals.add(status, clipped_seconds(started_at, ended_at, start, end));
        }
        Ok(totals)
    }

    /// Per-agent totals over `[start, end)`. Every requested agent appears
    /// in the result, zero-filled if it has no ledger events.
    pub async fn seconds_by_status_bulk(
        &self,
        agent_ids: &[AgentId],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<HashMap<AgentId, StatusSeconds>> {
        let mut totals: HashMap<AgentId, StatusSeconds> = agent_ids
            .iter()
            .map(|id| (id.clone(), StatusSeconds::zeroed()))
            .collect();
        if agent_ids.is_empty() || end <= start {
            return Ok(totals);
        }

        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT agent_id, status, started_at, ended_at FROM agent_presence_events
             WHERE agent_id IN (",
        );
        let mut separated = builder.separated(", ");
        for agent_id in agent_ids {
            separated.push_bind(agent_id.as_str().to_string());
        }
        builder.push(") AND started_at < ");
        builder.push_bind(end.to_rfc3339());
        builder.push(" AND COALESCE(ended_at, ");
        builder.push_bind(end.to_rfc3339());
        builder.push(") > ");
        builder.push_bind(start.to_rfc3339());

        let rows = builder
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("time in status batch: {e}")))?;

        for row in &rows {
            let agent_id: String = row
                .try_get("agent_id")
                .map_err(|e| StoreError::QueryFailed(format!("agent_id column: {e}")))?;
            let (status, started_at, ended_at) = decode_interval(row)?;
            if let Some(seconds) = totals.get_mut(&AgentId(agent_id)) {
                seconds.add(status, clipped_seconds(started_at, ended_at, start, end));
            }
        }
        Ok(totals)
    }

    /// Activity within `window`, counted only up to `now`. Open ledger
    /// events must not accrue time the shift has not reached yet.
    pub async fn shift_activity(
        &self,
        agent_id: &AgentId,
        window: ShiftWindow,
        now: DateTime<Utc>,
    ) -> Result<ShiftActivity> {
        let end = window.end_utc.min(now);
        let seconds = self
            .seconds_by_status(agent_id, window.start_utc, end)
            .await?;
        Ok(ShiftActivity {
            window,
            as_of: now,
            seconds,
        })
    }
}

fn decode_interval(
    row: &sqlx::sqlite::SqliteRow,
) -> Result<(AgentStatus, DateTime<Utc>, Option<DateTime<Utc>>), StoreError> {
    let status: String = row
        .try_get("status")
        .map_err(|e| StoreError::QueryFailed(format!("status column: {e}")))?;
    let started_at: String = row
        .try_get("started_at")
        .map_err(|e| StoreError::QueryFailed(format!("started_at column: {e}")))?;
    let ended_at: Option<String> = row
        .try_get("ended_at")
        .map_err(|e| StoreError::QueryFailed(format!("ended_at column: {e}")))?;

    let status = AgentStatus::parse(&status)
        .ok_or_else(|| StoreError::QueryFailed(format!("unknown status '{status}'")))?;
    Ok((
        status,
        parse_timestamp("started_at", &started_at)?,
        parse_opt_timestamp("ended_at", ended_at)?,
    ))
}

/// Seconds of `[started_at, ended_at)` that fall inside `[start, end)`.
/// Open intervals run to `end`.
fn clipped_seconds(
    started_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> i64 {
    let from = started_at.max(start);
    let to = ended_at.unwrap_or(end).min(end);
    if to > from {
        (to - from).num_seconds()
    } else {
        0
    }
}
