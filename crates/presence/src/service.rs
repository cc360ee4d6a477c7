//! Presence mutations: heartbeats, manual overrides, location pings.
//!
//! Every mutation follows the same shape: load the snapshot inside a
//! transaction, apply the change, write the snapshot back, record the
//! effective-status transition in the ledger, commit, then publish an
//! event. Snapshot and ledger can never disagree because they commit
//! together.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use sqlx::{QueryBuilder, Row, Sqlite, SqliteConnection, SqlitePool};
use switchboard_core::error::{PresenceError, Result, StoreError};
use switchboard_core::event::{DomainEvent, EventBus};
use switchboard_core::ids::AgentId;
use switchboard_core::presence::{AgentPresence, AgentStatus, LiveLocation, PresenceSource};
use switchboard_store::db::{parse_opt_timestamp, parse_timestamp};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::ledger;
use crate::machine;

/// Tuning knobs for the presence engine.
#[derive(Debug, Clone)]
pub struct PresenceOptions {
    /// Heartbeats at least this old make the agent effectively offline.
    pub stale_after: Duration,

    /// Location pings older than this are pruned.
    pub ping_retention: Duration,

    /// Minimum gap between two prune sweeps in one process. Zero means
    /// prune on every location heartbeat.
    pub prune_interval: std::time::Duration,
}

impl Default for PresenceOptions {
    fn default() -> Self {
        Self {
            stale_after: Duration::minutes(5),
            ping_retention: Duration::hours(48),
            prune_interval: std::time::Duration::from_secs(300),
        }
    }
}

/// Result of a presence mutation.
#[derive(Debug, Clone)]
pub struct PresenceUpdate {
    /// The snapshot as persisted.
    pub presence: AgentPresence,

    /// Effective status right after the mutation.
    pub effective_status: AgentStatus,

    /// Whether the ledger recorded a transition (false for same-status
    /// heartbeats).
    pub transitioned: bool,
}

/// One location heartbeat from a client device.
#[derive(Debug, Clone)]
pub struct LocationHeartbeat {
    pub agent_id: AgentId,
    pub sharing_enabled: bool,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub accuracy_m: Option<f64>,
    /// When the device captured the fix. Defaults to arrival time.
    pub captured_at: Option<DateTime<Utc>>,
    /// Optional raw status piggybacked on the ping.
    pub status: Option<AgentStatus>,
    pub source: PresenceSource,
}

/// Presence persistence and the operations that mutate it.
pub struct PresenceStore {
    pool: SqlitePool,
    options: PresenceOptions,
    events: Arc<EventBus>,
    last_prune: Mutex<Option<Instant>>,
}

impl PresenceStore {
    pub async fn new(
        pool: SqlitePool,
        options: PresenceOptions,
        events: Arc<EventBus>,
    ) -> Result<Self> {
        if options.stale_after <= Duration::zero() {
            return Err(PresenceError::InvalidHorizon(options.stale_after.num_seconds()).into());
        }
        if options.ping_retention <= Duration::zero() {
            return Err(PresenceError::InvalidHorizon(options.ping_retention.num_seconds()).into());
        }

        run_migrations(&pool).await?;
        Ok(Self {
            pool,
            options,
            events,
            last_prune: Mutex::new(None),
        })
    }

    /// The staleness horizon this store derives effective statuses with.
    pub fn stale_after(&self) -> Duration {
        self.options.stale_after
    }

    /// Record a liveness heartbeat, optionally updating the raw status.
    /// Creates the presence row on first contact.
    pub async fn upsert_heartbeat(
        &self,
        agent_id: &AgentId,
        status: Option<AgentStatus>,
        source: PresenceSource,
    ) -> Result<PresenceUpdate> {
        let now = Utc::now();
        let mut tx = begin(&self.pool).await?;

        let mut presence = fetch_presence(&mut *tx, agent_id)
            .await?
            .unwrap_or_else(|| AgentPresence::new(agent_id.clone()));
        if let Some(status) = status {
            presence.status = status;
        }
        presence.last_seen_at = Some(now);
        presence.updated_at = now;

        self.commit_update(tx, presence, source, now).await
    }

    /// Pin a manual override. Only `on_break` and `offline` may be pinned.
    pub async fn set_manual_override(
        &self,
        agent_id: &AgentId,
        status: AgentStatus,
    ) -> Result<PresenceUpdate> {
        if !status.overridable() {
            return Err(PresenceError::InvalidOverride(status).into());
        }

        let now = Utc::now();
        let mut tx = begin(&self.pool).await?;

        let mut presence = fetch_presence(&mut *tx, agent_id)
            .await?
            .unwrap_or_else(|| AgentPresence::new(agent_id.clone()));
        presence.manual_override_status = Some(status);
        presence.manual_override_set_at = Some(now);
        presence.updated_at = now;

        self.commit_update(tx, presence, PresenceSource::Manual, now)
            .await
    }

    /// Clear the manual override, falling back to heartbeat-driven status.
    pub async fn clear_manual_override(&self, agent_id: &AgentId) -> Result<PresenceUpdate> {
        let now = Utc::now();
        let mut tx = begin(&self.pool).await?;

        let Some(mut presence) = fetch_presence(&mut *tx, agent_id).await? else {
            return Err(PresenceError::NotFound(agent_id.to_string()).into());
        };
        presence.manual_override_status = None;
        presence.manual_override_set_at = None;
        presence.updated_at = now;

        self.commit_update(tx, presence, PresenceSource::Manual, now)
            .await
    }

    /// Record a location heartbeat. Doubles as a liveness heartbeat; when
    /// sharing is enabled it also stores a ping and the latest coordinates.
    /// Disabling sharing keeps the last coordinates but hides the agent
    /// from the live feed.
    pub async fn upsert_location_heartbeat(
        &self,
        heartbeat: LocationHeartbeat,
    ) -> Result<PresenceUpdate> {
        let now = Utc::now();
        let captured_at = heartbeat.captured_at.unwrap_or(now);

        if heartbeat.sharing_enabled {
            let (Some(latitude), Some(longitude)) = (heartbeat.latitude, heartbeat.longitude)
            else {
                return Err(PresenceError::MissingCoordinates.into());
            };
            if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
                return Err(PresenceError::CoordinatesOutOfRange {
                    latitude,
                    longitude,
                }
                .into());
            }
        }

        let mut tx = begin(&self.pool).await?;

        let mut presence = fetch_presence(&mut *tx, &heartbeat.agent_id)
            .await?
            .unwrap_or_else(|| AgentPresence::new(heartbeat.agent_id.clone()));
        if let Some(status) = heartbeat.status {
            presence.status = status;
        }
        presence.last_seen_at = Some(now);
        presence.location_sharing_enabled = heartbeat.sharing_enabled;
        presence.updated_at = now;

        if heartbeat.sharing_enabled {
            presence.last_latitude = heartbeat.latitude;
            presence.last_longitude = heartbeat.longitude;
            presence.last_accuracy_m = heartbeat.accuracy_m;
            presence.last_location_at = Some(captured_at);

            sqlx::query(
                r#"
                INSERT INTO agent_location_pings
                    (agent_id, latitude, longitude, accuracy_m, captured_at, source)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
            )
            .bind(heartbeat.agent_id.as_str())
            .bind(heartbeat.latitude)
            .bind(heartbeat.longitude)
            .bind(heartbeat.accuracy_m)
            .bind(captured_at.to_rfc3339())
            .bind(heartbeat.source.as_str())
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::Database(format!("ping insert: {e}")))?;
        }

        let update = self
            .commit_update(tx, presence, heartbeat.source, now)
            .await?;

        // Retention runs after the commit so a failed sweep can never cost
        // us the heartbeat.
        self.maybe_prune(now).await;

        Ok(update)
    }

    /// The stored snapshot, if the agent ever checked in.
    pub async fn presence(&self, agent_id: &AgentId) -> Result<Option<AgentPresence>> {
        fetch_presence(&self.pool, agent_id).await
    }

    /// Snapshots for a set of agents. Agents without a row are absent.
    pub async fn presence_of(&self, agent_ids: &[AgentId]) -> Result<Vec<AgentPresence>> {
        if agent_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT * FROM agent_presence WHERE agent_id IN (");
        let mut separated = builder.separated(", ");
        for agent_id in agent_ids {
            separated.push_bind(agent_id.as_str().to_string());
        }
        builder.push(")");

        let rows = builder
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("presence batch: {e}")))?;

        let mut snapshots = Vec::with_capacity(rows.len());
        for row in &rows {
            snapshots.push(row_to_presence(row)?);
        }
        Ok(snapshots)
    }

    /// Effective status for one agent. Unknown agents are an error, not
    /// `offline`: the caller may be holding a typo.
    pub async fn effective_status(&self, agent_id: &AgentId) -> Result<AgentStatus> {
        let presence = self
            .presence(agent_id)
            .await?
            .ok_or_else(|| PresenceError::NotFound(agent_id.to_string()))?;
        Ok(machine::effective_status(
            &presence,
            self.options.stale_after,
            Utc::now(),
        ))
    }

    /// Agents currently visible on the live map: sharing enabled and a
    /// location fix newer than `stale_after_seconds`.
    pub async fn list_live_locations(
        &self,
        stale_after_seconds: i64,
        limit: i64,
    ) -> Result<Vec<LiveLocation>> {
        if stale_after_seconds <= 0 {
            return Err(PresenceError::InvalidHorizon(stale_after_seconds).into());
        }
        if limit <= 0 {
            return Err(PresenceError::InvalidLimit(limit).into());
        }

        let now = Utc::now();
        let cutoff = now - Duration::seconds(stale_after_seconds);
        let rows = sqlx::query(
            "SELECT * FROM agent_presence
             WHERE location_sharing_enabled = 1
               AND last_location_at IS NOT NULL
               AND last_location_at >= ?1
             ORDER BY last_location_at DESC
             LIMIT ?2",
        )
        .bind(cutoff.to_rfc3339())
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("live locations: {e}")))?;

        let mut feed = Vec::with_capacity(rows.len());
        for row in &rows {
            let presence = row_to_presence(row)?;
            let (Some(latitude), Some(longitude), Some(captured_at)) = (
                presence.last_latitude,
                presence.last_longitude,
                presence.last_location_at,
            ) else {
                continue;
            };
            feed.push(LiveLocation {
                agent_id: presence.agent_id.clone(),
                latitude,
                longitude,
                accuracy_m: presence.last_accuracy_m,
                captured_at,
                effective_status: machine::effective_status(
                    &presence,
                    self.options.stale_after,
                    now,
                ),
            });
        }
        Ok(feed)
    }

    /// Write the snapshot, record the ledger transition, commit, publish.
    async fn commit_update(
        &self,
        mut tx: sqlx::Transaction<'_, Sqlite>,
        presence: AgentPresence,
        source: PresenceSource,
        now: DateTime<Utc>,
    ) -> Result<PresenceUpdate> {
        write_presence(&mut tx, &presence).await?;

        let effective = machine::effective_status(&presence, self.options.stale_after, now);
        let transitioned =
            ledger::record_transition(&mut tx, &presence.agent_id, effective, source, now).await?;

        tx.commit()
            .await
            .map_err(|e| StoreError::Database(format!("presence commit: {e}")))?;

        if transitioned {
            info!(
                agent = %presence.agent_id,
                status = %effective,
                source = %source,
                "presence transition"
            );
            self.events.publish(DomainEvent::PresenceChanged {
                agent_id: presence.agent_id.to_string(),
                status: effective,
                source,
                timestamp: now,
            });
        } else {
            debug!(agent = %presence.agent_id, status = %effective, "heartbeat, no transition");
        }

        Ok(PresenceUpdate {
            presence,
            effective_status: effective,
            transitioned,
        })
    }

    /// Delete pings past retention, at most once per `prune_interval` in
    /// this process. Failure is logged and swallowed; retention must never
    /// fail a heartbeat.
    async fn maybe_prune(&self, now: DateTime<Utc>) {
        {
            let mut last = self.last_prune.lock().await;
            if let Some(previous) = *last {
                if previous.elapsed() < self.options.prune_interval {
                    return;
                }
            }
            *last = Some(Instant::now());
        }

        let cutoff = now - self.options.ping_retention;
        match sqlx::query("DELETE FROM agent_location_pings WHERE captured_at < ?1")
            .bind(cutoff.to_rfc3339())
            .execute(&self.pool)
            .await
        {
            Ok(result) if result.rows_affected() > 0 => {
                debug!(pruned = result.rows_affected(), "pruned old location pings");
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "location ping prune failed"),
        }
    }
}

/// Create the presence tables. Safe to run repeatedly.
pub(crate) async fn run_migrations(pool: &SqlitePool) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS agent_presence (
            agent_id                 TEXT PRIMARY KEY,
            status                   TEXT NOT NULL,
            last_seen_at             TEXT,
            manual_override_status   TEXT,
            manual_override_set_at   TEXT,
            location_sharing_enabled INTEGER NOT NULL DEFAULT 0,
            last_latitude            REAL,
            last_longitude           REAL,
            last_accuracy_m          REAL,
            last_location_at         TEXT,
            updated_at               TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| StoreError::MigrationFailed(format!("agent_presence table: {e}")))?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS agent_presence_events (
            id         INTEGER PRIMARY KEY AUTOINCREMENT,
            agent_id   TEXT NOT NULL,
            status     TEXT NOT NULL,
            started_at TEXT NOT NULL,
            ended_at   TEXT,
            source     TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| StoreError::MigrationFailed(format!("agent_presence_events table: {e}")))?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_presence_events_agent_started
         ON agent_presence_events(agent_id, started_at)",
    )
    .execute(pool)
    .await
    .map_err(|e| StoreError::MigrationFailed(format!("presence events index: {e}")))?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS agent_location_pings (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            agent_id    TEXT NOT NULL,
            latitude    REAL NOT NULL,
            longitude   REAL NOT NULL,
            accuracy_m  REAL,
            captured_at TEXT NOT NULL,
            source      TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| StoreError::MigrationFailed(format!("agent_location_pings table: {e}")))?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_location_pings_captured
         ON agent_location_pings(captured_at)",
    )
    .execute(pool)
    .await
    .map_err(|e| StoreError::MigrationFailed(format!("location pings index: {e}")))?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_location_pings_agent
         ON agent_location_pings(agent_id, captured_at)",
    )
    .execute(pool)
    .await
    .map_err(|e| StoreError::MigrationFailed(format!("location pings agent index: {e}")))?;

    debug!("presence migrations complete");
    Ok(())
}

async fn begin(pool: &SqlitePool) -> Result<sqlx::Transaction<'_, Sqlite>> {
    Ok(pool
        .begin()
        .await
        .map_err(|e| StoreError::Database(format!("presence transaction: {e}")))?)
}

async fn fetch_presence<'e, E>(
    executor: E,
    agent_id: &AgentId,
) -> Result<Option<AgentPresence>>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query("SELECT * FROM agent_presence WHERE agent_id = ?1")
        .bind(agent_id.as_str())
        .fetch_optional(executor)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("presence lookup: {e}")))?;

    match row {
        Some(row) => Ok(Some(row_to_presence(&row)?)),
        None => Ok(None),
    }
}

async fn write_presence(
    conn: &mut SqliteConnection,
    presence: &AgentPresence,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO agent_presence
            (agent_id, status, last_seen_at, manual_override_status, manual_override_set_at,
             location_sharing_enabled, last_latitude, last_longitude, last_accuracy_m,
             last_location_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
        ON CONFLICT(agent_id) DO UPDATE SET
            status = excluded.status,
            last_seen_at = excluded.last_seen_at,
            manual_override_status = excluded.manual_override_status,
            manual_override_set_at = excluded.manual_override_set_at,
            location_sharing_enabled = excluded.location_sharing_enabled,
            last_latitude = excluded.last_latitude,
            last_longitude = excluded.last_longitude,
            last_accuracy_m = excluded.last_accuracy_m,
            last_location_at = excluded.last_location_at,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(presence.agent_id.as_str())
    .bind(presence.status.as_str())
    .bind(presence.last_seen_at.map(|t| t.to_rfc3339()))
    .bind(presence.manual_override_status.map(|s| s.as_str()))
    .bind(presence.manual_override_set_at.map(|t| t.to_rfc3339()))
    .bind(presence.location_sharing_enabled)
    .bind(presence.last_latitude)
    .bind(presence.last_longitude)
    .bind(presence.last_accuracy_m)
    .bind(presence.last_location_at.map(|t| t.to_rfc3339()))
    .bind(presence.updated_at.to_rfc3339())
    .execute(conn)
    .await
    .map_err(|e| StoreError::Database(format!("presence upsert: {e}")))?;

    Ok(())
}

fn row_to_presence(row: &sqlx::sqlite::SqliteRow) -> Result<AgentPresence, StoreError> {
    let agent_id: String = row
        .try_get("agent_id")
        .map_err(|e| StoreError::QueryFailed(format!("agent_id column: {e}")))?;
    let status: String = row
        .try_get("status")
        .map_err(|e| StoreError::QueryFailed(format!("status column: {e}")))?;
    let last_seen_at: Option<String> = row
        .try_get("last_seen_at")
        .map_err(|e| StoreError::QueryFailed(format!("last_seen_at column: {e}")))?;
    let manual_override_status: Option<String> = row
        .try_get("manual_override_status")
        .map_err(|e| StoreError::QueryFailed(format!("manual_override_status column: {e}")))?;
    let manual_override_set_at: Option<String> = row
        .try_get("manual_override_set_at")
        .map_err(|e| StoreError::QueryFailed(format!("manual_override_set_at column: {e}")))?;
    let location_sharing_enabled: bool = row
        .try_get("location_sharing_enabled")
        .map_err(|e| StoreError::QueryFailed(format!("location_sharing_enabled column: {e}")))?;
    let last_latitude: Option<f64> = row
        .try_get("last_latitude")
        .map_err(|e| StoreError::QueryFailed(format!("last_latitude column: {e}")))?;
    let last_longitude: Option<f64> = row
        .try_get("last_longitude")
        .map_err(|e| StoreError::QueryFailed(format!("last_longitude column: {e}")))?;
    let last_accuracy_m: Option<f64> = row
        .try_get("last_accuracy_m")
        .map_err(|e| StoreError::QueryFailed(format!("last_accuracy_m column: {e}")))?;
    let last_location_at: Option<String> = row
        .try_get("last_location_at")
        .map_err(|e| StoreError::QueryFailed(format!("last_location_at column: {e}")))?;
    let updated_at: String = row
        .try_get("updated_at")
        .map_err(|e| StoreError::QueryFailed(format!("updated_at column: {e}")))?;

    let parse_status = |value: &str| {
        AgentStatus::parse(value)
            .ok_or_else(|| StoreError::QueryFailed(format!("unknown status '{value}'")))
    };

    Ok(AgentPresence {
        agent_id: AgentId(agent_id),
        status: parse_status(&status)?,
        last_seen_at: parse_opt_timestamp("last_seen_at", last_seen_at)?,
        manual_override_status: manual_override_status
            .as_deref()
            .map(parse_status)
            .transpose()?,
        manual_override_set_at: parse_opt_timestamp(
            "manual_override_set_at",
            manual_override_set_at,
        )?,
        location_sharing_enabled,
        last_latitude,
        last_longitude,
        last_accuracy_m,
        last_location_at: parse_opt_timestamp("last_location_at", last_location_at)?,
        updated_at: parse_timestamp("updated_at", &updated_at)?,
    })
}
