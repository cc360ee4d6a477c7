//! Presence domain types.
//!
//! An agent's availability is tracked from two angles: the **raw** status
//! reported by heartbeats (or pinned by a manual override), and the
//! **effective** status derived from the raw status plus heartbeat freshness.
//! Only the raw pieces are stored; the effective status is always computed.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::AgentId;

/// Availability status of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Online,
    Away,
    OnBreak,
    Offline,
}

impl AgentStatus {
    /// All statuses, in display order.
    pub const ALL: [AgentStatus; 4] = [
        AgentStatus::Online,
        AgentStatus::Away,
        AgentStatus::OnBreak,
        AgentStatus::Offline,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Online => "online",
            AgentStatus::Away => "away",
            AgentStatus::OnBreak => "on_break",
            AgentStatus::Offline => "offline",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "online" => Some(AgentStatus::Online),
            "away" => Some(AgentStatus::Away),
            "on_break" => Some(AgentStatus::OnBreak),
            "offline" => Some(AgentStatus::Offline),
            _ => None,
        }
    }

    /// Whether this status may be pinned as a manual override.
    /// Only pause-like states qualify; `online`/`away` come from heartbeats.
    pub fn overridable(&self) -> bool {
        matches!(self, AgentStatus::OnBreak | AgentStatus::Offline)
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Where a presence or location update originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceSource {
    /// Emitted automatically by a client (heartbeat timer, device GPS).
    #[default]
    Auto,
    /// Triggered by an explicit human action.
    Manual,
}

impl PresenceSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            PresenceSource::Auto => "auto",
            PresenceSource::Manual => "manual",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "auto" => Some(PresenceSource::Auto),
            "manual" => Some(PresenceSource::Manual),
            _ => None,
        }
    }
}

impl std::fmt::Display for PresenceSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Current presence snapshot for one agent. One row per agent, created
/// lazily on the first heartbeat or override.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentPresence {
    pub agent_id: AgentId,

    /// Raw status as last reported by the client.
    pub status: AgentStatus,

    /// When the last heartbeat arrived. `None` until the first heartbeat.
    pub last_seen_at: Option<DateTime<Utc>>,

    /// Manually pinned status, if any. Always `on_break` or `offline`.
    pub manual_override_status: Option<AgentStatus>,

    pub manual_override_set_at: Option<DateTime<Utc>>,

    /// Whether the agent shares device location.
    pub location_sharing_enabled: bool,

    pub last_latitude: Option<f64>,
    pub last_longitude: Option<f64>,
    pub last_accuracy_m: Option<f64>,
    pub last_location_at: Option<DateTime<Utc>>,

    pub updated_at: DateTime<Utc>,
}

impl AgentPresence {
    /// A blank snapshot for an agent that has never checked in. Raw status
    /// starts `online` so the first heartbeat alone makes the agent visible;
    /// with no `last_seen_at` the effective status is still `offline`.
    pub fn new(agent_id: AgentId) -> Self {
        Self {
            agent_id,
            status: AgentStatus::Online,
            last_seen_at: None,
            manual_override_status: None,
            manual_override_set_at: None,
            location_sharing_enabled: false,
            last_latitude: None,
            last_longitude: None,
            last_accuracy_m: None,
            last_location_at: None,
            updated_at: Utc::now(),
        }
    }
}

/// One closed or open interval in the presence ledger: the agent held
/// `status` from `started_at` until `ended_at` (`None` while ongoing).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceEvent {
    pub id: i64,
    pub agent_id: AgentId,
    pub status: AgentStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub source: PresenceSource,
}

/// A single device location sample.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationPing {
    pub id: i64,
    pub agent_id: AgentId,
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy_m: Option<f64>,
    pub captured_at: DateTime<Utc>,
    pub source: PresenceSource,
}

/// Latest shared location of an agent, joined with the effective status
/// at read time. Served on the live map feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveLocation {
    pub agent_id: AgentId,
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy_m: Option<f64>,
    pub captured_at: DateTime<Utc>,
    pub effective_status: AgentStatus,
}

/// Seconds spent in each status over some window. Every status is present
/// as a key, zero-filled, so consumers never need a missing-key fallback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSeconds(BTreeMap<AgentStatus, i64>);

impl StatusSeconds {
    pub fn zeroed() -> Self {
        Self(AgentStatus::ALL.iter().map(|s| (*s, 0)).collect())
    }

    pub fn add(&mut self, status: AgentStatus, seconds: i64) {
        *self.0.entry(status).or_insert(0) += seconds;
    }

    pub fn get(&self, status: AgentStatus) -> i64 {
        self.0.get(&status).copied().unwrap_or(0)
    }

    pub fn total(&self) -> i64 {
        self.0.values().sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (AgentStatus, i64)> + '_ {
        self.0.iter().map(|(s, v)| (*s, *v))
    }
}

impl Default for StatusSeconds {
    fn default() -> Self {
        Self::zeroed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serializes_snake_case() {
        assert_eq!(serde_json::to_string(&AgentStatus::OnBreak).unwrap(), "\"on_break\"");
        assert_eq!(serde_json::to_string(&AgentStatus::Online).unwrap(), "\"online\"");
        let parsed: AgentStatus = serde_json::from_str("\"away\"").unwrap();
        assert_eq!(parsed, AgentStatus::Away);
    }

    #[test]
    fn status_parse_rejects_unknown() {
        assert_eq!(AgentStatus::parse("on_break"), Some(AgentStatus::OnBreak));
        assert_eq!(AgentStatus::parse("busy"), None);
    }

    #[test]
    fn only_pause_states_are_overridable() {
        assert!(AgentStatus::OnBreak.overridable());
        assert!(AgentStatus::Offline.overridable());
        assert!(!AgentStatus::Online.overridable());
        assert!(!AgentStatus::Away.overridable());
    }

    #[test]
    fn fresh_presence_has_no_heartbeat() {
        let presence = AgentPresence::new(AgentId::from("a1"));
        assert_eq!(presence.status, AgentStatus::Online);
        assert!(presence.last_seen_at.is_none());
        assert!(presence.manual_override_status.is_none());
        assert!(!presence.location_sharing_enabled);
    }

    #[test]
    fn status_seconds_starts_zero_filled() {
        let seconds = StatusSeconds::zeroed();
        for status in AgentStatus::ALL {
            assert_eq!(seconds.get(status), 0);
        }
        assert_eq!(seconds.total(), 0);
    }

    #[test]
    fn status_seconds_accumulates() {
        let mut seconds = StatusSeconds::zeroed();
        seconds.add(AgentStatus::Online, 120);
        seconds.add(AgentStatus::Online, 30);
        seconds.add(AgentStatus::OnBreak, 15);
        assert_eq!(seconds.get(AgentStatus::Online), 150);
        assert_eq!(seconds.get(AgentStatus::OnBreak), 15);
        assert_eq!(seconds.get(AgentStatus::Away), 0);
        assert_eq!(seconds.total(), 165);
    }

    #[test]
    fn status_seconds_serializes_with_status_keys() {
        let mut seconds = StatusSeconds::zeroed();
        seconds.add(AgentStatus::Away, 42);
        let json = serde_json::to_string(&seconds).unwrap();
        assert!(json.contains("\"away\":42"));
        assert!(json.contains("\"on_break\":0"));
    }
}
