//! Effective-status derivation and routing eligibility.
//!
//! Both functions are pure: they take a snapshot, a staleness horizon, and
//! the current time, and never touch storage. Every consumer derives
//! availability through these two functions so the rules cannot drift apart.

use chrono::{DateTime, Duration, Utc};
use switchboard_core::presence::{AgentPresence, AgentStatus};

/// Derive the status shown on presence boards and used in reporting.
///
/// Precedence, highest first:
/// 1. A missing or stale heartbeat forces `offline`, even when a manual
///    override is set. A dead client cannot be on break.
/// 2. A manual override pins its status.
/// 3. Otherwise the raw heartbeat status stands.
///
/// A heartbeat aged exactly `stale_after` already counts as stale.
pub fn effective_status(
    presence: &AgentPresence,
    stale_after: Duration,
    now: DateTime<Utc>,
) -> AgentStatus {
    match presence.last_seen_at {
        None => AgentStatus::Offline,
        Some(seen) if now - seen >= stale_after => AgentStatus::Offline,
        Some(_) => presence
            .manual_override_status
            .unwrap_or(presence.status),
    }
}

/// Whether the agent may receive newly routed work.
///
/// Stricter than `effective_status`: any manual override disqualifies
/// (even a hypothetical `online` one), only raw `online`/`away` qualify,
/// and the heartbeat must be fresh.
pub fn is_presence_eligible(
    presence: &AgentPresence,
    stale_after: Duration,
    now: DateTime<Utc>,
) -> bool {
    if presence.manual_override_status.is_some() {
        return false;
    }
    if !matches!(presence.status, AgentStatus::Online | AgentStatus::Away) {
        return false;
    }
    match presence.last_seen_at {
        Some(seen) => now - seen < stale_after,
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchboard_core::ids::AgentId;

    fn presence(
        status: AgentStatus,
        seen_minutes_ago: Option<i64>,
        override_status: Option<AgentStatus>,
    ) -> AgentPresence {
        let mut p = AgentPresence::new(AgentId::from("a1"));
        p.status = status;
        p.last_seen_at = seen_minutes_ago.map(|m| Utc::now() - Duration::minutes(m));
        p.manual_override_status = override_status;
        p
    }

    const HORIZON: Duration = Duration::minutes(5);

    #[test]
    fn fresh_heartbeat_uses_raw_status() {
        let p = presence(AgentStatus::Away, Some(1), None);
        assert_eq!(effective_status(&p, HORIZON, Utc::now()), AgentStatus::Away);
    }

    #[test]
    fn override_beats_raw_status() {
        let p = presence(AgentStatus::Online, Some(1), Some(AgentStatus::OnBreak));
        assert_eq!(
            effective_status(&p, HORIZON, Utc::now()),
            AgentStatus::OnBreak
        );
    }

    #[test]
    fn staleness_beats_override() {
        let p = presence(AgentStatus::Online, Some(10), Some(AgentStatus::OnBreak));
        assert_eq!(
            effective_status(&p, HORIZON, Utc::now()),
            AgentStatus::Offline
        );
    }

    #[test]
    fn missing_heartbeat_is_offline() {
        let p = presence(AgentStatus::Online, None, None);
        assert_eq!(
            effective_status(&p, HORIZON, Utc::now()),
            AgentStatus::Offline
        );
    }

    #[test]
    fn heartbeat_at_exact_horizon_is_stale() {
        let now = Utc::now();
        let mut p = presence(AgentStatus::Online, None, None);
        p.last_seen_at = Some(now - HORIZON);
        assert_eq!(effective_status(&p, HORIZON, now), AgentStatus::Offline);
    }

    #[test]
    fn custom_horizon_is_respected() {
        let p = presence(AgentStatus::Online, Some(10), None);
        assert_eq!(
            effective_status(&p, Duration::minutes(30), Utc::now()),
            AgentStatus::Online
        );
    }

    #[test]
    fn eligibility_requires_fresh_online_or_away() {
        let now = Utc::now();
        assert!(is_presence_eligible(
            &presence(AgentStatus::Online, Some(1), None),
            HORIZON,
            now
        ));
        assert!(is_presence_eligible(
            &presence(AgentStatus::Away, Some(4), None),
            HORIZON,
            now
        ));
        assert!(!is_presence_eligible(
            &presence(AgentStatus::OnBreak, Some(1), None),
            HORIZON,
            now
        ));
        assert!(!is_presence_eligible(
            &presence(AgentStatus::Offline, Some(1), None),
            HORIZON,
            now
        ));
    }

    #[test]
    fn any_override_blocks_eligibility() {
        let p = presence(AgentStatus::Online, Some(1), Some(AgentStatus::OnBreak));
        assert!(!is_presence_eligible(&p, HORIZON, Utc::now()));
    }

    #[test]
    fn stale_or_missing_heartbeat_blocks_eligibility() {
        let now = Utc::now();
        assert!(!is_presence_eligible(
            &presence(AgentStatus::Online, Some(10), None),
            HORIZON,
            now
        ));
        assert!(!is_presence_eligible(
            &presence(AgentStatus::Online, None, None),
            HORIZON,
            now
        ));
    }
}
