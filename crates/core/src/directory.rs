//! Directory trait — agents, teams, membership, and round-robin cursors.
//!
//! The routing engine never owns organizational data; it reads it through
//! this trait. The round-robin cursor lives here too since it is keyed by
//! `(team, rule)` and persists across process restarts.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::ids::{AgentId, RuleId, TeamId};

/// A human agent in the directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub name: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl Agent {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: AgentId::new(),
            name: name.into(),
            is_active: true,
            created_at: Utc::now(),
        }
    }
}

/// A team agents belong to. Routing rules target teams, never individual
/// agents directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Team {
    pub id: TeamId,
    pub name: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl Team {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: TeamId::new(),
            name: name.into(),
            is_active: true,
            created_at: Utc::now(),
        }
    }
}

/// Read/write access to the organizational directory.
///
/// Implementations: SQLite (production), in-memory stubs (tests).
#[async_trait]
pub trait Directory: Send + Sync {
    /// Look up an agent by id.
    async fn agent(&self, id: &AgentId) -> std::result::Result<Option<Agent>, StoreError>;

    /// Look up a team by id.
    async fn team(&self, id: &TeamId) -> std::result::Result<Option<Team>, StoreError>;

    /// Active members of a team: membership row active AND agent active.
    /// Ordered by agent creation time, oldest first, with the agent id as
    /// tiebreaker so the order is stable.
    async fn team_members(&self, team_id: &TeamId) -> std::result::Result<Vec<Agent>, StoreError>;

    /// Whether the agent holds an active membership in the team.
    async fn is_member(
        &self,
        team_id: &TeamId,
        agent_id: &AgentId,
    ) -> std::result::Result<bool, StoreError>;

    /// Last agent handed work by round-robin for this `(team, rule)` pair.
    async fn cursor(
        &self,
        team_id: &TeamId,
        rule_id: &RuleId,
    ) -> std::result::Result<Option<AgentId>, StoreError>;

    /// Persist the round-robin cursor. Must be durable before the routing
    /// decision that moved it is returned.
    async fn set_cursor(
        &self,
        team_id: &TeamId,
        rule_id: &RuleId,
        agent_id: &AgentId,
    ) -> std::result::Result<(), StoreError>;
}
