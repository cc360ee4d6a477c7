//! Conversation and assignment domain types.
//!
//! A conversation is an inbound customer thread on some channel. At any
//! moment it has at most one **active** assignment row binding it to an
//! agent, a team, or both; superseded rows are kept inactive for history.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::ids::{AgentId, ConversationId, TeamId};

/// A customer conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,

    /// Channel the conversation arrived on, e.g. `"email"`, `"chat"`.
    pub channel_type: String,

    /// Channel-specific inbox/account the conversation belongs to, when the
    /// channel distinguishes them (a mailbox address, a widget id).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_target_id: Option<String>,

    /// Resolved conversations no longer count toward agent load.
    pub is_resolved: bool,

    pub created_at: DateTime<Utc>,
}

impl Conversation {
    pub fn new(channel_type: impl Into<String>, channel_target_id: Option<String>) -> Self {
        Self {
            id: ConversationId::new(),
            channel_type: channel_type.into(),
            channel_target_id,
            is_resolved: false,
            created_at: Utc::now(),
        }
    }
}

/// An inbound message, the unit the routing engine evaluates rules against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub conversation_id: ConversationId,
    pub channel_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_target_id: Option<String>,
    pub body: String,
}

/// One assignment row. `agent_id` and `team_id` are each optional: a
/// team-only row parks the conversation on a queue, an agent-only row is a
/// direct manual grab.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationAssignment {
    pub id: i64,
    pub conversation_id: ConversationId,
    pub agent_id: Option<AgentId>,
    pub team_id: Option<TeamId>,

    /// Who performed the assignment. `None` for automatic routing.
    pub assigned_by_id: Option<AgentId>,

    pub assigned_at: DateTime<Utc>,
    pub is_active: bool,
}

/// Payload for creating an assignment row.
#[derive(Debug, Clone)]
pub struct NewAssignment {
    pub conversation_id: ConversationId,
    pub agent_id: Option<AgentId>,
    pub team_id: Option<TeamId>,
    pub assigned_by_id: Option<AgentId>,
}

/// Persistence for conversations and their assignment history.
#[async_trait]
pub trait Conversations: Send + Sync {
    /// Look up a conversation by id.
    async fn conversation(
        &self,
        id: &ConversationId,
    ) -> std::result::Result<Option<Conversation>, StoreError>;

    /// The single active assignment, if any.
    async fn active_assignment(
        &self,
        conversation_id: &ConversationId,
    ) -> std::result::Result<Option<ConversationAssignment>, StoreError>;

    /// Deactivate every active assignment for the conversation and insert
    /// one new active row, in a single transaction.
    async fn create_or_supersede_assignment(
        &self,
        new: NewAssignment,
    ) -> std::result::Result<ConversationAssignment, StoreError>;

    /// Deactivate every active assignment. Returns how many rows changed.
    async fn deactivate_assignments(
        &self,
        conversation_id: &ConversationId,
    ) -> std::result::Result<u64, StoreError>;

    /// Count active assignments on unresolved conversations per agent.
    /// Agents with no load are absent from the map.
    async fn active_assignment_counts(
        &self,
        agent_ids: &[AgentId],
    ) -> std::result::Result<HashMap<AgentId, i64>, StoreError>;
}
