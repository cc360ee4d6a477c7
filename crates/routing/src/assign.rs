//! The assignment gateway.
//!
//! Every assignment, manual or automatic, goes through
//! [`AssignmentGateway::assign`]. The gateway owns the availability check:
//! a manual assignment to an unavailable agent is rejected, an automatic
//! one degrades to a team-only assignment so the conversation stays in
//! the team's queue instead of landing on a dead desk.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use switchboard_core::conversation::{
    ConversationAssignment, Conversations, NewAssignment,
};
use switchboard_core::directory::Directory;
use switchboard_core::error::{AssignmentError, Result};
use switchboard_core::event::{DomainEvent, EventBus};
use switchboard_core::ids::{AgentId, ConversationId, TeamId};
use switchboard_core::presence::{AgentPresence, AgentStatus};
use switchboard_core::routing::RoutingDecision;
use switchboard_presence::PresenceStore;
use tracing::{info, warn};

/// One assignment attempt.
#[derive(Debug, Clone)]
pub struct AssignmentRequest {
    pub conversation_id: ConversationId,
    pub agent_id: Option<AgentId>,
    pub team_id: Option<TeamId>,

    /// Who is performing the assignment. `None` marks it automatic.
    pub assigned_by_id: Option<AgentId>,

    /// Degrade to a team-only assignment when the agent is unavailable
    /// instead of failing. Automatic flows set this; manual ones must not.
    pub degrade_on_unavailable: bool,
}

impl AssignmentRequest {
    /// Build the automatic request for a routing decision.
    pub fn from_decision(conversation_id: ConversationId, decision: &RoutingDecision) -> Self {
        Self {
            conversation_id,
            agent_id: decision.agent_id.clone(),
            team_id: Some(decision.team_id.clone()),
            assigned_by_id: None,
            degrade_on_unavailable: true,
        }
    }
}

/// What the gateway did with a request.
#[derive(Debug, Clone)]
pub struct AssignmentOutcome {
    /// The active assignment row, `None` when the request cleared the
    /// assignment entirely.
    pub assignment: Option<ConversationAssignment>,

    /// True when an unavailable agent was dropped from the request.
    pub degraded: bool,
}

pub struct AssignmentGateway {
    directory: Arc<dyn Directory>,
    conversations: Arc<dyn Conversations>,
    presence: Arc<PresenceStore>,
    events: Arc<EventBus>,
}

impl AssignmentGateway {
    pub fn new(
        directory: Arc<dyn Directory>,
        conversations: Arc<dyn Conversations>,
        presence: Arc<PresenceStore>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            directory,
            conversations,
            presence,
            events,
        }
    }

    pub async fn assign(&self, request: AssignmentRequest) -> Result<AssignmentOutcome> {
        if self
            .conversations
            .conversation(&request.conversation_id)
            .await?
            .is_none()
        {
            return Err(
                AssignmentError::ConversationNotFound(request.conversation_id.to_string()).into(),
            );
        }

        // A request naming nobody clears the assignment.
        if request.agent_id.is_none() && request.team_id.is_none() {
            self.clear(&request.conversation_id).await?;
            return Ok(AssignmentOutcome {
                assignment: None,
                degraded: false,
            });
        }

        if let Some(team_id) = &request.team_id {
            let team = self
                .directory
                .team(team_id)
                .await?
                .ok_or_else(|| AssignmentError::TeamNotFound(team_id.to_string()))?;
            if !team.is_active {
                return Err(AssignmentError::TeamInactive(team_id.to_string()).into());
            }
        }

        let mut agent_id = request.agent_id.clone();
        let mut degraded = false;
        if let Some(agent) = &request.agent_id {
            if let Some(reason) = self
                .ineligibility_reason(agent, request.team_id.as_ref())
                .await?
            {
                let manual = request.assigned_by_id.is_some();
                if manual || !request.degrade_on_unavailable {
                    return Err(AssignmentError::AgentUnavailable {
                        agent: agent.to_string(),
                        reason,
                    }
                    .into());
                }

                warn!(
                    conversation = %request.conversation_id,
                    agent = %agent,
                    reason = %reason,
                    "dropping unavailable agent from automatic assignment"
                );
                self.events.publish(DomainEvent::AssignmentDegraded {
                    conversation_id: request.conversation_id.to_string(),
                    dropped_agent_id: agent.to_string(),
                    team_id: request.team_id.as_ref().map(|id| id.to_string()),
                    reason,
                    timestamp: Utc::now(),
                });
                agent_id = None;
                degraded = true;
            }
        }

        // Degraded all the way to nobody: clear instead of writing an
        // empty assignment row.
        if agent_id.is_none() && request.team_id.is_none() {
            self.clear(&request.conversation_id).await?;
            return Ok(AssignmentOutcome {
                assignment: None,
                degraded,
            });
        }

        let assignment = self
            .conversations
            .create_or_supersede_assignment(NewAssignment {
                conversation_id: request.conversation_id.clone(),
                agent_id: agent_id.clone(),
                team_id: request.team_id.clone(),
                assigned_by_id: request.assigned_by_id.clone(),
            })
            .await?;

        info!(
            conversation = %assignment.conversation_id,
            agent = agent_id.as_ref().map(|id| id.as_str()).unwrap_or("-"),
            team = request.team_id.as_ref().map(|id| id.as_str()).unwrap_or("-"),
            manual = request.assigned_by_id.is_some(),
            "conversation assigned"
        );
        self.events.publish(DomainEvent::ConversationAssigned {
            conversation_id: assignment.conversation_id.to_string(),
            agent_id: agent_id.map(|id| id.to_string()),
            team_id: request.team_id.map(|id| id.to_string()),
            assigned_by_id: request.assigned_by_id.map(|id| id.to_string()),
            timestamp: Utc::now(),
        });

        Ok(AssignmentOutcome {
            assignment: Some(assignment),
            degraded,
        })
    }

    /// Deactivate every active assignment on the conversation. Returns how
    /// many rows were cleared.
    pub async fn unassign(&self, conversation_id: &ConversationId) -> Result<u64> {
        if self
            .conversations
            .conversation(conversation_id)
            .await?
            .is_none()
        {
            return Err(AssignmentError::ConversationNotFound(conversation_id.to_string()).into());
        }

        let cleared = self.conversations.deactivate_assignments(conversation_id).await?;
        if cleared > 0 {
            info!(conversation = %conversation_id, cleared, "conversation unassigned");
            self.events.publish(DomainEvent::ConversationUnassigned {
                conversation_id: conversation_id.to_string(),
                timestamp: Utc::now(),
            });
        }
        Ok(cleared)
    }

    async fn clear(&self, conversation_id: &ConversationId) -> Result<bool> {
        let cleared = self.conversations.deactivate_assignments(conversation_id).await?;
        if cleared > 0 {
            self.events.publish(DomainEvent::ConversationUnassigned {
                conversation_id: conversation_id.to_string(),
                timestamp: Utc::now(),
            });
        }
        Ok(cleared > 0)
    }

    /// Why this agent cannot take the assignment, or `None` if they can.
    /// An unknown agent id is a hard error rather than a reason: degrading
    /// would paper over a caller bug.
    async fn ineligibility_reason(
        &self,
        agent_id: &AgentId,
        team_id: Option<&TeamId>,
    ) -> Result<Option<String>> {
        let agent = self
            .directory
            .agent(agent_id)
            .await?
            .ok_or_else(|| AssignmentError::AgentNotFound(agent_id.to_string()))?;
        if !agent.is_active {
            return Ok(Some("agent is deactivated".to_string()));
        }

        if let Some(team_id) = team_id {
            if !self.directory.is_member(team_id, agent_id).await? {
                return Ok(Some(format!(
                    "not an active member of team '{team_id}'"
                )));
            }
        }

        let Some(presence) = self.presence.presence(agent_id).await? else {
            return Ok(Some("no presence recorded for this agent".to_string()));
        };
        Ok(presence_block_reason(
            &presence,
            self.presence.stale_after(),
            Utc::now(),
        ))
    }
}

/// The presence-level reason an agent cannot take work, mirroring the
/// eligibility rule: no override of any kind, raw status online or away,
/// and a fresh heartbeat.
fn presence_block_reason(
    presence: &AgentPresence,
    stale_after: Duration,
    now: DateTime<Utc>,
) -> Option<String> {
    if let Some(status) = presence.manual_override_status {
        return Some(format!("a manual '{status}' override is pinned"));
    }
    if !matches!(presence.status, AgentStatus::Online | AgentStatus::Away) {
        return Some(format!("status is '{}'", presence.status));
    }
    match presence.last_seen_at {
        Some(seen) if now - seen < stale_after => None,
        Some(_) => Some("heartbeat is stale".to_string()),
        None => Some("no heartbeat received yet".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::SqlitePool;
    use switchboard_core::conversation::Conversation;
    use switchboard_core::directory::{Agent, Team};
    use switchboard_core::error::{Error, ErrorKind};
    use switchboard_core::presence::PresenceSource;
    use switchboard_presence::PresenceOptions;
    use switchboard_store::{Database, SqliteConversations, SqliteDirectory};

    struct Fixture {
        pool: SqlitePool,
        directory: Arc<SqliteDirectory>,
        conversations: Arc<SqliteConversations>,
        presence: Arc<PresenceStore>,
        events: Arc<EventBus>,
        gateway: AssignmentGateway,
    }

    async fn setup() -> Fixture {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        let pool = db.pool().clone();
        let directory = Arc::new(SqliteDirectory::new(pool.clone()));
        let conversations = Arc::new(SqliteConversations::new(pool.clone()));
        let events = Arc::new(EventBus::default());
        let presence = Arc::new(
            PresenceStore::new(pool.clone(), PresenceOptions::default(), events.clone())
                .await
                .unwrap(),
        );
        let gateway = AssignmentGateway::new(
            directory.clone(),
            conversations.clone(),
            presence.clone(),
            events.clone(),
        );
        Fixture {
            pool,
            directory,
            conversations,
            presence,
            events,
            gateway,
        }
    }

    impl Fixture {
        async fn add_agent(&self, id: &str) -> AgentId {
            let mut agent = Agent::new(id);
            agent.id = AgentId::from(id);
            self.directory.upsert_agent(&agent).await.unwrap();
            agent.id
        }

        async fn add_team(&self, id: &str, members: &[&AgentId]) -> TeamId {
            let mut team = Team::new(id);
            team.id = TeamId::from(id);
            self.directory.upsert_team(&team).await.unwrap();
            for member in members {
                self.directory.add_member(&team.id, member).await.unwrap();
            }
            team.id
        }

        async fn heartbeat(&self, agent: &AgentId, status: AgentStatus) {
            self.presence
                .upsert_heartbeat(agent, Some(status), PresenceSource::Auto)
                .await
                .unwrap();
        }

        async fn conversation(&self) -> ConversationId {
            let conversation = Conversation::new("chat", None);
            self.conversations.create(&conversation).await.unwrap();
            conversation.id
        }

        fn manual(
            &self,
            conversation_id: &ConversationId,
            agent: &AgentId,
            team: &TeamId,
            by: &AgentId,
        ) -> AssignmentRequest {
            AssignmentRequest {
                conversation_id: conversation_id.clone(),
                agent_id: Some(agent.clone()),
                team_id: Some(team.clone()),
                assigned_by_id: Some(by.clone()),
                degrade_on_unavailable: false,
            }
        }
    }

    #[tokio::test]
    async fn manual_assignment_to_available_agent_succeeds() {
        let fx = setup().await;
        let agent = fx.add_agent("a1").await;
        let admin = fx.add_agent("admin").await;
        let team = fx.add_team("team_support", &[&agent]).await;
        fx.heartbeat(&agent, AgentStatus::Online).await;
        let conversation = fx.conversation().await;

        let mut rx = fx.events.subscribe();
        let outcome = fx
            .gateway
            .assign(fx.manual(&conversation, &agent, &team, &admin))
            .await
            .unwrap();

        assert!(!outcome.degraded);
        let assignment = outcome.assignment.unwrap();
        assert_eq!(assignment.agent_id, Some(agent.clone()));
        assert_eq!(assignment.team_id, Some(team));
        assert_eq!(assignment.assigned_by_id, Some(admin));
        assert!(assignment.is_active);

        let event = rx.recv().await.unwrap();
        match event.as_ref() {
            DomainEvent::ConversationAssigned {
                conversation_id,
                agent_id,
                ..
            } => {
                assert_eq!(conversation_id, conversation.as_str());
                assert_eq!(agent_id.as_deref(), Some(agent.as_str()));
            }
            other => panic!("expected ConversationAssigned, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_manual_assignment_rejects_offline_agent() {
        let fx = setup().await;
        let agent = fx.add_agent("a1").await;
        let admin = fx.add_agent("admin").await;
        let team = fx.add_team("team_support", &[&agent]).await;
        fx.heartbeat(&agent, AgentStatus::Offline).await;
        let conversation = fx.conversation().await;

        let err = fx
            .gateway
            .assign(fx.manual(&conversation, &agent, &team, &admin))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert!(matches!(
            err,
            Error::Assignment(AssignmentError::AgentUnavailable { .. })
        ));
        assert!(err.to_string().contains("offline"));

        // Nothing was written.
        assert!(fx
            .conversations
            .active_assignment(&conversation)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_manual_assignment_rejects_agent_without_presence() {
        let fx = setup().await;
        let agent = fx.add_agent("a1").await;
        let admin = fx.add_agent("admin").await;
        let team = fx.add_team("team_support", &[&agent]).await;
        let conversation = fx.conversation().await;

        let err = fx
            .gateway
            .assign(fx.manual(&conversation, &agent, &team, &admin))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert!(err.to_string().contains("no presence"));
    }

    #[tokio::test]
    async fn manual_assignment_rejects_stale_agent() {
        let fx = setup().await;
        let agent = fx.add_agent("a1").await;
        let admin = fx.add_agent("admin").await;
        let team = fx.add_team("team_support", &[&agent]).await;
        fx.heartbeat(&agent, AgentStatus::Online).await;
        let past = (Utc::now() - Duration::minutes(10)).to_rfc3339();
        sqlx::query("UPDATE agent_presence SET last_seen_at = ?1 WHERE agent_id = ?2")
            .bind(&past)
            .bind(agent.as_str())
            .execute(&fx.pool)
            .await
            .unwrap();
        let conversation = fx.conversation().await;

        let err = fx
            .gateway
            .assign(fx.manual(&conversation, &agent, &team, &admin))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert!(err.to_string().contains("stale"));
    }

    #[tokio::test]
    async fn manual_assignment_rejects_non_member() {
        let fx = setup().await;
        let outsider = fx.add_agent("outsider").await;
        let member = fx.add_agent("member").await;
        let admin = fx.add_agent("admin").await;
        let team = fx.add_team("team_support", &[&member]).await;
        fx.heartbeat(&outsider, AgentStatus::Online).await;
        let conversation = fx.conversation().await;

        let err = fx
            .gateway
            .assign(fx.manual(&conversation, &outsider, &team, &admin))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert!(err.to_string().contains("member"));
    }

    #[tokio::test]
    async fn test_auto_assignment_drops_unavailable_agent_and_keeps_team() {
        let fx = setup().await;
        let agent = fx.add_agent("a1").await;
        let team = fx.add_team("team_support", &[&agent]).await;
        fx.heartbeat(&agent, AgentStatus::Online).await;
        fx.presence
            .set_manual_override(&agent, AgentStatus::OnBreak)
            .await
            .unwrap();
        let conversation = fx.conversation().await;

        let mut rx = fx.events.subscribe();
        let request = AssignmentRequest {
            conversation_id: conversation.clone(),
            agent_id: Some(agent.clone()),
            team_id: Some(team.clone()),
            assigned_by_id: None,
            degrade_on_unavailable: true,
        };
        let outcome = fx.gateway.assign(request).await.unwrap();

        assert!(outcome.degraded);
        let assignment = outcome.assignment.unwrap();
        assert_eq!(assignment.agent_id, None);
        assert_eq!(assignment.team_id, Some(team));

        let first = rx.recv().await.unwrap();
        assert!(matches!(
            first.as_ref(),
            DomainEvent::AssignmentDegraded { dropped_agent_id, .. } if dropped_agent_id == agent.as_str()
        ));
        let second = rx.recv().await.unwrap();
        assert!(matches!(
            second.as_ref(),
            DomainEvent::ConversationAssigned { agent_id: None, .. }
        ));
    }

    #[tokio::test]
    async fn auto_degrade_without_team_clears_the_assignment() {
        let fx = setup().await;
        let agent = fx.add_agent("a1").await;
        let conversation = fx.conversation().await;
        // Parked on the agent previously
        fx.conversations
            .create_or_supersede_assignment(NewAssignment {
                conversation_id: conversation.clone(),
                agent_id: Some(agent.clone()),
                team_id: None,
                assigned_by_id: None,
            })
            .await
            .unwrap();

        let request = AssignmentRequest {
            conversation_id: conversation.clone(),
            agent_id: Some(agent.clone()),
            team_id: None,
            assigned_by_id: None,
            degrade_on_unavailable: true,
        };
        let outcome = fx.gateway.assign(request).await.unwrap();

        assert!(outcome.degraded);
        assert!(outcome.assignment.is_none());
        assert!(fx
            .conversations
            .active_assignment(&conversation)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn empty_request_clears_the_assignment() {
        let fx = setup().await;
        let agent = fx.add_agent("a1").await;
        let team = fx.add_team("team_support", &[&agent]).await;
        fx.heartbeat(&agent, AgentStatus::Online).await;
        let conversation = fx.conversation().await;
        let admin = fx.add_agent("admin").await;
        fx.gateway
            .assign(fx.manual(&conversation, &agent, &team, &admin))
            .await
            .unwrap();

        let outcome = fx
            .gateway
            .assign(AssignmentRequest {
                conversation_id: conversation.clone(),
                agent_id: None,
                team_id: None,
                assigned_by_id: Some(admin),
                degrade_on_unavailable: false,
            })
            .await
            .unwrap();
        assert!(outcome.assignment.is_none());
        assert!(fx
            .conversations
            .active_assignment(&conversation)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn unassign_clears_and_reports_count() {
        let fx = setup().await;
        let agent = fx.add_agent("a1").await;
        let team = fx.add_team("team_support", &[&agent]).await;
        fx.heartbeat(&agent, AgentStatus::Online).await;
        let admin = fx.add_agent("admin").await;
        let conversation = fx.conversation().await;
        fx.gateway
            .assign(fx.manual(&conversation, &agent, &team, &admin))
            .await
            .unwrap();

        let mut rx = fx.events.subscribe();
        assert_eq!(fx.gateway.unassign(&conversation).await.unwrap(), 1);
        assert!(matches!(
            rx.recv().await.unwrap().as_ref(),
            DomainEvent::ConversationUnassigned { .. }
        ));

        // Second call clears nothing and stays silent.
        assert_eq!(fx.gateway.unassign(&conversation).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn unknown_conversation_is_not_found() {
        let fx = setup().await;
        let err = fx
            .gateway
            .unassign(&ConversationId::from("ghost"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn unknown_agent_is_a_hard_error_even_when_degrading() {
        let fx = setup().await;
        let team = fx.add_team("team_support", &[]).await;
        let conversation = fx.conversation().await;

        let request = AssignmentRequest {
            conversation_id: conversation,
            agent_id: Some(AgentId::from("ghost")),
            team_id: Some(team),
            assigned_by_id: None,
            degrade_on_unavailable: true,
        };
        let err = fx.gateway.assign(request).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(matches!(
            err,
            Error::Assignment(AssignmentError::AgentNotFound(_))
        ));
    }

    #[tokio::test]
    async fn inactive_team_is_rejected() {
        let fx = setup().await;
        let agent = fx.add_agent("a1").await;
        let admin = fx.add_agent("admin").await;
        let team = fx.add_team("team_support", &[&agent]).await;
        fx.heartbeat(&agent, AgentStatus::Online).await;

        let mut dormant = Team::new("team_support");
        dormant.id = team.clone();
        dormant.is_active = false;
        fx.directory.upsert_team(&dormant).await.unwrap();

        let conversation = fx.conversation().await;
        let err = fx
            .gateway
            .assign(fx.manual(&conversation, &agent, &team, &admin))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn team_only_manual_assignment_parks_the_conversation() {
        let fx = setup().await;
        let admin = fx.add_agent("admin").await;
        let team = fx.add_team("team_support", &[]).await;
        let conversation = fx.conversation().await;

        let outcome = fx
            .gateway
            .assign(AssignmentRequest {
                conversation_id: conversation.clone(),
                agent_id: None,
                team_id: Some(team.clone()),
                assigned_by_id: Some(admin),
                degrade_on_unavailable: false,
            })
            .await
            .unwrap();

        let assignment = outcome.assignment.unwrap();
        assert_eq!(assignment.agent_id, None);
        assert_eq!(assignment.team_id, Some(team));
    }
}
