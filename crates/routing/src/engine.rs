//! First-match-wins evaluation of routing rules against inbound messages.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use switchboard_core::conversation::{Conversations, InboundMessage};
use switchboard_core::directory::{Agent, Directory};
use switchboard_core::error::{Result, RoutingError};
use switchboard_core::ids::TeamId;
use switchboard_core::routing::{RoutingDecision, Strategy};
use switchboard_presence::{is_presence_eligible, PresenceStore};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::rules::{rule_matches, RuleStore};
use crate::select;

/// Evaluates active rules for a channel, oldest first, and produces a
/// [`RoutingDecision`] from the first rule that matches and targets a
/// usable team. The decision may still carry no agent when nobody on
/// the team is eligible.
pub struct RoutingRuleEngine {
    rules: Arc<RuleStore>,
    directory: Arc<dyn Directory>,
    conversations: Arc<dyn Conversations>,
    presence: Arc<PresenceStore>,
    cursor_lock: Mutex<()>,
}

impl RoutingRuleEngine {
    pub fn new(
        rules: Arc<RuleStore>,
        directory: Arc<dyn Directory>,
        conversations: Arc<dyn Conversations>,
        presence: Arc<PresenceStore>,
    ) -> Self {
        Self {
            rules,
            directory,
            conversations,
            presence,
            cursor_lock: Mutex::new(()),
        }
    }

    /// Route one inbound message. Returns `None` when the conversation is
    /// already with an agent or no rule matched. A conversation parked on
    /// a team without an agent is still routed, so it can pick up an agent
    /// who came online since.
    pub async fn apply_routing(&self, message: &InboundMessage) -> Result<Option<RoutingDecision>> {
        if self
            .conversations
            .conversation(&message.conversation_id)
            .await?
            .is_none()
        {
            return Err(
                RoutingError::ConversationNotFound(message.conversation_id.to_string()).into(),
            );
        }

        if let Some(existing) = self
            .conversations
            .active_assignment(&message.conversation_id)
            .await?
        {
            if existing.agent_id.is_some() {
                debug!(
                    conversation = %message.conversation_id,
                    "already assigned to an agent, not rerouting"
                );
                return Ok(None);
            }
        }

        for rule in self.rules.active_rules(&message.channel_type).await? {
            if !rule_matches(&rule, message) {
                continue;
            }

            let team = match self.directory.team(&rule.team_id).await? {
                Some(team) if team.is_active => team,
                Some(_) => {
                    debug!(rule = %rule.id, team = %rule.team_id, "team inactive, trying next rule");
                    continue;
                }
                None => {
                    debug!(rule = %rule.id, team = %rule.team_id, "team missing, trying next rule");
                    continue;
                }
            };

            let eligible = self.eligible_agents(&team.id).await?;
            let agent_id = match rule.config.strategy {
                Strategy::RoundRobin => {
                    // Cursor read and advance must not interleave across
                    // concurrent messages.
                    let _guard = self.cursor_lock.lock().await;
                    select::round_robin(self.directory.as_ref(), &team.id, &rule.id, &eligible)
                        .await?
                }
                Strategy::LeastLoaded => {
                    select::least_loaded(self.conversations.as_ref(), &eligible).await?
                }
            };

            info!(
                conversation = %message.conversation_id,
                rule = %rule.id,
                team = %team.id,
                agent = agent_id.as_ref().map(|id| id.as_str()).unwrap_or("-"),
                strategy = %rule.config.strategy,
                "routing decision"
            );
            return Ok(Some(RoutingDecision {
                rule_id: rule.id,
                team_id: team.id,
                agent_id,
                strategy: rule.config.strategy,
            }));
        }

        debug!(
            conversation = %message.conversation_id,
            channel = %message.channel_type,
            "no routing rule matched"
        );
        Ok(None)
    }

    /// Active team members that presence allows to take new work: a fresh
    /// heartbeat, an online or away raw status, and no manual override.
    /// Members who never checked in have no presence row and are out.
    async fn eligible_agents(&self, team_id: &TeamId) -> Result<Vec<Agent>> {
        let members = self.directory.team_members(team_id).await?;
        if members.is_empty() {
            return Ok(members);
        }

        let ids: Vec<_> = members.iter().map(|member| member.id.clone()).collect();
        let snapshots: HashMap<_, _> = self
            .presence
            .presence_of(&ids)
            .await?
            .into_iter()
            .map(|presence| (presence.agent_id.clone(), presence))
            .collect();

        let now = Utc::now();
        let stale_after = self.presence.stale_after();
        Ok(members
            .into_iter()
            .filter(|member| {
                snapshots
                    .get(&member.id)
                    .map(|presence| is_presence_eligible(presence, stale_after, now))
                    .unwrap_or(false)
            })
            .collect())
    }
}
