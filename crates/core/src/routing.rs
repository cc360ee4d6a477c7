//! Routing rule configuration and decision types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{AgentId, RuleId, TeamId};

/// How an agent is picked from the eligible pool once a rule matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Hand work to the agent after the persisted cursor, cycling.
    #[default]
    RoundRobin,
    /// Hand work to the agent with the fewest active assignments.
    LeastLoaded,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::RoundRobin => "round_robin",
            Strategy::LeastLoaded => "least_loaded",
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How keyword lists combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    /// At least one keyword must appear in the message body.
    #[default]
    Any,
    /// Every keyword must appear in the message body.
    All,
}

/// Typed rule configuration, persisted as a JSON column on the rule row.
///
/// Unknown strategy or match-mode strings are rejected at parse time, so a
/// malformed stored rule surfaces as a loading error instead of silently
/// matching everything.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleConfig {
    /// Keywords to look for in the message body, case-insensitively.
    /// An empty list matches every message.
    #[serde(default)]
    pub keywords: Vec<String>,

    #[serde(rename = "match", default)]
    pub match_mode: MatchMode,

    /// When set, the message's channel target must equal this exactly.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_id: Option<String>,

    #[serde(default)]
    pub strategy: Strategy,
}

/// A routing rule. Rules are scoped to one channel type and target one
/// team; among matching rules the earliest-created wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingRule {
    pub id: RuleId,
    pub team_id: TeamId,
    pub channel_type: String,
    pub config: RuleConfig,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// Outcome of evaluating the rule set against one inbound message.
/// `agent_id` is `None` when the matched team had no eligible agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub rule_id: RuleId,
    pub team_id: TeamId,
    pub agent_id: Option<AgentId>,
    pub strategy: Strategy,
}
