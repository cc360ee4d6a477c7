//! Routing rule persistence and the matching predicate.
//!
//! Rule configs live in a JSON column and are parsed eagerly on load. A
//! stored config that no longer parses fails the load with the rule id
//! attached instead of silently matching nothing.

use chrono::Utc;
use sqlx::{Row, SqlitePool};
use switchboard_core::conversation::InboundMessage;
use switchboard_core::error::{Result, RoutingError, StoreError};
use switchboard_core::ids::{RuleId, TeamId};
use switchboard_core::routing::{MatchMode, RoutingRule, RuleConfig};
use switchboard_store::db::parse_timestamp;
use tracing::info;

/// SQLite-backed storage for routing rules.
pub struct RuleStore {
    pool: SqlitePool,
}

impl RuleStore {
    /// Open the store, creating its table if missing.
    pub async fn new(pool: SqlitePool) -> Result<Self, StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS routing_rules (
                id           TEXT PRIMARY KEY,
                team_id      TEXT NOT NULL,
                channel_type TEXT NOT NULL,
                config       TEXT NOT NULL,
                is_active    INTEGER NOT NULL DEFAULT 1,
                created_at   TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("routing_rules table: {e}")))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_routing_rules_channel
             ON routing_rules(channel_type, created_at)",
        )
        .execute(&pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("routing rules index: {e}")))?;

        Ok(Self { pool })
    }

    pub async fn create_rule(
        &self,
        team_id: &TeamId,
        channel_type: &str,
        config: RuleConfig,
    ) -> Result<RoutingRule> {
        let rule = RoutingRule {
            id: RuleId::new(),
            team_id: team_id.clone(),
            channel_type: channel_type.to_string(),
            config,
            is_active: true,
            created_at: Utc::now(),
        };
        let config_json = serde_json::to_string(&rule.config)?;

        sqlx::query(
            "INSERT INTO routing_rules (id, team_id, channel_type, config, is_active, created_at)
             VALUES (?1, ?2, ?3, ?4, 1, ?5)",
        )
        .bind(rule.id.as_str())
        .bind(rule.team_id.as_str())
        .bind(&rule.channel_type)
        .bind(&config_json)
        .bind(rule.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Database(format!("rule insert: {e}")))?;

        info!(rule = %rule.id, team = %rule.team_id, channel = %rule.channel_type, "routing rule created");
        Ok(rule)
    }

    /// Active rules for one channel type, oldest first. Evaluation is
    /// first-match-wins, so creation order is priority order.
    pub async fn active_rules(&self, channel_type: &str) -> Result<Vec<RoutingRule>> {
        let rows = sqlx::query(
            "SELECT * FROM routing_rules
             WHERE channel_type = ?1 AND is_active = 1
             ORDER BY created_at, id",
        )
        .bind(channel_type)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("active rules: {e}")))?;

        rows.iter().map(Self::row_to_rule).collect()
    }

    /// All rules, active or not, optionally scoped to one channel type.
    pub async fn list_rules(&self, channel_type: Option<&str>) -> Result<Vec<RoutingRule>> {
        let rows = match channel_type {
            Some(channel) => {
                sqlx::query(
                    "SELECT * FROM routing_rules WHERE channel_type = ?1 ORDER BY created_at, id",
                )
                .bind(channel)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query("SELECT * FROM routing_rules ORDER BY created_at, id")
                    .fetch_all(&self.pool)
                    .await
            }
        }
        .map_err(|e| StoreError::QueryFailed(format!("list rules: {e}")))?;

        rows.iter().map(Self::row_to_rule).collect()
    }

    /// Deactivate a rule. Returns false if no active rule had that id.
    pub async fn deactivate_rule(&self, id: &RuleId) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE routing_rules SET is_active = 0 WHERE id = ?1 AND is_active = 1",
        )
        .bind(id.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Database(format!("rule deactivate: {e}")))?;

        Ok(result.rows_affected() > 0)
    }

    fn row_to_rule(row: &sqlx::sqlite::SqliteRow) -> Result<RoutingRule> {
        let id: String = row
            .try_get("id")
            .map_err(|e| StoreError::QueryFailed(format!("id column: {e}")))?;
        let team_id: String = row
            .try_get("team_id")
            .map_err(|e| StoreError::QueryFailed(format!("team_id column: {e}")))?;
        let channel_type: String = row
            .try_get("channel_type")
            .map_err(|e| StoreError::QueryFailed(format!("channel_type column: {e}")))?;
        let config_json: String = row
            .try_get("config")
            .map_err(|e| StoreError::QueryFailed(format!("config column: {e}")))?;
        let is_active: bool = row
            .try_get("is_active")
            .map_err(|e| StoreError::QueryFailed(format!("is_active column: {e}")))?;
        let created_at: String = row
            .try_get("created_at")
            .map_err(|e| StoreError::QueryFailed(format!("created_at column: {e}")))?;

        let config: RuleConfig =
            serde_json::from_str(&config_json).map_err(|e| RoutingError::InvalidRule {
                id: id.clone(),
                reason: e.to_string(),
            })?;

        Ok(RoutingRule {
            id: RuleId(id),
            team_id: TeamId(team_id),
            channel_type,
            config,
            is_active,
            created_at: parse_timestamp("created_at", &created_at)?,
        })
    }
}

/// Whether a rule applies to a message. Checked in order:
///
/// 1. Channel target: a rule pinned to a target only matches messages on
///    that exact target.
/// 2. Keywords: case-insensitive substring search over the body. An empty
///    keyword list matches everything on the channel.
pub fn rule_matches(rule: &RoutingRule, message: &InboundMessage) -> bool {
    if let Some(target) = &rule.config.target_id {
        if message.channel_target_id.as_deref() != Some(target.as_str()) {
            return false;
        }
    }

    if rule.config.keywords.is_empty() {
        return true;
    }

    let body = message.body.to_lowercase();
    let mut hits = rule
        .config
        .keywords
        .iter()
        .map(|keyword| body.contains(&keyword.to_lowercase()));
    match rule.config.match_mode {
        MatchMode::Any => hits.any(|hit| hit),
        MatchMode::All => hits.all(|hit| hit),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchboard_core::error::{Error, ErrorKind};
    use switchboard_core::ids::ConversationId;
    use switchboard_core::routing::Strategy;
    use switchboard_store::Database;

    async fn test_rules() -> RuleStore {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        RuleStore::new(db.pool().clone()).await.unwrap()
    }

    fn message(channel: &str, target: Option<&str>, body: &str) -> InboundMessage {
        InboundMessage {
            conversation_id: ConversationId::new(),
            channel_type: channel.to_string(),
            channel_target_id: target.map(String::from),
            body: body.to_string(),
        }
    }

    fn keyword_rule(keywords: &[&str], mode: MatchMode) -> RoutingRule {
        RoutingRule {
            id: RuleId::new(),
            team_id: TeamId::from("team_support"),
            channel_type: "chat".into(),
            config: RuleConfig {
                keywords: keywords.iter().map(|k| k.to_string()).collect(),
                match_mode: mode,
                target_id: None,
                strategy: Strategy::RoundRobin,
            },
            is_active: true,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn empty_keywords_match_everything() {
        let rule = keyword_rule(&[], MatchMode::Any);
        assert!(rule_matches(&rule, &message("chat", None, "hello there")));
        assert!(rule_matches(&rule, &message("chat", None, "")));
    }

    #[test]
    fn keyword_match_is_case_insensitive() {
        let rule = keyword_rule(&["Refund"], MatchMode::Any);
        assert!(rule_matches(&rule, &message("chat", None, "I want a REFUND now")));
        assert!(!rule_matches(&rule, &message("chat", None, "just saying hi")));
    }

    #[test]
    fn match_all_requires_every_keyword() {
        let rule = keyword_rule(&["invoice", "overdue"], MatchMode::All);
        assert!(rule_matches(&rule, &message("chat", None, "my invoice is overdue")));
        assert!(!rule_matches(&rule, &message("chat", None, "my invoice is here")));
    }

    #[test]
    fn target_pinned_rule_requires_exact_target() {
        let mut rule = keyword_rule(&[], MatchMode::Any);
        rule.config.target_id = Some("support@acme.test".into());

        assert!(rule_matches(&rule, &message("email", Some("support@acme.test"), "hi")));
        assert!(!rule_matches(&rule, &message("email", Some("sales@acme.test"), "hi")));
        assert!(!rule_matches(&rule, &message("email", None, "hi")));
    }

    #[tokio::test]
    async fn created_rules_come_back_in_creation_order() {
        let rules = test_rules().await;
        let team = TeamId::from("team_support");

        let first = rules
            .create_rule(&team, "chat", RuleConfig::default())
            .await
            .unwrap();
        let second = rules
            .create_rule(&team, "chat", RuleConfig {
                keywords: vec!["billing".into()],
                ..RuleConfig::default()
            })
            .await
            .unwrap();

        let active = rules.active_rules("chat").await.unwrap();
        assert_eq!(active.len(), 2);
        assert_eq!(active[0].id, first.id);
        assert_eq!(active[1].id, second.id);
        assert_eq!(active[1].config.keywords, vec!["billing".to_string()]);
    }

    #[tokio::test]
    async fn active_rules_are_scoped_to_the_channel() {
        let rules = test_rules().await;
        let team = TeamId::from("team_support");
        rules
            .create_rule(&team, "chat", RuleConfig::default())
            .await
            .unwrap();
        rules
            .create_rule(&team, "email", RuleConfig::default())
            .await
            .unwrap();

        assert_eq!(rules.active_rules("chat").await.unwrap().len(), 1);
        assert_eq!(rules.active_rules("sms").await.unwrap().len(), 0);
        assert_eq!(rules.list_rules(None).await.unwrap().len(), 2);
        assert_eq!(rules.list_rules(Some("email")).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn deactivated_rules_stop_matching() {
        let rules = test_rules().await;
        let team = TeamId::from("team_support");
        let rule = rules
            .create_rule(&team, "chat", RuleConfig::default())
            .await
            .unwrap();

        assert!(rules.deactivate_rule(&rule.id).await.unwrap());
        assert!(rules.active_rules("chat").await.unwrap().is_empty());
        // Still visible in the full listing
        assert_eq!(rules.list_rules(None).await.unwrap().len(), 1);
        // Second deactivation is a no-op
        assert!(!rules.deactivate_rule(&rule.id).await.unwrap());
    }

    #[tokio::test]
    async fn malformed_stored_config_fails_the_load() {
        let rules = test_rules().await;
        sqlx::query(
            "INSERT INTO routing_rules (id, team_id, channel_type, config, is_active, created_at)
             VALUES ('r_bad', 't1', 'chat', '{\"strategy\":\"most_idle\"}', 1, ?1)",
        )
        .bind(Utc::now().to_rfc3339())
        .execute(&rules.pool)
        .await
        .unwrap();

        let err = rules.active_rules("chat").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert!(matches!(
            err,
            Error::Routing(RoutingError::InvalidRule { ref id, .. }) if id == "r_bad"
        ));
    }
}
