//! SQLite-backed conversation and assignment persistence.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use switchboard_core::conversation::{
    Conversation, ConversationAssignment, Conversations, NewAssignment,
};
use switchboard_core::error::StoreError;
use switchboard_core::ids::{AgentId, ConversationId, TeamId};
use tracing::debug;

use crate::db::parse_timestamp;

pub struct SqliteConversations {
    pool: SqlitePool,
}

impl SqliteConversations {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Record a new inbound conversation.
    pub async fn create(&self, conversation: &Conversation) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO conversations (id, channel_type, channel_target_id, is_resolved, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(conversation.id.as_str())
        .bind(&conversation.channel_type)
        .bind(&conversation.channel_target_id)
        .bind(conversation.is_resolved)
        .bind(conversation.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Database(format!("conversation insert: {e}")))?;

        debug!("created conversation {}", conversation.id);
        Ok(())
    }

    /// Flip the resolved flag. Returns false if the conversation is unknown.
    pub async fn set_resolved(
        &self,
        id: &ConversationId,
        resolved: bool,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE conversations SET is_resolved = ?1 WHERE id = ?2")
            .bind(resolved)
            .bind(id.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Database(format!("resolve update: {e}")))?;

        Ok(result.rows_affected() > 0)
    }

    fn row_to_conversation(row: &sqlx::sqlite::SqliteRow) -> Result<Conversation, StoreError> {
        let id: String = row
            .try_get("id")
            .map_err(|e| StoreError::QueryFailed(format!("id column: {e}")))?;
        let channel_type: String = row
            .try_get("channel_type")
            .map_err(|e| StoreError::QueryFailed(format!("channel_type column: {e}")))?;
        let channel_target_id: Option<String> = row
            .try_get("channel_target_id")
            .map_err(|e| StoreError::QueryFailed(format!("channel_target_id column: {e}")))?;
        let is_resolved: bool = row
            .try_get("is_resolved")
            .map_err(|e| StoreError::QueryFailed(format!("is_resolved column: {e}")))?;
        let created_at: String = row
            .try_get("created_at")
            .map_err(|e| StoreError::QueryFailed(format!("created_at column: {e}")))?;

        Ok(Conversation {
            id: ConversationId(id),
            channel_type,
            channel_target_id,
            is_resolved,
            created_at: parse_timestamp("created_at", &created_at)?,
        })
    }

    fn row_to_assignment(
        row: &sqlx::sqlite::SqliteRow,
    ) -> Result<ConversationAssignment, StoreError> {
        let id: i64 = row
            .try_get("id")
            .map_err(|e| StoreError::QueryFailed(format!("id column: {e}")))?;
        let conversation_id: String = row
            .try_get("conversation_id")
            .map_err(|e| StoreError::QueryFailed(format!("conversation_id column: {e}")))?;
        let agent_id: Option<String> = row
            .try_get("agent_id")
            .map_err(|e| StoreError::QueryFailed(format!("agent_id column: {e}")))?;
        let team_id: Option<String> = row
            .try_get("team_id")
            .map_err(|e| StoreError::QueryFailed(format!("team_id column: {e}")))?;
        let assigned_by_id: Option<String> = row
            .try_get("assigned_by_id")
            .map_err(|e| StoreError::QueryFailed(format!("assigned_by_id column: {e}")))?;
        let assigned_at: String = row
            .try_get("assigned_at")
            .map_err(|e| StoreError::QueryFailed(format!("assigned_at column: {e}")))?;
        let is_active: bool = row
            .try_get("is_active")
            .map_err(|e| StoreError::QueryFailed(format!("is_active column: {e}")))?;

        Ok(ConversationAssignment {
            id,
            conversation_id: ConversationId(conversation_id),
            agent_id: agent_id.map(AgentId),
            team_id: team_id.map(TeamId),
            assigned_by_id: assigned_by_id.map(AgentId),
            assigned_at: parse_timestamp("assigned_at", &assigned_at)?,
            is_active,
        })
    }
}

#[async_trait]
impl Conversations for SqliteConversations {
    async fn conversation(
        &self,
        id: &ConversationId,
    ) -> Result<Option<Conversation>, StoreError> {
        let row = sqlx::query("SELECT * FROM conversations WHERE id = ?1")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("conversation lookup: {e}")))?;

        row.as_ref().map(Self::row_to_conversation).transpose()
    }

    async fn active_assignment(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Option<ConversationAssignment>, StoreError> {
        let row = sqlx::query(
            "SELECT * FROM conversation_assignments
             WHERE conversation_id = ?1 AND is_active = 1
             ORDER BY id DESC LIMIT 1",
        )
        .bind(conversation_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("active assignment lookup: {e}")))?;

        row.as_ref().map(Self::row_to_assignment).transpose()
    }

    async fn create_or_supersede_assignment(
        &self,
        new: NewAssignment,
    ) -> Result<ConversationAssignment, StoreError> {
        let assigned_at = Utc::now();
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Database(format!("assignment transaction: {e}")))?;

        sqlx::query(
            "UPDATE conversation_assignments SET is_active = 0
             WHERE conversation_id = ?1 AND is_active = 1",
        )
        .bind(new.conversation_id.as_str())
        .execute(&mut *tx)
        .await
        .map_err(|e| StoreError::Database(format!("assignment supersede: {e}")))?;

        let result = sqlx::query(
            r#"
            INSERT INTO conversation_assignments
                (conversation_id, agent_id, team_id, assigned_by_id, assigned_at, is_active)
            VALUES (?1, ?2, ?3, ?4, ?5, 1)
            "#,
        )
        .bind(new.conversation_id.as_str())
        .bind(new.agent_id.as_ref().map(|a| a.as_str()))
        .bind(new.team_id.as_ref().map(|t| t.as_str()))
        .bind(new.assigned_by_id.as_ref().map(|a| a.as_str()))
        .bind(assigned_at.to_rfc3339())
        .execute(&mut *tx)
        .await
        .map_err(|e| StoreError::Database(format!("assignment insert: {e}")))?;

        tx.commit()
            .await
            .map_err(|e| StoreError::Database(format!("assignment commit: {e}")))?;

        Ok(ConversationAssignment {
            id: result.last_insert_rowid(),
            conversation_id: new.conversation_id,
            agent_id: new.agent_id,
            team_id: new.team_id,
            assigned_by_id: new.assigned_by_id,
            assigned_at,
            is_active: true,
        })
    }

    async fn deactivate_assignments(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "UPDATE conversation_assignments SET is_active = 0
             WHERE conversation_id = ?1 AND is_active = 1",
        )
        .bind(conversation_id.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Database(format!("assignment deactivate: {e}")))?;

        Ok(result.rows_affected())
    }

    async fn active_assignment_counts(
        &self,
        agent_ids: &[AgentId],
    ) -> Result<HashMap<AgentId, i64>, StoreError> {
        if agent_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT ca.agent_id AS agent_id, COUNT(*) AS load
             FROM conversation_assignments ca
             JOIN conversations c ON c.id = ca.conversation_id
             WHERE ca.is_active = 1 AND c.is_resolved = 0 AND ca.agent_id IN (",
        );
        let mut separated = builder.separated(", ");
        for agent_id in agent_ids {
            separated.push_bind(agent_id.as_str().to_string());
        }
        builder.push(") GROUP BY ca.agent_id");

        let rows = builder
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("assignment counts: {e}")))?;

        let mut counts = HashMap::new();
        for row in rows {
            let agent_id: String = row
                .try_get("agent_id")
                .map_err(|e| StoreError::QueryFailed(format!("agent_id column: {e}")))?;
            let load: i64 = row
                .try_get("load")
                .map_err(|e| StoreError::QueryFailed(format!("load column: {e}")))?;
            counts.insert(AgentId(agent_id), load);
        }
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    async fn test_store() -> SqliteConversations {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        SqliteConversations::new(db.pool().clone())
    }

    fn assignment_for(conversation: &Conversation, agent: &str) -> NewAssignment {
        NewAssignment {
            conversation_id: conversation.id.clone(),
            agent_id: Some(AgentId::from(agent)),
            team_id: Some(TeamId::from("team_1")),
            assigned_by_id: None,
        }
    }

    #[tokio::test]
    async fn conversation_create_and_lookup() {
        let store = test_store().await;
        let conv = Conversation::new("email", Some("support@acme.test".into()));
        store.create(&conv).await.unwrap();

        let found = store.conversation(&conv.id).await.unwrap().unwrap();
        assert_eq!(found.channel_type, "email");
        assert_eq!(found.channel_target_id.as_deref(), Some("support@acme.test"));
        assert!(!found.is_resolved);
    }

    #[tokio::test]
    async fn supersede_keeps_a_single_active_assignment() {
        let store = test_store().await;
        let conv = Conversation::new("chat", None);
        store.create(&conv).await.unwrap();

        let first = store
            .create_or_supersede_assignment(assignment_for(&conv, "a1"))
            .await
            .unwrap();
        let second = store
            .create_or_supersede_assignment(assignment_for(&conv, "a2"))
            .await
            .unwrap();
        assert_ne!(first.id, second.id);

        let active = store.active_assignment(&conv.id).await.unwrap().unwrap();
        assert_eq!(active.id, second.id);
        assert_eq!(active.agent_id, Some(AgentId::from("a2")));

        // Exactly one row may be active
        let counts = store
            .active_assignment_counts(&[AgentId::from("a1"), AgentId::from("a2")])
            .await
            .unwrap();
        assert_eq!(counts.get(&AgentId::from("a2")), Some(&1));
        assert!(!counts.contains_key(&AgentId::from("a1")));
    }

    #[tokio::test]
    async fn deactivate_clears_active_assignment() {
        let store = test_store().await;
        let conv = Conversation::new("chat", None);
        store.create(&conv).await.unwrap();
        store
            .create_or_supersede_assignment(assignment_for(&conv, "a1"))
            .await
            .unwrap();

        let cleared = store.deactivate_assignments(&conv.id).await.unwrap();
        assert_eq!(cleared, 1);
        assert!(store.active_assignment(&conv.id).await.unwrap().is_none());

        // Second call is a no-op
        let cleared = store.deactivate_assignments(&conv.id).await.unwrap();
        assert_eq!(cleared, 0);
    }

    #[tokio::test]
    async fn counts_exclude_resolved_conversations() {
        let store = test_store().await;
        let open = Conversation::new("chat", None);
        let resolved = Conversation::new("chat", None);
        store.create(&open).await.unwrap();
        store.create(&resolved).await.unwrap();

        store
            .create_or_supersede_assignment(assignment_for(&open, "a1"))
            .await
            .unwrap();
        store
            .create_or_supersede_assignment(assignment_for(&resolved, "a1"))
            .await
            .unwrap();
        store.set_resolved(&resolved.id, true).await.unwrap();

        let counts = store
            .active_assignment_counts(&[AgentId::from("a1")])
            .await
            .unwrap();
        assert_eq!(counts.get(&AgentId::from("a1")), Some(&1));
    }

    #[tokio::test]
    async fn counts_with_no_agents_is_empty() {
        let store = test_store().await;
        let counts = store.active_assignment_counts(&[]).await.unwrap();
        assert!(counts.is_empty());
    }

    #[tokio::test]
    async fn team_only_assignment_has_no_agent() {
        let store = test_store().await;
        let conv = Conversation::new("email", None);
        store.create(&conv).await.unwrap();

        let assignment = store
            .create_or_supersede_assignment(NewAssignment {
                conversation_id: conv.id.clone(),
                agent_id: None,
                team_id: Some(TeamId::from("team_1")),
                assigned_by_id: None,
            })
            .await
            .unwrap();
        assert!(assignment.agent_id.is_none());
        assert_eq!(assignment.team_id, Some(TeamId::from("team_1")));
        assert!(assignment.is_active);
    }
}
