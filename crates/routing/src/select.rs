//! Strategies for picking one agent from an eligible pool.
//!
//! Both strategies are deterministic given the pool and the stored
//! state. Round-robin leans on the durable `(team, rule)` cursor from
//! the directory; least-loaded leans on active assignment counts.

use switchboard_core::conversation::Conversations;
use switchboard_core::directory::{Agent, Directory};
use switchboard_core::error::StoreError;
use switchboard_core::ids::{AgentId, RuleId, TeamId};

/// Pick the agent after the persisted cursor, wrapping around. If the
/// cursor points at an agent no longer in the pool, start over from the
/// first agent. The new cursor is persisted before the choice is
/// returned, so a crash right after cannot repeat the pick.
pub async fn round_robin(
    directory: &dyn Directory,
    team_id: &TeamId,
    rule_id: &RuleId,
    eligible: &[Agent],
) -> Result<Option<AgentId>, StoreError> {
    if eligible.is_empty() {
        return Ok(None);
    }

    let cursor = directory.cursor(team_id, rule_id).await?;
    let index = cursor
        .and_then(|last| eligible.iter().position(|agent| agent.id == last))
        .map(|at| (at + 1) % eligible.len())
        .unwrap_or(0);

    let chosen = eligible[index].id.clone();
    directory.set_cursor(team_id, rule_id, &chosen).await?;
    Ok(Some(chosen))
}

/// Pick the agent with the fewest active assignments on unresolved
/// conversations. Ties keep the earliest agent in the pool, which is
/// membership order.
pub async fn least_loaded(
    conversations: &dyn Conversations,
    eligible: &[Agent],
) -> Result<Option<AgentId>, StoreError> {
    if eligible.is_empty() {
        return Ok(None);
    }

    let ids: Vec<AgentId> = eligible.iter().map(|agent| agent.id.clone()).collect();
    let counts = conversations.active_assignment_counts(&ids).await?;

    let mut best = &eligible[0];
    let mut best_count = counts.get(&best.id).copied().unwrap_or(0);
    for agent in &eligible[1..] {
        let count = counts.get(&agent.id).copied().unwrap_or(0);
        if count < best_count {
            best = agent;
            best_count = count;
        }
    }
    Ok(Some(best.id.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use switchboard_core::conversation::{Conversation, NewAssignment};
    use switchboard_core::ids::ConversationId;
    use switchboard_store::{Database, SqliteConversations, SqliteDirectory};

    fn agent(id: &str) -> Agent {
        Agent {
            id: AgentId::from(id),
            name: id.to_string(),
            is_active: true,
            created_at: Utc::now(),
        }
    }

    async fn test_db() -> Database {
        Database::connect("sqlite::memory:").await.unwrap()
    }

    async fn assign(store: &SqliteConversations, agent_id: &AgentId) -> ConversationId {
        let conversation = Conversation::new("chat", None);
        store.create(&conversation).await.unwrap();
        store
            .create_or_supersede_assignment(NewAssignment {
                conversation_id: conversation.id.clone(),
                agent_id: Some(agent_id.clone()),
                team_id: None,
                assigned_by_id: None,
            })
            .await
            .unwrap();
        conversation.id
    }

    #[tokio::test]
    async fn round_robin_cycles_through_the_pool() {
        let db = test_db().await;
        let directory = SqliteDirectory::new(db.pool().clone());
        let team = TeamId::from("t1");
        let rule = RuleId::from("r1");
        let pool = vec![agent("a"), agent("b"), agent("c")];

        let mut picks = Vec::new();
        for _ in 0..4 {
            picks.push(
                round_robin(&directory, &team, &rule, &pool)
                    .await
                    .unwrap()
                    .unwrap()
                    .to_string(),
            );
        }
        assert_eq!(picks, vec!["a", "b", "c", "a"]);
    }

    #[tokio::test]
    async fn round_robin_cursor_survives_a_new_directory_handle() {
        let db = test_db().await;
        let team = TeamId::from("t1");
        let rule = RuleId::from("r1");
        let pool = vec![agent("a"), agent("b"), agent("c")];

        let directory = SqliteDirectory::new(db.pool().clone());
        round_robin(&directory, &team, &rule, &pool).await.unwrap();
        round_robin(&directory, &team, &rule, &pool).await.unwrap();

        // Same database, fresh handle: the cursor picks up where it left off.
        let reopened = SqliteDirectory::new(db.pool().clone());
        let next = round_robin(&reopened, &team, &rule, &pool)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(next, AgentId::from("c"));
    }

    #[tokio::test]
    async fn round_robin_restarts_when_cursor_agent_left_the_pool() {
        let db = test_db().await;
        let directory = SqliteDirectory::new(db.pool().clone());
        let team = TeamId::from("t1");
        let rule = RuleId::from("r1");

        directory
            .set_cursor(&team, &rule, &AgentId::from("ghost"))
            .await
            .unwrap();

        let pool = vec![agent("a"), agent("b")];
        let pick = round_robin(&directory, &team, &rule, &pool)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(pick, AgentId::from("a"));
    }

    #[tokio::test]
    async fn round_robin_with_empty_pool_picks_nobody() {
        let db = test_db().await;
        let directory = SqliteDirectory::new(db.pool().clone());
        let team = TeamId::from("t1");
        let rule = RuleId::from("r1");

        let pick = round_robin(&directory, &team, &rule, &[]).await.unwrap();
        assert!(pick.is_none());
        assert!(directory.cursor(&team, &rule).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn least_loaded_picks_the_agent_with_fewest_assignments() {
        let db = test_db().await;
        let conversations = SqliteConversations::new(db.pool().clone());
        let pool = vec![agent("a"), agent("b"), agent("c")];

        assign(&conversations, &pool[0].id).await;
        assign(&conversations, &pool[0].id).await;
        assign(&conversations, &pool[1].id).await;

        let pick = least_loaded(&conversations, &pool).await.unwrap().unwrap();
        assert_eq!(pick, AgentId::from("c"));
    }

    #[tokio::test]
    async fn least_loaded_tie_keeps_membership_order() {
        let db = test_db().await;
        let conversations = SqliteConversations::new(db.pool().clone());
        let pool = vec![agent("a"), agent("b")];

        let pick = least_loaded(&conversations, &pool).await.unwrap().unwrap();
        assert_eq!(pick, AgentId::from("a"));
    }

    #[tokio::test]
    async fn least_loaded_ignores_resolved_conversations() {
        let db = test_db().await;
        let conversations = SqliteConversations::new(db.pool().clone());
        let pool = vec![agent("a"), agent("b")];

        let resolved = assign(&conversations, &pool[0].id).await;
        conversations.set_resolved(&resolved, true).await.unwrap();
        assign(&conversations, &pool[1].id).await;

        let pick = least_loaded(&conversations, &pool).await.unwrap().unwrap();
        assert_eq!(pick, AgentId::from("a"));
    }
}
