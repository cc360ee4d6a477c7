//! SQLite-backed organizational directory.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, SqlitePool};
use switchboard_core::directory::{Agent, Directory, Team};
use switchboard_core::error::StoreError;
use switchboard_core::ids::{AgentId, RuleId, TeamId};
use tracing::debug;

use crate::db::parse_timestamp;

/// Directory implementation over the shared pool. Also carries the admin
/// write operations the trait deliberately leaves out.
pub struct SqliteDirectory {
    pool: SqlitePool,
}

impl SqliteDirectory {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert or update an agent.
    pub async fn upsert_agent(&self, agent: &Agent) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO agents (id, name, is_active, created_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                is_active = excluded.is_active
            "#,
        )
        .bind(agent.id.as_str())
        .bind(&agent.name)
        .bind(agent.is_active)
        .bind(agent.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Database(format!("agent upsert: {e}")))?;

        debug!("upserted agent {}", agent.id);
        Ok(())
    }

    /// Insert or update a team.
    pub async fn upsert_team(&self, team: &Team) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO teams (id, name, is_active, created_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                is_active = excluded.is_active
            "#,
        )
        .bind(team.id.as_str())
        .bind(&team.name)
        .bind(team.is_active)
        .bind(team.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Database(format!("team upsert: {e}")))?;

        debug!("upserted team {}", team.id);
        Ok(())
    }

    /// Add an agent to a team, reactivating a previously removed membership.
    pub async fn add_member(&self, team_id: &TeamId, agent_id: &AgentId) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO team_members (team_id, agent_id, is_active, added_at)
            VALUES (?1, ?2, 1, ?3)
            ON CONFLICT(team_id, agent_id) DO UPDATE SET
                is_active = 1,
                added_at = excluded.added_at
            "#,
        )
        .bind(team_id.as_str())
        .bind(agent_id.as_str())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Database(format!("membership insert: {e}")))?;

        Ok(())
    }

    /// Deactivate a membership. Returns false if it did not exist.
    pub async fn remove_member(
        &self,
        team_id: &TeamId,
        agent_id: &AgentId,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE team_members SET is_active = 0
             WHERE team_id = ?1 AND agent_id = ?2 AND is_active = 1",
        )
        .bind(team_id.as_str())
        .bind(agent_id.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Database(format!("membership removal: {e}")))?;

        Ok(result.rows_affected() > 0)
    }

    fn row_to_agent(row: &sqlx::sqlite::SqliteRow) -> Result<Agent, StoreError> {
        let id: String = row
            .try_get("id")
            .map_err(|e| StoreError::QueryFailed(format!("id column: {e}")))?;
        let name: String = row
            .try_get("name")
            .map_err(|e| StoreError::QueryFailed(format!("name column: {e}")))?;
        let is_active: bool = row
            .try_get("is_active")
            .map_err(|e| StoreError::QueryFailed(format!("is_active column: {e}")))?;
        let created_at: String = row
            .try_get("created_at")
            .map_err(|e| StoreError::QueryFailed(format!("created_at column: {e}")))?;

        Ok(Agent {
            id: AgentId(id),
            name,
            is_active,
            created_at: parse_timestamp("created_at", &created_at)?,
        })
    }

    fn row_to_team(row: &sqlx::sqlite::SqliteRow) -> Result<Team, StoreError> {
        let id: String = row
            .try_get("id")
            .map_err(|e| StoreError::QueryFailed(format!("id column: {e}")))?;
        let name: String = row
            .try_get("name")
            .map_err(|e| StoreError::QueryFailed(format!("name column: {e}")))?;
        let is_active: bool = row
            .try_get("is_active")
            .map_err(|e| StoreError::QueryFailed(format!("is_active column: {e}")))?;
        let created_at: String = row
            .try_get("created_at")
            .map_err(|e| StoreError::QueryFailed(format!("created_at column: {e}")))?;

        Ok(Team {
            id: TeamId(id),
            name,
            is_active,
            created_at: parse_timestamp("created_at", &created_at)?,
        })
    }
}

#[async_trait]
impl Directory for SqliteDirectory {
    async fn agent(&self, id: &AgentId) -> Result<Option<Agent>, StoreError> {
        let row = sqlx::query("SELECT * FROM agents WHERE id = ?1")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("agent lookup: {e}")))?;

        row.as_ref().map(Self::row_to_agent).transpose()
    }

    async fn team(&self, id: &TeamId) -> Result<Option<Team>, StoreError> {
        let row = sqlx::query("SELECT * FROM teams WHERE id = ?1")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("team lookup: {e}")))?;

        row.as_ref().map(Self::row_to_team).transpose()
    }

    async fn team_members(&self, team_id: &TeamId) -> Result<Vec<Agent>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT a.id, a.name, a.is_active, a.created_at
            FROM team_members m
            JOIN agents a ON a.id = m.agent_id
            WHERE m.team_id = ?1 AND m.is_active = 1 AND a.is_active = 1
            ORDER BY a.created_at, a.id
            "#,
        )
        .bind(team_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("team members: {e}")))?;

        rows.iter().map(Self::row_to_agent).collect()
    }

    async fn is_member(&self, team_id: &TeamId, agent_id: &AgentId) -> Result<bool, StoreError> {
        let row = sqlx::query(
            "SELECT 1 FROM team_members
             WHERE team_id = ?1 AND agent_id = ?2 AND is_active = 1",
        )
        .bind(team_id.as_str())
        .bind(agent_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("membership check: {e}")))?;

        Ok(row.is_some())
    }

    async fn cursor(
        &self,
        team_id: &TeamId,
        rule_id: &RuleId,
    ) -> Result<Option<AgentId>, StoreError> {
        let row = sqlx::query(
            "SELECT agent_id FROM routing_cursors WHERE team_id = ?1 AND rule_id = ?2",
        )
        .bind(team_id.as_str())
        .bind(rule_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("cursor lookup: {e}")))?;

        match row {
            Some(row) => {
                let agent_id: String = row
                    .try_get("agent_id")
                    .map_err(|e| StoreError::QueryFailed(format!("agent_id column: {e}")))?;
                Ok(Some(AgentId(agent_id)))
            }
            None => Ok(None),
        }
    }

    async fn set_cursor(
        &self,
        team_id: &TeamId,
        rule_id: &RuleId,
        agent_id: &AgentId,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO routing_cursors (team_id, rule_id, agent_id, updated_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(team_id, rule_id) DO UPDATE SET
                agent_id = excluded.agent_id,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(team_id.as_str())
        .bind(rule_id.as_str())
        .bind(agent_id.as_str())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Database(format!("cursor upsert: {e}")))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use chrono::Duration;

    async fn test_directory() -> SqliteDirectory {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        SqliteDirectory::new(db.pool().clone())
    }

    fn agent_created_at(name: &str, minutes_ago: i64) -> Agent {
        let mut agent = Agent::new(name);
        agent.created_at = Utc::now() - Duration::minutes(minutes_ago);
        agent
    }

    #[tokio::test]
    async fn agent_upsert_and_lookup() {
        let dir = test_directory().await;
        let agent = Agent::new("Dana");
        dir.upsert_agent(&agent).await.unwrap();

        let found = dir.agent(&agent.id).await.unwrap().unwrap();
        assert_eq!(found.name, "Dana");
        assert!(found.is_active);

        let missing = dir.agent(&AgentId::from("nope")).await.unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn upsert_updates_existing_agent() {
        let dir = test_directory().await;
        let mut agent = Agent::new("Dana");
        dir.upsert_agent(&agent).await.unwrap();

        agent.is_active = false;
        dir.upsert_agent(&agent).await.unwrap();

        let found = dir.agent(&agent.id).await.unwrap().unwrap();
        assert!(!found.is_active);
    }

    #[tokio::test]
    async fn team_members_orders_by_creation() {
        let dir = test_directory().await;
        let team = Team::new("Support");
        dir.upsert_team(&team).await.unwrap();

        let newest = agent_created_at("Newest", 1);
        let oldest = agent_created_at("Oldest", 30);
        let middle = agent_created_at("Middle", 10);
        for agent in [&newest, &oldest, &middle] {
            dir.upsert_agent(agent).await.unwrap();
            dir.add_member(&team.id, &agent.id).await.unwrap();
        }

        let members = dir.team_members(&team.id).await.unwrap();
        let names: Vec<&str> = members.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, ["Oldest", "Middle", "Newest"]);
    }

    #[tokio::test]
    async fn team_members_skips_inactive() {
        let dir = test_directory().await;
        let team = Team::new("Support");
        dir.upsert_team(&team).await.unwrap();

        let mut retired = agent_created_at("Retired", 20);
        retired.is_active = false;
        let removed = agent_created_at("Removed", 15);
        let active = agent_created_at("Active", 10);
        for agent in [&retired, &removed, &active] {
            dir.upsert_agent(agent).await.unwrap();
            dir.add_member(&team.id, &agent.id).await.unwrap();
        }
        dir.remove_member(&team.id, &removed.id).await.unwrap();

        let members = dir.team_members(&team.id).await.unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].name, "Active");

        assert!(dir.is_member(&team.id, &active.id).await.unwrap());
        assert!(!dir.is_member(&team.id, &removed.id).await.unwrap());
    }

    #[tokio::test]
    async fn readding_member_reactivates() {
        let dir = test_directory().await;
        let team = Team::new("Support");
        let agent = Agent::new("Dana");
        dir.upsert_team(&team).await.unwrap();
        dir.upsert_agent(&agent).await.unwrap();

        dir.add_member(&team.id, &agent.id).await.unwrap();
        dir.remove_member(&team.id, &agent.id).await.unwrap();
        dir.add_member(&team.id, &agent.id).await.unwrap();

        assert!(dir.is_member(&team.id, &agent.id).await.unwrap());
    }

    #[tokio::test]
    async fn cursor_roundtrip_and_overwrite() {
        let dir = test_directory().await;
        let team_id = TeamId::from("t1");
        let rule_id = RuleId::from("r1");

        assert!(dir.cursor(&team_id, &rule_id).await.unwrap().is_none());

        dir.set_cursor(&team_id, &rule_id, &AgentId::from("a1"))
            .await
            .unwrap();
        assert_eq!(
            dir.cursor(&team_id, &rule_id).await.unwrap(),
            Some(AgentId::from("a1"))
        );

        dir.set_cursor(&team_id, &rule_id, &AgentId::from("a2"))
            .await
            .unwrap();
        assert_eq!(
            dir.cursor(&team_id, &rule_id).await.unwrap(),
            Some(AgentId::from("a2"))
        );
    }

    #[tokio::test]
    async fn cursors_are_scoped_per_rule() {
        let dir = test_directory().await;
        let team_id = TeamId::from("t1");

        dir.set_cursor(&team_id, &RuleId::from("r1"), &AgentId::from("a1"))
            .await
            .unwrap();
        dir.set_cursor(&team_id, &RuleId::from("r2"), &AgentId::from("a2"))
            .await
            .unwrap();

        assert_eq!(
            dir.cursor(&team_id, &RuleId::from("r1")).await.unwrap(),
            Some(AgentId::from("a1"))
        );
        assert_eq!(
            dir.cursor(&team_id, &RuleId::from("r2")).await.unwrap(),
            Some(AgentId::from("a2"))
        );
    }
}
