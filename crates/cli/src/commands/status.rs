//! `switchboard status` — Show configuration and database counts.

use sqlx::sqlite::SqlitePool;
use switchboard_config::AppConfig;
use switchboard_store::Database;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    println!("📞 Switchboard Status");
    println!("====================");
    println!("  Config dir:  {}", AppConfig::config_dir().display());
    println!("  Database:    {}", config.database.url);
    println!(
        "  Gateway:     {}:{}",
        config.gateway.host, config.gateway.port
    );
    println!(
        "  Presence:    stale after {}m, feed horizon {}s",
        config.presence.stale_after_minutes, config.presence.location_stale_after_seconds
    );
    println!(
        "  Locations:   kept {}h, pruned every {}m",
        config.presence.location_retention_hours, config.presence.prune_interval_minutes
    );

    let config_path = AppConfig::config_dir().join("config.toml");
    if config_path.exists() {
        println!("\n  ✅ Config file found");
    } else {
        println!("\n  ⚠️  No config file — run `switchboard init` first");
    }

    let db = Database::connect(&config.database.url).await?;
    println!("\n  Data:");
    for table in [
        "agents",
        "teams",
        "conversations",
        "conversation_assignments",
        "agent_presence",
        "agent_presence_events",
        "routing_rules",
    ] {
        match table_count(db.pool(), table).await? {
            Some(count) => println!("    {table}: {count} rows"),
            None => println!("    {table}: (not created yet)"),
        }
    }

    Ok(())
}

/// Row count for a table, or `None` if the table does not exist yet.
/// Presence and routing tables are created by their own services, so a
/// database that has only served the directory will not have them.
async fn table_count(pool: &SqlitePool, table: &str) -> Result<Option<i64>, sqlx::Error> {
    let exists: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1")
            .bind(table)
            .fetch_one(pool)
            .await?;
    if exists == 0 {
        return Ok(None);
    }

    let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
        .fetch_one(pool)
        .await?;
    Ok(Some(count))
}
