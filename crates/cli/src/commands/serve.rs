//! `switchboard serve` — Start the HTTP API server.

use switchboard_config::AppConfig;

pub async fn run(port_override: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    if let Some(port) = port_override {
        config.gateway.port = port;
    }

    println!("📞 Switchboard Gateway");
    println!(
        "   Listening: {}:{}",
        config.gateway.host, config.gateway.port
    );
    println!("   Database:  {}", config.database.url);
    println!(
        "   Presence:  stale after {}m, locations kept {}h",
        config.presence.stale_after_minutes, config.presence.location_retention_hours
    );

    switchboard_gateway::start(config).await?;

    Ok(())
}
