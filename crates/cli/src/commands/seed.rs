//! `switchboard seed` — Load a demo directory, rule set, and conversation.
//!
//! Safe to re-run: agents and teams are upserts, the rule and the demo
//! conversation are only created once.

use switchboard_config::AppConfig;
use switchboard_core::conversation::{Conversation, Conversations};
use switchboard_core::directory::{Agent, Team};
use switchboard_core::ids::{AgentId, ConversationId, TeamId};
use switchboard_core::presence::{AgentStatus, PresenceSource};
use switchboard_core::routing::RuleConfig;
use switchboard_gateway::AppState;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let state = AppState::from_config(&config).await?;

    println!("📞 Switchboard — Demo Seed");
    println!("==========================\n");

    let team = named_team("support", "Support");
    state.directory.upsert_team(&team).await?;

    for (id, name) in [("ada", "Ada"), ("grace", "Grace"), ("alan", "Alan")] {
        let agent = named_agent(id, name);
        state.directory.upsert_agent(&agent).await?;
        state.directory.add_member(&team.id, &agent.id).await?;
        println!("✅ {name} joined team Support");
    }

    // Two of the three check in, so routing has a pool to pick from.
    for id in ["ada", "grace"] {
        state
            .presence
            .upsert_heartbeat(
                &AgentId::from(id),
                Some(AgentStatus::Online),
                PresenceSource::Auto,
            )
            .await?;
    }
    println!("✅ ada and grace are online");

    let existing = state.rules.list_rules(Some("chat")).await?;
    if existing
        .iter()
        .any(|rule| rule.team_id == team.id && rule.is_active)
    {
        println!("  Chat rule already present");
    } else {
        let rule = state
            .rules
            .create_rule(&team.id, "chat", RuleConfig::default())
            .await?;
        println!(
            "✅ Catch-all chat rule {} routes to Support",
            rule.id.as_str()
        );
    }

    let demo_id = ConversationId::from("demo");
    if state.conversations.conversation(&demo_id).await?.is_none() {
        let mut conversation = Conversation::new("chat", None);
        conversation.id = demo_id;
        state.conversations.create(&conversation).await?;
        println!("✅ Conversation 'demo' is waiting for a message");
    } else {
        println!("  Conversation 'demo' already exists");
    }

    println!("\n📝 Try it:");
    println!("   switchboard serve");
    println!(
        "   curl -X POST localhost:{}/api/messages \\",
        config.gateway.port
    );
    println!("     -H 'content-type: application/json' \\");
    println!("     -d '{{\"conversation_id\":\"demo\",\"channel_type\":\"chat\",\"body\":\"hello\"}}'");

    Ok(())
}

fn named_agent(id: &str, name: &str) -> Agent {
    let mut agent = Agent::new(name);
    agent.id = AgentId::from(id);
    agent
}

fn named_team(id: &str, name: &str) -> Team {
    let mut team = Team::new(name);
    team.id = TeamId::from(id);
    team
}
