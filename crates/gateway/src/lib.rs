//! HTTP API gateway for Switchboard.
//!
//! Exposes REST endpoints for presence heartbeats, manual overrides,
//! location sharing, routing rules, assignments, and time-in-status
//! reporting.
//!
//! Built on Axum for high performance async HTTP.

pub mod api;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::{routing::get, Json, Router};
use chrono::Duration;
use serde::Serialize;
use switchboard_core::error::Result;
use switchboard_core::event::{DomainEvent, EventBus};
use switchboard_presence::{
    PresenceOptions, PresenceStore, TimeInStatusAggregator, TimezoneResolver,
};
use switchboard_routing::{AssignmentGateway, RoutingRuleEngine, RuleStore};
use switchboard_store::{Database, Settings, SqliteConversations, SqliteDirectory};
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, info, warn};

/// Shared application state for the gateway.
pub struct AppState {
    pub directory: Arc<SqliteDirectory>,
    pub conversations: Arc<SqliteConversations>,
    pub presence: Arc<PresenceStore>,
    pub reports: Arc<TimeInStatusAggregator>,
    pub timezone: Arc<TimezoneResolver>,
    pub rules: Arc<RuleStore>,
    pub engine: Arc<RoutingRuleEngine>,
    pub assignments: Arc<AssignmentGateway>,
    pub events: Arc<EventBus>,

    /// Default freshness horizon for the live location feed, in seconds.
    pub location_stale_after_seconds: i64,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    /// Wire every subsystem onto one database pool. Migrations run here,
    /// so a fresh database file is ready after this call.
    pub async fn from_config(config: &switchboard_config::AppConfig) -> Result<Self> {
        let db = Database::connect(&config.database.url).await?;
        let pool = db.pool().clone();

        let events = Arc::new(EventBus::default());
        let directory = Arc::new(SqliteDirectory::new(pool.clone()));
        let conversations = Arc::new(SqliteConversations::new(pool.clone()));

        let options = PresenceOptions {
            stale_after: Duration::minutes(config.presence.stale_after_minutes),
            ping_retention: Duration::hours(config.presence.location_retention_hours),
            prune_interval: std::time::Duration::from_secs(
                config.presence.prune_interval_minutes.max(0) as u64 * 60,
            ),
        };
        let presence = Arc::new(PresenceStore::new(pool.clone(), options, events.clone()).await?);
        let reports = Arc::new(TimeInStatusAggregator::new(pool.clone()));
        let timezone = Arc::new(TimezoneResolver::new(Settings::new(pool.clone())));
        let rules = Arc::new(RuleStore::new(pool.clone()).await?);
        let engine = Arc::new(RoutingRuleEngine::new(
            rules.clone(),
            directory.clone(),
            conversations.clone(),
            presence.clone(),
        ));
        let assignments = Arc::new(AssignmentGateway::new(
            directory.clone(),
            conversations.clone(),
            presence.clone(),
            events.clone(),
        ));

        Ok(Self {
            directory,
            conversations,
            presence,
            reports,
            timezone,
            rules,
            engine,
            assignments,
            events,
            location_stale_after_seconds: config.presence.location_stale_after_seconds,
        })
    }
}

/// Build the Axum router with all gateway routes.
pub fn build_router(state: SharedState) -> Router {
    // Dashboard and agent clients call in from their own origins.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .nest("/api", api::api_router(state))
        .layer(DefaultBodyLimit::max(1024 * 1024)) // 1 MB body limit
        .layer(cors)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

/// Start the gateway HTTP server.
pub async fn start(
    config: switchboard_config::AppConfig,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);

    let state = Arc::new(AppState::from_config(&config).await?);
    tokio::spawn(log_events(state.events.subscribe()));

    let app = build_router(state);

    info!(addr = %addr, "Switchboard gateway starting");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Drain the event bus into the log so operators can follow presence
/// transitions and assignment changes with `RUST_LOG=debug`.
async fn log_events(mut rx: broadcast::Receiver<Arc<DomainEvent>>) {
    loop {
        match rx.recv().await {
            Ok(event) => match event.as_ref() {
                DomainEvent::PresenceChanged {
                    agent_id,
                    status,
                    source,
                    ..
                } => {
                    debug!(agent = %agent_id, status = %status, source = %source, "event: presence changed");
                }
                DomainEvent::ConversationAssigned {
                    conversation_id,
                    agent_id,
                    team_id,
                    ..
                } => {
                    debug!(
                        conversation = %conversation_id,
                        agent = agent_id.as_deref().unwrap_or("-"),
                        team = team_id.as_deref().unwrap_or("-"),
                        "event: conversation assigned"
                    );
                }
                DomainEvent::ConversationUnassigned {
                    conversation_id, ..
                } => {
                    debug!(conversation = %conversation_id, "event: conversation unassigned");
                }
                DomainEvent::AssignmentDegraded {
                    conversation_id,
                    dropped_agent_id,
                    reason,
                    ..
                } => {
                    debug!(
                        conversation = %conversation_id,
                        agent = %dropped_agent_id,
                        reason = %reason,
                        "event: assignment degraded"
                    );
                }
            },
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!(missed, "event log fell behind the bus");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

// --- Handlers ---

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}
