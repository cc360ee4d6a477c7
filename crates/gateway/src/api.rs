//! REST API for Switchboard.
//!
//! Every route here is nested under `/api` by the gateway router.
//! Handlers speak in domain types and return domain errors; [`ApiError`]
//! maps those onto HTTP status codes at the boundary.

use std::collections::{BTreeMap, HashMap};

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use switchboard_core::conversation::{
    Conversation, ConversationAssignment, Conversations, InboundMessage,
};
use switchboard_core::directory::{Agent, Directory, Team};
use switchboard_core::error::{
    AssignmentError, Error, ErrorKind, PresenceError, RoutingError, StoreError,
};
use switchboard_core::ids::{AgentId, ConversationId, RuleId, TeamId};
use switchboard_core::presence::{
    AgentPresence, AgentStatus, LiveLocation, PresenceSource, StatusSeconds,
};
use switchboard_core::routing::{RoutingRule, RuleConfig};
use switchboard_presence::{
    current_window, effective_status, is_presence_eligible, LocationHeartbeat, PresenceUpdate,
    ShiftActivity,
};
use switchboard_routing::{AssignmentRequest, RoutingDecision};
use tracing::error;

use crate::SharedState;

// ── Errors ────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Domain error carried across the HTTP boundary.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }
}

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        let status = match e.kind() {
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::Internal => {
                error!(error = %e, "request failed on an internal error");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self {
            status,
            message: e.to_string(),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        Error::from(e).into()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorResponse {
                error: self.message,
            }),
        )
            .into_response()
    }
}

// ── Router ────────────────────────────────────────────────────────────────

/// Build the API router. Nest this under "/api" in the main router.
pub fn api_router(state: SharedState) -> Router {
    Router::new()
        .route("/presence/heartbeat", post(heartbeat_handler))
        .route("/presence/override", post(set_override_handler))
        .route(
            "/presence/override/{agent_id}",
            axum::routing::delete(clear_override_handler),
        )
        .route("/presence/location", post(location_handler))
        .route("/presence/locations", get(live_locations_handler))
        .route("/presence/{agent_id}", get(get_presence_handler))
        .route("/teams/{team_id}/presence", get(team_presence_handler))
        .route(
            "/agents/{agent_id}/time-in-status",
            get(time_in_status_handler),
        )
        .route(
            "/agents/{agent_id}/shift-activity",
            get(shift_activity_handler),
        )
        .route("/reports/time-in-status", post(bulk_time_in_status_handler))
        .route("/messages", post(route_message_handler))
        .route("/conversations", post(create_conversation_handler))
        .route("/conversations/{id}", get(get_conversation_handler))
        .route(
            "/conversations/{id}/resolve",
            post(resolve_conversation_handler),
        )
        .route("/conversations/{id}/assignment", post(assign_handler))
        .route(
            "/conversations/{id}/assignment",
            axum::routing::delete(unassign_handler),
        )
        .route("/agents", post(create_agent_handler))
        .route("/teams", post(create_team_handler))
        .route("/teams/{team_id}/members", post(add_member_handler))
        .route(
            "/teams/{team_id}/members/{agent_id}",
            axum::routing::delete(remove_member_handler),
        )
        .route("/routing/rules", get(list_rules_handler))
        .route("/routing/rules", post(create_rule_handler))
        .route(
            "/routing/rules/{id}",
            axum::routing::delete(delete_rule_handler),
        )
        .route("/settings/timezone", get(get_timezone_handler))
        .route(
            "/settings/timezone",
            axum::routing::put(set_timezone_handler),
        )
        .with_state(state)
}

// ── Request / Response types ──────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct HeartbeatRequest {
    pub agent_id: String,
    /// Raw status to record. Missing keeps the current one.
    pub status: Option<AgentStatus>,
    #[serde(default)]
    pub source: PresenceSource,
}

#[derive(Debug, Deserialize)]
pub struct OverrideRequest {
    pub agent_id: String,
    pub status: AgentStatus,
}

#[derive(Debug, Deserialize)]
pub struct LocationRequest {
    pub agent_id: String,
    pub sharing_enabled: bool,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub accuracy_m: Option<f64>,
    pub captured_at: Option<DateTime<Utc>>,
    pub status: Option<AgentStatus>,
    #[serde(default)]
    pub source: PresenceSource,
}

#[derive(Debug, Deserialize)]
pub struct LiveLocationsQuery {
    pub stale_after_seconds: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LiveLocationsResponse {
    pub locations: Vec<LiveLocation>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PresenceResponse {
    pub agent_id: String,
    pub status: AgentStatus,
    pub effective_status: AgentStatus,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub manual_override_status: Option<AgentStatus>,
    pub manual_override_set_at: Option<DateTime<Utc>>,
    pub location_sharing_enabled: bool,
}

impl PresenceResponse {
    fn from_snapshot(presence: &AgentPresence, effective: AgentStatus) -> Self {
        Self {
            agent_id: presence.agent_id.as_str().to_string(),
            status: presence.status,
            effective_status: effective,
            last_seen_at: presence.last_seen_at,
            manual_override_status: presence.manual_override_status,
            manual_override_set_at: presence.manual_override_set_at,
            location_sharing_enabled: presence.location_sharing_enabled,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PresenceUpdateResponse {
    #[serde(flatten)]
    pub presence: PresenceResponse,
    pub transitioned: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TeamMemberPresence {
    pub agent_id: String,
    pub name: String,
    /// `None` for members who have never sent a heartbeat.
    pub presence: Option<PresenceResponse>,
    /// Whether routing would consider this member right now.
    pub eligible: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TeamPresenceResponse {
    pub team_id: String,
    pub members: Vec<TeamMemberPresence>,
}

#[derive(Debug, Deserialize)]
pub struct TimeRangeQuery {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TimeInStatusResponse {
    pub agent_id: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub seconds: StatusSeconds,
}

#[derive(Debug, Deserialize)]
pub struct BulkTimeInStatusRequest {
    pub agent_ids: Vec<String>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BulkTimeInStatusResponse {
    pub totals: BTreeMap<String, StatusSeconds>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ShiftActivityResponse {
    pub agent_id: String,
    pub timezone: String,
    #[serde(flatten)]
    pub activity: ShiftActivity,
}

#[derive(Debug, Deserialize)]
pub struct RouteMessageRequest {
    pub conversation_id: String,
    pub channel_type: String,
    pub channel_target_id: Option<String>,
    #[serde(default)]
    pub body: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RouteMessageResponse {
    /// `None` when no rule matched or the conversation already has an
    /// agent.
    pub decision: Option<RoutingDecision>,
    pub assignment: Option<ConversationAssignment>,
    pub degraded: bool,
}

#[derive(Debug, Deserialize)]
pub struct CreateConversationRequest {
    pub channel_type: String,
    pub channel_target_id: Option<String>,
    /// Client-supplied id, for channels that bring their own.
    #[serde(default)]
    pub id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ConversationDetailResponse {
    pub conversation: Conversation,
    pub assignment: Option<ConversationAssignment>,
}

#[derive(Debug, Deserialize)]
pub struct AssignRequest {
    pub agent_id: Option<String>,
    pub team_id: Option<String>,
    pub assigned_by_id: Option<String>,
    #[serde(default)]
    pub degrade_on_unavailable: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AssignmentResponse {
    pub assignment: Option<ConversationAssignment>,
    pub degraded: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UnassignResponse {
    pub released: u64,
}

#[derive(Debug, Deserialize)]
pub struct CreateAgentRequest {
    pub name: String,
    #[serde(default)]
    pub id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateTeamRequest {
    pub name: String,
    #[serde(default)]
    pub id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AddMemberRequest {
    pub agent_id: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateRuleRequest {
    pub team_id: String,
    pub channel_type: String,
    #[serde(default)]
    pub config: RuleConfig,
}

#[derive(Debug, Deserialize)]
pub struct RulesQuery {
    pub channel_type: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RulesResponse {
    pub rules: Vec<RoutingRule>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TimezoneResponse {
    pub timezone: String,
}

#[derive(Debug, Deserialize)]
pub struct SetTimezoneRequest {
    pub timezone: String,
}

fn update_response(update: &PresenceUpdate) -> PresenceUpdateResponse {
    PresenceUpdateResponse {
        presence: PresenceResponse::from_snapshot(&update.presence, update.effective_status),
        transitioned: update.transitioned,
    }
}

// ── Presence handlers ─────────────────────────────────────────────────────

async fn heartbeat_handler(
    State(state): State<SharedState>,
    Json(req): Json<HeartbeatRequest>,
) -> Result<Json<PresenceUpdateResponse>, ApiError> {
    let agent_id = AgentId(req.agent_id);
    let update = state
        .presence
        .upsert_heartbeat(&agent_id, req.status, req.source)
        .await?;
    Ok(Json(update_response(&update)))
}

async fn set_override_handler(
    State(state): State<SharedState>,
    Json(req): Json<OverrideRequest>,
) -> Result<Json<PresenceUpdateResponse>, ApiError> {
    let agent_id = AgentId(req.agent_id);
    let update = state
        .presence
        .set_manual_override(&agent_id, req.status)
        .await?;
    Ok(Json(update_response(&update)))
}

async fn clear_override_handler(
    State(state): State<SharedState>,
    Path(agent_id): Path<String>,
) -> Result<Json<PresenceUpdateResponse>, ApiError> {
    let update = state
        .presence
        .clear_manual_override(&AgentId(agent_id))
        .await?;
    Ok(Json(update_response(&update)))
}

async fn location_handler(
    State(state): State<SharedState>,
    Json(req): Json<LocationRequest>,
) -> Result<Json<PresenceUpdateResponse>, ApiError> {
    let heartbeat = LocationHeartbeat {
        agent_id: AgentId(req.agent_id),
        sharing_enabled: req.sharing_enabled,
        latitude: req.latitude,
        longitude: req.longitude,
        accuracy_m: req.accuracy_m,
        captured_at: req.captured_at,
        status: req.status,
        source: req.source,
    };
    let update = state.presence.upsert_location_heartbeat(heartbeat).await?;
    Ok(Json(update_response(&update)))
}

async fn live_locations_handler(
    State(state): State<SharedState>,
    Query(query): Query<LiveLocationsQuery>,
) -> Result<Json<LiveLocationsResponse>, ApiError> {
    let stale_after = query
        .stale_after_seconds
        .unwrap_or(state.location_stale_after_seconds);
    let limit = query.limit.unwrap_or(100);
    let locations = state
        .presence
        .list_live_locations(stale_after, limit)
        .await?;
    Ok(Json(LiveLocationsResponse { locations }))
}

async fn get_presence_handler(
    State(state): State<SharedState>,
    Path(agent_id): Path<String>,
) -> Result<Json<PresenceResponse>, ApiError> {
    let id = AgentId(agent_id);
    let presence = state
        .presence
        .presence(&id)
        .await?
        .ok_or_else(|| Error::from(PresenceError::NotFound(id.as_str().to_string())))?;
    let effective = effective_status(&presence, state.presence.stale_after(), Utc::now());
    Ok(Json(PresenceResponse::from_snapshot(&presence, effective)))
}

async fn team_presence_handler(
    State(state): State<SharedState>,
    Path(team_id): Path<String>,
) -> Result<Json<TeamPresenceResponse>, ApiError> {
    let team_id = TeamId(team_id);
    let team = state
        .directory
        .team(&team_id)
        .await?
        .ok_or_else(|| Error::from(RoutingError::TeamNotFound(team_id.as_str().to_string())))?;

    let members = state.directory.team_members(&team_id).await?;
    let ids: Vec<AgentId> = members.iter().map(|agent| agent.id.clone()).collect();
    let mut by_agent: HashMap<AgentId, AgentPresence> = state
        .presence
        .presence_of(&ids)
        .await?
        .into_iter()
        .map(|presence| (presence.agent_id.clone(), presence))
        .collect();

    let stale_after = state.presence.stale_after();
    let now = Utc::now();
    let members = members
        .into_iter()
        .map(|agent| {
            let snapshot = by_agent.remove(&agent.id);
            let eligible = snapshot
                .as_ref()
                .map(|presence| is_presence_eligible(presence, stale_after, now))
                .unwrap_or(false);
            let presence = snapshot.as_ref().map(|presence| {
                PresenceResponse::from_snapshot(
                    presence,
                    effective_status(presence, stale_after, now),
                )
            });
            TeamMemberPresence {
                agent_id: agent.id.as_str().to_string(),
                name: agent.name,
                presence,
                eligible,
            }
        })
        .collect();

    Ok(Json(TeamPresenceResponse {
        team_id: team.id.as_str().to_string(),
        members,
    }))
}

// ── Reporting handlers ────────────────────────────────────────────────────

async fn time_in_status_handler(
    State(state): State<SharedState>,
    Path(agent_id): Path<String>,
    Query(range): Query<TimeRangeQuery>,
) -> Result<Json<TimeInStatusResponse>, ApiError> {
    let id = AgentId(agent_id);
    let seconds = state
        .reports
        .seconds_by_status(&id, range.start, range.end)
        .await?;
    Ok(Json(TimeInStatusResponse {
        agent_id: id.as_str().to_string(),
        start: range.start,
        end: range.end,
        seconds,
    }))
}

async fn bulk_time_in_status_handler(
    State(state): State<SharedState>,
    Json(req): Json<BulkTimeInStatusRequest>,
) -> Result<Json<BulkTimeInStatusResponse>, ApiError> {
    let ids: Vec<AgentId> = req.agent_ids.into_iter().map(AgentId).collect();
    let totals = state
        .reports
        .seconds_by_status_bulk(&ids, req.start, req.end)
        .await?
        .into_iter()
        .map(|(id, seconds)| (id.0, seconds))
        .collect();
    Ok(Json(BulkTimeInStatusResponse { totals }))
}

async fn shift_activity_handler(
    State(state): State<SharedState>,
    Path(agent_id): Path<String>,
) -> Result<Json<ShiftActivityResponse>, ApiError> {
    let id = AgentId(agent_id);
    let now = Utc::now();
    let timezone = state.timezone.resolve().await?;
    let window = current_window(now, &timezone);
    let activity = state.reports.shift_activity(&id, window, now).await?;
    Ok(Json(ShiftActivityResponse {
        agent_id: id.as_str().to_string(),
        timezone,
        activity,
    }))
}

// ── Routing handlers ──────────────────────────────────────────────────────

async fn route_message_handler(
    State(state): State<SharedState>,
    Json(req): Json<RouteMessageRequest>,
) -> Result<Json<RouteMessageResponse>, ApiError> {
    let message = InboundMessage {
        conversation_id: ConversationId(req.conversation_id),
        channel_type: req.channel_type,
        channel_target_id: req.channel_target_id,
        body: req.body,
    };

    let Some(decision) = state.engine.apply_routing(&message).await? else {
        return Ok(Json(RouteMessageResponse {
            decision: None,
            assignment: None,
            degraded: false,
        }));
    };

    let outcome = state
        .assignments
        .assign(AssignmentRequest::from_decision(
            message.conversation_id.clone(),
            &decision,
        ))
        .await?;

    Ok(Json(RouteMessageResponse {
        decision: Some(decision),
        assignment: outcome.assignment,
        degraded: outcome.degraded,
    }))
}

async fn create_rule_handler(
    State(state): State<SharedState>,
    Json(req): Json<CreateRuleRequest>,
) -> Result<(StatusCode, Json<RoutingRule>), ApiError> {
    let team_id = TeamId(req.team_id);
    if state.directory.team(&team_id).await?.is_none() {
        return Err(
            Error::from(RoutingError::TeamNotFound(team_id.as_str().to_string())).into(),
        );
    }
    let rule = state
        .rules
        .create_rule(&team_id, &req.channel_type, req.config)
        .await?;
    Ok((StatusCode::CREATED, Json(rule)))
}

async fn list_rules_handler(
    State(state): State<SharedState>,
    Query(query): Query<RulesQuery>,
) -> Result<Json<RulesResponse>, ApiError> {
    let rules = state.rules.list_rules(query.channel_type.as_deref()).await?;
    Ok(Json(RulesResponse { rules }))
}

async fn delete_rule_handler(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    if !state.rules.deactivate_rule(&RuleId(id)).await? {
        return Err(ApiError::not_found("no active rule with that id"));
    }
    Ok(StatusCode::NO_CONTENT)
}

// ── Conversation handlers ─────────────────────────────────────────────────

async fn create_conversation_handler(
    State(state): State<SharedState>,
    Json(req): Json<CreateConversationRequest>,
) -> Result<(StatusCode, Json<Conversation>), ApiError> {
    let mut conversation = Conversation::new(req.channel_type, req.channel_target_id);
    if let Some(id) = req.id {
        conversation.id = ConversationId(id);
    }
    state.conversations.create(&conversation).await?;
    Ok((StatusCode::CREATED, Json(conversation)))
}

async fn get_conversation_handler(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<ConversationDetailResponse>, ApiError> {
    let id = ConversationId(id);
    let conversation = state.conversations.conversation(&id).await?.ok_or_else(|| {
        Error::from(RoutingError::ConversationNotFound(id.as_str().to_string()))
    })?;
    let assignment = state.conversations.active_assignment(&id).await?;
    Ok(Json(ConversationDetailResponse {
        conversation,
        assignment,
    }))
}

async fn resolve_conversation_handler(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id = ConversationId(id);
    if !state.conversations.set_resolved(&id, true).await? {
        return Err(Error::from(RoutingError::ConversationNotFound(
            id.as_str().to_string(),
        ))
        .into());
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn assign_handler(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(req): Json<AssignRequest>,
) -> Result<Json<AssignmentResponse>, ApiError> {
    let request = AssignmentRequest {
        conversation_id: ConversationId(id),
        agent_id: req.agent_id.map(AgentId),
        team_id: req.team_id.map(TeamId),
        assigned_by_id: req.assigned_by_id.map(AgentId),
        degrade_on_unavailable: req.degrade_on_unavailable,
    };
    let outcome = state.assignments.assign(request).await?;
    Ok(Json(AssignmentResponse {
        assignment: outcome.assignment,
        degraded: outcome.degraded,
    }))
}

async fn unassign_handler(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<UnassignResponse>, ApiError> {
    let released = state.assignments.unassign(&ConversationId(id)).await?;
    Ok(Json(UnassignResponse { released }))
}

// ── Directory handlers ────────────────────────────────────────────────────

async fn create_agent_handler(
    State(state): State<SharedState>,
    Json(req): Json<CreateAgentRequest>,
) -> Result<(StatusCode, Json<Agent>), ApiError> {
    let mut agent = Agent::new(req.name);
    if let Some(id) = req.id {
        agent.id = AgentId(id);
    }
    state.directory.upsert_agent(&agent).await?;
    Ok((StatusCode::CREATED, Json(agent)))
}

async fn create_team_handler(
    State(state): State<SharedState>,
    Json(req): Json<CreateTeamRequest>,
) -> Result<(StatusCode, Json<Team>), ApiError> {
    let mut team = Team::new(req.name);
    if let Some(id) = req.id {
        team.id = TeamId(id);
    }
    state.directory.upsert_team(&team).await?;
    Ok((StatusCode::CREATED, Json(team)))
}

async fn add_member_handler(
    State(state): State<SharedState>,
    Path(team_id): Path<String>,
    Json(req): Json<AddMemberRequest>,
) -> Result<StatusCode, ApiError> {
    let team_id = TeamId(team_id);
    let agent_id = AgentId(req.agent_id);
    if state.directory.team(&team_id).await?.is_none() {
        return Err(
            Error::from(AssignmentError::TeamNotFound(team_id.as_str().to_string())).into(),
        );
    }
    if state.directory.agent(&agent_id).await?.is_none() {
        return Err(Error::from(AssignmentError::AgentNotFound(
            agent_id.as_str().to_string(),
        ))
        .into());
    }
    state.directory.add_member(&team_id, &agent_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn remove_member_handler(
    State(state): State<SharedState>,
    Path((team_id, agent_id)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    let removed = state
        .directory
        .remove_member(&TeamId(team_id), &AgentId(agent_id))
        .await?;
    if !removed {
        return Err(ApiError::not_found("no active membership to remove"));
    }
    Ok(StatusCode::NO_CONTENT)
}

// ── Settings handlers ─────────────────────────────────────────────────────

async fn get_timezone_handler(
    State(state): State<SharedState>,
) -> Result<Json<TimezoneResponse>, ApiError> {
    let timezone = state.timezone.resolve().await?;
    Ok(Json(TimezoneResponse { timezone }))
}

async fn set_timezone_handler(
    State(state): State<SharedState>,
    Json(req): Json<SetTimezoneRequest>,
) -> Result<Json<TimezoneResponse>, ApiError> {
    let timezone = state.timezone.set_timezone(&req.timezone).await?;
    Ok(Json(TimezoneResponse { timezone }))
}
