//! REST API handlers.

use std::sync::Arc;

use axum::extract::State;
use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};

use super::error::ApiError;
use crate::app::ChatCore;
use crate::auth::{Identity, SystemRole};
use crate::room::{RoomSpec, RoomSummary};
use crate::CoreError;

/// Shared application state.
pub type AppState = Arc<ChatCore>;

/// Login request body.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    /// Display name to log in as.
    pub display_name: String,
}

/// Login response body.
#[derive(Debug, Serialize)]
pub struct LoginResponse {
    /// Bearer token for subsequent requests and the WebSocket handshake.
    pub token: String,
    /// The resolved identity.
    pub identity: Identity,
}

/// Extract the bearer token from the Authorization header.
fn bearer_token(headers: &HeaderMap) -> Result<&str, ApiError> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| {
            ApiError(CoreError::Unauthenticated(
                "missing bearer token".to_string(),
            ))
        })
}

/// Log in by display name, registering the identity on first sight.
pub async fn login(
    State(core): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let name = request.display_name.trim();
    if name.is_empty() {
        return Err(ApiError(CoreError::Validation(
            "display name is empty".to_string(),
        )));
    }

    let identity = match core.directory().find_by_name(name) {
        Some(identity) => identity,
        None => core.directory().register(name, SystemRole::User)?,
    };
    let token = core.login(&identity)?;
    Ok(Json(LoginResponse { token, identity }))
}

/// Revoke the presented token.
pub async fn logout(
    State(core): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    let token = bearer_token(&headers)?;
    core.logout(token);
    Ok(Json(serde_json::json!({ "revoked": true })))
}

/// List all rooms.
pub async fn list_rooms(State(core): State<AppState>) -> Json<Vec<RoomSummary>> {
    Json(core.rooms().list().await)
}

/// Create a room owned by the caller.
pub async fn create_room(
    State(core): State<AppState>,
    headers: HeaderMap,
    Json(spec): Json<RoomSpec>,
) -> Result<Json<RoomSummary>, ApiError> {
    let token = bearer_token(&headers)?;
    let identity = core.sessions().validate(token)?;
    let room = core.rooms().create(identity.id, spec).await?;
    Ok(Json(RoomSummary {
        id: room.id(),
        name: room.name().to_string(),
        category: room.category().to_string(),
        privacy: room.privacy(),
        member_count: room.member_count().await,
        capacity: room.capacity(),
        ai_assisted: room.ai_assisted(),
    }))
}

/// Presence snapshot for a room the caller belongs to.
pub async fn room_presence(
    State(core): State<AppState>,
    headers: HeaderMap,
    axum::extract::Path(room_id): axum::extract::Path<String>,
) -> Result<Json<crate::presence::PresenceSnapshot>, ApiError> {
    let token = bearer_token(&headers)?;
    let identity = core.sessions().validate(token)?;
    let room_id = crate::room::RoomId::parse(&room_id)?;
    let room = core.rooms().get(room_id).await?;
    if !room.is_member(identity.id).await {
        return Err(ApiError(CoreError::NotAMember(room_id.to_string())));
    }
    Ok(Json(core.room_presence(room_id).await?))
}
