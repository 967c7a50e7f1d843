//! Router configuration.

use axum::routing::{get, post};
use axum::Router;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use super::cors::create_cors_layer;
use super::handlers::{create_room, list_rooms, login, logout, room_presence, AppState};
use super::ws::ws_handler;

/// Create the main router: REST API plus the WebSocket endpoint.
pub fn create_router(state: AppState, cors_origins: &[String]) -> Router {
    let auth_routes = Router::new()
        .route("/login", post(login))
        .route("/logout", post(logout));

    let room_routes = Router::new()
        .route("/", get(list_rooms).post(create_room))
        .route("/:id/presence", get(room_presence));

    let api_routes = Router::new()
        .nest("/auth", auth_routes)
        .nest("/rooms", room_routes)
        .route("/ws", get(ws_handler));

    Router::new()
        .nest("/api", api_routes)
        .route("/health", get(health_check))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(create_cors_layer(cors_origins)),
        )
        .with_state(state)
}

/// Health check handler.
async fn health_check() -> &'static str {
    "OK"
}
