//! HTTP surface
//!
//! REST endpoints for projects, sessions, and permission rules, a consumer
//! WebSocket per session, and an SSE stream over the event bus. All handlers
//! delegate to the session manager, the store, and the permission engine.

pub mod rest;
pub mod sse;
pub mod ws;

use crate::bus::EventBus;
use crate::permissions::PermissionEngine;
use crate::session::SessionManager;
use crate::store::Database;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

/// Shared state for all handlers
#[derive(Clone)]
pub struct AppState {
    pub manager: SessionManager,
    pub store: Arc<Database>,
    pub permissions: Arc<PermissionEngine>,
    pub bus: Arc<EventBus>,
}

/// Build the full API router
pub fn api_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(rest::health))
        .route(
            "/api/projects",
            get(rest::list_projects).post(rest::create_project),
        )
        .route("/api/projects/:id", get(rest::get_project))
        .route(
            "/api/sessions",
            get(rest::list_sessions).post(rest::create_session),
        )
        .route(
            "/api/sessions/:id",
            get(rest::get_session).delete(rest::delete_session),
        )
        .route(
            "/api/sessions/:id/messages",
            get(rest::list_messages).post(rest::send_message),
        )
        .route("/api/sessions/:id/interrupt", axum::routing::post(rest::interrupt_session))
        .route(
            "/api/sessions/:id/permission-log",
            get(rest::list_permission_log),
        )
        .route(
            "/api/permission-rules",
            get(rest::list_rules).post(rest::create_rule),
        )
        .route(
            "/api/permission-rules/:id",
            axum::routing::patch(rest::update_rule).delete(rest::delete_rule),
        )
        .route("/api/events", get(sse::events))
        .route("/ws/sessions/:id", get(ws::consumer_ws_upgrade))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// HTTP status for each error kind
pub fn status_for(error: &crate::Error) -> StatusCode {
    match error {
        crate::Error::Validation(_) => StatusCode::BAD_REQUEST,
        crate::Error::NotFound(_) => StatusCode::NOT_FOUND,
        crate::Error::Conflict(_) => StatusCode::CONFLICT,
        crate::Error::Spawn(_) | crate::Error::Bridge(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Error wrapper that renders as `{"error": ...}` with the mapped status
pub struct ApiError(pub crate::Error);

impl From<crate::Error> for ApiError {
    fn from(error: crate::Error) -> Self {
        Self(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!("request failed: {}", self.0);
        }
        (status, Json(serde_json::json!({"error": self.0.to_string()}))).into_response()
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status_for(&crate::Error::Validation("x".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(&crate::Error::NotFound("x".into())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_for(&crate::Error::Conflict("x".into())),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_for(&crate::Error::Spawn("x".into())),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status_for(&crate::Error::Internal("x".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
