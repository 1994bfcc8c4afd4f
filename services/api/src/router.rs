//! Axum Router Configuration
//!
//! This module defines the complete HTTP routing for the application,
//! including the REST API, both WebSocket endpoints, and OpenAPI
//! documentation.

use crate::{
    handlers,
    models::{
        ActiveSession, CallChannel, CallRecord, CallStatus, CallWithTurns, ErrorResponse,
        TurnRecord, TurnRole,
    },
    state::AppState,
    ws::{call_ws_handler, telephony_ws_handler},
};

use axum::{Router, routing::get};
use std::sync::Arc;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::list_calls,
        handlers::get_call,
        handlers::list_active_sessions,
    ),
    components(
        schemas(CallRecord, TurnRecord, CallWithTurns, ActiveSession, ErrorResponse, CallStatus, CallChannel, TurnRole)
    ),
    tags(
        (name = "Voice Bridge API", description = "Call history and live session introspection for the voice agent bridge")
    )
)]
pub struct ApiDoc;

/// Creates the main Axum router for the application.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    // Group all routes that require AppState into their own router.
    let api_router = Router::new()
        .route("/calls", get(handlers::list_calls))
        .route("/calls/{id}", get(handlers::get_call))
        .route("/sessions/active", get(handlers::list_active_sessions))
        .route("/ws/call", get(call_ws_handler))
        .route("/ws/telephony", get(telephony_ws_handler))
        .with_state(app_state);

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(api_router)
}
