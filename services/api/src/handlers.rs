//! Axum handlers for the REST API
//!
//! Read-only endpoints over call history plus a live view of connected
//! sessions. `utoipa` doc attributes generate the OpenAPI documentation.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::error;
use utoipa::IntoParams;
use uuid::Uuid;

use crate::{
    models::{ActiveSession, CallRecord, CallWithTurns, ErrorResponse},
    state::AppState,
};

pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    InternalServerError(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, Json(ErrorResponse { message })).into_response()
            }
            ApiError::NotFound(message) => {
                (StatusCode::NOT_FOUND, Json(ErrorResponse { message })).into_response()
            }
            ApiError::InternalServerError(err) => {
                error!("Internal Server Error: {:?}", err);
                let message = "An internal server error occurred.".to_string();
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ErrorResponse { message }),
                )
                    .into_response()
            }
        }
    }
}

impl<E> From<E> for ApiError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self::InternalServerError(err.into())
    }
}

#[derive(Deserialize, IntoParams)]
pub struct ListCallsParams {
    /// Workspace whose calls to list.
    pub workspace_id: Uuid,
}

/// List calls for a workspace, most recent first.
#[utoipa::path(
    get,
    path = "/calls",
    responses(
        (status = 200, description = "List of calls", body = [CallRecord]),
        (status = 400, description = "Bad request", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    params(ListCallsParams)
)]
pub async fn list_calls(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListCallsParams>,
) -> Result<Json<Vec<CallRecord>>, ApiError> {
    let calls = state.db.list_calls(params.workspace_id).await?;
    Ok(Json(calls))
}

/// Get a single call with its full turn history.
#[utoipa::path(
    get,
    path = "/calls/{id}",
    responses(
        (status = 200, description = "Call with turns", body = CallWithTurns),
        (status = 404, description = "Call not found", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    params(
        ("id" = Uuid, Path, description = "Call ID")
    )
)]
pub async fn get_call(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let call = state
        .db
        .get_call(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Call with id '{}' not found", id)))?;
    let turns = state.db.get_call_turns(id).await?;
    Ok((StatusCode::OK, Json(CallWithTurns { call, turns })))
}

/// List currently connected call sessions.
#[utoipa::path(
    get,
    path = "/sessions/active",
    responses(
        (status = 200, description = "Active sessions", body = [ActiveSession]),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn list_active_sessions(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<ActiveSession>>, ApiError> {
    let mut sessions: Vec<ActiveSession> = state
        .sessions
        .iter()
        .map(|entry| entry.value().clone())
        .collect();
    sessions.sort_by_key(|s| s.connected_at);
    Ok(Json(sessions))
}
