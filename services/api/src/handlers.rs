//! Axum Handlers for the REST API
//!
//! Agent listing and call-record lookup for the dashboard. Live calls go
//! through the WebSocket in [`crate::ws`]; these endpoints are plain reads.
//! It uses `utoipa` doc comments to generate OpenAPI documentation.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use callboard_core::CallError;
use std::sync::Arc;
use tracing::{error, warn};

use crate::{
    models::{AgentResponse, CallRecordResponse, ErrorResponse},
    state::AppState,
};

pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    /// The calling API failed or answered with something unusable.
    BadGateway(String),
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
            ApiError::BadGateway(message) => {
                warn!("Upstream failure: {}", message);
                (StatusCode::BAD_GATEWAY, Json(ErrorResponse { message })).into_response()
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

impl From<CallError> for ApiError {
    fn from(err: CallError) -> Self {
        match err {
            CallError::Validation(_) => Self::BadRequest(err.reason()),
            CallError::NotFound(_) => Self::NotFound(err.reason()),
            // A rejected credential is our misconfiguration, not the caller's.
            CallError::Auth(_) => Self::InternalServerError(err.into()),
            CallError::Transport(_) | CallError::TransientFetch(_) | CallError::Service(_) => {
                Self::BadGateway(err.reason())
            }
            CallError::SessionInProgress | CallError::Cancelled => {
                Self::InternalServerError(err.into())
            }
        }
    }
}

/// List the agents a call can be started with.
#[utoipa::path(
    get,
    path = "/agents",
    responses(
        (status = 200, description = "Available agents", body = [AgentResponse]),
        (status = 502, description = "Calling API unavailable", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn list_agents(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<AgentResponse>>, ApiError> {
    let agents = state.calling_api.list_agents().await?;
    Ok(Json(agents.into_iter().map(AgentResponse::from).collect()))
}

/// Get the authoritative record for a call.
///
/// The fetched record goes through the shared cache, so a response never
/// shows an older `call_status` than one already served. If the calling API
/// is unavailable, the last cached copy is returned instead.
#[utoipa::path(
    get,
    path = "/calls/{id}",
    responses(
        (status = 200, description = "Call record", body = CallRecordResponse),
        (status = 404, description = "Call not found", body = ErrorResponse),
        (status = 502, description = "Calling API unavailable", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    params(
        ("id" = String, Path, description = "Call ID")
    )
)]
pub async fn get_call(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = id.trim();
    if id.is_empty() {
        return Err(ApiError::BadRequest("call id is required".to_string()));
    }
    if id == "." || id == ".." || id.contains(['/', '?', '#']) {
        return Err(ApiError::BadRequest(format!("'{}' is not a valid call id", id)));
    }

    match state.calling_api.get_call_record(id).await {
        Ok(record) if record.call_id == id => {
            state.records.merge(record);
        }
        Ok(record) => {
            warn!(
                requested = %id,
                returned = %record.call_id,
                "Calling API returned a different call"
            );
        }
        Err(CallError::NotFound(detail)) => return Err(CallError::NotFound(detail).into()),
        Err(e) => match state.records.get(id) {
            Some(cached) => {
                warn!(call_id = %id, error = %e, "Serving cached call record");
                return Ok((StatusCode::OK, Json(CallRecordResponse::from(cached))));
            }
            None => return Err(e.into()),
        },
    }

    let record = state
        .records
        .get(id)
        .ok_or_else(|| ApiError::NotFound(format!("Call with id '{}' not found", id)))?;
    Ok((StatusCode::OK, Json(CallRecordResponse::from(record))))
}
