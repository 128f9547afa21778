// Admin API: start a disable saga and look up its latest run.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use fleetops_common::protocol::admin::{DisableRobotRequest, DisableRobotResponse};
use fleetops_saga::{engine::SagaInput, error::StartError};
use serde_json::json;
use tracing::{error, info};

use crate::{
    error::{start_rejection, ApiError, ErrorCode},
    AppState,
};

/// `POST /disable_robot`. Answers once the saga is durably started; the
/// outcome is only visible through `GET /workflows/{workflow_id}` and logs.
pub async fn disable_robot(
    State(state): State<AppState>,
    payload: Result<Json<DisableRobotRequest>, JsonRejection>,
) -> Response {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => {
            return ApiError::from_code(ErrorCode::ValidationFailed)
                .with_details(json!({ "reason": rejection.body_text() }))
                .into_response();
        }
    };

    match state.engine.start(SagaInput::new(request.robot_id.clone(), request.user_id)) {
        Ok(handle) => {
            let (workflow_id, run_id) = (handle.workflow_id(), handle.run_id());
            info!(workflow_id = %workflow_id, run_id = %run_id, robot_id = %request.robot_id, "disable robot workflow initiated");
            (
                StatusCode::OK,
                Json(DisableRobotResponse::initiated(workflow_id, run_id, request.robot_id)),
            )
                .into_response()
        }
        Err(StartError::EngineUnavailable(cause)) => {
            error!(robot_id = %request.robot_id, error = %format!("{cause:#}"), "failed to initiate workflow");
            start_rejection(StartError::EngineUnavailable(cause)).into_response()
        }
        Err(other) => start_rejection(other).into_response(),
    }
}

/// `GET /workflows/{workflow_id}`: snapshot of the most recent run.
pub async fn workflow_status(
    State(state): State<AppState>,
    Path(workflow_id): Path<String>,
) -> Response {
    match state.engine.status(&workflow_id) {
        Ok(Some(record)) => (StatusCode::OK, Json(record)).into_response(),
        Ok(None) => ApiError::from_code(ErrorCode::NotFound)
            .with_details(json!({ "workflow_id": workflow_id }))
            .into_response(),
        Err(cause) => {
            error!(workflow_id = %workflow_id, error = %format!("{cause:#}"), "failed to load workflow status");
            ApiError::from_code(ErrorCode::InternalError).into_response()
        }
    }
}
