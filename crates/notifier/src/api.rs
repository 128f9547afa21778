// Notification delivery endpoint: `POST /notify`.
//
// Validates the payload, hands it to the registry and maps the outcome to
// an HTTP status. No retries here; the notify step owns retry.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use fleetops_common::protocol::notify::{Notification, NotifyAck, NotifyRequest};
use serde_json::json;
use tracing::{info, warn};

use crate::{
    error::{ApiError, ErrorCode},
    registry::DeliveryError,
    AppState,
};

pub async fn send_notification(
    State(state): State<AppState>,
    payload: Result<Json<NotifyRequest>, JsonRejection>,
) -> Response {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => {
            return ApiError::from_code(ErrorCode::ValidationFailed)
                .with_details(json!({ "reason": rejection.body_text() }))
                .into_response();
        }
    };

    let notification = Notification::from(request);
    if let Err(error) = notification.validate() {
        return ApiError::from_code(ErrorCode::ValidationFailed)
            .with_details(json!({ "reason": error.to_string() }))
            .into_response();
    }

    let user_id = notification.user_id.clone();
    match state.registry.send(&user_id, notification).await {
        Ok(delivered) => {
            info!(user_id = %delivered.user_id, connection_id = %delivered.connection_id, "notification delivered");
            (StatusCode::OK, Json(NotifyAck::delivered_to(delivered.user_id))).into_response()
        }
        Err(DeliveryError::NotConnected(user_id)) => {
            info!(user_id = %user_id, "notification target not connected");
            ApiError::from_code(ErrorCode::UserNotConnected)
                .with_details(json!({ "user_id": user_id }))
                .into_response()
        }
        Err(DeliveryError::Transport { user_id, reason }) => {
            warn!(user_id = %user_id, reason = %reason, "failed to send notification");
            ApiError::from_code(ErrorCode::DeliveryFailed)
                .with_details(json!({ "user_id": user_id }))
                .into_response()
        }
    }
}
