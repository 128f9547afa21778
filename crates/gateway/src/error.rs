use axum::http::StatusCode;
use fleetops_common::http::{self, ErrorKind};
use fleetops_saga::error::StartError;
use serde_json::json;

pub type ApiError = http::ApiError<ErrorCode>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    ValidationFailed,
    SagaAlreadyRunning,
    NotFound,
    EngineUnavailable,
    InternalError,
}

impl ErrorKind for ErrorCode {
    fn as_str(self) -> &'static str {
        match self {
            Self::ValidationFailed => "VALIDATION_FAILED",
            Self::SagaAlreadyRunning => "SAGA_ALREADY_RUNNING",
            Self::NotFound => "NOT_FOUND",
            Self::EngineUnavailable => "ENGINE_UNAVAILABLE",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }

    fn status(self) -> StatusCode {
        match self {
            Self::ValidationFailed => StatusCode::BAD_REQUEST,
            Self::SagaAlreadyRunning => StatusCode::CONFLICT,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::EngineUnavailable | Self::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// A running saga finishes on its own, so a conflicting start may be
    /// repeated later.
    fn retryable(self) -> bool {
        matches!(self, Self::SagaAlreadyRunning | Self::EngineUnavailable | Self::InternalError)
    }

    fn default_message(self) -> &'static str {
        match self {
            Self::ValidationFailed => "Invalid request payload",
            Self::SagaAlreadyRunning => "Disable robot workflow already running",
            Self::NotFound => "Workflow not found",
            Self::EngineUnavailable => "Failed to initiate workflow",
            Self::InternalError => "internal server error",
        }
    }
}

/// Map a refused saga start to the admin error envelope. Engine causes stay
/// in the logs.
pub fn start_rejection(error: StartError) -> ApiError {
    match error {
        StartError::MissingRobotId => ApiError::from_code(ErrorCode::ValidationFailed)
            .with_details(json!({ "reason": "robot_id is required" })),
        StartError::AlreadyRunning { workflow_id, run_id } => {
            ApiError::from_code(ErrorCode::SagaAlreadyRunning)
                .with_details(json!({ "workflow_id": workflow_id, "run_id": run_id }))
        }
        StartError::EngineUnavailable(_) => ApiError::from_code(ErrorCode::EngineUnavailable),
    }
}
