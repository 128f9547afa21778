use axum::http::StatusCode;
use fleetops_common::http::{self, ErrorKind};

pub type ApiError = http::ApiError<ErrorCode>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    ValidationFailed,
    UserNotConnected,
    DeliveryFailed,
    InternalError,
}

impl ErrorKind for ErrorCode {
    fn as_str(self) -> &'static str {
        match self {
            Self::ValidationFailed => "VALIDATION_FAILED",
            Self::UserNotConnected => "USER_NOT_CONNECTED",
            Self::DeliveryFailed => "DELIVERY_FAILED",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }

    fn status(self) -> StatusCode {
        match self {
            Self::ValidationFailed => StatusCode::BAD_REQUEST,
            Self::UserNotConnected => StatusCode::NOT_FOUND,
            Self::DeliveryFailed | Self::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// An absent operator may reconnect, so `UserNotConnected` is retryable.
    fn retryable(self) -> bool {
        matches!(self, Self::UserNotConnected | Self::DeliveryFailed | Self::InternalError)
    }

    fn default_message(self) -> &'static str {
        match self {
            Self::ValidationFailed => "Invalid request payload",
            Self::UserNotConnected => "User not connected",
            Self::DeliveryFailed => "Failed to send notification",
            Self::InternalError => "internal server error",
        }
    }
}
