// JSON error envelope:
// `{"error":{"code","message","retryable","request_id","details"}}`.
//
// Each service defines its own code enum and plugs it in through
// `ErrorKind`.

use std::fmt::Debug;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};

use super::request_id::{attach_request_id_header, current_request_id};

pub trait ErrorKind: Copy + Debug + Send + 'static {
    /// Wire string, e.g. `VALIDATION_FAILED`.
    fn as_str(self) -> &'static str;

    fn status(self) -> StatusCode;

    /// Whether the caller may succeed by repeating the same request later.
    fn retryable(self) -> bool;

    fn default_message(self) -> &'static str;
}

#[derive(Debug, Clone)]
pub struct ApiError<C> {
    code: C,
    message: String,
    details: Value,
}

impl<C: ErrorKind> ApiError<C> {
    pub fn new(code: C, message: impl Into<String>) -> Self {
        Self { code, message: message.into(), details: json!({}) }
    }

    pub fn from_code(code: C) -> Self {
        Self::new(code, code.default_message())
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    pub fn code(&self) -> C {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl<C: ErrorKind> IntoResponse for ApiError<C> {
    fn into_response(self) -> Response {
        let request_id = current_request_id();

        let mut response = (
            self.code.status(),
            Json(json!({
                "error": {
                    "code": self.code.as_str(),
                    "message": self.message,
                    "retryable": self.code.retryable(),
                    "request_id": request_id.clone(),
                    "details": self.details,
                }
            })),
        )
            .into_response();

        if let Some(request_id) = request_id {
            attach_request_id_header(&mut response, &request_id);
        }

        response
    }
}
