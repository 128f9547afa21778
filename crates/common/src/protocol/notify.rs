// Notification payloads exchanged between the notify step, the delivery
// endpoint and operator WebSocket clients.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A message addressed to one operator.
///
/// The same JSON shape is used on the `POST /notify` request body and on the
/// text frame written to the operator's WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Notification {
    pub user_id: String,
    pub message: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PayloadError {
    #[error("user_id is required")]
    MissingUserId,

    #[error("message is required")]
    MissingMessage,
}

impl Notification {
    pub fn new(user_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self { user_id: user_id.into(), message: message.into() }
    }

    /// Both fields must be non-empty.
    pub fn validate(&self) -> Result<(), PayloadError> {
        if self.user_id.is_empty() {
            return Err(PayloadError::MissingUserId);
        }
        if self.message.is_empty() {
            return Err(PayloadError::MissingMessage);
        }
        Ok(())
    }
}

/// `POST /notify` success body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NotifyAck {
    pub delivered: bool,
    pub user_id: String,
    pub message: String,
}

impl NotifyAck {
    pub fn delivered_to(user_id: impl Into<String>) -> Self {
        let user_id = user_id.into();
        let message = format!("Notification sent to user: {user_id}");
        Self { delivered: true, user_id, message }
    }
}

/// Lenient request shape for `POST /notify`: absent fields decode as empty
/// strings so validation reports them instead of the JSON decoder.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NotifyRequest {
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub message: String,
}

impl From<NotifyRequest> for Notification {
    fn from(request: NotifyRequest) -> Self {
        Self { user_id: request.user_id, message: request.message }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_accepts_complete_notification() {
        assert_eq!(Notification::new("u1", "hi").validate(), Ok(()));
    }

    #[test]
    fn validate_rejects_empty_fields() {
        assert_eq!(Notification::new("", "hi").validate(), Err(PayloadError::MissingUserId));
        assert_eq!(Notification::new("u1", "").validate(), Err(PayloadError::MissingMessage));
    }

    #[test]
    fn notify_request_defaults_missing_fields() {
        let request: NotifyRequest =
            serde_json::from_str(r#"{"user_id":"u1"}"#).expect("request should decode");
        let notification = Notification::from(request);
        assert_eq!(notification.user_id, "u1");
        assert_eq!(notification.validate(), Err(PayloadError::MissingMessage));
    }

    #[test]
    fn ack_echoes_user_id() {
        let ack = NotifyAck::delivered_to("u1");
        assert!(ack.delivered);
        assert_eq!(ack.user_id, "u1");
        assert_eq!(ack.message, "Notification sent to user: u1");
    }
}
