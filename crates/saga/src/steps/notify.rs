use std::{future::Future, pin::Pin, sync::Arc, time::Duration};

use anyhow::{anyhow, Context, Result};
use fleetops_common::{protocol::notify::Notification, workflow::disabled_message};
use reqwest::StatusCode;
use tracing::debug;
use url::Url;

use crate::error::StepError;

pub const DEFAULT_NOTIFY_ENDPOINT: &str = "http://localhost:8082/notify";

/// Delivers a notification to the operator who asked for the disable.
pub trait NotificationSender: Send + Sync {
    fn send(
        &self,
        notification: Notification,
    ) -> Pin<Box<dyn Future<Output = Result<(), StepError>> + Send>>;
}

/// Posts notifications to the notification service's `/notify` endpoint.
#[derive(Debug, Clone)]
pub struct HttpNotificationSender {
    client: reqwest::Client,
    endpoint: Url,
}

impl HttpNotificationSender {
    pub fn new(endpoint: &str, request_timeout: Duration) -> Result<Self> {
        let endpoint = parse_endpoint(endpoint)?;
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .context("failed to build notification http client")?;
        Ok(Self { client, endpoint })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

fn parse_endpoint(value: &str) -> Result<Url> {
    let parsed =
        Url::parse(value).map_err(|error| anyhow!("invalid notify endpoint `{value}`: {error}"))?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        other => Err(anyhow!("notify endpoint `{value}` must use http or https, got `{other}`")),
    }
}

impl NotificationSender for HttpNotificationSender {
    fn send(
        &self,
        notification: Notification,
    ) -> Pin<Box<dyn Future<Output = Result<(), StepError>> + Send>> {
        let request = self.client.post(self.endpoint.clone()).json(&notification);

        Box::pin(async move {
            let response =
                request.send().await.map_err(|error| StepError::Transport(error.to_string()))?;
            let status = response.status();
            if status == StatusCode::OK {
                return Ok(());
            }

            let body = response.text().await.unwrap_or_default();
            debug!(status = status.as_u16(), body = %body, "notification service rejected request");
            Err(classify_rejection(status, &notification.user_id, body))
        })
    }
}

fn classify_rejection(status: StatusCode, user_id: &str, body: String) -> StepError {
    match status {
        StatusCode::BAD_REQUEST => StepError::InvalidPayload(rejection_message(body)),
        StatusCode::NOT_FOUND => StepError::NotConnected(user_id.to_string()),
        other => StepError::Transport(format!("notification service returned {other}")),
    }
}

/// Prefer the `error.message` of a JSON error envelope over the raw body.
fn rejection_message(body: String) -> String {
    let from_envelope = serde_json::from_str::<serde_json::Value>(&body).ok().and_then(|value| {
        value.pointer("/error/message").and_then(serde_json::Value::as_str).map(str::to_owned)
    });
    match from_envelope {
        Some(message) => message,
        None if body.is_empty() => "notification service rejected the payload".to_string(),
        None => body,
    }
}

pub struct NotifyStep {
    sender: Arc<dyn NotificationSender>,
}

impl NotifyStep {
    pub fn new(sender: Arc<dyn NotificationSender>) -> Self {
        Self { sender }
    }

    pub fn notification_for(robot_id: &str, user_id: &str) -> Notification {
        Notification::new(user_id, disabled_message(robot_id))
    }

    pub async fn execute(&self, robot_id: &str, user_id: &str) -> Result<(), StepError> {
        self.sender.send(Self::notification_for(robot_id, user_id)).await
    }
}
