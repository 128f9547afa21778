use std::{sync::Arc, time::Duration};

use axum::{
    extract::{
        ws::{
            close_code, rejection::WebSocketUpgradeRejection, CloseFrame, Message, Utf8Bytes,
            WebSocket, WebSocketUpgrade,
        },
        Query, State,
    },
    response::{IntoResponse, Response},
};
use fleetops_common::{
    http::{current_request_id, with_request_id_scope},
    protocol::notify::Notification,
};
use serde::Deserialize;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::{
    error::{ApiError, ErrorCode},
    registry::{Connection, ConnectionRegistry},
    AppState,
};

pub(crate) const HEARTBEAT_INTERVAL_MS: u64 = 15_000;
pub(crate) const HEARTBEAT_TIMEOUT_MS: u64 = 10_000;
pub(crate) const MAX_FRAME_BYTES: usize = 65_536;
pub(crate) const OUTBOUND_QUEUE_CAPACITY: usize = 32;

const SUPERSEDED_REASON: &str = "superseded by a newer connection";

/// Server-side liveness check: ping every `interval`, drop the connection
/// when a ping is not answered within `timeout`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Heartbeat {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(HEARTBEAT_INTERVAL_MS),
            timeout: Duration::from_millis(HEARTBEAT_TIMEOUT_MS),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ConnectParams {
    #[serde(rename = "userID", default)]
    pub user_id: Option<String>,
}

pub async fn ws_upgrade(
    State(state): State<AppState>,
    Query(params): Query<ConnectParams>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let Some(user_id) = params.user_id.filter(|user_id| !user_id.is_empty()) else {
        return ApiError::new(ErrorCode::ValidationFailed, "userID is required").into_response();
    };

    let upgrade = match upgrade {
        Ok(upgrade) => upgrade,
        Err(rejection) => {
            warn!(user_id = %user_id, %rejection, "failed to upgrade to websocket");
            return rejection.into_response();
        }
    };

    let registry = Arc::clone(&state.registry);
    let heartbeat = state.heartbeat;
    let request_id = current_request_id().unwrap_or_else(|| "unknown".to_string());
    upgrade.max_message_size(MAX_FRAME_BYTES).on_upgrade(move |socket| async move {
        with_request_id_scope(request_id, handle_socket(registry, heartbeat, user_id, socket)).await;
    })
}

async fn handle_socket(
    registry: Arc<ConnectionRegistry>,
    heartbeat: Heartbeat,
    user_id: String,
    mut socket: WebSocket,
) {
    let (connection, mut outbound) = Connection::channel(OUTBOUND_QUEUE_CAPACITY);
    let lease = registry.register(&user_id, connection);
    let connection_id = lease.connection_id();
    // Every socket write, pings included, is bounded by the registry write
    // timeout. A write that does not finish ends the connection.
    let write_timeout = registry.write_timeout();

    let mut heartbeat_interval = tokio::time::interval(heartbeat.interval);
    heartbeat_interval.reset();
    let mut pong_deadline: Option<Instant> = None;

    loop {
        tokio::select! {
            _ = heartbeat_interval.tick() => {
                if pong_deadline.is_some() {
                    continue;
                }
                if let Err(reason) = send_bounded(&mut socket, Message::Ping(Vec::new().into()), write_timeout).await {
                    warn!(user_id = %user_id, connection_id = %connection_id, reason = %reason, "failed to send heartbeat ping");
                    break;
                }
                pong_deadline = Some(Instant::now() + heartbeat.timeout);
            }
            _ = wait_for_deadline(pong_deadline) => {
                warn!(user_id = %user_id, connection_id = %connection_id, "heartbeat timeout, disconnecting");
                break;
            }
            maybe_frame = outbound.recv() => {
                let Some(frame) = maybe_frame else {
                    let close = Message::Close(Some(CloseFrame {
                        code: close_code::NORMAL,
                        reason: Utf8Bytes::from_static(SUPERSEDED_REASON),
                    }));
                    let _ = send_bounded(&mut socket, close, write_timeout).await;
                    break;
                };

                let result = write_notification(&mut socket, &frame.notification, write_timeout).await;
                let failed = result.is_err();
                if let Err(reason) = &result {
                    warn!(user_id = %user_id, connection_id = %connection_id, reason = %reason, "failed to send notification");
                }
                let _ = frame.written.send(result);
                if failed {
                    break;
                }
            }
            maybe_message = socket.recv() => {
                let Some(message) = maybe_message else {
                    break;
                };

                match message {
                    Ok(Message::Close(_)) => break,
                    Ok(Message::Ping(payload)) => {
                        if send_bounded(&mut socket, Message::Pong(payload), write_timeout).await.is_err() {
                            break;
                        }
                    }
                    Ok(Message::Pong(_)) => {
                        pong_deadline = None;
                    }
                    Ok(_) => {
                        // Operators do not send anything meaningful upstream.
                        pong_deadline = None;
                        debug!(user_id = %user_id, "ignoring inbound websocket message");
                    }
                    Err(error) => {
                        warn!(user_id = %user_id, connection_id = %connection_id, error = %error, "websocket error");
                        break;
                    }
                }
            }
        }
    }

    drop(lease);
}

async fn wait_for_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn send_bounded(socket: &mut WebSocket, message: Message, limit: Duration) -> Result<(), String> {
    match tokio::time::timeout(limit, socket.send(message)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(error)) => Err(error.to_string()),
        Err(_) => Err(format!("socket write did not finish within {limit:?}")),
    }
}

async fn write_notification(
    socket: &mut WebSocket,
    notification: &Notification,
    limit: Duration,
) -> Result<(), String> {
    let encoded = serde_json::to_string(notification).map_err(|error| error.to_string())?;
    send_bounded(socket, Message::Text(encoded.into()), limit).await
}
