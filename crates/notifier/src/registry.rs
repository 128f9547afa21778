// Connection registry: operator id -> the single live WebSocket writer.
//
// The map lives behind one mutex. `send` only holds it long enough to clone
// the connection's outbound sender; the socket write itself happens on the
// connection's own task, and `send` waits for the write result with a
// bounded timeout.
//
// Replacing an entry drops the registry's sender for the old connection,
// which ends that connection's writer loop and closes its socket. Teardown
// goes through `ConnectionLease`, whose drop only removes the entry if it
// still belongs to the same connection.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use fleetops_common::protocol::notify::Notification;
use thiserror::Error;
use tokio::{
    sync::{mpsc, oneshot},
    time::{timeout_at, Instant},
};
use tracing::{debug, info};
use uuid::Uuid;

pub type ConnectionId = Uuid;

pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// A notification queued for one connection, plus the channel its writer
/// reports the socket write outcome on.
#[derive(Debug)]
pub struct OutboundFrame {
    pub notification: Notification,
    pub written: oneshot::Sender<Result<(), String>>,
}

/// Registry-side handle for one live connection.
#[derive(Debug, Clone)]
pub struct Connection {
    id: ConnectionId,
    outbound: mpsc::Sender<OutboundFrame>,
}

impl Connection {
    /// Create a handle and the receiver the connection task drains.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<OutboundFrame>) {
        let (outbound, receiver) = mpsc::channel(capacity.max(1));
        (Self { id: Uuid::new_v4(), outbound }, receiver)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivered {
    pub user_id: String,
    pub connection_id: ConnectionId,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("user {0} is not connected")]
    NotConnected(String),

    #[error("failed to write notification for user {user_id}: {reason}")]
    Transport { user_id: String, reason: String },
}

#[derive(Debug)]
pub struct ConnectionRegistry {
    connections: Mutex<HashMap<String, Connection>>,
    write_timeout: Duration,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_WRITE_TIMEOUT)
    }
}

impl ConnectionRegistry {
    pub fn new(write_timeout: Duration) -> Self {
        Self { connections: Mutex::new(HashMap::new()), write_timeout }
    }

    pub fn write_timeout(&self) -> Duration {
        self.write_timeout
    }

    /// Insert or replace the connection for `user_id`. Returns the id of the
    /// superseded connection, if any.
    pub fn connect(&self, user_id: &str, connection: Connection) -> Option<ConnectionId> {
        let connection_id = connection.id;
        let superseded = self.entries().insert(user_id.to_owned(), connection).map(|old| old.id);

        match superseded {
            Some(previous_id) => info!(
                user_id = %user_id,
                connection_id = %connection_id,
                superseded_connection_id = %previous_id,
                "client reconnected, previous connection superseded"
            ),
            None => info!(user_id = %user_id, connection_id = %connection_id, "client connected"),
        }

        superseded
    }

    /// Register a connection and return the lease that unregisters it when
    /// the connection task ends.
    pub fn register(self: &Arc<Self>, user_id: &str, connection: Connection) -> ConnectionLease {
        let connection_id = connection.id;
        self.connect(user_id, connection);
        ConnectionLease { registry: Arc::clone(self), user_id: user_id.to_owned(), connection_id }
    }

    /// Remove whatever connection is registered for `user_id`. Idempotent.
    pub fn disconnect(&self, user_id: &str) -> bool {
        let removed = self.entries().remove(user_id);
        if let Some(connection) = &removed {
            info!(user_id = %user_id, connection_id = %connection.id, "client evicted");
        }
        removed.is_some()
    }

    /// Remove the entry for `user_id` only if it is still `connection_id`.
    pub fn release(&self, user_id: &str, connection_id: ConnectionId) -> bool {
        let mut entries = self.entries();
        match entries.get(user_id) {
            Some(current) if current.id == connection_id => {
                entries.remove(user_id);
                true
            }
            _ => false,
        }
    }

    pub fn is_connected(&self, user_id: &str) -> bool {
        self.entries().contains_key(user_id)
    }

    pub fn current_connection(&self, user_id: &str) -> Option<ConnectionId> {
        self.entries().get(user_id).map(|connection| connection.id)
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    /// Write `notification` to the live connection for `user_id`.
    ///
    /// A failed write leaves the connection registered; the connection task
    /// owns teardown.
    pub async fn send(
        &self,
        user_id: &str,
        notification: Notification,
    ) -> Result<Delivered, DeliveryError> {
        let connection = self
            .entries()
            .get(user_id)
            .cloned()
            .ok_or_else(|| DeliveryError::NotConnected(user_id.to_owned()))?;

        let transport = |reason: &str| DeliveryError::Transport {
            user_id: user_id.to_owned(),
            reason: reason.to_owned(),
        };

        let deadline = Instant::now() + self.write_timeout;
        let (written, write_result) = oneshot::channel();
        let frame = OutboundFrame { notification, written };

        match timeout_at(deadline, connection.outbound.send(frame)).await {
            Err(_) => return Err(transport("write timed out waiting for connection queue")),
            Ok(Err(_)) => return Err(transport("connection closed")),
            Ok(Ok(())) => {}
        }

        match timeout_at(deadline, write_result).await {
            Err(_) => Err(transport("write timed out")),
            Ok(Err(_)) => Err(transport("connection closed before write completed")),
            Ok(Ok(Err(reason))) => Err(transport(&reason)),
            Ok(Ok(Ok(()))) => {
                debug!(user_id = %user_id, connection_id = %connection.id, "notification written");
                Ok(Delivered { user_id: user_id.to_owned(), connection_id: connection.id })
            }
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, Connection>> {
        self.connections.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Scoped registration owned by a connection task. Dropping it runs the
/// disconnect cleanup exactly once, whichever way the task exits.
#[derive(Debug)]
pub struct ConnectionLease {
    registry: Arc<ConnectionRegistry>,
    user_id: String,
    connection_id: ConnectionId,
}

impl ConnectionLease {
    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }
}

impl Drop for ConnectionLease {
    fn drop(&mut self) {
        if self.registry.release(&self.user_id, self.connection_id) {
            info!(user_id = %self.user_id, connection_id = %self.connection_id, "client disconnected");
        } else {
            debug!(
                user_id = %self.user_id,
                connection_id = %self.connection_id,
                "superseded connection closed"
            );
        }
    }
}
