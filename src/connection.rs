//! Connection lifecycle and outbound delivery queues.
//!
//! Every accepted transport connection gets a bounded outbound queue. Senders
//! never block on a slow consumer: when a queue is full the oldest droppable
//! event is discarded, and if a sequenced event cannot be enqueued the
//! connection is declared backpressured and must be closed.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};

use serde::Serialize;
use tokio::sync::Notify;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::auth::{Identity, IdentityId, SessionManager};
use crate::bus::Message;
use crate::presence::PresenceSnapshot;
use crate::room::RoomId;
use crate::{CoreError, Result};

/// Opaque connection identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Generate a fresh connection ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Connection lifecycle state.
///
/// Transitions only move forward; `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Transport accepted, identity not yet verified.
    Connecting,
    /// Authenticated and eligible for delivery.
    Open,
    /// Shutting down; no new events are accepted.
    Closing,
    /// Fully torn down.
    Closed,
}

impl ConnectionState {
    fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Connecting, Open)
                | (Connecting, Closing)
                | (Connecting, Closed)
                | (Open, Closing)
                | (Open, Closed)
                | (Closing, Closed)
        )
    }
}

/// An event queued for delivery to one connection.
#[derive(Debug, Clone)]
pub enum OutboundEvent {
    /// A message accepted into a room stream.
    Message(Message),
    /// A history slice answering a resync request.
    History {
        /// Room the slice belongs to.
        room_id: RoomId,
        /// Messages in seq order.
        messages: Vec<Message>,
    },
    /// A presence snapshot for a room.
    Presence(PresenceSnapshot),
    /// A typing indicator.
    Typing {
        /// Room where the indicator applies.
        room_id: RoomId,
        /// Who is typing.
        identity_id: IdentityId,
        /// Whether they started or stopped.
        typing: bool,
    },
    /// An informational notice.
    Notice {
        /// Human-readable text.
        text: String,
    },
}

impl OutboundEvent {
    /// Sequenced events must never be dropped; losing one silently would put
    /// a gap in the client's view of the stream. Everything else can be
    /// regenerated and is droppable under pressure.
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            OutboundEvent::Message(_) | OutboundEvent::History { .. }
        )
    }

    fn is_notice(&self) -> bool {
        matches!(self, OutboundEvent::Notice { .. })
    }
}

/// Returned by [`OutboundQueue::push`] when a critical event cannot fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFull;

struct QueueInner {
    items: VecDeque<OutboundEvent>,
    notice_pending: bool,
    closed: bool,
}

/// Bounded outbound queue with drop-oldest-droppable overflow.
pub struct OutboundQueue {
    inner: Mutex<QueueInner>,
    notify: Notify,
    capacity: usize,
}

impl OutboundQueue {
    /// Create a queue holding at most `capacity` events.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                items: VecDeque::new(),
                notice_pending: false,
                closed: false,
            }),
            notify: Notify::new(),
            capacity: capacity.max(1),
        }
    }

    /// Enqueue an event without blocking.
    ///
    /// On overflow, droppable events are evicted oldest-first and a single
    /// lag notice is queued in their place. Fails only when a critical
    /// event cannot fit even after eviction.
    pub fn push(&self, event: OutboundEvent) -> std::result::Result<(), QueueFull> {
        let mut inner = self.inner.lock().expect("queue lock poisoned");
        if inner.closed {
            return Ok(());
        }

        let mut evicted = false;
        while inner.items.len() >= self.capacity {
            match inner.items.iter().position(|e| !e.is_critical()) {
                Some(pos) => {
                    if inner.items[pos].is_notice() {
                        inner.notice_pending = false;
                    }
                    inner.items.remove(pos);
                    evicted = true;
                }
                None if event.is_critical() => return Err(QueueFull),
                None => return Ok(()),
            }
        }

        if evicted && !inner.notice_pending {
            // The notice needs a slot of its own alongside the event, so
            // shed one more droppable when the queue is still tight.
            if inner.items.len() + 1 >= self.capacity {
                if let Some(pos) = inner.items.iter().position(|e| !e.is_critical()) {
                    inner.items.remove(pos);
                }
            }
            if inner.items.len() + 1 < self.capacity {
                inner.notice_pending = true;
                inner.items.push_back(OutboundEvent::Notice {
                    text: "delivery lagged; some updates were dropped".to_string(),
                });
            }
        }
        inner.items.push_back(event);
        drop(inner);
        self.notify.notify_one();
        Ok(())
    }

    /// Dequeue the next event, waiting until one is available.
    ///
    /// Returns `None` once the queue is closed and drained.
    pub async fn pop(&self) -> Option<OutboundEvent> {
        loop {
            {
                let mut inner = self.inner.lock().expect("queue lock poisoned");
                if let Some(event) = inner.items.pop_front() {
                    if event.is_notice() {
                        inner.notice_pending = false;
                    }
                    return Some(event);
                }
                if inner.closed {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }

    /// Close the queue. Queued events remain poppable; new pushes are
    /// silently discarded.
    pub fn close(&self) {
        let mut inner = self.inner.lock().expect("queue lock poisoned");
        inner.closed = true;
        drop(inner);
        self.notify.notify_waiters();
    }

    /// Current queue depth.
    pub fn len(&self) -> usize {
        self.inner.lock().expect("queue lock poisoned").items.len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One live connection.
pub struct Connection {
    id: ConnectionId,
    identity: Identity,
    state: Mutex<ConnectionState>,
    queue: OutboundQueue,
}

impl Connection {
    fn new(identity: Identity, queue_capacity: usize) -> Self {
        Self {
            id: ConnectionId::new(),
            identity,
            state: Mutex::new(ConnectionState::Connecting),
            queue: OutboundQueue::new(queue_capacity),
        }
    }

    /// Connection ID.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Identity bound to this connection.
    pub fn identity_id(&self) -> IdentityId {
        self.identity.id
    }

    /// Identity snapshot taken when the connection authenticated.
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        *self.state.lock().expect("state lock poisoned")
    }

    /// Outbound queue for the writer task.
    pub fn queue(&self) -> &OutboundQueue {
        &self.queue
    }

    fn transition(&self, next: ConnectionState) -> Result<()> {
        let mut state = self.state.lock().expect("state lock poisoned");
        if !state.can_transition_to(next) {
            return Err(CoreError::Internal(format!(
                "invalid connection transition {:?} -> {next:?}",
                *state
            )));
        }
        *state = next;
        Ok(())
    }
}

/// Registry of live connections.
pub struct ConnectionRegistry {
    sessions: Arc<SessionManager>,
    connections: RwLock<HashMap<ConnectionId, Arc<Connection>>>,
    queue_capacity: usize,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new(sessions: Arc<SessionManager>, queue_capacity: usize) -> Self {
        Self {
            sessions,
            connections: RwLock::new(HashMap::new()),
            queue_capacity,
        }
    }

    /// Accept a connection for the holder of `token`.
    ///
    /// The token is validated before the connection becomes visible; a
    /// rejected token never registers anything.
    pub fn open(&self, token: &str) -> Result<Arc<Connection>> {
        let identity = self.sessions.validate(token)?;
        let connection = Arc::new(Connection::new(identity, self.queue_capacity));
        connection.transition(ConnectionState::Open)?;

        let mut connections = self
            .connections
            .write()
            .expect("connection lock poisoned");
        connections.insert(connection.id(), Arc::clone(&connection));
        drop(connections);

        info!(
            connection = %connection.id(),
            identity = %connection.identity_id(),
            "Connection opened"
        );
        Ok(connection)
    }

    /// Close a connection and remove it from the registry. Idempotent.
    pub fn close(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        let removed = self
            .connections
            .write()
            .expect("connection lock poisoned")
            .remove(&id);

        if let Some(connection) = &removed {
            // A connection may already be past Open when the peer vanished.
            if connection.state().can_transition_to(ConnectionState::Closing) {
                let _ = connection.transition(ConnectionState::Closing);
            }
            connection.queue.close();
            let _ = connection.transition(ConnectionState::Closed);
            info!(connection = %id, "Connection closed");
        } else {
            debug!(connection = %id, "Close for unknown connection ignored");
        }
        removed
    }

    /// Deliver an event to one connection without blocking.
    ///
    /// Events for unknown or non-open connections are silently discarded.
    /// A `Backpressure` error means the connection fell too far behind and
    /// has been closed; the client must reconnect and resync.
    pub fn send(&self, id: ConnectionId, event: OutboundEvent) -> Result<()> {
        let connection = {
            let connections = self.connections.read().expect("connection lock poisoned");
            connections.get(&id).cloned()
        };
        let Some(connection) = connection else {
            return Ok(());
        };
        if connection.state() != ConnectionState::Open {
            return Ok(());
        }
        match connection.queue.push(event) {
            Ok(()) => Ok(()),
            Err(QueueFull) => {
                warn!(connection = %id, "Outbound queue overflowed, closing connection");
                self.close(id);
                Err(CoreError::Backpressure(id.to_string()))
            }
        }
    }

    /// Look up a connection.
    pub fn get(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.connections
            .read()
            .expect("connection lock poisoned")
            .get(&id)
            .cloned()
    }

    /// All open connection IDs for an identity.
    pub fn connections_for(&self, identity_id: IdentityId) -> Vec<ConnectionId> {
        self.connections
            .read()
            .expect("connection lock poisoned")
            .values()
            .filter(|c| c.identity_id() == identity_id && c.state() == ConnectionState::Open)
            .map(|c| c.id())
            .collect()
    }

    /// Identities with at least one open connection.
    pub fn connected_identities(&self) -> HashSet<IdentityId> {
        self.connections
            .read()
            .expect("connection lock poisoned")
            .values()
            .filter(|c| c.state() == ConnectionState::Open)
            .map(|c| c.identity_id())
            .collect()
    }

    /// Whether an identity has any open connection.
    pub fn is_connected(&self, identity_id: IdentityId) -> bool {
        self.connections
            .read()
            .expect("connection lock poisoned")
            .values()
            .any(|c| c.identity_id() == identity_id && c.state() == ConnectionState::Open)
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.connections
            .read()
            .expect("connection lock poisoned")
            .len()
    }
}
