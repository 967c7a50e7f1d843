//! Room message streams.
//!
//! Each room has a single totally-ordered stream of messages. The bus
//! assigns sequence numbers, persists accepted messages, fans them out to
//! subscribed connections, and serves history for resync.

mod message;
mod store;

pub use message::{Author, Message, MessageKind, AI_AUTHOR_NAME, SYSTEM_AUTHOR_NAME};
#[cfg(feature = "sqlite")]
pub use store::SqliteStore;
pub use store::{MemoryStore, MessageStore};

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::ai::{AiResponder, RoomContext};
use crate::auth::IdentityDirectory;
use crate::connection::{ConnectionId, ConnectionRegistry, OutboundEvent};
use crate::room::{RoomId, RoomRegistry};
use crate::{CoreError, Result};

/// Per-room stream state.
///
/// Seq assignment, persistence, and fan-out all happen under this lock, so
/// delivery order always matches seq order. Different rooms never contend.
struct StreamState {
    next_seq: u64,
    subscribers: HashSet<ConnectionId>,
}

/// The message bus.
pub struct MessageBus {
    rooms: Arc<RoomRegistry>,
    connections: Arc<ConnectionRegistry>,
    directory: Arc<IdentityDirectory>,
    store: Arc<dyn MessageStore>,
    streams: RwLock<HashMap<RoomId, Arc<Mutex<StreamState>>>>,
    responder: Option<Arc<dyn AiResponder>>,
    max_history_limit: usize,
}

impl MessageBus {
    /// Create a bus over the given registries and store.
    pub fn new(
        rooms: Arc<RoomRegistry>,
        connections: Arc<ConnectionRegistry>,
        directory: Arc<IdentityDirectory>,
        store: Arc<dyn MessageStore>,
        max_history_limit: usize,
    ) -> Self {
        Self {
            rooms,
            connections,
            directory,
            store,
            streams: RwLock::new(HashMap::new()),
            responder: None,
            max_history_limit: max_history_limit.max(1),
        }
    }

    /// Attach an AI responder. Rooms with AI assistance enabled will run
    /// accepted text messages past it.
    pub fn with_responder(mut self, responder: Arc<dyn AiResponder>) -> Self {
        self.responder = Some(responder);
        self
    }

    /// Post a message to a room.
    ///
    /// Human authors must be members; system and AI authors bypass the
    /// membership check. The returned message carries its assigned seq.
    pub async fn post(
        self: &Arc<Self>,
        room_id: RoomId,
        author: Author,
        content: impl Into<String>,
        kind: MessageKind,
    ) -> Result<Message> {
        let content = content.into();
        if kind == MessageKind::Text && content.trim().is_empty() {
            return Err(CoreError::Validation("message is empty".to_string()));
        }

        let room = self.rooms.get(room_id).await?;
        let author_name = match author {
            Author::Identity { id } => {
                if !room.is_member(id).await {
                    return Err(CoreError::NotAMember(room_id.to_string()));
                }
                self.directory
                    .get(id)
                    .ok_or_else(|| CoreError::Unauthenticated("unknown identity".to_string()))?
                    .display_name
            }
            Author::System => SYSTEM_AUTHOR_NAME.to_string(),
            Author::Ai => AI_AUTHOR_NAME.to_string(),
        };

        let stream = self.stream(room_id).await?;
        let message = {
            let mut stream = stream.lock().await;
            let message = Message::new(
                room_id,
                stream.next_seq,
                author,
                author_name,
                content,
                kind,
            );
            // The seq is only consumed once the append succeeds; a store
            // failure must not leave a gap in the stream.
            self.store.append(&message).await?;
            stream.next_seq += 1;

            let mut dead = Vec::new();
            for connection_id in &stream.subscribers {
                if let Err(CoreError::Backpressure(_)) = self
                    .connections
                    .send(*connection_id, OutboundEvent::Message(message.clone()))
                {
                    dead.push(*connection_id);
                }
            }
            for connection_id in dead {
                stream.subscribers.remove(&connection_id);
            }
            message
        };

        debug!(room = %room_id, seq = message.seq, kind = %message.kind, "Message accepted");
        self.maybe_respond(&room, &message);
        Ok(message)
    }

    /// Load history after a known seq, for catching up or resync.
    ///
    /// `after_seq = 0` reads from the beginning. Fails with `ResyncRequired`
    /// when the requested position cannot be reconciled with the stream.
    pub async fn history(
        &self,
        room_id: RoomId,
        after_seq: u64,
        limit: usize,
    ) -> Result<Vec<Message>> {
        // Resolves NotFound before touching the store.
        self.rooms.get(room_id).await?;

        let last = self.store.last_seq(room_id).await?;
        if after_seq > last {
            return Err(CoreError::ResyncRequired(room_id.to_string()));
        }

        let limit = limit.clamp(1, self.max_history_limit);
        let messages = self.store.load_after(room_id, after_seq, limit).await?;

        // The slice must be gapless and start right after the cursor.
        let mut expected = after_seq + 1;
        for message in &messages {
            if message.seq != expected {
                warn!(
                    room = %room_id,
                    expected,
                    got = message.seq,
                    "History gap detected"
                );
                return Err(CoreError::ResyncRequired(room_id.to_string()));
            }
            expected += 1;
        }
        Ok(messages)
    }

    /// Subscribe a connection to a room's live stream.
    ///
    /// The connection's identity must be a member. Idempotent.
    pub async fn subscribe(&self, room_id: RoomId, connection_id: ConnectionId) -> Result<()> {
        let connection = self
            .connections
            .get(connection_id)
            .ok_or_else(|| CoreError::NotFound("connection".to_string()))?;
        let room = self.rooms.get(room_id).await?;
        if !room.is_member(connection.identity_id()).await {
            return Err(CoreError::NotAMember(room_id.to_string()));
        }

        let stream = self.stream(room_id).await?;
        stream.lock().await.subscribers.insert(connection_id);
        Ok(())
    }

    /// Remove a connection from a room's live stream. Idempotent.
    pub async fn unsubscribe(&self, room_id: RoomId, connection_id: ConnectionId) {
        let streams = self.streams.read().await;
        if let Some(stream) = streams.get(&room_id) {
            stream.lock().await.subscribers.remove(&connection_id);
        }
    }

    /// Remove a connection from every stream. Called on disconnect.
    pub async fn unsubscribe_all(&self, connection_id: ConnectionId) {
        let streams: Vec<_> = self.streams.read().await.values().cloned().collect();
        for stream in streams {
            stream.lock().await.subscribers.remove(&connection_id);
        }
    }

    /// Push a droppable event to every subscriber of a room.
    ///
    /// Used for typing indicators and similar transient signals that never
    /// enter the stream.
    pub async fn broadcast_transient(&self, room_id: RoomId, event: OutboundEvent) {
        let streams = self.streams.read().await;
        if let Some(stream) = streams.get(&room_id) {
            let stream = stream.lock().await;
            for connection_id in &stream.subscribers {
                let _ = self.connections.send(*connection_id, event.clone());
            }
        }
    }

    /// Drop stream state and stored history for a purged room.
    pub async fn forget_room(&self, room_id: RoomId) -> Result<usize> {
        self.streams.write().await.remove(&room_id);
        self.store.delete_room(room_id).await
    }

    /// Number of live subscribers for a room.
    pub async fn subscriber_count(&self, room_id: RoomId) -> usize {
        let streams = self.streams.read().await;
        match streams.get(&room_id) {
            Some(stream) => stream.lock().await.subscribers.len(),
            None => 0,
        }
    }

    /// Get or create the stream state for a room.
    ///
    /// The first touch seeds `next_seq` from the store so a restart resumes
    /// the stream instead of reusing sequence numbers.
    async fn stream(&self, room_id: RoomId) -> Result<Arc<Mutex<StreamState>>> {
        if let Some(stream) = self.streams.read().await.get(&room_id) {
            return Ok(Arc::clone(stream));
        }

        let last = self.store.last_seq(room_id).await?;
        let mut streams = self.streams.write().await;
        let stream = streams.entry(room_id).or_insert_with(|| {
            Arc::new(Mutex::new(StreamState {
                next_seq: last + 1,
                subscribers: HashSet::new(),
            }))
        });
        Ok(Arc::clone(stream))
    }

    /// Hand an accepted message to the AI responder, off the hot path.
    ///
    /// Only human text in AI-assisted rooms qualifies. The generated reply
    /// re-enters through `post` and gets the next seq like any other
    /// message; responder failures are logged and swallowed.
    fn maybe_respond(self: &Arc<Self>, room: &crate::room::Room, message: &Message) {
        let Some(responder) = self.responder.clone() else {
            return;
        };
        if !room.ai_assisted()
            || message.kind != MessageKind::Text
            || !message.author.is_human()
        {
            return;
        }

        let bus = Arc::clone(self);
        let context = RoomContext {
            room_id: room.id(),
            room_name: room.name().to_string(),
        };
        let message = message.clone();
        tokio::spawn(async move {
            let Some(generated) = responder.classify(&message, &context).await else {
                return;
            };
            if let Err(e) = bus
                .post(context.room_id, Author::Ai, generated.text, MessageKind::Ai)
                .await
            {
                warn!(room = %context.room_id, "AI response discarded: {e}");
            }
        });
    }
}
