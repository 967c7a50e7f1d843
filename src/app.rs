//! Application core wiring the subsystems together.
//!
//! `ChatCore` owns the identity directory, session manager, registries,
//! presence hub, and message bus, and exposes the operations the transport
//! layer calls. Everything in here is transport-agnostic.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use crate::ai::AiResponder;
use crate::auth::{Identity, IdentityDirectory, SessionManager};
use crate::bus::{Author, Message, MessageBus, MessageKind, MessageStore};
use crate::config::Config;
use crate::connection::{Connection, ConnectionId, ConnectionRegistry, OutboundEvent};
use crate::presence::{PresenceHub, PresenceSnapshot};
use crate::room::{LeaveOutcome, Membership, Room, RoomId, RoomRegistry, RoomSpec};
use crate::{CoreError, Result};

/// The assembled chat core.
pub struct ChatCore {
    directory: Arc<IdentityDirectory>,
    sessions: Arc<SessionManager>,
    rooms: Arc<RoomRegistry>,
    connections: Arc<ConnectionRegistry>,
    presence: Arc<PresenceHub>,
    bus: Arc<MessageBus>,
    session_ttl: Duration,
}

impl ChatCore {
    /// Assemble the core from configuration, a history store, and an
    /// optional AI responder.
    pub fn new(
        config: &Config,
        store: Arc<dyn MessageStore>,
        responder: Option<Arc<dyn AiResponder>>,
    ) -> Arc<Self> {
        let directory = Arc::new(IdentityDirectory::new());
        let sessions = Arc::new(SessionManager::new(
            &config.session.jwt_secret,
            Arc::clone(&directory),
        ));
        let rooms = Arc::new(RoomRegistry::new(config.rooms.default_capacity));
        let connections = Arc::new(ConnectionRegistry::new(
            Arc::clone(&sessions),
            config.connection.queue_capacity,
        ));
        let presence = Arc::new(PresenceHub::new(
            Arc::clone(&rooms),
            Arc::clone(&connections),
        ));

        let mut bus = MessageBus::new(
            Arc::clone(&rooms),
            Arc::clone(&connections),
            Arc::clone(&directory),
            store,
            config.history.max_limit,
        );
        if let Some(responder) = responder {
            bus = bus.with_responder(responder);
        }

        Arc::new(Self {
            directory,
            sessions,
            rooms,
            connections,
            presence,
            bus: Arc::new(bus),
            session_ttl: Duration::from_secs(config.session.ttl_secs),
        })
    }

    /// Identity directory.
    pub fn directory(&self) -> &Arc<IdentityDirectory> {
        &self.directory
    }

    /// Session manager.
    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// Room registry.
    pub fn rooms(&self) -> &Arc<RoomRegistry> {
        &self.rooms
    }

    /// Connection registry.
    pub fn connections(&self) -> &Arc<ConnectionRegistry> {
        &self.connections
    }

    /// Presence hub.
    pub fn presence(&self) -> &Arc<PresenceHub> {
        &self.presence
    }

    /// Message bus.
    pub fn bus(&self) -> &Arc<MessageBus> {
        &self.bus
    }

    /// Issue a session token for an identity with the configured TTL.
    pub fn login(&self, identity: &Identity) -> Result<String> {
        self.sessions.issue(identity, self.session_ttl)
    }

    /// Revoke a session token.
    pub fn logout(&self, token: &str) {
        self.sessions.revoke(token);
    }

    /// Accept an authenticated connection and refresh presence everywhere
    /// the identity is a member.
    pub async fn open_connection(&self, token: &str) -> Result<Arc<Connection>> {
        let connection = self.connections.open(token)?;
        self.presence
            .refresh_for_identity(connection.identity_id())
            .await;
        Ok(connection)
    }

    /// Tear down a connection: drop subscriptions, close the queue, and
    /// push updated presence to the rooms it was visible in.
    pub async fn close_connection(&self, id: ConnectionId) {
        let closed = self.connections.close(id);
        self.bus.unsubscribe_all(id).await;
        if let Some(connection) = closed {
            self.presence
                .refresh_for_identity(connection.identity_id())
                .await;
        }
    }

    /// Create a room owned by the connection's identity.
    pub async fn create_room(
        &self,
        connection_id: ConnectionId,
        spec: RoomSpec,
    ) -> Result<Arc<Room>> {
        let connection = self.require_connection(connection_id)?;
        self.rooms.create(connection.identity_id(), spec).await
    }

    /// Join a room, subscribe to its stream, and refresh presence.
    pub async fn join_room(
        &self,
        connection_id: ConnectionId,
        room_id: RoomId,
        credential: Option<&str>,
    ) -> Result<Membership> {
        let connection = self.require_connection(connection_id)?;
        let membership = self
            .rooms
            .join(room_id, connection.identity_id(), credential)
            .await?;
        self.bus.subscribe(room_id, connection_id).await?;
        let _ = self.presence.refresh(room_id).await;
        Ok(membership)
    }

    /// Leave a room, unsubscribe, and refresh presence.
    pub async fn leave_room(
        &self,
        connection_id: ConnectionId,
        room_id: RoomId,
    ) -> Result<LeaveOutcome> {
        let connection = self.require_connection(connection_id)?;
        let outcome = self
            .rooms
            .leave(room_id, connection.identity_id())
            .await?;
        self.bus.unsubscribe(room_id, connection_id).await;
        if !outcome.emptied {
            let _ = self.presence.refresh(room_id).await;
        }
        Ok(outcome)
    }

    /// Post a text message from a connection.
    pub async fn post(
        &self,
        connection_id: ConnectionId,
        room_id: RoomId,
        content: impl Into<String>,
        kind: MessageKind,
    ) -> Result<Message> {
        let connection = self.require_connection(connection_id)?;
        self.bus
            .post(
                room_id,
                Author::Identity {
                    id: connection.identity_id(),
                },
                content,
                kind,
            )
            .await
    }

    /// Read history for a room the connection's identity belongs to.
    pub async fn history(
        &self,
        connection_id: ConnectionId,
        room_id: RoomId,
        after_seq: u64,
        limit: usize,
    ) -> Result<Vec<Message>> {
        let connection = self.require_connection(connection_id)?;
        let room = self.rooms.get(room_id).await?;
        if !room.is_member(connection.identity_id()).await {
            return Err(CoreError::NotAMember(room_id.to_string()));
        }
        self.bus.history(room_id, after_seq, limit).await
    }

    /// Current presence for a room.
    pub async fn room_presence(&self, room_id: RoomId) -> Result<PresenceSnapshot> {
        self.presence.snapshot(room_id).await
    }

    /// Relay a typing indicator to the room's subscribers.
    pub async fn typing(
        &self,
        connection_id: ConnectionId,
        room_id: RoomId,
        typing: bool,
    ) -> Result<()> {
        let connection = self.require_connection(connection_id)?;
        let room = self.rooms.get(room_id).await?;
        if !room.is_member(connection.identity_id()).await {
            return Err(CoreError::NotAMember(room_id.to_string()));
        }
        self.bus
            .broadcast_transient(
                room_id,
                OutboundEvent::Typing {
                    room_id,
                    identity_id: connection.identity_id(),
                    typing,
                },
            )
            .await;
        Ok(())
    }

    /// One sweep of the idle-room purge. Stream state and history follow
    /// the room out.
    pub async fn purge_idle_rooms(&self, grace: Duration) -> Vec<RoomId> {
        let purged = self.rooms.purge_idle(grace).await;
        for room_id in &purged {
            if let Err(e) = self.bus.forget_room(*room_id).await {
                error!(room = %room_id, "Failed to drop history for purged room: {e}");
            }
        }
        purged
    }

    /// Spawn the periodic maintenance tasks: idle-room purge and session
    /// cleanup.
    pub fn start_maintenance(self: &Arc<Self>, config: &Config) {
        let grace = Duration::from_secs(config.rooms.purge_grace_secs);
        let interval = Duration::from_secs(config.rooms.purge_interval_secs.max(1));

        let core = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let purged = core.purge_idle_rooms(grace).await;
                if !purged.is_empty() {
                    info!(count = purged.len(), "Purged idle rooms");
                }
            }
        });

        let core = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(60));
            loop {
                ticker.tick().await;
                core.sessions.cleanup();
            }
        });
    }

    fn require_connection(&self, id: ConnectionId) -> Result<Arc<Connection>> {
        self.connections
            .get(id)
            .ok_or_else(|| CoreError::Unauthenticated("connection not open".to_string()))
    }
}
