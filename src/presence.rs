//! Presence snapshots.
//!
//! Presence is derived state: an identity is present in a room exactly when
//! it is a member of that room and has at least one open connection. Nothing
//! is stored here; every snapshot is recomputed from the room and connection
//! registries, so recomputation is idempotent by construction.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::auth::IdentityId;
use crate::connection::{ConnectionRegistry, OutboundEvent};
use crate::room::{RoomId, RoomRegistry};
use crate::Result;

/// Who is online in a room right now.
#[derive(Debug, Clone, Serialize)]
pub struct PresenceSnapshot {
    /// Room the snapshot describes.
    pub room_id: RoomId,
    /// Members with at least one open connection.
    pub online: HashSet<IdentityId>,
}

impl PresenceSnapshot {
    /// Whether an identity appears online in this snapshot.
    pub fn is_online(&self, identity_id: IdentityId) -> bool {
        self.online.contains(&identity_id)
    }

    /// Number of online members.
    pub fn online_count(&self) -> usize {
        self.online.len()
    }
}

/// Computes presence and pushes updates to affected connections.
pub struct PresenceHub {
    rooms: Arc<RoomRegistry>,
    connections: Arc<ConnectionRegistry>,
}

impl PresenceHub {
    /// Create a hub over the given registries.
    pub fn new(rooms: Arc<RoomRegistry>, connections: Arc<ConnectionRegistry>) -> Self {
        Self { rooms, connections }
    }

    /// Compute the current snapshot for a room.
    ///
    /// Multiple connections for one identity collapse into a single entry.
    pub async fn snapshot(&self, room_id: RoomId) -> Result<PresenceSnapshot> {
        let room = self.rooms.get(room_id).await?;
        let connected = self.connections.connected_identities();
        let online = room
            .member_ids()
            .await
            .into_iter()
            .filter(|id| connected.contains(id))
            .collect();
        Ok(PresenceSnapshot { room_id, online })
    }

    /// Recompute a room's presence and push it to every connected member.
    ///
    /// Presence events are droppable; a slow consumer misses an update and
    /// catches up with the next one.
    pub async fn refresh(&self, room_id: RoomId) -> Result<PresenceSnapshot> {
        let snapshot = self.snapshot(room_id).await?;
        debug!(
            room = %room_id,
            online = snapshot.online_count(),
            "Presence refreshed"
        );
        for identity_id in &snapshot.online {
            for connection_id in self.connections.connections_for(*identity_id) {
                let _ = self
                    .connections
                    .send(connection_id, OutboundEvent::Presence(snapshot.clone()));
            }
        }
        Ok(snapshot)
    }

    /// Refresh presence in every room the identity belongs to.
    ///
    /// Called when an identity's connectivity changes, since that affects
    /// all of its rooms at once.
    pub async fn refresh_for_identity(&self, identity_id: IdentityId) {
        for room in self.rooms.all().await {
            if room.is_member(identity_id).await {
                let _ = self.refresh(room.id()).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::auth::{Identity, IdentityDirectory, SessionManager, SystemRole};
    use crate::room::RoomSpec;

    struct Fixture {
        directory: Arc<IdentityDirectory>,
        sessions: Arc<SessionManager>,
        rooms: Arc<RoomRegistry>,
        connections: Arc<ConnectionRegistry>,
        hub: PresenceHub,
    }

    fn fixture() -> Fixture {
        let directory = Arc::new(IdentityDirectory::new());
        let sessions = Arc::new(SessionManager::new("test-secret", Arc::clone(&directory)));
        let rooms = Arc::new(RoomRegistry::new(50));
        let connections = Arc::new(ConnectionRegistry::new(Arc::clone(&sessions), 32));
        let hub = PresenceHub::new(Arc::clone(&rooms), Arc::clone(&connections));
        Fixture {
            directory,
            sessions,
            rooms,
            connections,
            hub,
        }
    }

    impl Fixture {
        fn register(&self, name: &str) -> Identity {
            self.directory.register(name, SystemRole::User).unwrap()
        }

        fn connect(&self, identity: &Identity) -> crate::connection::ConnectionId {
            let token = self
                .sessions
                .issue(identity, Duration::from_secs(3600))
                .unwrap();
            self.connections.open(&token).unwrap().id()
        }
    }

    #[tokio::test]
    async fn test_presence_is_members_intersect_connected() {
        let f = fixture();
        let alice = f.register("alice");
        let bob = f.register("bob");
        let carol = f.register("carol");

        let room = f.rooms.create(alice.id, RoomSpec::public("Lounge")).await.unwrap();
        f.rooms.join(room.id(), bob.id, None).await.unwrap();

        // Alice and Carol are connected, but Carol is not a member.
        f.connect(&alice);
        f.connect(&carol);

        let snapshot = f.hub.snapshot(room.id()).await.unwrap();
        assert!(snapshot.is_online(alice.id));
        assert!(!snapshot.is_online(bob.id));
        assert!(!snapshot.is_online(carol.id));
        assert_eq!(snapshot.online_count(), 1);
    }

    #[tokio::test]
    async fn test_multiple_connections_collapse() {
        let f = fixture();
        let alice = f.register("alice");
        let room = f.rooms.create(alice.id, RoomSpec::public("Lounge")).await.unwrap();

        f.connect(&alice);
        f.connect(&alice);

        let snapshot = f.hub.snapshot(room.id()).await.unwrap();
        assert_eq!(snapshot.online_count(), 1);
    }

    #[tokio::test]
    async fn test_disconnect_last_device_goes_offline() {
        let f = fixture();
        let alice = f.register("alice");
        let room = f.rooms.create(alice.id, RoomSpec::public("Lounge")).await.unwrap();

        let first = f.connect(&alice);
        let second = f.connect(&alice);

        f.connections.close(first);
        let snapshot = f.hub.snapshot(room.id()).await.unwrap();
        assert!(snapshot.is_online(alice.id));

        f.connections.close(second);
        let snapshot = f.hub.snapshot(room.id()).await.unwrap();
        assert!(!snapshot.is_online(alice.id));
    }

    #[tokio::test]
    async fn test_refresh_pushes_to_connected_members() {
        let f = fixture();
        let alice = f.register("alice");
        let bob = f.register("bob");
        let room = f.rooms.create(alice.id, RoomSpec::public("Lounge")).await.unwrap();
        f.rooms.join(room.id(), bob.id, None).await.unwrap();

        let alice_conn = f.connect(&alice);
        let bob_conn = f.connect(&bob);

        f.hub.refresh(room.id()).await.unwrap();

        for conn_id in [alice_conn, bob_conn] {
            let connection = f.connections.get(conn_id).unwrap();
            match connection.queue().pop().await.unwrap() {
                OutboundEvent::Presence(snapshot) => {
                    assert_eq!(snapshot.room_id, room.id());
                    assert_eq!(snapshot.online_count(), 2);
                }
                other => panic!("unexpected event: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_refresh_is_idempotent() {
        let f = fixture();
        let alice = f.register("alice");
        let room = f.rooms.create(alice.id, RoomSpec::public("Lounge")).await.unwrap();
        f.connect(&alice);

        let a = f.hub.refresh(room.id()).await.unwrap();
        let b = f.hub.refresh(room.id()).await.unwrap();
        assert_eq!(a.online, b.online);
    }

    #[tokio::test]
    async fn test_refresh_for_identity_touches_all_rooms() {
        let f = fixture();
        let alice = f.register("alice");
        let room_a = f.rooms.create(alice.id, RoomSpec::public("A")).await.unwrap();
        let room_b = f.rooms.create(alice.id, RoomSpec::public("B")).await.unwrap();

        let conn = f.connect(&alice);
        f.hub.refresh_for_identity(alice.id).await;

        let connection = f.connections.get(conn).unwrap();
        let mut seen = HashSet::new();
        for _ in 0..2 {
            match connection.queue().pop().await.unwrap() {
                OutboundEvent::Presence(snapshot) => {
                    seen.insert(snapshot.room_id);
                }
                other => panic!("unexpected event: {other:?}"),
            }
        }
        assert!(seen.contains(&room_a.id()));
        assert!(seen.contains(&room_b.id()));
    }
}
