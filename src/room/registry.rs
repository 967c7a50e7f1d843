//! Room registry: creation, lookup, and idle-room purging.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::room::{LeaveOutcome, Membership, Room};
use super::{Privacy, RoomId, RoomRole, RoomSpec};
use crate::auth::IdentityId;
use crate::{CoreError, Result};

/// Upper bound accepted for a room capacity request.
const MAX_CAPACITY: usize = 1000;

/// Registry of live rooms.
///
/// The registry map itself is guarded by a single RwLock, but it only holds
/// `Arc<Room>` handles; membership mutation happens under each room's own
/// lock so rooms never serialize against each other.
pub struct RoomRegistry {
    rooms: RwLock<HashMap<RoomId, Arc<Room>>>,
    default_capacity: usize,
}

/// Listing entry for a room.
#[derive(Debug, Clone, Serialize)]
pub struct RoomSummary {
    /// Room ID.
    pub id: RoomId,
    /// Room name.
    pub name: String,
    /// Category label.
    pub category: String,
    /// Room visibility.
    pub privacy: Privacy,
    /// Current member count.
    pub member_count: usize,
    /// Maximum member count.
    pub capacity: usize,
    /// Whether the AI responder participates.
    pub ai_assisted: bool,
}

impl RoomRegistry {
    /// Create an empty registry.
    pub fn new(default_capacity: usize) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            default_capacity,
        }
    }

    /// Create a room. The owner becomes its first member.
    pub async fn create(&self, owner: IdentityId, spec: RoomSpec) -> Result<Arc<Room>> {
        if spec.name.trim().is_empty() {
            return Err(CoreError::Validation("room name is empty".to_string()));
        }
        let capacity = spec.capacity.unwrap_or(self.default_capacity);
        if capacity == 0 || capacity > MAX_CAPACITY {
            return Err(CoreError::Validation(format!(
                "capacity must be between 1 and {MAX_CAPACITY}"
            )));
        }
        if spec.privacy == Privacy::Private
            && spec.password.as_deref().map_or(true, |p| p.is_empty())
        {
            return Err(CoreError::Validation(
                "private rooms require a password".to_string(),
            ));
        }

        let id = RoomId::new();
        let room = Arc::new(Room::new(id, owner, &spec, capacity));

        let mut rooms = self.rooms.write().await;
        rooms.insert(id, Arc::clone(&room));

        info!(room = %id, name = %spec.name, owner = %owner, "Room created");
        Ok(room)
    }

    /// Get a room by ID.
    pub async fn get(&self, id: RoomId) -> Result<Arc<Room>> {
        self.rooms
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| CoreError::NotFound("room".to_string()))
    }

    /// List all rooms, sorted by name.
    pub async fn list(&self) -> Vec<RoomSummary> {
        let rooms: Vec<Arc<Room>> = self.rooms.read().await.values().cloned().collect();
        let mut result = Vec::with_capacity(rooms.len());
        for room in rooms {
            result.push(RoomSummary {
                id: room.id(),
                name: room.name().to_string(),
                category: room.category().to_string(),
                privacy: room.privacy(),
                member_count: room.member_count().await,
                capacity: room.capacity(),
                ai_assisted: room.ai_assisted(),
            });
        }
        result.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.to_string().cmp(&b.id.to_string())));
        result
    }

    /// Join a room.
    pub async fn join(
        &self,
        room_id: RoomId,
        identity_id: IdentityId,
        credential: Option<&str>,
    ) -> Result<Membership> {
        let room = self.get(room_id).await?;
        room.join(identity_id, credential).await
    }

    /// Leave a room.
    pub async fn leave(&self, room_id: RoomId, identity_id: IdentityId) -> Result<LeaveOutcome> {
        let room = self.get(room_id).await?;
        let outcome = room.leave(identity_id).await?;
        if let Some(new_owner) = outcome.new_owner {
            info!(room = %room_id, new_owner = %new_owner, "Room ownership transferred");
        }
        if outcome.emptied {
            debug!(room = %room_id, "Room emptied, eligible for purge");
        }
        Ok(outcome)
    }

    /// Change a member's role.
    pub async fn set_role(
        &self,
        room_id: RoomId,
        acting: IdentityId,
        target: IdentityId,
        role: RoomRole,
    ) -> Result<Membership> {
        let room = self.get(room_id).await?;
        room.set_role(acting, target, role).await
    }

    /// Purge rooms that have been empty for longer than the grace period.
    ///
    /// Returns the IDs of purged rooms. A room that was re-joined during the
    /// grace period has its empty mark cleared and survives the sweep.
    pub async fn purge_idle(&self, grace: Duration) -> Vec<RoomId> {
        let now = Utc::now();
        let grace = chrono::Duration::from_std(grace).unwrap_or_else(|_| chrono::Duration::zero());

        let candidates: Vec<Arc<Room>> = self.rooms.read().await.values().cloned().collect();
        let mut purged = Vec::new();
        for room in candidates {
            if let Some(since) = room.empty_since().await {
                if now - since >= grace {
                    purged.push(room.id());
                }
            }
        }

        if !purged.is_empty() {
            let mut rooms = self.rooms.write().await;
            for id in &purged {
                // Re-check under the write lock; a join may have raced the sweep.
                let still_empty = match rooms.get(id) {
                    Some(room) => room.empty_since().await.is_some(),
                    None => false,
                };
                if still_empty {
                    rooms.remove(id);
                    info!(room = %id, "Purged idle room");
                }
            }
            purged.retain(|id| !rooms.contains_key(id));
        }
        purged
    }

    /// Snapshot of all live room handles.
    pub async fn all(&self) -> Vec<Arc<Room>> {
        self.rooms.read().await.values().cloned().collect()
    }

    /// Number of live rooms.
    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }
}
