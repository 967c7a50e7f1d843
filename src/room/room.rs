//! A single room: membership, roles, capacity, privacy.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

use super::{Privacy, RoomId, RoomRole, RoomSpec};
use crate::auth::IdentityId;
use crate::{CoreError, Result};

/// A membership record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Membership {
    /// Room this membership belongs to.
    pub room_id: RoomId,
    /// Member identity.
    pub identity_id: IdentityId,
    /// Role within the room.
    pub role: RoomRole,
    /// Join timestamp.
    pub joined_at: DateTime<Utc>,
}

/// Outcome of leaving a room.
#[derive(Debug, Clone)]
pub struct LeaveOutcome {
    /// The removed membership.
    pub removed: Membership,
    /// New owner, when ownership was transferred.
    pub new_owner: Option<IdentityId>,
    /// Whether the room is now empty (and eligible for purge after the
    /// grace period).
    pub emptied: bool,
}

#[derive(Debug, Default)]
struct MemberTable {
    members: HashMap<IdentityId, Membership>,
    /// Set when the last member leaves; cleared on re-join.
    empty_since: Option<DateTime<Utc>>,
}

/// A room with serialized membership mutation.
///
/// All mutation goes through the internal async lock, so join/leave/role
/// changes on one room block each other but never another room.
pub struct Room {
    id: RoomId,
    name: String,
    description: String,
    category: String,
    tags: Vec<String>,
    privacy: Privacy,
    password_digest: Option<String>,
    capacity: usize,
    ai_assisted: bool,
    created_at: DateTime<Utc>,
    table: Mutex<MemberTable>,
}

/// Hex SHA-256 digest of a room password.
fn digest_password(password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    format!("{:x}", hasher.finalize())
}

impl Room {
    /// Create a room from a spec. The owner becomes the first member.
    pub fn new(id: RoomId, owner: IdentityId, spec: &RoomSpec, capacity: usize) -> Self {
        let mut members = HashMap::new();
        members.insert(
            owner,
            Membership {
                room_id: id,
                identity_id: owner,
                role: RoomRole::Owner,
                joined_at: Utc::now(),
            },
        );

        Self {
            id,
            name: spec.name.clone(),
            description: spec.description.clone(),
            category: spec.category.clone(),
            tags: spec.tags.clone(),
            privacy: spec.privacy,
            password_digest: spec.password.as_deref().map(digest_password),
            capacity,
            ai_assisted: spec.ai_assisted,
            created_at: Utc::now(),
            table: Mutex::new(MemberTable {
                members,
                empty_since: None,
            }),
        }
    }

    /// Room ID.
    pub fn id(&self) -> RoomId {
        self.id
    }

    /// Room name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Room description.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Category label.
    pub fn category(&self) -> &str {
        &self.category
    }

    /// Tag labels.
    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    /// Room visibility.
    pub fn privacy(&self) -> Privacy {
        self.privacy
    }

    /// Maximum member count.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Whether the AI responder participates in this room.
    pub fn ai_assisted(&self) -> bool {
        self.ai_assisted
    }

    /// Creation timestamp.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Join the room.
    ///
    /// Idempotent: an existing member gets their membership back unchanged.
    /// Fails with `Forbidden` for a bad private-room credential and
    /// `RoomFull` at capacity.
    pub async fn join(
        &self,
        identity_id: IdentityId,
        credential: Option<&str>,
    ) -> Result<Membership> {
        let mut table = self.table.lock().await;

        if let Some(existing) = table.members.get(&identity_id) {
            return Ok(existing.clone());
        }

        if self.privacy == Privacy::Private {
            let supplied = credential.map(digest_password);
            if supplied.as_deref() != self.password_digest.as_deref() {
                return Err(CoreError::Forbidden("invalid room credential".to_string()));
            }
        }

        if table.members.len() >= self.capacity {
            return Err(CoreError::RoomFull {
                capacity: self.capacity,
            });
        }

        let membership = Membership {
            room_id: self.id,
            identity_id,
            role: RoomRole::Member,
            joined_at: Utc::now(),
        };
        table.members.insert(identity_id, membership.clone());
        table.empty_since = None;
        Ok(membership)
    }

    /// Leave the room.
    ///
    /// When the owner leaves and members remain, ownership transfers to the
    /// earliest-joined moderator, else the earliest-joined member. When the
    /// room empties it is marked for deletion; the registry purges it after
    /// the grace period unless someone re-joins first.
    pub async fn leave(&self, identity_id: IdentityId) -> Result<LeaveOutcome> {
        let mut table = self.table.lock().await;

        let removed = table
            .members
            .remove(&identity_id)
            .ok_or_else(|| CoreError::NotAMember(self.id.to_string()))?;

        let mut new_owner = None;
        if removed.role == RoomRole::Owner && !table.members.is_empty() {
            let heir = Self::pick_heir(&table.members);
            if let Some(membership) = table.members.get_mut(&heir) {
                membership.role = RoomRole::Owner;
                new_owner = Some(heir);
            }
        }

        let emptied = table.members.is_empty();
        if emptied {
            table.empty_since = Some(Utc::now());
        }

        Ok(LeaveOutcome {
            removed,
            new_owner,
            emptied,
        })
    }

    /// Earliest-joined moderator, else earliest-joined member. Ties break on
    /// identity ID so transfer is deterministic.
    fn pick_heir(members: &HashMap<IdentityId, Membership>) -> IdentityId {
        let best = |role: RoomRole| {
            members
                .values()
                .filter(|m| m.role == role)
                .min_by_key(|m| (m.joined_at, m.identity_id.to_string()))
        };
        best(RoomRole::Moderator)
            .or_else(|| best(RoomRole::Member))
            .map(|m| m.identity_id)
            .expect("pick_heir called on empty member table")
    }

    /// Change a member's role.
    ///
    /// The actor must be the owner or a moderator. Moderators may not
    /// promote to owner; the owner's own role can only change through
    /// transfer (assigning `Owner` to another member demotes the current
    /// owner to moderator).
    pub async fn set_role(
        &self,
        acting: IdentityId,
        target: IdentityId,
        role: RoomRole,
    ) -> Result<Membership> {
        let mut table = self.table.lock().await;

        let acting_role = table
            .members
            .get(&acting)
            .map(|m| m.role)
            .ok_or_else(|| CoreError::NotAMember(self.id.to_string()))?;

        if acting_role == RoomRole::Member {
            return Err(CoreError::Forbidden(
                "members cannot change roles".to_string(),
            ));
        }
        if role == RoomRole::Owner && acting_role != RoomRole::Owner {
            return Err(CoreError::Forbidden(
                "moderators may not promote to owner".to_string(),
            ));
        }

        let target_role = table
            .members
            .get(&target)
            .map(|m| m.role)
            .ok_or_else(|| CoreError::NotAMember(self.id.to_string()))?;

        if target_role == RoomRole::Owner && target != acting {
            return Err(CoreError::Forbidden("owner role is immutable".to_string()));
        }
        if target == acting && acting_role == RoomRole::Owner && role != RoomRole::Owner {
            return Err(CoreError::Forbidden(
                "owner may only leave the role by transferring it".to_string(),
            ));
        }

        if role == RoomRole::Owner && target != acting {
            // Ownership transfer: old owner steps down to moderator.
            if let Some(m) = table.members.get_mut(&acting) {
                m.role = RoomRole::Moderator;
            }
        }

        let membership = table
            .members
            .get_mut(&target)
            .expect("target membership checked above");
        membership.role = role;
        Ok(membership.clone())
    }

    /// Whether an identity is currently a member.
    pub async fn is_member(&self, identity_id: IdentityId) -> bool {
        self.table.lock().await.members.contains_key(&identity_id)
    }

    /// Membership record for an identity.
    pub async fn membership(&self, identity_id: IdentityId) -> Option<Membership> {
        self.table.lock().await.members.get(&identity_id).cloned()
    }

    /// All memberships, earliest joined first.
    pub async fn memberships(&self) -> Vec<Membership> {
        let table = self.table.lock().await;
        let mut all: Vec<_> = table.members.values().cloned().collect();
        all.sort_by(|a, b| {
            a.joined_at
                .cmp(&b.joined_at)
                .then_with(|| a.identity_id.to_string().cmp(&b.identity_id.to_string()))
        });
        all
    }

    /// Member identity set.
    pub async fn member_ids(&self) -> Vec<IdentityId> {
        self.table.lock().await.members.keys().copied().collect()
    }

    /// Number of members.
    pub async fn member_count(&self) -> usize {
        self.table.lock().await.members.len()
    }

    /// How long the room has been empty, if it is.
    pub async fn empty_since(&self) -> Option<DateTime<Utc>> {
        self.table.lock().await.empty_since
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_room(capacity: usize) -> (Room, IdentityId) {
        let owner = IdentityId::new();
        let room = Room::new(
            RoomId::new(),
            owner,
            &RoomSpec::public("Physics"),
            capacity,
        );
        (room, owner)
    }

    #[tokio::test]
    async fn test_owner_is_first_member() {
        let (room, owner) = test_room(10);
        assert_eq!(room.member_count().await, 1);
        let membership = room.membership(owner).await.unwrap();
        assert_eq!(membership.role, RoomRole::Owner);
    }

    #[tokio::test]
    async fn test_join_and_capacity() {
        let (room, _owner) = test_room(2);
        let b = IdentityId::new();
        let c = IdentityId::new();

        room.join(b, None).await.unwrap();
        let result = room.join(c, None).await;
        assert!(matches!(result, Err(CoreError::RoomFull { capacity: 2 })));
        assert_eq!(room.member_count().await, 2);
    }

    #[tokio::test]
    async fn test_join_idempotent() {
        let (room, _owner) = test_room(5);
        let b = IdentityId::new();

        let first = room.join(b, None).await.unwrap();
        let second = room.join(b, None).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(room.member_count().await, 2);
    }

    #[tokio::test]
    async fn test_rejoin_at_capacity_still_succeeds() {
        let (room, owner) = test_room(1);
        // Room is full with just the owner, but re-join is idempotent.
        let membership = room.join(owner, None).await.unwrap();
        assert_eq!(membership.role, RoomRole::Owner);
    }

    #[tokio::test]
    async fn test_private_room_credential() {
        let owner = IdentityId::new();
        let room = Room::new(
            RoomId::new(),
            owner,
            &RoomSpec::private("Secret", "hunter2"),
            10,
        );
        let b = IdentityId::new();

        assert!(matches!(
            room.join(b, None).await,
            Err(CoreError::Forbidden(_))
        ));
        assert!(matches!(
            room.join(b, Some("wrong")).await,
            Err(CoreError::Forbidden(_))
        ));
        assert!(room.join(b, Some("hunter2")).await.is_ok());
    }

    #[tokio::test]
    async fn test_leave_not_a_member() {
        let (room, _owner) = test_room(5);
        let result = room.leave(IdentityId::new()).await;
        assert!(matches!(result, Err(CoreError::NotAMember(_))));
    }

    #[tokio::test]
    async fn test_owner_leave_transfers_to_earliest_member() {
        let (room, owner) = test_room(5);
        let b = IdentityId::new();
        let c = IdentityId::new();
        room.join(b, None).await.unwrap();
        room.join(c, None).await.unwrap();

        let outcome = room.leave(owner).await.unwrap();
        assert_eq!(outcome.new_owner, Some(b));
        assert!(!outcome.emptied);
        assert_eq!(room.membership(b).await.unwrap().role, RoomRole::Owner);
    }

    #[tokio::test]
    async fn test_owner_leave_prefers_moderator() {
        let (room, owner) = test_room(5);
        let b = IdentityId::new();
        let c = IdentityId::new();
        room.join(b, None).await.unwrap();
        room.join(c, None).await.unwrap();
        // c joined later but is a moderator, so c inherits.
        room.set_role(owner, c, RoomRole::Moderator).await.unwrap();

        let outcome = room.leave(owner).await.unwrap();
        assert_eq!(outcome.new_owner, Some(c));
    }

    #[tokio::test]
    async fn test_last_leave_marks_empty() {
        let (room, owner) = test_room(5);
        let outcome = room.leave(owner).await.unwrap();
        assert!(outcome.emptied);
        assert!(outcome.new_owner.is_none());
        assert!(room.empty_since().await.is_some());
    }

    #[tokio::test]
    async fn test_rejoin_clears_empty_mark() {
        let (room, owner) = test_room(5);
        room.leave(owner).await.unwrap();
        assert!(room.empty_since().await.is_some());

        room.join(IdentityId::new(), None).await.unwrap();
        assert!(room.empty_since().await.is_none());
    }

    #[tokio::test]
    async fn test_set_role_requires_privilege() {
        let (room, _owner) = test_room(5);
        let b = IdentityId::new();
        let c = IdentityId::new();
        room.join(b, None).await.unwrap();
        room.join(c, None).await.unwrap();

        let result = room.set_role(b, c, RoomRole::Moderator).await;
        assert!(matches!(result, Err(CoreError::Forbidden(_))));
    }

    #[tokio::test]
    async fn test_moderator_cannot_promote_to_owner() {
        let (room, owner) = test_room(5);
        let b = IdentityId::new();
        let c = IdentityId::new();
        room.join(b, None).await.unwrap();
        room.join(c, None).await.unwrap();
        room.set_role(owner, b, RoomRole::Moderator).await.unwrap();

        let result = room.set_role(b, c, RoomRole::Owner).await;
        assert!(matches!(result, Err(CoreError::Forbidden(_))));

        // But a moderator may promote to moderator.
        assert!(room.set_role(b, c, RoomRole::Moderator).await.is_ok());
    }

    #[tokio::test]
    async fn test_owner_transfer_via_set_role() {
        let (room, owner) = test_room(5);
        let b = IdentityId::new();
        room.join(b, None).await.unwrap();

        room.set_role(owner, b, RoomRole::Owner).await.unwrap();
        assert_eq!(room.membership(b).await.unwrap().role, RoomRole::Owner);
        assert_eq!(
            room.membership(owner).await.unwrap().role,
            RoomRole::Moderator
        );
    }

    #[tokio::test]
    async fn test_owner_role_immutable_for_others() {
        let (room, owner) = test_room(5);
        let b = IdentityId::new();
        room.join(b, None).await.unwrap();
        room.set_role(owner, b, RoomRole::Moderator).await.unwrap();

        // The moderator cannot demote the owner.
        let result = room.set_role(b, owner, RoomRole::Member).await;
        assert!(matches!(result, Err(CoreError::Forbidden(_))));
    }

    #[tokio::test]
    async fn test_memberships_sorted_by_join_time() {
        let (room, owner) = test_room(5);
        let b = IdentityId::new();
        room.join(b, None).await.unwrap();

        let memberships = room.memberships().await;
        assert_eq!(memberships.len(), 2);
        assert_eq!(memberships[0].identity_id, owner);
        assert_eq!(memberships[1].identity_id, b);
    }

    #[test]
    fn test_digest_password_stable() {
        assert_eq!(digest_password("hunter2"), digest_password("hunter2"));
        assert_ne!(digest_password("hunter2"), digest_password("hunter3"));
    }
}
