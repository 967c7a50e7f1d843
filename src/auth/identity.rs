//! Identity model and directory.

use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{CoreError, Result};

/// Opaque identity identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdentityId(Uuid);

impl IdentityId {
    /// Generate a fresh identity ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse an identity ID from its string form.
    pub fn parse(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| CoreError::Validation(format!("invalid identity id: {s}")))
    }
}

impl Default for IdentityId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for IdentityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// System-wide role of an identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemRole {
    /// Regular user.
    User,
    /// Platform moderator.
    Moderator,
    /// Administrator.
    Admin,
}

impl SystemRole {
    /// Get string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            SystemRole::User => "user",
            SystemRole::Moderator => "moderator",
            SystemRole::Admin => "admin",
        }
    }
}

impl fmt::Display for SystemRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An authenticated identity.
///
/// Everything except the display name is immutable after registration.
#[derive(Debug, Clone, Serialize)]
pub struct Identity {
    /// Identity ID.
    pub id: IdentityId,
    /// Display name (the only mutable field).
    pub display_name: String,
    /// System-wide role.
    pub role: SystemRole,
    /// Whether the identity is blocked from receiving sessions.
    #[serde(skip)]
    pub blocked: bool,
    /// Registration timestamp.
    pub registered_at: DateTime<Utc>,
}

/// In-memory directory of registered identities.
///
/// The directory is the hand-off point of the auth boundary: an external
/// collaborator verifies credentials and registers or looks up identities
/// here; the core never sees passwords.
#[derive(Debug, Default)]
pub struct IdentityDirectory {
    identities: RwLock<HashMap<IdentityId, Identity>>,
}

impl IdentityDirectory {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new identity.
    pub fn register(&self, display_name: impl Into<String>, role: SystemRole) -> Result<Identity> {
        let display_name = display_name.into();
        if display_name.trim().is_empty() {
            return Err(CoreError::Validation("display name is empty".to_string()));
        }

        let identity = Identity {
            id: IdentityId::new(),
            display_name,
            role,
            blocked: false,
            registered_at: Utc::now(),
        };

        let mut identities = self.identities.write().expect("identity lock poisoned");
        identities.insert(identity.id, identity.clone());
        Ok(identity)
    }

    /// Look up an identity by ID, returning a value snapshot.
    pub fn get(&self, id: IdentityId) -> Option<Identity> {
        self.identities
            .read()
            .expect("identity lock poisoned")
            .get(&id)
            .cloned()
    }

    /// Look up an identity by display name (case-insensitive).
    pub fn find_by_name(&self, name: &str) -> Option<Identity> {
        let wanted = name.to_lowercase();
        self.identities
            .read()
            .expect("identity lock poisoned")
            .values()
            .find(|i| i.display_name.to_lowercase() == wanted)
            .cloned()
    }

    /// Update a display name.
    pub fn set_display_name(&self, id: IdentityId, display_name: impl Into<String>) -> Result<()> {
        let display_name = display_name.into();
        if display_name.trim().is_empty() {
            return Err(CoreError::Validation("display name is empty".to_string()));
        }

        let mut identities = self.identities.write().expect("identity lock poisoned");
        match identities.get_mut(&id) {
            Some(identity) => {
                identity.display_name = display_name;
                Ok(())
            }
            None => Err(CoreError::NotFound("identity".to_string())),
        }
    }

    /// Block an identity from being issued new sessions.
    pub fn block(&self, id: IdentityId) -> Result<()> {
        let mut identities = self.identities.write().expect("identity lock poisoned");
        match identities.get_mut(&id) {
            Some(identity) => {
                identity.blocked = true;
                Ok(())
            }
            None => Err(CoreError::NotFound("identity".to_string())),
        }
    }

    /// Number of registered identities.
    pub fn count(&self) -> usize {
        self.identities
            .read()
            .expect("identity lock poisoned")
            .len()
    }
}
