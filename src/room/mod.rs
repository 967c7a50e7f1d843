//! Room entities and membership management.
//!
//! Each room serializes its own membership mutations behind a per-room lock;
//! operations on different rooms never contend.

mod registry;
#[allow(clippy::module_inception)]
mod room;

pub use registry::{RoomRegistry, RoomSummary};
pub use room::{LeaveOutcome, Membership, Room};

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{CoreError, Result};

/// Opaque room identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoomId(Uuid);

impl RoomId {
    /// Generate a fresh room ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a room ID from its string form.
    pub fn parse(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| CoreError::Validation(format!("invalid room id: {s}")))
    }
}

impl Default for RoomId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Role of an identity within a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomRole {
    /// Room owner. Unique per room; transferable, never removable.
    Owner,
    /// Room moderator.
    Moderator,
    /// Regular member.
    Member,
}

impl RoomRole {
    /// Get string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            RoomRole::Owner => "owner",
            RoomRole::Moderator => "moderator",
            RoomRole::Member => "member",
        }
    }
}

impl fmt::Display for RoomRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Room visibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Privacy {
    /// Anyone may join.
    Public,
    /// Joining requires the room password.
    Private,
}

/// Parameters for creating a room.
#[derive(Debug, Clone, Deserialize)]
pub struct RoomSpec {
    /// Room name.
    pub name: String,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
    /// Category label (science, technology, ...).
    #[serde(default)]
    pub category: String,
    /// Tag labels.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Room visibility.
    pub privacy: Privacy,
    /// Maximum member count; the registry default applies when unset.
    #[serde(default)]
    pub capacity: Option<usize>,
    /// Join password, required for private rooms.
    #[serde(default)]
    pub password: Option<String>,
    /// Whether the AI responder participates in this room.
    #[serde(default = "default_ai_assisted")]
    pub ai_assisted: bool,
}

fn default_ai_assisted() -> bool {
    true
}

impl RoomSpec {
    /// Create a minimal public room spec.
    pub fn public(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            category: String::new(),
            tags: Vec::new(),
            privacy: Privacy::Public,
            capacity: None,
            password: None,
            ai_assisted: true,
        }
    }

    /// Create a private room spec with a join password.
    pub fn private(name: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            category: String::new(),
            tags: Vec::new(),
            privacy: Privacy::Private,
            capacity: None,
            password: Some(password.into()),
            ai_assisted: true,
        }
    }

    /// Set the capacity.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity);
        self
    }

    /// Disable AI assistance.
    pub fn without_ai(mut self) -> Self {
        self.ai_assisted = false;
        self
    }
}
