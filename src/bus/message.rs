//! Message model.
//!
//! Messages are immutable once a `seq` has been assigned; the bus only ever
//! appends.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::auth::IdentityId;
use crate::room::RoomId;

/// Display name used for AI-authored messages.
pub const AI_AUTHOR_NAME: &str = "AI Assistant";

/// Display name used for system messages.
pub const SYSTEM_AUTHOR_NAME: &str = "System";

/// Author of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Author {
    /// A human participant.
    Identity {
        /// Identity of the author.
        id: IdentityId,
    },
    /// The system itself (join/leave notices, announcements).
    System,
    /// The AI responder.
    Ai,
}

impl Author {
    /// Whether the author is a human participant.
    pub fn is_human(&self) -> bool {
        matches!(self, Author::Identity { .. })
    }

    /// The author's identity, for human authors.
    pub fn identity_id(&self) -> Option<IdentityId> {
        match self {
            Author::Identity { id } => Some(*id),
            _ => None,
        }
    }
}

/// Kind of message content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Plain text.
    Text,
    /// Reference to a shared file.
    FileRef,
    /// System notice.
    System,
    /// AI-generated response.
    Ai,
}

impl MessageKind {
    /// Get string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Text => "text",
            MessageKind::FileRef => "file_ref",
            MessageKind::System => "system",
            MessageKind::Ai => "ai",
        }
    }

    /// Parse from the string representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "text" => Some(MessageKind::Text),
            "file_ref" => Some(MessageKind::FileRef),
            "system" => Some(MessageKind::System),
            "ai" => Some(MessageKind::Ai),
            _ => None,
        }
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A message accepted into a room's stream.
///
/// `seq` is strictly increasing and gapless within a room; it totally
/// orders every message, human and AI alike.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Room the message belongs to.
    pub room_id: RoomId,
    /// Per-room sequence number, assigned at acceptance.
    pub seq: u64,
    /// Author.
    pub author: Author,
    /// Author display name, snapshotted at acceptance time.
    pub author_name: String,
    /// Message content.
    pub content: String,
    /// Content kind.
    pub kind: MessageKind,
    /// Acceptance timestamp.
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Construct a message with an assigned seq.
    pub fn new(
        room_id: RoomId,
        seq: u64,
        author: Author,
        author_name: impl Into<String>,
        content: impl Into<String>,
        kind: MessageKind,
    ) -> Self {
        Self {
            room_id,
            seq,
            author,
            author_name: author_name.into(),
            content: content.into(),
            kind,
            created_at: Utc::now(),
        }
    }
}
