//! WebSocket message types.

use serde::{Deserialize, Serialize};

use crate::auth::IdentityId;
use crate::bus::Message;
use crate::room::{RoomId, RoomRole};

/// Messages sent from client to server.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Join a room.
    Join {
        /// Room ID to join.
        room_id: RoomId,
        /// Password for private rooms.
        #[serde(default)]
        password: Option<String>,
    },
    /// Leave a room.
    Leave {
        /// Room ID to leave.
        room_id: RoomId,
    },
    /// Post a text message.
    Post {
        /// Target room.
        room_id: RoomId,
        /// Message content.
        content: String,
    },
    /// Request history after a known sequence number.
    #[serde(rename = "history_request")]
    History {
        /// Target room.
        room_id: RoomId,
        /// Last sequence number the client has (0 for none).
        #[serde(default)]
        after_seq: u64,
        /// Maximum number of messages wanted.
        #[serde(default)]
        limit: Option<usize>,
    },
    /// Typing indicator.
    Typing {
        /// Target room.
        room_id: RoomId,
        /// Whether the client started or stopped typing.
        typing: bool,
    },
    /// Heartbeat ping.
    Ping,
}

/// Messages sent from server to client.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// A message accepted into a room stream.
    Message {
        /// The message, with its assigned seq.
        #[serde(flatten)]
        message: Message,
    },
    /// Presence snapshot for a room.
    Presence {
        /// Room ID.
        room_id: RoomId,
        /// Identities currently online.
        online: Vec<IdentityId>,
    },
    /// Typing indicator relay.
    Typing {
        /// Room ID.
        room_id: RoomId,
        /// Who is typing.
        identity_id: IdentityId,
        /// Started or stopped.
        typing: bool,
    },
    /// History slice, in seq order.
    History {
        /// Room ID.
        room_id: RoomId,
        /// Messages after the requested seq.
        messages: Vec<Message>,
    },
    /// Successfully joined a room.
    Joined {
        /// Room ID.
        room_id: RoomId,
        /// Role granted in the room.
        role: RoomRole,
    },
    /// Successfully left a room.
    Left {
        /// Room ID.
        room_id: RoomId,
    },
    /// Informational notice.
    Notice {
        /// Human-readable text.
        text: String,
    },
    /// Error reply.
    Error {
        /// Stable error code.
        code: String,
        /// Human-readable message.
        message: String,
    },
    /// Heartbeat pong.
    Pong,
}
