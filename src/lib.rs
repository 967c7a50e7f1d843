//! Chatverse - real-time room and messaging core.
//!
//! Rooms, memberships, presence, and per-room ordered message streams,
//! served over a WebSocket transport with a small REST API around it.

pub mod ai;
pub mod app;
pub mod auth;
pub mod bus;
pub mod config;
pub mod connection;
pub mod error;
pub mod logging;
pub mod presence;
pub mod room;
pub mod server;

pub use ai::{AiResponder, GeneratedContent, HttpResponder, KeywordResponder, RoomContext};
pub use app::ChatCore;
pub use auth::{
    Identity, IdentityDirectory, IdentityId, Session, SessionManager, SystemRole,
    DEFAULT_SESSION_TTL_SECS,
};
#[cfg(feature = "sqlite")]
pub use bus::SqliteStore;
pub use bus::{Author, MemoryStore, Message, MessageBus, MessageKind, MessageStore};
pub use config::Config;
pub use connection::{
    Connection, ConnectionId, ConnectionRegistry, ConnectionState, OutboundEvent, OutboundQueue,
};
pub use error::{CoreError, Result};
pub use presence::{PresenceHub, PresenceSnapshot};
pub use room::{
    LeaveOutcome, Membership, Privacy, Room, RoomId, RoomRegistry, RoomRole, RoomSpec, RoomSummary,
};
pub use server::create_router;
