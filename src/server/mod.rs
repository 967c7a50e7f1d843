//! HTTP and WebSocket transport.

mod cors;
mod error;
mod handlers;
mod messages;
mod router;
mod ws;

pub use error::ApiError;
pub use handlers::{AppState, LoginRequest, LoginResponse};
pub use messages::{ClientMessage, ServerMessage};
pub use router::create_router;
