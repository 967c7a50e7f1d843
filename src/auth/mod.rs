//! Authentication and session management.
//!
//! Password/OAuth verification is an external collaborator; this module only
//! deals with verified identities, session tokens, and revocation.

mod identity;
mod session;

pub use identity::{Identity, IdentityDirectory, IdentityId, SystemRole};
pub use session::{Session, SessionManager, DEFAULT_SESSION_TTL_SECS};
