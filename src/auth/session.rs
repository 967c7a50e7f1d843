//! Session token lifecycle.
//!
//! Tokens are signed JWTs carrying their own expiry, so validation never
//! touches persistent storage. Revocation goes through a local denylist
//! that is consulted before the expiry check.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::identity::{Identity, IdentityDirectory, IdentityId};
use crate::{CoreError, Result};

/// Default session time-to-live (24 hours).
pub const DEFAULT_SESSION_TTL_SECS: u64 = 24 * 60 * 60;

/// JWT claims carried by a session token.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Claims {
    /// Subject: identity ID.
    sub: String,
    /// Issued-at timestamp (unix seconds).
    iat: i64,
    /// Expiry timestamp (unix seconds).
    exp: i64,
    /// Unique token ID, used as the revocation key.
    jti: String,
}

/// An issued session.
#[derive(Debug, Clone)]
pub struct Session {
    /// Identity this session belongs to.
    pub identity_id: IdentityId,
    /// Token ID (jti claim).
    pub token_id: String,
    /// When the session was issued.
    pub issued_at: DateTime<Utc>,
    /// When the session expires.
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct SessionState {
    /// Active sessions by token ID.
    sessions: HashMap<String, Session>,
    /// Revoked token IDs with their expiry (kept until expiry so the
    /// denylist cannot grow without bound).
    denylist: HashMap<String, DateTime<Utc>>,
}

/// Manager for issuing, validating, and revoking session tokens.
///
/// Pure state: no message sending, no network I/O.
pub struct SessionManager {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    directory: Arc<IdentityDirectory>,
    state: RwLock<SessionState>,
}

impl SessionManager {
    /// Create a new session manager signing tokens with the given secret.
    pub fn new(secret: &str, directory: Arc<IdentityDirectory>) -> Self {
        let mut validation = Validation::default();
        // Expiry is checked manually after the denylist, without leeway.
        validation.validate_exp = false;
        validation.required_spec_claims = HashSet::new();

        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            directory,
            state: RwLock::new(SessionState::default()),
        }
    }

    /// Issue a session token for an identity.
    ///
    /// Fails with `Forbidden` for blocked identities and `Validation` for a
    /// zero TTL (the expiry must lie strictly after the issue time).
    pub fn issue(&self, identity: &Identity, ttl: Duration) -> Result<String> {
        if identity.blocked {
            warn!(identity = %identity.id, "Refusing session for blocked identity");
            return Err(CoreError::Forbidden("identity is blocked".to_string()));
        }
        if ttl.as_secs() == 0 {
            return Err(CoreError::Validation(
                "session ttl must be at least one second".to_string(),
            ));
        }

        let issued_at = Utc::now();
        let expires_at = issued_at
            + chrono::Duration::from_std(ttl)
                .map_err(|e| CoreError::Validation(format!("ttl out of range: {e}")))?;
        let jti = Uuid::new_v4().to_string();

        let claims = Claims {
            sub: identity.id.to_string(),
            iat: issued_at.timestamp(),
            exp: expires_at.timestamp(),
            jti: jti.clone(),
        };

        let token = encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| CoreError::Internal(format!("token signing failed: {e}")))?;

        let session = Session {
            identity_id: identity.id,
            token_id: jti.clone(),
            issued_at,
            expires_at,
        };

        let mut state = self.state.write().expect("session lock poisoned");
        state.sessions.insert(jti.clone(), session);

        info!(identity = %identity.id, token_id = %jti, "Session issued");
        Ok(token)
    }

    /// Validate a token and resolve its identity.
    ///
    /// Fails closed: any decode error, a denylisted token ID, an expired
    /// token, or an unknown identity all reject with `Unauthenticated`.
    pub fn validate(&self, token: &str) -> Result<Identity> {
        let claims = self.decode_claims(token)?;

        {
            let state = self.state.read().expect("session lock poisoned");
            // Denylist first: a revoked token is dead even before expiry.
            if state.denylist.contains_key(&claims.jti) {
                debug!(token_id = %claims.jti, "Rejected revoked token");
                return Err(CoreError::Unauthenticated("token revoked".to_string()));
            }
        }

        if Utc::now().timestamp() >= claims.exp {
            debug!(token_id = %claims.jti, "Rejected expired token");
            return Err(CoreError::Unauthenticated("token expired".to_string()));
        }

        let identity_id = IdentityId::parse(&claims.sub)
            .map_err(|_| CoreError::Unauthenticated("malformed subject".to_string()))?;

        self.directory
            .get(identity_id)
            .ok_or_else(|| CoreError::Unauthenticated("unknown identity".to_string()))
    }

    /// Revoke a token immediately. Idempotent; unknown or garbage tokens
    /// are ignored.
    pub fn revoke(&self, token: &str) {
        let claims = match self.decode_claims(token) {
            Ok(claims) => claims,
            Err(_) => return,
        };

        let expires_at = DateTime::<Utc>::from_timestamp(claims.exp, 0).unwrap_or_else(Utc::now);

        let mut state = self.state.write().expect("session lock poisoned");
        state.sessions.remove(&claims.jti);
        if state
            .denylist
            .insert(claims.jti.clone(), expires_at)
            .is_none()
        {
            info!(token_id = %claims.jti, "Session revoked");
        }
    }

    /// Drop expired sessions and spent denylist entries.
    ///
    /// Returns the number of sessions removed.
    pub fn cleanup(&self) -> usize {
        let now = Utc::now();
        let mut state = self.state.write().expect("session lock poisoned");

        let before = state.sessions.len();
        state.sessions.retain(|_, s| s.expires_at > now);
        state.denylist.retain(|_, exp| *exp > now);

        let removed = before - state.sessions.len();
        if removed > 0 {
            debug!(removed = removed, "Cleaned up expired sessions");
        }
        removed
    }

    /// Number of live (unexpired, unrevoked) sessions.
    pub fn session_count(&self) -> usize {
        let now = Utc::now();
        self.state
            .read()
            .expect("session lock poisoned")
            .sessions
            .values()
            .filter(|s| s.expires_at > now)
            .count()
    }

    /// Number of live sessions for a specific identity.
    pub fn identity_session_count(&self, identity_id: IdentityId) -> usize {
        let now = Utc::now();
        self.state
            .read()
            .expect("session lock poisoned")
            .sessions
            .values()
            .filter(|s| s.identity_id == identity_id && s.expires_at > now)
            .count()
    }

    fn decode_claims(&self, token: &str) -> Result<Claims> {
        decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| {
                debug!("Token decode failed: {e}");
                CoreError::Unauthenticated("invalid token".to_string())
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::SystemRole;

    fn setup() -> (Arc<IdentityDirectory>, SessionManager, Identity) {
        let directory = Arc::new(IdentityDirectory::new());
        let manager = SessionManager::new("test-secret", directory.clone());
        let identity = directory.register("Alice", SystemRole::User).unwrap();
        (directory, manager, identity)
    }

    #[test]
    fn test_issue_and_validate() {
        let (_directory, manager, identity) = setup();

        let token = manager.issue(&identity, Duration::from_secs(60)).unwrap();
        let resolved = manager.validate(&token).unwrap();

        assert_eq!(resolved.id, identity.id);
        assert_eq!(resolved.display_name, "Alice");
        assert_eq!(manager.session_count(), 1);
    }

    #[test]
    fn test_issue_blocked_identity() {
        let (directory, manager, identity) = setup();
        directory.block(identity.id).unwrap();
        let blocked = directory.get(identity.id).unwrap();

        let result = manager.issue(&blocked, Duration::from_secs(60));
        assert!(matches!(result, Err(CoreError::Forbidden(_))));
    }

    #[test]
    fn test_issue_zero_ttl() {
        let (_directory, manager, identity) = setup();
        let result = manager.issue(&identity, Duration::from_secs(0));
        assert!(matches!(result, Err(CoreError::Validation(_))));
    }

    #[test]
    fn test_validate_garbage_token() {
        let (_directory, manager, _identity) = setup();
        let result = manager.validate("definitely-not-a-jwt");
        assert!(matches!(result, Err(CoreError::Unauthenticated(_))));
    }

    #[test]
    fn test_validate_wrong_secret() {
        let directory = Arc::new(IdentityDirectory::new());
        let identity = directory.register("Alice", SystemRole::User).unwrap();

        let manager_a = SessionManager::new("secret-a", directory.clone());
        let manager_b = SessionManager::new("secret-b", directory);

        let token = manager_a.issue(&identity, Duration::from_secs(60)).unwrap();
        assert!(manager_b.validate(&token).is_err());
    }

    #[test]
    fn test_validate_expired_token() {
        let (_directory, manager, identity) = setup();

        // Forge a token whose expiry is already in the past.
        let claims = Claims {
            sub: identity.id.to_string(),
            iat: Utc::now().timestamp() - 7200,
            exp: Utc::now().timestamp() - 3600,
            jti: Uuid::new_v4().to_string(),
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(b"test-secret"),
        )
        .unwrap();

        let result = manager.validate(&token);
        assert!(matches!(result, Err(CoreError::Unauthenticated(_))));
    }

    #[test]
    fn test_revoke_rejects_before_expiry() {
        let (_directory, manager, identity) = setup();

        let token = manager.issue(&identity, Duration::from_secs(3600)).unwrap();
        assert!(manager.validate(&token).is_ok());

        manager.revoke(&token);
        let result = manager.validate(&token);
        assert!(matches!(result, Err(CoreError::Unauthenticated(_))));
    }

    #[test]
    fn test_revoke_is_idempotent() {
        let (_directory, manager, identity) = setup();

        let token = manager.issue(&identity, Duration::from_secs(3600)).unwrap();
        manager.revoke(&token);
        manager.revoke(&token);
        manager.revoke("garbage");

        assert!(manager.validate(&token).is_err());
    }

    #[test]
    fn test_validate_unknown_identity_fails_closed() {
        let directory = Arc::new(IdentityDirectory::new());
        let manager = SessionManager::new("test-secret", directory);

        // Token is well signed but its subject was never registered.
        let claims = Claims {
            sub: IdentityId::new().to_string(),
            iat: Utc::now().timestamp(),
            exp: Utc::now().timestamp() + 3600,
            jti: Uuid::new_v4().to_string(),
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(b"test-secret"),
        )
        .unwrap();

        assert!(manager.validate(&token).is_err());
    }

    #[test]
    fn test_cleanup_drops_expired() {
        let (_directory, manager, identity) = setup();

        let token = manager.issue(&identity, Duration::from_secs(3600)).unwrap();
        assert_eq!(manager.cleanup(), 0);
        assert_eq!(manager.session_count(), 1);

        // Expired sessions disappear on cleanup; the live one stays.
        {
            let mut state = manager.state.write().unwrap();
            if let Some(s) = state.sessions.values_mut().next() {
                s.expires_at = Utc::now() - chrono::Duration::seconds(1);
            }
        }
        assert_eq!(manager.cleanup(), 1);
        assert_eq!(manager.session_count(), 0);

        // Cleanup only prunes bookkeeping; validation goes by the claims.
        assert!(manager.validate(&token).is_ok());
    }

    #[test]
    fn test_identity_session_count() {
        let (directory, manager, alice) = setup();
        let bob = directory.register("Bob", SystemRole::User).unwrap();

        manager.issue(&alice, Duration::from_secs(60)).unwrap();
        manager.issue(&alice, Duration::from_secs(60)).unwrap();
        manager.issue(&bob, Duration::from_secs(60)).unwrap();

        assert_eq!(manager.identity_session_count(alice.id), 2);
        assert_eq!(manager.identity_session_count(bob.id), 1);
    }

    #[test]
    fn test_session_invariant_expiry_after_issue() {
        let (_directory, manager, identity) = setup();
        manager.issue(&identity, Duration::from_secs(60)).unwrap();

        let state = manager.state.read().unwrap();
        for session in state.sessions.values() {
            assert!(session.expires_at > session.issued_at);
        }
    }
}
