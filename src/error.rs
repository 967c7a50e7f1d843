//! Error types for the chatverse core.

use thiserror::Error;

/// Common error type for core operations.
///
/// Every registry operation returns one of these explicitly; errors never
/// cross component boundaries as panics.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Missing, malformed, expired, or revoked session token.
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    /// Insufficient role, blocked identity, or bad private-room credential.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Room is at capacity.
    #[error("room is full (capacity {capacity})")]
    RoomFull {
        /// Configured capacity of the room.
        capacity: usize,
    },

    /// The acting identity is not a member of the room.
    #[error("not a member of room {0}")]
    NotAMember(String),

    /// Malformed input (empty message, bad room parameters, ...).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A connection's outbound queue overflowed and an ordering-critical
    /// entry could not be enqueued. The connection must be closed and the
    /// client must resynchronize via history replay.
    #[error("backpressure on connection {0}")]
    Backpressure(String),

    /// A gap was detected in a delivered or loaded `seq` window.
    #[error("resync required for room {0}")]
    ResyncRequired(String),

    /// Resource not found.
    #[error("{0} not found")]
    NotFound(String),

    /// Message store error.
    #[error("store error: {0}")]
    Store(String),

    /// Filesystem error (log files, database paths).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Unexpected failure. Always logged, never silently swallowed.
    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Whether this error must tear down the connection it occurred on.
    ///
    /// Connection-level errors leave the outbound stream in a state the
    /// client cannot trust; the cure is reconnect + history replay.
    pub fn closes_connection(&self) -> bool {
        matches!(
            self,
            CoreError::Backpressure(_) | CoreError::ResyncRequired(_)
        )
    }

    /// Short machine-readable code for the wire protocol.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::Unauthenticated(_) => "unauthenticated",
            CoreError::Forbidden(_) => "forbidden",
            CoreError::RoomFull { .. } => "room_full",
            CoreError::NotAMember(_) => "not_a_member",
            CoreError::Validation(_) => "validation_failed",
            CoreError::Backpressure(_) => "backpressure",
            CoreError::ResyncRequired(_) => "resync_required",
            CoreError::NotFound(_) => "not_found",
            CoreError::Store(_) => "store_error",
            CoreError::Io(_) => "io_error",
            CoreError::Internal(_) => "internal",
        }
    }
}

impl From<sqlx::Error> for CoreError {
    fn from(e: sqlx::Error) -> Self {
        CoreError::Store(e.to_string())
    }
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unauthenticated_display() {
        let err = CoreError::Unauthenticated("token expired".to_string());
        assert_eq!(err.to_string(), "unauthenticated: token expired");
    }

    #[test]
    fn test_room_full_display() {
        let err = CoreError::RoomFull { capacity: 2 };
        assert_eq!(err.to_string(), "room is full (capacity 2)");
    }

    #[test]
    fn test_not_found_display() {
        let err = CoreError::NotFound("room".to_string());
        assert_eq!(err.to_string(), "room not found");
    }

    #[test]
    fn test_connection_level_errors_close() {
        assert!(CoreError::Backpressure("c1".to_string()).closes_connection());
        assert!(CoreError::ResyncRequired("r1".to_string()).closes_connection());
        assert!(!CoreError::RoomFull { capacity: 8 }.closes_connection());
        assert!(!CoreError::Validation("empty".to_string()).closes_connection());
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(CoreError::RoomFull { capacity: 1 }.code(), "room_full");
        assert_eq!(
            CoreError::NotAMember("r".to_string()).code(),
            "not_a_member"
        );
        assert_eq!(
            CoreError::ResyncRequired("r".to_string()).code(),
            "resync_required"
        );
    }

    #[test]
    fn test_io_error_conversion() {
        fn read_missing() -> Result<String> {
            Ok(std::fs::read_to_string("/nonexistent/chatverse-io-test")?)
        }
        let err = read_missing().unwrap_err();
        assert!(matches!(err, CoreError::Io(_)));
        assert_eq!(err.code(), "io_error");
        assert!(!err.closes_connection());
    }

    #[test]
    fn test_result_alias() {
        fn sample_ok() -> Result<i32> {
            Ok(7)
        }
        assert_eq!(sample_ok().unwrap(), 7);
    }
}
