//! Error types for steptrace.

use thiserror::Error;

/// Result type alias for steptrace operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for steptrace.
///
/// Component crates keep their own typed errors and convert into this one at
/// the binary boundary, where [`Error::code`] feeds the JSON error output.
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors (10-19)
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid phase table: {0}")]
    InvalidPhaseTable(String),

    #[error("invalid region table: {0}")]
    InvalidRegionTable(String),

    // Transport errors (20-29)
    #[error("failed to connect to {address}: {reason}")]
    Connect { address: String, reason: String },

    #[error("handshake with {address} failed")]
    HandshakeFailed { address: String },

    #[error("read timeout after {millis}ms")]
    ReadTimeout { millis: u64 },

    #[error("connection closed by peer")]
    ConnectionClosed,

    // Protocol errors (30-39)
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("register payload too short: {got} hex chars, need {need}")]
    RegisterPayload { got: usize, need: usize },

    // Store errors (40-49)
    #[error("store error: {0}")]
    Store(String),

    #[error("sequence violation in {session_id}: {got} does not follow {last}")]
    SequenceViolation {
        session_id: String,
        last: u64,
        got: u64,
    },

    // Session errors (50-59)
    #[error("session not found: {session_id}")]
    SessionNotFound { session_id: String },

    // I/O errors (60-69)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Returns the error code for this error type.
    /// Used for detailed error reporting in JSON output.
    pub fn code(&self) -> u32 {
        match self {
            Error::Config(_) => 10,
            Error::InvalidPhaseTable(_) => 11,
            Error::InvalidRegionTable(_) => 12,
            Error::Connect { .. } => 20,
            Error::HandshakeFailed { .. } => 21,
            Error::ReadTimeout { .. } => 22,
            Error::ConnectionClosed => 23,
            Error::Protocol(_) => 30,
            Error::RegisterPayload { .. } => 31,
            Error::Store(_) => 40,
            Error::SequenceViolation { .. } => 41,
            Error::SessionNotFound { .. } => 50,
            Error::Io(_) => 60,
            Error::Json(_) => 61,
        }
    }

    /// Coarse family name, stable across releases.
    pub fn family(&self) -> &'static str {
        match self.code() {
            10..=19 => "config",
            20..=29 => "transport",
            30..=39 => "protocol",
            40..=49 => "store",
            50..=59 => "session",
            _ => "io",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_group_by_family() {
        assert_eq!(Error::Config("x".into()).family(), "config");
        assert_eq!(Error::ReadTimeout { millis: 5 }.family(), "transport");
        assert_eq!(
            Error::RegisterPayload { got: 8, need: 136 }.family(),
            "protocol"
        );
        assert_eq!(
            Error::SequenceViolation {
                session_id: "s".into(),
                last: 1,
                got: 1
            }
            .code(),
            41
        );
        assert_eq!(Error::ConnectionClosed.code(), 23);
    }

    #[test]
    fn io_errors_convert() {
        let err: Error = std::io::Error::new(std::io::ErrorKind::Other, "boom").into();
        assert_eq!(err.code(), 60);
        assert_eq!(err.family(), "io");
    }
}
