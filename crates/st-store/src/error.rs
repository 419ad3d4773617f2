//! Store error types.

use thiserror::Error;

/// Errors from the snapshot database.
///
/// Apart from `Sqlite` I/O failures these indicate bookkeeping bugs in the
/// caller, so the recorder treats every store error as fatal for a session.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("sequence violation in {session_id}: {got} does not follow {last}")]
    SequenceViolation {
        session_id: String,
        last: u64,
        got: u64,
    },

    #[error("session not found: {session_id}")]
    SessionNotFound { session_id: String },

    #[error("session {session_id} is already closed")]
    SessionClosed { session_id: String },

    #[error("database schema version {found} is not compatible (expected {expected})")]
    IncompatibleSchema { found: String, expected: String },

    #[error("value out of range for column {column}: {value}")]
    OutOfRange { column: &'static str, value: u64 },
}

impl From<StoreError> for st_common::Error {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::SequenceViolation {
                session_id,
                last,
                got,
            } => st_common::Error::SequenceViolation {
                session_id,
                last,
                got,
            },
            StoreError::SessionNotFound { session_id } => {
                st_common::Error::SessionNotFound { session_id }
            }
            StoreError::Json(e) => st_common::Error::Json(e),
            other => st_common::Error::Store(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_violation_keeps_its_code() {
        let err: st_common::Error = StoreError::SequenceViolation {
            session_id: "sess-x".into(),
            last: 1,
            got: 1,
        }
        .into();
        assert_eq!(err.code(), 41);
    }

    #[test]
    fn closed_session_maps_to_store_family() {
        let err: st_common::Error = StoreError::SessionClosed {
            session_id: "sess-x".into(),
        }
        .into();
        assert_eq!(err.family(), "store");
    }
}
