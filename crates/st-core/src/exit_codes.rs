//! Exit codes for the steptrace CLI.
//!
//! Exit codes communicate the recording outcome without requiring output
//! parsing. They are stable across releases.

/// Exit codes for steptrace operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    /// Recording completed or query answered
    Clean = 0,

    /// Recording ended as failed (target stopped acknowledging steps)
    RecordingFailed = 3,

    /// Recording interrupted by the operator; data up to that point is valid
    Interrupted = 6,

    /// Configuration error
    ConfigError = 10,

    /// Remote target unreachable or speaking garbage
    TargetError = 11,

    /// Snapshot database error
    StoreError = 12,

    /// I/O error
    IoError = 13,

    /// Internal/unknown error
    InternalError = 99,
}

impl ExitCode {
    /// Convert to i32 for process exit.
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Check if this exit code indicates success.
    pub fn is_success(self) -> bool {
        matches!(self, ExitCode::Clean)
    }

    /// Check if this exit code indicates an error requiring attention.
    pub fn is_error(self) -> bool {
        (self as i32) >= 10
    }

    /// Map an error to its exit code by error family.
    pub fn for_error(err: &st_common::Error) -> Self {
        match err.family() {
            "config" => ExitCode::ConfigError,
            "transport" | "protocol" => ExitCode::TargetError,
            "store" | "session" => ExitCode::StoreError,
            "io" => ExitCode::IoError,
            _ => ExitCode::InternalError,
        }
    }
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code as i32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_map_by_family() {
        let err = st_common::Error::HandshakeFailed {
            address: "127.0.0.1:1234".into(),
        };
        assert_eq!(ExitCode::for_error(&err), ExitCode::TargetError);

        let err = st_common::Error::InvalidPhaseTable("empty".into());
        assert_eq!(ExitCode::for_error(&err), ExitCode::ConfigError);

        let err = st_common::Error::SessionNotFound {
            session_id: "sess-x".into(),
        };
        assert_eq!(ExitCode::for_error(&err).as_i32(), 12);
    }

    #[test]
    fn interrupted_is_neither_success_nor_error() {
        assert!(!ExitCode::Interrupted.is_success());
        assert!(!ExitCode::Interrupted.is_error());
        assert!(ExitCode::IoError.is_error());
    }
}
