//! Recording session lifecycle.

pub mod typestate;

use serde::{Deserialize, Serialize};
use st_store::SessionOutcome;

pub use typestate::{
    Cancelled, Completed, Failed, FinishedSession, Idle, Recording, SessionData, SessionPhase,
    TypedSession,
};

/// Runtime state of a recorder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecorderState {
    Idle,
    Recording,
    Completed,
    Failed,
    Cancelled,
}

impl RecorderState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RecorderState::Completed | RecorderState::Failed | RecorderState::Cancelled
        )
    }

    /// Outcome column written to the session row.
    pub fn outcome(self) -> SessionOutcome {
        match self {
            RecorderState::Idle | RecorderState::Recording => SessionOutcome::Recording,
            RecorderState::Completed => SessionOutcome::Completed,
            RecorderState::Failed => SessionOutcome::Failed,
            RecorderState::Cancelled => SessionOutcome::Cancelled,
        }
    }
}
