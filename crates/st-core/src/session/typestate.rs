//! Typestate recorder lifecycle.
//!
//! Encodes the recorder state machine at the type level so that impossible
//! transitions are caught at compile time. Each phase is a zero-sized marker
//! type, and `TypedSession<S>` can only be transitioned via methods that
//! consume the old phase and return the new one.
//!
//! # State Machine
//!
//! ```text
//! Idle ──▶ Recording ──▶ Completed
//!              │
//!              ├──────▶ Failed
//!              │
//!              └──────▶ Cancelled
//! ```
//!
//! Terminal states are reachable from `Recording` only: a recorder that
//! never opened a session has nothing to close.

use std::marker::PhantomData;

use serde::{Deserialize, Serialize};
use st_common::SessionId;

use super::RecorderState;

// ── Phase marker traits ─────────────────────────────────────────────────

/// Marker trait for recorder phases. Sealed to prevent external implementation.
pub trait SessionPhase: sealed::Sealed {
    /// The corresponding runtime `RecorderState` variant.
    fn runtime_state() -> RecorderState;
    /// Human-readable phase name.
    fn name() -> &'static str;
}

mod sealed {
    pub trait Sealed {}
    impl Sealed for super::Idle {}
    impl Sealed for super::Recording {}
    impl Sealed for super::Completed {}
    impl Sealed for super::Failed {}
    impl Sealed for super::Cancelled {}
}

// ── Phase types ─────────────────────────────────────────────────────────

/// Configured, no session opened yet.
#[derive(Debug, Clone, Copy)]
pub struct Idle;

/// Stepping the target; the session row is open.
#[derive(Debug, Clone, Copy)]
pub struct Recording;

/// Reached the instruction limit.
#[derive(Debug, Clone, Copy)]
pub struct Completed;

/// Stopped by a target or store failure.
#[derive(Debug, Clone, Copy)]
pub struct Failed;

/// Stopped by an operator request.
#[derive(Debug, Clone, Copy)]
pub struct Cancelled;

macro_rules! phase {
    ($ty:ty, $state:ident, $name:literal) => {
        impl SessionPhase for $ty {
            fn runtime_state() -> RecorderState {
                RecorderState::$state
            }
            fn name() -> &'static str {
                $name
            }
        }
    };
}

phase!(Idle, Idle, "idle");
phase!(Recording, Recording, "recording");
phase!(Completed, Completed, "completed");
phase!(Failed, Failed, "failed");
phase!(Cancelled, Cancelled, "cancelled");

// ── Session data ────────────────────────────────────────────────────────

/// Data carried through every phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionData {
    /// Store session id, assigned when recording starts.
    pub session_id: Option<SessionId>,
    pub description: Option<String>,
    /// Instructions executed so far (final once terminal).
    pub instructions: u64,
    /// Populated on failure.
    pub error: Option<String>,
}

// ── Typed session ───────────────────────────────────────────────────────

/// A recorder session with compile-time phase tracking.
#[derive(Debug)]
pub struct TypedSession<S: SessionPhase> {
    data: SessionData,
    _phase: PhantomData<S>,
}

impl<S: SessionPhase> TypedSession<S> {
    pub fn data(&self) -> &SessionData {
        &self.data
    }

    pub fn runtime_state(&self) -> RecorderState {
        S::runtime_state()
    }

    pub fn phase_name(&self) -> &'static str {
        S::name()
    }

    fn into_phase<T: SessionPhase>(self) -> TypedSession<T> {
        TypedSession {
            data: self.data,
            _phase: PhantomData,
        }
    }
}

impl TypedSession<Idle> {
    pub fn new(description: Option<String>) -> Self {
        Self {
            data: SessionData {
                session_id: None,
                description,
                instructions: 0,
                error: None,
            },
            _phase: PhantomData,
        }
    }

    /// Transition: Idle → Recording, once the store has opened a session.
    pub fn start(self, session_id: SessionId) -> TypedSession<Recording> {
        let mut next = self.into_phase::<Recording>();
        next.data.session_id = Some(session_id);
        next
    }
}

impl TypedSession<Recording> {
    /// The open session. Always set in this phase.
    pub fn session_id(&self) -> Option<&SessionId> {
        self.data.session_id.as_ref()
    }

    /// Transition: Recording → Completed.
    pub fn complete(self, instructions: u64) -> TypedSession<Completed> {
        let mut next = self.into_phase::<Completed>();
        next.data.instructions = instructions;
        next
    }

    /// Transition: Recording → Failed.
    pub fn fail(self, instructions: u64, error: String) -> TypedSession<Failed> {
        let mut next = self.into_phase::<Failed>();
        next.data.instructions = instructions;
        next.data.error = Some(error);
        next
    }

    /// Transition: Recording → Cancelled.
    pub fn cancel(self, instructions: u64) -> TypedSession<Cancelled> {
        let mut next = self.into_phase::<Cancelled>();
        next.data.instructions = instructions;
        next
    }
}

impl TypedSession<Failed> {
    /// Get the error that caused the failure.
    pub fn error(&self) -> Option<&str> {
        self.data.error.as_deref()
    }
}

// ── Terminal dispatch ───────────────────────────────────────────────────

/// A session in one of the terminal phases, for runtime dispatch.
#[derive(Debug)]
pub enum FinishedSession {
    Completed(TypedSession<Completed>),
    Failed(TypedSession<Failed>),
    Cancelled(TypedSession<Cancelled>),
}

impl FinishedSession {
    pub fn runtime_state(&self) -> RecorderState {
        match self {
            FinishedSession::Completed(s) => s.runtime_state(),
            FinishedSession::Failed(s) => s.runtime_state(),
            FinishedSession::Cancelled(s) => s.runtime_state(),
        }
    }

    pub fn data(&self) -> &SessionData {
        match self {
            FinishedSession::Completed(s) => s.data(),
            FinishedSession::Failed(s) => s.data(),
            FinishedSession::Cancelled(s) => s.data(),
        }
    }
}

impl From<TypedSession<Completed>> for FinishedSession {
    fn from(s: TypedSession<Completed>) -> Self {
        FinishedSession::Completed(s)
    }
}

impl From<TypedSession<Failed>> for FinishedSession {
    fn from(s: TypedSession<Failed>) -> Self {
        FinishedSession::Failed(s)
    }
}

impl From<TypedSession<Cancelled>> for FinishedSession {
    fn from(s: TypedSession<Cancelled>) -> Self {
        FinishedSession::Cancelled(s)
    }
}

// ── Tests ───────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn sid() -> SessionId {
        SessionId("sess-20260101-000000-abcdef".to_string())
    }

    #[test]
    fn happy_path_lifecycle() {
        let session = TypedSession::new(Some("boot".to_string()));
        assert_eq!(session.runtime_state(), RecorderState::Idle);
        assert_eq!(session.phase_name(), "idle");

        let session = session.start(sid());
        assert_eq!(session.runtime_state(), RecorderState::Recording);
        assert_eq!(session.session_id(), Some(&sid()));

        let session = session.complete(20);
        assert_eq!(session.runtime_state(), RecorderState::Completed);
        assert_eq!(session.data().instructions, 20);
        assert_eq!(session.data().description.as_deref(), Some("boot"));
    }

    #[test]
    fn fail_keeps_error_and_count() {
        let failed = TypedSession::new(None).start(sid()).fail(7, "no ack".to_string());
        assert_eq!(failed.runtime_state(), RecorderState::Failed);
        assert_eq!(failed.error(), Some("no ack"));
        assert_eq!(failed.data().instructions, 7);
    }

    #[test]
    fn cancel_from_recording() {
        let cancelled = TypedSession::new(None).start(sid()).cancel(3);
        let finished = FinishedSession::from(cancelled);
        assert_eq!(finished.runtime_state(), RecorderState::Cancelled);
        assert_eq!(finished.data().instructions, 3);
        assert!(finished.runtime_state().is_terminal());
    }

    #[test]
    fn phase_names() {
        assert_eq!(Idle::name(), "idle");
        assert_eq!(Recording::name(), "recording");
        assert_eq!(Completed::name(), "completed");
        assert_eq!(Failed::name(), "failed");
        assert_eq!(Cancelled::name(), "cancelled");
    }

    #[test]
    fn states_map_to_outcomes() {
        use st_store::SessionOutcome;
        assert_eq!(RecorderState::Recording.outcome(), SessionOutcome::Recording);
        assert_eq!(RecorderState::Cancelled.outcome(), SessionOutcome::Cancelled);
        assert!(!RecorderState::Idle.is_terminal());
    }
}
