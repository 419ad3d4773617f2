//! steptrace core library.
//!
//! This crate provides:
//! - [`remote`]: the remote serial protocol client behind the
//!   [`RemoteTarget`](remote::RemoteTarget) seam
//! - [`target`]: register and named-region reads for snapshots
//! - [`phase`]: PC to phase classification
//! - [`recorder`]: the single-step recording loop
//! - [`monitor`]: the optional VM monitor channel used for cross-checks
//! - CLI plumbing: exit codes, logging and cancellation

pub mod cancel;
pub mod exit_codes;
pub mod logging;
pub mod monitor;
pub mod phase;
pub mod recorder;
pub mod remote;
pub mod session;
pub mod target;

pub use cancel::CancelFlag;
pub use exit_codes::ExitCode;
pub use phase::PhaseClassifier;
pub use recorder::{Recorder, RecordingReport};
pub use remote::{GdbClient, RemoteTarget, TargetError};
pub use session::RecorderState;
pub use target::MemoryReader;
