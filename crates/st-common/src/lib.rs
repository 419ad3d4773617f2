//! steptrace common types, IDs, and errors.
//!
//! This crate provides foundational types shared across the recorder crates:
//! - Session and snapshot identity types
//! - The captured register bank of the ARM target
//! - The unified error type and its stable error codes
//! - Store schema versioning

pub mod error;
pub mod id;
pub mod registers;
pub mod schema;

pub use error::{Error, Result};
pub use id::{SessionId, SnapshotId};
pub use registers::{RegisterBank, REGISTER_COUNT};
pub use schema::SCHEMA_VERSION;
