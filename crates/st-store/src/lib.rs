//! steptrace snapshot database.
//!
//! This crate provides:
//! - The SQLite schema for sessions, instruction traces, memory snapshots
//!   and per-region captures, with migration and version checks
//! - [`SnapshotStore`], the only owner of durable recorder state
//! - The memory paint [`pattern`] validator and content checksums
//! - Aggregation queries consumed by external reporting

pub mod checksum;
pub mod error;
pub mod pattern;
pub mod query;
pub mod records;
pub mod schema;
pub mod store;

pub use checksum::content_checksum;
pub use error::StoreError;
pub use pattern::{validate_pattern, Mismatch, PatternResult};
pub use records::{
    FunctionStat, NewTraceEntry, PatternPoint, PhaseSpan, RegionCapture, RegionComparison,
    RegionDiff, RegionRead, SessionOutcome, SessionRecord, SnapshotRecord, SnapshotRequest,
    SnapshotTrigger, TraceRecord,
};
pub use store::SnapshotStore;

/// Default database file name.
pub const DEFAULT_DB_FILE: &str = "memory_snapshots.db";
