//! Row types written to and read from the snapshot database.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use st_common::{RegisterBank, SessionId, SnapshotId};

/// RFC 3339 UTC with microseconds; lexical order equals temporal order.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Final (or current) state of a recording session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionOutcome {
    Recording,
    Completed,
    Failed,
    Cancelled,
}

impl SessionOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionOutcome::Recording => "recording",
            SessionOutcome::Completed => "completed",
            SessionOutcome::Failed => "failed",
            SessionOutcome::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "recording" => Some(SessionOutcome::Recording),
            "completed" => Some(SessionOutcome::Completed),
            "failed" => Some(SessionOutcome::Failed),
            "cancelled" => Some(SessionOutcome::Cancelled),
            _ => None,
        }
    }
}

impl std::fmt::Display for SessionOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a snapshot was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotTrigger {
    PhaseTransition,
    Interval,
    AlwaysRange,
    Manual,
}

impl SnapshotTrigger {
    pub fn as_str(self) -> &'static str {
        match self {
            SnapshotTrigger::PhaseTransition => "phase_transition",
            SnapshotTrigger::Interval => "interval",
            SnapshotTrigger::AlwaysRange => "always_range",
            SnapshotTrigger::Manual => "manual",
        }
    }
}

/// One single-stepped instruction, as handed to the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTraceEntry {
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    /// Absent when the register read for this step failed.
    pub pc: Option<u32>,
    pub instruction_bytes: Option<Vec<u8>>,
    /// Opaque annotation supplied by an external disassembler.
    pub disassembly: Option<String>,
    pub registers: Option<RegisterBank>,
    pub function_name: Option<String>,
    pub phase: String,
}

impl NewTraceEntry {
    pub fn new(sequence: u64, phase: impl Into<String>) -> Self {
        Self {
            sequence,
            timestamp: Utc::now(),
            pc: None,
            instruction_bytes: None,
            disassembly: None,
            registers: None,
            function_name: None,
            phase: phase.into(),
        }
    }

    pub fn with_registers(mut self, registers: RegisterBank) -> Self {
        self.pc = Some(registers.pc);
        self.registers = Some(registers);
        self
    }

    pub fn stack_pointer(&self) -> Option<u32> {
        self.registers.map(|r| r.sp)
    }
}

/// Raw bytes read from one named region; empty `data` means the read failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionRead {
    pub name: String,
    pub start: u32,
    pub data: Vec<u8>,
    pub expected_pattern: Option<u32>,
}

/// Everything needed to persist one snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotRequest {
    pub phase: String,
    pub pc: u32,
    pub registers: Option<RegisterBank>,
    pub trigger: SnapshotTrigger,
    pub regions: Vec<RegionRead>,
}

/// A persisted session row, with live counts for still-open sessions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: SessionId,
    pub start_time: String,
    pub end_time: Option<String>,
    pub description: Option<String>,
    pub total_instructions: Option<u64>,
    pub total_snapshots: u64,
    pub trace_rows: u64,
    pub outcome: SessionOutcome,
    pub error: Option<String>,
    pub config_hash: Option<String>,
}

impl SessionRecord {
    pub fn is_closed(&self) -> bool {
        self.end_time.is_some()
    }
}

/// A persisted instruction trace row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceRecord {
    pub sequence: u64,
    pub timestamp: String,
    pub pc: Option<u32>,
    pub instruction_bytes: Option<Vec<u8>>,
    pub disassembly: Option<String>,
    pub registers: Option<RegisterBank>,
    pub stack_pointer: Option<u32>,
    pub function_name: Option<String>,
    pub phase: String,
}

/// Snapshot metadata without region payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub snapshot_id: SnapshotId,
    pub session_id: SessionId,
    pub timestamp: String,
    pub phase: String,
    pub pc: u32,
    pub total_size: u64,
    pub trigger: String,
    pub region_count: u64,
}

/// Region capture metadata; payload via `SnapshotStore::region_data`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionCapture {
    pub region_id: i64,
    pub snapshot_id: SnapshotId,
    /// Phase of the owning snapshot.
    pub phase: String,
    pub region_name: String,
    pub start_address: u32,
    pub size: u64,
    pub expected_pattern: Option<u32>,
    pub match_count: u64,
    pub total_words: u64,
    pub match_percentage: Option<f64>,
    pub checksum: String,
}

/// Aggregate of one phase over a session's instruction trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseSpan {
    pub phase: String,
    pub first_seq: u64,
    pub last_seq: u64,
    pub instruction_count: u64,
}

/// One point of a region's pattern history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternPoint {
    pub snapshot_id: SnapshotId,
    pub timestamp: String,
    pub phase: String,
    /// `None` when the region has no expected pattern.
    pub match_percentage: Option<f64>,
}

/// Change of one region between consecutive snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionDiff {
    pub from_snapshot: SnapshotId,
    pub to_snapshot: SnapshotId,
    pub from_phase: String,
    pub to_phase: String,
    pub checksum_changed: bool,
    pub match_delta: i64,
}

/// Captures of one region across a session plus consecutive differences.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionComparison {
    pub region_name: String,
    pub captures: Vec<RegionCapture>,
    pub differences: Vec<RegionDiff>,
}

/// Instruction count per resolved function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionStat {
    pub function: String,
    pub instruction_count: u64,
    pub phases_active: u64,
}
