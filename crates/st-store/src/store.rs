//! The snapshot store: sessions, instruction traces and memory snapshots.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use st_common::{SessionId, SnapshotId};
use tracing::{debug, info, trace, warn};

use crate::checksum::content_checksum;
use crate::error::StoreError;
use crate::pattern::validate_pattern;
use crate::records::{format_timestamp, NewTraceEntry, SessionOutcome, SnapshotRequest};
use crate::schema;

/// How long a writer waits on a locked database before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Owner of all durable recorder state.
///
/// One store instance is driven by one recorder; read-only analysis can
/// open the same file concurrently through a second instance.
pub struct SnapshotStore {
    pub(crate) conn: Connection,
    path: Option<PathBuf>,
}

impl SnapshotStore {
    /// Open (or create) a database file and bring its schema up to date.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        debug!(path = %path.display(), journal_mode = %mode, "opened snapshot database");
        Self::bootstrap(conn, Some(path.to_path_buf()))
    }

    /// A private in-memory database, used by tests and dry runs.
    pub fn in_memory() -> Result<Self, StoreError> {
        Self::bootstrap(Connection::open_in_memory()?, None)
    }

    fn bootstrap(conn: Connection, path: Option<PathBuf>) -> Result<Self, StoreError> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        schema::migrate(&conn)?;
        Ok(Self { conn, path })
    }

    /// Database file path, `None` for in-memory stores.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Insert a new open session and return its id.
    pub fn begin_session(
        &mut self,
        description: Option<&str>,
        config_hash: Option<&str>,
    ) -> Result<SessionId, StoreError> {
        let session_id = SessionId::new();
        self.conn.execute(
            "INSERT INTO sessions (session_id, start_time, description, outcome, config_hash)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                session_id.as_str(),
                format_timestamp(Utc::now()),
                description,
                SessionOutcome::Recording.as_str(),
                config_hash,
            ],
        )?;
        info!(session_id = %session_id, "session started");
        Ok(session_id)
    }

    /// Close a session with its final counts.
    ///
    /// Returns `false` when the session was already closed; the first call's
    /// end time, counts and outcome are left untouched.
    pub fn end_session(
        &mut self,
        session_id: &SessionId,
        total_instructions: u64,
        outcome: SessionOutcome,
        error: Option<&str>,
    ) -> Result<bool, StoreError> {
        let total_instructions = to_sql_int("total_instructions", total_instructions)?;
        let tx = self.conn.transaction()?;

        match session_end_time(&tx, session_id)? {
            None => {
                return Err(StoreError::SessionNotFound {
                    session_id: session_id.to_string(),
                })
            }
            Some(Some(_)) => {
                debug!(session_id = %session_id, "session already closed");
                return Ok(false);
            }
            Some(None) => {}
        }

        let total_snapshots: i64 = tx.query_row(
            "SELECT COUNT(*) FROM memory_snapshots WHERE session_id = ?1",
            params![session_id.as_str()],
            |row| row.get(0),
        )?;
        tx.execute(
            "UPDATE sessions
             SET end_time = ?2, total_instructions = ?3, total_snapshots = ?4,
                 outcome = ?5, error = ?6
             WHERE session_id = ?1 AND end_time IS NULL",
            params![
                session_id.as_str(),
                format_timestamp(Utc::now()),
                total_instructions,
                total_snapshots,
                outcome.as_str(),
                error,
            ],
        )?;
        tx.commit()?;

        info!(
            session_id = %session_id,
            outcome = %outcome,
            total_instructions,
            total_snapshots,
            "session closed"
        );
        Ok(true)
    }

    /// Append one instruction trace row.
    ///
    /// The sequence number must be greater than every sequence already stored
    /// for the session; gaps are accepted.
    pub fn append_instruction_trace(
        &mut self,
        session_id: &SessionId,
        entry: &NewTraceEntry,
    ) -> Result<i64, StoreError> {
        let tx = self.conn.transaction()?;
        let trace_id = append_trace_tx(&tx, session_id, entry)?;
        tx.commit()?;
        Ok(trace_id)
    }

    /// Persist a snapshot and its region captures.
    ///
    /// Regions whose read came back empty are stored with size zero instead
    /// of failing the snapshot.
    pub fn capture_snapshot(
        &mut self,
        session_id: &SessionId,
        request: &SnapshotRequest,
    ) -> Result<SnapshotId, StoreError> {
        let tx = self.conn.transaction()?;
        let snapshot_id = capture_snapshot_tx(&tx, session_id, request)?;
        tx.commit()?;
        Ok(snapshot_id)
    }

    /// Write one recorder step (trace row plus optional snapshot) atomically.
    pub fn record_step(
        &mut self,
        session_id: &SessionId,
        entry: &NewTraceEntry,
        snapshot: Option<&SnapshotRequest>,
    ) -> Result<Option<SnapshotId>, StoreError> {
        let tx = self.conn.transaction()?;
        append_trace_tx(&tx, session_id, entry)?;
        let snapshot_id = snapshot
            .map(|request| capture_snapshot_tx(&tx, session_id, request))
            .transpose()?;
        tx.commit()?;
        Ok(snapshot_id)
    }

    /// Delete a session together with its traces, snapshots and regions.
    pub fn delete_session(&mut self, session_id: &SessionId) -> Result<bool, StoreError> {
        let deleted = self.conn.execute(
            "DELETE FROM sessions WHERE session_id = ?1",
            params![session_id.as_str()],
        )?;
        if deleted > 0 {
            info!(session_id = %session_id, "session deleted");
        }
        Ok(deleted > 0)
    }
}

/// `None` if the session does not exist, `Some(end_time)` otherwise.
fn session_end_time(
    conn: &Connection,
    session_id: &SessionId,
) -> Result<Option<Option<String>>, StoreError> {
    Ok(conn
        .query_row(
            "SELECT end_time FROM sessions WHERE session_id = ?1",
            params![session_id.as_str()],
            |row| row.get(0),
        )
        .optional()?)
}

fn append_trace_tx(
    conn: &Connection,
    session_id: &SessionId,
    entry: &NewTraceEntry,
) -> Result<i64, StoreError> {
    match session_end_time(conn, session_id)? {
        None => {
            return Err(StoreError::SessionNotFound {
                session_id: session_id.to_string(),
            })
        }
        Some(Some(_)) => {
            return Err(StoreError::SessionClosed {
                session_id: session_id.to_string(),
            })
        }
        Some(None) => {}
    }

    let sequence = to_sql_int("sequence_number", entry.sequence)?;
    let last: Option<i64> = conn.query_row(
        "SELECT MAX(sequence_number) FROM instruction_traces WHERE session_id = ?1",
        params![session_id.as_str()],
        |row| row.get(0),
    )?;
    if let Some(last) = last {
        if sequence <= last {
            return Err(StoreError::SequenceViolation {
                session_id: session_id.to_string(),
                last: last as u64,
                got: entry.sequence,
            });
        }
    }

    let registers = entry
        .registers
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;
    conn.execute(
        "INSERT INTO instruction_traces
            (session_id, sequence_number, timestamp, pc_address, instruction_bytes,
             disassembly, registers, stack_pointer, function_name, phase)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            session_id.as_str(),
            sequence,
            format_timestamp(entry.timestamp),
            entry.pc,
            entry.instruction_bytes,
            entry.disassembly,
            registers,
            entry.stack_pointer(),
            entry.function_name,
            entry.phase,
        ],
    )?;
    trace!(session_id = %session_id, sequence = entry.sequence, phase = %entry.phase, "trace appended");
    Ok(conn.last_insert_rowid())
}

fn capture_snapshot_tx(
    conn: &Connection,
    session_id: &SessionId,
    request: &SnapshotRequest,
) -> Result<SnapshotId, StoreError> {
    let registers = request
        .registers
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;
    conn.execute(
        "INSERT INTO memory_snapshots
            (session_id, timestamp, phase, pc_address, registers, total_size, trigger)
         VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6)",
        params![
            session_id.as_str(),
            format_timestamp(Utc::now()),
            request.phase,
            request.pc,
            registers,
            request.trigger.as_str(),
        ],
    )?;
    let snapshot_id = conn.last_insert_rowid();

    let mut total_size: u64 = 0;
    for region in &request.regions {
        if region.data.is_empty() {
            warn!(region = %region.name, "region unavailable, storing empty capture");
        }
        let result = validate_pattern(region.start, &region.data, region.expected_pattern);
        let size = region.data.len() as u64;
        total_size += size;
        conn.execute(
            "INSERT INTO memory_regions
                (snapshot_id, region_name, start_address, size, data, expected_pattern,
                 pattern_matches, total_words, match_percentage, checksum)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                snapshot_id,
                region.name,
                region.start,
                to_sql_int("size", size)?,
                region.data,
                region.expected_pattern,
                to_sql_int("pattern_matches", result.matches)?,
                to_sql_int("total_words", result.total_words)?,
                result.is_applicable().then_some(result.match_percentage),
                content_checksum(&region.data),
            ],
        )?;
        if let Some(first) = result.mismatches.first() {
            debug!(
                region = %region.name,
                match_percentage = result.match_percentage,
                first_mismatch = %format!("{:#010x}", first.address),
                "pattern mismatch"
            );
        }
    }

    conn.execute(
        "UPDATE memory_snapshots SET total_size = ?2 WHERE snapshot_id = ?1",
        params![snapshot_id, to_sql_int("total_size", total_size)?],
    )?;
    debug!(
        session_id = %session_id,
        snapshot_id,
        phase = %request.phase,
        trigger = request.trigger.as_str(),
        total_size,
        "snapshot captured"
    );
    Ok(SnapshotId(snapshot_id))
}

pub(crate) fn to_sql_int(column: &'static str, value: u64) -> Result<i64, StoreError> {
    i64::try_from(value).map_err(|_| StoreError::OutOfRange { column, value })
}
