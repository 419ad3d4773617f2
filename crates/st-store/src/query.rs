//! Read-side aggregation over the snapshot database.
//!
//! These queries back the JSON commands and any external report renderer.
//! Ordering is by timestamp and falls back to row id on ties.

use rusqlite::{params, OptionalExtension, Row};
use st_common::{RegisterBank, SessionId, SnapshotId};

use crate::error::StoreError;
use crate::records::{
    FunctionStat, PatternPoint, PhaseSpan, RegionCapture, RegionComparison, RegionDiff,
    SessionOutcome, SessionRecord, SnapshotRecord, TraceRecord,
};
use crate::store::SnapshotStore;

const SESSION_COLUMNS: &str = "
    s.session_id, s.start_time, s.end_time, s.description, s.total_instructions,
    COALESCE(s.total_snapshots,
             (SELECT COUNT(*) FROM memory_snapshots m WHERE m.session_id = s.session_id)),
    (SELECT COUNT(*) FROM instruction_traces t WHERE t.session_id = s.session_id),
    s.outcome, s.error, s.config_hash";

const REGION_COLUMNS: &str = "
    r.region_id, r.snapshot_id, s.phase, r.region_name, r.start_address, r.size,
    r.expected_pattern, r.pattern_matches, r.total_words, r.match_percentage, r.checksum";

fn get_u64(row: &Row<'_>, idx: usize) -> rusqlite::Result<u64> {
    let value: i64 = row.get(idx)?;
    u64::try_from(value).map_err(|_| rusqlite::Error::IntegralValueOutOfRange(idx, value))
}

fn get_opt_u64(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<u64>> {
    let value: Option<i64> = row.get(idx)?;
    value
        .map(|v| u64::try_from(v).map_err(|_| rusqlite::Error::IntegralValueOutOfRange(idx, v)))
        .transpose()
}

fn get_registers(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<RegisterBank>> {
    let text: Option<String> = row.get(idx)?;
    text.map(|t| {
        serde_json::from_str(&t).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
    })
    .transpose()
}

fn map_session(row: &Row<'_>) -> rusqlite::Result<SessionRecord> {
    let outcome: String = row.get(7)?;
    Ok(SessionRecord {
        session_id: SessionId(row.get(0)?),
        start_time: row.get(1)?,
        end_time: row.get(2)?,
        description: row.get(3)?,
        total_instructions: get_opt_u64(row, 4)?,
        total_snapshots: get_u64(row, 5)?,
        trace_rows: get_u64(row, 6)?,
        // Rows written by older tooling may carry no recognised outcome.
        outcome: SessionOutcome::parse(&outcome).unwrap_or(SessionOutcome::Recording),
        error: row.get(8)?,
        config_hash: row.get(9)?,
    })
}

fn map_region(row: &Row<'_>) -> rusqlite::Result<RegionCapture> {
    Ok(RegionCapture {
        region_id: row.get(0)?,
        snapshot_id: SnapshotId(row.get(1)?),
        phase: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
        region_name: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
        start_address: row.get::<_, Option<u32>>(4)?.unwrap_or_default(),
        size: get_u64(row, 5)?,
        expected_pattern: row.get(6)?,
        match_count: get_u64(row, 7)?,
        total_words: get_u64(row, 8)?,
        match_percentage: row.get(9)?,
        checksum: row.get::<_, Option<String>>(10)?.unwrap_or_default(),
    })
}

impl SnapshotStore {
    /// Every session, newest first.
    pub fn list_sessions(&self) -> Result<Vec<SessionRecord>, StoreError> {
        let sql = format!(
            "SELECT {SESSION_COLUMNS} FROM sessions s ORDER BY s.start_time DESC, s.rowid DESC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], map_session)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn get_session(&self, session_id: &SessionId) -> Result<Option<SessionRecord>, StoreError> {
        let sql = format!("SELECT {SESSION_COLUMNS} FROM sessions s WHERE s.session_id = ?1");
        Ok(self
            .conn
            .query_row(&sql, params![session_id.as_str()], map_session)
            .optional()?)
    }

    /// Sessions that were never closed, oldest first.
    ///
    /// A session left open after its recorder exited points at a crash or a
    /// kill that bypassed cancellation.
    pub fn unclosed_sessions(&self) -> Result<Vec<SessionRecord>, StoreError> {
        let sql = format!(
            "SELECT {SESSION_COLUMNS} FROM sessions s
             WHERE s.end_time IS NULL ORDER BY s.start_time, s.rowid"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], map_session)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Per-phase instruction counts, ordered by first occurrence.
    pub fn query_phase_timeline(
        &self,
        session_id: &SessionId,
    ) -> Result<Vec<PhaseSpan>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT phase, MIN(sequence_number), MAX(sequence_number), COUNT(*)
             FROM instruction_traces
             WHERE session_id = ?1
             GROUP BY phase
             ORDER BY MIN(sequence_number)",
        )?;
        let rows = stmt.query_map(params![session_id.as_str()], |row| {
            Ok(PhaseSpan {
                phase: row.get(0)?,
                first_seq: get_u64(row, 1)?,
                last_seq: get_u64(row, 2)?,
                instruction_count: get_u64(row, 3)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Match percentage of one region across the session's snapshots.
    pub fn query_pattern_evolution(
        &self,
        session_id: &SessionId,
        region_name: &str,
    ) -> Result<Vec<PatternPoint>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT s.snapshot_id, s.timestamp, s.phase, r.match_percentage
             FROM memory_regions r
             JOIN memory_snapshots s ON r.snapshot_id = s.snapshot_id
             WHERE s.session_id = ?1 AND r.region_name = ?2
             ORDER BY s.timestamp, s.snapshot_id",
        )?;
        let rows = stmt.query_map(params![session_id.as_str(), region_name], |row| {
            Ok(PatternPoint {
                snapshot_id: SnapshotId(row.get(0)?),
                timestamp: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                phase: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                match_percentage: row.get(3)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Snapshot metadata in capture order.
    pub fn list_snapshots(&self, session_id: &SessionId) -> Result<Vec<SnapshotRecord>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT s.snapshot_id, s.session_id, s.timestamp, s.phase, s.pc_address,
                    s.total_size, s.trigger,
                    (SELECT COUNT(*) FROM memory_regions r WHERE r.snapshot_id = s.snapshot_id)
             FROM memory_snapshots s
             WHERE s.session_id = ?1
             ORDER BY s.timestamp, s.snapshot_id",
        )?;
        let rows = stmt.query_map(params![session_id.as_str()], |row| {
            Ok(SnapshotRecord {
                snapshot_id: SnapshotId(row.get(0)?),
                session_id: SessionId(row.get(1)?),
                timestamp: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                phase: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
                pc: row.get::<_, Option<u32>>(4)?.unwrap_or_default(),
                total_size: get_u64(row, 5)?,
                trigger: row.get::<_, Option<String>>(6)?.unwrap_or_default(),
                region_count: get_u64(row, 7)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Region captures of one snapshot, in insertion order.
    pub fn list_regions(&self, snapshot_id: SnapshotId) -> Result<Vec<RegionCapture>, StoreError> {
        let sql = format!(
            "SELECT {REGION_COLUMNS}
             FROM memory_regions r
             JOIN memory_snapshots s ON r.snapshot_id = s.snapshot_id
             WHERE r.snapshot_id = ?1
             ORDER BY r.region_id"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![snapshot_id.0], map_region)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Raw payload of one region capture.
    pub fn region_data(&self, region_id: i64) -> Result<Option<Vec<u8>>, StoreError> {
        let data: Option<Option<Vec<u8>>> = self
            .conn
            .query_row(
                "SELECT data FROM memory_regions WHERE region_id = ?1",
                params![region_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(data.map(Option::unwrap_or_default))
    }

    /// Captures of one region plus what changed between consecutive ones.
    pub fn compare_region(
        &self,
        session_id: &SessionId,
        region_name: &str,
    ) -> Result<RegionComparison, StoreError> {
        let sql = format!(
            "SELECT {REGION_COLUMNS}
             FROM memory_regions r
             JOIN memory_snapshots s ON r.snapshot_id = s.snapshot_id
             WHERE s.session_id = ?1 AND r.region_name = ?2
             ORDER BY s.timestamp, s.snapshot_id"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let captures = stmt
            .query_map(params![session_id.as_str(), region_name], map_region)?
            .collect::<Result<Vec<_>, _>>()?;

        let differences = captures
            .windows(2)
            .map(|pair| RegionDiff {
                from_snapshot: pair[0].snapshot_id,
                to_snapshot: pair[1].snapshot_id,
                from_phase: pair[0].phase.clone(),
                to_phase: pair[1].phase.clone(),
                checksum_changed: pair[0].checksum != pair[1].checksum,
                match_delta: pair[1].match_count as i64 - pair[0].match_count as i64,
            })
            .collect();

        Ok(RegionComparison {
            region_name: region_name.to_string(),
            captures,
            differences,
        })
    }

    /// Instruction counts per resolved function, busiest first.
    pub fn query_function_stats(
        &self,
        session_id: &SessionId,
    ) -> Result<Vec<FunctionStat>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT function_name, COUNT(*), COUNT(DISTINCT phase)
             FROM instruction_traces
             WHERE session_id = ?1 AND function_name IS NOT NULL
             GROUP BY function_name
             ORDER BY COUNT(*) DESC, function_name",
        )?;
        let rows = stmt.query_map(params![session_id.as_str()], |row| {
            Ok(FunctionStat {
                function: row.get(0)?,
                instruction_count: get_u64(row, 1)?,
                phases_active: get_u64(row, 2)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Full instruction trace of a session in sequence order.
    pub fn list_traces(&self, session_id: &SessionId) -> Result<Vec<TraceRecord>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT sequence_number, timestamp, pc_address, instruction_bytes, disassembly,
                    registers, stack_pointer, function_name, phase
             FROM instruction_traces
             WHERE session_id = ?1
             ORDER BY sequence_number",
        )?;
        let rows = stmt.query_map(params![session_id.as_str()], |row| {
            Ok(TraceRecord {
                sequence: get_u64(row, 0)?,
                timestamp: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                pc: row.get(2)?,
                instruction_bytes: row.get(3)?,
                disassembly: row.get(4)?,
                registers: get_registers(row, 5)?,
                stack_pointer: row.get(6)?,
                function_name: row.get(7)?,
                phase: row.get(8)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}
