//! Database schema and migration.

use rusqlite::{params, Connection, OptionalExtension};
use st_common::schema::is_compatible;
use st_common::SCHEMA_VERSION;
use tracing::debug;

use crate::error::StoreError;

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS schema_meta (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS sessions (
    session_id         TEXT PRIMARY KEY,
    start_time         TEXT NOT NULL,
    end_time           TEXT,
    description        TEXT,
    total_instructions INTEGER,
    total_snapshots    INTEGER,
    outcome            TEXT NOT NULL DEFAULT 'recording',
    error              TEXT,
    config_hash        TEXT
);

CREATE TABLE IF NOT EXISTS instruction_traces (
    trace_id          INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id        TEXT NOT NULL REFERENCES sessions(session_id) ON DELETE CASCADE,
    sequence_number   INTEGER NOT NULL,
    timestamp         TEXT,
    pc_address        INTEGER,
    instruction_bytes BLOB,
    disassembly       TEXT,
    registers         TEXT,
    stack_pointer     INTEGER,
    function_name     TEXT,
    phase             TEXT NOT NULL,
    UNIQUE (session_id, sequence_number)
);

CREATE TABLE IF NOT EXISTS memory_snapshots (
    snapshot_id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id  TEXT NOT NULL REFERENCES sessions(session_id) ON DELETE CASCADE,
    timestamp   TEXT,
    phase       TEXT,
    pc_address  INTEGER,
    registers   TEXT,
    total_size  INTEGER NOT NULL DEFAULT 0,
    trigger     TEXT
);

CREATE TABLE IF NOT EXISTS memory_regions (
    region_id        INTEGER PRIMARY KEY AUTOINCREMENT,
    snapshot_id      INTEGER NOT NULL REFERENCES memory_snapshots(snapshot_id) ON DELETE CASCADE,
    region_name      TEXT,
    start_address    INTEGER,
    size             INTEGER NOT NULL,
    data             BLOB,
    expected_pattern INTEGER,
    pattern_matches  INTEGER NOT NULL DEFAULT 0,
    total_words      INTEGER NOT NULL DEFAULT 0,
    match_percentage REAL,
    checksum         TEXT
);

CREATE INDEX IF NOT EXISTS idx_traces_session_seq ON instruction_traces(session_id, sequence_number);
CREATE INDEX IF NOT EXISTS idx_traces_pc ON instruction_traces(pc_address);
CREATE INDEX IF NOT EXISTS idx_snapshots_session ON memory_snapshots(session_id);
CREATE INDEX IF NOT EXISTS idx_regions_snapshot ON memory_regions(snapshot_id);
CREATE INDEX IF NOT EXISTS idx_regions_name ON memory_regions(region_name);
";

/// Create missing tables and check the recorded schema version.
///
/// A fresh database is stamped with [`SCHEMA_VERSION`]; an existing one
/// must carry a version with the same major component.
pub fn migrate(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(SCHEMA_SQL)?;

    match stored_version(conn)? {
        None => {
            conn.execute(
                "INSERT INTO schema_meta (key, value) VALUES ('schema_version', ?1)",
                params![SCHEMA_VERSION],
            )?;
            debug!(version = SCHEMA_VERSION, "stamped new database");
            Ok(())
        }
        Some(version) if is_compatible(&version) => Ok(()),
        Some(version) => Err(StoreError::IncompatibleSchema {
            found: version,
            expected: SCHEMA_VERSION.to_string(),
        }),
    }
}

/// Schema version recorded in the database, if any.
pub fn stored_version(conn: &Connection) -> Result<Option<String>, StoreError> {
    Ok(conn
        .query_row(
            "SELECT value FROM schema_meta WHERE key = 'schema_version'",
            [],
            |row| row.get(0),
        )
        .optional()?)
}
