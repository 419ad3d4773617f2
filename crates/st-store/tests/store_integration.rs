//! Integration tests for the snapshot store.

use st_common::{RegisterBank, SessionId};
use st_store::{
    NewTraceEntry, RegionRead, SessionOutcome, SnapshotRequest, SnapshotStore, SnapshotTrigger,
    StoreError,
};
use tempfile::TempDir;

fn region(name: &str, start: u32, data: Vec<u8>, pattern: Option<u32>) -> RegionRead {
    RegionRead {
        name: name.to_string(),
        start,
        data,
        expected_pattern: pattern,
    }
}

fn snapshot(phase: &str, regions: Vec<RegionRead>) -> SnapshotRequest {
    SnapshotRequest {
        phase: phase.to_string(),
        pc: 0x4000_0e70,
        registers: Some(RegisterBank::default()),
        trigger: SnapshotTrigger::PhaseTransition,
        regions,
    }
}

fn painted(pattern: u32, words: usize) -> Vec<u8> {
    pattern.to_le_bytes().repeat(words)
}

#[test]
fn strictly_increasing_sequences_are_accepted() {
    let mut store = SnapshotStore::in_memory().unwrap();
    let id = store.begin_session(Some("monotonic"), None).unwrap();
    for seq in 0..50 {
        store
            .append_instruction_trace(&id, &NewTraceEntry::new(seq, "freertos_main"))
            .unwrap();
    }
    assert_eq!(store.list_traces(&id).unwrap().len(), 50);
}

#[test]
fn repeated_sequence_is_a_violation() {
    let mut store = SnapshotStore::in_memory().unwrap();
    let id = store.begin_session(None, None).unwrap();
    store
        .append_instruction_trace(&id, &NewTraceEntry::new(0, "a"))
        .unwrap();
    store
        .append_instruction_trace(&id, &NewTraceEntry::new(1, "a"))
        .unwrap();
    let err = store
        .append_instruction_trace(&id, &NewTraceEntry::new(1, "a"))
        .unwrap_err();
    assert!(matches!(
        err,
        StoreError::SequenceViolation { last: 1, got: 1, .. }
    ));
    assert_eq!(store.list_traces(&id).unwrap().len(), 2);
}

#[test]
fn ending_a_session_twice_keeps_the_first_close() {
    let mut store = SnapshotStore::in_memory().unwrap();
    let id = store.begin_session(None, None).unwrap();

    assert!(store
        .end_session(&id, 10, SessionOutcome::Completed, None)
        .unwrap());
    let first = store.get_session(&id).unwrap().unwrap();

    assert!(!store
        .end_session(&id, 99, SessionOutcome::Cancelled, Some("late"))
        .unwrap());
    let second = store.get_session(&id).unwrap().unwrap();

    assert_eq!(first.end_time, second.end_time);
    assert_eq!(second.total_instructions, Some(10));
    assert_eq!(second.outcome, SessionOutcome::Completed);
    assert_eq!(second.error, None);
}

#[test]
fn ending_unknown_session_errors() {
    let mut store = SnapshotStore::in_memory().unwrap();
    let err = store
        .end_session(
            &SessionId("sess-none".into()),
            0,
            SessionOutcome::Completed,
            None,
        )
        .unwrap_err();
    assert!(matches!(err, StoreError::SessionNotFound { .. }));
}

#[test]
fn snapshot_total_size_sums_regions() {
    let mut store = SnapshotStore::in_memory().unwrap();
    let id = store.begin_session(None, None).unwrap();
    let snap = store
        .capture_snapshot(
            &id,
            &snapshot(
                "pattern_painting",
                vec![
                    region("stackRegion", 0x4100_0000, vec![0u8; 16], Some(0xDEAD_BEEF)),
                    region("dataRegion", 0x4120_0000, vec![0u8; 32], None),
                ],
            ),
        )
        .unwrap();

    let snapshots = store.list_snapshots(&id).unwrap();
    assert_eq!(snapshots.len(), 1);
    assert_eq!(snapshots[0].total_size, 48);
    assert_eq!(snapshots[0].region_count, 2);
    assert_eq!(store.list_regions(snap).unwrap().len(), 2);
}

#[test]
fn failed_region_read_is_stored_with_zero_size() {
    let mut store = SnapshotStore::in_memory().unwrap();
    let id = store.begin_session(None, None).unwrap();
    let snap = store
        .capture_snapshot(
            &id,
            &snapshot(
                "camkes_init",
                vec![
                    region("guestBase", 0x4000_0000, vec![1u8; 64], None),
                    region("heapRegion", 0x4140_0000, Vec::new(), Some(0xCAFE_BABE)),
                ],
            ),
        )
        .unwrap();

    let regions = store.list_regions(snap).unwrap();
    let heap = regions
        .iter()
        .find(|r| r.region_name == "heapRegion")
        .unwrap();
    assert_eq!(heap.size, 0);
    assert_eq!(heap.total_words, 0);
    assert_eq!(heap.match_percentage, Some(0.0));
    assert_eq!(store.region_data(heap.region_id).unwrap(), Some(Vec::new()));
    assert_eq!(store.list_snapshots(&id).unwrap()[0].total_size, 64);
}

#[test]
fn snapshot_for_missing_session_leaves_nothing_behind() {
    let mut store = SnapshotStore::in_memory().unwrap();
    let ghost = SessionId("sess-20260101-000000-ghost1".into());
    let result = store.capture_snapshot(
        &ghost,
        &snapshot(
            "unknown",
            vec![region("guestBase", 0x4000_0000, vec![0u8; 4], None)],
        ),
    );
    assert!(matches!(result, Err(StoreError::Sqlite(_))));
    assert!(store.list_snapshots(&ghost).unwrap().is_empty());
}

#[test]
fn record_step_rolls_back_on_sequence_violation() {
    let mut store = SnapshotStore::in_memory().unwrap();
    let id = store.begin_session(None, None).unwrap();
    store
        .record_step(&id, &NewTraceEntry::new(0, "freertos_main"), None)
        .unwrap();

    let result = store.record_step(
        &id,
        &NewTraceEntry::new(0, "freertos_main"),
        Some(&snapshot(
            "freertos_main",
            vec![region("guestBase", 0x4000_0000, vec![0u8; 4], None)],
        )),
    );
    assert!(result.is_err());
    assert!(store.list_snapshots(&id).unwrap().is_empty());
}

#[test]
fn deleting_a_session_cascades() {
    let mut store = SnapshotStore::in_memory().unwrap();
    let id = store.begin_session(None, None).unwrap();
    store
        .record_step(
            &id,
            &NewTraceEntry::new(0, "freertos_main"),
            Some(&snapshot(
                "freertos_main",
                vec![region("guestBase", 0x4000_0000, vec![0u8; 8], None)],
            )),
        )
        .unwrap();

    assert!(store.delete_session(&id).unwrap());
    assert!(store.get_session(&id).unwrap().is_none());
    assert!(store.list_traces(&id).unwrap().is_empty());
    assert!(store.list_snapshots(&id).unwrap().is_empty());
    assert!(store.region_data(1).unwrap().is_none());
    assert!(!store.delete_session(&id).unwrap());
}

#[test]
fn phase_timeline_groups_by_first_occurrence() {
    let mut store = SnapshotStore::in_memory().unwrap();
    let id = store.begin_session(None, None).unwrap();
    for seq in 0..20 {
        let phase = if seq < 10 {
            "freertos_main"
        } else {
            "scheduler_start"
        };
        store
            .append_instruction_trace(&id, &NewTraceEntry::new(seq, phase))
            .unwrap();
    }

    let timeline = store.query_phase_timeline(&id).unwrap();
    assert_eq!(timeline.len(), 2);
    assert_eq!(timeline[0].phase, "freertos_main");
    assert_eq!(
        (timeline[0].first_seq, timeline[0].last_seq, timeline[0].instruction_count),
        (0, 9, 10)
    );
    assert_eq!(timeline[1].phase, "scheduler_start");
    assert_eq!(
        (timeline[1].first_seq, timeline[1].last_seq, timeline[1].instruction_count),
        (10, 19, 10)
    );
}

#[test]
fn pattern_evolution_and_comparison_track_painting() {
    let mut store = SnapshotStore::in_memory().unwrap();
    let id = store.begin_session(None, None).unwrap();

    let mut half = painted(0x55AA_55AA, 2);
    half.extend_from_slice(&[0u8; 8]);
    store
        .capture_snapshot(
            &id,
            &snapshot(
                "freertos_main",
                vec![region("patternRegion", 0x4200_0000, vec![0u8; 16], Some(0x55AA_55AA))],
            ),
        )
        .unwrap();
    store
        .capture_snapshot(
            &id,
            &snapshot(
                "pattern_painting",
                vec![region("patternRegion", 0x4200_0000, half, Some(0x55AA_55AA))],
            ),
        )
        .unwrap();
    store
        .capture_snapshot(
            &id,
            &snapshot(
                "scheduler_start",
                vec![region(
                    "patternRegion",
                    0x4200_0000,
                    painted(0x55AA_55AA, 4),
                    Some(0x55AA_55AA),
                )],
            ),
        )
        .unwrap();

    let evolution = store.query_pattern_evolution(&id, "patternRegion").unwrap();
    let percentages: Vec<_> = evolution.iter().map(|p| p.match_percentage).collect();
    assert_eq!(percentages, vec![Some(0.0), Some(50.0), Some(100.0)]);
    assert_eq!(evolution[2].phase, "scheduler_start");

    let comparison = store.compare_region(&id, "patternRegion").unwrap();
    assert_eq!(comparison.captures.len(), 3);
    assert_eq!(comparison.differences.len(), 2);
    assert!(comparison.differences[0].checksum_changed);
    assert_eq!(comparison.differences[0].match_delta, 2);
    assert_eq!(comparison.differences[1].from_phase, "pattern_painting");
    assert_eq!(comparison.differences[1].match_delta, 2);
}

#[test]
fn function_stats_and_unclosed_sessions() {
    let mut store = SnapshotStore::in_memory().unwrap();
    let open = store.begin_session(Some("left open"), None).unwrap();
    let closed = store.begin_session(Some("finished"), Some("abc")).unwrap();

    for (seq, func, phase) in [
        (0, Some("main"), "freertos_main"),
        (1, Some("main"), "freertos_main"),
        (2, Some("main"), "camkes_init"),
        (3, Some("vMonitorTask"), "camkes_init"),
        (4, None, "unknown"),
    ] {
        let mut entry = NewTraceEntry::new(seq, phase);
        entry.function_name = func.map(str::to_string);
        store.append_instruction_trace(&closed, &entry).unwrap();
    }
    store
        .end_session(&closed, 5, SessionOutcome::Completed, None)
        .unwrap();

    let stats = store.query_function_stats(&closed).unwrap();
    assert_eq!(stats.len(), 2);
    assert_eq!(stats[0].function, "main");
    assert_eq!(stats[0].instruction_count, 3);
    assert_eq!(stats[0].phases_active, 2);

    let unclosed = store.unclosed_sessions().unwrap();
    assert_eq!(unclosed.len(), 1);
    assert_eq!(unclosed[0].session_id, open);

    let all = store.list_sessions().unwrap();
    assert_eq!(all.len(), 2);
    let finished = all.iter().find(|s| s.session_id == closed).unwrap();
    assert_eq!(finished.trace_rows, 5);
    assert_eq!(finished.config_hash.as_deref(), Some("abc"));
}

#[test]
fn file_database_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("snapshots.db");

    let id = {
        let mut store = SnapshotStore::open(&path).unwrap();
        let id = store.begin_session(Some("persisted"), None).unwrap();
        let mut words = [0u32; st_common::REGISTER_COUNT];
        words[15] = 0x4000_0e70;
        store
            .append_instruction_trace(
                &id,
                &NewTraceEntry::new(0, "freertos_main")
                    .with_registers(RegisterBank::from_words(words)),
            )
            .unwrap();
        id
    };

    let store = SnapshotStore::open(&path).unwrap();
    let traces = store.list_traces(&id).unwrap();
    assert_eq!(traces.len(), 1);
    assert_eq!(traces[0].pc, Some(0x4000_0e70));
    assert_eq!(traces[0].registers.map(|r| r.pc), Some(0x4000_0e70));
    assert_eq!(store.unclosed_sessions().unwrap().len(), 1);
}
