//! The recording loop.
//!
//! One [`Recorder`] owns one session end to end: it single-steps the target,
//! classifies every PC, appends a trace row per step and decides when to
//! snapshot memory. Each step's writes go to the store in one transaction.

use chrono::Utc;
use serde::Serialize;
use st_common::{RegisterBank, SessionId};
use st_config::{
    AddressRange, RecorderConfig, RecordingPolicy, RegisterFailurePolicy, SymbolTable,
    UNKNOWN_PHASE,
};
use st_store::{NewTraceEntry, SnapshotRequest, SnapshotStore, SnapshotTrigger, StoreError};
use tracing::{debug, info, warn};

use crate::cancel::CancelFlag;
use crate::phase::PhaseClassifier;
use crate::remote::packet::is_step_stop;
use crate::remote::{RemoteTarget, TargetError};
use crate::session::{FinishedSession, RecorderState, Recording, TypedSession};
use crate::target::{read_register_set, MemoryReader};

/// Summary of one recording run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordingReport {
    pub session_id: SessionId,
    pub state: RecorderState,
    pub instructions: u64,
    pub trace_rows: u64,
    pub snapshots: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// What a single step wrote.
#[derive(Debug, Default)]
struct StepWrites {
    trace: bool,
    snapshot: bool,
}

/// Why the loop stopped.
enum Stop {
    Limit,
    Cancelled,
    Target(String),
    Store(StoreError),
}

/// Drives one recording session against a remote target.
pub struct Recorder<'a, T: RemoteTarget> {
    target: T,
    store: &'a mut SnapshotStore,
    classifier: PhaseClassifier,
    symbols: SymbolTable,
    reader: MemoryReader,
    always_snapshot: Vec<AddressRange>,
    policy: RecordingPolicy,
    cancel: CancelFlag,
    previous_phase: Option<String>,
}

impl<'a, T: RemoteTarget> Recorder<'a, T> {
    pub fn new(
        target: T,
        store: &'a mut SnapshotStore,
        config: &RecorderConfig,
        cancel: CancelFlag,
    ) -> Self {
        Self {
            target,
            store,
            classifier: PhaseClassifier::new(config.phases.clone()),
            symbols: config.symbol_table(),
            reader: MemoryReader::new(config.regions.clone()),
            always_snapshot: config.always_snapshot.clone(),
            policy: config.recording.clone(),
            cancel,
            previous_phase: None,
        }
    }

    /// Replace the region reader (tests shrink the read chunk).
    pub fn with_reader(mut self, reader: MemoryReader) -> Self {
        self.reader = reader;
        self
    }

    /// Record until the instruction limit, a failure or cancellation.
    ///
    /// The session row is closed on every path that opened it. Target
    /// failures end in a `Failed` report; store failures close the session
    /// as failed and are then returned as errors.
    pub fn run(
        &mut self,
        description: Option<&str>,
        config_hash: Option<&str>,
    ) -> Result<RecordingReport, st_common::Error> {
        let idle = TypedSession::new(description.map(str::to_string));
        let session_id = self.store.begin_session(description, config_hash)?;
        let recording = idle.start(session_id.clone());
        self.previous_phase = None;

        info!(
            session_id = %session_id,
            max_instructions = self.policy.max_instructions,
            snapshot_interval = self.policy.snapshot_interval,
            "recording started"
        );

        let mut step: u64 = 0;
        let mut trace_rows: u64 = 0;
        let mut snapshots: u64 = 0;

        let stop = loop {
            // A run that reached its limit is finished even if a cancel
            // arrived during the last step.
            if step >= self.policy.max_instructions {
                break Stop::Limit;
            }
            if self.cancel.is_cancelled() {
                break Stop::Cancelled;
            }

            match self.step_target() {
                Ok(true) => {}
                Ok(false) => {
                    break Stop::Target(format!("target did not acknowledge step {step}"));
                }
                Err(e) => break Stop::Target(format!("single step {step} failed: {e}")),
            }

            match self.record_step(&session_id, step) {
                Ok(writes) => {
                    trace_rows += u64::from(writes.trace);
                    snapshots += u64::from(writes.snapshot);
                }
                Err(e) => {
                    // The target already executed this instruction.
                    step += 1;
                    break Stop::Store(e);
                }
            }

            step += 1;
            if self.policy.progress_interval > 0 && step % self.policy.progress_interval == 0 {
                info!(
                    session_id = %session_id,
                    step,
                    phase = self.previous_phase.as_deref().unwrap_or(UNKNOWN_PHASE),
                    snapshots,
                    "recording progress"
                );
            }
        };

        let (finished, store_error) = Self::finish(recording, step, stop);
        let data = finished.data();
        let state = finished.runtime_state();
        let closed = self.store.end_session(
            &session_id,
            data.instructions,
            state.outcome(),
            data.error.as_deref(),
        );

        match state {
            RecorderState::Failed => warn!(
                session_id = %session_id,
                instructions = data.instructions,
                error = data.error.as_deref().unwrap_or_default(),
                "recording failed"
            ),
            _ => info!(
                session_id = %session_id,
                state = ?state,
                instructions = data.instructions,
                trace_rows,
                snapshots,
                "recording finished"
            ),
        }

        if let Some(e) = store_error {
            return Err(e.into());
        }
        closed?;

        Ok(RecordingReport {
            session_id,
            state,
            instructions: data.instructions,
            trace_rows,
            snapshots,
            error: data.error.clone(),
        })
    }

    fn finish(
        recording: TypedSession<Recording>,
        step: u64,
        stop: Stop,
    ) -> (FinishedSession, Option<StoreError>) {
        match stop {
            Stop::Limit => (recording.complete(step).into(), None),
            Stop::Cancelled => (recording.cancel(step).into(), None),
            Stop::Target(reason) => (recording.fail(step, reason).into(), None),
            Stop::Store(e) => (recording.fail(step, e.to_string()).into(), Some(e)),
        }
    }

    /// Single-step with bounded retries on transport failures.
    ///
    /// Before a retry the link is resynced. A stop reply that shows up late
    /// means the timed-out step did execute, so it is not sent again.
    fn step_target(&mut self) -> Result<bool, TargetError> {
        let mut attempt = 0u32;
        loop {
            match self.target.single_step() {
                Ok(acked) => return Ok(acked),
                Err(e) if attempt < self.policy.step_retries => {
                    attempt += 1;
                    let late = self.target.resync()?;
                    if late.iter().any(|reply| is_step_stop(reply)) {
                        debug!(error = %e, "stop reply arrived late, step completed");
                        return Ok(true);
                    }
                    warn!(error = %e, attempt, "single step failed, retrying");
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn record_step(&mut self, session_id: &SessionId, step: u64) -> Result<StepWrites, StoreError> {
        let Some(registers) = read_register_set(&mut self.target) else {
            return self.record_unavailable(session_id, step);
        };

        let pc = registers.pc;
        let phase = self.classifier.classify(pc).to_string();
        let transition = PhaseClassifier::detect_transition(self.previous_phase.as_deref(), &phase);
        if transition {
            info!(
                step,
                pc = %format!("{pc:#010x}"),
                from = self.previous_phase.as_deref().unwrap_or("-"),
                to = %phase,
                "phase transition"
            );
        }

        let entry = self.trace_entry(step, registers, &phase);
        let snapshot = self.snapshot_trigger(step, transition, pc).map(|trigger| {
            debug!(step, trigger = trigger.as_str(), "taking snapshot");
            SnapshotRequest {
                phase: phase.clone(),
                pc,
                registers: Some(registers),
                trigger,
                regions: self.reader.read_all(&mut self.target),
            }
        });

        let snapshot_id = self.store.record_step(session_id, &entry, snapshot.as_ref())?;
        self.previous_phase = Some(phase);
        Ok(StepWrites {
            trace: true,
            snapshot: snapshot_id.is_some(),
        })
    }

    fn record_unavailable(
        &mut self,
        session_id: &SessionId,
        step: u64,
    ) -> Result<StepWrites, StoreError> {
        match self.policy.register_failure_policy {
            RegisterFailurePolicy::Skip => {
                debug!(step, "registers unavailable, step counted without trace");
                Ok(StepWrites::default())
            }
            RegisterFailurePolicy::RecordPartial => {
                let phase = self
                    .previous_phase
                    .clone()
                    .unwrap_or_else(|| UNKNOWN_PHASE.to_string());
                let entry = NewTraceEntry::new(step, phase);
                self.store.record_step(session_id, &entry, None)?;
                Ok(StepWrites {
                    trace: true,
                    snapshot: false,
                })
            }
        }
    }

    fn trace_entry(&mut self, step: u64, registers: RegisterBank, phase: &str) -> NewTraceEntry {
        let pc = registers.pc;
        let instruction_bytes = if self.policy.capture_instruction_bytes {
            self.reader.read_instruction(&mut self.target, pc)
        } else {
            None
        };
        NewTraceEntry {
            sequence: step,
            timestamp: Utc::now(),
            pc: Some(pc),
            instruction_bytes,
            disassembly: None,
            registers: Some(registers),
            function_name: self.symbols.resolve(pc).map(str::to_string),
            phase: phase.to_string(),
        }
    }

    /// At most one trigger per step, in priority order.
    fn snapshot_trigger(&self, step: u64, transition: bool, pc: u32) -> Option<SnapshotTrigger> {
        if transition {
            Some(SnapshotTrigger::PhaseTransition)
        } else if self.policy.snapshot_interval > 0 && step % self.policy.snapshot_interval == 0 {
            Some(SnapshotTrigger::Interval)
        } else if self.always_snapshot.iter().any(|range| range.contains(pc)) {
            Some(SnapshotTrigger::AlwaysRange)
        } else {
            None
        }
    }

    /// Give the target back, e.g. to reuse the connection.
    pub fn into_target(self) -> T {
        self.target
    }
}
