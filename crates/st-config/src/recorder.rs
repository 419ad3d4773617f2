//! Recorder configuration types.
//!
//! Every field has a default so a partial JSON file only needs to name what
//! it changes. The defaults reproduce the FreeRTOS-on-seL4 debug layout.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::phases::{default_phase_table, AddressRange, PhaseRange};
use crate::regions::{default_regions, MemoryRegion};
use crate::symbols::{default_symbols, Symbol, SymbolTable};
use crate::validate::{validate, ValidationError};
use crate::CONFIG_SCHEMA_VERSION;

/// Errors from loading or validating a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    NotFound(PathBuf),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid configuration: {}", format_errors(.0))]
    Invalid(Vec<ValidationError>),
}

fn format_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl From<ConfigError> for st_common::Error {
    fn from(err: ConfigError) -> Self {
        match &err {
            ConfigError::Invalid(errors) if errors.iter().all(ValidationError::is_phase_table) => {
                st_common::Error::InvalidPhaseTable(err.to_string())
            }
            ConfigError::Invalid(errors) if errors.iter().all(ValidationError::is_region_table) => {
                st_common::Error::InvalidRegionTable(err.to_string())
            }
            _ => st_common::Error::Config(err.to_string()),
        }
    }
}

/// Byte order of each register image in a register-read reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ByteOrder {
    #[default]
    Little,
    Big,
}

/// What the recorder does with a step whose register read failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegisterFailurePolicy {
    /// Append a trace entry without PC or registers; no snapshot.
    #[default]
    RecordPartial,
    /// Append nothing, but still count the step.
    Skip,
}

/// Debug stub connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    /// `host:port` of the remote debug stub.
    pub address: String,
    pub connect_timeout_ms: u64,
    pub read_timeout_ms: u64,
    pub register_byte_order: ByteOrder,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:1234".to_string(),
            connect_timeout_ms: 5_000,
            read_timeout_ms: 2_000,
            register_byte_order: ByteOrder::Little,
        }
    }
}

/// Optional out-of-band monitor channel of the virtual machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub address: String,
    pub timeout_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:55555".to_string(),
            timeout_ms: 2_000,
        }
    }
}

/// Loop bounds and failure policy of the recording loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingPolicy {
    pub max_instructions: u64,
    /// A snapshot is taken whenever `step % snapshot_interval == 0`.
    pub snapshot_interval: u64,
    /// Emit a progress log line every N steps.
    pub progress_interval: u64,
    /// Extra attempts for a single-step that fails at the transport level.
    pub step_retries: u32,
    pub register_failure_policy: RegisterFailurePolicy,
    /// Read the 4 instruction bytes at the PC on every step.
    pub capture_instruction_bytes: bool,
}

impl Default for RecordingPolicy {
    fn default() -> Self {
        Self {
            max_instructions: 100_000,
            snapshot_interval: 5_000,
            progress_interval: 1_000,
            step_retries: 1,
            register_failure_policy: RegisterFailurePolicy::RecordPartial,
            capture_instruction_bytes: true,
        }
    }
}

/// Complete recorder configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    pub schema_version: String,
    pub target: TargetConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub monitor: Option<MonitorConfig>,
    pub database: PathBuf,
    pub recording: RecordingPolicy,
    /// Ordered phase table; first match wins.
    pub phases: Vec<PhaseRange>,
    /// PC windows in which every step is snapshotted.
    pub always_snapshot: Vec<AddressRange>,
    pub regions: Vec<MemoryRegion>,
    pub symbols: Vec<Symbol>,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            schema_version: CONFIG_SCHEMA_VERSION.to_string(),
            target: TargetConfig::default(),
            monitor: None,
            database: PathBuf::from("memory_snapshots.db"),
            recording: RecordingPolicy::default(),
            phases: default_phase_table(),
            always_snapshot: Vec::new(),
            regions: default_regions(),
            symbols: default_symbols(),
        }
    }
}

impl RecorderConfig {
    /// Parse from JSON and validate.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: RecorderConfig = serde_json::from_str(json)?;
        config.check()?;
        Ok(config)
    }

    /// Load from a file with full error reporting.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                ConfigError::NotFound(path.to_path_buf())
            } else {
                ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                }
            }
        })?;
        Self::from_json(&content)
    }

    /// Fail on validation errors; warnings are left to the caller.
    pub fn check(&self) -> Result<(), ConfigError> {
        let result = validate(self);
        if result.errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(result.errors))
        }
    }

    pub fn symbol_table(&self) -> SymbolTable {
        SymbolTable::new(self.symbols.clone())
    }

    pub fn region(&self, name: &str) -> Option<&MemoryRegion> {
        self.regions.iter().find(|r| r.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        RecorderConfig::default().check().unwrap();
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config = RecorderConfig::from_json(
            r#"{"recording":{"max_instructions":20,"snapshot_interval":1000}}"#,
        )
        .unwrap();
        assert_eq!(config.recording.max_instructions, 20);
        assert_eq!(config.recording.step_retries, 1);
        assert_eq!(config.target.address, "127.0.0.1:1234");
        assert_eq!(config.regions.len(), 6);
    }

    #[test]
    fn policy_names_are_snake_case() {
        let config = RecorderConfig::from_json(
            r#"{"recording":{"register_failure_policy":"skip"},"target":{"register_byte_order":"big"}}"#,
        )
        .unwrap();
        assert_eq!(
            config.recording.register_failure_policy,
            RegisterFailurePolicy::Skip
        );
        assert_eq!(config.target.register_byte_order, ByteOrder::Big);
    }

    #[test]
    fn invalid_json_is_rejected_with_reason() {
        let err = RecorderConfig::from_json(r#"{"recording":{"snapshot_interval":0}}"#)
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
        assert!(err.to_string().contains("snapshot_interval"));
    }

    #[test]
    fn missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = RecorderConfig::load_from_file(&dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn round_trips_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("recorder.json");
        let config = RecorderConfig::default();
        std::fs::write(&path, serde_json::to_string_pretty(&config).unwrap()).unwrap();
        assert_eq!(RecorderConfig::load_from_file(&path).unwrap(), config);
    }

    #[test]
    fn converts_into_common_error_family() {
        let err = RecorderConfig::from_json(r#"{"regions":[{"name":"a","base":0,"size":0}]}"#)
            .unwrap_err();
        let common: st_common::Error = err.into();
        assert_eq!(common.code(), 12);
    }
}
