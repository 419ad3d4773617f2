//! steptrace configuration loading and validation.
//!
//! This crate provides:
//! - Typed Rust structs for the recorder configuration file
//! - The ordered phase table, named-region table and symbol table
//! - Config resolution (CLI → env → XDG → defaults)
//! - Semantic validation
//! - Config snapshots (content hash) for session metadata

pub mod address;
pub mod phases;
pub mod recorder;
pub mod regions;
pub mod resolve;
pub mod snapshot;
pub mod symbols;
pub mod validate;

pub use phases::{AddressRange, PhaseRange, UNKNOWN_PHASE};
pub use recorder::{
    ByteOrder, ConfigError, MonitorConfig, RecorderConfig, RecordingPolicy,
    RegisterFailurePolicy, TargetConfig,
};
pub use regions::MemoryRegion;
pub use resolve::{resolve_config, ConfigPaths, ConfigSource};
pub use snapshot::ConfigSnapshot;
pub use symbols::{Symbol, SymbolTable};
pub use validate::{validate, ValidationError, ValidationResult};

/// Schema version for configuration files.
pub const CONFIG_SCHEMA_VERSION: &str = "1.0.0";
