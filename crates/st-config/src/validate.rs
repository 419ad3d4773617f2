//! Semantic validation of a recorder configuration.

use std::collections::HashSet;

use thiserror::Error;

use crate::phases::UNKNOWN_PHASE;
use crate::recorder::RecorderConfig;

/// A configuration problem that prevents recording.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("phase '{name}' has an empty range")]
    EmptyPhaseRange { name: String },

    #[error("phase at index {index} has an empty name")]
    EmptyPhaseName { index: usize },

    #[error("phase name 'unknown' is reserved")]
    ReservedPhaseName,

    #[error("region '{name}' has zero size")]
    EmptyRegion { name: String },

    #[error("region '{name}' is defined more than once")]
    DuplicateRegion { name: String },

    #[error("always_snapshot range at index {index} is empty")]
    EmptyAlwaysRange { index: usize },

    #[error("recording.{field} must be greater than zero")]
    ZeroLimit { field: &'static str },

    #[error("unsupported config schema version: {0}")]
    UnsupportedVersion(String),
}

impl ValidationError {
    pub fn is_phase_table(&self) -> bool {
        matches!(
            self,
            ValidationError::EmptyPhaseRange { .. }
                | ValidationError::EmptyPhaseName { .. }
                | ValidationError::ReservedPhaseName
        )
    }

    pub fn is_region_table(&self) -> bool {
        matches!(
            self,
            ValidationError::EmptyRegion { .. } | ValidationError::DuplicateRegion { .. }
        )
    }
}

/// Outcome of [`validate`].
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub errors: Vec<ValidationError>,
    /// Legal but suspicious settings, e.g. overlapping phase ranges.
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Check a configuration for errors and warnings.
pub fn validate(config: &RecorderConfig) -> ValidationResult {
    let mut result = ValidationResult::default();

    if !st_common::schema::is_compatible(&config.schema_version) {
        result
            .errors
            .push(ValidationError::UnsupportedVersion(config.schema_version.clone()));
    }

    for (index, phase) in config.phases.iter().enumerate() {
        if phase.name.trim().is_empty() {
            result.errors.push(ValidationError::EmptyPhaseName { index });
        } else if phase.name == UNKNOWN_PHASE {
            result.errors.push(ValidationError::ReservedPhaseName);
        }
        if phase.start >= phase.end {
            result.errors.push(ValidationError::EmptyPhaseRange {
                name: phase.name.clone(),
            });
        }
    }

    // Overlap is allowed: lookup is first-match, so the earlier entry shadows.
    for (i, earlier) in config.phases.iter().enumerate() {
        for later in &config.phases[i + 1..] {
            if earlier.overlaps(later) {
                result.warnings.push(format!(
                    "phase '{}' overlaps earlier phase '{}'; '{}' wins inside [0x{:08x}, 0x{:08x})",
                    later.name,
                    earlier.name,
                    earlier.name,
                    earlier.start.max(later.start),
                    earlier.end.min(later.end),
                ));
            }
        }
    }

    let mut seen = HashSet::new();
    for region in &config.regions {
        if region.size == 0 {
            result.errors.push(ValidationError::EmptyRegion {
                name: region.name.clone(),
            });
        }
        if !seen.insert(region.name.as_str()) {
            result.errors.push(ValidationError::DuplicateRegion {
                name: region.name.clone(),
            });
        }
    }

    for (index, range) in config.always_snapshot.iter().enumerate() {
        if range.start >= range.end {
            result
                .errors
                .push(ValidationError::EmptyAlwaysRange { index });
        }
    }

    if config.recording.max_instructions == 0 {
        result.errors.push(ValidationError::ZeroLimit {
            field: "max_instructions",
        });
    }
    if config.recording.snapshot_interval == 0 {
        result.errors.push(ValidationError::ZeroLimit {
            field: "snapshot_interval",
        });
    }

    result
}
