//! Content hash of the effective configuration.
//!
//! Stored on every session row so analysis can tell which phase and region
//! tables produced a recording.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::recorder::RecorderConfig;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigSnapshot {
    /// SHA-256 over the canonical JSON of the configuration.
    pub config_hash: String,
    pub schema_version: String,
    /// ISO-8601 timestamp of when the snapshot was taken.
    pub captured_at: String,
}

impl ConfigSnapshot {
    pub fn capture(config: &RecorderConfig) -> Result<Self, serde_json::Error> {
        Ok(Self {
            config_hash: config_hash(config)?,
            schema_version: config.schema_version.clone(),
            captured_at: chrono::Utc::now().to_rfc3339(),
        })
    }
}

/// Hash of the configuration's serialized form.
pub fn config_hash(config: &RecorderConfig) -> Result<String, serde_json::Error> {
    // Round-trip through Value so map keys come out sorted.
    let value = serde_json::to_value(config)?;
    let canonical = serde_json::to_string(&value)?;
    Ok(hex::encode(Sha256::digest(canonical.as_bytes())))
}
