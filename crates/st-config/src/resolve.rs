//! Config file resolution: CLI → env → XDG → defaults.

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::recorder::{ConfigError, RecorderConfig};

/// Environment variable naming a config file.
pub const CONFIG_ENV_VAR: &str = "STEPTRACE_CONFIG";

/// File name looked up under the user config directory.
pub const CONFIG_FILE_NAME: &str = "recorder.json";

/// Candidate locations, highest priority first.
#[derive(Debug, Clone, Default)]
pub struct ConfigPaths {
    pub explicit: Option<PathBuf>,
    pub env: Option<PathBuf>,
    pub user: Option<PathBuf>,
}

impl ConfigPaths {
    /// Fill in env and XDG candidates around an optional CLI path.
    pub fn discover(explicit: Option<PathBuf>) -> Self {
        Self {
            explicit,
            env: std::env::var_os(CONFIG_ENV_VAR)
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
            user: dirs::config_dir().map(|d| d.join("steptrace").join(CONFIG_FILE_NAME)),
        }
    }
}

/// Where the effective configuration came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "path", rename_all = "snake_case")]
pub enum ConfigSource {
    Explicit(PathBuf),
    Environment(PathBuf),
    User(PathBuf),
    Defaults,
}

impl ConfigSource {
    pub fn path(&self) -> Option<&Path> {
        match self {
            ConfigSource::Explicit(p) | ConfigSource::Environment(p) | ConfigSource::User(p) => {
                Some(p)
            }
            ConfigSource::Defaults => None,
        }
    }
}

/// Load the highest-priority configuration.
///
/// A path given on the command line or in the environment must exist; the
/// per-user file is optional and falls back to the built-in defaults.
pub fn resolve_config(paths: &ConfigPaths) -> Result<(RecorderConfig, ConfigSource), ConfigError> {
    if let Some(path) = &paths.explicit {
        let config = RecorderConfig::load_from_file(path)?;
        return Ok((config, ConfigSource::Explicit(path.clone())));
    }
    if let Some(path) = &paths.env {
        let config = RecorderConfig::load_from_file(path)?;
        return Ok((config, ConfigSource::Environment(path.clone())));
    }
    if let Some(path) = &paths.user {
        match RecorderConfig::load_from_file(path) {
            Ok(config) => return Ok((config, ConfigSource::User(path.clone()))),
            Err(ConfigError::NotFound(_)) => {}
            Err(err) => return Err(err),
        }
    }
    let config = RecorderConfig::default();
    config.check()?;
    Ok((config, ConfigSource::Defaults))
}
