//! Tracing subscriber setup.
//!
//! Logs go to stderr so that stdout carries only JSON command output.
//! `RUST_LOG` overrides the default filter.

use clap::ValueEnum;
use tracing_subscriber::EnvFilter;

/// Default filter when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "steptrace=info,st_core=info,st_store=info";

/// Log line format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Text,
    /// One JSON object per event
    Json,
}

/// Filter for the given verbosity: 0 keeps the default, 1 enables debug,
/// 2 and above enable trace for the recorder crates.
pub fn filter_for(verbosity: u8) -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }
    let directives = match verbosity {
        0 => DEFAULT_FILTER.to_string(),
        1 => DEFAULT_FILTER.replace("=info", "=debug"),
        _ => DEFAULT_FILTER.replace("=info", "=trace"),
    };
    EnvFilter::new(directives)
}

/// Install the global subscriber. A second call is a no-op.
pub fn init_logging(format: LogFormat, verbosity: u8) {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter_for(verbosity))
        .with_writer(std::io::stderr)
        .with_target(true);
    let _ = match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_raises_levels() {
        assert_eq!(
            DEFAULT_FILTER.replace("=info", "=debug"),
            "steptrace=debug,st_core=debug,st_store=debug"
        );
    }

    #[test]
    fn init_twice_is_harmless() {
        init_logging(LogFormat::Text, 0);
        init_logging(LogFormat::Json, 1);
    }
}
