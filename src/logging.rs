//! Structured logging initialization
//!
//! The hub itself logs through `tracing`; this module wires the
//! subscriber from config so embedding binaries get consistent output:
//! a global level, per-module overrides, and optional JSON formatting.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing_subscriber::{fmt, EnvFilter};

use crate::error::{Error, Result};

/// Subscriber configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Global log level (trace, debug, info, warn, error)
    pub level: String,
    /// Module-specific overrides, e.g. `pulsehub::broker` -> `debug`
    pub module_levels: HashMap<String, String>,
    /// Emit JSON-formatted lines instead of human-readable ones
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        let mut module_levels = HashMap::new();
        module_levels.insert("pulsehub::broker".to_string(), "info".to_string());
        module_levels.insert("pulsehub::alerting".to_string(), "info".to_string());
        module_levels.insert("reqwest".to_string(), "warn".to_string());

        Self {
            level: "info".to_string(),
            module_levels,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    fn build_filter(&self) -> Result<EnvFilter> {
        let mut directives = self.level.clone();
        for (module, level) in &self.module_levels {
            directives.push_str(&format!(",{}={}", module, level));
        }
        directives
            .parse::<EnvFilter>()
            .map_err(|e| Error::Config(format!("invalid log filter '{}': {}", directives, e)))
    }
}

/// Install the global subscriber. Call once at process start; a second
/// call returns an error from the subscriber registry.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = config.build_filter()?;

    let result = if config.json_format {
        fmt()
            .with_env_filter(filter)
            .json()
            .with_current_span(false)
            .try_init()
    } else {
        fmt().with_env_filter(filter).try_init()
    };

    result.map_err(|e| Error::Config(format!("failed to install subscriber: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_includes_module_overrides() {
        let config = LoggingConfig::default();
        assert!(config.build_filter().is_ok());
    }

    #[test]
    fn test_bad_module_level_rejected() {
        let mut module_levels = HashMap::new();
        module_levels.insert("pulsehub::broker".to_string(), "shouting".to_string());
        let config = LoggingConfig {
            level: "info".to_string(),
            module_levels,
            json_format: false,
        };
        assert!(config.build_filter().is_err());
    }
}
