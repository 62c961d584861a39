//! Environment variable overrides for configuration.

use std::env;

use super::Config;
use crate::error::ConfigError;

impl Config {
    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables use the `WALLBOUNCE_` prefix with double
    /// underscores separating nested keys (e.g.
    /// `WALLBOUNCE_DISPATCH__MIN_PROVIDERS`).
    pub(super) fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        // Dispatch
        if let Ok(val) = env::var("WALLBOUNCE_DISPATCH__MIN_PROVIDERS") {
            self.dispatch.min_providers =
                parse_env_usize("WALLBOUNCE_DISPATCH__MIN_PROVIDERS", &val)?;
        }
        if let Ok(val) = env::var("WALLBOUNCE_DISPATCH__PER_ADAPTER_TIMEOUT_MS") {
            self.dispatch.per_adapter_timeout_ms =
                parse_env_u64("WALLBOUNCE_DISPATCH__PER_ADAPTER_TIMEOUT_MS", &val)?;
        }
        if let Ok(val) = env::var("WALLBOUNCE_DISPATCH__WHOLE_DISPATCH_TIMEOUT_MS") {
            self.dispatch.whole_dispatch_timeout_ms =
                parse_env_u64("WALLBOUNCE_DISPATCH__WHOLE_DISPATCH_TIMEOUT_MS", &val)?;
        }
        if let Ok(val) = env::var("WALLBOUNCE_DISPATCH__EAGER") {
            self.dispatch.eager = parse_env_bool("WALLBOUNCE_DISPATCH__EAGER", &val)?;
        }

        // Consensus
        if let Ok(val) = env::var("WALLBOUNCE_CONSENSUS__CONFIDENCE_FLOOR") {
            self.consensus.confidence_floor =
                parse_env_f64("WALLBOUNCE_CONSENSUS__CONFIDENCE_FLOOR", &val)?;
        }
        if let Ok(val) = env::var("WALLBOUNCE_CONSENSUS__CONSENSUS_FLOOR") {
            self.consensus.consensus_floor =
                parse_env_f64("WALLBOUNCE_CONSENSUS__CONSENSUS_FLOOR", &val)?;
        }
        if let Ok(val) = env::var("WALLBOUNCE_CONSENSUS__AUTO_ESCALATE") {
            self.consensus.auto_escalate =
                parse_env_bool("WALLBOUNCE_CONSENSUS__AUTO_ESCALATE", &val)?;
        }

        // Session
        if let Ok(val) = env::var("WALLBOUNCE_SESSION__TTL_SECONDS") {
            self.session.ttl_seconds = parse_env_u64("WALLBOUNCE_SESSION__TTL_SECONDS", &val)?;
        }

        // Approval
        if let Ok(val) = env::var("WALLBOUNCE_APPROVAL__AUTO_MODE") {
            self.approval.auto_mode = parse_env_bool("WALLBOUNCE_APPROVAL__AUTO_MODE", &val)?;
        }
        if let Ok(val) = env::var("WALLBOUNCE_APPROVAL__TIMEOUT_MS") {
            self.approval.timeout_ms = parse_env_u64("WALLBOUNCE_APPROVAL__TIMEOUT_MS", &val)?;
        }

        // Events
        if let Ok(val) = env::var("WALLBOUNCE_EVENTS__BUFFER_SIZE") {
            self.events.buffer_size = parse_env_usize("WALLBOUNCE_EVENTS__BUFFER_SIZE", &val)?;
        }

        // Storage
        if let Ok(val) = env::var("WALLBOUNCE_STORAGE__BACKEND") {
            self.storage.backend = val;
        }
        if let Ok(val) = env::var("WALLBOUNCE_STORAGE__DB_PATH") {
            self.storage.db_path = val;
        }

        // Logging
        if let Ok(val) = env::var("WALLBOUNCE_LOGGING__LEVEL") {
            self.logging.level = val;
        }

        Ok(())
    }
}

fn parse_env_u64(name: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        field: name.to_string(),
        message: format!("'{value}' is not a valid integer"),
    })
}

fn parse_env_usize(name: &str, value: &str) -> Result<usize, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        field: name.to_string(),
        message: format!("'{value}' is not a valid integer"),
    })
}

fn parse_env_f64(name: &str, value: &str) -> Result<f64, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        field: name.to_string(),
        message: format!("'{value}' is not a valid number"),
    })
}

fn parse_env_bool(name: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            field: name.to_string(),
            message: format!("'{value}' is not a valid boolean"),
        }),
    }
}
