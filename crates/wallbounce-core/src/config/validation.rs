//! Configuration validation logic.

use std::collections::HashSet;

use super::Config;
use crate::approval::SandboxLevel;
use crate::dispatch::DispatchMode;
use crate::error::ConfigError;

const PROVIDER_KINDS: [&str; 3] = ["subprocess", "sdk", "mcp"];
const CAPABILITY_NAMES: [&str; 4] = ["coding", "analysis", "creative", "aggregation"];
const OUTPUT_FORMATS: [&str; 2] = ["raw", "json"];
const STORAGE_BACKENDS: [&str; 2] = ["memory", "sqlite"];

impl Config {
    /// Validate the configuration, returning all errors found (not just
    /// the first).
    pub fn validate(&self) -> Result<(), Vec<ConfigError>> {
        let mut errors = Vec::new();

        // Dispatch
        if self.dispatch.min_providers < 2 {
            errors.push(ConfigError::InvalidValue {
                field: "dispatch.min_providers".to_string(),
                message: "must be at least 2".to_string(),
            });
        }
        if DispatchMode::parse(&self.dispatch.default_mode).is_none() {
            errors.push(ConfigError::InvalidValue {
                field: "dispatch.default_mode".to_string(),
                message: "must be parallel or sequential".to_string(),
            });
        }
        if !(1..=5).contains(&self.dispatch.default_depth) {
            errors.push(ConfigError::InvalidValue {
                field: "dispatch.default_depth".to_string(),
                message: "must be between 1 and 5".to_string(),
            });
        }
        if self.dispatch.per_adapter_timeout_ms == 0 {
            errors.push(ConfigError::InvalidValue {
                field: "dispatch.per_adapter_timeout_ms".to_string(),
                message: "must be greater than 0".to_string(),
            });
        }

        // Consensus floors
        for (field, value) in [
            ("consensus.confidence_floor", self.consensus.confidence_floor),
            ("consensus.consensus_floor", self.consensus.consensus_floor),
        ] {
            if !(0.0..=1.0).contains(&value) {
                errors.push(ConfigError::InvalidValue {
                    field: field.to_string(),
                    message: "must be between 0 and 1".to_string(),
                });
            }
        }

        // Approval
        if SandboxLevel::parse(&self.approval.sandbox_level_default).is_none() {
            errors.push(ConfigError::InvalidValue {
                field: "approval.sandbox_level_default".to_string(),
                message: "must be read-only, isolated, or full-access".to_string(),
            });
        }

        // Events
        if self.events.buffer_size == 0 {
            errors.push(ConfigError::InvalidValue {
                field: "events.buffer_size".to_string(),
                message: "must be greater than 0".to_string(),
            });
        }

        // Storage
        if !STORAGE_BACKENDS.contains(&self.storage.backend.as_str()) {
            errors.push(ConfigError::InvalidValue {
                field: "storage.backend".to_string(),
                message: "must be memory or sqlite".to_string(),
            });
        } else if self.storage.backend == "sqlite" && self.storage.db_path.is_empty() {
            errors.push(ConfigError::MissingField {
                field: "storage.db_path".to_string(),
            });
        }

        // Providers
        if self.providers.len() < 2 {
            errors.push(ConfigError::MissingField {
                field: "providers (at least two are required)".to_string(),
            });
        }

        let mut seen_ids = HashSet::new();
        for provider in &self.providers {
            let prefix = format!("providers.{}", provider.id);

            if provider.id.is_empty() {
                errors.push(ConfigError::MissingField {
                    field: "providers.id".to_string(),
                });
            } else if !seen_ids.insert(provider.id.clone()) {
                errors.push(ConfigError::InvalidValue {
                    field: format!("{prefix}.id"),
                    message: "duplicate provider id".to_string(),
                });
            }

            if provider.vendor.is_empty() {
                errors.push(ConfigError::MissingField {
                    field: format!("{prefix}.vendor"),
                });
            }
            if !(1..=5).contains(&provider.tier) {
                errors.push(ConfigError::InvalidValue {
                    field: format!("{prefix}.tier"),
                    message: "must be between 1 and 5".to_string(),
                });
            }
            for capability in &provider.capabilities {
                if !CAPABILITY_NAMES.contains(&capability.as_str()) {
                    errors.push(ConfigError::InvalidValue {
                        field: format!("{prefix}.capabilities"),
                        message: format!(
                            "unknown capability '{capability}', expected one of coding, analysis, creative, aggregation"
                        ),
                    });
                }
            }

            match provider.kind.as_str() {
                "subprocess" => {
                    if provider.command.is_none() {
                        errors.push(ConfigError::MissingField {
                            field: format!("{prefix}.command"),
                        });
                    }
                    if !OUTPUT_FORMATS.contains(&provider.output_format.as_str()) {
                        errors.push(ConfigError::InvalidValue {
                            field: format!("{prefix}.output_format"),
                            message: "must be raw or json".to_string(),
                        });
                    }
                }
                "sdk" => {
                    for (field, value) in [
                        ("base_url", &provider.base_url),
                        ("model", &provider.model),
                        ("api_key_secret", &provider.api_key_secret),
                    ] {
                        if value.is_none() {
                            errors.push(ConfigError::MissingField {
                                field: format!("{prefix}.{field}"),
                            });
                        }
                    }
                }
                "mcp" => {
                    if provider.command.is_none() {
                        errors.push(ConfigError::MissingField {
                            field: format!("{prefix}.command"),
                        });
                    }
                }
                _ => {
                    errors.push(ConfigError::InvalidValue {
                        field: format!("{prefix}.kind"),
                        message: format!(
                            "unknown kind '{}', expected one of {}",
                            provider.kind,
                            PROVIDER_KINDS.join(", ")
                        ),
                    });
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
