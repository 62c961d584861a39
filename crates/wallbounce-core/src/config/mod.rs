//! Configuration management for the wallbounce core.
//!
//! Supports three-layer configuration loading:
//! 1. Built-in defaults
//! 2. TOML config file
//! 3. Environment variable overrides (`WALLBOUNCE_` prefix)
//!
//! CLI flag overrides are applied by the binary crate after loading.

mod defaults;
mod env_overrides;
mod validation;

use defaults::*;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Top-level configuration for the analyzer.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Registered providers.
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,

    /// Dispatch timeouts and mode defaults.
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Consensus floors and escalation.
    #[serde(default)]
    pub consensus: ConsensusConfig,

    /// Session TTL and turn policy floors.
    #[serde(default)]
    pub session: SessionConfig,

    /// Approval workflow settings.
    #[serde(default)]
    pub approval: ApprovalConfig,

    /// Event bus settings.
    #[serde(default)]
    pub events: EventsConfig,

    /// Persistence backend for sessions.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            providers: Vec::new(),
            dispatch: DispatchConfig::default(),
            consensus: ConsensusConfig::default(),
            session: SessionConfig::default(),
            approval: ApprovalConfig::default(),
            events: EventsConfig::default(),
            storage: StorageConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// One provider entry in `[[providers]]`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProviderConfig {
    /// Stable provider id, unique across the config.
    pub id: String,

    /// Human-readable name. Defaults to the id.
    #[serde(default)]
    pub name: Option<String>,

    /// Backing vendor; rotation is computed over vendors.
    pub vendor: String,

    /// Quality tier, 1-5.
    #[serde(default = "default_provider_tier")]
    pub tier: u8,

    /// Capability names: coding, analysis, creative, aggregation.
    #[serde(default = "default_provider_capabilities")]
    pub capabilities: Vec<String>,

    /// Adapter kind: `subprocess`, `sdk`, or `mcp`.
    pub kind: String,

    /// Flat USD cost-per-token estimate for unknown vendors.
    #[serde(default)]
    pub cost_per_token: f64,

    /// Program to spawn (subprocess and mcp kinds).
    #[serde(default)]
    pub command: Option<String>,

    /// Argument vector for the spawned program.
    #[serde(default)]
    pub args: Vec<String>,

    /// Arguments for health probes (subprocess kind; default `--version`).
    #[serde(default)]
    pub health_args: Option<Vec<String>>,

    /// Output parsing for subprocess kind: `raw` or `json`.
    #[serde(default = "default_output_format")]
    pub output_format: String,

    /// Endpoint base URL (sdk kind).
    #[serde(default)]
    pub base_url: Option<String>,

    /// Model name (sdk kind).
    #[serde(default)]
    pub model: Option<String>,

    /// Secret store key holding the API key (sdk kind).
    #[serde(default)]
    pub api_key_secret: Option<String>,

    /// Completion tool name (mcp kind; default `generate`).
    #[serde(default)]
    pub completion_tool: Option<String>,
}

/// Dispatch timeouts and mode defaults.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DispatchConfig {
    /// Floor on successful adapter responses.
    #[serde(default = "default_min_providers")]
    pub min_providers: usize,

    /// Per-adapter deadline in milliseconds.
    #[serde(default = "default_per_adapter_timeout_ms")]
    pub per_adapter_timeout_ms: u64,

    /// Overall dispatch deadline in milliseconds.
    #[serde(default = "default_whole_dispatch_timeout_ms")]
    pub whole_dispatch_timeout_ms: u64,

    /// Per-tool-invocation deadline in milliseconds.
    #[serde(default = "default_tool_invocation_timeout_ms")]
    pub tool_invocation_timeout_ms: u64,

    /// Cancel still-running adapters once success is guaranteed.
    #[serde(default)]
    pub eager: bool,

    /// Default mode when a query does not specify one: `parallel` or
    /// `sequential`.
    #[serde(default = "default_mode")]
    pub default_mode: String,

    /// Default sequential chain depth, 1-5.
    #[serde(default = "default_depth")]
    pub default_depth: u32,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            min_providers: default_min_providers(),
            per_adapter_timeout_ms: default_per_adapter_timeout_ms(),
            whole_dispatch_timeout_ms: default_whole_dispatch_timeout_ms(),
            tool_invocation_timeout_ms: default_tool_invocation_timeout_ms(),
            eager: false,
            default_mode: default_mode(),
            default_depth: default_depth(),
        }
    }
}

/// Consensus floors and escalation.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConsensusConfig {
    /// Below this combined confidence the consensus is flagged.
    #[serde(default = "default_confidence_floor")]
    pub confidence_floor: f64,

    /// Below this agreement the consensus is flagged.
    #[serde(default = "default_consensus_floor")]
    pub consensus_floor: f64,

    /// Whether floors are enforced at all.
    #[serde(default = "default_require_consensus")]
    pub require_consensus: bool,

    /// Retry once with more providers on low consensus.
    #[serde(default)]
    pub auto_escalate: bool,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            confidence_floor: default_confidence_floor(),
            consensus_floor: default_consensus_floor(),
            require_consensus: default_require_consensus(),
            auto_escalate: false,
        }
    }
}

/// Session TTL and turn policy floors.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionConfig {
    /// KV TTL for sessions, in seconds.
    #[serde(default = "default_session_ttl_seconds")]
    pub ttl_seconds: u64,

    /// Most-recent turns included in the contextual prompt.
    #[serde(default = "default_context_window_turns")]
    pub context_window_turns: usize,

    /// Provider floor on turn 2.
    #[serde(default = "default_turn2_min_providers")]
    pub turn2_min_providers: usize,

    /// Provider floor on turn 3.
    #[serde(default = "default_turn3_min_providers")]
    pub turn3_min_providers: usize,

    /// Cap on the growing floor for turns 4 and beyond.
    #[serde(default = "default_turn_min_cap")]
    pub turn_min_cap: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: default_session_ttl_seconds(),
            context_window_turns: default_context_window_turns(),
            turn2_min_providers: default_turn2_min_providers(),
            turn3_min_providers: default_turn3_min_providers(),
            turn_min_cap: default_turn_min_cap(),
        }
    }
}

/// Approval workflow settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApprovalConfig {
    /// Whether low/medium-risk approvals may auto-resolve.
    #[serde(default)]
    pub auto_mode: bool,

    /// Wait before a pending approval expires, in milliseconds.
    #[serde(default = "default_approval_timeout_ms")]
    pub timeout_ms: u64,

    /// Default sandbox for tool calls: `read-only`, `isolated`, or
    /// `full-access`.
    #[serde(default = "default_sandbox_level")]
    pub sandbox_level_default: String,
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            auto_mode: false,
            timeout_ms: default_approval_timeout_ms(),
            sandbox_level_default: default_sandbox_level(),
        }
    }
}

/// Event bus settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EventsConfig {
    /// Per-subscriber buffer capacity.
    #[serde(default = "default_event_buffer_size")]
    pub buffer_size: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            buffer_size: default_event_buffer_size(),
        }
    }
}

/// Persistence backend for sessions.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// `memory` or `sqlite`.
    #[serde(default = "default_storage_backend")]
    pub backend: String,

    /// Database path for the sqlite backend.
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            db_path: default_db_path(),
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Default log level when RUST_LOG is not set.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file, then apply environment
    /// variable overrides.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
                path: path.to_string(),
            })?;
        let mut config: Config =
            toml::from_str(&contents).map_err(|source| ConfigError::ParseError { source })?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string (no env overrides).
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|source| ConfigError::ParseError { source })
    }
}

#[cfg(test)]
mod tests;
