//! Error types for the wallbounce core library.
//!
//! Each module has its own error enum to provide clear error boundaries.
//! The library uses `thiserror` for structured, typed errors. Adapters
//! translate backend failures into [`ProviderError`] with a stable reason
//! code; only the orchestrator formats user-visible messages.

/// Errors related to configuration loading, parsing, and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required configuration field is absent.
    #[error("missing required config field: {field}")]
    MissingField {
        /// The name of the missing field.
        field: String,
    },

    /// A configuration field has an unacceptable value.
    #[error("invalid value for config field '{field}': {message}")]
    InvalidValue {
        /// The name of the invalid field.
        field: String,
        /// A description of why the value is invalid.
        message: String,
    },

    /// The configuration file does not exist at the specified path.
    #[error("config file not found: {path}")]
    FileNotFound {
        /// The path that was searched.
        path: String,
    },

    /// TOML deserialization failed.
    #[error("failed to parse config file: {source}")]
    ParseError {
        /// The underlying TOML parse error.
        #[source]
        source: toml::de::Error,
    },
}

/// Errors from the key-value store implementations.
#[derive(Debug, thiserror::Error)]
pub enum KvError {
    /// Failed to open or connect to the backing store.
    #[error("kv store connection error: {source}")]
    Connection {
        /// The underlying SQLx error.
        #[source]
        source: sqlx::Error,
    },

    /// Schema migration failed.
    #[error("kv store migration error: {source}")]
    Migration {
        /// The underlying migration error.
        #[source]
        source: sqlx::migrate::MigrateError,
    },

    /// A store query failed.
    #[error("kv store query error: {source}")]
    Query {
        /// The underlying SQLx error.
        #[source]
        source: sqlx::Error,
    },
}

/// Errors from a single provider adapter invocation.
///
/// Every adapter translates its backend's failures into one of these
/// variants; messages are redacted before they leave the adapter.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// The adapter did not produce a response within its deadline.
    #[error("provider timed out after {seconds}s")]
    Timeout {
        /// The deadline that was exceeded, in seconds.
        seconds: u64,
    },

    /// A subprocess adapter could not spawn its child process.
    #[error("failed to spawn provider process: {message}")]
    Spawn {
        /// Details of the spawn failure.
        message: String,
    },

    /// A subprocess adapter's child exited with a nonzero status.
    #[error("provider process exited with status {code}: {stderr}")]
    NonZeroExit {
        /// The child's exit code (-1 when killed by a signal).
        code: i32,
        /// Captured (redacted) standard error output.
        stderr: String,
    },

    /// The adapter's output could not be parsed.
    #[error("failed to parse provider output: {0}")]
    Parse(String),

    /// HTTP request to an SDK backend failed.
    #[error("provider HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// An SDK backend returned an error response.
    #[error("provider API error (status {status}): {message}")]
    Api {
        /// The HTTP status code.
        status: u16,
        /// The (redacted) error message from the API.
        message: String,
    },

    /// The backend rate limited the request.
    #[error("provider rate limited, retry after {retry_after_secs} seconds")]
    RateLimited {
        /// Seconds to wait before retrying.
        retry_after_secs: u64,
    },

    /// Connecting to an MCP server failed.
    #[error("MCP connection error: {0}")]
    Connection(String),

    /// An MCP protocol exchange failed.
    #[error("MCP protocol error: {0}")]
    Protocol(String),

    /// A required tool invocation was denied or expired in approval.
    #[error("tool invocation '{tool_name}' was not approved")]
    ApprovalDenied {
        /// The tool whose approval was denied.
        tool_name: String,
    },

    /// A credential named in the provider config is absent from the secret store.
    #[error("missing credential '{secret}' in secret store")]
    MissingCredential {
        /// The secret store key that was looked up.
        secret: String,
    },

    /// The invocation was canceled by the caller.
    #[error("provider invocation canceled")]
    Canceled,
}

impl ProviderError {
    /// Stable reason code for this error, carried on errored votes.
    pub fn reason_code(&self) -> &'static str {
        match self {
            ProviderError::Timeout { .. } => "timeout",
            ProviderError::Spawn { .. } => "spawn",
            ProviderError::NonZeroExit { .. } => "nonzero_exit",
            ProviderError::Parse(_) => "parse",
            ProviderError::Http(_) => "http",
            ProviderError::Api { .. } => "api",
            ProviderError::RateLimited { .. } => "rate_limited",
            ProviderError::Connection(_) => "connection",
            ProviderError::Protocol(_) => "protocol",
            ProviderError::ApprovalDenied { .. } => "approval_denied",
            ProviderError::MissingCredential { .. } => "missing_credential",
            ProviderError::Canceled => "canceled",
        }
    }

    /// Whether retrying the same adapter could plausibly succeed.
    ///
    /// Approval denials require operator action and cancellations are
    /// terminal, so neither is retryable.
    pub fn retryable(&self) -> bool {
        !matches!(
            self,
            ProviderError::ApprovalDenied { .. }
                | ProviderError::MissingCredential { .. }
                | ProviderError::Canceled
        )
    }
}

/// Errors from provider registry construction and selection.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// Two providers were registered under the same id.
    #[error("duplicate provider id: {id}")]
    DuplicateProvider {
        /// The conflicting provider id.
        id: String,
    },

    /// A provider id was requested that is not registered.
    #[error("unknown provider id: {id}")]
    UnknownProvider {
        /// The id that was looked up.
        id: String,
    },

    /// Not enough eligible providers exist to satisfy the selection policy.
    #[error("no eligible providers for {task_type} task: need {required}, have {available}")]
    NoEligibleProviders {
        /// The task type being selected for.
        task_type: String,
        /// How many providers the policy requires.
        required: usize,
        /// How many eligible providers exist.
        available: usize,
    },
}

/// Errors from the approval workflow.
#[derive(Debug, thiserror::Error)]
pub enum ApprovalError {
    /// No approval request exists with the given id.
    #[error("approval request not found: {request_id}")]
    NotFound {
        /// The id that was looked up.
        request_id: String,
    },

    /// A resolution conflicts with a terminal state already reached.
    #[error("invalid approval transition for {request_id}: {from} -> {to}")]
    InvalidTransition {
        /// The request id.
        request_id: String,
        /// The state the request is in.
        from: String,
        /// The state the caller tried to move it to.
        to: String,
    },
}

/// A single adapter failure within a dispatch, for error reporting.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ProviderFailure {
    /// Which provider failed.
    pub provider_id: String,
    /// Stable reason code (see [`ProviderError::reason_code`]).
    pub reason_code: String,
    /// Redacted human-readable message.
    pub message: String,
}

/// Errors from the dispatcher.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// Fewer adapters succeeded than the configured minimum.
    #[error("insufficient providers: {successful} succeeded, {required} required")]
    InsufficientProviders {
        /// How many adapters produced a usable response.
        successful: usize,
        /// The configured minimum.
        required: usize,
        /// Per-adapter failure details.
        failures: Vec<ProviderFailure>,
    },

    /// The dispatch was canceled by the caller.
    #[error("dispatch canceled")]
    Canceled,
}

/// Errors from the consensus engine.
#[derive(Debug, thiserror::Error)]
pub enum ConsensusError {
    /// Not enough successful votes to compute a consensus.
    #[error("not enough votes for consensus: got {got}, required {required}")]
    NotEnoughVotes {
        /// Successful votes available.
        got: usize,
        /// The configured minimum.
        required: usize,
    },
}

/// Errors from session management.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// No session exists with the given id.
    #[error("session not found: {session_id}")]
    NotFound {
        /// The id that was looked up.
        session_id: String,
    },

    /// The backing KV store failed.
    #[error("session storage error: {0}")]
    Storage(#[from] KvError),

    /// A stored session document could not be (de)serialized.
    #[error("session serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors assembling an orchestrator from configuration.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// The configuration failed validation.
    #[error("invalid configuration: {}", .0.iter().map(ToString::to_string).collect::<Vec<_>>().join("; "))]
    Config(Vec<ConfigError>),

    /// A provider adapter could not be constructed or connected.
    #[error("failed to build provider '{id}': {source}")]
    Provider {
        /// The provider id from the configuration.
        id: String,
        /// The underlying adapter error.
        #[source]
        source: ProviderError,
    },

    /// The provider registry rejected the configured set.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// The KV store backend could not be opened.
    #[error(transparent)]
    Kv(#[from] KvError),
}

/// Top-level failure taxonomy returned by the orchestrator.
///
/// Lower layers deal only in the typed errors above; the orchestrator maps
/// aggregated failures into this taxonomy and formats user-visible messages
/// via [`AnalysisError::report`].
#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    /// The query was empty or an option was out of range.
    #[error("invalid input: {message}")]
    InvalidInput {
        /// What was wrong with the input.
        message: String,
    },

    /// Fewer providers succeeded than the analysis required.
    #[error("insufficient providers: {successful} succeeded, {required} required")]
    InsufficientProviders {
        /// How many adapters produced a usable response.
        successful: usize,
        /// The configured minimum.
        required: usize,
        /// Per-adapter failure details.
        failures: Vec<ProviderFailure>,
    },

    /// A required tool invocation was not approved.
    #[error("approval denied for tool '{tool_name}'")]
    ApprovalDenied {
        /// The tool whose approval was denied.
        tool_name: String,
    },

    /// The caller canceled the analysis.
    #[error("analysis canceled")]
    Canceled,

    /// An unexpected defect. The correlation id links to logs.
    #[error("internal error (correlation id {correlation_id})")]
    Internal {
        /// Correlation id recorded in the logs alongside the defect.
        correlation_id: String,
        /// Redacted description, for logs only.
        message: String,
    },
}

/// Structured, display-safe failure description.
///
/// `message` is safe to show to an end user; `details` names which
/// providers errored and why. Stack traces are never included.
#[derive(Debug, Clone, serde::Serialize)]
pub struct FailureReport {
    /// Stable failure kind from the error taxonomy.
    pub kind: String,
    /// Display-safe message.
    pub message: String,
    /// Per-provider failure details, when applicable.
    pub details: Vec<ProviderFailure>,
}

impl AnalysisError {
    /// Stable kind string from the error taxonomy.
    pub fn kind(&self) -> &'static str {
        match self {
            AnalysisError::InvalidInput { .. } => "invalid_input",
            AnalysisError::InsufficientProviders { .. } => "insufficient_providers",
            AnalysisError::ApprovalDenied { .. } => "approval_denied",
            AnalysisError::Canceled => "canceled",
            AnalysisError::Internal { .. } => "internal",
        }
    }

    /// Whether every underlying failure was an adapter timeout.
    pub fn all_timeouts(&self) -> bool {
        match self {
            AnalysisError::InsufficientProviders { failures, .. } => {
                !failures.is_empty() && failures.iter().all(|f| f.reason_code == "timeout")
            }
            _ => false,
        }
    }

    /// Build the user-visible failure report.
    pub fn report(&self) -> FailureReport {
        let details = match self {
            AnalysisError::InsufficientProviders { failures, .. } => failures.clone(),
            _ => Vec::new(),
        };
        let message = match self {
            AnalysisError::Internal { correlation_id, .. } => {
                format!("an internal error occurred (correlation id {correlation_id})")
            }
            other => other.to_string(),
        };
        FailureReport {
            kind: self.kind().to_string(),
            message,
            details,
        }
    }
}

impl From<DispatchError> for AnalysisError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::InsufficientProviders {
                successful,
                required,
                failures,
            } => AnalysisError::InsufficientProviders {
                successful,
                required,
                failures,
            },
            DispatchError::Canceled => AnalysisError::Canceled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_missing_field_message() {
        let err = ConfigError::MissingField {
            field: "dispatch.min_providers".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "missing required config field: dispatch.min_providers"
        );
    }

    #[test]
    fn config_error_invalid_value_message() {
        let err = ConfigError::InvalidValue {
            field: "providers.kind".to_string(),
            message: "must be subprocess, sdk, or mcp".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "invalid value for config field 'providers.kind': must be subprocess, sdk, or mcp"
        );
    }

    #[test]
    fn provider_error_timeout_message_and_code() {
        let err = ProviderError::Timeout { seconds: 30 };
        assert_eq!(err.to_string(), "provider timed out after 30s");
        assert_eq!(err.reason_code(), "timeout");
        assert!(err.retryable());
    }

    #[test]
    fn provider_error_approval_denied_not_retryable() {
        let err = ProviderError::ApprovalDenied {
            tool_name: "deploy_service".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "tool invocation 'deploy_service' was not approved"
        );
        assert_eq!(err.reason_code(), "approval_denied");
        assert!(!err.retryable());
    }

    #[test]
    fn approval_error_invalid_transition_message() {
        let err = ApprovalError::InvalidTransition {
            request_id: "req-1".to_string(),
            from: "approved".to_string(),
            to: "denied".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "invalid approval transition for req-1: approved -> denied"
        );
    }

    #[test]
    fn analysis_error_kind_mapping() {
        assert_eq!(
            AnalysisError::InvalidInput {
                message: "empty query".into()
            }
            .kind(),
            "invalid_input"
        );
        assert_eq!(AnalysisError::Canceled.kind(), "canceled");
    }

    #[test]
    fn analysis_error_all_timeouts_detection() {
        let err = AnalysisError::InsufficientProviders {
            successful: 0,
            required: 2,
            failures: vec![
                ProviderFailure {
                    provider_id: "a".into(),
                    reason_code: "timeout".into(),
                    message: "provider timed out after 30s".into(),
                },
                ProviderFailure {
                    provider_id: "b".into(),
                    reason_code: "timeout".into(),
                    message: "provider timed out after 30s".into(),
                },
            ],
        };
        assert!(err.all_timeouts());

        let mixed = AnalysisError::InsufficientProviders {
            successful: 1,
            required: 2,
            failures: vec![ProviderFailure {
                provider_id: "a".into(),
                reason_code: "parse".into(),
                message: "bad output".into(),
            }],
        };
        assert!(!mixed.all_timeouts());
    }

    #[test]
    fn internal_report_hides_detail() {
        let err = AnalysisError::Internal {
            correlation_id: "c0ffee".into(),
            message: "lock poisoned".into(),
        };
        let report = err.report();
        assert_eq!(report.kind, "internal");
        assert!(report.message.contains("c0ffee"));
        assert!(!report.message.contains("lock poisoned"));
    }
}
