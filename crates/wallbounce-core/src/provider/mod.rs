//! Provider abstraction and the three adapter implementations.
//!
//! Every backend (vendor CLI subprocess, in-process SDK, or MCP server)
//! conforms to the [`Provider`] trait: `invoke`, `describe`, and
//! `health_check`. Adapters are stateless across calls; per-session state
//! lives in the session manager. Adapters return a raw [`ProviderOutput`];
//! the dispatcher turns it into a [`ProviderResponse`], imposing the
//! default confidence heuristic and cost estimate where the backend
//! reported none.
//!
//! Submodules:
//! - [`registry`]: immutable provider registry and task-type selection.
//! - [`confidence`]: default confidence heuristic.
//! - [`pricing`]: per-vendor cost estimation.

pub mod confidence;
pub mod pricing;
pub mod registry;

mod mcp;
mod sdk;
mod subprocess;

pub use mcp::McpProvider;
pub use sdk::{SdkProvider, SecretStore, StaticSecretStore};
pub use subprocess::{OutputFormat, SubprocessProvider};

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::approval::{ApprovalManager, SandboxLevel};
use crate::error::ProviderError;
use crate::events::AnalysisEvents;
use crate::safety::redact_secrets;

/// Requested quality/cost tier of an analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    #[default]
    Basic,
    Premium,
    Critical,
}

impl TaskType {
    /// Stable wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            TaskType::Basic => "basic",
            TaskType::Premium => "premium",
            TaskType::Critical => "critical",
        }
    }

    /// Parse from the wire name.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "basic" => Some(TaskType::Basic),
            "premium" => Some(TaskType::Premium),
            "critical" => Some(TaskType::Critical),
            _ => None,
        }
    }
}

/// What a provider is good at. Selection rules consult these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    Coding,
    Analysis,
    Creative,
    /// Able to synthesize prior responses; required as the last step of
    /// critical sequential dispatches.
    Aggregation,
}

impl Capability {
    /// Stable wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Capability::Coding => "coding",
            Capability::Analysis => "analysis",
            Capability::Creative => "creative",
            Capability::Aggregation => "aggregation",
        }
    }

    /// Parse from the wire name.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "coding" => Some(Capability::Coding),
            "analysis" => Some(Capability::Analysis),
            "creative" => Some(Capability::Creative),
            "aggregation" => Some(Capability::Aggregation),
            _ => None,
        }
    }
}

/// How a provider is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InvocationKind {
    Subprocess,
    InProcessSdk,
    McpClient,
}

impl InvocationKind {
    /// Stable wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            InvocationKind::Subprocess => "subprocess",
            InvocationKind::InProcessSdk => "in-process-sdk",
            InvocationKind::McpClient => "mcp-client",
        }
    }
}

/// Static description of one registered provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderDescriptor {
    /// Stable provider id, unique within the registry.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// The organization backing this provider. Vendor rotation is
    /// computed over this field, not over provider ids.
    pub vendor: String,
    /// Quality tier, 1 (cheap) through 5 (strongest).
    pub tier: u8,
    /// Capability set.
    pub capabilities: Vec<Capability>,
    /// Estimated USD cost per token, used when no vendor pricing is known.
    pub cost_per_token: f64,
    /// Invocation mechanism.
    pub kind: InvocationKind,
}

impl ProviderDescriptor {
    /// Whether this provider can act as an aggregator.
    pub fn is_aggregator(&self) -> bool {
        self.tier >= 4 && self.capabilities.contains(&Capability::Aggregation)
    }
}

/// Token usage for one invocation.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Tokens in the input/prompt.
    pub input_tokens: u32,
    /// Tokens in the output/completion.
    pub output_tokens: u32,
}

impl TokenUsage {
    /// Accumulate token counts from another usage record.
    pub fn accumulate(&mut self, other: &TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }

    /// Total tokens, input plus output.
    pub fn total(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }
}

/// Raw output of one adapter invocation, before normalization.
#[derive(Debug, Clone, Default)]
pub struct ProviderOutput {
    /// The response text.
    pub content: String,
    /// Self-reported confidence, if the backend provides one.
    pub confidence: Option<f64>,
    /// Self-reported reasoning, if the backend provides one.
    pub reasoning: Option<String>,
    /// Token usage, zeroed when the backend does not report it.
    pub usage: TokenUsage,
}

/// Redacted, typed error carried on an errored vote.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseError {
    /// Stable reason code (see `ProviderError::reason_code`).
    pub reason_code: String,
    /// Redacted message.
    pub message: String,
    /// Whether retrying the adapter could plausibly succeed.
    pub retryable: bool,
}

impl From<&ProviderError> for ResponseError {
    fn from(err: &ProviderError) -> Self {
        Self {
            reason_code: err.reason_code().to_string(),
            message: redact_secrets(&err.to_string()),
            retryable: err.retryable(),
        }
    }
}

/// Normalized response from one provider, immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderResponse {
    /// Which provider produced this.
    pub provider_id: String,
    /// The provider's vendor, for rotation bookkeeping.
    pub vendor: String,
    /// The provider's tier, used in consensus tie-breaks.
    pub tier: u8,
    /// The response text (empty for errored votes).
    pub content: String,
    /// Self-reported or derived confidence in [0, 1].
    pub confidence: f64,
    /// Reasoning text (may be empty).
    pub reasoning: String,
    /// Invocation latency in milliseconds.
    pub latency_ms: u64,
    /// Token usage.
    pub usage: TokenUsage,
    /// Estimated USD cost of this invocation.
    pub raw_cost_estimate: f64,
    /// Present when the adapter failed; such votes never win consensus.
    pub error: Option<ResponseError>,
}

impl ProviderResponse {
    /// Build a successful response from an adapter's raw output,
    /// imposing the default confidence heuristic and cost estimate.
    pub fn from_output(
        descriptor: &ProviderDescriptor,
        output: ProviderOutput,
        latency_ms: u64,
    ) -> Self {
        let confidence = output
            .confidence
            .unwrap_or_else(|| confidence::default_confidence(&output.content))
            .clamp(0.0, 1.0);
        let raw_cost_estimate = pricing::estimate(descriptor, &output.usage);

        Self {
            provider_id: descriptor.id.clone(),
            vendor: descriptor.vendor.clone(),
            tier: descriptor.tier,
            content: output.content,
            confidence,
            reasoning: output.reasoning.unwrap_or_default(),
            latency_ms,
            usage: output.usage,
            raw_cost_estimate,
            error: None,
        }
    }

    /// Build an errored vote from an adapter failure.
    pub fn from_error(
        descriptor: &ProviderDescriptor,
        err: &ProviderError,
        latency_ms: u64,
    ) -> Self {
        Self {
            provider_id: descriptor.id.clone(),
            vendor: descriptor.vendor.clone(),
            tier: descriptor.tier,
            content: String::new(),
            confidence: 0.0,
            reasoning: String::new(),
            latency_ms,
            usage: TokenUsage::default(),
            raw_cost_estimate: 0.0,
            error: Some(ResponseError::from(err)),
        }
    }

    /// Whether this response can contribute content to a consensus.
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Result of a provider health probe.
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    /// Whether the probe succeeded.
    pub ok: bool,
    /// Probe latency in milliseconds.
    pub latency_ms: u64,
    /// Failure detail, redacted.
    pub detail: Option<String>,
}

/// Per-invocation context threaded into every adapter call.
///
/// Carries the accumulated prompt context, the cancellation token, the
/// per-adapter deadline, and the approval gate for side-effecting tools.
#[derive(Clone)]
pub struct InvocationContext {
    /// The analysis this invocation belongs to.
    pub analysis_id: String,
    /// Session/chain context prepended to the query, if any.
    pub context: Option<String>,
    /// Per-adapter deadline.
    pub timeout: Duration,
    /// Cooperative cancellation token.
    pub cancel: CancellationToken,
    /// Sandbox level for tool invocations made during this call.
    pub sandbox_level: SandboxLevel,
    /// Event publisher bound to the analysis stream.
    pub events: AnalysisEvents,
    /// Approval gate for side-effecting tool invocations.
    pub approvals: Arc<ApprovalManager>,
}

impl InvocationContext {
    /// The full prompt: context (when present), a blank line, then the query.
    pub fn full_prompt(&self, query: &str) -> String {
        match &self.context {
            Some(context) if !context.is_empty() => format!("{context}\n\n{query}"),
            _ => query.to_string(),
        }
    }
}

/// The uniform capability surface over heterogeneous LLM backends.
#[async_trait::async_trait]
pub trait Provider: Send + Sync {
    /// Static description of this provider.
    fn describe(&self) -> &ProviderDescriptor;

    /// Invoke the backend with `query` under `ctx`.
    ///
    /// Implementations enforce `ctx.timeout` themselves (a timed-out
    /// subprocess must be killed, not merely abandoned) and observe
    /// `ctx.cancel` at every suspension point.
    async fn invoke(
        &self,
        query: &str,
        ctx: &InvocationContext,
    ) -> Result<ProviderOutput, ProviderError>;

    /// Probe whether the backend is reachable and configured correctly.
    async fn health_check(&self) -> HealthStatus;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor() -> ProviderDescriptor {
        ProviderDescriptor {
            id: "vendor-a-main".into(),
            name: "Vendor A".into(),
            vendor: "vendor-a".into(),
            tier: 3,
            capabilities: vec![Capability::Analysis],
            cost_per_token: 0.000_002,
            kind: InvocationKind::Subprocess,
        }
    }

    #[test]
    fn from_output_keeps_self_reported_confidence() {
        let output = ProviderOutput {
            content: "The answer is 42.".into(),
            confidence: Some(0.9),
            reasoning: Some("counted on fingers".into()),
            usage: TokenUsage {
                input_tokens: 10,
                output_tokens: 5,
            },
        };
        let response = ProviderResponse::from_output(&descriptor(), output, 120);
        assert!((response.confidence - 0.9).abs() < f64::EPSILON);
        assert_eq!(response.reasoning, "counted on fingers");
        assert_eq!(response.latency_ms, 120);
        assert!(response.is_success());
    }

    #[test]
    fn from_output_derives_confidence_when_absent() {
        let output = ProviderOutput {
            content: "Some answer text with several distinct tokens".into(),
            confidence: None,
            reasoning: None,
            usage: TokenUsage::default(),
        };
        let response = ProviderResponse::from_output(&descriptor(), output, 10);
        assert!(response.confidence > 0.0 && response.confidence <= 0.95);
    }

    #[test]
    fn out_of_range_confidence_is_clamped() {
        let output = ProviderOutput {
            content: "x".into(),
            confidence: Some(1.7),
            ..Default::default()
        };
        let response = ProviderResponse::from_output(&descriptor(), output, 1);
        assert!((response.confidence - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn from_error_produces_errored_vote_with_redaction() {
        let err = ProviderError::Api {
            status: 401,
            message: "rejected x-api-key: sk-secret-123".into(),
        };
        let response = ProviderResponse::from_error(&descriptor(), &err, 55);
        assert!(!response.is_success());
        let error = response.error.unwrap();
        assert_eq!(error.reason_code, "api");
        assert!(!error.message.contains("sk-secret-123"));
        assert!((response.confidence).abs() < f64::EPSILON);
    }

    #[test]
    fn aggregator_requires_tier_and_capability() {
        let mut desc = descriptor();
        assert!(!desc.is_aggregator());
        desc.tier = 4;
        assert!(!desc.is_aggregator());
        desc.capabilities.push(Capability::Aggregation);
        assert!(desc.is_aggregator());
    }

    #[test]
    fn token_usage_accumulates() {
        let mut total = TokenUsage::default();
        total.accumulate(&TokenUsage {
            input_tokens: 7,
            output_tokens: 3,
        });
        total.accumulate(&TokenUsage {
            input_tokens: 1,
            output_tokens: 2,
        });
        assert_eq!(total.input_tokens, 8);
        assert_eq!(total.output_tokens, 5);
        assert_eq!(total.total(), 13);
    }
}
