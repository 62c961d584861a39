//! Top-level orchestrator facade.
//!
//! Owns one analysis end to end: validate options, resolve session
//! context and routing policy, select providers, drive the dispatcher,
//! compute consensus, persist the turn, and emit the terminal event. The
//! per-analysis state machine is `received -> dispatching ->
//! consensus_pending -> {succeeded | failed | escalated}`; `escalated`
//! is reached when consensus falls below the floor, auto-escalation is
//! on, and no escalation has been performed yet in this analysis.
//!
//! All collaborators are held in this explicit context object, built
//! once at startup; tests substitute fakes by constructing their own.
//! This is the only layer that formats user-visible failure messages.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::approval::{ApprovalManager, ApprovalRequest, ApprovalState, Decision, SandboxLevel};
use crate::config::Config;
use crate::consensus::{self, Consensus, ConsensusOptions};
use crate::dispatch::{self, DispatchMode, DispatchOptions};
use crate::error::{AnalysisError, ApprovalError, BuildError, RegistryError, SessionError};
use crate::events::{AnalysisEvents, EventBus, EventPayload, EventSubscription};
use crate::kv::{KvStore, MemoryKvStore, SqliteKvStore};
use crate::provider::registry::ProviderRegistry;
use crate::provider::{
    Capability, HealthStatus, InvocationContext, InvocationKind, McpProvider, Provider,
    ProviderDescriptor, SdkProvider, SecretStore, SubprocessProvider, TaskType, TokenUsage,
};
use crate::session::{
    context_prompt, derive_policy, PolicyFloors, Session, SessionManager, TurnInput,
};

/// Per-analysis lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisState {
    Received,
    Dispatching,
    ConsensusPending,
    Succeeded,
    Failed,
    Escalated,
}

impl AnalysisState {
    /// Stable wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            AnalysisState::Received => "received",
            AnalysisState::Dispatching => "dispatching",
            AnalysisState::ConsensusPending => "consensus_pending",
            AnalysisState::Succeeded => "succeeded",
            AnalysisState::Failed => "failed",
            AnalysisState::Escalated => "escalated",
        }
    }
}

/// Options for one analysis. Defaults come from configuration via
/// [`Orchestrator::options`].
#[derive(Debug, Clone)]
pub struct AnalyzeOptions {
    /// Requested quality/cost tier.
    pub task_type: TaskType,
    /// Parallel or sequential dispatch.
    pub mode: DispatchMode,
    /// Sequential chain depth, 1-5.
    pub depth: u32,
    /// Floor on successful adapter responses (>= 2).
    pub min_providers: usize,
    /// Combined-confidence floor.
    pub confidence_floor: f64,
    /// Agreement floor.
    pub consensus_floor: f64,
    /// Continue this session, deriving its routing policy.
    pub session_id: Option<String>,
    /// Whether subscribers want `thinking` events (transport-level
    /// filtering; the core always publishes them).
    pub include_thinking: bool,
    /// Cancel still-running adapters once success is guaranteed.
    pub eager: bool,
    /// Retry once with more providers on low consensus.
    pub auto_escalate: bool,
    /// Sandbox level for tool invocations.
    pub sandbox_level: SandboxLevel,
}

/// The outcome of one analysis.
#[derive(Debug, Clone, serde::Serialize)]
pub struct AnalysisReport {
    /// Unique analysis id (doubles as the event stream key).
    pub analysis_id: String,
    /// The consensus result.
    pub consensus: Consensus,
    /// Terminal state: `succeeded` or `escalated`.
    pub state: AnalysisState,
    /// Warning codes raised during the analysis.
    pub warnings: Vec<String>,
    /// Total token usage across all votes.
    pub usage: TokenUsage,
    /// Wall-clock duration in milliseconds.
    pub elapsed_ms: u64,
    /// The session this analysis belongs to, if any.
    pub session_id: Option<String>,
    /// The committed turn index, when a session was involved.
    pub turn_index: Option<u32>,
}

/// Handle returned by [`Orchestrator::analyze_stream`].
pub struct AnalysisStream {
    /// The analysis id the subscription is keyed by.
    pub analysis_id: String,
    /// Incremental event subscription, terminating with `final_answer`,
    /// `error`, or `canceled`.
    pub events: EventSubscription,
    /// Resolves to the analysis result once the stream has terminated.
    pub result: tokio::task::JoinHandle<Result<AnalysisReport, AnalysisError>>,
}

/// Tunables resolved from configuration at startup.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub per_adapter_timeout: Duration,
    pub whole_timeout: Duration,
    pub tool_timeout: Duration,
    pub default_mode: DispatchMode,
    pub default_depth: u32,
    pub default_eager: bool,
    pub default_min_providers: usize,
    pub confidence_floor: f64,
    pub consensus_floor: f64,
    pub require_consensus: bool,
    pub auto_escalate: bool,
    pub policy_floors: PolicyFloors,
    pub context_window: usize,
    pub default_sandbox: SandboxLevel,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl OrchestratorSettings {
    /// Resolve settings from a (validated) configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            per_adapter_timeout: Duration::from_millis(config.dispatch.per_adapter_timeout_ms),
            whole_timeout: Duration::from_millis(config.dispatch.whole_dispatch_timeout_ms),
            tool_timeout: Duration::from_millis(config.dispatch.tool_invocation_timeout_ms),
            default_mode: DispatchMode::parse(&config.dispatch.default_mode)
                .unwrap_or(DispatchMode::Parallel),
            default_depth: config.dispatch.default_depth,
            default_eager: config.dispatch.eager,
            default_min_providers: config.dispatch.min_providers,
            confidence_floor: config.consensus.confidence_floor,
            consensus_floor: config.consensus.consensus_floor,
            require_consensus: config.consensus.require_consensus,
            auto_escalate: config.consensus.auto_escalate,
            policy_floors: PolicyFloors {
                turn2_min_providers: config.session.turn2_min_providers,
                turn3_min_providers: config.session.turn3_min_providers,
                turn_min_cap: config.session.turn_min_cap,
            },
            context_window: config.session.context_window_turns,
            default_sandbox: SandboxLevel::parse(&config.approval.sandbox_level_default)
                .unwrap_or(SandboxLevel::ReadOnly),
        }
    }
}

struct AttemptOutcome {
    consensus: Consensus,
    provider_ids: Vec<String>,
    vendors: Vec<String>,
    rotation_relaxed: bool,
}

/// The orchestration core: every control-plane operation lives here.
pub struct Orchestrator {
    registry: Arc<ProviderRegistry>,
    bus: Arc<EventBus>,
    approvals: Arc<ApprovalManager>,
    sessions: Arc<SessionManager>,
    settings: OrchestratorSettings,
}

impl Orchestrator {
    /// Assemble an orchestrator from already-built collaborators.
    pub fn new(
        registry: Arc<ProviderRegistry>,
        bus: Arc<EventBus>,
        approvals: Arc<ApprovalManager>,
        sessions: Arc<SessionManager>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            registry,
            bus,
            approvals,
            sessions,
            settings,
        }
    }

    /// Build the full context object from configuration: KV store, event
    /// bus, approval manager, session manager, and one adapter per
    /// configured provider (MCP servers are connected here).
    pub async fn from_config(
        config: &Config,
        secrets: &dyn SecretStore,
    ) -> Result<Self, BuildError> {
        config.validate().map_err(BuildError::Config)?;

        let kv: Arc<dyn KvStore> = match config.storage.backend.as_str() {
            "sqlite" => Arc::new(SqliteKvStore::open(&config.storage.db_path).await?),
            _ => Arc::new(MemoryKvStore::new()),
        };

        let bus = Arc::new(EventBus::new(config.events.buffer_size));
        let approvals = Arc::new(ApprovalManager::new(
            Arc::clone(&bus),
            config.approval.auto_mode,
            Duration::from_millis(config.approval.timeout_ms),
        ));
        let sessions = Arc::new(SessionManager::new(
            kv,
            Duration::from_secs(config.session.ttl_seconds),
        ));
        let settings = OrchestratorSettings::from_config(config);

        let mut providers: Vec<Arc<dyn Provider>> = Vec::with_capacity(config.providers.len());
        for pc in &config.providers {
            let descriptor = ProviderDescriptor {
                id: pc.id.clone(),
                name: pc.name.clone().unwrap_or_else(|| pc.id.clone()),
                vendor: pc.vendor.clone(),
                tier: pc.tier,
                capabilities: pc
                    .capabilities
                    .iter()
                    .filter_map(|c| Capability::parse(c))
                    .collect(),
                cost_per_token: pc.cost_per_token,
                kind: match pc.kind.as_str() {
                    "sdk" => InvocationKind::InProcessSdk,
                    "mcp" => InvocationKind::McpClient,
                    _ => InvocationKind::Subprocess,
                },
            };

            let provider: Arc<dyn Provider> = match pc.kind.as_str() {
                "sdk" => Arc::new(
                    SdkProvider::new(
                        descriptor,
                        pc.base_url.clone().unwrap_or_default(),
                        pc.model.clone().unwrap_or_default(),
                        pc.api_key_secret.as_deref().unwrap_or_default(),
                        secrets,
                    )
                    .map_err(|source| BuildError::Provider {
                        id: pc.id.clone(),
                        source,
                    })?,
                ),
                "mcp" => {
                    let mut command =
                        tokio::process::Command::new(pc.command.clone().unwrap_or_default());
                    command.args(&pc.args);
                    let mut mcp = McpProvider::connect_stdio(descriptor, command)
                        .await
                        .map_err(|source| BuildError::Provider {
                            id: pc.id.clone(),
                            source,
                        })?
                        .with_tool_timeout(settings.tool_timeout);
                    if let Some(tool) = &pc.completion_tool {
                        mcp = mcp.with_completion_tool(tool.clone());
                    }
                    Arc::new(mcp)
                }
                _ => {
                    let mut subprocess = SubprocessProvider::new(
                        descriptor,
                        pc.command.clone().unwrap_or_default(),
                        pc.args.clone(),
                    );
                    if pc.output_format == "json" {
                        subprocess = subprocess
                            .with_output_format(crate::provider::OutputFormat::JsonEnvelope);
                    }
                    if let Some(health_args) = &pc.health_args {
                        subprocess = subprocess.with_health_args(health_args.clone());
                    }
                    Arc::new(subprocess)
                }
            };
            providers.push(provider);
        }

        let registry = Arc::new(ProviderRegistry::new(providers)?);
        Ok(Self::new(registry, bus, approvals, sessions, settings))
    }

    /// Default analysis options resolved from configuration.
    pub fn options(&self) -> AnalyzeOptions {
        AnalyzeOptions {
            task_type: TaskType::Basic,
            mode: self.settings.default_mode,
            depth: self.settings.default_depth,
            min_providers: self.settings.default_min_providers,
            confidence_floor: self.settings.confidence_floor,
            consensus_floor: self.settings.consensus_floor,
            session_id: None,
            include_thinking: false,
            eager: self.settings.default_eager,
            auto_escalate: self.settings.auto_escalate,
            sandbox_level: self.settings.default_sandbox,
        }
    }

    /// Run one analysis to completion and return the consensus.
    pub async fn analyze(
        &self,
        query: &str,
        opts: &AnalyzeOptions,
        cancel: &CancellationToken,
    ) -> Result<AnalysisReport, AnalysisError> {
        let analysis_id = uuid::Uuid::new_v4().to_string();
        self.run(&analysis_id, query, opts, cancel).await
    }

    /// Streaming variant: subscribe first, then run the analysis in a
    /// background task. The subscription terminates with `final_answer`,
    /// `error`, or `canceled`.
    pub fn analyze_stream(
        self: &Arc<Self>,
        query: &str,
        opts: AnalyzeOptions,
        subscriber_id: &str,
        cancel: CancellationToken,
    ) -> AnalysisStream {
        let analysis_id = uuid::Uuid::new_v4().to_string();
        let events = self.bus.subscribe(&analysis_id, subscriber_id);

        let orchestrator = Arc::clone(self);
        let id = analysis_id.clone();
        let query = query.to_string();
        let result = tokio::spawn(async move {
            orchestrator.run(&id, &query, &opts, &cancel).await
        });

        AnalysisStream {
            analysis_id,
            events,
            result,
        }
    }

    async fn run(
        &self,
        analysis_id: &str,
        query: &str,
        opts: &AnalyzeOptions,
        cancel: &CancellationToken,
    ) -> Result<AnalysisReport, AnalysisError> {
        let events = AnalysisEvents::new(Arc::clone(&self.bus), analysis_id);
        let result = self.run_inner(analysis_id, query, opts, cancel, &events).await;

        match &result {
            Ok(report) => {
                events.publish(EventPayload::FinalAnswer {
                    winner_provider_id: report.consensus.winner_provider_id.clone(),
                    confidence: report.consensus.confidence,
                    content: report.consensus.content.clone(),
                });
            }
            Err(AnalysisError::Canceled) => {
                self.approvals.expire_analysis(analysis_id);
                events.publish(EventPayload::Canceled);
            }
            Err(err) => {
                let report = err.report();
                events.publish(EventPayload::Error {
                    kind: report.kind,
                    message: report.message,
                });
            }
        }
        self.bus.finish(analysis_id);
        result
    }

    async fn run_inner(
        &self,
        analysis_id: &str,
        query: &str,
        opts: &AnalyzeOptions,
        cancel: &CancellationToken,
        events: &AnalysisEvents,
    ) -> Result<AnalysisReport, AnalysisError> {
        let started = Instant::now();
        validate_options(query, opts)?;
        if cancel.is_cancelled() {
            return Err(AnalysisError::Canceled);
        }

        tracing::info!(
            analysis_id = %analysis_id,
            task_type = opts.task_type.as_str(),
            mode = opts.mode.as_str(),
            state = AnalysisState::Received.as_str(),
            "Analysis accepted"
        );

        // Resolve session context and routing policy.
        let (session, context, effective_min, must_differ) = match &opts.session_id {
            Some(session_id) => {
                let session = self
                    .sessions
                    .load(session_id)
                    .await
                    .map_err(|e| self.internal(analysis_id, &e.to_string()))?
                    .ok_or_else(|| AnalysisError::InvalidInput {
                        message: format!("unknown session: {session_id}"),
                    })?;
                let policy = derive_policy(&session, &self.settings.policy_floors);
                let context = context_prompt(&session, self.settings.context_window);
                tracing::debug!(
                    analysis_id = %analysis_id,
                    session_id = %session_id,
                    turn_index = policy.turn_index,
                    policy_min = policy.min_providers,
                    "Session policy derived"
                );
                (
                    Some(session),
                    context,
                    opts.min_providers.max(policy.min_providers),
                    policy.must_differ_from,
                )
            }
            None => (None, None, opts.min_providers, HashSet::new()),
        };

        let desired = match opts.mode {
            DispatchMode::Parallel => effective_min,
            DispatchMode::Sequential => effective_min.max(opts.depth as usize),
        };

        let mut warnings: Vec<String> = Vec::new();
        let mut outcome = self
            .attempt(
                analysis_id,
                query,
                opts,
                events,
                cancel,
                context.as_deref(),
                effective_min,
                desired,
                &must_differ,
            )
            .await?;
        if outcome.rotation_relaxed {
            warnings.push("rotation_relaxed".to_string());
        }

        let mut state = AnalysisState::Succeeded;
        if outcome.consensus.below_threshold {
            events.publish(EventPayload::Warning {
                code: "consensus_below_threshold".to_string(),
                message: format!(
                    "combined confidence {:.2} is below the consensus floor {:.2}",
                    outcome.consensus.confidence, opts.consensus_floor
                ),
            });
            warnings.push("consensus_below_threshold".to_string());

            if opts.auto_escalate {
                tracing::info!(
                    analysis_id = %analysis_id,
                    "Consensus below floor, escalating with more providers"
                );
                match self
                    .attempt(
                        analysis_id,
                        query,
                        opts,
                        events,
                        cancel,
                        context.as_deref(),
                        effective_min,
                        desired + 1,
                        &must_differ,
                    )
                    .await
                {
                    Ok(second) => {
                        outcome = second;
                        state = AnalysisState::Escalated;
                    }
                    Err(AnalysisError::Canceled) => return Err(AnalysisError::Canceled),
                    Err(e) => {
                        tracing::warn!(
                            analysis_id = %analysis_id,
                            error = %e,
                            "Escalation attempt failed, keeping the original consensus"
                        );
                        warnings.push("escalation_failed".to_string());
                    }
                }
            }
        }

        // Persist the turn when a session is involved.
        let (session_id, turn_index) = match &session {
            Some(session) => {
                let turn = self
                    .sessions
                    .append_turn(
                        &session.session_id,
                        TurnInput {
                            query: query.to_string(),
                            winner_provider_id: outcome.consensus.winner_provider_id.clone(),
                            content: outcome.consensus.content.clone(),
                            confidence: outcome.consensus.confidence,
                            quality: outcome.consensus.quality,
                            provider_ids_used: outcome.provider_ids.clone(),
                            vendors_used: outcome.vendors.clone(),
                        },
                    )
                    .await
                    .map_err(|e| self.internal(analysis_id, &e.to_string()))?;
                (Some(session.session_id.clone()), Some(turn.turn_index))
            }
            None => (None, None),
        };

        let mut usage = TokenUsage::default();
        for vote in &outcome.consensus.votes {
            usage.accumulate(&vote.response.usage);
        }

        tracing::info!(
            analysis_id = %analysis_id,
            winner = %outcome.consensus.winner_provider_id,
            confidence = outcome.consensus.confidence,
            state = state.as_str(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Analysis complete"
        );

        Ok(AnalysisReport {
            analysis_id: analysis_id.to_string(),
            consensus: outcome.consensus,
            state,
            warnings,
            usage,
            elapsed_ms: started.elapsed().as_millis() as u64,
            session_id,
            turn_index,
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn attempt(
        &self,
        analysis_id: &str,
        query: &str,
        opts: &AnalyzeOptions,
        events: &AnalysisEvents,
        cancel: &CancellationToken,
        context: Option<&str>,
        effective_min: usize,
        desired: usize,
        must_differ: &HashSet<String>,
    ) -> Result<AttemptOutcome, AnalysisError> {
        let selection = self
            .registry
            .select(opts.task_type, desired, must_differ)
            .map_err(|e| match e {
                RegistryError::NoEligibleProviders { required, .. } => {
                    AnalysisError::InsufficientProviders {
                        successful: 0,
                        required,
                        failures: Vec::new(),
                    }
                }
                other => self.internal(analysis_id, &other.to_string()),
            })?;

        if selection.rotation_relaxed {
            events.publish(EventPayload::Warning {
                code: "rotation_relaxed".to_string(),
                message: "vendor rotation widened to satisfy the provider floor".to_string(),
            });
        }

        tracing::debug!(
            analysis_id = %analysis_id,
            providers = ?selection.provider_ids(),
            state = AnalysisState::Dispatching.as_str(),
            "Dispatching selection"
        );

        let ctx = InvocationContext {
            analysis_id: analysis_id.to_string(),
            context: context.map(str::to_string),
            timeout: self.settings.per_adapter_timeout,
            cancel: cancel.clone(),
            sandbox_level: opts.sandbox_level,
            events: events.clone(),
            approvals: Arc::clone(&self.approvals),
        };
        let dispatch_opts = DispatchOptions {
            mode: opts.mode,
            min_providers: effective_min,
            whole_timeout: self.settings.whole_timeout,
            eager: opts.eager,
            confidence_floor: opts.confidence_floor,
        };

        let provider_ids = selection.provider_ids();
        let vendors: Vec<String> = selection.vendors().into_iter().collect();
        let rotation_relaxed = selection.rotation_relaxed;

        let responses = dispatch::dispatch(&selection, query, &dispatch_opts, &ctx).await?;

        tracing::debug!(
            analysis_id = %analysis_id,
            responses = responses.len(),
            state = AnalysisState::ConsensusPending.as_str(),
            "Scoring consensus"
        );

        let consensus = consensus::build(
            responses,
            &ConsensusOptions {
                min_providers: effective_min,
                consensus_floor: opts.consensus_floor,
                require_consensus: self.settings.require_consensus,
            },
        )
        .map_err(|e| self.internal(analysis_id, &e.to_string()))?;

        events.publish(EventPayload::ConsensusUpdate {
            stage: "scored".to_string(),
            detail: format!(
                "winner {} with combined confidence {:.2} over {} votes",
                consensus.winner_provider_id,
                consensus.confidence,
                consensus.votes.len()
            ),
        });

        Ok(AttemptOutcome {
            consensus,
            provider_ids,
            vendors,
            rotation_relaxed,
        })
    }

    fn internal(&self, analysis_id: &str, message: &str) -> AnalysisError {
        tracing::error!(
            correlation_id = %analysis_id,
            message = %message,
            "Internal analysis error"
        );
        AnalysisError::Internal {
            correlation_id: analysis_id.to_string(),
            message: message.to_string(),
        }
    }

    // --- Control-plane passthroughs ---

    /// Create a new session.
    pub async fn create_session(
        &self,
        user_id: Option<&str>,
    ) -> Result<Session, SessionError> {
        self.sessions
            .create(user_id, self.settings.default_sandbox)
            .await
    }

    /// Continue an existing session with a new query.
    pub async fn continue_session(
        &self,
        session_id: &str,
        query: &str,
        opts: &AnalyzeOptions,
        cancel: &CancellationToken,
    ) -> Result<AnalysisReport, AnalysisError> {
        let mut opts = opts.clone();
        opts.session_id = Some(session_id.to_string());
        self.analyze(query, &opts, cancel).await
    }

    /// Fetch a session by id.
    pub async fn get_session(&self, session_id: &str) -> Result<Option<Session>, SessionError> {
        self.sessions.load(session_id).await
    }

    /// Delete a session.
    pub async fn delete_session(&self, session_id: &str) -> Result<(), SessionError> {
        self.sessions.delete(session_id).await
    }

    /// Session ids for a user.
    pub async fn sessions_for_user(&self, user_id: &str) -> Result<Vec<String>, SessionError> {
        self.sessions.sessions_for_user(user_id).await
    }

    /// Descriptors of all registered providers.
    pub fn list_providers(&self) -> Vec<ProviderDescriptor> {
        self.registry.descriptors()
    }

    /// Probe one provider's health.
    pub async fn provider_health(&self, provider_id: &str) -> Result<HealthStatus, RegistryError> {
        let provider = self.registry.get(provider_id)?;
        Ok(provider.health_check().await)
    }

    /// Resolve a pending approval request.
    pub fn resolve_approval(
        &self,
        request_id: &str,
        decision: Decision,
    ) -> Result<ApprovalState, ApprovalError> {
        self.approvals.resolve(request_id, decision)
    }

    /// Currently pending approval requests.
    pub fn pending_approvals(&self) -> Vec<ApprovalRequest> {
        self.approvals.pending()
    }
}

fn validate_options(query: &str, opts: &AnalyzeOptions) -> Result<(), AnalysisError> {
    if query.trim().is_empty() {
        return Err(AnalysisError::InvalidInput {
            message: "query must not be empty".to_string(),
        });
    }
    if opts.min_providers < 2 {
        return Err(AnalysisError::InvalidInput {
            message: "min_providers must be at least 2".to_string(),
        });
    }
    if !(1..=5).contains(&opts.depth) {
        return Err(AnalysisError::InvalidInput {
            message: "depth must be between 1 and 5".to_string(),
        });
    }
    for (name, value) in [
        ("confidence_floor", opts.confidence_floor),
        ("consensus_floor", opts.consensus_floor),
    ] {
        if !(0.0..=1.0).contains(&value) {
            return Err(AnalysisError::InvalidInput {
                message: format!("{name} must be between 0 and 1"),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> AnalyzeOptions {
        AnalyzeOptions {
            task_type: TaskType::Basic,
            mode: DispatchMode::Parallel,
            depth: 3,
            min_providers: 2,
            confidence_floor: 0.7,
            consensus_floor: 0.6,
            session_id: None,
            include_thinking: false,
            eager: false,
            auto_escalate: false,
            sandbox_level: SandboxLevel::ReadOnly,
        }
    }

    #[test]
    fn empty_query_is_invalid_input() {
        let err = validate_options("   ", &options()).unwrap_err();
        assert_eq!(err.kind(), "invalid_input");
    }

    #[test]
    fn option_ranges_are_enforced() {
        let mut opts = options();
        opts.min_providers = 1;
        assert!(validate_options("q", &opts).is_err());

        let mut opts = options();
        opts.depth = 6;
        assert!(validate_options("q", &opts).is_err());

        let mut opts = options();
        opts.confidence_floor = 1.2;
        assert!(validate_options("q", &opts).is_err());

        assert!(validate_options("q", &options()).is_ok());
    }

    #[test]
    fn settings_resolve_from_default_config() {
        let settings = OrchestratorSettings::default();
        assert_eq!(settings.per_adapter_timeout, Duration::from_secs(30));
        assert_eq!(settings.whole_timeout, Duration::from_secs(90));
        assert_eq!(settings.tool_timeout, Duration::from_secs(25));
        assert_eq!(settings.default_mode, DispatchMode::Parallel);
        assert_eq!(settings.default_min_providers, 2);
        assert_eq!(settings.default_sandbox, SandboxLevel::ReadOnly);
    }

    #[test]
    fn analysis_state_names_are_stable() {
        assert_eq!(AnalysisState::Received.as_str(), "received");
        assert_eq!(AnalysisState::ConsensusPending.as_str(), "consensus_pending");
        assert_eq!(AnalysisState::Escalated.as_str(), "escalated");
    }
}
