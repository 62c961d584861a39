//! Shared test fixtures: scripted providers and orchestrator assembly.

use std::sync::Arc;
use std::time::Duration;

use wallbounce_core::approval::{ApprovalManager, ToolInvocation};
use wallbounce_core::error::ProviderError;
use wallbounce_core::events::EventBus;
use wallbounce_core::kv::MemoryKvStore;
use wallbounce_core::orchestrator::{Orchestrator, OrchestratorSettings};
use wallbounce_core::provider::registry::ProviderRegistry;
use wallbounce_core::provider::{
    Capability, HealthStatus, InvocationContext, InvocationKind, Provider, ProviderDescriptor,
    ProviderOutput,
};
use wallbounce_core::session::SessionManager;

/// Scripted behavior for a test provider.
#[derive(Clone)]
pub enum Script {
    /// Return fixed content and confidence after a delay.
    Reply {
        content: &'static str,
        confidence: f64,
        delay: Duration,
    },
    /// Hang until the per-adapter deadline (or cancellation).
    Hang,
    /// Fail with a parse error.
    Fail,
    /// Submit a side-effecting tool invocation through the approval
    /// gate, then reply if execution is allowed.
    RequireApproval {
        tool_name: &'static str,
        content: &'static str,
        confidence: f64,
    },
}

pub struct ScriptedProvider {
    descriptor: ProviderDescriptor,
    script: Script,
}

#[async_trait::async_trait]
impl Provider for ScriptedProvider {
    fn describe(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    async fn invoke(
        &self,
        _query: &str,
        ctx: &InvocationContext,
    ) -> Result<ProviderOutput, ProviderError> {
        match &self.script {
            Script::Reply {
                content,
                confidence,
                delay,
            } => {
                tokio::select! {
                    biased;
                    () = ctx.cancel.cancelled() => return Err(ProviderError::Canceled),
                    () = tokio::time::sleep(*delay) => {}
                }
                Ok(ProviderOutput {
                    content: (*content).to_string(),
                    confidence: Some(*confidence),
                    ..Default::default()
                })
            }
            Script::Hang => {
                tokio::select! {
                    biased;
                    () = ctx.cancel.cancelled() => Err(ProviderError::Canceled),
                    () = tokio::time::sleep(ctx.timeout) => Err(ProviderError::Timeout {
                        seconds: ctx.timeout.as_secs(),
                    }),
                }
            }
            Script::Fail => Err(ProviderError::Parse("scripted failure".into())),
            Script::RequireApproval {
                tool_name,
                content,
                confidence,
            } => {
                let tool = ToolInvocation {
                    tool_name: (*tool_name).to_string(),
                    arguments: serde_json::json!({"target": "prod"}),
                    sandbox_level: ctx.sandbox_level,
                    approval_request_id: None,
                };
                let request = ctx.approvals.submit(&ctx.analysis_id, &tool);
                let state = if request.state.is_terminal() {
                    request.state
                } else {
                    ctx.approvals
                        .wait(&request.request_id, &ctx.cancel)
                        .await
                        .map_err(|e| ProviderError::Protocol(e.to_string()))?
                };
                if !state.allows_execution() {
                    return Err(ProviderError::ApprovalDenied {
                        tool_name: (*tool_name).to_string(),
                    });
                }
                Ok(ProviderOutput {
                    content: (*content).to_string(),
                    confidence: Some(*confidence),
                    ..Default::default()
                })
            }
        }
    }

    async fn health_check(&self) -> HealthStatus {
        HealthStatus {
            ok: true,
            latency_ms: 1,
            detail: None,
        }
    }
}

/// Build a scripted provider.
pub fn provider(
    id: &str,
    vendor: &str,
    tier: u8,
    aggregator: bool,
    script: Script,
) -> Arc<dyn Provider> {
    let mut capabilities = vec![Capability::Analysis];
    if aggregator {
        capabilities.push(Capability::Aggregation);
    }
    Arc::new(ScriptedProvider {
        descriptor: ProviderDescriptor {
            id: id.to_string(),
            name: id.to_string(),
            vendor: vendor.to_string(),
            tier,
            capabilities,
            cost_per_token: 0.0,
            kind: InvocationKind::InProcessSdk,
        },
        script,
    })
}

/// Assemble an orchestrator over scripted providers with fast timeouts.
pub fn orchestrator(
    providers: Vec<Arc<dyn Provider>>,
    auto_mode: bool,
    mutate: impl FnOnce(&mut OrchestratorSettings),
) -> Arc<Orchestrator> {
    let bus = Arc::new(EventBus::new(64));
    let approvals = Arc::new(ApprovalManager::new(
        Arc::clone(&bus),
        auto_mode,
        Duration::from_millis(200),
    ));
    let sessions = Arc::new(SessionManager::new(
        Arc::new(MemoryKvStore::new()),
        Duration::from_secs(3600),
    ));

    let mut settings = OrchestratorSettings {
        per_adapter_timeout: Duration::from_millis(500),
        whole_timeout: Duration::from_secs(5),
        ..OrchestratorSettings::default()
    };
    mutate(&mut settings);

    let registry = Arc::new(ProviderRegistry::new(providers).expect("valid providers"));
    Arc::new(Orchestrator::new(
        registry, bus, approvals, sessions, settings,
    ))
}
