//! MCP-client provider adapter.
//!
//! Speaks the Model Context Protocol over standard input/output to a
//! separate server process. One long-lived client is kept per server;
//! rmcp multiplexes concurrent requests by request id. Before calling a
//! tool classified as side-effecting, the call is routed through the
//! approval manager; a denied or expired approval fails the invocation
//! with a typed, non-retryable error.

use std::borrow::Cow;
use std::time::{Duration, Instant};

use rmcp::model::{CallToolRequestParams, CallToolResult, Content, RawContent};
use rmcp::service::{RoleClient, RunningService};
use rmcp::transport::child_process::TokioChildProcess;
use rmcp::ServiceExt;

use super::{
    HealthStatus, InvocationContext, Provider, ProviderDescriptor, ProviderOutput, TokenUsage,
};
use crate::approval::{is_side_effecting, ToolInvocation};
use crate::error::ProviderError;
use crate::safety::redact_secrets;

/// Default tool invoked to obtain a completion from the server.
const DEFAULT_COMPLETION_TOOL: &str = "generate";

/// Default per-tool-invocation deadline.
const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(25);

/// Provider adapter over a Model Context Protocol server.
pub struct McpProvider {
    descriptor: ProviderDescriptor,
    service: RunningService<RoleClient, ()>,
    completion_tool: String,
    tool_timeout: Duration,
}

impl McpProvider {
    /// Connect to an MCP server by spawning it as a child process.
    ///
    /// The command must be a `tokio::process::Command` configured with an
    /// explicit argument vector (the transport never involves a shell).
    pub async fn connect_stdio(
        descriptor: ProviderDescriptor,
        command: tokio::process::Command,
    ) -> Result<Self, ProviderError> {
        let transport = TokioChildProcess::new(command)
            .map_err(|e| ProviderError::Connection(e.to_string()))?;
        let service = ()
            .serve(transport)
            .await
            .map_err(|e| ProviderError::Connection(e.to_string()))?;
        Ok(Self {
            descriptor,
            service,
            completion_tool: DEFAULT_COMPLETION_TOOL.to_string(),
            tool_timeout: DEFAULT_TOOL_TIMEOUT,
        })
    }

    /// Override the completion tool name (default `generate`).
    pub fn with_completion_tool(mut self, tool: impl Into<String>) -> Self {
        self.completion_tool = tool.into();
        self
    }

    /// Override the per-tool-invocation deadline (default 25 s).
    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = timeout;
        self
    }

    /// Shut down the client connection.
    pub async fn close(self) -> Result<(), ProviderError> {
        self.service
            .cancel()
            .await
            .map_err(|e| ProviderError::Connection(e.to_string()))?;
        Ok(())
    }

    async fn call_completion_tool(
        &self,
        arguments: serde_json::Value,
    ) -> Result<ProviderOutput, ProviderError> {
        let params = CallToolRequestParams {
            meta: None,
            name: Cow::Owned(self.completion_tool.clone()),
            arguments: arguments.as_object().cloned(),
            task: None,
        };

        let result: CallToolResult = self
            .service
            .call_tool(params)
            .await
            .map_err(|e| ProviderError::Protocol(redact_secrets(&e.to_string())))?;

        if result.is_error == Some(true) {
            let message = extract_text(&result.content);
            return Err(ProviderError::Protocol(redact_secrets(&message)));
        }

        output_from_parts(result.structured_content, extract_text(&result.content))
    }
}

/// Gate a tool invocation through the approval manager when it is
/// classified as side-effecting.
pub(crate) async fn gate_tool_call(
    ctx: &InvocationContext,
    tool: &ToolInvocation,
) -> Result<(), ProviderError> {
    if !is_side_effecting(&tool.tool_name, &tool.arguments) {
        return Ok(());
    }

    let request = ctx.approvals.submit(&ctx.analysis_id, tool);
    let state = if request.state.is_terminal() {
        request.state
    } else {
        ctx.approvals
            .wait(&request.request_id, &ctx.cancel)
            .await
            .map_err(|e| ProviderError::Protocol(e.to_string()))?
    };

    if state.allows_execution() {
        Ok(())
    } else {
        Err(ProviderError::ApprovalDenied {
            tool_name: tool.tool_name.clone(),
        })
    }
}

/// Build a [`ProviderOutput`] from an MCP tool result.
///
/// Structured content takes precedence and may carry `content`,
/// `confidence`, `reasoning`, and token counts; otherwise the
/// concatenated text blocks are the response.
fn output_from_parts(
    structured: Option<serde_json::Value>,
    text: String,
) -> Result<ProviderOutput, ProviderError> {
    if let Some(value) = structured {
        let content = value
            .get("content")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| {
                ProviderError::Parse("structured result missing 'content' field".into())
            })?;
        return Ok(ProviderOutput {
            content,
            confidence: value.get("confidence").and_then(serde_json::Value::as_f64),
            reasoning: value
                .get("reasoning")
                .and_then(|v| v.as_str())
                .map(str::to_string),
            usage: TokenUsage {
                input_tokens: value
                    .get("input_tokens")
                    .and_then(serde_json::Value::as_u64)
                    .unwrap_or(0) as u32,
                output_tokens: value
                    .get("output_tokens")
                    .and_then(serde_json::Value::as_u64)
                    .unwrap_or(0) as u32,
            },
        });
    }

    if text.trim().is_empty() {
        return Err(ProviderError::Parse("tool result carried no text".into()));
    }
    Ok(ProviderOutput {
        content: text.trim().to_string(),
        ..Default::default()
    })
}

/// Extract text from MCP content blocks.
fn extract_text(content: &[Content]) -> String {
    content
        .iter()
        .filter_map(|c| match &c.raw {
            RawContent::Text(t) => Some(t.text.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[async_trait::async_trait]
impl Provider for McpProvider {
    fn describe(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    async fn invoke(
        &self,
        query: &str,
        ctx: &InvocationContext,
    ) -> Result<ProviderOutput, ProviderError> {
        let prompt = ctx.full_prompt(query);
        let arguments = serde_json::json!({ "prompt": prompt });

        let tool = ToolInvocation {
            tool_name: self.completion_tool.clone(),
            arguments: arguments.clone(),
            sandbox_level: ctx.sandbox_level,
            approval_request_id: None,
        };
        gate_tool_call(ctx, &tool).await?;

        tracing::debug!(
            provider = %self.descriptor.id,
            tool = %self.completion_tool,
            "MCP provider invoked"
        );

        // Dropping the in-flight call abandons the multiplexed request;
        // rmcp discards the late reply by request id.
        let deadline = self.tool_timeout.min(ctx.timeout);
        tokio::select! {
            biased;
            () = ctx.cancel.cancelled() => Err(ProviderError::Canceled),
            () = tokio::time::sleep(deadline) => {
                Err(ProviderError::Timeout { seconds: deadline.as_secs() })
            }
            result = self.call_completion_tool(arguments) => result,
        }
    }

    async fn health_check(&self) -> HealthStatus {
        let started = Instant::now();
        match tokio::time::timeout(Duration::from_secs(5), self.service.list_all_tools()).await {
            Ok(Ok(_)) => HealthStatus {
                ok: true,
                latency_ms: started.elapsed().as_millis() as u64,
                detail: None,
            },
            Ok(Err(e)) => HealthStatus {
                ok: false,
                latency_ms: started.elapsed().as_millis() as u64,
                detail: Some(redact_secrets(&e.to_string())),
            },
            Err(_) => HealthStatus {
                ok: false,
                latency_ms: started.elapsed().as_millis() as u64,
                detail: Some("health probe timed out".into()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approval::{ApprovalManager, SandboxLevel};
    use crate::events::{AnalysisEvents, EventBus};
    use crate::provider::{Capability, InvocationKind};
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    fn ctx(auto_mode: bool, sandbox: SandboxLevel) -> InvocationContext {
        let bus = Arc::new(EventBus::new(64));
        InvocationContext {
            analysis_id: "a1".into(),
            context: None,
            timeout: Duration::from_secs(5),
            cancel: CancellationToken::new(),
            sandbox_level: sandbox,
            events: AnalysisEvents::new(Arc::clone(&bus), "a1"),
            approvals: Arc::new(ApprovalManager::new(
                bus,
                auto_mode,
                Duration::from_millis(50),
            )),
        }
    }

    #[test]
    fn structured_result_takes_precedence() {
        let structured = serde_json::json!({
            "content": "structured answer",
            "confidence": 0.75,
            "reasoning": "compared notes",
            "input_tokens": 20,
            "output_tokens": 8
        });
        let output = output_from_parts(Some(structured), "ignored text".into()).unwrap();
        assert_eq!(output.content, "structured answer");
        assert_eq!(output.confidence, Some(0.75));
        assert_eq!(output.reasoning.as_deref(), Some("compared notes"));
        assert_eq!(output.usage.input_tokens, 20);
    }

    #[test]
    fn text_result_is_used_when_no_structured_content() {
        let output = output_from_parts(None, "  plain text  ".into()).unwrap();
        assert_eq!(output.content, "plain text");
        assert_eq!(output.confidence, None);
    }

    #[test]
    fn empty_result_is_a_parse_error() {
        let err = output_from_parts(None, String::new()).unwrap_err();
        assert!(matches!(err, ProviderError::Parse(_)));
    }

    #[test]
    fn structured_result_without_content_is_a_parse_error() {
        let err =
            output_from_parts(Some(serde_json::json!({"confidence": 0.5})), String::new())
                .unwrap_err();
        assert!(matches!(err, ProviderError::Parse(_)));
    }

    #[tokio::test]
    async fn read_shaped_tools_skip_the_approval_gate() {
        let ctx = ctx(false, SandboxLevel::ReadOnly);
        let tool = ToolInvocation {
            tool_name: "get_completion".into(),
            arguments: serde_json::json!({"prompt": "hi"}),
            sandbox_level: SandboxLevel::ReadOnly,
            approval_request_id: None,
        };
        // No pending approval is created and the gate passes immediately.
        gate_tool_call(&ctx, &tool).await.unwrap();
        assert!(ctx.approvals.pending().is_empty());
    }

    #[tokio::test]
    async fn side_effecting_tool_auto_approves_in_auto_mode() {
        let ctx = ctx(true, SandboxLevel::Isolated);
        let tool = ToolInvocation {
            tool_name: "run_pipeline".into(),
            arguments: serde_json::json!({"target": "staging"}),
            sandbox_level: SandboxLevel::Isolated,
            approval_request_id: None,
        };
        gate_tool_call(&ctx, &tool).await.unwrap();
    }

    #[tokio::test]
    async fn unresolved_side_effecting_tool_expires_and_denies() {
        let ctx = ctx(false, SandboxLevel::FullAccess);
        let tool = ToolInvocation {
            tool_name: "deploy_service".into(),
            arguments: serde_json::json!({"target": "prod"}),
            sandbox_level: SandboxLevel::FullAccess,
            approval_request_id: None,
        };
        let err = gate_tool_call(&ctx, &tool).await.unwrap_err();
        assert!(matches!(err, ProviderError::ApprovalDenied { .. }));
        assert!(!err.retryable());
    }

    /// Integration test against a real MCP server binary.
    #[tokio::test]
    #[ignore]
    async fn integration_connect_and_invoke() {
        let descriptor = ProviderDescriptor {
            id: "mcp-everything".into(),
            name: "Everything Server".into(),
            vendor: "modelcontextprotocol".into(),
            tier: 2,
            capabilities: vec![Capability::Analysis],
            cost_per_token: 0.0,
            kind: InvocationKind::McpClient,
        };
        let mut cmd = tokio::process::Command::new("npx");
        cmd.arg("-y").arg("@modelcontextprotocol/server-everything");
        let provider = McpProvider::connect_stdio(descriptor, cmd).await.unwrap();
        let health = provider.health_check().await;
        assert!(health.ok);
        provider.close().await.unwrap();
    }
}
