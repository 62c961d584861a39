//! Risk classification and the approval workflow for tool invocations.
//!
//! Adapters submit a [`ToolInvocation`] before executing anything
//! side-effecting. The manager classifies it into a risk tier from the
//! `(sandbox level, auto mode)` rule table, auto-approves low/medium risk
//! in auto mode, and otherwise parks the request as `pending` until a
//! caller resolves it or the approval window elapses. Terminal states are
//! sticky; every transition is published to the analysis event stream as
//! an audit trail (the request object, not the event log, is the source
//! of truth).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::error::ApprovalError;
use crate::events::{AnalysisEvents, EventBus, EventPayload};

/// Sandbox level a tool invocation runs under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SandboxLevel {
    /// No side effects possible.
    #[default]
    ReadOnly,
    /// Side effects confined to a sandbox.
    Isolated,
    /// Unrestricted access.
    FullAccess,
}

impl SandboxLevel {
    /// Stable wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            SandboxLevel::ReadOnly => "read-only",
            SandboxLevel::Isolated => "isolated",
            SandboxLevel::FullAccess => "full-access",
        }
    }

    /// Parse from the wire name.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "read-only" => Some(SandboxLevel::ReadOnly),
            "isolated" => Some(SandboxLevel::Isolated),
            "full-access" => Some(SandboxLevel::FullAccess),
            _ => None,
        }
    }
}

/// Risk tier assigned to a tool invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    /// Stable wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }
}

/// State of an approval request. Terminal states are sticky.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ApprovalState {
    Pending,
    Approved,
    Denied,
    AutoApproved,
    Expired,
}

impl ApprovalState {
    /// Stable wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            ApprovalState::Pending => "pending",
            ApprovalState::Approved => "approved",
            ApprovalState::Denied => "denied",
            ApprovalState::AutoApproved => "auto-approved",
            ApprovalState::Expired => "expired",
        }
    }

    /// Whether this state admits no further transitions.
    pub fn is_terminal(self) -> bool {
        !matches!(self, ApprovalState::Pending)
    }

    /// Whether the gated tool call may proceed.
    pub fn allows_execution(self) -> bool {
        matches!(self, ApprovalState::Approved | ApprovalState::AutoApproved)
    }
}

/// A caller's verdict on a pending request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Approve,
    Deny,
}

impl Decision {
    fn target_state(self) -> ApprovalState {
        match self {
            Decision::Approve => ApprovalState::Approved,
            Decision::Deny => ApprovalState::Denied,
        }
    }
}

/// A tool invocation issued by an adapter, gated before execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInvocation {
    /// Tool name as exposed by the backend.
    pub tool_name: String,
    /// Tool arguments.
    pub arguments: serde_json::Value,
    /// Sandbox the tool would run under.
    pub sandbox_level: SandboxLevel,
    /// Filled in once an approval request has been created.
    pub approval_request_id: Option<String>,
}

/// One approval request and its lifecycle state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    /// Unique request id.
    pub request_id: String,
    /// The tool awaiting approval.
    pub tool_name: String,
    /// The tool's arguments as submitted.
    pub arguments: serde_json::Value,
    /// Classified risk tier.
    pub risk_level: RiskLevel,
    /// When the request was created.
    pub requested_at: DateTime<Utc>,
    /// Current state.
    pub state: ApprovalState,
}

/// Classify a tool invocation into a risk tier.
///
/// Rule table over `(sandbox level, auto mode)`:
///
/// | sandbox     | auto mode | risk     |
/// |-------------|-----------|----------|
/// | full-access | true      | critical |
/// | full-access | false     | high     |
/// | isolated    | any       | medium   |
/// | read-only   | any       | low      |
pub fn classify(sandbox: SandboxLevel, auto_mode: bool) -> RiskLevel {
    match (sandbox, auto_mode) {
        (SandboxLevel::FullAccess, true) => RiskLevel::Critical,
        (SandboxLevel::FullAccess, false) => RiskLevel::High,
        (SandboxLevel::Isolated, _) => RiskLevel::Medium,
        (SandboxLevel::ReadOnly, _) => RiskLevel::Low,
    }
}

/// Heuristic side-effect classification for MCP tool calls.
///
/// Tools whose names read as mutations are gated; read-shaped names pass.
/// Unknown shapes are treated as side-effecting.
pub fn is_side_effecting(tool_name: &str, arguments: &serde_json::Value) -> bool {
    const READ_PREFIXES: [&str; 7] = ["get", "list", "read", "search", "query", "fetch", "describe"];
    const WRITE_PREFIXES: [&str; 9] = [
        "write", "create", "delete", "update", "exec", "run", "deploy", "send", "post",
    ];

    let name = tool_name.to_ascii_lowercase();
    if WRITE_PREFIXES.iter().any(|p| name.starts_with(p)) {
        return true;
    }
    if READ_PREFIXES.iter().any(|p| name.starts_with(p)) {
        // A read-shaped tool that takes a shell command is still a mutation.
        return arguments.get("command").is_some();
    }
    true
}

struct ApprovalEntry {
    request: ApprovalRequest,
    analysis_id: String,
    tx: watch::Sender<ApprovalState>,
}

/// Manages the approval request table and waiters.
///
/// A single writer lock guards the table; waiters block on per-request
/// watch channels so no lock is held across a suspension point.
pub struct ApprovalManager {
    bus: Arc<EventBus>,
    requests: Mutex<HashMap<String, ApprovalEntry>>,
    auto_mode: bool,
    timeout: Duration,
}

impl ApprovalManager {
    /// Create a manager publishing audit events to `bus`.
    pub fn new(bus: Arc<EventBus>, auto_mode: bool, timeout: Duration) -> Self {
        Self {
            bus,
            requests: Mutex::new(HashMap::new()),
            auto_mode,
            timeout,
        }
    }

    /// Whether approvals may auto-resolve.
    pub fn auto_mode(&self) -> bool {
        self.auto_mode
    }

    /// Create an approval request for `tool` on behalf of `analysis_id`.
    ///
    /// Low/medium-risk requests auto-approve when auto mode is on;
    /// everything else starts `pending` and emits `approval_requested`.
    pub fn submit(&self, analysis_id: &str, tool: &ToolInvocation) -> ApprovalRequest {
        let risk = classify(tool.sandbox_level, self.auto_mode);
        let state = if self.auto_mode && matches!(risk, RiskLevel::Low | RiskLevel::Medium) {
            ApprovalState::AutoApproved
        } else {
            ApprovalState::Pending
        };

        let request = ApprovalRequest {
            request_id: uuid::Uuid::new_v4().to_string(),
            tool_name: tool.tool_name.clone(),
            arguments: tool.arguments.clone(),
            risk_level: risk,
            requested_at: Utc::now(),
            state,
        };

        let (tx, _rx) = watch::channel(state);
        {
            let mut requests = self.requests.lock().expect("approval table lock poisoned");
            requests.insert(
                request.request_id.clone(),
                ApprovalEntry {
                    request: request.clone(),
                    analysis_id: analysis_id.to_string(),
                    tx,
                },
            );
        }

        tracing::info!(
            request_id = %request.request_id,
            tool = %request.tool_name,
            risk = request.risk_level.as_str(),
            state = request.state.as_str(),
            "Approval request created"
        );

        let events = AnalysisEvents::new(Arc::clone(&self.bus), analysis_id);
        match state {
            ApprovalState::Pending => {
                events.publish(EventPayload::ApprovalRequested {
                    request_id: request.request_id.clone(),
                    tool_name: request.tool_name.clone(),
                    risk_level: request.risk_level.as_str().to_string(),
                });
            }
            _ => {
                events.publish(EventPayload::ApprovalResolved {
                    request_id: request.request_id.clone(),
                    state: state.as_str().to_string(),
                });
            }
        }

        request
    }

    /// Wait for `request_id` to reach a terminal state.
    ///
    /// A pending request that is neither resolved within the approval
    /// window nor outlives `cancel` transitions to `expired`.
    pub async fn wait(
        &self,
        request_id: &str,
        cancel: &CancellationToken,
    ) -> Result<ApprovalState, ApprovalError> {
        let mut rx = {
            let requests = self.requests.lock().expect("approval table lock poisoned");
            let entry = requests
                .get(request_id)
                .ok_or_else(|| ApprovalError::NotFound {
                    request_id: request_id.to_string(),
                })?;
            entry.tx.subscribe()
        };

        if rx.borrow().is_terminal() {
            return Ok(*rx.borrow());
        }

        let deadline = tokio::time::sleep(self.timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    return Ok(self.expire(request_id));
                }
                () = &mut deadline => {
                    return Ok(self.expire(request_id));
                }
                changed = rx.changed() => {
                    if changed.is_err() {
                        // Manager dropped the entry; treat as expired.
                        return Ok(ApprovalState::Expired);
                    }
                    let state = *rx.borrow();
                    if state.is_terminal() {
                        return Ok(state);
                    }
                }
            }
        }
    }

    /// Resolve a pending request.
    ///
    /// Idempotent: repeating the decision that already resolved the
    /// request is a no-op; a conflicting decision (or resolving an
    /// expired request) fails with `InvalidTransition`.
    pub fn resolve(
        &self,
        request_id: &str,
        decision: Decision,
    ) -> Result<ApprovalState, ApprovalError> {
        let target = decision.target_state();
        let (analysis_id, state) = {
            let mut requests = self.requests.lock().expect("approval table lock poisoned");
            let entry = requests
                .get_mut(request_id)
                .ok_or_else(|| ApprovalError::NotFound {
                    request_id: request_id.to_string(),
                })?;

            match entry.request.state {
                ApprovalState::Pending => {
                    entry.request.state = target;
                    let _ = entry.tx.send(target);
                    (entry.analysis_id.clone(), target)
                }
                current if current == target => return Ok(current),
                // Auto-approval already allowed execution; a repeated
                // approve is a no-op.
                ApprovalState::AutoApproved if decision == Decision::Approve => {
                    return Ok(ApprovalState::AutoApproved);
                }
                current => {
                    return Err(ApprovalError::InvalidTransition {
                        request_id: request_id.to_string(),
                        from: current.as_str().to_string(),
                        to: target.as_str().to_string(),
                    });
                }
            }
        };

        tracing::info!(
            request_id = %request_id,
            state = state.as_str(),
            "Approval request resolved"
        );

        AnalysisEvents::new(Arc::clone(&self.bus), &analysis_id).publish(
            EventPayload::ApprovalResolved {
                request_id: request_id.to_string(),
                state: state.as_str().to_string(),
            },
        );

        Ok(state)
    }

    /// Expire one request if it is still pending. Returns the final state.
    fn expire(&self, request_id: &str) -> ApprovalState {
        let resolved = {
            let mut requests = self.requests.lock().expect("approval table lock poisoned");
            match requests.get_mut(request_id) {
                Some(entry) if entry.request.state == ApprovalState::Pending => {
                    entry.request.state = ApprovalState::Expired;
                    let _ = entry.tx.send(ApprovalState::Expired);
                    Some((entry.analysis_id.clone(), ApprovalState::Expired))
                }
                Some(entry) => return entry.request.state,
                None => None,
            }
        };

        match resolved {
            Some((analysis_id, state)) => {
                tracing::warn!(request_id = %request_id, "Approval request expired");
                AnalysisEvents::new(Arc::clone(&self.bus), &analysis_id).publish(
                    EventPayload::ApprovalResolved {
                        request_id: request_id.to_string(),
                        state: state.as_str().to_string(),
                    },
                );
                state
            }
            None => ApprovalState::Expired,
        }
    }

    /// Expire every pending request belonging to a canceled analysis.
    pub fn expire_analysis(&self, analysis_id: &str) {
        let expired: Vec<String> = {
            let mut requests = self.requests.lock().expect("approval table lock poisoned");
            requests
                .values_mut()
                .filter(|e| {
                    e.analysis_id == analysis_id && e.request.state == ApprovalState::Pending
                })
                .map(|e| {
                    e.request.state = ApprovalState::Expired;
                    let _ = e.tx.send(ApprovalState::Expired);
                    e.request.request_id.clone()
                })
                .collect()
        };

        for request_id in expired {
            AnalysisEvents::new(Arc::clone(&self.bus), analysis_id).publish(
                EventPayload::ApprovalResolved {
                    request_id,
                    state: ApprovalState::Expired.as_str().to_string(),
                },
            );
        }
    }

    /// Fetch a request by id.
    pub fn get(&self, request_id: &str) -> Option<ApprovalRequest> {
        let requests = self.requests.lock().expect("approval table lock poisoned");
        requests.get(request_id).map(|e| e.request.clone())
    }

    /// All currently pending requests, oldest first.
    pub fn pending(&self) -> Vec<ApprovalRequest> {
        let requests = self.requests.lock().expect("approval table lock poisoned");
        let mut pending: Vec<ApprovalRequest> = requests
            .values()
            .filter(|e| e.request.state == ApprovalState::Pending)
            .map(|e| e.request.clone())
            .collect();
        pending.sort_by(|a, b| a.requested_at.cmp(&b.requested_at));
        pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(auto_mode: bool) -> ApprovalManager {
        ApprovalManager::new(
            Arc::new(EventBus::new(64)),
            auto_mode,
            Duration::from_millis(50),
        )
    }

    fn invocation(sandbox: SandboxLevel) -> ToolInvocation {
        ToolInvocation {
            tool_name: "deploy_service".to_string(),
            arguments: serde_json::json!({"target": "prod"}),
            sandbox_level: sandbox,
            approval_request_id: None,
        }
    }

    #[test]
    fn risk_table_matches_contract() {
        assert_eq!(classify(SandboxLevel::FullAccess, true), RiskLevel::Critical);
        assert_eq!(classify(SandboxLevel::FullAccess, false), RiskLevel::High);
        assert_eq!(classify(SandboxLevel::Isolated, true), RiskLevel::Medium);
        assert_eq!(classify(SandboxLevel::Isolated, false), RiskLevel::Medium);
        assert_eq!(classify(SandboxLevel::ReadOnly, true), RiskLevel::Low);
        assert_eq!(classify(SandboxLevel::ReadOnly, false), RiskLevel::Low);
    }

    #[test]
    fn side_effect_heuristic() {
        let none = serde_json::json!({});
        assert!(is_side_effecting("write_file", &none));
        assert!(is_side_effecting("deploy_service", &none));
        assert!(!is_side_effecting("get_weather", &none));
        assert!(!is_side_effecting("list_files", &none));
        // Read-shaped name with a command argument is still gated.
        assert!(is_side_effecting(
            "query_host",
            &serde_json::json!({"command": "rm -rf /"})
        ));
        // Unknown shapes are conservative.
        assert!(is_side_effecting("frobnicate", &none));
    }

    #[tokio::test]
    async fn auto_mode_auto_approves_low_and_medium() {
        let mgr = manager(true);
        let low = mgr.submit("a1", &invocation(SandboxLevel::ReadOnly));
        assert_eq!(low.state, ApprovalState::AutoApproved);

        let medium = mgr.submit("a1", &invocation(SandboxLevel::Isolated));
        assert_eq!(medium.state, ApprovalState::AutoApproved);

        // Critical risk still requires a human even in auto mode.
        let critical = mgr.submit("a1", &invocation(SandboxLevel::FullAccess));
        assert_eq!(critical.state, ApprovalState::Pending);
    }

    #[tokio::test]
    async fn resolve_approves_and_wakes_waiter() {
        let mgr = Arc::new(manager(false));
        let request = mgr.submit("a1", &invocation(SandboxLevel::FullAccess));
        assert_eq!(request.state, ApprovalState::Pending);

        let mgr2 = Arc::clone(&mgr);
        let id = request.request_id.clone();
        let waiter = tokio::spawn(async move {
            mgr2.wait(&id, &CancellationToken::new()).await.unwrap()
        });

        tokio::task::yield_now().await;
        mgr.resolve(&request.request_id, Decision::Approve).unwrap();

        assert_eq!(waiter.await.unwrap(), ApprovalState::Approved);
        assert!(ApprovalState::Approved.allows_execution());
    }

    #[tokio::test]
    async fn resolution_is_idempotent_and_conflicts_fail() {
        let mgr = manager(false);
        let request = mgr.submit("a1", &invocation(SandboxLevel::FullAccess));

        assert_eq!(
            mgr.resolve(&request.request_id, Decision::Deny).unwrap(),
            ApprovalState::Denied
        );
        // Repeating the same decision is a no-op.
        assert_eq!(
            mgr.resolve(&request.request_id, Decision::Deny).unwrap(),
            ApprovalState::Denied
        );
        // A conflicting decision fails.
        let err = mgr
            .resolve(&request.request_id, Decision::Approve)
            .unwrap_err();
        assert!(matches!(err, ApprovalError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn pending_request_expires_after_window() {
        let mgr = manager(false);
        let request = mgr.submit("a1", &invocation(SandboxLevel::FullAccess));

        let state = mgr
            .wait(&request.request_id, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(state, ApprovalState::Expired);
        assert_eq!(mgr.get(&request.request_id).unwrap().state, ApprovalState::Expired);

        // Expired is terminal: resolving now is an invalid transition.
        let err = mgr
            .resolve(&request.request_id, Decision::Approve)
            .unwrap_err();
        assert!(matches!(err, ApprovalError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn cancellation_expires_pending_requests() {
        let mgr = manager(false);
        let request = mgr.submit("a1", &invocation(SandboxLevel::FullAccess));

        let cancel = CancellationToken::new();
        cancel.cancel();
        let state = mgr.wait(&request.request_id, &cancel).await.unwrap();
        assert_eq!(state, ApprovalState::Expired);
    }

    #[tokio::test]
    async fn expire_analysis_only_touches_that_analysis() {
        let mgr = manager(false);
        let mine = mgr.submit("a1", &invocation(SandboxLevel::FullAccess));
        let other = mgr.submit("a2", &invocation(SandboxLevel::FullAccess));

        mgr.expire_analysis("a1");

        assert_eq!(mgr.get(&mine.request_id).unwrap().state, ApprovalState::Expired);
        assert_eq!(mgr.get(&other.request_id).unwrap().state, ApprovalState::Pending);
    }

    #[tokio::test]
    async fn audit_events_are_published() {
        let bus = Arc::new(EventBus::new(64));
        let sub = bus.subscribe("a1", "audit");
        let mgr = ApprovalManager::new(Arc::clone(&bus), false, Duration::from_secs(60));

        let request = mgr.submit("a1", &invocation(SandboxLevel::FullAccess));
        mgr.resolve(&request.request_id, Decision::Approve).unwrap();
        bus.finish("a1");

        let first = sub.recv().await.unwrap();
        assert_eq!(first.payload.tag(), "approval_requested");
        let second = sub.recv().await.unwrap();
        assert_eq!(second.payload.tag(), "approval_resolved");
    }

    #[test]
    fn wait_on_unknown_request_fails() {
        let mgr = manager(false);
        let err = tokio_test::block_on(mgr.wait("missing", &CancellationToken::new())).unwrap_err();
        assert!(matches!(err, ApprovalError::NotFound { .. }));
    }
}
