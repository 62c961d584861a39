//! Typed analysis events and the publish/subscribe event bus.
//!
//! Every analysis owns one event stream. Publishers funnel through a
//! per-analysis serialization point (the stream lock), which assigns
//! strictly increasing sequence numbers starting at 1 and fans the event
//! out to each subscriber's bounded buffer. Subscribers consume in FIFO
//! order. When a buffer is full, the oldest non-critical event is dropped
//! and replaced by a `dropped` sentinel covering the gap; critical events
//! are never dropped: if one cannot be buffered, the subscription is
//! closed with `overflow`.

mod bus;

pub use bus::{AnalysisEvents, CloseReason, EventBus, EventSubscription};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One event on an analysis stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// The analysis this event belongs to.
    pub analysis_id: String,
    /// Per-analysis sequence number, starting at 1. A `dropped` sentinel
    /// carries the last sequence number of the range it covers.
    pub sequence: u64,
    /// Wall-clock publication time.
    pub timestamp: DateTime<Utc>,
    /// The event body.
    #[serde(flatten)]
    pub payload: EventPayload,
}

/// Tagged union of event bodies.
///
/// The tag doubles as the SSE event name when a transport layer exposes
/// the stream over HTTP.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    /// An intermediate reasoning step from a provider or the dispatcher.
    Thinking {
        /// The provider about to be (or being) invoked.
        provider_id: String,
        /// Free-form progress text.
        content: String,
    },

    /// A provider finished (successfully or not).
    ProviderResponse {
        /// Which provider responded.
        provider_id: String,
        /// Self-reported or derived confidence.
        confidence: f64,
        /// Invocation latency in milliseconds.
        latency_ms: u64,
        /// Whether the response is an errored vote.
        errored: bool,
        /// Truncated response preview.
        preview: String,
    },

    /// Progress through consensus computation.
    ConsensusUpdate {
        /// Which stage of the consensus pipeline.
        stage: String,
        /// Stage detail for display.
        detail: String,
    },

    /// Terminal success event carrying the selected answer.
    FinalAnswer {
        /// The winning provider.
        winner_provider_id: String,
        /// Combined confidence of the consensus.
        confidence: f64,
        /// The winning content.
        content: String,
    },

    /// Terminal failure event.
    Error {
        /// Stable failure kind from the error taxonomy.
        kind: String,
        /// Display-safe message.
        message: String,
    },

    /// A risky tool invocation is waiting on approval.
    ApprovalRequested {
        /// The approval request id, for `resolve_approval`.
        request_id: String,
        /// The tool awaiting approval.
        tool_name: String,
        /// Risk classification (`low` … `critical`).
        risk_level: String,
    },

    /// An approval request reached a terminal state.
    ApprovalResolved {
        /// The approval request id.
        request_id: String,
        /// Terminal state (`approved`, `denied`, `auto-approved`, `expired`).
        state: String,
    },

    /// A non-fatal advisory (e.g. `rotation_relaxed`,
    /// `consensus_below_threshold`).
    Warning {
        /// Stable warning code.
        code: String,
        /// Display-safe message.
        message: String,
    },

    /// Terminal event for a caller-canceled analysis.
    Canceled,

    /// Sentinel covering events dropped for a lagging subscriber.
    Dropped {
        /// First dropped sequence number.
        covers_from: u64,
        /// Last dropped sequence number.
        covers_to: u64,
    },
}

impl EventPayload {
    /// The event tag (stable wire name).
    pub fn tag(&self) -> &'static str {
        match self {
            EventPayload::Thinking { .. } => "thinking",
            EventPayload::ProviderResponse { .. } => "provider_response",
            EventPayload::ConsensusUpdate { .. } => "consensus_update",
            EventPayload::FinalAnswer { .. } => "final_answer",
            EventPayload::Error { .. } => "error",
            EventPayload::ApprovalRequested { .. } => "approval_requested",
            EventPayload::ApprovalResolved { .. } => "approval_resolved",
            EventPayload::Warning { .. } => "warning",
            EventPayload::Canceled => "canceled",
            EventPayload::Dropped { .. } => "dropped",
        }
    }

    /// Critical events are never dropped from a subscriber buffer.
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            EventPayload::FinalAnswer { .. }
                | EventPayload::Error { .. }
                | EventPayload::ApprovalRequested { .. }
                | EventPayload::ApprovalResolved { .. }
                | EventPayload::Canceled
        )
    }

    /// Sentinels are bookkeeping; they never count toward buffer capacity
    /// and are never themselves dropped.
    pub fn is_sentinel(&self) -> bool {
        matches!(self, EventPayload::Dropped { .. })
    }
}
