//! Dispatching a provider selection, in parallel or as a sequential chain.
//!
//! Parallel mode invokes every selected adapter concurrently under a
//! per-adapter deadline and tolerates partial failure: the dispatch
//! succeeds when at least `min_providers` adapters produce a usable
//! response. Sequential mode invokes adapters one at a time, feeding each
//! step the concatenated prior responses, and exits early once the
//! running best confidence clears `confidence_floor + 0.15` on two
//! consecutive steps.
//!
//! Failure semantics: adapter timeouts and parse failures become errored
//! votes (never retried within the same dispatch); the whole-dispatch
//! deadline cancels stragglers and proceeds when enough responses have
//! already been collected.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;

use crate::error::{DispatchError, ProviderError, ProviderFailure};
use crate::events::EventPayload;
use crate::provider::registry::Selection;
use crate::provider::{InvocationContext, ProviderResponse};

/// How the selected adapters are driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
    #[default]
    Parallel,
    Sequential,
}

impl DispatchMode {
    /// Stable wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            DispatchMode::Parallel => "parallel",
            DispatchMode::Sequential => "sequential",
        }
    }

    /// Parse from the wire name.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "parallel" => Some(DispatchMode::Parallel),
            "sequential" => Some(DispatchMode::Sequential),
            _ => None,
        }
    }
}

/// Options controlling one dispatch.
#[derive(Debug, Clone)]
pub struct DispatchOptions {
    /// Parallel or sequential execution.
    pub mode: DispatchMode,
    /// Minimum number of successful responses for the dispatch to succeed.
    pub min_providers: usize,
    /// Overall dispatch deadline.
    pub whole_timeout: Duration,
    /// In parallel mode, cancel still-running adapters once success is
    /// guaranteed. When off, every adapter runs to completion so its
    /// output can still contribute to consensus.
    pub eager: bool,
    /// Confidence floor; the sequential early-exit threshold is this
    /// plus 0.15.
    pub confidence_floor: f64,
}

/// Margin above the confidence floor that triggers sequential early exit.
const EARLY_EXIT_MARGIN: f64 = 0.15;

/// Consecutive qualifying steps required for sequential early exit.
const EARLY_EXIT_STREAK: u32 = 2;

/// Grace period to drain in-flight adapters after the whole-dispatch
/// deadline fires.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Characters of response content carried in `provider_response` events.
const PREVIEW_CHARS: usize = 120;

/// Drive the selection under `opts`. The invocation context carries the
/// per-adapter deadline, cancellation token, and event publisher.
pub async fn dispatch(
    selection: &Selection,
    query: &str,
    opts: &DispatchOptions,
    ctx: &InvocationContext,
) -> Result<Vec<ProviderResponse>, DispatchError> {
    match opts.mode {
        DispatchMode::Parallel => run_parallel(selection, query, opts, ctx).await,
        DispatchMode::Sequential => run_sequential(selection, query, opts, ctx).await,
    }
}

async fn run_parallel(
    selection: &Selection,
    query: &str,
    opts: &DispatchOptions,
    ctx: &InvocationContext,
) -> Result<Vec<ProviderResponse>, DispatchError> {
    let child_cancel = ctx.cancel.child_token();
    let mut set: JoinSet<(usize, ProviderResponse)> = JoinSet::new();

    for (index, provider) in selection.providers.iter().enumerate() {
        let provider = std::sync::Arc::clone(provider);
        let query = query.to_string();
        let mut task_ctx = ctx.clone();
        task_ctx.cancel = child_cancel.clone();

        set.spawn(async move {
            let descriptor = provider.describe().clone();
            task_ctx.events.publish(EventPayload::Thinking {
                provider_id: descriptor.id.clone(),
                content: format!("invoking {}", descriptor.name),
            });

            let started = Instant::now();
            let result = provider.invoke(&query, &task_ctx).await;
            let latency_ms = started.elapsed().as_millis() as u64;

            let response = match result {
                Ok(output) => ProviderResponse::from_output(&descriptor, output, latency_ms),
                Err(err) => {
                    tracing::warn!(
                        provider = %descriptor.id,
                        reason = err.reason_code(),
                        error = %err,
                        "Provider invocation failed"
                    );
                    ProviderResponse::from_error(&descriptor, &err, latency_ms)
                }
            };

            task_ctx.events.publish(EventPayload::ProviderResponse {
                provider_id: response.provider_id.clone(),
                confidence: response.confidence,
                latency_ms: response.latency_ms,
                errored: !response.is_success(),
                preview: preview(&response.content),
            });

            (index, response)
        });
    }

    let total = selection.providers.len();
    let mut slots: Vec<Option<ProviderResponse>> = (0..total).map(|_| None).collect();
    let mut successes = 0usize;

    let deadline = tokio::time::sleep(opts.whole_timeout);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            biased;
            () = ctx.cancel.cancelled() => {
                child_cancel.cancel();
                drain(&mut set, &mut slots, DRAIN_GRACE).await;
                return Err(DispatchError::Canceled);
            }
            () = &mut deadline => {
                tracing::warn!(
                    timeout_ms = opts.whole_timeout.as_millis() as u64,
                    "Whole-dispatch deadline reached, canceling stragglers"
                );
                child_cancel.cancel();
                drain(&mut set, &mut slots, DRAIN_GRACE).await;
                break;
            }
            joined = set.join_next() => {
                match joined {
                    None => break,
                    Some(Ok((index, response))) => {
                        if response.is_success() {
                            successes += 1;
                            if opts.eager && successes >= opts.min_providers {
                                child_cancel.cancel();
                            }
                        }
                        slots[index] = Some(response);
                    }
                    Some(Err(join_err)) => {
                        tracing::error!(error = %join_err, "Provider task failed to join");
                    }
                }
            }
        }
    }

    // Adapters that never reported are counted as timed out.
    let responses: Vec<ProviderResponse> = slots
        .into_iter()
        .enumerate()
        .map(|(index, slot)| {
            slot.unwrap_or_else(|| {
                let descriptor = selection.providers[index].describe();
                ProviderResponse::from_error(
                    descriptor,
                    &ProviderError::Timeout {
                        seconds: opts.whole_timeout.as_secs(),
                    },
                    opts.whole_timeout.as_millis() as u64,
                )
            })
        })
        .collect();

    finish(responses, opts.min_providers)
}

async fn run_sequential(
    selection: &Selection,
    query: &str,
    opts: &DispatchOptions,
    ctx: &InvocationContext,
) -> Result<Vec<ProviderResponse>, DispatchError> {
    let started = Instant::now();
    let base_context = ctx.context.clone();
    let mut responses: Vec<ProviderResponse> = Vec::with_capacity(selection.providers.len());
    let mut best_confidence = 0.0f64;
    let mut streak = 0u32;

    for provider in &selection.providers {
        if ctx.cancel.is_cancelled() {
            return Err(DispatchError::Canceled);
        }
        if started.elapsed() >= opts.whole_timeout {
            tracing::warn!("Whole-dispatch deadline reached mid-chain");
            break;
        }

        let descriptor = provider.describe().clone();
        let mut step_ctx = ctx.clone();
        step_ctx.context = chain_context(base_context.as_deref(), &responses);

        step_ctx.events.publish(EventPayload::Thinking {
            provider_id: descriptor.id.clone(),
            content: format!("chain step {} of {}", responses.len() + 1, selection.providers.len()),
        });

        let step_started = Instant::now();
        let result = provider.invoke(query, &step_ctx).await;
        let latency_ms = step_started.elapsed().as_millis() as u64;

        let response = match result {
            Ok(output) => ProviderResponse::from_output(&descriptor, output, latency_ms),
            Err(ProviderError::Canceled) => return Err(DispatchError::Canceled),
            Err(err) => {
                tracing::warn!(
                    provider = %descriptor.id,
                    reason = err.reason_code(),
                    error = %err,
                    "Chain step failed"
                );
                ProviderResponse::from_error(&descriptor, &err, latency_ms)
            }
        };

        step_ctx.events.publish(EventPayload::ProviderResponse {
            provider_id: response.provider_id.clone(),
            confidence: response.confidence,
            latency_ms: response.latency_ms,
            errored: !response.is_success(),
            preview: preview(&response.content),
        });

        if response.is_success() {
            best_confidence = best_confidence.max(response.confidence);
        }
        responses.push(response);

        if best_confidence > opts.confidence_floor + EARLY_EXIT_MARGIN {
            streak += 1;
            if streak >= EARLY_EXIT_STREAK {
                tracing::debug!(
                    steps = responses.len(),
                    best_confidence,
                    "Sequential chain exiting early"
                );
                break;
            }
        } else {
            streak = 0;
        }
    }

    finish(responses, opts.min_providers)
}

/// Build the accumulated context for a chain step: the base context
/// followed by every prior successful response.
fn chain_context(base: Option<&str>, prior: &[ProviderResponse]) -> Option<String> {
    let mut sections: Vec<String> = Vec::new();
    if let Some(base) = base {
        if !base.is_empty() {
            sections.push(base.to_string());
        }
    }
    let prior_block: Vec<String> = prior
        .iter()
        .filter(|r| r.is_success())
        .map(|r| format!("[{}] {}", r.provider_id, r.content))
        .collect();
    if !prior_block.is_empty() {
        sections.push(format!("Prior responses:\n{}", prior_block.join("\n")));
    }
    if sections.is_empty() {
        None
    } else {
        Some(sections.join("\n\n"))
    }
}

/// Collect late task results for up to `grace`, then abort the rest.
async fn drain(
    set: &mut JoinSet<(usize, ProviderResponse)>,
    slots: &mut [Option<ProviderResponse>],
    grace: Duration,
) {
    let deadline = tokio::time::sleep(grace);
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            () = &mut deadline => break,
            joined = set.join_next() => match joined {
                None => break,
                Some(Ok((index, response))) => slots[index] = Some(response),
                Some(Err(_)) => {}
            }
        }
    }
    set.abort_all();
}

fn finish(
    responses: Vec<ProviderResponse>,
    min_providers: usize,
) -> Result<Vec<ProviderResponse>, DispatchError> {
    let successful = responses.iter().filter(|r| r.is_success()).count();
    if successful >= min_providers {
        return Ok(responses);
    }

    let failures: Vec<ProviderFailure> = responses
        .iter()
        .filter_map(|r| {
            r.error.as_ref().map(|e| ProviderFailure {
                provider_id: r.provider_id.clone(),
                reason_code: e.reason_code.clone(),
                message: e.message.clone(),
            })
        })
        .collect();

    Err(DispatchError::InsufficientProviders {
        successful,
        required: min_providers,
        failures,
    })
}

fn preview(content: &str) -> String {
    let mut preview: String = content.chars().take(PREVIEW_CHARS).collect();
    if content.chars().count() > PREVIEW_CHARS {
        preview.push('…');
    }
    preview
}
