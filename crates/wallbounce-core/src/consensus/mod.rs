//! Agreement scoring and consensus selection over provider responses.
//!
//! Similarity is the Jaccard coefficient over lowercased
//! whitespace-delimited tokens: symmetric, in [0, 1], and monotone with
//! shared-token count. Each response's agreement score is its mean
//! similarity to every other successful response; errored votes carry an
//! agreement of zero and never win. Consensus is deterministic for a
//! given set of responses: the winner tie-break chain is total.

use serde::{Deserialize, Serialize};

use crate::error::ConsensusError;
use crate::provider::ProviderResponse;

/// Quality banding of a consensus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityTier {
    High,
    Medium,
    Low,
}

impl QualityTier {
    /// Stable wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            QualityTier::High => "high",
            QualityTier::Medium => "medium",
            QualityTier::Low => "low",
        }
    }
}

/// One response plus its computed agreement score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vote {
    /// The underlying provider response.
    pub response: ProviderResponse,
    /// Mean pairwise similarity to the other successful responses.
    pub agreement_score: f64,
}

/// The selected winner plus supporting votes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Consensus {
    /// Provider id of the winning response.
    pub winner_provider_id: String,
    /// The winning content.
    pub content: String,
    /// Combined confidence: mean of the winner's self-confidence and the
    /// average agreement across all votes.
    pub confidence: f64,
    /// Human-readable account of how the winner was chosen.
    pub reasoning: String,
    /// Every vote, successful and errored, in input order.
    pub votes: Vec<Vote>,
    /// Quality banding from mean confidence and agreement variance.
    pub quality: QualityTier,
    /// Whether the combined confidence fell below the consensus floor.
    pub below_threshold: bool,
}

/// Options for consensus computation.
#[derive(Debug, Clone)]
pub struct ConsensusOptions {
    /// Minimum successful votes required.
    pub min_providers: usize,
    /// Agreement floor below which the consensus is flagged.
    pub consensus_floor: f64,
    /// Whether falling below the floor sets the flag at all.
    pub require_consensus: bool,
}

/// Jaccard similarity over lowercased whitespace tokens.
///
/// Symmetric, in [0, 1], and 1.0 for two empty strings' token sets is
/// defined as 0 (no shared evidence).
pub fn similarity(a: &str, b: &str) -> f64 {
    let tokens_a = token_set(a);
    let tokens_b = token_set(b);
    if tokens_a.is_empty() && tokens_b.is_empty() {
        return 0.0;
    }
    let intersection = tokens_a.intersection(&tokens_b).count();
    let union = tokens_a.union(&tokens_b).count();
    intersection as f64 / union as f64
}

fn token_set(text: &str) -> std::collections::HashSet<String> {
    text.split_whitespace()
        .map(str::to_lowercase)
        .collect()
}

/// Compute the consensus over `responses`.
///
/// `responses` must contain at least `min_providers` successful votes;
/// errored votes are carried through with a zero agreement score.
pub fn build(
    responses: Vec<ProviderResponse>,
    opts: &ConsensusOptions,
) -> Result<Consensus, ConsensusError> {
    let successful: Vec<usize> = responses
        .iter()
        .enumerate()
        .filter(|(_, r)| r.is_success())
        .map(|(i, _)| i)
        .collect();

    if successful.len() < opts.min_providers {
        return Err(ConsensusError::NotEnoughVotes {
            got: successful.len(),
            required: opts.min_providers,
        });
    }

    // Pairwise agreement among successful responses.
    let mut agreement = vec![0.0f64; responses.len()];
    for &i in &successful {
        if successful.len() > 1 {
            let total: f64 = successful
                .iter()
                .filter(|&&j| j != i)
                .map(|&j| similarity(&responses[i].content, &responses[j].content))
                .sum();
            agreement[i] = total / (successful.len() - 1) as f64;
        }
    }

    // Winner: highest confidence; ties broken by agreement, latency,
    // tier, then provider id, in that order.
    let winner_index = *successful
        .iter()
        .max_by(|&&a, &&b| {
            let (ra, rb) = (&responses[a], &responses[b]);
            ra.confidence
                .total_cmp(&rb.confidence)
                .then_with(|| agreement[a].total_cmp(&agreement[b]))
                .then_with(|| rb.latency_ms.cmp(&ra.latency_ms))
                .then_with(|| rb.tier.cmp(&ra.tier))
                .then_with(|| rb.provider_id.cmp(&ra.provider_id))
        })
        .expect("at least min_providers successful votes");
    let winner = &responses[winner_index];

    let mean_agreement = agreement.iter().sum::<f64>() / agreement.len() as f64;
    let confidence = ((winner.confidence + mean_agreement) / 2.0).clamp(0.0, 1.0);

    let quality = quality_tier(&responses, &successful, &agreement);
    let below_threshold = opts.require_consensus && confidence < opts.consensus_floor;

    let reasoning = build_reasoning(&responses, &successful, winner, mean_agreement);

    let winner_provider_id = winner.provider_id.clone();
    let content = winner.content.clone();
    let votes = responses
        .into_iter()
        .zip(agreement)
        .map(|(response, agreement_score)| Vote {
            response,
            agreement_score,
        })
        .collect();

    Ok(Consensus {
        winner_provider_id,
        content,
        confidence,
        reasoning,
        votes,
        quality,
        below_threshold,
    })
}

/// Quality banding: `high` needs mean self-confidence above 0.8 with
/// agreement variance under 0.2; `medium` needs mean above 0.6 with
/// variance under 0.4.
fn quality_tier(responses: &[ProviderResponse], successful: &[usize], agreement: &[f64]) -> QualityTier {
    let mean_confidence =
        successful.iter().map(|&i| responses[i].confidence).sum::<f64>() / successful.len() as f64;

    let mean_agreement = agreement.iter().sum::<f64>() / agreement.len() as f64;
    let variance = agreement
        .iter()
        .map(|a| (a - mean_agreement).powi(2))
        .sum::<f64>()
        / agreement.len() as f64;

    if mean_confidence > 0.8 && variance < 0.2 {
        QualityTier::High
    } else if mean_confidence > 0.6 && variance < 0.4 {
        QualityTier::Medium
    } else {
        QualityTier::Low
    }
}

fn build_reasoning(
    responses: &[ProviderResponse],
    successful: &[usize],
    winner: &ProviderResponse,
    mean_agreement: f64,
) -> String {
    let provider_list: Vec<&str> = responses.iter().map(|r| r.provider_id.as_str()).collect();

    let confidences: Vec<f64> = successful.iter().map(|&i| responses[i].confidence).collect();
    let min_confidence = confidences.iter().copied().fold(f64::INFINITY, f64::min);
    let max_confidence = confidences.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    let mut reasoning = format!(
        "providers: {} | winner: {} (confidence {:.2}) | mean agreement {:.2} | confidence range {:.2}..{:.2}",
        provider_list.join(", "),
        winner.provider_id,
        winner.confidence,
        mean_agreement,
        min_confidence,
        max_confidence,
    );
    if !winner.reasoning.is_empty() {
        reasoning.push_str(" | winner reasoning: ");
        reasoning.push_str(&winner.reasoning);
    }
    reasoning
}
