//! Cost estimation for provider invocations.
//!
//! Provides per-token pricing for known vendors and computes estimated
//! costs. Prices are in USD per million tokens; local/unknown vendors
//! fall back to the descriptor's configured per-token estimate.

use super::{ProviderDescriptor, TokenUsage};

/// Per-token pricing for a vendor.
#[derive(Debug, Clone, Copy)]
pub struct VendorPricing {
    /// USD per million input tokens.
    pub input_per_million: f64,
    /// USD per million output tokens.
    pub output_per_million: f64,
}

impl VendorPricing {
    /// Compute the estimated cost for the given token counts.
    pub fn compute_cost(&self, usage: &TokenUsage) -> f64 {
        let input_cost = (f64::from(usage.input_tokens) / 1_000_000.0) * self.input_per_million;
        let output_cost = (f64::from(usage.output_tokens) / 1_000_000.0) * self.output_per_million;
        input_cost + output_cost
    }
}

/// Look up pricing for a vendor, if it is a known hosted vendor.
pub fn lookup(vendor: &str) -> Option<VendorPricing> {
    match vendor {
        "openai" => Some(VendorPricing {
            input_per_million: 2.50,
            output_per_million: 10.0,
        }),
        "anthropic" => Some(VendorPricing {
            input_per_million: 3.0,
            output_per_million: 15.0,
        }),
        "gemini" | "google" => Some(VendorPricing {
            input_per_million: 1.25,
            output_per_million: 5.0,
        }),
        "deepseek" => Some(VendorPricing {
            input_per_million: 0.27,
            output_per_million: 1.10,
        }),
        // Local inference and unknown vendors have no vendor table.
        _ => None,
    }
}

/// Estimate the USD cost of one invocation.
///
/// Uses the vendor table when the vendor is known; otherwise falls back
/// to the descriptor's flat per-token estimate over total tokens.
pub fn estimate(descriptor: &ProviderDescriptor, usage: &TokenUsage) -> f64 {
    match lookup(&descriptor.vendor) {
        Some(pricing) => pricing.compute_cost(usage),
        None => f64::from(usage.total()) * descriptor.cost_per_token,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{Capability, InvocationKind};

    fn descriptor(vendor: &str, cost_per_token: f64) -> ProviderDescriptor {
        ProviderDescriptor {
            id: format!("{vendor}-main"),
            name: vendor.to_string(),
            vendor: vendor.to_string(),
            tier: 3,
            capabilities: vec![Capability::Analysis],
            cost_per_token,
            kind: InvocationKind::InProcessSdk,
        }
    }

    #[test]
    fn known_vendor_uses_table() {
        let usage = TokenUsage {
            input_tokens: 1_000_000,
            output_tokens: 1_000_000,
        };
        let cost = estimate(&descriptor("anthropic", 0.0), &usage);
        assert!((cost - 18.0).abs() < 1e-9);
    }

    #[test]
    fn unknown_vendor_uses_descriptor_rate() {
        let usage = TokenUsage {
            input_tokens: 500,
            output_tokens: 500,
        };
        let cost = estimate(&descriptor("local-llama", 0.000_001), &usage);
        assert!((cost - 0.001).abs() < 1e-9);
    }

    #[test]
    fn zero_usage_costs_nothing() {
        let cost = estimate(&descriptor("openai", 0.1), &TokenUsage::default());
        assert_eq!(cost, 0.0);
    }
}
