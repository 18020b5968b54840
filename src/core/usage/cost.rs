//! Token-to-currency conversion.

use serde::{Deserialize, Serialize};

use super::TokenBuckets;
use crate::config::pricing::TokenPricing;

/// Input, output and total cost of a token sample in USD.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CostBreakdown {
    pub input_cost: f64,
    pub output_cost: f64,
    pub total_cost: f64,
}

impl CostBreakdown {
    /// Sum two breakdowns, keeping `total == input + output`.
    pub fn combine(&self, other: &CostBreakdown) -> CostBreakdown {
        let input_cost = self.input_cost + other.input_cost;
        let output_cost = self.output_cost + other.output_cost;
        CostBreakdown {
            input_cost,
            output_cost,
            total_cost: input_cost + output_cost,
        }
    }
}

/// Price normalized token buckets.
///
/// `buckets.cached_in` must already be excluded from `audio_in`/`text_in`;
/// [`super::UsageExtractor`] produces buckets in that form.
pub fn calculate_cost(buckets: &TokenBuckets, pricing: &TokenPricing) -> CostBreakdown {
    let input_cost = buckets.audio_in as f64 * pricing.audio_in
        + buckets.text_in as f64 * pricing.text_in
        + buckets.cached_in as f64 * pricing.cached_in;
    let output_cost =
        buckets.audio_out as f64 * pricing.audio_out + buckets.text_out as f64 * pricing.text_out;

    CostBreakdown {
        input_cost,
        output_cost,
        total_cost: input_cost + output_cost,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_pricing() -> TokenPricing {
        TokenPricing::new(0.00006, 0.0000025, 0.00003, 0.00024, 0.00001)
    }

    #[test]
    fn test_zero_tokens_cost_exactly_zero() {
        let cost = calculate_cost(&TokenBuckets::default(), &sample_pricing());
        assert_eq!(cost.input_cost, 0.0);
        assert_eq!(cost.output_cost, 0.0);
        assert_eq!(cost.total_cost, 0.0);
    }

    #[test]
    fn test_mixed_usage_cost() {
        let buckets = TokenBuckets {
            audio_in: 1000,
            text_in: 500,
            cached_in: 200,
            audio_out: 800,
            text_out: 300,
        };
        let cost = calculate_cost(&buckets, &sample_pricing());

        let expected_input = 1000.0 * 0.00006 + 500.0 * 0.0000025 + 200.0 * 0.00003;
        let expected_output = 800.0 * 0.00024 + 300.0 * 0.00001;
        assert!((cost.input_cost - expected_input).abs() < 1e-12);
        assert!((cost.output_cost - expected_output).abs() < 1e-12);
        assert_eq!(cost.total_cost, cost.input_cost + cost.output_cost);
    }

    #[test]
    fn test_cached_tokens_use_cached_rate_only() {
        let pricing = TokenPricing::new(1.0, 1.0, 0.25, 0.0, 0.0);
        let buckets = TokenBuckets {
            cached_in: 4,
            ..Default::default()
        };
        assert_eq!(calculate_cost(&buckets, &pricing).input_cost, 1.0);
    }

    #[test]
    fn test_combine_keeps_total_consistent() {
        let a = CostBreakdown {
            input_cost: 0.1,
            output_cost: 0.2,
            total_cost: 0.30000000000000004,
        };
        let b = CostBreakdown {
            input_cost: 0.05,
            output_cost: 0.0,
            total_cost: 0.05,
        };
        let sum = a.combine(&b);
        assert_eq!(sum.total_cost, sum.input_cost + sum.output_cost);
        assert!(sum.total_cost >= 0.0);
    }
}
