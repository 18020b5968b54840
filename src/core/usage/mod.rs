//! Session usage accounting.
//!
//! Turns the remote `response.done` usage block into normalized token
//! buckets, prices them and keeps a time-ordered record for the lifetime of a
//! session.
//!
//! The remote service reports cached input tokens *inside* the text and audio
//! input counts. Billing them twice would overstate cost, so extraction first
//! subtracts the cached sub-counts and reports the cached total in its own
//! bucket.

pub mod cost;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::config::pricing::TokenPricing;
use crate::core::realtime::messages::Usage;

pub use cost::{CostBreakdown, calculate_cost};

/// Normalized token counts, one per billing bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TokenBuckets {
    pub audio_in: u64,
    pub text_in: u64,
    pub cached_in: u64,
    pub audio_out: u64,
    pub text_out: u64,
}

impl TokenBuckets {
    pub fn saturating_add(&self, other: &TokenBuckets) -> TokenBuckets {
        TokenBuckets {
            audio_in: self.audio_in.saturating_add(other.audio_in),
            text_in: self.text_in.saturating_add(other.text_in),
            cached_in: self.cached_in.saturating_add(other.cached_in),
            audio_out: self.audio_out.saturating_add(other.audio_out),
            text_out: self.text_out.saturating_add(other.text_out),
        }
    }

    pub fn total(&self) -> u64 {
        self.audio_in
            .saturating_add(self.text_in)
            .saturating_add(self.cached_in)
            .saturating_add(self.audio_out)
            .saturating_add(self.text_out)
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

/// Maps raw usage blocks to [`TokenBuckets`].
pub struct UsageExtractor;

impl UsageExtractor {
    pub fn extract(usage: &Usage) -> TokenBuckets {
        let (mut audio_in, mut text_in, cached_in) = match &usage.input_token_details {
            Some(details) => {
                let audio = details.audio_tokens.unwrap_or(0);
                // Without a per-modality split every input token is text.
                let text = details
                    .text_tokens
                    .unwrap_or_else(|| usage.input_tokens.saturating_sub(audio));
                (audio, text, details.cached_tokens.unwrap_or(0))
            }
            None => (0, usage.input_tokens, 0),
        };

        let split = usage
            .input_token_details
            .as_ref()
            .and_then(|d| d.cached_tokens_details.as_ref());
        match split {
            Some(split) => {
                audio_in = audio_in.saturating_sub(split.audio_tokens.unwrap_or(0));
                text_in = text_in.saturating_sub(split.text_tokens.unwrap_or(0));
            }
            None => {
                // Cached total only: take it from text first, then audio.
                let from_text = cached_in.min(text_in);
                text_in -= from_text;
                audio_in = audio_in.saturating_sub(cached_in - from_text);
            }
        }

        let (audio_out, text_out) = match &usage.output_token_details {
            Some(details) => {
                let audio = details.audio_tokens.unwrap_or(0);
                let text = details
                    .text_tokens
                    .unwrap_or_else(|| usage.output_tokens.saturating_sub(audio));
                (audio, text)
            }
            None => (0, usage.output_tokens),
        };

        TokenBuckets {
            audio_in,
            text_in,
            cached_in,
            audio_out,
            text_out,
        }
    }
}

/// One priced usage record. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageSample {
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub tokens: TokenBuckets,
    pub cost: CostBreakdown,
}

/// Time-ordered usage samples with running totals.
#[derive(Debug, Clone, Default)]
pub struct UsageTimeline {
    samples: Vec<UsageSample>,
    totals: TokenBuckets,
    cost: CostBreakdown,
}

impl UsageTimeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Price and append a sample stamped with the current time.
    pub fn record(&mut self, tokens: TokenBuckets, pricing: &TokenPricing) -> UsageSample {
        self.record_at(OffsetDateTime::now_utc(), tokens, pricing)
    }

    /// Price and append a sample. Timestamps earlier than the last sample are
    /// clamped so the sequence stays ordered.
    pub fn record_at(
        &mut self,
        timestamp: OffsetDateTime,
        tokens: TokenBuckets,
        pricing: &TokenPricing,
    ) -> UsageSample {
        let timestamp = match self.samples.last() {
            Some(last) if last.timestamp > timestamp => last.timestamp,
            _ => timestamp,
        };
        let sample = UsageSample {
            timestamp,
            tokens,
            cost: calculate_cost(&tokens, pricing),
        };
        self.totals = self.totals.saturating_add(&tokens);
        self.cost = self.cost.combine(&sample.cost);
        self.samples.push(sample.clone());
        sample
    }

    pub fn samples(&self) -> &[UsageSample] {
        &self.samples
    }

    pub fn totals(&self) -> TokenBuckets {
        self.totals
    }

    pub fn cost(&self) -> CostBreakdown {
        self.cost
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::realtime::messages::{InputTokenDetails, TokenDetails};
    use time::Duration;

    fn usage_with_split() -> Usage {
        Usage {
            total_tokens: 2500,
            input_tokens: 1500,
            output_tokens: 1000,
            input_token_details: Some(InputTokenDetails {
                cached_tokens: Some(200),
                text_tokens: Some(500),
                audio_tokens: Some(1000),
                cached_tokens_details: Some(TokenDetails {
                    text_tokens: Some(0),
                    audio_tokens: Some(200),
                }),
            }),
            output_token_details: Some(TokenDetails {
                text_tokens: Some(300),
                audio_tokens: Some(700),
            }),
        }
    }

    #[test]
    fn test_cached_audio_subtracted_before_billing() {
        let buckets = UsageExtractor::extract(&usage_with_split());
        assert_eq!(buckets.audio_in, 800);
        assert_eq!(buckets.text_in, 500);
        assert_eq!(buckets.cached_in, 200);
        assert_eq!(buckets.audio_out, 700);
        assert_eq!(buckets.text_out, 300);
        // Every raw input token lands in exactly one bucket.
        assert_eq!(buckets.audio_in + buckets.text_in + buckets.cached_in, 1500);
    }

    #[test]
    fn test_cached_total_without_split_comes_from_text_first() {
        let mut usage = usage_with_split();
        if let Some(details) = usage.input_token_details.as_mut() {
            details.cached_tokens = Some(600);
            details.cached_tokens_details = None;
        }
        let buckets = UsageExtractor::extract(&usage);
        assert_eq!(buckets.text_in, 0);
        assert_eq!(buckets.audio_in, 900);
        assert_eq!(buckets.cached_in, 600);
    }

    #[test]
    fn test_missing_details_treated_as_text() {
        let usage = Usage {
            input_tokens: 40,
            output_tokens: 10,
            ..Default::default()
        };
        let buckets = UsageExtractor::extract(&usage);
        assert_eq!(buckets.text_in, 40);
        assert_eq!(buckets.text_out, 10);
        assert_eq!(buckets.audio_in, 0);
    }

    #[test]
    fn test_cached_larger_than_counts_saturates() {
        let usage = Usage {
            input_tokens: 10,
            input_token_details: Some(InputTokenDetails {
                cached_tokens: Some(50),
                text_tokens: Some(4),
                audio_tokens: Some(6),
                cached_tokens_details: None,
            }),
            ..Default::default()
        };
        let buckets = UsageExtractor::extract(&usage);
        assert_eq!(buckets.text_in, 0);
        assert_eq!(buckets.audio_in, 0);
    }

    #[test]
    fn test_timeline_totals_monotonic() {
        let pricing = TokenPricing::new(0.00006, 0.0000025, 0.00003, 0.00024, 0.00001);
        let mut timeline = UsageTimeline::new();
        let start = OffsetDateTime::now_utc();

        let first = TokenBuckets {
            audio_in: 100,
            text_out: 10,
            ..Default::default()
        };
        let second = TokenBuckets {
            text_in: 5,
            audio_out: 50,
            ..Default::default()
        };

        timeline.record_at(start, first, &pricing);
        let before = timeline.totals();
        // Out-of-order timestamp is clamped.
        let sample = timeline.record_at(start - Duration::seconds(5), second, &pricing);
        let after = timeline.totals();

        assert_eq!(sample.timestamp, start);
        assert!(after.total() >= before.total());
        assert_eq!(after.audio_in, 100);
        assert_eq!(after.audio_out, 50);
        assert_eq!(timeline.samples().len(), 2);

        let cost = timeline.cost();
        assert_eq!(cost.total_cost, cost.input_cost + cost.output_cost);
        let expected = calculate_cost(&first, &pricing).total_cost
            + calculate_cost(&second, &pricing).total_cost;
        assert!((cost.total_cost - expected).abs() < 1e-12);
    }
}
