//! Per-token pricing for realtime speech models.
//!
//! This module provides a single source of truth for the rates used by the
//! cost calculator. Pricing can be overridden from configuration without
//! modifying code.
//!
//! # Pricing Sources
//!
//! Prices are based on the official pricing page as of the last update.
//! All prices are in USD per token. Cached input is billed at the cached
//! audio rate because cached prefixes are dominated by audio in voice sessions.
//!
//! # Usage
//!
//! ```rust,ignore
//! use waav_sentinel::config::pricing::{get_token_pricing, pricing_or_default};
//!
//! let pricing = get_token_pricing("gpt-4o-mini-realtime-preview");
//! let pricing = pricing_or_default("some-future-model");
//! ```
//!
//! # Updates
//!
//! When provider pricing changes, update the constants in this file.
//! Last updated: 2025-01-15

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::LazyLock;

use crate::core::realtime::config::DEFAULT_REALTIME_MODEL;

// =============================================================================
// Pricing Types
// =============================================================================

/// Per-token USD rates for the five billing buckets.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TokenPricing {
    pub audio_in: f64,
    pub text_in: f64,
    pub cached_in: f64,
    pub audio_out: f64,
    pub text_out: f64,
}

impl TokenPricing {
    pub const fn new(audio_in: f64, text_in: f64, cached_in: f64, audio_out: f64, text_out: f64) -> Self {
        Self {
            audio_in,
            text_in,
            cached_in,
            audio_out,
            text_out,
        }
    }

    /// Build from rates quoted per one million tokens.
    pub const fn per_million(
        audio_in: f64,
        text_in: f64,
        cached_in: f64,
        audio_out: f64,
        text_out: f64,
    ) -> Self {
        const M: f64 = 1_000_000.0;
        Self::new(audio_in / M, text_in / M, cached_in / M, audio_out / M, text_out / M)
    }

    /// Reject negative or non-finite rates.
    pub fn validate(&self) -> Result<(), String> {
        let rates = [
            ("audio_in", self.audio_in),
            ("text_in", self.text_in),
            ("cached_in", self.cached_in),
            ("audio_out", self.audio_out),
            ("text_out", self.text_out),
        ];
        for (name, rate) in rates {
            if !rate.is_finite() || rate < 0.0 {
                return Err(format!("pricing rate {name} must be a non-negative number, got {rate}"));
            }
        }
        Ok(())
    }
}

// =============================================================================
// Realtime Pricing Table
// =============================================================================

static REALTIME_PRICING: LazyLock<HashMap<&'static str, TokenPricing>> = LazyLock::new(|| {
    let mut m = HashMap::new();

    // GPT-4o realtime (original preview): $100/$200 audio, $5/$20 text, $20 cached audio
    let gpt4o_preview = TokenPricing::per_million(100.0, 5.0, 20.0, 200.0, 20.0);
    m.insert("gpt-4o-realtime-preview", gpt4o_preview);
    m.insert("gpt-4o-realtime-preview-2024-10-01", gpt4o_preview);

    // GPT-4o realtime 2024-12-17: $40/$80 audio, $5/$20 text, $2.50 cached audio
    m.insert(
        "gpt-4o-realtime-preview-2024-12-17",
        TokenPricing::per_million(40.0, 5.0, 2.5, 80.0, 20.0),
    );

    // GPT-4o mini realtime: $10/$20 audio, $0.60/$2.40 text, $0.30 cached audio
    let mini = TokenPricing::per_million(10.0, 0.6, 0.3, 20.0, 2.4);
    m.insert("gpt-4o-mini-realtime-preview", mini);
    m.insert("gpt-4o-mini-realtime-preview-2024-12-17", mini);

    m
});

/// Get pricing for a realtime model (case-insensitive).
pub fn get_token_pricing(model: &str) -> Option<&'static TokenPricing> {
    REALTIME_PRICING.get(model.trim().to_lowercase().as_str())
}

/// Pricing for `model`, falling back to the default model's rates.
pub fn pricing_or_default(model: &str) -> TokenPricing {
    get_token_pricing(model)
        .or_else(|| get_token_pricing(DEFAULT_REALTIME_MODEL))
        .copied()
        .unwrap_or_default()
}

/// List all models with pricing, sorted by name.
pub fn list_priced_models() -> Vec<&'static str> {
    let mut models: Vec<&'static str> = REALTIME_PRICING.keys().copied().collect();
    models.sort_unstable();
    models
}
