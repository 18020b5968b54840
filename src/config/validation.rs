//! Configuration validation logic.

use super::SentinelConfig;
use crate::utils::{validate_endpoint_url, validate_websocket_url};

/// Validate a loaded configuration.
///
/// # Errors
/// Returns an error if:
/// - The signaling URL is not https (loopback http is allowed for testing)
/// - The WebSocket URL is not wss (loopback ws is allowed for testing)
/// - A collaborator URL does not parse
/// - Validation is enabled without rules or without a moderation URL
/// - The buffer delay or temperature is out of range
/// - A pricing override rate is negative or not finite
pub(super) fn validate_config(config: &SentinelConfig) -> Result<(), Box<dyn std::error::Error>> {
    validate_endpoint_url(&config.signaling_url, true)
        .map_err(|e| format!("Invalid signaling URL '{}': {e}", config.signaling_url))?;
    validate_websocket_url(&config.websocket_url)
        .map_err(|e| format!("Invalid WebSocket URL '{}': {e}", config.websocket_url))?;

    let collaborators = [
        ("moderation", &config.moderation_url),
        ("web search", &config.web_search_url),
        ("knowledge base", &config.knowledge_base_url),
        ("sentiment", &config.sentiment_url),
    ];
    for (name, url) in collaborators {
        if let Some(url) = url {
            validate_endpoint_url(url, false)
                .map_err(|e| format!("Invalid {name} URL '{url}': {e}"))?;
        }
    }

    config
        .session
        .validate()
        .map_err(|e| format!("Invalid session settings: {e}"))?;

    if config.session.validation.enabled && config.moderation_url.is_none() {
        return Err("Validation is enabled but no moderation URL is configured".into());
    }

    if let Some(pricing) = &config.pricing_override {
        pricing
            .validate()
            .map_err(|e| format!("Invalid pricing override: {e}"))?;
    }

    if config.timings.handshake_timeout.is_zero() {
        return Err("Handshake timeout must be greater than zero".into());
    }

    Ok(())
}
