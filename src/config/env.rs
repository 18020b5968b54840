//! Environment variable loading.
//!
//! | Variable | Field |
//! |---|---|
//! | `OPENAI_API_KEY` | bearer token for signaling |
//! | `WAAV_SIGNALING_URL` | SDP endpoint |
//! | `WAAV_WEBSOCKET_URL` | WebSocket endpoint used by the `session` command |
//! | `WAAV_MODEL`, `WAAV_VOICE` | model and voice |
//! | `WAAV_INSTRUCTIONS` | base prompt |
//! | `WAAV_SESSION_MODE` | `voice` or `text` |
//! | `WAAV_TEMPERATURE`, `WAAV_MAX_OUTPUT_TOKENS` | sampling |
//! | `WAAV_FIRST_SPEAKER` | `user` or `model` |
//! | `WAAV_VALIDATION_ENABLED`, `WAAV_VALIDATION_RULES` | compliance check |
//! | `WAAV_BUFFER_DELAY_MS`, `WAAV_REPHRASE_MESSAGE` | rephrase protocol |
//! | `WAAV_MODERATION_URL`, `WAAV_MODERATION_TIMEOUT_MS` | moderation collaborator |
//! | `WAAV_WEB_SEARCH_URL`, `WAAV_KNOWLEDGE_BASE_URL`, `WAAV_KNOWLEDGE_BASE_ID` | tools |
//! | `WAAV_SENTIMENT_URL`, `WAAV_TOOL_TIMEOUT_MS` | tools |

use std::env;
use std::str::FromStr;
use std::time::Duration;

use super::{ApiKey, SentinelConfig};
use crate::core::realtime::{FirstSpeaker, SessionMode};

fn var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_var<T: FromStr>(name: &str) -> Result<Option<T>, String>
where
    T::Err: std::fmt::Display,
{
    match var(name) {
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|e| format!("Invalid {name} value '{raw}': {e}")),
        None => Ok(None),
    }
}

fn parse_bool(name: &str) -> Result<Option<bool>, String> {
    match var(name) {
        Some(raw) => match raw.to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            _ => Err(format!("Invalid {name} value '{raw}': expected true or false")),
        },
        None => Ok(None),
    }
}

/// Build a configuration from defaults overridden by environment variables.
pub(super) fn load() -> Result<SentinelConfig, Box<dyn std::error::Error>> {
    let mut config = SentinelConfig::default();

    config.openai_api_key = var("OPENAI_API_KEY").map(ApiKey::new);
    if let Some(url) = var("WAAV_SIGNALING_URL") {
        config.signaling_url = url;
    }
    if let Some(url) = var("WAAV_WEBSOCKET_URL") {
        config.websocket_url = url;
    }

    let session = &mut config.session;
    if let Some(model) = var("WAAV_MODEL") {
        session.model = model;
    }
    if let Some(voice) = var("WAAV_VOICE") {
        session.voice = voice;
    }
    if let Some(instructions) = var("WAAV_INSTRUCTIONS") {
        session.instructions = instructions;
    }
    if let Some(mode) = var("WAAV_SESSION_MODE") {
        session.mode = SessionMode::from_str_or_default(&mode);
    }
    if let Some(temperature) = parse_var::<f32>("WAAV_TEMPERATURE")? {
        session.temperature = Some(temperature);
    }
    if let Some(limit) = parse_var::<u32>("WAAV_MAX_OUTPUT_TOKENS")? {
        session.max_output_tokens = Some(limit);
    }
    if let Some(first) = var("WAAV_FIRST_SPEAKER") {
        session.first_speaker = match first.to_lowercase().as_str() {
            "model" | "assistant" => FirstSpeaker::Model,
            _ => FirstSpeaker::User,
        };
    }

    let validation = &mut session.validation;
    if let Some(enabled) = parse_bool("WAAV_VALIDATION_ENABLED")? {
        validation.enabled = enabled;
    }
    if let Some(rules) = var("WAAV_VALIDATION_RULES") {
        validation.rules = rules;
    }
    if let Some(delay) = parse_var::<u32>("WAAV_BUFFER_DELAY_MS")? {
        validation.buffer_delay_ms = delay;
    }
    if let Some(message) = var("WAAV_REPHRASE_MESSAGE") {
        validation.rephrase_message = message;
    }

    config.moderation_url = var("WAAV_MODERATION_URL");
    if let Some(ms) = parse_var::<u64>("WAAV_MODERATION_TIMEOUT_MS")? {
        config.moderation_timeout = Duration::from_millis(ms);
    }
    config.web_search_url = var("WAAV_WEB_SEARCH_URL");
    config.knowledge_base_url = var("WAAV_KNOWLEDGE_BASE_URL");
    config.knowledge_base_id = var("WAAV_KNOWLEDGE_BASE_ID");
    config.sentiment_url = var("WAAV_SENTIMENT_URL");
    if let Some(ms) = parse_var::<u64>("WAAV_TOOL_TIMEOUT_MS")? {
        config.tool_timeout = Duration::from_millis(ms);
    }

    Ok(config)
}

#[cfg(test)]
pub(crate) const ENV_VARS: &[&str] = &[
    "OPENAI_API_KEY",
    "WAAV_SIGNALING_URL",
    "WAAV_WEBSOCKET_URL",
    "WAAV_MODEL",
    "WAAV_VOICE",
    "WAAV_INSTRUCTIONS",
    "WAAV_SESSION_MODE",
    "WAAV_TEMPERATURE",
    "WAAV_MAX_OUTPUT_TOKENS",
    "WAAV_FIRST_SPEAKER",
    "WAAV_VALIDATION_ENABLED",
    "WAAV_VALIDATION_RULES",
    "WAAV_BUFFER_DELAY_MS",
    "WAAV_REPHRASE_MESSAGE",
    "WAAV_MODERATION_URL",
    "WAAV_MODERATION_TIMEOUT_MS",
    "WAAV_WEB_SEARCH_URL",
    "WAAV_KNOWLEDGE_BASE_URL",
    "WAAV_KNOWLEDGE_BASE_ID",
    "WAAV_SENTIMENT_URL",
    "WAAV_TOOL_TIMEOUT_MS",
];

#[cfg(test)]
pub(crate) fn cleanup_env_vars() {
    for name in ENV_VARS {
        unsafe {
            env::remove_var(name);
        }
    }
}
