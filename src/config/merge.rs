//! YAML overrides on top of the environment configuration.

use std::time::Duration;

use super::{ApiKey, SentinelConfig};
use super::yaml::YamlConfig;
use crate::config::pricing::TokenPricing;

/// Apply every value present in `yaml` over `config`.
pub(super) fn apply_yaml(config: &mut SentinelConfig, yaml: YamlConfig) {
    if let Some(openai) = yaml.openai {
        if let Some(key) = openai.api_key {
            config.openai_api_key = Some(ApiKey::new(key));
        }
        if let Some(url) = openai.signaling_url {
            config.signaling_url = url;
        }
        if let Some(url) = openai.websocket_url {
            config.websocket_url = url;
        }
        if let Some(model) = openai.model {
            config.session.model = model;
        }
        if let Some(voice) = openai.voice {
            config.session.voice = voice;
        }
    }

    if let Some(session) = yaml.session {
        let target = &mut config.session;
        if let Some(instructions) = session.instructions {
            target.instructions = instructions;
        }
        if let Some(mode) = session.mode {
            target.mode = mode;
        }
        if session.temperature.is_some() {
            target.temperature = session.temperature;
        }
        if session.max_output_tokens.is_some() {
            target.max_output_tokens = session.max_output_tokens;
        }
        if let Some(stop) = session.stop_sequences {
            target.stop_sequences = stop;
        }
        if let Some(first) = session.first_speaker {
            target.first_speaker = first;
        }
        if session.greeting_instructions.is_some() {
            target.greeting_instructions = session.greeting_instructions;
        }
        if let Some(turn_detection) = session.turn_detection {
            target.turn_detection = turn_detection;
        }
        if session.input_transcription_model.is_some() {
            target.input_transcription_model = session.input_transcription_model;
        }
    }

    if let Some(validation) = yaml.validation {
        let target = &mut config.session.validation;
        if let Some(enabled) = validation.enabled {
            target.enabled = enabled;
        }
        if let Some(rules) = validation.rules {
            target.rules = rules;
        }
        if let Some(delay) = validation.buffer_delay_ms {
            target.buffer_delay_ms = delay;
        }
        if let Some(message) = validation.rephrase_message {
            target.rephrase_message = message;
        }
        if validation.moderation_url.is_some() {
            config.moderation_url = validation.moderation_url;
        }
        if let Some(ms) = validation.moderation_timeout_ms {
            config.moderation_timeout = Duration::from_millis(ms);
        }
    }

    if let Some(tools) = yaml.tools {
        if tools.web_search_url.is_some() {
            config.web_search_url = tools.web_search_url;
        }
        if tools.knowledge_base_url.is_some() {
            config.knowledge_base_url = tools.knowledge_base_url;
        }
        if tools.knowledge_base_id.is_some() {
            config.knowledge_base_id = tools.knowledge_base_id;
        }
        if tools.sentiment_url.is_some() {
            config.sentiment_url = tools.sentiment_url;
        }
        if let Some(ms) = tools.timeout_ms {
            config.tool_timeout = Duration::from_millis(ms);
        }
    }

    if let Some(timings) = yaml.timings {
        if let Some(ms) = timings.ice_gathering_timeout_ms {
            config.timings.ice_gathering_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = timings.handshake_timeout_ms {
            config.timings.handshake_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = timings.rephrase_settle_delay_ms {
            config.timings.rephrase_settle_delay = Duration::from_millis(ms);
        }
    }

    if let Some(pricing) = yaml.pricing {
        // Unset buckets keep the model's built-in rate.
        let base = config.pricing();
        config.pricing_override = Some(TokenPricing::new(
            pricing.audio_in.unwrap_or(base.audio_in),
            pricing.text_in.unwrap_or(base.text_in),
            pricing.cached_in.unwrap_or(base.cached_in),
            pricing.audio_out.unwrap_or(base.audio_out),
            pricing.text_out.unwrap_or(base.text_out),
        ));
    }
}
