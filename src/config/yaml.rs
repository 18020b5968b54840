use serde::Deserialize;
use std::path::Path;

use crate::core::realtime::{FirstSpeaker, SessionMode, TurnDetectionConfig};

/// Overrides read from a YAML file
///
/// All fields are optional to allow partial configuration. Values present
/// here override environment variables.
///
/// # Example YAML structure
/// ```yaml
/// openai:
///   api_key: "sk-..."
///   signaling_url: "https://api.openai.com/v1/realtime"
///   websocket_url: "wss://api.openai.com/v1/realtime"
///   model: "gpt-4o-realtime-preview-2024-12-17"
///   voice: "verse"
///
/// session:
///   instructions: "You are a support agent for a bike shop."
///   mode: "voice"
///   temperature: 0.8
///   max_output_tokens: 1024
///   first_speaker: "model"
///   greeting_instructions: "Greet the caller and ask for their order number."
///   turn_detection:
///     type: "server_vad"
///     silence_duration_ms: 600
///
/// validation:
///   enabled: true
///   rules: "Never quote prices. Never promise delivery dates."
///   buffer_delay_ms: 1200
///   moderation_url: "https://moderation.internal/check"
///   moderation_timeout_ms: 2500
///
/// tools:
///   web_search_url: "https://search.internal/query"
///   knowledge_base_url: "https://kb.internal/search"
///   knowledge_base_id: "support-docs"
///   sentiment_url: "https://nlp.internal/sentiment"
///   timeout_ms: 8000
///
/// timings:
///   ice_gathering_timeout_ms: 3000
///   handshake_timeout_ms: 15000
///   rephrase_settle_delay_ms: 300
///
/// pricing:
///   audio_in: 0.00004
///   text_in: 0.000005
///   cached_in: 0.0000025
///   audio_out: 0.00008
///   text_out: 0.00002
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub openai: Option<OpenAiYaml>,
    pub session: Option<SessionYaml>,
    pub validation: Option<ValidationYaml>,
    pub tools: Option<ToolsYaml>,
    pub timings: Option<TimingsYaml>,
    pub pricing: Option<PricingYaml>,
}

/// Remote model connection settings from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct OpenAiYaml {
    pub api_key: Option<String>,
    pub signaling_url: Option<String>,
    pub websocket_url: Option<String>,
    pub model: Option<String>,
    pub voice: Option<String>,
}

/// Conversation settings from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SessionYaml {
    pub instructions: Option<String>,
    pub mode: Option<SessionMode>,
    pub temperature: Option<f32>,
    pub max_output_tokens: Option<u32>,
    pub stop_sequences: Option<Vec<String>>,
    pub first_speaker: Option<FirstSpeaker>,
    pub greeting_instructions: Option<String>,
    pub turn_detection: Option<TurnDetectionConfig>,
    pub input_transcription_model: Option<String>,
}

/// Compliance validation settings from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ValidationYaml {
    pub enabled: Option<bool>,
    pub rules: Option<String>,
    pub buffer_delay_ms: Option<u32>,
    pub rephrase_message: Option<String>,
    pub moderation_url: Option<String>,
    pub moderation_timeout_ms: Option<u64>,
}

/// Tool collaborator endpoints from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ToolsYaml {
    pub web_search_url: Option<String>,
    pub knowledge_base_url: Option<String>,
    pub knowledge_base_id: Option<String>,
    pub sentiment_url: Option<String>,
    pub timeout_ms: Option<u64>,
}

/// Controller timeouts from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct TimingsYaml {
    pub ice_gathering_timeout_ms: Option<u64>,
    pub handshake_timeout_ms: Option<u64>,
    pub rephrase_settle_delay_ms: Option<u64>,
}

/// Per-token USD rates overriding the built-in table
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct PricingYaml {
    pub audio_in: Option<f64>,
    pub text_in: Option<f64>,
    pub cached_in: Option<f64>,
    pub audio_out: Option<f64>,
    pub text_out: Option<f64>,
}

impl YamlConfig {
    /// Parse a YAML document. An empty document yields an all-`None` config.
    pub fn parse(source: &str) -> Result<Self, String> {
        serde_yaml::from_str(source).map_err(|e| format!("Invalid YAML configuration: {e}"))
    }

    /// Read and parse the file at `path`.
    pub fn load(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let source = std::fs::read_to_string(path)
            .map_err(|e| format!("Cannot read configuration {}: {e}", path.display()))?;
        Ok(Self::parse(&source)?)
    }
}
