//! Base types for the realtime session engine.
//!
//! This module defines the error taxonomy, the session lifecycle states and the
//! user-facing session settings shared by the controller, the audio graph and
//! the validation pipeline.
//!
//! # Audio Format
//!
//! Remote and local audio is PCM 16-bit signed mono. The remote model emits
//! 24kHz audio; the routing graph adapts to whatever rate a frame declares.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use super::config::{DEFAULT_REALTIME_MODEL, RealtimeVoice};

/// Upper bound for the playback delay inserted ahead of the gain stage.
pub const MAX_BUFFER_DELAY_MS: u32 = 2000;

/// Message injected (after the sentinel) when a turn fails validation.
pub const DEFAULT_REPHRASE_MESSAGE: &str =
    "Please rephrase your previous answer so that it follows the conversation rules.";

/// Errors raised while acquiring the local capture device.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CaptureError {
    /// The user or the platform refused access to the microphone
    #[error("Microphone permission denied: {0}")]
    PermissionDenied(String),

    /// No input device is available
    #[error("Audio input device not found: {0}")]
    DeviceNotFound(String),

    /// The device exists but another application holds it
    #[error("Audio input device busy: {0}")]
    DeviceBusy(String),

    /// Any other capture failure
    #[error("Audio capture failed: {0}")]
    Other(String),
}

impl CaptureError {
    /// Human-readable cause suitable for display next to a start button.
    pub fn user_message(&self) -> &'static str {
        match self {
            CaptureError::PermissionDenied(_) => {
                "Microphone access was denied. Allow microphone access and try again."
            }
            CaptureError::DeviceNotFound(_) => {
                "No microphone was found. Connect an input device and try again."
            }
            CaptureError::DeviceBusy(_) => {
                "The microphone is in use by another application. Close it and try again."
            }
            CaptureError::Other(_) => "The microphone could not be started.",
        }
    }
}

/// Failures surfaced by the session controller and its collaborators.
#[derive(Debug, Error)]
pub enum RealtimeError {
    #[error(transparent)]
    CaptureFailed(#[from] CaptureError),

    /// Transport or control channel could not be used
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Signaling rejected with status {status}: {body}")]
    SignalingRejected { status: u16, body: String },

    /// Missing API key, or signaling answered 401/403
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Settings rejected before any network activity
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Operation not allowed in the current lifecycle state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// ICE gathering, signaling or the handshake ran past its deadline
    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Not connected")]
    NotConnected,

    /// The session ended while a caller was waiting on it
    #[error("Session error: {0}")]
    SessionError(String),

    /// The controller task is gone
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl RealtimeError {
    /// Map a setup failure to the cause shown to the person starting a session.
    pub fn user_message(&self) -> String {
        match self {
            RealtimeError::CaptureFailed(e) => e.user_message().to_string(),
            RealtimeError::Timeout(_) => {
                "The voice service did not respond in time. Check your network connection."
                    .to_string()
            }
            RealtimeError::ConnectionFailed(_) | RealtimeError::NotConnected => {
                "Could not reach the voice service. Check your network connection.".to_string()
            }
            RealtimeError::AuthenticationFailed(_) => {
                "The voice service rejected the credentials.".to_string()
            }
            RealtimeError::SignalingRejected { status, .. } => {
                format!("The voice service refused the connection (HTTP {status}).")
            }
            other => other.to_string(),
        }
    }
}

impl From<serde_json::Error> for RealtimeError {
    fn from(e: serde_json::Error) -> Self {
        RealtimeError::SerializationError(e.to_string())
    }
}

/// Result alias used across the session engine.
pub type RealtimeResult<T> = Result<T, RealtimeError>;

/// Lifecycle of the single live session.
///
/// `idle → negotiating → configuring → active → closing → idle`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// No connection; settings may be edited
    #[default]
    Idle,
    /// Capture acquired, offer/answer exchange in progress
    Negotiating,
    /// Remote session created, configuration update sent
    Configuring,
    /// Configuration confirmed; turns flow
    Active,
    /// Resources are being released
    Closing,
}

impl SessionState {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Negotiating => "negotiating",
            SessionState::Configuring => "configuring",
            SessionState::Active => "active",
            SessionState::Closing => "closing",
        }
    }

    /// Whether a connection (possibly not yet configured) exists.
    pub fn is_connected(&self) -> bool {
        matches!(
            self,
            SessionState::Negotiating | SessionState::Configuring | SessionState::Active
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Conversation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionMode {
    /// Spoken conversation; the model answers with audio and text
    #[default]
    Voice,
    /// Typed conversation; no turn detection, text output only
    Text,
}

impl SessionMode {
    /// Response modalities requested from the remote model.
    pub fn modalities(&self) -> Vec<String> {
        match self {
            SessionMode::Voice => vec!["audio".to_string(), "text".to_string()],
            SessionMode::Text => vec!["text".to_string()],
        }
    }

    pub fn from_str_or_default(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "text" => SessionMode::Text,
            _ => SessionMode::Voice,
        }
    }
}

/// Who opens the conversation once the session is configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FirstSpeaker {
    #[default]
    User,
    Model,
}

/// Configuration for turn detection (VAD).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TurnDetectionConfig {
    /// Server-side VAD
    #[serde(rename = "server_vad")]
    ServerVad {
        /// Activation threshold (0.0 to 1.0)
        #[serde(default, skip_serializing_if = "Option::is_none")]
        threshold: Option<f32>,
        /// Amount of audio to include before voice detection (ms)
        #[serde(default, skip_serializing_if = "Option::is_none")]
        prefix_padding_ms: Option<u32>,
        /// Silence duration before end of turn (ms)
        #[serde(default, skip_serializing_if = "Option::is_none")]
        silence_duration_ms: Option<u32>,
    },
    /// Semantic-aware turn detection
    #[serde(rename = "semantic_vad")]
    SemanticVad {
        /// Eagerness level (low, medium, high, auto)
        #[serde(default, skip_serializing_if = "Option::is_none")]
        eagerness: Option<String>,
    },
}

impl Default for TurnDetectionConfig {
    fn default() -> Self {
        TurnDetectionConfig::ServerVad {
            threshold: Some(0.5),
            prefix_padding_ms: Some(300),
            silence_duration_ms: Some(500),
        }
    }
}

/// Compliance validation settings for a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationSettings {
    /// Whether finished turns are checked against `rules`
    pub enabled: bool,
    /// Free-form rule text sent to the moderation collaborator
    pub rules: String,
    /// Playback delay ahead of the gain stage, 0 to 2000 ms
    pub buffer_delay_ms: u32,
    /// Text injected after the sentinel when a turn is rejected
    pub rephrase_message: String,
}

impl Default for ValidationSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            rules: String::new(),
            buffer_delay_ms: 1000,
            rephrase_message: DEFAULT_REPHRASE_MESSAGE.to_string(),
        }
    }
}

impl ValidationSettings {
    /// Delay applied by the routing graph. Zero unless validation is on.
    pub fn effective_delay(&self) -> Duration {
        if self.enabled {
            Duration::from_millis(u64::from(self.buffer_delay_ms.min(MAX_BUFFER_DELAY_MS)))
        } else {
            Duration::ZERO
        }
    }
}

/// User-editable session settings. Only changed while the controller is idle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub model: String,
    pub voice: String,
    /// Base prompt text
    pub instructions: String,
    pub mode: SessionMode,
    pub temperature: Option<f32>,
    /// Cap on output tokens per response; `None` means unlimited
    pub max_output_tokens: Option<u32>,
    /// Retained for the settings form; the realtime protocol has no field for it
    pub stop_sequences: Vec<String>,
    pub first_speaker: FirstSpeaker,
    /// Appended to the prompt when the model speaks first
    pub greeting_instructions: Option<String>,
    pub turn_detection: TurnDetectionConfig,
    /// Transcription model for the user's audio (voice mode only)
    pub input_transcription_model: Option<String>,
    pub validation: ValidationSettings,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            model: DEFAULT_REALTIME_MODEL.to_string(),
            voice: RealtimeVoice::default().as_str().to_string(),
            instructions: "You are a helpful voice assistant.".to_string(),
            mode: SessionMode::Voice,
            temperature: None,
            max_output_tokens: None,
            stop_sequences: Vec::new(),
            first_speaker: FirstSpeaker::User,
            greeting_instructions: None,
            turn_detection: TurnDetectionConfig::default(),
            input_transcription_model: Some("whisper-1".to_string()),
            validation: ValidationSettings::default(),
        }
    }
}

impl SessionSettings {
    /// Check value ranges that the remote service would otherwise reject.
    pub fn validate(&self) -> RealtimeResult<()> {
        if self.model.trim().is_empty() {
            return Err(RealtimeError::InvalidConfiguration(
                "model must not be empty".to_string(),
            ));
        }
        if let Some(t) = self.temperature
            && !(0.6..=1.2).contains(&t)
        {
            return Err(RealtimeError::InvalidConfiguration(format!(
                "temperature {t} outside supported range 0.6-1.2"
            )));
        }
        if self.validation.buffer_delay_ms > MAX_BUFFER_DELAY_MS {
            return Err(RealtimeError::InvalidConfiguration(format!(
                "buffer delay {}ms exceeds {MAX_BUFFER_DELAY_MS}ms",
                self.validation.buffer_delay_ms
            )));
        }
        if self.validation.enabled && self.validation.rules.trim().is_empty() {
            return Err(RealtimeError::InvalidConfiguration(
                "validation is enabled but no rules are configured".to_string(),
            ));
        }
        Ok(())
    }
}

/// Per-start overrides supplied by the caller of `start()`.
#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    pub voice: Option<String>,
    pub model: Option<String>,
    /// Replaces the base prompt, e.g. instructions carried over from a saved session
    pub instructions: Option<String>,
}

impl StartOptions {
    pub fn apply(&self, settings: &mut SessionSettings) {
        if let Some(voice) = &self.voice {
            settings.voice = voice.clone();
        }
        if let Some(model) = &self.model {
            settings.model = model.clone();
        }
        if let Some(instructions) = &self.instructions {
            settings.instructions = instructions.clone();
        }
    }
}

/// Bounded waits used by the controller.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionTimings {
    /// Proceed with gathered candidates after this long
    pub ice_gathering_timeout: Duration,
    /// From answer applied to `session.updated`
    pub handshake_timeout: Duration,
    /// Pause between `response.cancel` and the sentinel injection
    pub rephrase_settle_delay: Duration,
}

impl Default for SessionTimings {
    fn default() -> Self {
        Self {
            ice_gathering_timeout: Duration::from_millis(3000),
            handshake_timeout: Duration::from_millis(15000),
            rephrase_settle_delay: Duration::from_millis(300),
        }
    }
}
