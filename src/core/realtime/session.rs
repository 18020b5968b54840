//! Session value object and its turn bookkeeping.
//!
//! Owned exclusively by the controller task; nothing here is shared.

use std::collections::HashMap;

use tracing::debug;

use super::base::{FirstSpeaker, SessionMode, SessionSettings};
use super::config::{REALTIME_AUDIO_FORMAT, RealtimeVoice};
use super::messages::{InputAudioTranscription, MaxTokens, SessionConfig, ToolDef};
use crate::core::usage::UsageTimeline;
use crate::core::validation::validation_awareness_instructions;

// =============================================================================
// Turn
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnStatus {
    InFlight,
    Completed,
    Cancelled,
}

impl TurnStatus {
    /// Map a `response.done` status string.
    pub fn from_response_status(status: &str) -> Self {
        match status {
            "cancelled" => TurnStatus::Cancelled,
            _ => TurnStatus::Completed,
        }
    }
}

/// One model-generated response.
#[derive(Debug, Clone)]
pub struct Turn {
    pub id: String,
    /// Remote response id; empty for an implicit turn until `response.done`
    pub response_id: String,
    pub transcript: String,
    pub status: TurnStatus,
}

impl Turn {
    fn new(response_id: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            response_id: response_id.into(),
            transcript: String::new(),
            status: TurnStatus::InFlight,
        }
    }

    fn matches(&self, response_id: &str) -> bool {
        response_id.is_empty() || self.response_id.is_empty() || self.response_id == response_id
    }
}

/// What happened to a transcript delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaDisposition {
    Appended,
    /// No turn was open; one was created
    ImplicitTurn,
    /// Belongs to a different response; dropped
    Stale,
}

/// An outstanding model function invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingToolCall {
    pub call_id: String,
    pub name: String,
    pub arguments: String,
    pub turn_id: Option<String>,
}

// =============================================================================
// Session
// =============================================================================

/// State of the one live session.
#[derive(Debug)]
pub struct Session {
    pub settings: SessionSettings,
    pub remote_session_id: Option<String>,
    pub greeting_sent: bool,
    pub usage: UsageTimeline,
    /// Turn whose rejection muted the output; cleared when the next turn starts
    pub muted_for: Option<String>,
    current_turn: Option<Turn>,
    pending_tool_calls: HashMap<String, PendingToolCall>,
    function_names: HashMap<String, String>,
}

impl Session {
    pub fn new(settings: SessionSettings) -> Self {
        Self {
            settings,
            remote_session_id: None,
            greeting_sent: false,
            usage: UsageTimeline::new(),
            muted_for: None,
            current_turn: None,
            pending_tool_calls: HashMap::new(),
            function_names: HashMap::new(),
        }
    }

    pub fn current_turn(&self) -> Option<&Turn> {
        self.current_turn.as_ref()
    }

    /// Start a turn for `response.created`, replacing any unfinished one.
    pub fn begin_turn(&mut self, response_id: &str) -> &Turn {
        if let Some(previous) = self.current_turn.take()
            && previous.status == TurnStatus::InFlight
        {
            debug!(turn_id = %previous.id, "Replacing unfinished turn");
        }
        self.current_turn.insert(Turn::new(response_id))
    }

    /// Append transcript text to the turn that owns `response_id`.
    pub fn append_delta(&mut self, response_id: &str, delta: &str) -> DeltaDisposition {
        match self.current_turn.as_mut() {
            Some(turn) if turn.status == TurnStatus::InFlight && turn.matches(response_id) => {
                if turn.response_id.is_empty() {
                    turn.response_id = response_id.to_string();
                }
                turn.transcript.push_str(delta);
                DeltaDisposition::Appended
            }
            Some(turn) if turn.status == TurnStatus::InFlight => DeltaDisposition::Stale,
            _ => {
                let mut turn = Turn::new(response_id);
                turn.transcript.push_str(delta);
                self.current_turn = Some(turn);
                DeltaDisposition::ImplicitTurn
            }
        }
    }

    /// Close the turn for `response.done`. Returns the finalized turn, or
    /// `None` when the event belongs to no known turn.
    pub fn finish_turn(&mut self, response_id: &str, status: TurnStatus) -> Option<Turn> {
        let matches = self
            .current_turn
            .as_ref()
            .is_some_and(|turn| turn.status == TurnStatus::InFlight && turn.matches(response_id));
        if !matches {
            return None;
        }
        let mut turn = self.current_turn.take()?;
        if turn.response_id.is_empty() {
            turn.response_id = response_id.to_string();
        }
        turn.status = status;
        Some(turn)
    }

    /// Remember the function name announced by `response.output_item.added`.
    pub fn record_function_name(&mut self, call_id: &str, name: &str) {
        self.function_names
            .insert(call_id.to_string(), name.to_string());
    }

    /// Name from the arguments event, else the one recorded earlier.
    pub fn resolve_function_name(&self, call_id: &str, announced: Option<&str>) -> String {
        announced
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .or_else(|| self.function_names.get(call_id).cloned())
            .unwrap_or_default()
    }

    /// Register a call. Returns false if the call id is already pending.
    pub fn add_pending_call(&mut self, call: PendingToolCall) -> bool {
        if self.pending_tool_calls.contains_key(&call.call_id) {
            return false;
        }
        self.pending_tool_calls.insert(call.call_id.clone(), call);
        true
    }

    pub fn complete_pending_call(&mut self, call_id: &str) -> Option<PendingToolCall> {
        self.function_names.remove(call_id);
        self.pending_tool_calls.remove(call_id)
    }

    pub fn pending_call_count(&self) -> usize {
        self.pending_tool_calls.len()
    }

    /// Base prompt plus validation awareness and greeting instructions.
    pub fn compose_instructions(&self) -> String {
        let settings = &self.settings;
        let mut parts = vec![settings.instructions.trim().to_string()];

        if settings.validation.enabled && !settings.validation.rules.trim().is_empty() {
            parts.push(validation_awareness_instructions(settings.validation.rules.trim()));
        }

        if settings.first_speaker == FirstSpeaker::Model {
            let greeting = settings
                .greeting_instructions
                .as_deref()
                .map(str::trim)
                .filter(|g| !g.is_empty())
                .unwrap_or(DEFAULT_GREETING_INSTRUCTIONS);
            parts.push(greeting.to_string());
        }

        parts.retain(|p| !p.is_empty());
        parts.join("\n\n")
    }

    /// Effective configuration for `session.update`.
    pub fn session_config(&self, tools: Vec<ToolDef>) -> SessionConfig {
        let settings = &self.settings;
        let voice = RealtimeVoice::from_str_or_default(&settings.voice);
        let tool_choice = if tools.is_empty() { "none" } else { "auto" };

        let (turn_detection, input_audio_transcription) = match settings.mode {
            SessionMode::Text => (None, None),
            SessionMode::Voice => (
                Some(settings.turn_detection.clone()),
                settings
                    .input_transcription_model
                    .as_ref()
                    .filter(|m| !m.is_empty())
                    .map(|model| InputAudioTranscription {
                        model: model.clone(),
                    }),
            ),
        };

        SessionConfig {
            modalities: settings.mode.modalities(),
            instructions: self.compose_instructions(),
            voice: voice.as_str().to_string(),
            input_audio_format: REALTIME_AUDIO_FORMAT,
            output_audio_format: REALTIME_AUDIO_FORMAT,
            input_audio_transcription,
            turn_detection,
            tools,
            tool_choice: tool_choice.to_string(),
            temperature: settings.temperature,
            max_response_output_tokens: MaxTokens::from_limit(settings.max_output_tokens),
        }
    }
}

/// Used when the model speaks first and no greeting text is configured.
pub const DEFAULT_GREETING_INSTRUCTIONS: &str =
    "Start the conversation by greeting the user briefly and asking how you can help.";
