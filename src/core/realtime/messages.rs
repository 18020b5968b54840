//! Control-channel wire format.
//!
//! Each message is a single JSON object on the reliable data channel that
//! runs beside the media track, discriminated by its `type` field.
//! [`ClientEvent`] covers what the engine sends; [`ServerEvent`] covers the
//! subset of remote events it acts on. Any other remote event type decodes to
//! [`ServerEvent::Other`].

use serde::{Deserialize, Serialize};

use super::base::TurnDetectionConfig;

/// Body of `session.update`.
#[derive(Debug, Clone, Serialize)]
pub struct SessionConfig {
    pub modalities: Vec<String>,
    pub instructions: String,
    pub voice: String,
    pub input_audio_format: &'static str,
    pub output_audio_format: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_transcription: Option<InputAudioTranscription>,
    /// `None` serializes as `null`, which turns server VAD off.
    pub turn_detection: Option<TurnDetectionConfig>,
    pub tools: Vec<ToolDef>,
    /// `"auto"` when tools are registered, `"none"` otherwise.
    pub tool_choice: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    pub max_response_output_tokens: MaxTokens,
}

/// Either a hard limit or the literal string `"inf"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MaxTokens {
    Number(u32),
    Infinite(String),
}

impl MaxTokens {
    pub fn from_limit(limit: Option<u32>) -> Self {
        limit.map_or_else(|| MaxTokens::Infinite("inf".to_string()), MaxTokens::Number)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct InputAudioTranscription {
    pub model: String,
}

/// A function the model may call, as advertised in `session.update`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDef {
    #[serde(rename = "type")]
    pub tool_type: String,
    pub name: String,
    pub description: String,
    /// JSON schema of the arguments object.
    pub parameters: serde_json::Value,
}

/// Items the engine adds to the remote conversation.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConversationItem {
    Message {
        role: &'static str,
        content: Vec<ContentPart>,
    },
    FunctionCallOutput {
        call_id: String,
        output: String,
    },
}

impl ConversationItem {
    /// A user-role message carrying typed text.
    pub fn user_text(text: impl Into<String>) -> Self {
        ConversationItem::Message {
            role: "user",
            content: vec![ContentPart::InputText { text: text.into() }],
        }
    }

    /// The result of a function call, tagged with the original call id.
    pub fn function_output(call_id: impl Into<String>, output: impl Into<String>) -> Self {
        ConversationItem::FunctionCallOutput {
            call_id: call_id.into(),
            output: output.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    InputText { text: String },
}

/// Events sent to the model.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionConfig },
    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate { item: ConversationItem },
    #[serde(rename = "response.create")]
    ResponseCreate,
    #[serde(rename = "response.cancel")]
    ResponseCancel,
}

impl ClientEvent {
    /// Wire name of the event.
    pub fn event_type(&self) -> &'static str {
        match self {
            ClientEvent::SessionUpdate { .. } => "session.update",
            ClientEvent::ConversationItemCreate { .. } => "conversation.item.create",
            ClientEvent::ResponseCreate => "response.create",
            ClientEvent::ResponseCancel => "response.cancel",
        }
    }
}

/// Events received from the model.
///
/// Audio itself travels on the media track, so `response.audio.*` events
/// carry nothing the engine needs and land in `Other` with everything else.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "error")]
    Error { error: ApiError },

    #[serde(rename = "session.created")]
    SessionCreated {
        #[serde(default)]
        session: RemoteSession,
    },

    #[serde(rename = "session.updated")]
    SessionUpdated {
        #[serde(default)]
        session: RemoteSession,
    },

    /// Final transcript of what the user said.
    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    TranscriptionCompleted {
        #[serde(default)]
        item_id: String,
        transcript: String,
    },

    #[serde(rename = "response.created")]
    ResponseCreated { response: Response },

    #[serde(rename = "response.done")]
    ResponseDone { response: Response },

    /// Announces a new output item; function calls carry their name here.
    #[serde(rename = "response.output_item.added")]
    OutputItemAdded { item: OutputItem },

    #[serde(rename = "response.text.delta")]
    TextDelta {
        #[serde(default)]
        response_id: String,
        delta: String,
    },

    #[serde(rename = "response.audio_transcript.delta")]
    AudioTranscriptDelta {
        #[serde(default)]
        response_id: String,
        delta: String,
    },

    /// Older revisions leave out `name`; it then comes from [`OutputItem`].
    #[serde(rename = "response.function_call_arguments.done")]
    FunctionCallArgumentsDone {
        call_id: String,
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        arguments: String,
    },

    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ApiError {
    #[serde(rename = "type")]
    pub error_type: String,
    pub code: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RemoteSession {
    pub id: String,
    pub model: Option<String>,
    pub modalities: Vec<String>,
}

/// Output item header from `response.output_item.added`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct OutputItem {
    #[serde(rename = "type")]
    pub item_type: String,
    pub call_id: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Response {
    pub id: String,
    /// One of `in_progress`, `completed`, `cancelled`, `incomplete`, `failed`.
    pub status: String,
    /// Only present on `response.done`.
    pub usage: Option<Usage>,
}

/// Raw per-turn token counts as reported by the model.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Usage {
    pub total_tokens: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub input_token_details: Option<InputTokenDetails>,
    pub output_token_details: Option<TokenDetails>,
}

/// Input breakdown. `cached_tokens` is already counted inside the text and
/// audio figures; `cached_tokens_details` says how it splits between them.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct InputTokenDetails {
    pub cached_tokens: Option<u64>,
    pub text_tokens: Option<u64>,
    pub audio_tokens: Option<u64>,
    pub cached_tokens_details: Option<TokenDetails>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TokenDetails {
    pub text_tokens: Option<u64>,
    pub audio_tokens: Option<u64>,
}
