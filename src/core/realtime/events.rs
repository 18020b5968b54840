//! Observable event stream.
//!
//! One callback receives every inbound control event (as raw JSON) plus the
//! events synthesized by the controller for validation, tool calls, usage and
//! lifecycle changes. The callback is the only way in-session errors surface.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::Serialize;

use super::base::SessionState;
use crate::core::usage::{CostBreakdown, TokenBuckets, UsageSample};

/// Callback type for session events.
pub type SessionEventCallback =
    Arc<dyn Fn(SessionEvent) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Events delivered to observers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    StateChanged {
        from: SessionState,
        to: SessionState,
    },

    /// Any inbound control message, passed through unchanged
    Inbound {
        event_type: String,
        payload: serde_json::Value,
    },

    GainChanged {
        gain: f32,
    },

    ValidationPassed {
        turn_id: String,
    },

    /// Moderation failed; the turn was treated as valid
    ValidationFailedOpen {
        turn_id: String,
        error: String,
    },

    ValidationFailed {
        turn_id: String,
        reason: String,
    },

    /// Sentinel message injected and a new turn requested
    RephraseRequested {
        turn_id: String,
    },

    ToolCallRequested {
        call_id: String,
        name: String,
        arguments: String,
    },

    ToolCallCompleted {
        call_id: String,
        name: String,
        success: bool,
        output: String,
    },

    Sentiment {
        item_id: String,
        transcript: String,
        label: String,
        score: f32,
    },

    Usage {
        sample: UsageSample,
        totals: TokenBuckets,
        cost: CostBreakdown,
    },

    /// `error` event from the remote model
    RemoteError {
        code: Option<String>,
        message: String,
    },

    /// The connection failed after startup
    Disconnected {
        reason: String,
    },
}

impl SessionEvent {
    pub fn name(&self) -> &'static str {
        match self {
            SessionEvent::StateChanged { .. } => "state_changed",
            SessionEvent::Inbound { .. } => "inbound",
            SessionEvent::GainChanged { .. } => "gain_changed",
            SessionEvent::ValidationPassed { .. } => "validation_passed",
            SessionEvent::ValidationFailedOpen { .. } => "validation_failed_open",
            SessionEvent::ValidationFailed { .. } => "validation_failed",
            SessionEvent::RephraseRequested { .. } => "rephrase_requested",
            SessionEvent::ToolCallRequested { .. } => "tool_call_requested",
            SessionEvent::ToolCallCompleted { .. } => "tool_call_completed",
            SessionEvent::Sentiment { .. } => "sentiment",
            SessionEvent::Usage { .. } => "usage",
            SessionEvent::RemoteError { .. } => "remote_error",
            SessionEvent::Disconnected { .. } => "disconnected",
        }
    }
}

/// Point-in-time view of the controller.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub gain: f32,
    pub remote_session_id: Option<String>,
    pub greeting_sent: bool,
    pub pending_tool_calls: usize,
    pub usage: TokenBuckets,
    pub cost: CostBreakdown,
}
