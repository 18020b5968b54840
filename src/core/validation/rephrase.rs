//! Rephrase protocol: mute → cancel → settle → inject → regenerate.
//!
//! The controller executes the steps; this module owns the wording and the
//! messages so they stay consistent with the instructions given to the model.
//!
//! The playback delay must cover the round trip of the first three steps for
//! the mute to land before the offending audio is audible. That relationship
//! is a deployment setting and is not checked here.

use std::time::Duration;

use crate::core::realtime::messages::{ClientEvent, ConversationItem};

/// Marker the model is told to treat as "your last answer was withheld".
pub const REPHRASE_SENTINEL: &str = "[[REPHRASE_REQUIRED]]";

/// Prompt text appended to the base instructions when validation is enabled.
pub fn validation_awareness_instructions(rules: &str) -> String {
    format!(
        "Your answers are checked against these conversation rules: {rules}\n\
         If you receive a user message starting with {REPHRASE_SENTINEL}, your previous answer \
         was withheld because it broke the rules. Answer the user's last request again so that \
         it follows the rules. Do not mention the withheld answer or the marker."
    )
}

/// Message plan for one rejected turn.
#[derive(Debug, Clone)]
pub struct RephraseProtocol {
    settle_delay: Duration,
    message: String,
}

impl RephraseProtocol {
    pub fn new(settle_delay: Duration, message: impl Into<String>) -> Self {
        Self {
            settle_delay,
            message: message.into(),
        }
    }

    pub fn settle_delay(&self) -> Duration {
        self.settle_delay
    }

    /// Cancels the in-flight turn. Harmless if the turn already finished.
    pub fn cancel_event(&self) -> ClientEvent {
        ClientEvent::ResponseCancel
    }

    pub fn sentinel_text(&self) -> String {
        format!("{REPHRASE_SENTINEL} {}", self.message)
    }

    /// Sentinel user message followed by a new turn request.
    pub fn injection_events(&self) -> [ClientEvent; 2] {
        [
            ClientEvent::ConversationItemCreate {
                item: ConversationItem::user_text(self.sentinel_text()),
            },
            ClientEvent::ResponseCreate,
        ]
    }
}
