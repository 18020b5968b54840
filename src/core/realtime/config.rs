//! Constants and voice catalogue for the remote speech model.

use serde::{Deserialize, Serialize};

/// Remote signaling endpoint (SDP offer/answer over HTTPS).
pub const DEFAULT_SIGNALING_URL: &str = "https://api.openai.com/v1/realtime";

/// Remote WebSocket endpoint; control events as text frames.
pub const DEFAULT_WEBSOCKET_URL: &str = "wss://api.openai.com/v1/realtime";

/// Model used when settings do not name one.
pub const DEFAULT_REALTIME_MODEL: &str = "gpt-4o-realtime-preview-2024-12-17";

/// Sample rate of audio produced by the remote model.
pub const REALTIME_SAMPLE_RATE: u32 = 24000;

/// Wire audio format for both directions.
pub const REALTIME_AUDIO_FORMAT: &str = "pcm16";

/// Voices the model can speak with. Anything unrecognised falls back to `Alloy`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RealtimeVoice {
    #[default]
    Alloy,
    Ash,
    Ballad,
    Coral,
    Echo,
    Sage,
    Shimmer,
    Verse,
}

const VOICE_NAMES: [(RealtimeVoice, &str); 8] = [
    (RealtimeVoice::Alloy, "alloy"),
    (RealtimeVoice::Ash, "ash"),
    (RealtimeVoice::Ballad, "ballad"),
    (RealtimeVoice::Coral, "coral"),
    (RealtimeVoice::Echo, "echo"),
    (RealtimeVoice::Sage, "sage"),
    (RealtimeVoice::Shimmer, "shimmer"),
    (RealtimeVoice::Verse, "verse"),
];

impl RealtimeVoice {
    /// Lowercase name sent in `session.update`.
    pub fn as_str(&self) -> &'static str {
        VOICE_NAMES
            .iter()
            .find(|(voice, _)| voice == self)
            .map(|(_, name)| *name)
            .unwrap_or("alloy")
    }

    /// Case-insensitive lookup with the default voice as fallback.
    pub fn from_str_or_default(name: &str) -> Self {
        let wanted = name.trim();
        VOICE_NAMES
            .iter()
            .find(|(_, known)| known.eq_ignore_ascii_case(wanted))
            .map(|(voice, _)| *voice)
            .unwrap_or_default()
    }
}

impl std::fmt::Display for RealtimeVoice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
