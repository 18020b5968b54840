//! Audio tracks, frames and the playback routing graph.
//!
//! Remote model audio arrives as a [`RemoteAudioTrack`] and is played through
//! `source → delay → gain → sink`. The delay holds audio back long enough for
//! a moderation verdict to mute it before it becomes audible.

mod delay;
mod graph;
mod sink;

use tokio::sync::broadcast;

pub use delay::DelayNode;
pub use graph::{AudioRoutingGraph, GainParam};
pub use sink::{DiscardSink, WavFileSink};

/// Frames buffered per subscriber before a slow route starts lagging.
const TRACK_CHANNEL_CAPACITY: usize = 256;

/// A block of mono PCM 16-bit samples.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
}

impl AudioFrame {
    pub fn new(samples: Vec<i16>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    pub fn silence(len: usize, sample_rate: u32) -> Self {
        Self::new(vec![0; len], sample_rate)
    }
}

/// Handle to an incoming media track.
///
/// Cloning shares the underlying stream; the routing graph keeps a clone so it
/// can rebuild its source node without a new track from the transport.
#[derive(Debug, Clone)]
pub struct RemoteAudioTrack {
    id: String,
    frames: broadcast::Sender<AudioFrame>,
}

impl RemoteAudioTrack {
    pub fn new(id: impl Into<String>) -> Self {
        let (frames, _) = broadcast::channel(TRACK_CHANNEL_CAPACITY);
        Self {
            id: id.into(),
            frames,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Feed a decoded frame into the track. Returns false when nothing is routed.
    pub fn push(&self, frame: AudioFrame) -> bool {
        self.frames.send(frame).is_ok()
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<AudioFrame> {
        self.frames.subscribe()
    }
}

/// Outgoing microphone track attached to the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalAudioTrack {
    pub id: String,
    /// True for the muted track used in text mode
    pub placeholder: bool,
}

impl LocalAudioTrack {
    pub fn placeholder() -> Self {
        Self {
            id: format!("placeholder-{}", uuid::Uuid::new_v4()),
            placeholder: true,
        }
    }
}

/// Final stage of the routing graph, typically the speaker.
pub trait AudioSink: Send + Sync {
    fn write(&self, frame: AudioFrame);
}
