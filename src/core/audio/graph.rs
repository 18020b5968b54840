use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::Mutex;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{AudioFrame, AudioSink, DelayNode, RemoteAudioTrack};
use crate::core::realtime::ValidationSettings;

/// Output gain shared between the controller and the playback task.
#[derive(Debug)]
pub struct GainParam(AtomicU32);

impl GainParam {
    pub fn new(value: f32) -> Self {
        Self(AtomicU32::new(value.to_bits()))
    }

    pub fn get(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Acquire))
    }

    /// Store a new value clamped to `0.0..=1.0`. Returns whether it changed.
    pub fn set(&self, value: f32) -> bool {
        let value = value.clamp(0.0, 1.0);
        self.0.swap(value.to_bits(), Ordering::AcqRel) != value.to_bits()
    }

    fn apply(&self, samples: &mut [i16]) {
        let gain = self.get();
        if gain >= 1.0 {
            return;
        }
        if gain <= 0.0 {
            samples.fill(0);
            return;
        }
        for s in samples.iter_mut() {
            *s = (f32::from(*s) * gain) as i16;
        }
    }
}

/// The live `source → delay → gain → sink` wiring.
struct AudioRoute {
    track_id: String,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Playback graph for the remote model's audio.
///
/// Owned by the session controller and mutated only from its task. At most
/// one route is connected at a time; attaching or reconnecting detaches the
/// previous source first. The delay and gain nodes outlive routes, so audio
/// already inside the delay line keeps its position across a reconnect.
pub struct AudioRoutingGraph {
    sink: Arc<dyn AudioSink>,
    delay: Arc<Mutex<DelayNode>>,
    gain: Arc<GainParam>,
    track: Option<RemoteAudioTrack>,
    route: Option<AudioRoute>,
}

impl AudioRoutingGraph {
    pub fn new(sink: Arc<dyn AudioSink>) -> Self {
        Self {
            sink,
            delay: Arc::new(Mutex::new(DelayNode::new(std::time::Duration::ZERO))),
            gain: Arc::new(GainParam::new(1.0)),
            track: None,
            route: None,
        }
    }

    /// Apply the session's validation settings to the delay node.
    pub fn configure(&self, validation: &ValidationSettings) {
        let delay = validation.effective_delay();
        self.delay.lock().set_delay(delay);
        debug!(delay_ms = delay.as_millis() as u64, "Audio delay configured");
    }

    /// Route a newly received remote track, replacing any previous source.
    pub fn attach(&mut self, track: RemoteAudioTrack) {
        self.detach();
        self.track = Some(track);
        self.connect();
    }

    /// Rebuild the source node from the stored track.
    ///
    /// Returns false when no track has been received yet.
    pub fn reconnect(&mut self) -> bool {
        if self.track.is_none() {
            return false;
        }
        self.detach();
        self.connect();
        true
    }

    /// Set output gain. Returns whether the value changed.
    pub fn set_gain(&self, value: f32) -> bool {
        self.gain.set(value)
    }

    pub fn gain(&self) -> f32 {
        self.gain.get()
    }

    /// Drop audio held in the delay line, replacing it with silence.
    pub fn discard_buffered(&self) {
        self.delay.lock().reset();
    }

    pub fn is_connected(&self) -> bool {
        self.route.is_some()
    }

    pub fn track_id(&self) -> Option<&str> {
        self.route.as_ref().map(|r| r.track_id.as_str())
    }

    /// Disconnect everything and forget the stored track.
    pub fn teardown(&mut self) {
        self.detach();
        self.track = None;
        self.delay.lock().reset();
        self.gain.set(1.0);
    }

    fn detach(&mut self) {
        if let Some(route) = self.route.take() {
            route.cancel.cancel();
            route.task.abort();
            debug!(track_id = %route.track_id, "Audio route detached");
        }
    }

    fn connect(&mut self) {
        let Some(track) = self.track.as_ref() else {
            return;
        };
        let cancel = CancellationToken::new();
        let task = tokio::spawn(pump(
            track.subscribe(),
            self.delay.clone(),
            self.gain.clone(),
            self.sink.clone(),
            cancel.clone(),
        ));
        debug!(track_id = %track.id(), "Audio route connected");
        self.route = Some(AudioRoute {
            track_id: track.id().to_string(),
            cancel,
            task,
        });
    }
}

impl Drop for AudioRoutingGraph {
    fn drop(&mut self) {
        self.detach();
    }
}

async fn pump(
    mut frames: broadcast::Receiver<AudioFrame>,
    delay: Arc<Mutex<DelayNode>>,
    gain: Arc<GainParam>,
    sink: Arc<dyn AudioSink>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            frame = frames.recv() => match frame {
                Ok(frame) => {
                    let mut out = delay.lock().process(frame);
                    gain.apply(&mut out.samples);
                    sink.write(out);
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Audio route lagging; frames dropped");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }
}
