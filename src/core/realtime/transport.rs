//! Connection and capture seams.
//!
//! The media stack (peer connection, data channel, microphone) is platform
//! specific, so the controller talks to it through these traits. Events flow
//! back on an mpsc channel handed out when the connection is created.
//!
//! A connection that is already open when the factory returns it (see
//! [`super::websocket`]) reports `uses_signaling() == false` and skips the
//! offer/answer exchange.

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::base::{CaptureError, RealtimeResult};
use crate::core::audio::{LocalAudioTrack, RemoteAudioTrack};

/// Events raised by a connection after creation.
#[derive(Debug)]
pub enum TransportEvent {
    /// Control channel is open and ready for JSON messages
    ControlOpened,
    /// One JSON object received on the control channel
    ControlMessage(String),
    /// The remote model's audio track arrived
    RemoteTrack(RemoteAudioTrack),
    /// Connection or control channel failed or closed
    Disconnected { reason: String },
}

/// One peer connection to the remote model with its control channel.
///
/// Methods take `&self`; implementations synchronize internally.
#[async_trait]
pub trait PeerConnection: Send + Sync {
    /// Whether the connection needs an SDP offer/answer before it opens.
    fn uses_signaling(&self) -> bool {
        true
    }

    /// Attach the outgoing audio track. Called before the offer is created.
    async fn add_local_track(&self, track: &LocalAudioTrack) -> RealtimeResult<()>;

    /// Create an SDP offer and install it as the local description.
    async fn create_offer(&self) -> RealtimeResult<()>;

    /// Resolve once ICE gathering has completed.
    async fn ice_gathering_complete(&self);

    /// Current local description including gathered candidates.
    async fn local_description(&self) -> RealtimeResult<String>;

    /// Install the remote answer.
    async fn apply_answer(&self, sdp: &str) -> RealtimeResult<()>;

    /// Send one JSON message on the control channel.
    async fn send_control(&self, message: &str) -> RealtimeResult<()>;

    /// Close the control channel and the connection. Idempotent.
    async fn close(&self);
}

/// Creates peer connections.
#[async_trait]
pub trait PeerFactory: Send + Sync {
    async fn create(
        &self,
        model: &str,
    ) -> RealtimeResult<(Box<dyn PeerConnection>, mpsc::Receiver<TransportEvent>)>;
}

/// Local microphone access.
#[async_trait]
pub trait AudioCapture: Send + Sync {
    async fn acquire(&self) -> Result<LocalAudioTrack, CaptureError>;

    /// Release a track returned by `acquire`. Idempotent.
    async fn release(&self, track: &LocalAudioTrack);
}

/// Capture for hosts without a microphone; input is typed instead.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlaceholderCapture;

#[async_trait]
impl AudioCapture for PlaceholderCapture {
    async fn acquire(&self) -> Result<LocalAudioTrack, CaptureError> {
        Ok(LocalAudioTrack::placeholder())
    }

    async fn release(&self, _track: &LocalAudioTrack) {}
}
