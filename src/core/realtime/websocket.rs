//! Realtime transport over a single WebSocket.
//!
//! # API Reference
//!
//! - Endpoint: `wss://api.openai.com/v1/realtime?model=<model>`
//! - Headers: `Authorization: Bearer <key>`, `OpenAI-Beta: realtime=v1`
//! - Control events travel as JSON text frames in both directions
//! - Model audio arrives as base64 PCM16 inside `response.audio.delta`
//!
//! The connection is open when the factory returns it, so there is no SDP
//! exchange. Audio deltas are decoded onto a [`RemoteAudioTrack`] and never
//! reach the controller as control messages.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use base64::prelude::*;
use futures_util::{SinkExt, StreamExt};
use http::HeaderValue;
use http::header::AUTHORIZATION;
use serde::Deserialize;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use super::base::{RealtimeError, RealtimeResult};
use super::config::REALTIME_SAMPLE_RATE;
use super::transport::{PeerConnection, PeerFactory, TransportEvent};
use crate::core::audio::{AudioFrame, LocalAudioTrack, RemoteAudioTrack};

/// Default bound on the WebSocket upgrade.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

const OUTBOUND_CAPACITY: usize = 64;
const EVENT_CAPACITY: usize = 256;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens one WebSocket per session.
pub struct WebSocketPeerFactory {
    endpoint: Url,
    api_key: String,
    connect_timeout: Duration,
}

impl WebSocketPeerFactory {
    pub fn new(
        endpoint: Url,
        api_key: impl Into<String>,
        connect_timeout: Duration,
    ) -> RealtimeResult<Self> {
        let api_key = api_key.into();
        if api_key.is_empty() {
            return Err(RealtimeError::AuthenticationFailed(
                "API key is required".to_string(),
            ));
        }
        Ok(Self {
            endpoint,
            api_key,
            connect_timeout,
        })
    }

    fn build_url(&self, model: &str) -> Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut().append_pair("model", model);
        url
    }

    fn build_request(&self, model: &str) -> RealtimeResult<http::Request<()>> {
        let mut request = self
            .build_url(model)
            .as_str()
            .into_client_request()
            .map_err(|e| RealtimeError::InvalidConfiguration(format!("Invalid WebSocket URL: {e}")))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", self.api_key)).map_err(|_| {
            RealtimeError::InvalidConfiguration("API key is not a valid header value".to_string())
        })?;

        let headers = request.headers_mut();
        headers.insert(AUTHORIZATION, bearer);
        headers.insert("openai-beta", HeaderValue::from_static("realtime=v1"));
        Ok(request)
    }
}

fn map_connect_error(e: tungstenite::Error) -> RealtimeError {
    match e {
        tungstenite::Error::Http(response)
            if matches!(response.status().as_u16(), 401 | 403) =>
        {
            RealtimeError::AuthenticationFailed(format!(
                "WebSocket upgrade rejected with HTTP {}",
                response.status().as_u16()
            ))
        }
        other => RealtimeError::ConnectionFailed(other.to_string()),
    }
}

#[async_trait]
impl PeerFactory for WebSocketPeerFactory {
    async fn create(
        &self,
        model: &str,
    ) -> RealtimeResult<(Box<dyn PeerConnection>, mpsc::Receiver<TransportEvent>)> {
        let request = self.build_request(model)?;
        debug!(endpoint = %self.endpoint, %model, "Opening realtime WebSocket");

        let (stream, _response) =
            tokio::time::timeout(self.connect_timeout, tokio_tungstenite::connect_async(request))
                .await
                .map_err(|_| {
                    RealtimeError::Timeout(format!(
                        "WebSocket connect did not finish within {} ms",
                        self.connect_timeout.as_millis()
                    ))
                })?
                .map_err(map_connect_error)?;
        info!(%model, "Connected to realtime WebSocket");

        let (events_tx, events_rx) = mpsc::channel(EVENT_CAPACITY);
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let cancel = CancellationToken::new();
        let track = RemoteAudioTrack::new(format!("ws-audio-{}", uuid::Uuid::new_v4()));

        let _ = events_tx.send(TransportEvent::ControlOpened).await;
        let _ = events_tx.send(TransportEvent::RemoteTrack(track.clone())).await;
        tokio::spawn(run_connection(
            stream,
            outbound_rx,
            events_tx,
            track,
            cancel.clone(),
        ));

        let peer = WebSocketPeer {
            outbound: outbound_tx,
            cancel,
            closed: AtomicBool::new(false),
        };
        Ok((Box::new(peer), events_rx))
    }
}

/// Writer side of an open WebSocket; the socket itself lives in a spawned task.
pub struct WebSocketPeer {
    outbound: mpsc::Sender<String>,
    cancel: CancellationToken,
    closed: AtomicBool,
}

impl WebSocketPeer {
    fn no_sdp() -> RealtimeError {
        RealtimeError::InvalidState("WebSocket sessions do not exchange SDP".to_string())
    }
}

#[async_trait]
impl PeerConnection for WebSocketPeer {
    fn uses_signaling(&self) -> bool {
        false
    }

    async fn add_local_track(&self, track: &LocalAudioTrack) -> RealtimeResult<()> {
        if !track.placeholder {
            warn!(track_id = %track.id, "Microphone audio is not carried over the WebSocket");
        }
        Ok(())
    }

    async fn create_offer(&self) -> RealtimeResult<()> {
        Err(Self::no_sdp())
    }

    async fn ice_gathering_complete(&self) {}

    async fn local_description(&self) -> RealtimeResult<String> {
        Err(Self::no_sdp())
    }

    async fn apply_answer(&self, _sdp: &str) -> RealtimeResult<()> {
        Err(Self::no_sdp())
    }

    async fn send_control(&self, message: &str) -> RealtimeResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RealtimeError::ConnectionFailed(
                "WebSocket already closed".to_string(),
            ));
        }
        self.outbound
            .send(message.to_string())
            .await
            .map_err(|_| RealtimeError::ConnectionFailed("WebSocket closed".to_string()))
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!("Closing realtime WebSocket");
            self.cancel.cancel();
        }
    }
}

impl Drop for WebSocketPeer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Pump frames until the socket ends or the peer is closed.
///
/// `Disconnected` is reported only when the remote side ends the connection.
async fn run_connection(
    stream: WsStream,
    mut outbound: mpsc::Receiver<String>,
    events: mpsc::Sender<TransportEvent>,
    track: RemoteAudioTrack,
    cancel: CancellationToken,
) {
    let (mut sink, mut stream) = stream.split();

    let reason = loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                // Flush what was queued before the close
                while let Ok(text) = outbound.try_recv() {
                    if sink.send(Message::Text(text.into())).await.is_err() {
                        return;
                    }
                }
                let _ = sink.send(Message::Close(None)).await;
                return;
            }

            Some(text) = outbound.recv() => {
                if let Err(e) = sink.send(Message::Text(text.into())).await {
                    break format!("send failed: {e}");
                }
            }

            message = stream.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    if let Some(payload) = audio_delta_payload(text.as_str()) {
                        match pcm16_frame(&payload) {
                            Ok(frame) => {
                                track.push(frame);
                            }
                            Err(e) => warn!(error = %e, "Failed to decode audio delta"),
                        }
                        continue;
                    }
                    if events
                        .send(TransportEvent::ControlMessage(text.as_str().to_string()))
                        .await
                        .is_err()
                    {
                        return;
                    }
                }
                Some(Ok(Message::Ping(data))) => {
                    if let Err(e) = sink.send(Message::Pong(data)).await {
                        break format!("pong failed: {e}");
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    break match frame {
                        Some(frame) => format!(
                            "closed by server ({}): {}",
                            u16::from(frame.code),
                            frame.reason.as_str()
                        ),
                        None => "closed by server".to_string(),
                    };
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => break format!("WebSocket error: {e}"),
                None => break "WebSocket stream ended".to_string(),
            },
        }
    };

    warn!(%reason, "Realtime WebSocket ended");
    let _ = events.send(TransportEvent::Disconnected { reason }).await;
}

#[derive(Deserialize)]
struct MediaEnvelope {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    delta: String,
}

/// Base64 payload of a `response.audio.delta` message.
fn audio_delta_payload(text: &str) -> Option<String> {
    let envelope: MediaEnvelope = serde_json::from_str(text).ok()?;
    (envelope.event_type == "response.audio.delta").then_some(envelope.delta)
}

/// Little-endian PCM16 at the model's output rate.
fn pcm16_frame(payload: &str) -> Result<AudioFrame, base64::DecodeError> {
    let bytes = BASE64_STANDARD.decode(payload)?;
    let samples = bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    Ok(AudioFrame::new(samples, REALTIME_SAMPLE_RATE))
}
