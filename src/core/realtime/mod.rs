//! Realtime session engine.
//!
//! One long-lived session with a remote speech model: a peer connection
//! carrying audio plus a JSON control channel beside it.
//!
//! # Architecture
//!
//! - [`SessionController`] owns the lifecycle and routes every inbound
//!   control event to the component that handles it
//! - [`transport`] and [`signaling`] are the seams to the media stack and
//!   the SDP offer/answer endpoint
//! - [`websocket`] is a ready-made transport that carries the control channel
//!   and model audio over one WebSocket
//! - [`messages`] is the control-channel wire format
//! - [`events`] is what observers see
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use waav_sentinel::core::realtime::{SessionController, StartOptions};
//!
//! let (handle, task) = SessionController::spawn(settings, deps, Some(Arc::new(|event| {
//!     Box::pin(async move {
//!         println!("{}", event.name());
//!     })
//! })));
//!
//! handle.start(StartOptions::default()).await?;
//! handle.send_text("What are your opening hours?").await?;
//! handle.stop().await?;
//! ```

mod base;
pub mod config;
pub mod controller;
pub mod events;
pub mod messages;
pub mod session;
pub mod signaling;
pub mod transport;
pub mod websocket;

pub use base::{
    CaptureError, DEFAULT_REPHRASE_MESSAGE, FirstSpeaker, MAX_BUFFER_DELAY_MS, RealtimeError,
    RealtimeResult, SessionMode, SessionSettings, SessionState, SessionTimings, StartOptions,
    TurnDetectionConfig, ValidationSettings,
};
pub use config::{
    DEFAULT_REALTIME_MODEL, DEFAULT_SIGNALING_URL, DEFAULT_WEBSOCKET_URL, REALTIME_SAMPLE_RATE,
    RealtimeVoice,
};
pub use controller::{SessionController, SessionDependencies, SessionHandle};
pub use events::{SessionEvent, SessionEventCallback, SessionSnapshot};
pub use messages::{ClientEvent, ServerEvent};
pub use session::{DeltaDisposition, PendingToolCall, Session, Turn, TurnStatus};
pub use signaling::{DEFAULT_SIGNALING_TIMEOUT, HttpSignaling, Signaling};
pub use transport::{
    AudioCapture, PeerConnection, PeerFactory, PlaceholderCapture, TransportEvent,
};
pub use websocket::{DEFAULT_CONNECT_TIMEOUT, WebSocketPeer, WebSocketPeerFactory};
