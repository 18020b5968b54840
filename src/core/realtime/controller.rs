//! Session protocol state machine.
//!
//! A single controller task owns the [`Session`], the connection and the
//! audio routing graph. It reacts to three inputs, strictly one at a time:
//!
//! - commands from [`SessionHandle`] (start, stop, send text, ...)
//! - transport events (control messages, remote track, disconnects)
//! - completions of asynchronous work it spawned (negotiation, moderation,
//!   tool calls, sentiment, the rephrase settle delay)
//!
//! Spawned work never touches controller state. It posts a completion message
//! tagged with the session epoch; completions from an older epoch are
//! discarded, so results arriving after `stop()` are dropped.
//!
//! # Lifecycle
//!
//! ```text
//! idle → negotiating → configuring → active → closing → idle
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::base::{
    FirstSpeaker, RealtimeError, RealtimeResult, SessionMode, SessionSettings, SessionState,
    SessionTimings, StartOptions,
};
use super::events::{SessionEvent, SessionEventCallback, SessionSnapshot};
use super::messages::{ClientEvent, ConversationItem, RemoteSession, Response, ServerEvent};
use super::session::{DeltaDisposition, PendingToolCall, Session, TurnStatus};
use super::signaling::Signaling;
use super::transport::{AudioCapture, PeerConnection, PeerFactory, TransportEvent};
use crate::config::pricing::TokenPricing;
use crate::core::audio::{AudioRoutingGraph, AudioSink, LocalAudioTrack};
use crate::core::tools::{SentimentAnalyzer, SentimentResult, ToolDispatcher, ToolOutcome};
use crate::core::usage::UsageExtractor;
use crate::core::validation::{RephraseProtocol, ValidationOutcome, ValidationPipeline};
use crate::utils::CollaboratorError;

const COMMAND_CHANNEL_CAPACITY: usize = 32;

/// Collaborators and tuning for the controller.
#[derive(Clone)]
pub struct SessionDependencies {
    pub capture: Arc<dyn AudioCapture>,
    pub peers: Arc<dyn PeerFactory>,
    pub signaling: Arc<dyn Signaling>,
    pub sink: Arc<dyn AudioSink>,
    pub validation: Arc<ValidationPipeline>,
    pub tools: Arc<ToolDispatcher>,
    pub sentiment: Option<Arc<dyn SentimentAnalyzer>>,
    pub pricing: TokenPricing,
    pub timings: SessionTimings,
}

// =============================================================================
// Handle
// =============================================================================

enum Command {
    Start {
        options: StartOptions,
        reply: oneshot::Sender<RealtimeResult<()>>,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
    SendText {
        text: String,
        reply: oneshot::Sender<RealtimeResult<()>>,
    },
    UpdateSettings {
        settings: Box<SessionSettings>,
        reply: oneshot::Sender<RealtimeResult<()>>,
    },
    Settings {
        reply: oneshot::Sender<SessionSettings>,
    },
    Snapshot {
        reply: oneshot::Sender<SessionSnapshot>,
    },
    Shutdown,
}

/// Cloneable front end of the controller task.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
}

fn controller_gone() -> RealtimeError {
    RealtimeError::InternalError("session controller is not running".to_string())
}

impl SessionHandle {
    async fn request<T>(&self, command: Command, reply: oneshot::Receiver<T>) -> RealtimeResult<T> {
        self.commands
            .send(command)
            .await
            .map_err(|_| controller_gone())?;
        reply.await.map_err(|_| controller_gone())
    }

    /// Connect and configure a session. Resolves once the session is active,
    /// or with the setup error after the controller is back to idle.
    pub async fn start(&self, options: StartOptions) -> RealtimeResult<()> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::Start { options, reply }, rx).await?
    }

    /// Tear the session down. Safe in any state; repeated calls are no-ops.
    pub async fn stop(&self) -> RealtimeResult<()> {
        let (reply, rx) = oneshot::channel();
        // No controller means no session to stop.
        let _ = self.request(Command::Stop { reply }, rx).await;
        Ok(())
    }

    /// Send a typed user message and request a turn.
    pub async fn send_text(&self, text: impl Into<String>) -> RealtimeResult<()> {
        let (reply, rx) = oneshot::channel();
        let text = text.into();
        self.request(Command::SendText { text, reply }, rx).await?
    }

    /// Replace the settings used by the next `start()`. Only allowed while idle.
    pub async fn update_settings(&self, settings: SessionSettings) -> RealtimeResult<()> {
        let (reply, rx) = oneshot::channel();
        let settings = Box::new(settings);
        self.request(Command::UpdateSettings { settings, reply }, rx)
            .await?
    }

    pub async fn settings(&self) -> RealtimeResult<SessionSettings> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::Settings { reply }, rx).await
    }

    pub async fn snapshot(&self) -> RealtimeResult<SessionSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::Snapshot { reply }, rx).await
    }

    /// Stop the session and end the controller task.
    pub async fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown).await;
    }
}

// =============================================================================
// Controller
// =============================================================================

struct Negotiated {
    peer: Box<dyn PeerConnection>,
    events: mpsc::Receiver<TransportEvent>,
    local_track: LocalAudioTrack,
}

enum Completion {
    Negotiated {
        epoch: u64,
        result: RealtimeResult<Negotiated>,
    },
    Validation {
        epoch: u64,
        turn_id: String,
        outcome: ValidationOutcome,
    },
    RephraseSettled {
        epoch: u64,
        turn_id: String,
    },
    Tool {
        epoch: u64,
        call_id: String,
        name: String,
        outcome: ToolOutcome,
    },
    Sentiment {
        epoch: u64,
        item_id: String,
        transcript: String,
        result: Result<SentimentResult, CollaboratorError>,
    },
}

#[derive(Debug)]
enum TeardownCause {
    Requested,
    Disconnected(String),
    HandshakeTimeout(Duration),
    SetupFailed(RealtimeError),
}

impl TeardownCause {
    /// Error for a pending `start()`, and the reason to report as a disconnect.
    fn into_parts(self) -> (RealtimeError, Option<String>) {
        match self {
            TeardownCause::Requested => (
                RealtimeError::SessionError("session stopped before it became active".to_string()),
                None,
            ),
            TeardownCause::Disconnected(reason) => {
                (RealtimeError::ConnectionFailed(reason.clone()), Some(reason))
            }
            TeardownCause::HandshakeTimeout(after) => (
                RealtimeError::Timeout(format!(
                    "session was not configured within {}ms",
                    after.as_millis()
                )),
                None,
            ),
            TeardownCause::SetupFailed(e) => (e, None),
        }
    }
}

/// The session protocol state machine.
pub struct SessionController {
    state: SessionState,
    settings: SessionSettings,
    deps: SessionDependencies,
    callback: Option<SessionEventCallback>,
    graph: AudioRoutingGraph,
    session: Option<Session>,
    epoch: u64,
    peer: Option<Box<dyn PeerConnection>>,
    transport_rx: Option<mpsc::Receiver<TransportEvent>>,
    local_track: Option<LocalAudioTrack>,
    handshake_deadline: Option<Instant>,
    pending_start: Option<oneshot::Sender<RealtimeResult<()>>>,
    commands: mpsc::Receiver<Command>,
    completions_tx: mpsc::UnboundedSender<Completion>,
    completions_rx: mpsc::UnboundedReceiver<Completion>,
}

impl SessionController {
    /// Spawn the controller task.
    pub fn spawn(
        settings: SessionSettings,
        deps: SessionDependencies,
        callback: Option<SessionEventCallback>,
    ) -> (SessionHandle, JoinHandle<()>) {
        let (commands_tx, commands) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();

        let controller = SessionController {
            state: SessionState::Idle,
            settings,
            graph: AudioRoutingGraph::new(deps.sink.clone()),
            deps,
            callback,
            session: None,
            epoch: 0,
            peer: None,
            transport_rx: None,
            local_track: None,
            handshake_deadline: None,
            pending_start: None,
            commands,
            completions_tx,
            completions_rx,
        };

        let task = tokio::spawn(controller.run());
        (
            SessionHandle {
                commands: commands_tx,
            },
            task,
        )
    }

    async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle_command(command).await,
                },
                event = next_transport_event(&mut self.transport_rx) => {
                    self.handle_transport_event(event).await;
                }
                Some(completion) = self.completions_rx.recv() => {
                    self.handle_completion(completion).await;
                }
                _ = handshake_timer(self.handshake_deadline) => {
                    self.handshake_deadline = None;
                    let after = self.deps.timings.handshake_timeout;
                    warn!(session_epoch = self.epoch, "Session handshake timed out");
                    self.teardown(TeardownCause::HandshakeTimeout(after)).await;
                }
            }
        }

        self.teardown(TeardownCause::Requested).await;
        debug!("Session controller stopped");
    }

    async fn emit(&self, event: SessionEvent) {
        if let Some(callback) = &self.callback {
            callback(event).await;
        }
    }

    async fn set_state(&mut self, to: SessionState) {
        let from = self.state;
        if from == to {
            return;
        }
        self.state = to;
        info!(session_epoch = self.epoch, %from, %to, "Session state changed");
        self.emit(SessionEvent::StateChanged { from, to }).await;
    }

    fn is_current(&self, epoch: u64) -> bool {
        epoch == self.epoch && self.session.is_some()
    }

    fn snapshot(&self) -> SessionSnapshot {
        let session = self.session.as_ref();
        SessionSnapshot {
            state: self.state,
            gain: self.graph.gain(),
            remote_session_id: session.and_then(|s| s.remote_session_id.clone()),
            greeting_sent: session.is_some_and(|s| s.greeting_sent),
            pending_tool_calls: session.map_or(0, Session::pending_call_count),
            usage: session.map(|s| s.usage.totals()).unwrap_or_default(),
            cost: session.map(|s| s.usage.cost()).unwrap_or_default(),
        }
    }

    // =========================================================================
    // Commands
    // =========================================================================

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Start { options, reply } => self.start(options, reply).await,
            Command::Stop { reply } => {
                self.teardown(TeardownCause::Requested).await;
                let _ = reply.send(());
            }
            Command::SendText { text, reply } => {
                let _ = reply.send(self.send_text(text).await);
            }
            Command::UpdateSettings { settings, reply } => {
                let result = if self.state != SessionState::Idle {
                    Err(RealtimeError::InvalidState(format!(
                        "settings can only change while idle (currently {})",
                        self.state
                    )))
                } else {
                    settings.validate().map(|()| {
                        self.settings = *settings;
                        debug!("Session settings updated");
                    })
                };
                let _ = reply.send(result);
            }
            Command::Settings { reply } => {
                let _ = reply.send(self.settings.clone());
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
            Command::Shutdown => {}
        }
    }

    async fn start(&mut self, options: StartOptions, reply: oneshot::Sender<RealtimeResult<()>>) {
        if self.state != SessionState::Idle {
            let _ = reply.send(Err(RealtimeError::InvalidState(format!(
                "cannot start while {}",
                self.state
            ))));
            return;
        }

        let mut settings = self.settings.clone();
        options.apply(&mut settings);
        if let Err(e) = settings.validate() {
            let _ = reply.send(Err(e));
            return;
        }

        self.epoch += 1;
        let epoch = self.epoch;
        self.graph.configure(&settings.validation);

        let mode = settings.mode;
        let model = settings.model.clone();
        self.session = Some(Session::new(settings));
        self.pending_start = Some(reply);
        self.set_state(SessionState::Negotiating).await;

        let capture = self.deps.capture.clone();
        let peers = self.deps.peers.clone();
        let signaling = self.deps.signaling.clone();
        let ice_timeout = self.deps.timings.ice_gathering_timeout;
        let completions = self.completions_tx.clone();

        tokio::spawn(async move {
            let result = negotiate(
                capture.as_ref(),
                peers.as_ref(),
                signaling.as_ref(),
                mode,
                &model,
                ice_timeout,
            )
            .await;
            // The controller is gone; release what was acquired.
            if let Err(mpsc::error::SendError(Completion::Negotiated {
                result: Ok(negotiated),
                ..
            })) = completions.send(Completion::Negotiated { epoch, result })
            {
                negotiated.peer.close().await;
                release_capture(capture.as_ref(), &negotiated.local_track).await;
            }
        });
    }

    async fn send_text(&mut self, text: String) -> RealtimeResult<()> {
        if self.state != SessionState::Active {
            return Err(RealtimeError::NotConnected);
        }
        if text.trim().is_empty() {
            return Err(RealtimeError::InvalidConfiguration(
                "message text is empty".to_string(),
            ));
        }
        let item = ClientEvent::ConversationItemCreate {
            item: ConversationItem::user_text(text),
        };
        if self.send(item).await && self.send(ClientEvent::ResponseCreate).await {
            Ok(())
        } else {
            Err(RealtimeError::NotConnected)
        }
    }

    // =========================================================================
    // Outbound
    // =========================================================================

    /// Send one control event. A send failure is fatal to the session.
    async fn send(&mut self, event: ClientEvent) -> bool {
        let Some(peer) = self.peer.as_ref() else {
            warn!(event_type = event.event_type(), "No connection; dropping control event");
            return false;
        };
        let message = match serde_json::to_string(&event) {
            Ok(message) => message,
            Err(e) => {
                error!(event_type = event.event_type(), error = %e, "Failed to serialize control event");
                return false;
            }
        };

        debug!(session_epoch = self.epoch, event_type = event.event_type(), "Sending control event");
        let result = peer.send_control(&message).await;
        match result {
            Ok(()) => true,
            Err(e) => {
                error!(error = %e, "Control channel send failed");
                self.teardown(TeardownCause::Disconnected(e.to_string()))
                    .await;
                false
            }
        }
    }

    // =========================================================================
    // Transport events
    // =========================================================================

    async fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::ControlOpened => {
                debug!(session_epoch = self.epoch, "Control channel open");
            }
            TransportEvent::ControlMessage(text) => self.handle_control_message(&text).await,
            TransportEvent::RemoteTrack(track) => {
                info!(track_id = %track.id(), "Remote audio track received");
                self.graph.attach(track);
            }
            TransportEvent::Disconnected { reason } => {
                error!(session_epoch = self.epoch, %reason, "Connection lost");
                self.teardown(TeardownCause::Disconnected(reason)).await;
            }
        }
    }

    async fn handle_control_message(&mut self, text: &str) {
        let payload: serde_json::Value = match serde_json::from_str(text) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "Dropping malformed control message");
                return;
            }
        };
        let event_type = payload
            .get("type")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default()
            .to_string();
        let decoded = serde_json::from_value::<ServerEvent>(payload.clone());

        self.emit(SessionEvent::Inbound {
            event_type: event_type.clone(),
            payload,
        })
        .await;

        match decoded {
            Ok(event) => self.handle_server_event(event).await,
            Err(e) => warn!(%event_type, error = %e, "Failed to decode control event"),
        }
    }

    async fn handle_server_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::SessionCreated { session } => self.on_session_created(session).await,
            ServerEvent::SessionUpdated { .. } => self.on_session_updated().await,
            ServerEvent::ResponseCreated { response } => self.on_response_created(&response.id).await,
            ServerEvent::TextDelta { response_id, delta }
            | ServerEvent::AudioTranscriptDelta { response_id, delta } => {
                let Some(session) = self.session.as_mut() else {
                    return;
                };
                match session.append_delta(&response_id, &delta) {
                    DeltaDisposition::Appended => {}
                    DeltaDisposition::ImplicitTurn => {
                        debug!(%response_id, "Delta before response.created; opened turn")
                    }
                    DeltaDisposition::Stale => {
                        warn!(%response_id, "Dropping delta for a different response")
                    }
                }
            }
            ServerEvent::ResponseDone { response } => self.on_response_done(response).await,
            ServerEvent::OutputItemAdded { item, .. } => {
                if item.item_type == "function_call"
                    && let (Some(call_id), Some(name)) = (item.call_id.as_deref(), item.name.as_deref())
                    && let Some(session) = self.session.as_mut()
                {
                    session.record_function_name(call_id, name);
                }
            }
            ServerEvent::FunctionCallArgumentsDone {
                call_id,
                name,
                arguments,
                ..
            } => self.on_function_call(call_id, name, arguments).await,
            ServerEvent::TranscriptionCompleted {
                item_id,
                transcript,
            } => self.on_user_transcript(item_id, transcript),
            ServerEvent::Error { error } => {
                warn!(code = ?error.code, message = %error.message, "Remote model reported an error");
                self.emit(SessionEvent::RemoteError {
                    code: error.code,
                    message: error.message,
                })
                .await;
            }
            ServerEvent::Other => {}
        }
    }

    async fn on_session_created(&mut self, remote: RemoteSession) {
        if self.state != SessionState::Negotiating {
            debug!(state = %self.state, "Ignoring session.created");
            return;
        }
        let tools = self.deps.tools.definitions();
        let Some(session) = self.session.as_mut() else {
            return;
        };
        info!(remote_session_id = %remote.id, "Remote session created");
        session.remote_session_id = Some(remote.id);
        let config = session.session_config(tools);

        self.set_state(SessionState::Configuring).await;
        self.send(ClientEvent::SessionUpdate { session: config })
            .await;
    }

    async fn on_session_updated(&mut self) {
        if self.state != SessionState::Configuring {
            return;
        }
        self.handshake_deadline = None;
        self.set_state(SessionState::Active).await;
        if let Some(reply) = self.pending_start.take() {
            let _ = reply.send(Ok(()));
        }

        let Some(session) = self.session.as_mut() else {
            return;
        };
        if session.settings.first_speaker == FirstSpeaker::Model && !session.greeting_sent {
            session.greeting_sent = true;
            debug!("Requesting greeting turn");
            self.send(ClientEvent::ResponseCreate).await;
        }
    }

    async fn on_response_created(&mut self, response_id: &str) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        session.muted_for = None;
        let turn_id = session.begin_turn(response_id).id.clone();
        debug!(%turn_id, %response_id, "Turn started");

        if self.graph.set_gain(1.0) {
            self.emit(SessionEvent::GainChanged { gain: 1.0 }).await;
        }
        self.graph.reconnect();
    }

    async fn on_response_done(&mut self, response: Response) {
        let pricing = self.deps.pricing;
        let Some(session) = self.session.as_mut() else {
            return;
        };

        let status = TurnStatus::from_response_status(&response.status);
        let turn = session.finish_turn(&response.id, status);
        let usage = response.usage.as_ref().map(|usage| {
            let sample = session.usage.record(UsageExtractor::extract(usage), &pricing);
            SessionEvent::Usage {
                sample,
                totals: session.usage.totals(),
                cost: session.usage.cost(),
            }
        });
        let validation = session.settings.validation.clone();

        if let Some(event) = usage {
            self.emit(event).await;
        }

        let Some(turn) = turn else {
            debug!(response_id = %response.id, "response.done for an unknown turn");
            return;
        };
        if turn.status == TurnStatus::Cancelled {
            debug!(turn_id = %turn.id, "Cancelled turn is not validated");
            return;
        }
        if !validation.enabled || turn.transcript.trim().is_empty() {
            return;
        }

        let pipeline = self.deps.validation.clone();
        let completions = self.completions_tx.clone();
        let epoch = self.epoch;
        debug!(turn_id = %turn.id, "Validating turn");
        tokio::spawn(async move {
            let outcome = pipeline.validate(&turn.transcript, &validation).await;
            let _ = completions.send(Completion::Validation {
                epoch,
                turn_id: turn.id,
                outcome,
            });
        });
    }

    async fn on_function_call(&mut self, call_id: String, name: Option<String>, arguments: String) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let name = session.resolve_function_name(&call_id, name.as_deref());
        let call = PendingToolCall {
            call_id: call_id.clone(),
            name: name.clone(),
            arguments: arguments.clone(),
            turn_id: session.current_turn().map(|turn| turn.id.clone()),
        };
        if !session.add_pending_call(call) {
            warn!(%call_id, "Ignoring duplicate function call");
            return;
        }

        info!(%call_id, function = %name, "Function call requested");
        self.emit(SessionEvent::ToolCallRequested {
            call_id: call_id.clone(),
            name: name.clone(),
            arguments: arguments.clone(),
        })
        .await;

        let tools = self.deps.tools.clone();
        let completions = self.completions_tx.clone();
        let epoch = self.epoch;
        tokio::spawn(async move {
            let outcome = tools.dispatch(&name, &arguments).await;
            let _ = completions.send(Completion::Tool {
                epoch,
                call_id,
                name,
                outcome,
            });
        });
    }

    fn on_user_transcript(&mut self, item_id: String, transcript: String) {
        let Some(analyzer) = self.deps.sentiment.clone() else {
            return;
        };
        if transcript.trim().is_empty() {
            return;
        }
        let completions = self.completions_tx.clone();
        let epoch = self.epoch;
        tokio::spawn(async move {
            let result = analyzer.analyze(&transcript).await;
            let _ = completions.send(Completion::Sentiment {
                epoch,
                item_id,
                transcript,
                result,
            });
        });
    }

    // =========================================================================
    // Completions
    // =========================================================================

    async fn handle_completion(&mut self, completion: Completion) {
        match completion {
            Completion::Negotiated { epoch, result } => self.on_negotiated(epoch, result).await,
            Completion::Validation {
                epoch,
                turn_id,
                outcome,
            } => {
                if !self.is_current(epoch) || self.state != SessionState::Active {
                    debug!(%turn_id, "Discarding validation result for a closed session");
                    return;
                }
                self.on_validation(turn_id, outcome).await;
            }
            Completion::RephraseSettled { epoch, turn_id } => {
                if !self.is_current(epoch) {
                    return;
                }
                self.inject_rephrase(turn_id).await;
            }
            Completion::Tool {
                epoch,
                call_id,
                name,
                outcome,
            } => {
                if !self.is_current(epoch) {
                    debug!(%call_id, "Discarding tool result for a closed session");
                    return;
                }
                self.deliver_tool_result(call_id, name, outcome).await;
            }
            Completion::Sentiment {
                epoch,
                item_id,
                transcript,
                result,
            } => {
                if !self.is_current(epoch) {
                    return;
                }
                match result {
                    Ok(sentiment) => {
                        self.emit(SessionEvent::Sentiment {
                            item_id,
                            transcript,
                            label: sentiment.label,
                            score: sentiment.score,
                        })
                        .await;
                    }
                    Err(e) => warn!(%item_id, error = %e, "Sentiment analysis failed"),
                }
            }
        }
    }

    async fn on_negotiated(&mut self, epoch: u64, result: RealtimeResult<Negotiated>) {
        if epoch != self.epoch || self.state != SessionState::Negotiating {
            if let Ok(stale) = result {
                debug!(session_epoch = epoch, "Closing connection negotiated for a stopped session");
                stale.peer.close().await;
                release_capture(self.deps.capture.as_ref(), &stale.local_track).await;
            }
            return;
        }

        match result {
            Ok(negotiated) => {
                info!(session_epoch = epoch, "Answer applied; waiting for session.created");
                self.peer = Some(negotiated.peer);
                self.transport_rx = Some(negotiated.events);
                self.local_track = Some(negotiated.local_track);
                self.handshake_deadline = Some(Instant::now() + self.deps.timings.handshake_timeout);
            }
            Err(e) => {
                warn!(session_epoch = epoch, error = %e, "Session setup failed");
                self.teardown(TeardownCause::SetupFailed(e)).await;
            }
        }
    }

    async fn on_validation(&mut self, turn_id: String, outcome: ValidationOutcome) {
        match outcome {
            ValidationOutcome::Skipped => {}
            ValidationOutcome::Valid => {
                self.restore_gain(&turn_id).await;
                self.emit(SessionEvent::ValidationPassed { turn_id }).await;
            }
            ValidationOutcome::FailedOpen { error } => {
                self.restore_gain(&turn_id).await;
                self.emit(SessionEvent::ValidationFailedOpen { turn_id, error })
                    .await;
            }
            ValidationOutcome::Invalid { reason } => self.begin_rephrase(turn_id, reason).await,
        }
    }

    /// Unmute after a verdict for `turn_id`, unless another turn's rejection
    /// is still waiting for its rephrase to start.
    async fn restore_gain(&mut self, turn_id: &str) {
        if let Some(muted_for) = self.session.as_ref().and_then(|s| s.muted_for.as_deref())
            && muted_for != turn_id
        {
            debug!(%turn_id, %muted_for, "Keeping output muted for a rejected turn");
            return;
        }
        if self.graph.set_gain(1.0) {
            self.emit(SessionEvent::GainChanged { gain: 1.0 }).await;
        }
    }

    fn rephrase_protocol(&self) -> Option<RephraseProtocol> {
        let session = self.session.as_ref()?;
        Some(RephraseProtocol::new(
            self.deps.timings.rephrase_settle_delay,
            session.settings.validation.rephrase_message.clone(),
        ))
    }

    /// Mute, drop queued audio, cancel the turn, then wait before injecting.
    async fn begin_rephrase(&mut self, turn_id: String, reason: String) {
        let Some(protocol) = self.rephrase_protocol() else {
            return;
        };
        info!(%turn_id, %reason, "Turn failed validation; muting output");
        if let Some(session) = self.session.as_mut() {
            session.muted_for = Some(turn_id.clone());
        }

        if self.graph.set_gain(0.0) {
            self.emit(SessionEvent::GainChanged { gain: 0.0 }).await;
        }
        self.graph.discard_buffered();
        if !self.send(protocol.cancel_event()).await {
            return;
        }
        self.emit(SessionEvent::ValidationFailed {
            turn_id: turn_id.clone(),
            reason,
        })
        .await;

        let completions = self.completions_tx.clone();
        let epoch = self.epoch;
        let settle = protocol.settle_delay();
        tokio::spawn(async move {
            tokio::time::sleep(settle).await;
            let _ = completions.send(Completion::RephraseSettled { epoch, turn_id });
        });
    }

    async fn inject_rephrase(&mut self, turn_id: String) {
        let Some(protocol) = self.rephrase_protocol() else {
            return;
        };
        for event in protocol.injection_events() {
            if !self.send(event).await {
                return;
            }
        }
        debug!(%turn_id, "Rephrase requested");
        self.emit(SessionEvent::RephraseRequested { turn_id }).await;
    }

    async fn deliver_tool_result(&mut self, call_id: String, name: String, outcome: ToolOutcome) {
        if let Some(session) = self.session.as_mut() {
            session.complete_pending_call(&call_id);
        }

        let item = ClientEvent::ConversationItemCreate {
            item: ConversationItem::function_output(call_id.clone(), outcome.output.clone()),
        };
        if !self.send(item).await || !self.send(ClientEvent::ResponseCreate).await {
            return;
        }

        debug!(%call_id, function = %name, success = outcome.success, "Function result delivered");
        self.emit(SessionEvent::ToolCallCompleted {
            call_id,
            name,
            success: outcome.success,
            output: outcome.output,
        })
        .await;
    }

    // =========================================================================
    // Teardown
    // =========================================================================

    async fn teardown(&mut self, cause: TeardownCause) {
        if self.state == SessionState::Idle && self.session.is_none() {
            return;
        }
        info!(session_epoch = self.epoch, ?cause, "Tearing down session");
        self.set_state(SessionState::Closing).await;

        // Anything still in flight now carries a stale epoch.
        self.epoch += 1;
        self.handshake_deadline = None;
        self.graph.teardown();
        if let Some(peer) = self.peer.take() {
            peer.close().await;
        }
        self.transport_rx = None;
        if let Some(track) = self.local_track.take() {
            release_capture(self.deps.capture.as_ref(), &track).await;
        }
        self.session = None;

        let (start_error, disconnect_reason) = cause.into_parts();
        if let Some(reply) = self.pending_start.take() {
            let _ = reply.send(Err(start_error));
        }

        self.set_state(SessionState::Idle).await;
        if let Some(reason) = disconnect_reason {
            self.emit(SessionEvent::Disconnected { reason }).await;
        }
    }
}

// =============================================================================
// Negotiation
// =============================================================================

async fn negotiate(
    capture: &dyn AudioCapture,
    peers: &dyn PeerFactory,
    signaling: &dyn Signaling,
    mode: SessionMode,
    model: &str,
    ice_timeout: Duration,
) -> RealtimeResult<Negotiated> {
    // Text sessions still attach a track so negotiation is identical.
    let local_track = match mode {
        SessionMode::Text => LocalAudioTrack::placeholder(),
        SessionMode::Voice => capture.acquire().await?,
    };

    match connect(peers, signaling, &local_track, model, ice_timeout).await {
        Ok((peer, events)) => Ok(Negotiated {
            peer,
            events,
            local_track,
        }),
        Err(e) => {
            release_capture(capture, &local_track).await;
            Err(e)
        }
    }
}

async fn connect(
    peers: &dyn PeerFactory,
    signaling: &dyn Signaling,
    local_track: &LocalAudioTrack,
    model: &str,
    ice_timeout: Duration,
) -> RealtimeResult<(Box<dyn PeerConnection>, mpsc::Receiver<TransportEvent>)> {
    let (peer, events) = peers.create(model).await?;

    let result: RealtimeResult<()> = async {
        peer.add_local_track(local_track).await?;
        if !peer.uses_signaling() {
            return Ok(());
        }
        peer.create_offer().await?;
        if tokio::time::timeout(ice_timeout, peer.ice_gathering_complete())
            .await
            .is_err()
        {
            warn!(
                timeout_ms = ice_timeout.as_millis() as u64,
                "ICE gathering incomplete; sending the candidates gathered so far"
            );
        }
        let offer = peer.local_description().await?;
        let answer = signaling.exchange(&offer, model).await?;
        peer.apply_answer(&answer).await
    }
    .await;

    match result {
        Ok(()) => Ok((peer, events)),
        Err(e) => {
            peer.close().await;
            Err(e)
        }
    }
}

async fn release_capture(capture: &dyn AudioCapture, track: &LocalAudioTrack) {
    if !track.placeholder {
        capture.release(track).await;
    }
}

async fn next_transport_event(rx: &mut Option<mpsc::Receiver<TransportEvent>>) -> TransportEvent {
    match rx {
        Some(rx) => rx.recv().await.unwrap_or_else(|| TransportEvent::Disconnected {
            reason: "transport closed".to_string(),
        }),
        None => std::future::pending().await,
    }
}

async fn handshake_timer(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
