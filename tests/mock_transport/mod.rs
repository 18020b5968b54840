//! In-process transport and collaborator doubles for controller tests.
//!
//! The mock peer plays the remote model's side of the handshake:
//! - `apply_answer` opens the control channel and sends `session.created`
//! - a `session.update` is answered with `session.updated`
//!
//! Everything the controller sends, plus every observer event, lands in one
//! shared [`Log`] so tests can assert on cross-component ordering.

// Not every test binary uses every helper
#![allow(dead_code)]

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use waav_sentinel::config::TokenPricing;
use waav_sentinel::core::audio::{AudioFrame, AudioSink, LocalAudioTrack};
use waav_sentinel::core::realtime::{
    AudioCapture, CaptureError, PeerConnection, PeerFactory, RealtimeError, RealtimeResult,
    SessionController, SessionDependencies, SessionEvent, SessionEventCallback, SessionHandle,
    SessionMode, SessionSettings, SessionTimings, Signaling, TransportEvent,
};
use waav_sentinel::core::tools::{
    SentimentAnalyzer, SentimentResult, ToolDispatcher, WebSearch, WebSearchResponse,
    WebSearchResult,
};
use waav_sentinel::core::validation::{
    ModerationRequest, ModerationVerdict, Moderator, ValidationPipeline,
};
use waav_sentinel::utils::CollaboratorError;

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// One entry in the shared ordering log.
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    /// Control message sent by the controller, as parsed JSON
    Sent(Value),
    /// Observer event, by name
    Event(String),
    /// Gain value reported to the observer
    Gain(f32),
    Acquired(String),
    Released(String),
    PeerClosed,
}

#[derive(Clone, Default)]
pub struct Log(Arc<Mutex<Vec<(Instant, Record)>>>);

impl Log {
    pub fn push(&self, record: Record) {
        self.0.lock().push((Instant::now(), record));
    }

    pub fn records(&self) -> Vec<Record> {
        self.0.lock().iter().map(|(_, r)| r.clone()).collect()
    }

    pub fn sent(&self) -> Vec<Value> {
        self.records()
            .into_iter()
            .filter_map(|r| match r {
                Record::Sent(value) => Some(value),
                _ => None,
            })
            .collect()
    }

    pub fn sent_types(&self) -> Vec<String> {
        self.sent()
            .iter()
            .map(|v| v["type"].as_str().unwrap_or_default().to_string())
            .collect()
    }

    /// Position of the first record matching `predicate`.
    pub fn position(&self, predicate: impl Fn(&Record) -> bool) -> Option<usize> {
        self.records().iter().position(predicate)
    }

    /// When the first record matching `predicate` was logged.
    pub fn time_of(&self, predicate: impl Fn(&Record) -> bool) -> Option<Instant> {
        self.0
            .lock()
            .iter()
            .find(|(_, r)| predicate(r))
            .map(|(at, _)| *at)
    }

    pub fn count(&self, predicate: impl Fn(&Record) -> bool) -> usize {
        self.records().iter().filter(|r| predicate(r)).count()
    }
}

pub fn is_sent(event_type: &'static str) -> impl Fn(&Record) -> bool {
    move |r| matches!(r, Record::Sent(v) if v["type"] == event_type)
}

// =============================================================================
// Transport
// =============================================================================

pub struct MockPeer {
    log: Log,
    events: mpsc::Sender<TransportEvent>,
    auto_configure: bool,
    fail_sends: Arc<AtomicBool>,
    closed: AtomicBool,
}

#[async_trait]
impl PeerConnection for MockPeer {
    async fn add_local_track(&self, _track: &LocalAudioTrack) -> RealtimeResult<()> {
        Ok(())
    }

    async fn create_offer(&self) -> RealtimeResult<()> {
        Ok(())
    }

    async fn ice_gathering_complete(&self) {}

    async fn local_description(&self) -> RealtimeResult<String> {
        Ok("v=0\r\no=- mock offer\r\n".to_string())
    }

    async fn apply_answer(&self, _sdp: &str) -> RealtimeResult<()> {
        let _ = self.events.send(TransportEvent::ControlOpened).await;
        if self.auto_configure {
            let created = json!({
                "type": "session.created",
                "session": { "id": "sess_mock", "model": "gpt-4o-realtime-preview" }
            });
            let _ = self
                .events
                .send(TransportEvent::ControlMessage(created.to_string()))
                .await;
        }
        Ok(())
    }

    async fn send_control(&self, message: &str) -> RealtimeResult<()> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(RealtimeError::ConnectionFailed(
                "control channel closed".to_string(),
            ));
        }
        let value: Value = serde_json::from_str(message)
            .map_err(|e| RealtimeError::SerializationError(e.to_string()))?;
        let is_update = value["type"] == "session.update";
        self.log.push(Record::Sent(value));

        if is_update && self.auto_configure {
            let updated = json!({ "type": "session.updated", "session": { "id": "sess_mock" } });
            let _ = self
                .events
                .send(TransportEvent::ControlMessage(updated.to_string()))
                .await;
        }
        Ok(())
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.log.push(Record::PeerClosed);
        }
    }
}

/// Creates [`MockPeer`]s and keeps a sender into the latest one's event stream.
pub struct MockPeerFactory {
    log: Log,
    auto_configure: bool,
    fail_sends: Arc<AtomicBool>,
    injector: Mutex<Option<mpsc::Sender<TransportEvent>>>,
    created: AtomicUsize,
}

impl MockPeerFactory {
    pub fn new(log: Log) -> Self {
        Self {
            log,
            auto_configure: true,
            fail_sends: Arc::new(AtomicBool::new(false)),
            injector: Mutex::new(None),
            created: AtomicUsize::new(0),
        }
    }

    /// Peers that never send `session.created`; the handshake stalls.
    pub fn silent(log: Log) -> Self {
        Self {
            auto_configure: false,
            ..Self::new(log)
        }
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn fail_sends(&self) {
        self.fail_sends.store(true, Ordering::SeqCst);
    }

    /// Deliver a control message as if the remote model sent it.
    pub async fn inject(&self, message: Value) {
        self.send(TransportEvent::ControlMessage(message.to_string()))
            .await;
    }

    pub async fn send(&self, event: TransportEvent) {
        let sender = self.injector.lock().clone();
        if let Some(sender) = sender {
            let _ = sender.send(event).await;
        }
    }
}

#[async_trait]
impl PeerFactory for MockPeerFactory {
    async fn create(
        &self,
        _model: &str,
    ) -> RealtimeResult<(Box<dyn PeerConnection>, mpsc::Receiver<TransportEvent>)> {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        *self.injector.lock() = Some(tx.clone());
        self.created.fetch_add(1, Ordering::SeqCst);
        let peer = MockPeer {
            log: self.log.clone(),
            events: tx,
            auto_configure: self.auto_configure,
            fail_sends: self.fail_sends.clone(),
            closed: AtomicBool::new(false),
        };
        Ok((Box::new(peer), rx))
    }
}

pub struct StubSignaling {
    pub answers: AtomicUsize,
    reject: bool,
    delay: Duration,
}

impl StubSignaling {
    pub fn new() -> Self {
        Self {
            answers: AtomicUsize::new(0),
            reject: false,
            delay: Duration::ZERO,
        }
    }

    pub fn rejecting() -> Self {
        Self {
            reject: true,
            ..Self::new()
        }
    }

    /// Answer only after `delay`, keeping the controller in `Negotiating`.
    pub fn delayed(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::new()
        }
    }
}

#[async_trait]
impl Signaling for StubSignaling {
    async fn exchange(&self, _offer_sdp: &str, _model: &str) -> RealtimeResult<String> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.reject {
            return Err(RealtimeError::SignalingRejected {
                status: 503,
                body: "unavailable".to_string(),
            });
        }
        self.answers.fetch_add(1, Ordering::SeqCst);
        Ok("v=0\r\no=- mock answer\r\n".to_string())
    }
}

pub struct StubCapture {
    log: Log,
    deny: bool,
}

impl StubCapture {
    pub fn new(log: Log) -> Self {
        Self { log, deny: false }
    }

    pub fn denying(log: Log) -> Self {
        Self { log, deny: true }
    }
}

#[async_trait]
impl AudioCapture for StubCapture {
    async fn acquire(&self) -> Result<LocalAudioTrack, CaptureError> {
        if self.deny {
            return Err(CaptureError::PermissionDenied("user dismissed prompt".to_string()));
        }
        let track = LocalAudioTrack {
            id: "mic-1".to_string(),
            placeholder: false,
        };
        self.log.push(Record::Acquired(track.id.clone()));
        Ok(track)
    }

    async fn release(&self, track: &LocalAudioTrack) {
        self.log.push(Record::Released(track.id.clone()));
    }
}

#[derive(Default)]
pub struct NullSink {
    pub frames: AtomicUsize,
}

impl AudioSink for NullSink {
    fn write(&self, _frame: AudioFrame) {
        self.frames.fetch_add(1, Ordering::SeqCst);
    }
}

// =============================================================================
// Collaborators
// =============================================================================

/// Moderator with a fixed answer.
pub struct ScriptedModerator {
    verdict: Result<ModerationVerdict, CollaboratorError>,
    delay: Duration,
    pub requests: Mutex<Vec<ModerationRequest>>,
}

impl ScriptedModerator {
    pub fn valid() -> Self {
        Self::answering(Ok(ModerationVerdict {
            valid: true,
            reason: String::new(),
        }))
    }

    pub fn invalid(reason: &str) -> Self {
        Self::answering(Ok(ModerationVerdict {
            valid: false,
            reason: reason.to_string(),
        }))
    }

    pub fn answering(verdict: Result<ModerationVerdict, CollaboratorError>) -> Self {
        Self {
            verdict,
            delay: Duration::ZERO,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().len()
    }
}

#[async_trait]
impl Moderator for ScriptedModerator {
    async fn check(
        &self,
        request: &ModerationRequest,
    ) -> Result<ModerationVerdict, CollaboratorError> {
        self.requests.lock().push(request.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.verdict.clone()
    }
}

/// Moderator that rejects transcripts containing `keyword` at once and
/// approves everything else after `approve_delay`.
pub struct KeywordModerator {
    keyword: String,
    approve_delay: Duration,
    pub requests: Mutex<Vec<ModerationRequest>>,
}

impl KeywordModerator {
    pub fn new(keyword: &str, approve_delay: Duration) -> Self {
        Self {
            keyword: keyword.to_string(),
            approve_delay,
            requests: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Moderator for KeywordModerator {
    async fn check(
        &self,
        request: &ModerationRequest,
    ) -> Result<ModerationVerdict, CollaboratorError> {
        self.requests.lock().push(request.clone());
        if request.transcript.contains(&self.keyword) {
            return Ok(ModerationVerdict {
                valid: false,
                reason: format!("mentions {}", self.keyword),
            });
        }
        tokio::time::sleep(self.approve_delay).await;
        Ok(ModerationVerdict {
            valid: true,
            reason: String::new(),
        })
    }
}

pub fn weather_result() -> WebSearchResult {
    WebSearchResult {
        title: "Lisbon weather today".to_string(),
        link: "https://weather.example.com/lisbon".to_string(),
        snippet: "Sunny, 24°C".to_string(),
    }
}

pub struct StubWebSearch {
    fail: bool,
    pub queries: Mutex<Vec<String>>,
}

impl StubWebSearch {
    pub fn new() -> Self {
        Self {
            fail: false,
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            queries: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl WebSearch for StubWebSearch {
    async fn search(&self, query: &str) -> Result<WebSearchResponse, CollaboratorError> {
        self.queries.lock().push(query.to_string());
        if self.fail {
            return Err(CollaboratorError::Status {
                status: 502,
                body: "bad gateway".to_string(),
            });
        }
        Ok(WebSearchResponse {
            results: vec![weather_result()],
            answer_box: None,
        })
    }
}

pub struct StubSentiment;

#[async_trait]
impl SentimentAnalyzer for StubSentiment {
    async fn analyze(&self, _text: &str) -> Result<SentimentResult, CollaboratorError> {
        Ok(SentimentResult {
            label: "positive".to_string(),
            score: 0.9,
        })
    }
}

// =============================================================================
// Observer
// =============================================================================

#[derive(Clone, Default)]
pub struct EventRecorder {
    events: Arc<Mutex<Vec<SessionEvent>>>,
}

impl EventRecorder {
    /// Callback that records every event and mirrors it into `log`.
    pub fn callback(&self, log: Log) -> SessionEventCallback {
        let events = self.events.clone();
        Arc::new(move |event: SessionEvent| -> Pin<Box<dyn Future<Output = ()> + Send>> {
            if let SessionEvent::GainChanged { gain } = &event {
                log.push(Record::Gain(*gain));
            }
            log.push(Record::Event(event.name().to_string()));
            events.lock().push(event);
            Box::pin(async {})
        })
    }

    pub fn events(&self) -> Vec<SessionEvent> {
        self.events.lock().clone()
    }

    pub fn count(&self, name: &str) -> usize {
        self.events.lock().iter().filter(|e| e.name() == name).count()
    }

    /// Poll until an event named `name` has been recorded `times` times.
    pub async fn wait_for(&self, name: &str, times: usize) -> bool {
        wait_until(|| self.count(name) >= times).await
    }
}

/// Poll `condition` every 10ms for up to two seconds.
pub async fn wait_until(condition: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

// =============================================================================
// Harness
// =============================================================================

pub fn test_pricing() -> TokenPricing {
    TokenPricing::new(0.00006, 0.0000025, 0.00003, 0.00024, 0.00001)
}

pub fn test_timings() -> SessionTimings {
    SessionTimings {
        ice_gathering_timeout: Duration::from_millis(50),
        handshake_timeout: Duration::from_millis(500),
        rephrase_settle_delay: Duration::from_millis(100),
    }
}

pub fn text_settings() -> SessionSettings {
    SessionSettings {
        instructions: "You help customers of a bike shop.".to_string(),
        mode: SessionMode::Text,
        ..Default::default()
    }
}

pub fn validating_settings(rules: &str) -> SessionSettings {
    let mut settings = text_settings();
    settings.validation.enabled = true;
    settings.validation.rules = rules.to_string();
    settings.validation.buffer_delay_ms = 200;
    settings
}

/// Collaborators and doubles for one controller under test.
pub struct HarnessBuilder {
    log: Log,
    peers: Option<Arc<MockPeerFactory>>,
    signaling: Option<Arc<dyn Signaling>>,
    capture: Option<Arc<dyn AudioCapture>>,
    validation: ValidationPipeline,
    tools: ToolDispatcher,
    sentiment: Option<Arc<dyn SentimentAnalyzer>>,
    timings: SessionTimings,
}

impl HarnessBuilder {
    pub fn new() -> Self {
        Self {
            log: Log::default(),
            peers: None,
            signaling: None,
            capture: None,
            validation: ValidationPipeline::disabled(),
            tools: ToolDispatcher::new(),
            sentiment: None,
            timings: test_timings(),
        }
    }

    pub fn log(&self) -> Log {
        self.log.clone()
    }

    pub fn moderator(mut self, moderator: Arc<dyn Moderator>) -> Self {
        self.validation = ValidationPipeline::new(moderator, Duration::from_millis(300));
        self
    }

    pub fn validation(mut self, pipeline: ValidationPipeline) -> Self {
        self.validation = pipeline;
        self
    }

    pub fn tools(mut self, tools: ToolDispatcher) -> Self {
        self.tools = tools;
        self
    }

    pub fn sentiment(mut self, analyzer: Arc<dyn SentimentAnalyzer>) -> Self {
        self.sentiment = Some(analyzer);
        self
    }

    pub fn peers(mut self, peers: Arc<MockPeerFactory>) -> Self {
        self.peers = Some(peers);
        self
    }

    pub fn signaling(mut self, signaling: Arc<dyn Signaling>) -> Self {
        self.signaling = Some(signaling);
        self
    }

    pub fn capture(mut self, capture: Arc<dyn AudioCapture>) -> Self {
        self.capture = Some(capture);
        self
    }

    pub fn timings(mut self, timings: SessionTimings) -> Self {
        self.timings = timings;
        self
    }

    pub fn spawn(self, settings: SessionSettings) -> Harness {
        let log = self.log;
        let peers = self
            .peers
            .unwrap_or_else(|| Arc::new(MockPeerFactory::new(log.clone())));
        let deps = SessionDependencies {
            capture: self
                .capture
                .unwrap_or_else(|| Arc::new(StubCapture::new(log.clone()))),
            peers: peers.clone(),
            signaling: self
                .signaling
                .unwrap_or_else(|| Arc::new(StubSignaling::new())),
            sink: Arc::new(NullSink::default()),
            validation: Arc::new(self.validation),
            tools: Arc::new(self.tools),
            sentiment: self.sentiment,
            pricing: test_pricing(),
            timings: self.timings,
        };

        let recorder = EventRecorder::default();
        let (handle, task) =
            SessionController::spawn(settings, deps, Some(recorder.callback(log.clone())));

        Harness {
            handle,
            task,
            log,
            peers,
            events: recorder,
        }
    }
}

pub struct Harness {
    pub handle: SessionHandle,
    pub task: JoinHandle<()>,
    pub log: Log,
    pub peers: Arc<MockPeerFactory>,
    pub events: EventRecorder,
}

impl Harness {
    pub async fn shutdown(self) {
        self.handle.shutdown().await;
        let _ = tokio::time::timeout(Duration::from_secs(2), self.task).await;
    }
}

// =============================================================================
// Server messages
// =============================================================================

pub fn response_created(response_id: &str) -> Value {
    json!({
        "type": "response.created",
        "response": { "id": response_id, "status": "in_progress" }
    })
}

pub fn text_delta(response_id: &str, delta: &str) -> Value {
    json!({ "type": "response.text.delta", "response_id": response_id, "delta": delta })
}

pub fn response_done(response_id: &str, status: &str) -> Value {
    json!({
        "type": "response.done",
        "response": { "id": response_id, "status": status }
    })
}

pub fn response_done_with_usage(response_id: &str, usage: Value) -> Value {
    json!({
        "type": "response.done",
        "response": { "id": response_id, "status": "completed", "usage": usage }
    })
}

pub fn function_call_done(call_id: &str, name: &str, arguments: &str) -> Value {
    json!({
        "type": "response.function_call_arguments.done",
        "response_id": "resp_tool",
        "call_id": call_id,
        "name": name,
        "arguments": arguments
    })
}

/// Run one complete text turn through the controller.
pub async fn play_turn(peers: &MockPeerFactory, response_id: &str, transcript: &str) {
    peers.inject(response_created(response_id)).await;
    peers.inject(text_delta(response_id, transcript)).await;
    peers.inject(response_done(response_id, "completed")).await;
}
