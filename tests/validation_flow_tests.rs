//! Compliance validation through the running controller.
//!
//! These tests verify:
//! - No moderation call when validation is disabled
//! - A rejected turn runs mute → cancel → settle → inject → response.create
//! - Moderation failures (HTTP 500, timeouts) fail open and leave audio unmuted
//! - Verdicts arriving after `stop()` are discarded
//! - A late approval for an earlier turn does not unmute a rejected one

mod mock_transport;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use url::Url;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use mock_transport::*;
use waav_sentinel::core::realtime::{SessionEvent, SessionState, SessionTimings, StartOptions};
use waav_sentinel::core::validation::{HttpModerator, REPHRASE_SENTINEL, ValidationPipeline};

const RULES: &str = "never mention pricing";

fn http_pipeline(server: &MockServer, timeout: Duration) -> ValidationPipeline {
    let url = Url::parse(&format!("{}/check", server.uri())).unwrap();
    let moderator = HttpModerator::new(url, timeout).unwrap();
    ValidationPipeline::new(Arc::new(moderator), timeout)
}

#[tokio::test]
async fn test_validation_disabled_makes_no_moderation_call() {
    let moderator = Arc::new(ScriptedModerator::valid());
    let harness = HarnessBuilder::new()
        .moderator(moderator.clone())
        .spawn(text_settings());
    harness.handle.start(StartOptions::default()).await.unwrap();

    play_turn(&harness.peers, "resp_1", "hello").await;
    // session.created, session.updated and the three turn events
    assert!(harness.events.wait_for("inbound", 5).await);
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(moderator.calls(), 0);
    assert_eq!(harness.events.count("validation_passed"), 0);
    assert_eq!(harness.log.count(is_sent("response.cancel")), 0);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_valid_turn_passes() {
    let moderator = Arc::new(ScriptedModerator::valid());
    let harness = HarnessBuilder::new()
        .moderator(moderator.clone())
        .spawn(validating_settings(RULES));
    harness.handle.start(StartOptions::default()).await.unwrap();

    play_turn(&harness.peers, "resp_1", "We are open until six.").await;
    assert!(harness.events.wait_for("validation_passed", 1).await);

    let requests = moderator.requests.lock().clone();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].transcript, "We are open until six.");
    assert_eq!(requests[0].rules, RULES);
    assert_eq!(harness.log.count(is_sent("response.cancel")), 0);
    assert_eq!(harness.handle.snapshot().await.unwrap().gain, 1.0);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_rejected_turn_runs_rephrase_protocol() {
    let moderator = Arc::new(ScriptedModerator::invalid("mentions a price"));
    let harness = HarnessBuilder::new()
        .moderator(moderator.clone())
        .spawn(validating_settings(RULES));
    harness.handle.start(StartOptions::default()).await.unwrap();

    let instructions = harness.log.sent()[0]["session"]["instructions"]
        .as_str()
        .unwrap()
        .to_string();
    assert!(instructions.contains(RULES));
    assert!(instructions.contains(REPHRASE_SENTINEL));

    play_turn(&harness.peers, "resp_1", "Sure, our price is $10").await;
    assert!(harness.events.wait_for("rephrase_requested", 1).await);
    assert_eq!(moderator.calls(), 1);

    // mute → cancel → sentinel → new turn
    let log = &harness.log;
    let muted = log.position(|r| *r == Record::Gain(0.0)).unwrap();
    let cancel = log.position(is_sent("response.cancel")).unwrap();
    let inject = log.position(is_sent("conversation.item.create")).unwrap();
    let records = log.records();
    let regenerate = records
        .iter()
        .enumerate()
        .position(|(i, r)| i > inject && is_sent("response.create")(r))
        .unwrap();
    assert!(muted < cancel);
    assert!(cancel < inject);
    assert!(inject < regenerate);

    let cancel_at = log.time_of(is_sent("response.cancel")).unwrap();
    let inject_at = log.time_of(is_sent("conversation.item.create")).unwrap();
    assert!(inject_at.duration_since(cancel_at) >= test_timings().rephrase_settle_delay);

    let sentinel = log
        .sent()
        .into_iter()
        .find(|v| v["type"] == "conversation.item.create")
        .unwrap();
    assert_eq!(sentinel["item"]["role"], "user");
    assert!(
        sentinel["item"]["content"][0]["text"]
            .as_str()
            .unwrap()
            .starts_with(REPHRASE_SENTINEL)
    );

    let failed = harness.events.events().into_iter().find_map(|e| match e {
        SessionEvent::ValidationFailed { reason, .. } => Some(reason),
        _ => None,
    });
    assert_eq!(failed.as_deref(), Some("mentions a price"));

    // Output stays muted until the replacement turn starts
    assert_eq!(harness.handle.snapshot().await.unwrap().gain, 0.0);
    harness.peers.inject(response_created("resp_2")).await;
    assert!(wait_until(|| log.count(|r| *r == Record::Gain(1.0)) == 1).await);
    assert_eq!(harness.handle.snapshot().await.unwrap().gain, 1.0);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_late_verdict_for_earlier_turn_keeps_rejected_turn_muted() {
    let moderator = Arc::new(KeywordModerator::new("price", Duration::from_millis(200)));
    let harness = HarnessBuilder::new()
        .validation(ValidationPipeline::new(moderator.clone(), Duration::from_secs(1)))
        .timings(SessionTimings {
            rephrase_settle_delay: Duration::from_millis(1500),
            ..test_timings()
        })
        .spawn(validating_settings(RULES));
    harness.handle.start(StartOptions::default()).await.unwrap();

    play_turn(&harness.peers, "resp_1", "We open at nine.").await;
    play_turn(&harness.peers, "resp_2", "Our price is $10").await;
    assert!(harness.events.wait_for("validation_failed", 1).await);
    assert_eq!(harness.handle.snapshot().await.unwrap().gain, 0.0);

    // The first turn's approval lands while the second is waiting to be rephrased
    assert!(harness.events.wait_for("validation_passed", 1).await);
    let events = harness.events.events();
    let passed = events.iter().find_map(|e| match e {
        SessionEvent::ValidationPassed { turn_id } => Some(turn_id.clone()),
        _ => None,
    });
    let failed = events.iter().find_map(|e| match e {
        SessionEvent::ValidationFailed { turn_id, .. } => Some(turn_id.clone()),
        _ => None,
    });
    assert_ne!(passed, failed);
    assert_eq!(harness.events.count("rephrase_requested"), 0);
    assert_eq!(harness.handle.snapshot().await.unwrap().gain, 0.0);
    assert_eq!(harness.log.count(|r| *r == Record::Gain(1.0)), 0);

    // Unmuting waits for the replacement turn
    assert!(harness.events.wait_for("rephrase_requested", 1).await);
    harness.peers.inject(response_created("resp_3")).await;
    let log = &harness.log;
    assert!(wait_until(|| log.count(|r| *r == Record::Gain(1.0)) == 1).await);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_cancelled_turn_not_validated() {
    let moderator = Arc::new(ScriptedModerator::invalid("mentions a price"));
    let harness = HarnessBuilder::new()
        .moderator(moderator.clone())
        .spawn(validating_settings(RULES));
    harness.handle.start(StartOptions::default()).await.unwrap();

    harness.peers.inject(response_created("resp_1")).await;
    harness
        .peers
        .inject(text_delta("resp_1", "The price is"))
        .await;
    harness
        .peers
        .inject(response_done("resp_1", "cancelled"))
        .await;
    assert!(harness.events.wait_for("inbound", 5).await);
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(moderator.calls(), 0);
    assert_eq!(harness.events.count("validation_failed"), 0);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_moderation_http_500_fails_open() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/check"))
        .and(body_partial_json(json!({ "rules": RULES })))
        .respond_with(ResponseTemplate::new(500).set_body_string("moderation down"))
        .expect(1)
        .mount(&server)
        .await;

    let harness = HarnessBuilder::new()
        .validation(http_pipeline(&server, Duration::from_millis(500)))
        .spawn(validating_settings(RULES));
    harness.handle.start(StartOptions::default()).await.unwrap();

    play_turn(&harness.peers, "resp_1", "our price is $10").await;
    assert!(harness.events.wait_for("validation_failed_open", 1).await);

    assert_eq!(harness.handle.snapshot().await.unwrap().gain, 1.0);
    assert_eq!(harness.log.count(is_sent("response.cancel")), 0);
    assert_eq!(harness.log.count(|r| *r == Record::Gain(0.0)), 0);
    assert_eq!(harness.events.count("rephrase_requested"), 0);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_moderation_timeout_fails_open() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/check"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "valid": false, "reason": "too late" }))
                .set_delay(Duration::from_millis(1000)),
        )
        .mount(&server)
        .await;

    let harness = HarnessBuilder::new()
        .validation(http_pipeline(&server, Duration::from_millis(150)))
        .spawn(validating_settings(RULES));
    harness.handle.start(StartOptions::default()).await.unwrap();

    play_turn(&harness.peers, "resp_1", "our price is $10").await;
    assert!(harness.events.wait_for("validation_failed_open", 1).await);

    assert_eq!(harness.handle.snapshot().await.unwrap().gain, 1.0);
    assert_eq!(harness.log.count(is_sent("response.cancel")), 0);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_moderation_over_http_rejects() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/check"))
        .and(body_partial_json(json!({ "transcript": "our price is $10" })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "valid": false, "reason": "quotes a price" })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let harness = HarnessBuilder::new()
        .validation(http_pipeline(&server, Duration::from_millis(500)))
        .spawn(validating_settings(RULES));
    harness.handle.start(StartOptions::default()).await.unwrap();

    play_turn(&harness.peers, "resp_1", "our price is $10").await;
    assert!(harness.events.wait_for("rephrase_requested", 1).await);
    assert_eq!(harness.log.count(is_sent("response.cancel")), 1);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_verdict_after_stop_is_discarded() {
    let moderator = Arc::new(
        ScriptedModerator::invalid("mentions a price").with_delay(Duration::from_millis(200)),
    );
    let harness = HarnessBuilder::new()
        .moderator(moderator.clone())
        .spawn(validating_settings(RULES));
    harness.handle.start(StartOptions::default()).await.unwrap();

    play_turn(&harness.peers, "resp_1", "our price is $10").await;
    assert!(wait_until(|| moderator.calls() == 1).await);
    harness.handle.stop().await.unwrap();

    tokio::time::sleep(Duration::from_millis(400)).await;

    assert_eq!(harness.events.count("validation_failed"), 0);
    assert_eq!(harness.log.count(is_sent("response.cancel")), 0);
    assert_eq!(
        harness.handle.snapshot().await.unwrap().state,
        SessionState::Idle
    );

    harness.shutdown().await;
}

#[tokio::test]
async fn test_verdict_from_previous_session_is_discarded() {
    let moderator = Arc::new(
        ScriptedModerator::invalid("mentions a price").with_delay(Duration::from_millis(200)),
    );
    let harness = HarnessBuilder::new()
        .moderator(moderator.clone())
        .spawn(validating_settings(RULES));

    harness.handle.start(StartOptions::default()).await.unwrap();
    play_turn(&harness.peers, "resp_1", "our price is $10").await;
    assert!(wait_until(|| moderator.calls() == 1).await);

    // Restart before the verdict lands
    harness.handle.stop().await.unwrap();
    harness.handle.start(StartOptions::default()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(400)).await;

    assert_eq!(harness.events.count("validation_failed"), 0);
    assert_eq!(harness.log.count(is_sent("response.cancel")), 0);
    assert_eq!(harness.handle.snapshot().await.unwrap().gain, 1.0);

    harness.shutdown().await;
}
