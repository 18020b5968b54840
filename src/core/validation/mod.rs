//! Compliance validation of finished model turns.
//!
//! When a turn completes, its transcript and the session's rule text go to a
//! moderation collaborator. The check **fails open**: transport errors,
//! timeouts, non-2xx answers and malformed bodies all count as compliant, so
//! a moderation outage never blocks the conversation.
//!
//! A rejected turn starts the rephrase protocol ([`rephrase`]).

pub mod rephrase;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use url::Url;

use crate::core::realtime::ValidationSettings;
use crate::utils::{CollaboratorError, JsonEndpoint};

pub use rephrase::{REPHRASE_SENTINEL, RephraseProtocol, validation_awareness_instructions};

/// Default bound on a moderation round trip.
pub const DEFAULT_MODERATION_TIMEOUT: Duration = Duration::from_millis(2500);

/// Moderation request body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModerationRequest {
    pub transcript: String,
    pub rules: String,
}

/// Moderation verdict.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModerationVerdict {
    pub valid: bool,
    #[serde(default)]
    pub reason: String,
}

/// External moderation collaborator.
#[async_trait]
pub trait Moderator: Send + Sync {
    async fn check(
        &self,
        request: &ModerationRequest,
    ) -> Result<ModerationVerdict, CollaboratorError>;
}

/// Moderation over HTTP: `POST {transcript, rules}` → `{valid, reason}`.
pub struct HttpModerator {
    endpoint: JsonEndpoint,
}

impl HttpModerator {
    pub fn new(url: Url, timeout: Duration) -> Result<Self, CollaboratorError> {
        Ok(Self {
            endpoint: JsonEndpoint::new(url, timeout)?,
        })
    }
}

#[async_trait]
impl Moderator for HttpModerator {
    async fn check(
        &self,
        request: &ModerationRequest,
    ) -> Result<ModerationVerdict, CollaboratorError> {
        self.endpoint.post(request).await
    }
}

/// Result of validating one turn.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationOutcome {
    /// Validation disabled, empty transcript or no moderator configured
    Skipped,
    Valid,
    Invalid { reason: String },
    /// Moderation failed; the turn is treated as valid
    FailedOpen { error: String },
}

impl ValidationOutcome {
    pub fn is_violation(&self) -> bool {
        matches!(self, ValidationOutcome::Invalid { .. })
    }
}

/// Runs moderation checks for finished turns.
pub struct ValidationPipeline {
    moderator: Option<Arc<dyn Moderator>>,
    timeout: Duration,
}

impl ValidationPipeline {
    pub fn new(moderator: Arc<dyn Moderator>, timeout: Duration) -> Self {
        Self {
            moderator: Some(moderator),
            timeout,
        }
    }

    /// A pipeline without a collaborator; every turn is skipped.
    pub fn disabled() -> Self {
        Self {
            moderator: None,
            timeout: DEFAULT_MODERATION_TIMEOUT,
        }
    }

    pub fn has_moderator(&self) -> bool {
        self.moderator.is_some()
    }

    pub async fn validate(
        &self,
        transcript: &str,
        settings: &ValidationSettings,
    ) -> ValidationOutcome {
        if !settings.enabled || transcript.trim().is_empty() {
            return ValidationOutcome::Skipped;
        }
        let Some(moderator) = self.moderator.as_ref() else {
            debug!("No moderator configured; skipping validation");
            return ValidationOutcome::Skipped;
        };

        let request = ModerationRequest {
            transcript: transcript.to_string(),
            rules: settings.rules.clone(),
        };

        match tokio::time::timeout(self.timeout, moderator.check(&request)).await {
            Ok(Ok(verdict)) if verdict.valid => ValidationOutcome::Valid,
            Ok(Ok(verdict)) => {
                info!(reason = %verdict.reason, "Turn failed validation");
                ValidationOutcome::Invalid {
                    reason: verdict.reason,
                }
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Moderation failed; allowing turn");
                ValidationOutcome::FailedOpen {
                    error: e.to_string(),
                }
            }
            Err(_) => {
                warn!(
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Moderation timed out; allowing turn"
                );
                ValidationOutcome::FailedOpen {
                    error: CollaboratorError::Timeout(self.timeout).to_string(),
                }
            }
        }
    }
}
