//! Sentiment tagging of user utterances.
//!
//! Results are only relayed to observers; they never affect the conversation.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::utils::{CollaboratorError, JsonEndpoint};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SentimentRequest {
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SentimentResult {
    pub label: String,
    #[serde(default)]
    pub score: f32,
}

#[async_trait]
pub trait SentimentAnalyzer: Send + Sync {
    async fn analyze(&self, text: &str) -> Result<SentimentResult, CollaboratorError>;
}

/// `POST {text}` → `{label, score}`.
pub struct HttpSentimentAnalyzer {
    endpoint: JsonEndpoint,
}

impl HttpSentimentAnalyzer {
    pub fn new(url: Url, timeout: Duration) -> Result<Self, CollaboratorError> {
        Ok(Self {
            endpoint: JsonEndpoint::new(url, timeout)?,
        })
    }
}

#[async_trait]
impl SentimentAnalyzer for HttpSentimentAnalyzer {
    async fn analyze(&self, text: &str) -> Result<SentimentResult, CollaboratorError> {
        self.endpoint
            .post(&SentimentRequest {
                text: text.to_string(),
            })
            .await
    }
}
