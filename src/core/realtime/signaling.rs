//! SDP offer/answer exchange with the remote model.
//!
//! # API Reference
//!
//! - Endpoint: `POST https://api.openai.com/v1/realtime?model=<model>`
//! - Request: `Content-Type: application/sdp`, bearer token, offer SDP as body
//! - Response: answer SDP as body (201 Created)

use std::time::Duration;

use async_trait::async_trait;
use http::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use tracing::{debug, warn};
use url::Url;

use super::base::{RealtimeError, RealtimeResult};

/// Default bound on the signaling round trip.
pub const DEFAULT_SIGNALING_TIMEOUT: Duration = Duration::from_secs(10);

#[async_trait]
pub trait Signaling: Send + Sync {
    /// Send the local offer and return the remote answer.
    async fn exchange(&self, offer_sdp: &str, model: &str) -> RealtimeResult<String>;
}

/// Signaling over HTTPS with a bearer token.
pub struct HttpSignaling {
    client: Client,
    endpoint: Url,
    api_key: String,
    timeout: Duration,
}

impl std::fmt::Debug for HttpSignaling {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpSignaling")
            .field("endpoint", &self.endpoint)
            .field("api_key", &"***")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl HttpSignaling {
    pub fn new(endpoint: Url, api_key: impl Into<String>, timeout: Duration) -> RealtimeResult<Self> {
        let api_key = api_key.into();
        if api_key.is_empty() {
            return Err(RealtimeError::AuthenticationFailed(
                "API key is required".to_string(),
            ));
        }

        let client = Client::builder().timeout(timeout).build().map_err(|e| {
            RealtimeError::InvalidConfiguration(format!("Failed to create HTTP client: {e}"))
        })?;

        Ok(Self {
            client,
            endpoint,
            api_key,
            timeout,
        })
    }

    fn build_url(&self, model: &str) -> Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut().append_pair("model", model);
        url
    }
}

#[async_trait]
impl Signaling for HttpSignaling {
    async fn exchange(&self, offer_sdp: &str, model: &str) -> RealtimeResult<String> {
        let url = self.build_url(model);
        debug!(%url, "Sending SDP offer");

        let response = self
            .client
            .post(url)
            .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
            .header(CONTENT_TYPE, "application/sdp")
            .header(ACCEPT, "application/sdp")
            .body(offer_sdp.to_string())
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    RealtimeError::Timeout(format!(
                        "signaling did not answer within {}ms",
                        self.timeout.as_millis()
                    ))
                } else {
                    RealtimeError::ConnectionFailed(format!("Signaling request failed: {e}"))
                }
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            RealtimeError::ConnectionFailed(format!("Failed to read signaling response: {e}"))
        })?;

        if !status.is_success() {
            warn!(status = status.as_u16(), "Signaling rejected the offer");
            if status.as_u16() == 401 || status.as_u16() == 403 {
                return Err(RealtimeError::AuthenticationFailed(body));
            }
            return Err(RealtimeError::SignalingRejected {
                status: status.as_u16(),
                body,
            });
        }

        if body.trim().is_empty() {
            return Err(RealtimeError::ConnectionFailed(
                "Signaling returned an empty answer".to_string(),
            ));
        }

        Ok(body)
    }
}
