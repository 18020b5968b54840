//! Shared plumbing for request/response collaborators.
//!
//! Moderation, search and sentiment services are all plain JSON-over-HTTP
//! calls. They share one error type so callers can degrade uniformly.

use std::time::Duration;

use reqwest::Client;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use url::Url;

/// Errors from an external collaborator call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CollaboratorError {
    /// Request could not be sent or the connection dropped
    #[error("Transport error: {0}")]
    Transport(String),

    /// Collaborator answered with a non-success status
    #[error("Collaborator returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// Body did not match the expected shape
    #[error("Malformed response: {0}")]
    Decode(String),

    /// No answer within the configured bound
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// Client could not be built
    #[error("Client configuration error: {0}")]
    Configuration(String),
}

impl CollaboratorError {
    fn from_reqwest(e: reqwest::Error, timeout: Duration) -> Self {
        if e.is_timeout() {
            CollaboratorError::Timeout(timeout)
        } else {
            CollaboratorError::Transport(e.to_string())
        }
    }
}

/// Thin JSON client bound to one endpoint.
#[derive(Debug, Clone)]
pub struct JsonEndpoint {
    client: Client,
    url: Url,
    timeout: Duration,
}

impl JsonEndpoint {
    pub fn new(url: Url, timeout: Duration) -> Result<Self, CollaboratorError> {
        let client = Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(4)
            .build()
            .map_err(|e| {
                CollaboratorError::Configuration(format!("Failed to create HTTP client: {e}"))
            })?;
        Ok(Self {
            client,
            url,
            timeout,
        })
    }

    /// POST `body` as JSON and decode a JSON answer.
    pub async fn post<Req, Resp>(&self, body: &Req) -> Result<Resp, CollaboratorError>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let response = self
            .client
            .post(self.url.clone())
            .json(body)
            .send()
            .await
            .map_err(|e| CollaboratorError::from_reqwest(e, self.timeout))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| CollaboratorError::from_reqwest(e, self.timeout))?;

        if !status.is_success() {
            return Err(CollaboratorError::Status {
                status: status.as_u16(),
                body: text,
            });
        }

        serde_json::from_str(&text).map_err(|e| CollaboratorError::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Debug, Deserialize, PartialEq)]
    struct Echo {
        ok: bool,
    }

    fn endpoint(server: &MockServer, timeout_ms: u64) -> JsonEndpoint {
        let url = Url::parse(&format!("{}/check", server.uri())).unwrap();
        JsonEndpoint::new(url, Duration::from_millis(timeout_ms)).unwrap()
    }

    #[tokio::test]
    async fn test_post_decodes_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/check"))
            .and(header("content-type", "application/json"))
            .and(body_json(json!({"q": 1})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .mount(&server)
            .await;

        let result: Echo = endpoint(&server, 1000)
            .post(&json!({"q": 1}))
            .await
            .unwrap();
        assert_eq!(result, Echo { ok: true });
    }

    #[tokio::test]
    async fn test_post_reports_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("down"))
            .mount(&server)
            .await;

        let err = endpoint(&server, 1000)
            .post::<_, Echo>(&json!({}))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            CollaboratorError::Status {
                status: 503,
                body: "down".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_post_reports_malformed_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let err = endpoint(&server, 1000)
            .post::<_, Echo>(&json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, CollaboratorError::Decode(_)));
    }

    #[tokio::test]
    async fn test_post_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"ok": true}))
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let err = endpoint(&server, 50)
            .post::<_, Echo>(&json!({}))
            .await
            .unwrap_err();
        assert_eq!(err, CollaboratorError::Timeout(Duration::from_millis(50)));
    }
}
