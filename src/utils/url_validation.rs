//! URL validation for configured service endpoints.
//!
//! Endpoints that carry credentials (signaling with the API key) must use
//! HTTPS unless they point at the local machine. Collaborator endpoints may
//! use plain HTTP because they commonly run beside the engine.

use std::net::IpAddr;
use thiserror::Error;
use url::{Host, Url};

/// Errors that can occur during URL validation
#[derive(Debug, Error)]
pub enum UrlValidationError {
    #[error("Invalid URL format: {0}")]
    InvalidFormat(#[from] url::ParseError),

    #[error("URL scheme must be http or https, got: {0}")]
    UnsupportedScheme(String),

    #[error("URL scheme must be HTTPS, got: {0}")]
    HttpsRequired(String),

    #[error("URL must have a host")]
    MissingHost,

    #[error("WebSocket URL scheme must be ws or wss, got: {0}")]
    UnsupportedWebSocketScheme(String),

    #[error("WebSocket URL scheme must be wss, got: {0}")]
    WssRequired(String),
}

/// Whether the URL host is the local machine.
pub fn is_loopback_host(url: &Url) -> bool {
    match url.host() {
        Some(Host::Domain(domain)) => domain.eq_ignore_ascii_case("localhost"),
        Some(Host::Ipv4(ip)) => IpAddr::V4(ip).is_loopback(),
        Some(Host::Ipv6(ip)) => IpAddr::V6(ip).is_loopback(),
        None => false,
    }
}

/// Parse an endpoint URL.
///
/// With `require_https`, plain HTTP is accepted only for loopback hosts.
pub fn validate_endpoint_url(raw: &str, require_https: bool) -> Result<Url, UrlValidationError> {
    let url = Url::parse(raw.trim())?;

    match url.scheme() {
        "https" => {}
        "http" if !require_https || is_loopback_host(&url) => {}
        "http" => return Err(UrlValidationError::HttpsRequired(url.scheme().to_string())),
        other => return Err(UrlValidationError::UnsupportedScheme(other.to_string())),
    }

    if url.host().is_none() {
        return Err(UrlValidationError::MissingHost);
    }

    Ok(url)
}

/// Parse a WebSocket endpoint. Plain `ws` is accepted only for loopback hosts.
pub fn validate_websocket_url(raw: &str) -> Result<Url, UrlValidationError> {
    let url = Url::parse(raw.trim())?;

    match url.scheme() {
        "wss" => {}
        "ws" if is_loopback_host(&url) => {}
        "ws" => return Err(UrlValidationError::WssRequired(url.scheme().to_string())),
        other => return Err(UrlValidationError::UnsupportedWebSocketScheme(other.to_string())),
    }

    if url.host().is_none() {
        return Err(UrlValidationError::MissingHost);
    }

    Ok(url)
}
