//! Configuration module for WaaV Sentinel
//!
//! This module handles configuration from environment variables (including a
//! `.env` file loaded at startup) and YAML files. Priority: YAML > ENV vars >
//! defaults.
//!
//! # Modules
//! - `yaml`: YAML configuration file loading
//! - `env`: Environment variable loading
//! - `merge`: Applying YAML overrides to the environment configuration
//! - `validation`: Configuration validation logic
//! - `pricing`: Per-token pricing table for the realtime models
//!
//! # Example
//! ```rust,no_run
//! use waav_sentinel::config::SentinelConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = SentinelConfig::from_env()?;
//!
//! // Load from YAML file with environment variables as the base
//! let config_path = PathBuf::from("config.yaml");
//! let config = SentinelConfig::from_file(&config_path)?;
//!
//! println!("Model: {}", config.session.model);
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use url::Url;
use zeroize::Zeroize;

mod env;
mod merge;
pub mod pricing;
mod validation;
mod yaml;

pub use pricing::{TokenPricing, get_token_pricing, list_priced_models, pricing_or_default};
pub use yaml::YamlConfig;

use crate::core::audio::AudioSink;
use crate::core::realtime::{
    AudioCapture, DEFAULT_CONNECT_TIMEOUT, DEFAULT_SIGNALING_TIMEOUT, DEFAULT_SIGNALING_URL,
    DEFAULT_WEBSOCKET_URL, HttpSignaling, PeerFactory, SessionDependencies, SessionSettings,
    SessionTimings, WebSocketPeerFactory,
};
use crate::core::tools::{
    DEFAULT_TOOL_TIMEOUT, HttpKnowledgeBase, HttpSentimentAnalyzer, HttpWebSearch,
    SentimentAnalyzer, ToolDispatcher,
};
use crate::core::validation::{DEFAULT_MODERATION_TIMEOUT, HttpModerator, ValidationPipeline};

/// API key that is wiped from memory on drop and never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl Drop for ApiKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(***)")
    }
}

/// Sentinel configuration
///
/// Contains everything needed to run a session:
/// - Remote model access (API key, signaling and WebSocket endpoints)
/// - Default session settings, including validation
/// - Collaborator endpoints (moderation, web search, knowledge base, sentiment)
/// - Controller timings and optional pricing override
#[derive(Debug, Clone)]
pub struct SentinelConfig {
    pub openai_api_key: Option<ApiKey>,
    pub signaling_url: String,
    pub websocket_url: String,

    pub session: SessionSettings,

    // Validation collaborator
    pub moderation_url: Option<String>,
    pub moderation_timeout: Duration,

    // Tool collaborators
    pub web_search_url: Option<String>,
    pub knowledge_base_url: Option<String>,
    /// Used when the model does not name a knowledge base
    pub knowledge_base_id: Option<String>,
    pub sentiment_url: Option<String>,
    pub tool_timeout: Duration,

    pub timings: SessionTimings,

    /// Replaces the built-in rates for the configured model
    pub pricing_override: Option<TokenPricing>,
}

impl Default for SentinelConfig {
    fn default() -> Self {
        Self {
            openai_api_key: None,
            signaling_url: DEFAULT_SIGNALING_URL.to_string(),
            websocket_url: DEFAULT_WEBSOCKET_URL.to_string(),
            session: SessionSettings::default(),
            moderation_url: None,
            moderation_timeout: DEFAULT_MODERATION_TIMEOUT,
            web_search_url: None,
            knowledge_base_url: None,
            knowledge_base_id: None,
            sentiment_url: None,
            tool_timeout: DEFAULT_TOOL_TIMEOUT,
            timings: SessionTimings::default(),
            pricing_override: None,
        }
    }
}

fn parse_url(name: &str, raw: &str) -> Result<Url, Box<dyn std::error::Error>> {
    Url::parse(raw).map_err(|e| format!("Invalid {name} URL '{raw}': {e}").into())
}

impl SentinelConfig {
    /// Load configuration from environment variables and defaults.
    ///
    /// Note: the `.env` file is loaded in main.rs at application startup.
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let config = env::load()?;
        validation::validate_config(&config)?;
        Ok(config)
    }

    /// Load configuration from a YAML file with environment variable base
    ///
    /// Priority order (highest to lowest):
    /// 1. YAML file values
    /// 2. Environment variables (actual ENV vars override .env values)
    /// 3. Default values
    ///
    /// # Errors
    /// Returns an error if:
    /// - The YAML file cannot be read or is malformed
    /// - Environment variables have invalid formats
    /// - Configuration validation fails
    pub fn from_file(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let yaml_config = yaml::YamlConfig::load(path)?;

        let mut config = env::load()?;
        merge::apply_yaml(&mut config, yaml_config);

        validation::validate_config(&config)?;
        Ok(config)
    }

    /// Per-token rates: the override if configured, else the model's.
    pub fn pricing(&self) -> TokenPricing {
        self.pricing_override
            .unwrap_or_else(|| pricing_or_default(&self.session.model))
    }

    /// Moderation pipeline; disabled when no moderation URL is configured.
    pub fn validation_pipeline(&self) -> Result<ValidationPipeline, Box<dyn std::error::Error>> {
        let Some(raw) = self.moderation_url.as_deref() else {
            return Ok(ValidationPipeline::disabled());
        };
        let moderator = HttpModerator::new(parse_url("moderation", raw)?, self.moderation_timeout)?;
        Ok(ValidationPipeline::new(
            Arc::new(moderator),
            self.moderation_timeout,
        ))
    }

    /// Dispatcher with every configured tool collaborator registered.
    pub fn tool_dispatcher(&self) -> Result<ToolDispatcher, Box<dyn std::error::Error>> {
        let mut dispatcher = ToolDispatcher::new().with_timeout(self.tool_timeout);
        if let Some(raw) = self.web_search_url.as_deref() {
            let search = HttpWebSearch::new(parse_url("web search", raw)?, self.tool_timeout)?;
            dispatcher = dispatcher.with_web_search(Arc::new(search));
        }
        if let Some(raw) = self.knowledge_base_url.as_deref() {
            let search =
                HttpKnowledgeBase::new(parse_url("knowledge base", raw)?, self.tool_timeout)?;
            dispatcher =
                dispatcher.with_knowledge_base(Arc::new(search), self.knowledge_base_id.clone());
        }
        Ok(dispatcher)
    }

    pub fn sentiment_analyzer(
        &self,
    ) -> Result<Option<Arc<dyn SentimentAnalyzer>>, Box<dyn std::error::Error>> {
        let Some(raw) = self.sentiment_url.as_deref() else {
            return Ok(None);
        };
        let analyzer = HttpSentimentAnalyzer::new(parse_url("sentiment", raw)?, self.tool_timeout)?;
        Ok(Some(Arc::new(analyzer)))
    }

    /// Signaling client; requires the API key.
    pub fn signaling(&self) -> Result<HttpSignaling, Box<dyn std::error::Error>> {
        let key = self
            .openai_api_key
            .as_ref()
            .ok_or("OPENAI_API_KEY is required to start a session")?;
        let endpoint = parse_url("signaling", &self.signaling_url)?;
        Ok(HttpSignaling::new(
            endpoint,
            key.expose(),
            DEFAULT_SIGNALING_TIMEOUT,
        )?)
    }

    /// WebSocket transport to the remote model; requires the API key.
    pub fn websocket_peers(&self) -> Result<WebSocketPeerFactory, Box<dyn std::error::Error>> {
        let key = self
            .openai_api_key
            .as_ref()
            .ok_or("OPENAI_API_KEY is required to start a session")?;
        let endpoint = parse_url("WebSocket", &self.websocket_url)?;
        Ok(WebSocketPeerFactory::new(
            endpoint,
            key.expose(),
            DEFAULT_CONNECT_TIMEOUT,
        )?)
    }

    /// Wire HTTP collaborators around the platform media stack.
    pub fn session_dependencies(
        &self,
        capture: Arc<dyn AudioCapture>,
        peers: Arc<dyn PeerFactory>,
        sink: Arc<dyn AudioSink>,
    ) -> Result<SessionDependencies, Box<dyn std::error::Error>> {
        Ok(SessionDependencies {
            capture,
            peers,
            signaling: Arc::new(self.signaling()?),
            sink,
            validation: Arc::new(self.validation_pipeline()?),
            tools: Arc::new(self.tool_dispatcher()?),
            sentiment: self.sentiment_analyzer()?,
            pricing: self.pricing(),
            timings: self.timings,
        })
    }
}
