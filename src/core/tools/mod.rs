//! Model-initiated tool calls.
//!
//! The model may call `web_search` or `search_knowledge_base`. Every call
//! produces exactly one textual result: collaborator output formatted as a
//! list, or a structured JSON error payload when anything goes wrong. The
//! model must always receive a result or its turn stalls.

pub mod knowledge_base;
pub mod sentiment;
pub mod web_search;

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::core::realtime::messages::ToolDef;
use crate::utils::CollaboratorError;

pub use knowledge_base::{
    HttpKnowledgeBase, KnowledgeBaseHit, KnowledgeBaseResponse, KnowledgeBaseSearch,
    format_knowledge_base_results,
};
pub use sentiment::{HttpSentimentAnalyzer, SentimentAnalyzer, SentimentResult};
pub use web_search::{
    HttpWebSearch, WebSearch, WebSearchResponse, WebSearchResult, format_web_results,
};

/// Default bound on a tool collaborator call.
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(10);

/// Functions the model may call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    WebSearch,
    KnowledgeBase,
}

impl ToolKind {
    #[inline]
    pub fn name(&self) -> &'static str {
        match self {
            ToolKind::WebSearch => "web_search",
            ToolKind::KnowledgeBase => "search_knowledge_base",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "web_search" => Some(ToolKind::WebSearch),
            "search_knowledge_base" => Some(ToolKind::KnowledgeBase),
            _ => None,
        }
    }

    /// Function definition advertised in `session.update`.
    pub fn definition(&self) -> ToolDef {
        match self {
            ToolKind::WebSearch => ToolDef {
                tool_type: "function".to_string(),
                name: self.name().to_string(),
                description: "Search the web for current information.".to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "query": {"type": "string", "description": "Search query"}
                    },
                    "required": ["query"]
                }),
            },
            ToolKind::KnowledgeBase => ToolDef {
                tool_type: "function".to_string(),
                name: self.name().to_string(),
                description: "Search the organization's knowledge base for relevant passages."
                    .to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "query": {"type": "string", "description": "What to look up"},
                        "knowledge_base_id": {
                            "type": "string",
                            "description": "Knowledge base to search; defaults to the configured one"
                        }
                    },
                    "required": ["query"]
                }),
            },
        }
    }
}

/// Text returned to the model for one call.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutcome {
    pub output: String,
    pub success: bool,
}

impl ToolOutcome {
    fn ok(output: String) -> Self {
        Self {
            output,
            success: true,
        }
    }

    /// Structured error the model can explain to the user.
    pub fn error(function: &str, message: impl Into<String>) -> Self {
        let payload = json!({
            "error": {
                "function": function,
                "message": message.into(),
            }
        });
        Self {
            output: payload.to_string(),
            success: false,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WebSearchArgs {
    query: String,
}

#[derive(Debug, Deserialize)]
struct KnowledgeBaseArgs {
    query: String,
    #[serde(default)]
    knowledge_base_id: Option<String>,
}

/// Routes function calls to their collaborators.
#[derive(Clone, Default)]
pub struct ToolDispatcher {
    web_search: Option<Arc<dyn WebSearch>>,
    knowledge_base: Option<Arc<dyn KnowledgeBaseSearch>>,
    default_knowledge_base_id: Option<String>,
    timeout: Option<Duration>,
}

impl ToolDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_web_search(mut self, search: Arc<dyn WebSearch>) -> Self {
        self.web_search = Some(search);
        self
    }

    pub fn with_knowledge_base(
        mut self,
        search: Arc<dyn KnowledgeBaseSearch>,
        default_id: Option<String>,
    ) -> Self {
        self.knowledge_base = Some(search);
        self.default_knowledge_base_id = default_id;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Tools with a configured collaborator.
    pub fn available(&self) -> Vec<ToolKind> {
        let mut tools = Vec::new();
        if self.web_search.is_some() {
            tools.push(ToolKind::WebSearch);
        }
        if self.knowledge_base.is_some() {
            tools.push(ToolKind::KnowledgeBase);
        }
        tools
    }

    pub fn definitions(&self) -> Vec<ToolDef> {
        self.available().iter().map(ToolKind::definition).collect()
    }

    /// Run one call to completion. Never fails; errors become payloads.
    pub async fn dispatch(&self, name: &str, arguments: &str) -> ToolOutcome {
        let Some(kind) = ToolKind::from_name(name) else {
            warn!(function = %name, "Model called an unknown function");
            return ToolOutcome::error(name, format!("Unknown function '{name}'"));
        };

        let raw = if arguments.trim().is_empty() {
            "{}"
        } else {
            arguments
        };

        let outcome = match kind {
            ToolKind::WebSearch => match serde_json::from_str::<WebSearchArgs>(raw) {
                Ok(args) => self.web_search(&args.query).await,
                Err(e) => Err(CollaboratorError::Decode(format!("Invalid arguments: {e}"))),
            },
            ToolKind::KnowledgeBase => match serde_json::from_str::<KnowledgeBaseArgs>(raw) {
                Ok(args) => self.knowledge_base(&args.query, args.knowledge_base_id).await,
                Err(e) => Err(CollaboratorError::Decode(format!("Invalid arguments: {e}"))),
            },
        };

        match outcome {
            Ok(text) => {
                debug!(function = %name, chars = text.len(), "Tool call completed");
                ToolOutcome::ok(text)
            }
            Err(e) => {
                warn!(function = %name, error = %e, "Tool call failed");
                ToolOutcome::error(name, e.to_string())
            }
        }
    }

    async fn web_search(&self, query: &str) -> Result<String, CollaboratorError> {
        let search = self.web_search.as_ref().ok_or_else(|| {
            CollaboratorError::Configuration("web search is not configured".to_string())
        })?;
        let response = self.bounded(search.search(query)).await?;
        Ok(format_web_results(query, &response))
    }

    async fn knowledge_base(
        &self,
        query: &str,
        knowledge_base_id: Option<String>,
    ) -> Result<String, CollaboratorError> {
        let search = self.knowledge_base.as_ref().ok_or_else(|| {
            CollaboratorError::Configuration("knowledge base search is not configured".to_string())
        })?;
        let id = knowledge_base_id
            .filter(|id| !id.trim().is_empty())
            .or_else(|| self.default_knowledge_base_id.clone())
            .ok_or_else(|| {
                CollaboratorError::Configuration("no knowledge base id was provided".to_string())
            })?;
        let response = self.bounded(search.search(query, &id)).await?;
        Ok(format_knowledge_base_results(query, &response))
    }

    async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, CollaboratorError>>,
    ) -> Result<T, CollaboratorError> {
        let timeout = self.timeout.unwrap_or(DEFAULT_TOOL_TIMEOUT);
        tokio::time::timeout(timeout, call)
            .await
            .map_err(|_| CollaboratorError::Timeout(timeout))?
    }
}
