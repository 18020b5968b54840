//! Knowledge-base search collaborator.

use std::fmt::Write as _;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::utils::{CollaboratorError, JsonEndpoint};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KnowledgeBaseRequest {
    pub query: String,
    pub knowledge_base_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct KnowledgeBaseHit {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub similarity: f32,
    #[serde(default)]
    pub source: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct KnowledgeBaseResponse {
    #[serde(default)]
    pub results: Vec<KnowledgeBaseHit>,
}

#[async_trait]
pub trait KnowledgeBaseSearch: Send + Sync {
    async fn search(
        &self,
        query: &str,
        knowledge_base_id: &str,
    ) -> Result<KnowledgeBaseResponse, CollaboratorError>;
}

/// `POST {query, knowledge_base_id}` → `{results[]}`.
pub struct HttpKnowledgeBase {
    endpoint: JsonEndpoint,
}

impl HttpKnowledgeBase {
    pub fn new(url: Url, timeout: Duration) -> Result<Self, CollaboratorError> {
        Ok(Self {
            endpoint: JsonEndpoint::new(url, timeout)?,
        })
    }
}

#[async_trait]
impl KnowledgeBaseSearch for HttpKnowledgeBase {
    async fn search(
        &self,
        query: &str,
        knowledge_base_id: &str,
    ) -> Result<KnowledgeBaseResponse, CollaboratorError> {
        let request = KnowledgeBaseRequest {
            query: query.to_string(),
            knowledge_base_id: knowledge_base_id.to_string(),
        };
        self.endpoint.post(&request).await
    }
}

/// Render hits best-first with their similarity scores.
pub fn format_knowledge_base_results(query: &str, response: &KnowledgeBaseResponse) -> String {
    if response.results.is_empty() {
        return format!("No knowledge base entries matched \"{query}\".");
    }

    let mut hits: Vec<&KnowledgeBaseHit> = response.results.iter().collect();
    hits.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));

    let mut out = String::new();
    let _ = writeln!(out, "Knowledge base results for \"{query}\":");
    for (i, hit) in hits.iter().enumerate() {
        let _ = write!(out, "{}. (similarity {:.2}) {}", i + 1, hit.similarity, hit.content.trim());
        if let Some(source) = hit.source.as_deref().filter(|s| !s.is_empty()) {
            let _ = write!(out, " [source: {source}]");
        }
        out.push('\n');
    }
    out.trim_end().to_string()
}
