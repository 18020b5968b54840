//! Web search collaborator.

use std::fmt::Write as _;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::utils::{CollaboratorError, JsonEndpoint};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WebSearchRequest {
    pub query: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct WebSearchResult {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub link: String,
    #[serde(default)]
    pub snippet: String,
}

/// Direct answer some search backends return above the result list.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AnswerBox {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub answer: Option<String>,
    #[serde(default)]
    pub snippet: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct WebSearchResponse {
    #[serde(default)]
    pub results: Vec<WebSearchResult>,
    #[serde(default)]
    pub answer_box: Option<AnswerBox>,
}

#[async_trait]
pub trait WebSearch: Send + Sync {
    async fn search(&self, query: &str) -> Result<WebSearchResponse, CollaboratorError>;
}

/// `POST {query}` → `{results[], answer_box?}`.
pub struct HttpWebSearch {
    endpoint: JsonEndpoint,
}

impl HttpWebSearch {
    pub fn new(url: Url, timeout: Duration) -> Result<Self, CollaboratorError> {
        Ok(Self {
            endpoint: JsonEndpoint::new(url, timeout)?,
        })
    }
}

#[async_trait]
impl WebSearch for HttpWebSearch {
    async fn search(&self, query: &str) -> Result<WebSearchResponse, CollaboratorError> {
        let request = WebSearchRequest {
            query: query.to_string(),
        };
        self.endpoint.post(&request).await
    }
}

/// Render results as a numbered list the model can read aloud from.
pub fn format_web_results(query: &str, response: &WebSearchResponse) -> String {
    let mut out = String::new();

    if let Some(answer_box) = &response.answer_box {
        let answer = answer_box
            .answer
            .as_deref()
            .or(answer_box.snippet.as_deref())
            .unwrap_or_default();
        if !answer.is_empty() {
            match answer_box.title.as_deref() {
                Some(title) if !title.is_empty() => {
                    let _ = writeln!(out, "Direct answer ({title}): {answer}");
                }
                _ => {
                    let _ = writeln!(out, "Direct answer: {answer}");
                }
            }
            out.push('\n');
        }
    }

    if response.results.is_empty() {
        let _ = write!(out, "No web results found for \"{query}\".");
        return out;
    }

    let _ = writeln!(out, "Web search results for \"{query}\":");
    for (i, result) in response.results.iter().enumerate() {
        let _ = writeln!(out, "{}. {}", i + 1, result.title);
        if !result.link.is_empty() {
            let _ = writeln!(out, "   Link: {}", result.link);
        }
        if !result.snippet.is_empty() {
            let _ = writeln!(out, "   {}", result.snippet);
        }
    }
    out.trim_end().to_string()
}
