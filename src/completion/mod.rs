//! Completion service boundary.
//!
//! Stages talk to the text-completion service only through the
//! [`CompletionClient`] trait. The production implementation is
//! [`OpenAiClient`]; tests inject scripted clients.

pub mod error;
pub mod openai;

use async_trait::async_trait;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

pub use error::CompletionError;
pub use openai::{OpenAiClient, OpenAiConfig};

/// One role-tagged turn of a completion request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: String,
    pub content: String,
}

impl Turn {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new("system", content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new("user", content)
    }
}

/// An ordered list of turns plus the structured-output flag.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub turns: Vec<Turn>,

    /// Ask the service for a result parseable as a JSON object
    pub structured: bool,
}

impl CompletionRequest {
    pub fn free_text(turns: Vec<Turn>) -> Self {
        Self {
            turns,
            structured: false,
        }
    }

    pub fn structured(turns: Vec<Turn>) -> Self {
        Self {
            turns,
            structured: true,
        }
    }
}

/// A text-completion service.
///
/// Implementations must be safe to call concurrently from every stage; the
/// pipeline shares one handle across all of them.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Execute a request and return the completion text.
    ///
    /// # Errors
    ///
    /// Returns [`CompletionError`] when the service is unreachable, rejects
    /// the request, or answers with something that is not a completion.
    async fn complete(&self, request: &CompletionRequest) -> Result<String, CompletionError>;
}

/// Parse a structured completion into `T`.
///
/// Models occasionally wrap JSON in a markdown code fence even in JSON mode,
/// so a single surrounding fence is stripped before parsing.
pub fn parse_structured<T: DeserializeOwned>(completion: &str) -> Result<T, serde_json::Error> {
    serde_json::from_str(strip_code_fence(completion))
}

fn strip_code_fence(text: &str) -> &str {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    let fence = FENCE.get_or_init(|| {
        Regex::new(r"(?s)^\s*```[A-Za-z0-9_-]*\s*\n(.*?)\n?\s*```\s*$").expect("valid regex")
    });

    match fence.captures(text).and_then(|c| c.get(1)) {
        Some(body) => body.as_str(),
        None => text.trim(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[test]
    fn test_parse_plain_json() {
        let value: Value = parse_structured(r#"{"score": 4, "approved": true}"#).unwrap();
        assert_eq!(value, json!({"score": 4, "approved": true}));
    }

    #[test]
    fn test_parse_fenced_json() {
        let text = "```json\n{\"category\": \"billing\", \"priority\": \"high\"}\n```";
        let value: Value = parse_structured(text).unwrap();
        assert_eq!(value["category"], "billing");
    }

    #[test]
    fn test_parse_rejects_prose() {
        assert!(parse_structured::<Value>("Sure! The category is billing.").is_err());
    }

    #[test]
    fn test_request_constructors() {
        let request = CompletionRequest::structured(vec![Turn::user("hi")]);
        assert!(request.structured);
        assert_eq!(request.turns[0].role, "user");

        let request = CompletionRequest::free_text(vec![Turn::system("s"), Turn::user("u")]);
        assert!(!request.structured);
        assert_eq!(request.turns.len(), 2);
    }
}
