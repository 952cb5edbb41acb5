//! Completion service for LLM-backed planning.
//!
//! One-shot structured completion against an Ollama-compatible chat
//! endpoint. No retries and no caching here: a transport or parse failure
//! propagates to the planner's caller unchanged.
//!
//! LLM output is messy in practice; `extract_json` tolerates fenced code
//! blocks and leading prose around the JSON object, but the *shape* of the
//! object is validated strictly by the planner, never coerced.

use anyhow::{Context, Result};
use async_trait::async_trait;
use quarry_common::config::LlmSettings;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Mutex;

#[async_trait]
pub trait CompletionService: Send + Sync {
    /// Whether a completion backend is configured. Gates planner strategy
    /// selection: unconfigured falls back to the offline heuristic.
    fn is_configured(&self) -> bool;

    /// One-shot completion that must yield a single JSON object.
    async fn plan_json(&self, system_prompt: &str, user_payload: &str) -> Result<Value>;
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
    format: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ChatMessage,
}

/// HTTP client against an Ollama-compatible `/api/chat` endpoint.
pub struct HttpCompletionClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
    enabled: bool,
}

impl HttpCompletionClient {
    pub fn new(settings: &LlmSettings) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            model: settings.model.clone(),
            enabled: settings.enabled,
        }
    }
}

#[async_trait]
impl CompletionService for HttpCompletionClient {
    fn is_configured(&self) -> bool {
        self.enabled && !self.base_url.is_empty()
    }

    async fn plan_json(&self, system_prompt: &str, user_payload: &str) -> Result<Value> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: system_prompt.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: user_payload.to_string(),
                },
            ],
            stream: false,
            format: "json".to_string(),
        };

        let response = self
            .http
            .post(format!("{}/api/chat", self.base_url))
            .json(&request)
            .send()
            .await
            .context("Completion request failed")?
            .error_for_status()
            .context("Completion endpoint returned an error status")?;

        let chat: ChatResponse = response
            .json()
            .await
            .context("Completion response was not valid JSON")?;

        let raw = extract_json(&chat.message.content);
        serde_json::from_str(&raw)
            .with_context(|| format!("Completion content was not a JSON object: {raw}"))
    }
}

/// Pull the JSON object out of a completion that may wrap it in a fenced
/// code block or surround it with prose.
fn extract_json(content: &str) -> String {
    let trimmed = content.trim();
    if let Some(fenced) = trimmed
        .split("```json")
        .nth(1)
        .or_else(|| trimmed.split("```").nth(1))
    {
        if let Some(body) = fenced.split("```").next() {
            return body.trim().to_string();
        }
    }
    match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if end > start => trimmed[start..=end].to_string(),
        _ => trimmed.to_string(),
    }
}

/// Test double: canned JSON (or a canned error), consumed verbatim.
pub struct FakeCompletion {
    configured: bool,
    response: Mutex<Option<std::result::Result<Value, String>>>,
}

impl FakeCompletion {
    pub fn unconfigured() -> Self {
        Self {
            configured: false,
            response: Mutex::new(None),
        }
    }

    pub fn returning(value: Value) -> Self {
        Self {
            configured: true,
            response: Mutex::new(Some(Ok(value))),
        }
    }

    pub fn failing(error: &str) -> Self {
        Self {
            configured: true,
            response: Mutex::new(Some(Err(error.to_string()))),
        }
    }
}

#[async_trait]
impl CompletionService for FakeCompletion {
    fn is_configured(&self) -> bool {
        self.configured
    }

    async fn plan_json(&self, _system_prompt: &str, _user_payload: &str) -> Result<Value> {
        match self
            .response
            .lock()
            .expect("fake completion poisoned")
            .take()
        {
            Some(Ok(value)) => Ok(value),
            Some(Err(error)) => Err(anyhow::anyhow!("{error}")),
            None => Err(anyhow::anyhow!("FakeCompletion has no queued response")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_json_plain() {
        assert_eq!(extract_json("{\"a\": 1}"), "{\"a\": 1}");
    }

    #[test]
    fn test_extract_json_fenced() {
        let content = "Here is the plan:\n```json\n{\"a\": 1}\n```\nDone.";
        assert_eq!(extract_json(content), "{\"a\": 1}");
    }

    #[test]
    fn test_extract_json_with_prose() {
        let content = "Sure! {\"a\": 1} hope that helps";
        assert_eq!(extract_json(content), "{\"a\": 1}");
    }
}
