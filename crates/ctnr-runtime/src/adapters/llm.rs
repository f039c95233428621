//! Chat-completion adapter used by the AI-assisted fixers (§4.3, §9). Models
//! a single `complete(messages) -> text` call over an OpenAI-compatible chat
//! completions endpoint; the wire protocol itself is out of scope (§1) — this
//! is deliberately the thinnest adapter in the crate.

use async_trait::async_trait;
use ctnr_core::error::{CtnrError, ErrorCode, ErrorDomain, Result};
use serde::{Deserialize, Serialize};

use super::classify_auth_failure;
use crate::redact::redact;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }
}

/// Capability interface the fixers are written against. Lets tests supply a
/// scripted [`crate::adapters::llm::LlmAdapter`]-implementing mock without
/// pulling in `reqwest`.
#[async_trait]
pub trait LlmAdapter: Send + Sync {
    async fn complete(&self, messages: Vec<ChatMessage>) -> Result<String>;
}

/// Real adapter, talking to an OpenAI-compatible `/chat/completions` endpoint.
pub struct ReqwestLlmAdapter {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl ReqwestLlmAdapter {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: String,
}

#[async_trait]
impl LlmAdapter for ReqwestLlmAdapter {
    async fn complete(&self, messages: Vec<ChatMessage>) -> Result<String> {
        let body = CompletionRequest {
            model: &self.model,
            messages: &messages,
            temperature: 0.1,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| CtnrError::new(ErrorCode::NetworkError, ErrorDomain::Llm, format!("llm request failed: {}", redact(&e.to_string()))))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| CtnrError::new(ErrorCode::NetworkError, ErrorDomain::Llm, format!("failed reading llm response: {e}")))?;
        let redacted_text = redact(&text);

        if !status.is_success() {
            if let Some(err) = classify_auth_failure(ErrorDomain::Llm, &redacted_text, &self.base_url) {
                return Err(err);
            }
            return Err(CtnrError::new(
                ErrorCode::NetworkError,
                ErrorDomain::Llm,
                format!("llm call returned {status}: {redacted_text}"),
            ));
        }

        let parsed: CompletionResponse = serde_json::from_str(&text)
            .map_err(|e| CtnrError::new(ErrorCode::InternalError, ErrorDomain::Llm, format!("unexpected llm response shape: {e}")))?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| CtnrError::new(ErrorCode::InternalError, ErrorDomain::Llm, "llm response had no choices"))
    }
}

/// Fixed-reply test double, used across the crate's step/fixer unit tests in
/// place of a real model call.
pub struct StaticLlmAdapter(pub String);

impl StaticLlmAdapter {
    pub fn new(reply: impl Into<String>) -> Self {
        Self(reply.into())
    }
}

#[async_trait]
impl LlmAdapter for StaticLlmAdapter {
    async fn complete(&self, _messages: Vec<ChatMessage>) -> Result<String> {
        Ok(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoLlm;

    #[async_trait]
    impl LlmAdapter for EchoLlm {
        async fn complete(&self, messages: Vec<ChatMessage>) -> Result<String> {
            Ok(messages.last().map(|m| m.content.clone()).unwrap_or_default())
        }
    }

    #[tokio::test]
    async fn mock_adapter_echoes_last_message() {
        let llm = EchoLlm;
        let reply = llm
            .complete(vec![ChatMessage::system("you fix dockerfiles"), ChatMessage::user("fix this")])
            .await
            .unwrap();
        assert_eq!(reply, "fix this");
    }

    #[tokio::test]
    async fn static_adapter_always_returns_configured_reply() {
        let llm = StaticLlmAdapter::new("node");
        let reply = llm.complete(vec![ChatMessage::user("anything")]).await.unwrap();
        assert_eq!(reply, "node");
    }
}
