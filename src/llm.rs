//! Answer generation.
//!
//! The pack does not run a language model itself: it hands a filled QA
//! prompt (or a chat transcript) to an [`LlmProvider`] and returns the
//! completion verbatim. HTTP providers share the embedding module's
//! retry/backoff strategy.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::config::LlmConfig;
use crate::embedding::post_json_with_retry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

impl ChatRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatRole::System => "system",
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
        }
    }
}

/// One chat message, serialized the way OpenAI and Ollama expect it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Flatten a transcript into a single prompt ending with an open
/// assistant turn.
pub fn render_transcript(messages: &[ChatMessage]) -> String {
    let mut out = String::new();
    for m in messages {
        out.push_str(m.role.as_str());
        out.push_str(": ");
        out.push_str(&m.content);
        out.push_str("\n\n");
    }
    out.push_str("assistant:");
    out
}

#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn model_name(&self) -> &str;

    async fn complete(&self, prompt: &str) -> Result<String>;

    /// Multi-turn completion. Providers without a chat endpoint receive the
    /// transcript flattened by [`render_transcript`].
    async fn chat(&self, messages: &[ChatMessage]) -> Result<String> {
        self.complete(&render_transcript(messages)).await
    }
}

/// Used when `[llm] provider = "disabled"`; `retrieve` still works.
pub struct DisabledLlm;

#[async_trait]
impl LlmProvider for DisabledLlm {
    fn model_name(&self) -> &str {
        "disabled"
    }
    async fn complete(&self, _prompt: &str) -> Result<String> {
        bail!("LLM provider is disabled; set [llm] provider to generate answers")
    }
}

/// OpenAI-compatible chat completions (`POST {url}/chat/completions`).
/// Requires `OPENAI_API_KEY` at call time.
pub struct OpenAIChat {
    model: String,
    url: String,
    temperature: Option<f32>,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAIChat {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow!("llm.model required for OpenAI provider"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string());
        Ok(Self {
            model,
            url: url.trim_end_matches('/').to_string(),
            temperature: config.temperature,
            max_retries: config.max_retries,
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(config.timeout_secs))
                .build()?,
        })
    }
}

#[async_trait]
impl LlmProvider for OpenAIChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        self.chat(&[ChatMessage::user(prompt)]).await
    }

    async fn chat(&self, messages: &[ChatMessage]) -> Result<String> {
        let api_key =
            std::env::var("OPENAI_API_KEY").map_err(|_| anyhow!("OPENAI_API_KEY not set"))?;
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": messages,
        });
        if let Some(t) = self.temperature {
            body["temperature"] = serde_json::json!(t);
        }
        let json = post_json_with_retry(
            &self.client,
            &format!("{}/chat/completions", self.url),
            Some(&api_key),
            &body,
            self.max_retries,
            "OpenAI",
        )
        .await?;
        json.pointer("/choices/0/message/content")
            .and_then(|c| c.as_str())
            .map(str::to_string)
            .ok_or_else(|| anyhow!("Invalid OpenAI response: missing choices[0].message.content"))
    }
}

/// Ollama chat (`POST {url}/api/chat`, non-streaming).
pub struct OllamaChat {
    model: String,
    url: String,
    temperature: Option<f32>,
    max_retries: u32,
    client: reqwest::Client,
}

impl OllamaChat {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow!("llm.model required for Ollama provider"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());
        Ok(Self {
            model,
            url: url.trim_end_matches('/').to_string(),
            temperature: config.temperature,
            max_retries: config.max_retries,
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(config.timeout_secs))
                .build()?,
        })
    }
}

#[async_trait]
impl LlmProvider for OllamaChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        self.chat(&[ChatMessage::user(prompt)]).await
    }

    async fn chat(&self, messages: &[ChatMessage]) -> Result<String> {
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "stream": false,
        });
        if let Some(t) = self.temperature {
            body["options"] = serde_json::json!({ "temperature": t });
        }
        let json = post_json_with_retry(
            &self.client,
            &format!("{}/api/chat", self.url),
            None,
            &body,
            self.max_retries,
            "Ollama",
        )
        .await?;
        json.pointer("/message/content")
            .and_then(|c| c.as_str())
            .map(str::to_string)
            .ok_or_else(|| anyhow!("Invalid Ollama response: missing message.content"))
    }
}

pub fn create_llm(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledLlm)),
        "openai" => Ok(Arc::new(OpenAIChat::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaChat::new(config)?)),
        other => bail!("Unknown llm provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_selection() {
        assert_eq!(create_llm(&LlmConfig::default()).unwrap().model_name(), "disabled");

        let ollama = LlmConfig {
            provider: "ollama".to_string(),
            model: Some("llama3.1".to_string()),
            ..LlmConfig::default()
        };
        assert_eq!(create_llm(&ollama).unwrap().model_name(), "llama3.1");

        let missing_model = LlmConfig {
            provider: "openai".to_string(),
            ..LlmConfig::default()
        };
        assert!(create_llm(&missing_model).is_err());
    }

    #[tokio::test]
    async fn disabled_llm_errors() {
        assert!(DisabledLlm.complete("hi").await.is_err());
        assert!(DisabledLlm.chat(&[ChatMessage::user("hi")]).await.is_err());
    }

    #[test]
    fn messages_serialize_for_chat_endpoints() {
        let json = serde_json::to_value(ChatMessage::assistant("done")).unwrap();
        assert_eq!(json, serde_json::json!({ "role": "assistant", "content": "done" }));
    }

    #[test]
    fn transcript_ends_with_open_assistant_turn() {
        let text = render_transcript(&[
            ChatMessage::system("ctx"),
            ChatMessage::user("q1"),
            ChatMessage::assistant("a1"),
            ChatMessage::user("q2"),
        ]);
        assert_eq!(text, "system: ctx\n\nuser: q1\n\nassistant: a1\n\nuser: q2\n\nassistant:");
    }
}
