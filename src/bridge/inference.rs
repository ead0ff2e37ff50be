//! Inference backend for generating replies.
//!
//! The reply pipeline only needs "messages in, text out", expressed by [`InferenceBackend`].
//! [`OllamaBackend`] implements it against a local Ollama server's `/api/chat` endpoint with
//! streaming disabled.

use async_trait::async_trait;
use log::{debug, trace};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::ChatMessage;
use crate::config::InferenceConfig;

/// Sampling and residency parameters sent with every request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationOptions {
    pub temperature: f32,
    /// Maximum tokens to generate (`num_predict`).
    pub num_predict: i32,
    pub top_p: f32,
    pub repeat_penalty: f32,
    /// Context window (`num_ctx`).
    pub num_ctx: u32,
    pub top_k: u32,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            temperature: 0.2,
            num_predict: 50,
            top_p: 0.9,
            repeat_penalty: 1.1,
            num_ctx: 4096,
            top_k: 40,
        }
    }
}

/// One chat completion request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub stream: bool,
    /// Seconds to keep the model loaded after the request; negative keeps it resident.
    pub keep_alive: i64,
    pub options: GenerationOptions,
}

#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("backend returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("backend response missing message content")]
    MissingContent,

    #[error("{0}")]
    Other(String),
}

/// Anything that can turn an ordered chat history into a reply.
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    async fn chat(&self, request: &ChatRequest) -> Result<String, InferenceError>;
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    message: Option<OllamaMessage>,
    #[serde(default)]
    total_duration: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct OllamaMessage {
    #[serde(default)]
    content: String,
}

/// Client for the Ollama `/api/chat` endpoint.
pub struct OllamaBackend {
    base_url: String,
    client: reqwest::Client,
}

impl OllamaBackend {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn from_config(config: &InferenceConfig) -> Self {
        Self::new(&config.base_url)
    }

    pub fn chat_url(&self) -> String {
        format!("{}/api/chat", self.base_url)
    }
}

#[async_trait]
impl InferenceBackend for OllamaBackend {
    async fn chat(&self, request: &ChatRequest) -> Result<String, InferenceError> {
        let url = self.chat_url();
        debug!(
            "POST {} model={} messages={}",
            url,
            request.model,
            request.messages.len()
        );

        let response = self.client.post(&url).json(request).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(InferenceError::Status {
                status: status.as_u16(),
                body: crate::logutil::truncate_for_log(&body, 200),
            });
        }

        let parsed: OllamaChatResponse = response.json().await?;
        if let Some(ns) = parsed.total_duration {
            trace!("Ollama reported total_duration={}ms", ns / 1_000_000);
        }
        parsed
            .message
            .map(|m| m.content)
            .ok_or(InferenceError::MissingContent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_serializes_to_ollama_shape() {
        let req = ChatRequest {
            model: "llama3.2:1b".into(),
            messages: vec![ChatMessage::system("s"), ChatMessage::user("Caden: hi")],
            stream: false,
            keep_alive: -1,
            options: GenerationOptions::default(),
        };
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(v["model"], "llama3.2:1b");
        assert_eq!(v["stream"], false);
        assert_eq!(v["keep_alive"], -1);
        assert_eq!(v["messages"][1]["role"], "user");
        assert_eq!(v["messages"][1]["content"], "Caden: hi");
        assert_eq!(v["options"]["num_predict"], 50);
        assert_eq!(v["options"]["num_ctx"], 4096);
        assert_eq!(v["options"]["top_k"], 40);
    }

    #[test]
    fn response_parsing_tolerates_extra_fields() {
        let body = r#"{"model":"m","created_at":"x","message":{"role":"assistant","content":"hello"},"done":true,"total_duration":123}"#;
        let parsed: OllamaChatResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.message.unwrap().content, "hello");
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let b = OllamaBackend::new("http://localhost:11434/");
        assert_eq!(b.chat_url(), "http://localhost:11434/api/chat");
    }
}
