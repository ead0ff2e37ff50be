//! Reply pipeline: record the user turn, ask the backend, clean up and record the answer.
//!
//! The session lock is never held across the backend call. The user turn is appended and the
//! returned history becomes the request; the backend is awaited, and only then is the
//! assistant turn appended.
//! If a second message for the same conversation lands in between, its turns interleave
//! with ours; that is accepted.
//!
//! On failure the user turn stays in history. The caller logs the error and does not retry.
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::debug;
use regex::RegexBuilder;

use super::errors::BridgeError;
use super::inference::{ChatRequest, GenerationOptions, InferenceBackend};
use super::session::SessionStore;
use super::{ChatMessage, ConversationId};
use crate::config::InferenceConfig;

/// Fixed request parameters for every generation.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSettings {
    pub model: String,
    pub keep_alive: i64,
    pub options: GenerationOptions,
    /// Upper bound on one backend call; `None` waits indefinitely.
    pub timeout: Option<Duration>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            model: "llama3.2:1b".to_string(),
            keep_alive: -1,
            options: GenerationOptions::default(),
            timeout: None,
        }
    }
}

impl PipelineSettings {
    pub fn from_config(config: &InferenceConfig) -> Self {
        Self {
            model: config.model.clone(),
            keep_alive: config.keep_alive,
            options: config.generation_options(),
            timeout: config.timeout(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedReply {
    pub text: String,
    pub elapsed: Duration,
}

impl GeneratedReply {
    pub fn elapsed_seconds(&self) -> f64 {
        self.elapsed.as_secs_f64()
    }
}

/// Remove a leading `Name:` / `@Name,` / `name-` echo from a model reply.
///
/// Matching is case-insensitive and anchored at the very start; the result is trimmed.
pub fn strip_name_prefix(reply: &str, sender_display_name: &str) -> String {
    let pattern = format!(r"^@?{}[:,\-]?\s*", regex::escape(sender_display_name));
    match RegexBuilder::new(&pattern).case_insensitive(true).build() {
        Ok(re) => re.replace(reply, "").trim().to_string(),
        Err(e) => {
            debug!("name prefix pattern rejected ({}), leaving reply as-is", e);
            reply.trim().to_string()
        }
    }
}

pub struct ReplyPipeline {
    store: Arc<dyn SessionStore>,
    backend: Arc<dyn InferenceBackend>,
    settings: PipelineSettings,
}

impl ReplyPipeline {
    pub fn new(
        store: Arc<dyn SessionStore>,
        backend: Arc<dyn InferenceBackend>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            store,
            backend,
            settings,
        }
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub async fn generate(
        &self,
        conversation: &ConversationId,
        sender_display_name: &str,
        cleaned_text: &str,
    ) -> Result<GeneratedReply, BridgeError> {
        let user_turn = format!("{}: {}", sender_display_name, cleaned_text);
        let history = self.store.append(conversation, ChatMessage::user(user_turn));

        let request = ChatRequest {
            model: self.settings.model.clone(),
            messages: history,
            stream: false,
            keep_alive: self.settings.keep_alive,
            options: self.settings.options.clone(),
        };

        let failed = |reason: String| BridgeError::GenerationFailed {
            conversation: conversation.to_string(),
            reason,
        };

        let started = Instant::now();
        let raw = match self.settings.timeout {
            Some(limit) => tokio::time::timeout(limit, self.backend.chat(&request))
                .await
                .map_err(|_| failed(format!("backend timed out after {:.1}s", limit.as_secs_f64())))?,
            None => self.backend.chat(&request).await,
        }
        .map_err(|e| failed(e.to_string()))?;
        let elapsed = started.elapsed();

        // an empty reply after stripping is still a reply
        let text = strip_name_prefix(&raw, sender_display_name);

        self.store
            .append(conversation, ChatMessage::assistant(text.clone()));
        debug!(
            "{}: generated {} chars in {:.1}s",
            conversation,
            text.chars().count(),
            elapsed.as_secs_f64()
        );

        Ok(GeneratedReply { text, elapsed })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_colon_prefix() {
        assert_eq!(strip_name_prefix("Caden: hello there", "Caden"), "hello there");
    }

    #[test]
    fn strips_at_comma_prefix() {
        assert_eq!(strip_name_prefix("@Caden, hi", "Caden"), "hi");
    }

    #[test]
    fn strip_is_case_insensitive_and_anchored() {
        assert_eq!(strip_name_prefix("caden- sure thing", "Caden"), "sure thing");
        assert_eq!(
            strip_name_prefix("Hi Caden: how are you", "Caden"),
            "Hi Caden: how are you"
        );
    }

    #[test]
    fn no_prefix_leaves_text_unchanged() {
        assert_eq!(strip_name_prefix("The sun is a star.", "Caden"), "The sun is a star.");
    }

    #[test]
    fn names_with_regex_metacharacters_are_literal() {
        assert_eq!(strip_name_prefix("K7(x)+: ok", "K7(x)+"), "ok");
        assert_eq!(strip_name_prefix("K7xx: ok", "K7(x)+"), "K7xx: ok");
    }
}
