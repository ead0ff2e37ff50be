//! # Configuration Management Module
//!
//! Centralized configuration for the MeshGPT bridge: typed sections with serde, defaults for
//! every field, and validation on load.
//!
//! ## Configuration Structure
//!
//! - [`BotConfig`] - Assistant persona, trigger token, history and reply limits
//! - [`MeshtasticConfig`] - Radio connection (TCP stream API) and send pacing
//! - [`InferenceConfig`] - Ollama endpoint, model and generation parameters
//! - [`LoggingConfig`] - Log level and optional log file
//!
//! ## Usage
//!
//! ```rust,no_run
//! use meshgpt::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!     println!("Radio: {}:{}", config.meshtastic.host, config.meshtastic.port);
//!     println!("Model: {}", config.inference.model);
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration File Format
//!
//! ```toml
//! [bot]
//! name = "MeshGPT"
//! mention_token = "@meshgpt"
//! max_history_turns = 8
//!
//! [meshtastic]
//! host = "localhost"
//! port = 4404
//!
//! [inference]
//! base_url = "http://localhost:11434"
//! model = "llama3.2:1b"
//! temperature = 0.2
//! num_predict = 50
//!
//! [logging]
//! level = "info"
//! file = "meshgpt.log"
//! ```
//!
//! Sections and fields missing from the file take their defaults, so a config only needs
//! the values that differ.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::fs;

use crate::bridge::classifier::DEFAULT_MENTION_TOKEN;
use crate::bridge::dispatch::DEFAULT_MAX_TEXT_BYTES;
use crate::bridge::inference::GenerationOptions;
use crate::bridge::session::DEFAULT_MAX_TURNS;

const DEFAULT_SYSTEM_PROMPT: &str = "The current date is {date}. You are MeshGPT, an AI chatbot running on a Meshtastic mesh network serving the azmsh community in Arizona. Each message will begin with the user's username. Be concise, your replies must be less than 175 characters.";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub bot: BotConfig,
    #[serde(default)]
    pub meshtastic: MeshtasticConfig,
    #[serde(default)]
    pub inference: InferenceConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    pub name: String,
    /// System message for every conversation. `{date}` is replaced with the local date at
    /// startup.
    pub system_prompt: String,
    /// Channel messages containing this token (any case) get a reply.
    pub mention_token: String,
    /// Non-system turns kept per conversation.
    pub max_history_turns: usize,
    /// Cap on one outbound text in bytes (0 disables truncation).
    pub max_text_bytes: usize,
    /// 1 handles packets strictly in order; more allows that many replies in flight.
    pub max_concurrent_replies: usize,
    /// Interval for the periodic stats log line (0 disables it).
    pub stats_interval_seconds: u64,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            name: "MeshGPT".to_string(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            mention_token: DEFAULT_MENTION_TOKEN.to_string(),
            max_history_turns: DEFAULT_MAX_TURNS,
            max_text_bytes: DEFAULT_MAX_TEXT_BYTES,
            max_concurrent_replies: 1,
            stats_interval_seconds: 600,
        }
    }
}

impl BotConfig {
    /// System prompt with `{date}` filled in.
    pub fn render_system_prompt(&self, date: chrono::NaiveDate) -> String {
        self.system_prompt
            .replace("{date}", &date.format("%Y-%m-%d").to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshtasticConfig {
    /// Host running meshtasticd or a Wi-Fi node exposing the stream API.
    pub host: String,
    pub port: u16,
    /// Heartbeat interval; TCP nodes drop clients that stay silent.
    pub heartbeat_seconds: u64,
    /// Minimum gap between consecutive text sends (ms).
    pub min_send_gap_ms: u64,
    pub hop_limit: u32,
}

impl Default for MeshtasticConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 4404,
            heartbeat_seconds: 30,
            min_send_gap_ms: 2000,
            hop_limit: 3,
        }
    }
}

impl MeshtasticConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub num_predict: i32,
    pub top_p: f32,
    pub repeat_penalty: f32,
    pub num_ctx: u32,
    pub top_k: u32,
    /// Seconds the backend keeps the model loaded; negative keeps it resident.
    pub keep_alive: i64,
    /// Upper bound on one generation in seconds (0 = no limit).
    pub timeout_seconds: u64,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        let opts = GenerationOptions::default();
        Self {
            base_url: "http://localhost:11434".to_string(),
            model: "llama3.2:1b".to_string(),
            temperature: opts.temperature,
            num_predict: opts.num_predict,
            top_p: opts.top_p,
            repeat_penalty: opts.repeat_penalty,
            num_ctx: opts.num_ctx,
            top_k: opts.top_k,
            keep_alive: -1,
            timeout_seconds: 0,
        }
    }
}

impl InferenceConfig {
    pub fn generation_options(&self) -> GenerationOptions {
        GenerationOptions {
            temperature: self.temperature,
            num_predict: self.num_predict,
            top_p: self.top_p,
            repeat_penalty: self.repeat_penalty,
            num_ctx: self.num_ctx,
            top_k: self.top_k,
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        if self.timeout_seconds == 0 {
            None
        } else {
            Some(Duration::from_secs(self.timeout_seconds))
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: Some("meshgpt.log".to_string()),
        }
    }
}

impl LoggingConfig {
    pub fn level_filter(&self) -> log::LevelFilter {
        self.level.parse().unwrap_or(log::LevelFilter::Info)
    }
}

impl Config {
    /// Load configuration from a file
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;

        let config = Self::from_toml(&content)
            .map_err(|e| anyhow!("Invalid config file {}: {}", path, e))?;
        Ok(config)
    }

    /// Parse and validate configuration text.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(content).map_err(|e| anyhow!("parse error: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    /// Create a default configuration file
    pub async fn create_default(path: &str) -> Result<()> {
        let config = Config::default();
        let content = toml::to_string_pretty(&config)
            .map_err(|e| anyhow!("Failed to serialize default config: {}", e))?;

        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))?;

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.bot.mention_token.trim().is_empty() {
            return Err(anyhow!("bot.mention_token must not be empty"));
        }
        if self.bot.max_history_turns == 0 {
            return Err(anyhow!("bot.max_history_turns must be at least 1"));
        }
        if self.bot.max_concurrent_replies == 0 {
            return Err(anyhow!("bot.max_concurrent_replies must be at least 1"));
        }
        if self.meshtastic.host.trim().is_empty() {
            return Err(anyhow!("meshtastic.host must not be empty"));
        }
        if self.meshtastic.port == 0 {
            return Err(anyhow!("meshtastic.port must be non-zero"));
        }
        if !(0.0..=2.0).contains(&self.inference.temperature) {
            return Err(anyhow!(
                "inference.temperature must be within 0.0..=2.0 (got {})",
                self.inference.temperature
            ));
        }
        if self.inference.model.trim().is_empty() {
            return Err(anyhow!("inference.model must not be empty"));
        }
        if !self.inference.base_url.starts_with("http://")
            && !self.inference.base_url.starts_with("https://")
        {
            return Err(anyhow!(
                "inference.base_url must start with http:// or https:// (got {})",
                self.inference.base_url
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_generation_parameters() {
        let config = Config::default();
        assert_eq!(config.inference.model, "llama3.2:1b");
        assert_eq!(config.inference.num_predict, 50);
        assert_eq!(config.inference.num_ctx, 4096);
        assert_eq!(config.inference.top_k, 40);
        assert_eq!(config.inference.keep_alive, -1);
        assert_eq!(config.inference.timeout(), None);
        assert_eq!(config.meshtastic.port, 4404);
        assert_eq!(config.bot.max_history_turns, 8);
        assert_eq!(config.bot.mention_token, "@meshgpt");
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let config = Config::from_toml(
            r#"
            [meshtastic]
            host = "192.168.1.50"

            [inference]
            timeout_seconds = 45
            "#,
        )
        .unwrap();
        assert_eq!(config.meshtastic.host, "192.168.1.50");
        assert_eq!(config.meshtastic.port, 4404);
        assert_eq!(config.inference.timeout(), Some(Duration::from_secs(45)));
        assert_eq!(config.logging.file.as_deref(), Some("meshgpt.log"));
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(Config::from_toml("[bot]\nmax_history_turns = 0\n").is_err());
        assert!(Config::from_toml("[bot]\nmax_concurrent_replies = 0\n").is_err());
        assert!(Config::from_toml("[inference]\ntemperature = 3.5\n").is_err());
        assert!(Config::from_toml("[inference]\nbase_url = \"localhost\"\n").is_err());
        assert!(Config::from_toml("[meshtastic]\nport = 0\n").is_err());
    }

    #[test]
    fn default_config_round_trips_through_toml() {
        let text = toml::to_string_pretty(&Config::default()).unwrap();
        let parsed = Config::from_toml(&text).unwrap();
        assert_eq!(parsed.bot.system_prompt, Config::default().bot.system_prompt);
        assert_eq!(parsed.inference.model, "llama3.2:1b");
    }

    #[test]
    fn system_prompt_date_is_substituted() {
        let bot = BotConfig::default();
        let date = chrono::NaiveDate::from_ymd_opt(2026, 3, 14).unwrap();
        let prompt = bot.render_system_prompt(date);
        assert!(prompt.starts_with("The current date is 2026-03-14."));
        assert!(!prompt.contains("{date}"));
    }

    #[test]
    fn log_level_parses_with_fallback() {
        let mut logging = LoggingConfig::default();
        assert_eq!(logging.level_filter(), log::LevelFilter::Info);
        logging.level = "debug".into();
        assert_eq!(logging.level_filter(), log::LevelFilter::Debug);
        logging.level = "loud".into();
        assert_eq!(logging.level_filter(), log::LevelFilter::Info);
    }
}
