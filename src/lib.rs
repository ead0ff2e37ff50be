//! # MeshGPT - LLM Assistant for Meshtastic Networks
//!
//! MeshGPT listens on a Meshtastic mesh for text packets addressed to it, either as a direct
//! message or as a channel message containing its mention token, and answers them with a
//! locally hosted language model served by Ollama.
//!
//! ## Features
//!
//! - **Mention & DM routing**: Channel packets containing `@meshgpt` (any case) and DMs to our
//!   node get a reply; everything else is ignored.
//! - **Per-conversation memory**: Each DM sender and each channel keeps a short rolling history
//!   (system prompt plus the last 8 turns).
//! - **Mesh-friendly replies**: Channel replies are tagged `@Name, `, DMs are sent reliably,
//!   every reply carries its generation time and is capped to fit a mesh packet.
//! - **Resilient loop**: A failing generation or send is logged and never stops the bridge.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use meshgpt::bridge::{BridgeServer, OllamaBackend};
//! use meshgpt::config::Config;
//! use meshgpt::meshtastic;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!     let mut link = meshtastic::connect(&config.meshtastic).await?;
//!     let server = BridgeServer::from_config(
//!         &config,
//!         Arc::new(OllamaBackend::from_config(&config.inference)),
//!         link.writer.clone(),
//!         link.nodes.clone(),
//!         link.identity.clone(),
//!     )?;
//!     server.run(&mut link.events).await?;
//!     link.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`bridge`] - Classification, sessions, reply pipeline, dispatch and the event loop
//! - [`meshtastic`] - TCP stream API link to the radio
//! - [`config`] - Configuration management and validation
//! - [`protobuf`] - Meshtastic protobuf messages
//! - [`metrics`] - Process-wide counters
//! - [`logutil`] - Single-line log sanitising
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │   Meshtastic    │ ← Radio link (reader / writer / heartbeat)
//! └─────────────────┘
//!      │       ▲
//!   events   Transport
//!      ▼       │
//! ┌─────────────────┐
//! │     Bridge      │ ← Classifier → SessionStore → InferenceBackend → Dispatcher
//! └─────────────────┘
//!          │
//! ┌─────────────────┐
//! │     Ollama      │ ← /api/chat
//! └─────────────────┘
//! ```

pub mod bridge;
pub mod config;
pub mod logutil;
pub mod meshtastic;
pub mod metrics;
pub mod protobuf;
