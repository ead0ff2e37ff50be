//! # Bridge Core Module
//!
//! Conversation routing and session state for the assistant. Everything between "a text
//! packet arrived" and "hand this string to the radio" lives here; the radio link and the
//! inference backend are reached only through the [`Transport`](dispatch::Transport) and
//! [`InferenceBackend`](inference::InferenceBackend) traits.
//!
//! ## Components
//!
//! - [`classifier`] - decides whether a packet is addressed to the assistant
//! - [`session`] - bounded per-conversation history with per-key locking
//! - [`pipeline`] - user turn → backend call → reply cleanup → assistant turn
//! - [`dispatch`] - reply formatting, destination and acknowledgment selection
//! - [`inference`] - backend trait, generation options and the Ollama client
//! - [`server`] - event loop composing the above with an error boundary per event
//!
//! ## Flow
//!
//! ```text
//! InboundEvent ─▶ Classifier ─▶ (Ignore | Accept)
//!                                   │
//!                     SessionStore ◀┤ append user turn, trim
//!                                   │
//!                  InferenceBackend ◀┤ snapshot → chat
//!                                   │
//!                     SessionStore ◀┤ append cleaned assistant turn
//!                                   │
//!                        Dispatcher ─▶ Transport::send_text
//! ```

pub mod classifier;
pub mod dispatch;
pub mod errors;
pub mod inference;
pub mod pipeline;
pub mod server;
pub mod session;

pub use classifier::{AcceptedPacket, Classification, Classifier, IgnoreReason};
pub use dispatch::{Dispatcher, Transport};
pub use errors::BridgeError;
pub use inference::{GenerationOptions, InferenceBackend, OllamaBackend};
pub use pipeline::{GeneratedReply, ReplyPipeline};
pub use server::{BridgeServer, EventSource};
pub use session::{InMemorySessionStore, SessionStore};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Node number the Meshtastic firmware uses for "everyone".
pub const BROADCAST_NUM: u32 = 0xffff_ffff;

/// Identity string the transport uses for broadcast destinations.
pub const BROADCAST_ID: &str = "^all";

/// Render a node number the way Meshtastic clients print node ids (`!a1b2c3d4`).
pub fn node_id_string(num: u32) -> String {
    format!("!{:08x}", num)
}

/// Parse `!a1b2c3d4`, `0xa1b2c3d4` or a plain decimal node number.
pub fn parse_node_id(id: &str) -> Option<u32> {
    let id = id.trim();
    if id.eq_ignore_ascii_case(BROADCAST_ID) {
        return Some(BROADCAST_NUM);
    }
    if let Some(hex) = id.strip_prefix('!') {
        return u32::from_str_radix(hex, 16).ok();
    }
    if let Some(hex) = id.strip_prefix("0x").or_else(|| id.strip_prefix("0X")) {
        return u32::from_str_radix(hex, 16).ok();
    }
    id.parse().ok()
}

/// Key of one logical conversation: a single direct sender or a whole channel.
///
/// The two shapes render with disjoint prefixes (`dm_` / `chan_`) so a sender's DMs never
/// share history with the channel they also talk on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ConversationId {
    Direct(String),
    Channel(u32),
}

impl ConversationId {
    pub fn direct(sender: &str) -> Self {
        ConversationId::Direct(sender.to_string())
    }

    pub fn channel(index: u32) -> Self {
        ConversationId::Channel(index)
    }

    pub fn is_direct(&self) -> bool {
        matches!(self, ConversationId::Direct(_))
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConversationId::Direct(sender) => write!(f, "dm_{}", sender),
            ConversationId::Channel(index) => write!(f, "chan_{}", index),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One role-tagged chat turn. Serializes to the `{role, content}` shape chat backends expect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

/// Application port a packet was received on, as far as the bridge cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortKind {
    Text,
    Other(i32),
}

/// A decoded packet handed over by the transport.
#[derive(Debug, Clone)]
pub struct InboundEvent {
    /// False when the radio could not decrypt/decode the packet.
    pub decoded: bool,
    pub port: PortKind,
    pub sender: String,
    pub target: String,
    pub channel: u32,
    pub payload: Vec<u8>,
}

impl InboundEvent {
    /// Convenience constructor for a decoded text packet.
    pub fn text(sender: &str, target: &str, channel: u32, text: &str) -> Self {
        Self {
            decoded: true,
            port: PortKind::Text,
            sender: sender.to_string(),
            target: target.to_string(),
            channel,
            payload: text.as_bytes().to_vec(),
        }
    }
}

/// Names a node advertises about itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeNames {
    pub short_name: String,
    pub long_name: String,
}

impl NodeNames {
    pub fn new(short_name: &str, long_name: &str) -> Self {
        Self {
            short_name: short_name.to_string(),
            long_name: long_name.to_string(),
        }
    }

    /// Short name preferred, long name as fallback; blank names count as missing.
    pub fn display_name(&self) -> Option<&str> {
        let short = self.short_name.trim();
        if !short.is_empty() {
            return Some(short);
        }
        let long = self.long_name.trim();
        if !long.is_empty() {
            return Some(long);
        }
        None
    }
}

/// Read access to the node directory, keyed by node identity string.
pub trait NodeDirectory {
    fn lookup(&self, identity: &str) -> Option<NodeNames>;

    /// Display name for `identity`, falling back to the identity itself.
    fn display_name(&self, identity: &str) -> String {
        self.lookup(identity)
            .and_then(|names| names.display_name().map(str::to_string))
            .unwrap_or_else(|| identity.to_string())
    }
}

impl NodeDirectory for HashMap<String, NodeNames> {
    fn lookup(&self, identity: &str) -> Option<NodeNames> {
        self.get(identity).cloned()
    }
}

/// Where an outbound message goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    Node(String),
    Broadcast,
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Destination::Node(id) => write!(f, "{}", id),
            Destination::Broadcast => write!(f, "{}", BROADCAST_ID),
        }
    }
}

/// Final text plus delivery semantics, ready for the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub text: String,
    pub destination: Destination,
    pub channel: u32,
    pub want_ack: bool,
}
