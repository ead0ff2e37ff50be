//! Packet classification: is this packet for us, and which conversation does it belong to?
//!
//! A packet qualifies when it is a decoded text packet that is either addressed to our node
//! (a DM) or mentions the trigger token anywhere in its text (a channel mention). Our own
//! packets never qualify. Classification is a pure function of the packet, our identity and
//! the node directory snapshot.
use regex::{Regex, RegexBuilder};

use super::{ConversationId, InboundEvent, NodeDirectory, PortKind};

/// Default trigger token for channel mentions.
pub const DEFAULT_MENTION_TOKEN: &str = "@meshgpt";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    NotText,
    Undecodable,
    NotAddressed,
    OwnPacket,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptedPacket {
    pub conversation_id: ConversationId,
    pub sender: String,
    pub sender_display_name: String,
    pub cleaned_text: String,
    pub is_direct: bool,
    pub channel: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Ignore(IgnoreReason),
    Accept(AcceptedPacket),
}

/// Classifier for one mention token. Our own identity is passed per call because the radio
/// only reports it after the link is up.
#[derive(Debug, Clone)]
pub struct Classifier {
    mention_lower: String,
    mention_re: Regex,
}

impl Classifier {
    pub fn new(mention_token: &str) -> Result<Self, regex::Error> {
        let mention_re = RegexBuilder::new(&regex::escape(mention_token))
            .case_insensitive(true)
            .build()?;
        Ok(Self {
            mention_lower: mention_token.to_lowercase(),
            mention_re,
        })
    }

    pub fn mention_token(&self) -> &str {
        &self.mention_lower
    }

    pub fn classify<D>(&self, event: &InboundEvent, own_identity: &str, directory: &D) -> Classification
    where
        D: NodeDirectory + ?Sized,
    {
        if !event.decoded {
            return Classification::Ignore(IgnoreReason::Undecodable);
        }
        if event.port != PortKind::Text {
            return Classification::Ignore(IgnoreReason::NotText);
        }
        let text = match std::str::from_utf8(&event.payload) {
            Ok(t) => t,
            Err(_) => return Classification::Ignore(IgnoreReason::Undecodable),
        };

        let is_direct = !own_identity.is_empty() && event.target.eq_ignore_ascii_case(own_identity);
        let is_mentioned = text.to_lowercase().contains(&self.mention_lower);
        if !(is_direct || is_mentioned) {
            return Classification::Ignore(IgnoreReason::NotAddressed);
        }
        if event.sender.eq_ignore_ascii_case(own_identity) {
            return Classification::Ignore(IgnoreReason::OwnPacket);
        }

        let conversation_id = if is_direct {
            ConversationId::direct(&event.sender)
        } else {
            ConversationId::channel(event.channel)
        };

        Classification::Accept(AcceptedPacket {
            conversation_id,
            sender: event.sender.clone(),
            sender_display_name: directory.display_name(&event.sender),
            cleaned_text: self.strip_mentions(text),
            is_direct,
            channel: event.channel,
        })
    }

    /// Remove every occurrence of the mention token (any case), then trim.
    pub fn strip_mentions(&self, text: &str) -> String {
        self.mention_re.replace_all(text, "").trim().to_string()
    }
}
