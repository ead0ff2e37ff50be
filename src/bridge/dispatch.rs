//! Reply dispatch: formatting, destination and delivery semantics.
//!
//! - Direct replies go back to the sender, untagged, with an acknowledgment requested.
//! - Channel replies are broadcast on the packet's channel as `@Name, reply`, without ack.
//! - Both carry a trailing latency annotation, e.g. ` [1.2s]`.
//!
//! Sends are not retried. A transport failure is returned as [`BridgeError::SendFailed`].
use std::sync::Arc;

use async_trait::async_trait;
use log::debug;

use super::errors::BridgeError;
use super::{Destination, OutboundMessage};
use crate::logutil::escape_log;

/// Default cap on the full outbound text, in bytes.
pub const DEFAULT_MAX_TEXT_BYTES: usize = 200;

/// Outbound half of the radio link.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send_text(&self, message: &OutboundMessage) -> anyhow::Result<()>;
}

/// Truncate to at most `max_bytes` without splitting a character, marking the cut with `...`.
pub fn clamp_utf8(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_string();
    }
    let mut cut = max_bytes.saturating_sub(3);
    while cut > 0 && !s.is_char_boundary(cut) {
        cut -= 1;
    }
    let mut out = s[..cut].trim_end().to_string();
    out.push_str("...");
    out
}

pub struct Dispatcher {
    transport: Arc<dyn Transport>,
    /// Cap on the final text in bytes; 0 disables truncation.
    max_text_bytes: usize,
}

impl Dispatcher {
    pub fn new(transport: Arc<dyn Transport>, max_text_bytes: usize) -> Self {
        Self {
            transport,
            max_text_bytes,
        }
    }

    /// Build the outbound message without sending it.
    pub fn format_reply(
        &self,
        is_direct: bool,
        sender_display_name: &str,
        channel: u32,
        destination_identity: &str,
        reply_text: &str,
        elapsed_seconds: f64,
    ) -> OutboundMessage {
        let tag = if is_direct {
            String::new()
        } else {
            format!("@{}, ", sender_display_name)
        };
        let annotation = format!(" [{:.1}s]", elapsed_seconds);

        let body = if self.max_text_bytes == 0 {
            reply_text.to_string()
        } else {
            let budget = self
                .max_text_bytes
                .saturating_sub(tag.len() + annotation.len());
            clamp_utf8(reply_text, budget)
        };

        let (destination, want_ack) = if is_direct {
            (Destination::Node(destination_identity.to_string()), true)
        } else {
            (Destination::Broadcast, false)
        };

        OutboundMessage {
            text: format!("{}{}{}", tag, body, annotation),
            destination,
            channel,
            want_ack,
        }
    }

    /// Format and hand the reply to the transport. Returns what was sent.
    pub async fn dispatch(
        &self,
        is_direct: bool,
        sender_display_name: &str,
        channel: u32,
        destination_identity: &str,
        reply_text: &str,
        elapsed_seconds: f64,
    ) -> Result<OutboundMessage, BridgeError> {
        let outbound = self.format_reply(
            is_direct,
            sender_display_name,
            channel,
            destination_identity,
            reply_text,
            elapsed_seconds,
        );
        debug!(
            "dispatch to={} ch={} ack={} text='{}'",
            outbound.destination,
            outbound.channel,
            outbound.want_ack,
            escape_log(&outbound.text)
        );
        self.transport
            .send_text(&outbound)
            .await
            .map_err(|e| BridgeError::SendFailed {
                destination: outbound.destination.to_string(),
                reason: e.to_string(),
            })?;
        Ok(outbound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullTransport;

    #[async_trait]
    impl Transport for NullTransport {
        async fn send_text(&self, _message: &OutboundMessage) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn dispatcher(max: usize) -> Dispatcher {
        Dispatcher::new(Arc::new(NullTransport), max)
    }

    #[test]
    fn direct_reply_is_untagged_and_acked() {
        let out = dispatcher(DEFAULT_MAX_TEXT_BYTES).format_reply(true, "Caden", 0, "!00000001", "hi", 1.2);
        assert_eq!(out.text, "hi [1.2s]");
        assert_eq!(out.destination, Destination::Node("!00000001".into()));
        assert!(out.want_ack);
    }

    #[test]
    fn channel_reply_is_tagged_broadcast_without_ack() {
        let out = dispatcher(DEFAULT_MAX_TEXT_BYTES).format_reply(false, "Caden", 2, "!00000001", "hi", 0.3);
        assert_eq!(out.text, "@Caden, hi [0.3s]");
        assert_eq!(out.destination, Destination::Broadcast);
        assert_eq!(out.channel, 2);
        assert!(!out.want_ack);
    }

    #[test]
    fn elapsed_rounds_to_one_decimal() {
        let out = dispatcher(0).format_reply(true, "x", 0, "!1", "ok", 12.345);
        assert_eq!(out.text, "ok [12.3s]");
    }

    #[test]
    fn long_replies_are_clamped_but_keep_tag_and_annotation() {
        let reply = "é".repeat(150);
        let out = dispatcher(60).format_reply(false, "Caden", 0, "!1", &reply, 2.0);
        assert!(out.text.len() <= 60, "len {}", out.text.len());
        assert!(out.text.starts_with("@Caden, é"));
        assert!(out.text.ends_with("... [2.0s]"));
    }

    #[test]
    fn clamp_does_not_split_multibyte_chars() {
        assert_eq!(clamp_utf8("12345€7890", 10), "12345...");
        assert_eq!(clamp_utf8("hello", 10), "hello");
    }
}
