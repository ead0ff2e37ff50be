use thiserror::Error;

/// Errors surfaced by one pass through the reply path.
///
/// None of these are fatal: the server logs them at the event boundary and moves on to the
/// next packet.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Non-text or undecodable payload. Dropped without a reply.
    #[error("malformed packet from {sender}: {reason}")]
    MalformedPacket { sender: String, reason: String },

    /// Backend error, timeout, or unusable output. The user turn stays in history.
    #[error("generation failed for {conversation}: {reason}")]
    GenerationFailed { conversation: String, reason: String },

    /// The transport rejected the outbound message. Not retried.
    #[error("send to {destination} failed: {reason}")]
    SendFailed { destination: String, reason: String },
}
