//! Stream framer for the Meshtastic client API (TCP and serial "protobuf mode").
//!
//! Every `ToRadio` / `FromRadio` message on the byte stream is wrapped as:
//!
//!   `0x94 0xC3 <len_hi> <len_lo> <protobuf bytes>`
//!
//! Radios interleave plain-text debug output with frames, so the framer is fed arbitrary
//! chunks, skips anything before a header and yields whole frames once they are complete.
//! A header announcing zero bytes or more than [`MAX_FRAME_SIZE`] is treated as noise: one
//! byte is dropped and the search restarts.
use anyhow::{anyhow, Result};
use bytes::{Buf, BytesMut};

pub const START1: u8 = 0x94;
pub const START2: u8 = 0xC3;
const HEADER_LEN: usize = 4;

/// Largest protobuf payload the firmware emits on the stream API.
pub const MAX_FRAME_SIZE: usize = 512;

pub struct StreamFramer {
    buf: BytesMut,
}

impl Default for StreamFramer {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamFramer {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(2048),
        }
    }

    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Bytes buffered but not yet returned as a frame.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Next complete frame payload, or `None` until more bytes arrive.
    pub fn next_frame(&mut self) -> Option<Vec<u8>> {
        loop {
            // realign on START1, keeping a lone trailing 0x94 for the next push
            match self.buf.iter().position(|&b| b == START1) {
                Some(pos) => self.buf.advance(pos),
                None => {
                    self.buf.clear();
                    return None;
                }
            }
            if self.buf.len() < 2 {
                return None;
            }
            if self.buf[1] != START2 {
                self.buf.advance(1);
                continue;
            }
            if self.buf.len() < HEADER_LEN {
                return None;
            }

            let declared = ((self.buf[2] as usize) << 8) | (self.buf[3] as usize);
            if declared == 0 || declared > MAX_FRAME_SIZE {
                self.buf.advance(1);
                continue;
            }
            if self.buf.len() < HEADER_LEN + declared {
                return None;
            }

            self.buf.advance(HEADER_LEN);
            return Some(self.buf.split_to(declared).to_vec());
        }
    }
}

/// Wrap an encoded protobuf message in the stream header.
pub fn encode_frame(payload: &[u8]) -> Result<Vec<u8>> {
    if payload.is_empty() || payload.len() > MAX_FRAME_SIZE {
        return Err(anyhow!(
            "frame payload of {} bytes outside 1..={}",
            payload.len(),
            MAX_FRAME_SIZE
        ));
    }
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.push(START1);
    out.push(START2);
    out.push(((payload.len() >> 8) & 0xFF) as u8);
    out.push((payload.len() & 0xFF) as u8);
    out.extend_from_slice(payload);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yields_frame_after_noise() {
        let mut f = StreamFramer::new();
        f.push(b"INFO | boot ok\r\n");
        f.push(&[0x94, 0xC3, 0x00, 0x03, 1, 2, 3]);
        assert_eq!(f.next_frame(), Some(vec![1, 2, 3]));
        assert_eq!(f.next_frame(), None);
        assert_eq!(f.pending(), 0);
    }

    #[test]
    fn handles_split_header_and_body() {
        let mut f = StreamFramer::new();
        f.push(&[0x94]);
        assert_eq!(f.next_frame(), None);
        f.push(&[0xC3, 0x00]);
        assert_eq!(f.next_frame(), None);
        f.push(&[0x02, 0xAA]);
        assert_eq!(f.next_frame(), None);
        f.push(&[0xBB, 0x94, 0xC3, 0x00, 0x01, 0xCC]);
        assert_eq!(f.next_frame(), Some(vec![0xAA, 0xBB]));
        assert_eq!(f.next_frame(), Some(vec![0xCC]));
    }

    #[test]
    fn oversize_and_empty_headers_are_skipped() {
        let mut f = StreamFramer::new();
        // 0x0300 = 768 bytes > MAX_FRAME_SIZE
        f.push(&[0x94, 0xC3, 0x03, 0x00]);
        f.push(&[0x94, 0xC3, 0x00, 0x00]);
        f.push(&[0x94, 0xC3, 0x00, 0x01, 0x42]);
        assert_eq!(f.next_frame(), Some(vec![0x42]));
    }

    #[test]
    fn encode_prefixes_header() {
        let frame = encode_frame(&[9, 8, 7]).unwrap();
        assert_eq!(frame, vec![0x94, 0xC3, 0x00, 0x03, 9, 8, 7]);
        assert!(encode_frame(&[]).is_err());
        assert!(encode_frame(&vec![0u8; MAX_FRAME_SIZE + 1]).is_err());
    }
}
