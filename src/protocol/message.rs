//! Decoded Message
//!
//! The pooled, reusable form of a received frame. A `Message` is only
//! valid between being acquired from a session's message pool and being
//! released back; the body buffer is retained across reuses to avoid
//! per-frame allocation.

use crate::pool::Reusable;
use crate::protocol::frame::{decode_header, FRAME_HEADER_LEN};
use crate::Result;

/// Control tag for ordinary data messages.
pub const CTRL_MESSAGE: u8 = b'm';

/// A decoded frame backed by a reusable body buffer.
#[derive(Debug, Default)]
pub struct Message {
    pub ctrl: u8,
    pub command: u32,
    pub sequence: u32,
    pub body_len: u32,
    body: Vec<u8>,
}

impl Message {
    /// Decode one frame (without the length prefix) into this message,
    /// reusing the body buffer.
    pub fn decode_from(&mut self, buf: &[u8]) -> Result<()> {
        let (command, sequence, body_len) = decode_header(buf)?;

        self.ctrl = CTRL_MESSAGE;
        self.command = command;
        self.sequence = sequence;
        self.body_len = body_len as u32;
        self.body.clear();
        self.body
            .extend_from_slice(&buf[FRAME_HEADER_LEN..FRAME_HEADER_LEN + body_len]);
        Ok(())
    }

    /// The message body.
    pub fn body(&self) -> &[u8] {
        &self.body
    }
}

impl Reusable for Message {
    fn reset(&mut self) {
        self.ctrl = 0;
        self.command = 0;
        self.sequence = 0;
        self.body_len = 0;
        self.body.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::frame::{encode_frame, LENGTH_PREFIX_LEN};

    #[test]
    fn test_decode_into_message() {
        let encoded = encode_frame(11, 2, b"payload");

        let mut msg = Message::default();
        msg.decode_from(&encoded[LENGTH_PREFIX_LEN..]).unwrap();

        assert_eq!(msg.ctrl, CTRL_MESSAGE);
        assert_eq!(msg.command, 11);
        assert_eq!(msg.sequence, 2);
        assert_eq!(msg.body_len, 7);
        assert_eq!(msg.body(), b"payload");
    }

    #[test]
    fn test_reuse_clears_previous_body() {
        let mut msg = Message::default();

        let first = encode_frame(1, 1, b"a much longer first body");
        msg.decode_from(&first[LENGTH_PREFIX_LEN..]).unwrap();

        let second = encode_frame(2, 2, b"short");
        msg.decode_from(&second[LENGTH_PREFIX_LEN..]).unwrap();

        assert_eq!(msg.body(), b"short");
        assert_eq!(msg.body_len, 5);
    }
}
