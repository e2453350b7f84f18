//! Frame Codec
//!
//! Encodes and decodes the fixed-layout wire frame:
//!
//! ```text
//! bytes[0:4)   u32  frame length = 12 + body length
//! bytes[4:8)   u32  command id
//! bytes[8:12)  u32  sequence
//! bytes[12:16) u32  body length
//! bytes[16:..) body (opaque application payload)
//! ```
//!
//! All fields are big-endian. `Frame::decode` operates on the bytes
//! *after* the length prefix; the prefix itself is consumed by the
//! receive loop, which is also the only place the configured maximum
//! frame size is enforced.

use anyhow::bail;
use bytes::{BufMut, Bytes, BytesMut};

use crate::Result;

/// Header size covered by the frame length field (command + sequence + body length).
pub const FRAME_HEADER_LEN: usize = 12;

/// Size of the leading frame length field.
pub const LENGTH_PREFIX_LEN: usize = 4;

/// A decoded frame: header fields plus an owned copy of the body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: u32,
    pub sequence: u32,
    pub body: Bytes,
}

/// Encode a complete wire frame including the length prefix.
///
/// Never fails and performs no size validation; oversize rejection is
/// the receiver's concern.
pub fn encode_frame(command: u32, sequence: u32, body: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(LENGTH_PREFIX_LEN + FRAME_HEADER_LEN + body.len());
    buf.put_u32((FRAME_HEADER_LEN + body.len()) as u32);
    buf.put_u32(command);
    buf.put_u32(sequence);
    buf.put_u32(body.len() as u32);
    buf.put_slice(body);
    buf.freeze()
}

impl Frame {
    /// Decode the header and body from a buffer holding exactly one
    /// frame (without the length prefix). Fails if the buffer is
    /// shorter than the fixed header.
    pub fn decode(buf: &[u8]) -> Result<Frame> {
        let (command, sequence, body_len) = decode_header(buf)?;
        Ok(Frame {
            command,
            sequence,
            body: Bytes::copy_from_slice(&buf[FRAME_HEADER_LEN..FRAME_HEADER_LEN + body_len]),
        })
    }
}

/// Parse the 12-byte header, checking that the declared body fits the buffer.
pub(crate) fn decode_header(buf: &[u8]) -> Result<(u32, u32, usize)> {
    if buf.len() < FRAME_HEADER_LEN {
        bail!(
            "frame too short: {} bytes, need at least {}",
            buf.len(),
            FRAME_HEADER_LEN
        );
    }

    let command = u32::from_be_bytes(buf[0..4].try_into().unwrap());
    let sequence = u32::from_be_bytes(buf[4..8].try_into().unwrap());
    let body_len = u32::from_be_bytes(buf[8..12].try_into().unwrap()) as usize;

    if buf.len() < FRAME_HEADER_LEN + body_len {
        bail!(
            "frame body truncated: declared {} bytes, {} available",
            body_len,
            buf.len() - FRAME_HEADER_LEN
        );
    }

    Ok((command, sequence, body_len))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let body = b"hello framelink";
        let encoded = encode_frame(42, 7, body);

        let frame = Frame::decode(&encoded[LENGTH_PREFIX_LEN..]).unwrap();
        assert_eq!(frame.command, 42);
        assert_eq!(frame.sequence, 7);
        assert_eq!(&frame.body[..], body);
    }

    #[test]
    fn test_round_trip_empty_body() {
        let encoded = encode_frame(1, 0, &[]);
        let frame = Frame::decode(&encoded[LENGTH_PREFIX_LEN..]).unwrap();
        assert_eq!(frame.command, 1);
        assert_eq!(frame.sequence, 0);
        assert!(frame.body.is_empty());
    }

    #[test]
    fn test_length_invariant() {
        for body_len in [0usize, 1, 17, 1024] {
            let body = vec![0xabu8; body_len];
            let encoded = encode_frame(9, 3, &body);

            let frame_len = u32::from_be_bytes(encoded[0..4].try_into().unwrap()) as usize;
            assert_eq!(frame_len, FRAME_HEADER_LEN + body_len);
            assert_eq!(encoded.len(), LENGTH_PREFIX_LEN + frame_len);
        }
    }

    #[test]
    fn test_decode_short_buffer() {
        assert!(Frame::decode(&[]).is_err());
        assert!(Frame::decode(&[0u8; 11]).is_err());
    }

    #[test]
    fn test_decode_truncated_body() {
        let mut encoded = encode_frame(5, 1, b"full body").to_vec();
        encoded.truncate(encoded.len() - 3);
        assert!(Frame::decode(&encoded[LENGTH_PREFIX_LEN..]).is_err());
    }
}
