//! Wire Protocol
//!
//! Length-prefixed binary framing. Every wire unit is a 4-byte frame
//! length followed by a 12-byte header (command, sequence, body length)
//! and an opaque body.

pub mod frame;
pub mod message;

pub use frame::{encode_frame, Frame, FRAME_HEADER_LEN, LENGTH_PREFIX_LEN};
pub use message::Message;
