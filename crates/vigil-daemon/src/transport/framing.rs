//! Length-prefixed frame codec for the agent transport.
//!
//! Each frame consists of:
//!
//! ```text
//! +------------------------+----------------------+---------+----------+
//! | Length (4 bytes, BE)   | Type len (2 bytes)   | Type    | Payload  |
//! +------------------------+----------------------+---------+----------+
//! ```
//!
//! The outer length covers everything after itself. The codec enforces
//! bounded reads: the length is validated before any allocation, and
//! oversized frames are rejected with
//! [`TransportError::FrameTooLarge`].

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::{TransportError, TransportMessage, TransportResult};

/// Maximum frame size accepted on the agent transport (4 MiB).
pub const MAX_FRAME_SIZE: usize = 4 * 1024 * 1024;

/// Length of the outer frame header.
const HEADER_LEN: usize = 4;

/// Length of the inner type-length field.
const TYPE_LEN_FIELD: usize = 2;

/// Frame codec for [`TransportMessage`] values, usable with
/// [`tokio_util::codec::Framed`].
#[derive(Debug, Clone)]
pub struct MessageCodec {
    max_frame_size: usize,
}

impl MessageCodec {
    /// Creates a codec with the default frame size limit.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            max_frame_size: MAX_FRAME_SIZE,
        }
    }

    /// Creates a codec with a custom frame size limit, capped at
    /// [`MAX_FRAME_SIZE`].
    #[must_use]
    pub fn with_max_size(max_size: usize) -> Self {
        Self {
            max_frame_size: max_size.min(MAX_FRAME_SIZE),
        }
    }
}

impl Default for MessageCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for MessageCodec {
    type Item = TransportMessage;
    type Error = TransportError;

    fn decode(&mut self, src: &mut BytesMut) -> TransportResult<Option<TransportMessage>> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        // Read the length prefix without consuming it, and validate
        // before reserving anything.
        let length = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
        if length > self.max_frame_size {
            return Err(TransportError::FrameTooLarge {
                size: length,
                max: self.max_frame_size,
            });
        }
        if length < TYPE_LEN_FIELD {
            return Err(TransportError::InvalidFrame(format!(
                "frame of {length} bytes cannot hold a type length"
            )));
        }

        let total_len = HEADER_LEN + length;
        if src.len() < total_len {
            src.reserve(total_len - src.len());
            return Ok(None);
        }

        src.advance(HEADER_LEN);
        let mut frame = src.split_to(length);

        let type_len = frame.get_u16() as usize;
        if type_len > frame.len() {
            return Err(TransportError::InvalidFrame(format!(
                "type length {type_len} exceeds frame body of {} bytes",
                frame.len()
            )));
        }
        let type_bytes = frame.split_to(type_len);
        let message_type = std::str::from_utf8(&type_bytes)
            .map_err(|e| TransportError::InvalidFrame(format!("message type is not UTF-8: {e}")))?
            .to_string();

        Ok(Some(TransportMessage {
            message_type,
            payload: frame.freeze(),
        }))
    }
}

impl Encoder<TransportMessage> for MessageCodec {
    type Error = TransportError;

    fn encode(&mut self, item: TransportMessage, dst: &mut BytesMut) -> TransportResult<()> {
        let type_len = item.message_type.len();
        if type_len > usize::from(u16::MAX) {
            return Err(TransportError::InvalidFrame(format!(
                "message type of {type_len} bytes exceeds the type-length field"
            )));
        }
        let length = TYPE_LEN_FIELD + type_len + item.payload.len();
        if length > self.max_frame_size {
            return Err(TransportError::FrameTooLarge {
                size: length,
                max: self.max_frame_size,
            });
        }

        dst.reserve(HEADER_LEN + length);
        #[allow(clippy::cast_possible_truncation)] // validated above
        dst.put_u32(length as u32);
        #[allow(clippy::cast_possible_truncation)] // validated above
        dst.put_u16(type_len as u16);
        dst.extend_from_slice(item.message_type.as_bytes());
        dst.extend_from_slice(&item.payload);
        Ok(())
    }
}
