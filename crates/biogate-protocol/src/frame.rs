//! Frame layout and header encoding.

use biogate_core::constants::{FRAME_HEADER_LEN, FRAME_LENGTH_BIAS};
use biogate_core::{Error, Result};
use bytes::{Buf, BufMut, BytesMut};

/// One complete wire frame: header fields plus payload.
///
/// The header is always twelve bytes, little-endian. The `length` field on
/// the wire is `payload.len() + 8`; that bias is applied on encode and
/// stripped on decode, so this struct only ever holds the real payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZkFrame {
    pub command: u16,
    pub reply_id: u16,
    pub session_id: u32,
    pub payload: Vec<u8>,
}

impl ZkFrame {
    #[must_use]
    pub fn new(command: u16, reply_id: u16, session_id: u32, payload: Vec<u8>) -> Self {
        ZkFrame {
            command,
            reply_id,
            session_id,
            payload,
        }
    }

    /// Total size of this frame on the wire.
    #[must_use]
    pub fn wire_len(&self) -> usize {
        FRAME_HEADER_LEN + self.payload.len()
    }

    /// Append the encoded frame to `dst`.
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(self.wire_len());
        dst.put_u16_le(self.command);
        dst.put_u16_le(self.reply_id);
        dst.put_u32_le(self.session_id);
        dst.put_u32_le(self.payload.len() as u32 + FRAME_LENGTH_BIAS);
        dst.extend_from_slice(&self.payload);
    }

    /// Inspect `src` for a complete frame without consuming anything.
    ///
    /// Returns the total wire length of the frame at the front of the
    /// buffer, or `None` when more bytes are needed.
    ///
    /// # Errors
    /// Returns `Error::Protocol` when the length field is below the header
    /// bias, which no conforming panel ever produces.
    pub fn peek_len(src: &[u8]) -> Result<Option<usize>> {
        if src.len() < FRAME_HEADER_LEN {
            return Ok(None);
        }
        let length = u32::from_le_bytes([src[8], src[9], src[10], src[11]]);
        if length < FRAME_LENGTH_BIAS {
            return Err(Error::protocol(format!(
                "Frame length field {length} below minimum {FRAME_LENGTH_BIAS}"
            )));
        }
        let payload_len = (length - FRAME_LENGTH_BIAS) as usize;
        Ok(Some(FRAME_HEADER_LEN + payload_len))
    }

    /// Consume exactly one frame of `wire_len` bytes from `src`.
    ///
    /// Callers must have established via [`peek_len`](Self::peek_len) that
    /// the buffer holds at least `wire_len` bytes.
    pub fn parse(src: &mut BytesMut, wire_len: usize) -> Result<Self> {
        debug_assert!(src.len() >= wire_len, "parse called before frame complete");
        let mut header = src.split_to(FRAME_HEADER_LEN);
        let command = header.get_u16_le();
        let reply_id = header.get_u16_le();
        let session_id = header.get_u32_le();
        let _length = header.get_u32_le();
        let payload = src.split_to(wire_len - FRAME_HEADER_LEN).to_vec();
        Ok(ZkFrame {
            command,
            reply_id,
            session_id,
            payload,
        })
    }
}
