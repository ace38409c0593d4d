//! Tokio codec for panel frame framing.
//!
//! `ZkCodec` implements [`Decoder`] and [`Encoder`] so a device session can
//! wrap its TCP stream in `Framed<TcpStream, ZkCodec>` and exchange
//! [`ZkFrame`] values instead of raw bytes. The header's length field makes
//! the dialect self-delimiting, so decoding is a single length check plus a
//! buffer split with no scanning.
//!
//! Frames whose length field exceeds the configured maximum are rejected
//! before any allocation, bounding memory a misbehaving peer can force.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use crate::frame::ZkFrame;
use biogate_core::constants::MAX_FRAME_SIZE;
use biogate_core::{Error, Result};

/// Length-delimited codec for the panel dialect.
#[derive(Debug)]
pub struct ZkCodec {
    max_frame_size: usize,
}

impl ZkCodec {
    #[must_use]
    pub fn new() -> Self {
        ZkCodec {
            max_frame_size: MAX_FRAME_SIZE,
        }
    }

    /// Codec with a custom frame size ceiling.
    #[must_use]
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        ZkCodec { max_frame_size }
    }

    #[must_use]
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }
}

impl Default for ZkCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for ZkCodec {
    type Item = ZkFrame;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        let Some(wire_len) = ZkFrame::peek_len(src)? else {
            return Ok(None);
        };

        if wire_len > self.max_frame_size {
            return Err(Error::FrameTooLarge {
                size: wire_len,
                max_size: self.max_frame_size,
            });
        }

        if src.len() < wire_len {
            // Header is in; wait for the rest of the payload.
            src.reserve(wire_len - src.len());
            return Ok(None);
        }

        ZkFrame::parse(src, wire_len).map(Some)
    }
}

impl Encoder<ZkFrame> for ZkCodec {
    type Error = Error;

    fn encode(&mut self, item: ZkFrame, dst: &mut BytesMut) -> Result<()> {
        if item.wire_len() > self.max_frame_size {
            return Err(Error::FrameTooLarge {
                size: item.wire_len(),
                max_size: self.max_frame_size,
            });
        }
        item.encode(dst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded(frame: &ZkFrame) -> BytesMut {
        let mut buf = BytesMut::new();
        frame.encode(&mut buf);
        buf
    }

    #[test]
    fn test_decode_complete_frame() {
        let mut codec = ZkCodec::new();
        let mut buf = encoded(&ZkFrame::new(1000, 0, 0, vec![]));

        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.command, 1000);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_partial_then_complete() {
        let mut codec = ZkCodec::new();
        let full = encoded(&ZkFrame::new(10, 1, 7, vec![0xAA; 16]));

        let mut buf = BytesMut::from(&full[..5]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&full[5..20]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&full[20..]);
        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.payload.len(), 16);
    }

    #[test]
    fn test_decode_pipelined_frames() {
        let mut codec = ZkCodec::new();
        let mut buf = encoded(&ZkFrame::new(501, 0, 7, vec![1, 0, 0, 0]));
        buf.extend_from_slice(&encoded(&ZkFrame::new(500, 0, 7, vec![])));

        assert_eq!(codec.decode(&mut buf).unwrap().unwrap().command, 501);
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap().command, 500);
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_decode_oversized_frame_rejected() {
        let mut codec = ZkCodec::with_max_frame_size(32);
        let mut buf = encoded(&ZkFrame::new(8, 0, 0, vec![0u8; 64]));

        let result = codec.decode(&mut buf);
        assert!(matches!(result, Err(Error::FrameTooLarge { .. })));
    }

    #[test]
    fn test_encode_oversized_frame_rejected() {
        let mut codec = ZkCodec::with_max_frame_size(32);
        let mut buf = BytesMut::new();

        let result = codec.encode(ZkFrame::new(8, 0, 0, vec![0u8; 64]), &mut buf);
        assert!(matches!(result, Err(Error::FrameTooLarge { .. })));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_roundtrip() {
        let mut codec = ZkCodec::new();
        let original = ZkFrame::new(11, 42, 0xDEADBEEF, vec![9, 8, 7]);

        let mut buf = BytesMut::new();
        codec.encode(original.clone(), &mut buf).unwrap();
        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, original);
    }
}
