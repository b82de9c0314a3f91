//! Length-prefixed JSON frame codec.
//!
//! Frames are a 4-byte big-endian payload length followed by the JSON
//! encoding of one [`WireMessage`]. Partial frames stay buffered until the
//! remainder arrives; oversized frames are rejected before allocation.

// Layer 1: Standard library imports
// (none)

// Layer 2: Third-party crate imports
use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

// Layer 3: Internal module imports
use crate::error::ClusterError;
use crate::wire::WireMessage;

/// Codec for node-to-node links.
#[derive(Debug, Clone)]
pub struct WireCodec {
    max_frame: usize,
}

impl WireCodec {
    /// Codec enforcing the given maximum payload size.
    pub fn new(max_frame: usize) -> Self {
        Self { max_frame }
    }
}

impl Decoder for WireCodec {
    type Item = WireMessage;
    type Error = ClusterError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<WireMessage>, ClusterError> {
        if buf.len() < 4 {
            return Ok(None);
        }

        let mut length_bytes = [0u8; 4];
        length_bytes.copy_from_slice(&buf[..4]);
        let length = u32::from_be_bytes(length_bytes) as usize;
        if length > self.max_frame {
            return Err(ClusterError::FrameTooLarge {
                size: length,
                max: self.max_frame,
            });
        }

        if buf.len() < 4 + length {
            // Partial frame: wait for more bytes.
            buf.reserve(4 + length - buf.len());
            return Ok(None);
        }

        buf.advance(4);
        let payload = buf.split_to(length);
        let message = serde_json::from_slice(&payload)?;
        Ok(Some(message))
    }
}

impl Encoder<WireMessage> for WireCodec {
    type Error = ClusterError;

    fn encode(&mut self, message: WireMessage, buf: &mut BytesMut) -> Result<(), ClusterError> {
        let payload = serde_json::to_vec(&message)?;
        if payload.len() > self.max_frame {
            return Err(ClusterError::FrameTooLarge {
                size: payload.len(),
                max: self.max_frame,
            });
        }
        buf.reserve(4 + payload.len());
        buf.put_u32(payload.len() as u32);
        buf.extend_from_slice(&payload);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn sample() -> WireMessage {
        WireMessage::Cast {
            server_id: Uuid::new_v4(),
            msg: serde_json::json!({ "op": "tick" }),
        }
    }

    #[test]
    #[allow(clippy::expect_used)]
    fn test_encode_decode_round_trip() {
        let mut codec = WireCodec::new(1024 * 1024);
        let mut buf = BytesMut::new();

        codec.encode(sample(), &mut buf).expect("encode");
        let decoded = codec
            .decode(&mut buf)
            .expect("decode")
            .expect("complete frame");
        assert_eq!(decoded.kind(), "cast");
        assert!(buf.is_empty());
    }

    #[test]
    #[allow(clippy::expect_used)]
    fn test_partial_frames_are_buffered() {
        let mut codec = WireCodec::new(1024 * 1024);
        let mut full = BytesMut::new();
        codec.encode(sample(), &mut full).expect("encode");

        let mut buf = BytesMut::new();
        // Feed the frame three bytes at a time.
        while !full.is_empty() {
            let take = full.len().min(3);
            buf.extend_from_slice(&full.split_to(take));
            if full.is_empty() {
                break;
            }
            assert!(codec.decode(&mut buf).expect("decode").is_none());
        }
        assert!(codec.decode(&mut buf).expect("decode").is_some());
    }

    #[test]
    #[allow(clippy::expect_used)]
    fn test_multiple_frames_in_one_buffer() {
        let mut codec = WireCodec::new(1024 * 1024);
        let mut buf = BytesMut::new();
        codec.encode(sample(), &mut buf).expect("encode");
        codec.encode(sample(), &mut buf).expect("encode");

        assert!(codec.decode(&mut buf).expect("decode").is_some());
        assert!(codec.decode(&mut buf).expect("decode").is_some());
        assert!(codec.decode(&mut buf).expect("decode").is_none());
    }

    #[test]
    #[allow(clippy::expect_used)]
    fn test_oversized_frame_rejected_on_decode() {
        let mut codec = WireCodec::new(16);
        let mut buf = BytesMut::new();
        buf.put_u32(1024);
        buf.extend_from_slice(&[0u8; 8]);

        assert!(matches!(
            codec.decode(&mut buf),
            Err(ClusterError::FrameTooLarge { size: 1024, max: 16 })
        ));
    }

    #[test]
    fn test_oversized_frame_rejected_on_encode() {
        let mut codec = WireCodec::new(8);
        let mut buf = BytesMut::new();
        assert!(matches!(
            codec.encode(sample(), &mut buf),
            Err(ClusterError::FrameTooLarge { .. })
        ));
    }
}
