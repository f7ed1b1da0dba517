use std::time::Duration;

use bytes::{Buf, BufMut, BytesMut};

use crate::error::{FrameError, Result};
use crate::metadata::{Frame, FrameMetadata, HEADER_SIZE};

/// Sanity bound on width and height accepted from the wire.
pub const DEFAULT_MAX_DIMENSION: u32 = 10_000;

/// Default maximum payload size: a 10000x10000 frame with 4 channels.
pub const DEFAULT_MAX_PAYLOAD: usize = 10_000 * 10_000 * 4;

/// Configuration for the stream codec.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Largest width or height accepted in a received header. Default: 10000.
    pub max_dimension: u32,
    /// Maximum payload size in bytes. Default: 400 MB.
    pub max_payload_size: usize,
    /// Read timeout for blocking operations.
    pub read_timeout: Option<Duration>,
    /// Write timeout for blocking operations.
    pub write_timeout: Option<Duration>,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_dimension: DEFAULT_MAX_DIMENSION,
            max_payload_size: DEFAULT_MAX_PAYLOAD,
            read_timeout: None,
            write_timeout: None,
        }
    }
}

impl FrameConfig {
    /// Check a header against the sanity bounds and return its payload length.
    pub fn validate_header(&self, metadata: &FrameMetadata) -> Result<usize> {
        if metadata.has_zero_dimension() {
            return Err(FrameError::InvalidHeader {
                metadata: *metadata,
                reason: "zero dimension",
            });
        }
        if metadata.width > self.max_dimension || metadata.height > self.max_dimension {
            return Err(FrameError::InvalidHeader {
                metadata: *metadata,
                reason: "dimension above sanity bound",
            });
        }
        match metadata.payload_len() {
            Some(len) if len <= self.max_payload_size => Ok(len),
            _ => Err(FrameError::InvalidHeader {
                metadata: *metadata,
                reason: "payload above maximum size",
            }),
        }
    }
}

/// Encode the 12-byte shape header.
pub fn encode_header(metadata: &FrameMetadata) -> [u8; HEADER_SIZE] {
    metadata.to_le_bytes()
}

/// Decode the 12-byte shape header. Performs no validation.
pub fn decode_header(bytes: &[u8; HEADER_SIZE]) -> FrameMetadata {
    FrameMetadata::from_le_bytes(*bytes)
}

/// Encode a frame into the wire format.
///
/// Wire format:
/// ```text
/// ┌───────────┬───────────┬───────────┬──────────────────────────────┐
/// │ Width     │ Height    │ Channels  │ Pixels                       │
/// │ (4B LE)   │ (4B LE)   │ (4B LE)   │ (width*height*channels bytes)│
/// └───────────┴───────────┴───────────┴──────────────────────────────┘
/// ```
///
/// There is no magic, version, checksum, or trailing delimiter; the header is
/// the only framing.
pub fn encode_frame(frame: &Frame, dst: &mut BytesMut) {
    dst.reserve(frame.wire_size());
    dst.put_slice(&encode_header(frame.metadata()));
    dst.put_slice(frame.data());
}

/// Decode a frame from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete frame yet.
/// On success, consumes the frame bytes from the buffer. A header that fails
/// the sanity bounds is consumed and reported as
/// [`FrameError::InvalidHeader`]; its would-be payload is left untouched.
pub fn decode_frame(src: &mut BytesMut, config: &FrameConfig) -> Result<Option<Frame>> {
    if src.len() < HEADER_SIZE {
        return Ok(None); // Need more data
    }

    let mut header = [0u8; HEADER_SIZE];
    header.copy_from_slice(&src[..HEADER_SIZE]);
    let metadata = decode_header(&header);

    let payload_len = match config.validate_header(&metadata) {
        Ok(len) => len,
        Err(err) => {
            src.advance(HEADER_SIZE);
            return Err(err);
        }
    };

    let total = HEADER_SIZE + payload_len;
    if src.len() < total {
        src.reserve(total - src.len());
        return Ok(None); // Need more data
    }

    src.advance(HEADER_SIZE);
    let payload = src.split_to(payload_len).freeze();

    Frame::new(metadata, payload).map(Some)
}
