use std::fmt;

use bytes::Bytes;

use crate::error::{FrameError, Result};

/// Size of the shape header shared by every channel: width, height, channels.
pub const HEADER_SIZE: usize = 12;

/// Shape of one frame.
///
/// Pixel data is row-major with interleaved channels, one byte per sample,
/// so a frame occupies exactly `width * height * channels` bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FrameMetadata {
    pub width: u32,
    pub height: u32,
    pub channels: u32,
}

impl FrameMetadata {
    pub const fn new(width: u32, height: u32, channels: u32) -> Self {
        Self {
            width,
            height,
            channels,
        }
    }

    /// Number of payload bytes, or `None` if the product overflows `usize`.
    pub fn payload_len(&self) -> Option<usize> {
        (self.width as usize)
            .checked_mul(self.height as usize)?
            .checked_mul(self.channels as usize)
    }

    /// Array shape in `(height, width, channels)` order.
    pub fn shape(&self) -> (u32, u32, u32) {
        (self.height, self.width, self.channels)
    }

    /// True when any dimension is zero ("no frame written yet").
    pub fn has_zero_dimension(&self) -> bool {
        self.width == 0 || self.height == 0 || self.channels == 0
    }

    /// Little-endian `width | height | channels`.
    pub fn to_le_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[0..4].copy_from_slice(&self.width.to_le_bytes());
        out[4..8].copy_from_slice(&self.height.to_le_bytes());
        out[8..12].copy_from_slice(&self.channels.to_le_bytes());
        out
    }

    pub fn from_le_bytes(bytes: [u8; HEADER_SIZE]) -> Self {
        let word =
            |i: usize| u32::from_le_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]]);
        Self {
            width: word(0),
            height: word(4),
            channels: word(8),
        }
    }
}

impl fmt::Display for FrameMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}x{}", self.width, self.height, self.channels)
    }
}

/// Per-dimension maxima fixed when a channel is created.
///
/// Both processes learn these out-of-band (configuration); they size the
/// payload slot of a shared-memory channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameLimits {
    pub max_width: u32,
    pub max_height: u32,
    pub max_channels: u32,
}

impl FrameLimits {
    pub const fn new(max_width: u32, max_height: u32, max_channels: u32) -> Self {
        Self {
            max_width,
            max_height,
            max_channels,
        }
    }

    /// Payload capacity in bytes, or `None` if it overflows `usize`.
    pub fn capacity(&self) -> Option<usize> {
        FrameMetadata::new(self.max_width, self.max_height, self.max_channels).payload_len()
    }

    /// True when every dimension of `metadata` is within these maxima.
    pub fn allows(&self, metadata: &FrameMetadata) -> bool {
        metadata.width <= self.max_width
            && metadata.height <= self.max_height
            && metadata.channels <= self.max_channels
    }

    /// Reject frames larger than these maxima.
    pub fn check(&self, metadata: &FrameMetadata) -> Result<()> {
        if self.allows(metadata) {
            Ok(())
        } else {
            Err(FrameError::SizeExceeded {
                metadata: *metadata,
                limits: *self,
            })
        }
    }
}

impl fmt::Display for FrameLimits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{}x{}",
            self.max_width, self.max_height, self.max_channels
        )
    }
}

/// An owned frame: metadata plus exactly `payload_len()` pixel bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    metadata: FrameMetadata,
    data: Bytes,
}

impl Frame {
    /// Create a frame, checking that the buffer matches the shape.
    pub fn new(metadata: FrameMetadata, data: impl Into<Bytes>) -> Result<Self> {
        let data = data.into();
        if metadata.has_zero_dimension() {
            return Err(FrameError::InvalidHeader {
                metadata,
                reason: "zero dimension",
            });
        }
        let expected = metadata.payload_len().ok_or(FrameError::InvalidHeader {
            metadata,
            reason: "payload size overflows",
        })?;
        if data.len() != expected {
            return Err(FrameError::PayloadMismatch {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self { metadata, data })
    }

    /// A frame with every byte set to `value`.
    pub fn filled(metadata: FrameMetadata, value: u8) -> Result<Self> {
        let len = metadata.payload_len().ok_or(FrameError::InvalidHeader {
            metadata,
            reason: "payload size overflows",
        })?;
        Self::new(metadata, vec![value; len])
    }

    pub fn metadata(&self) -> &FrameMetadata {
        &self.metadata
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// The payload as a cheaply clonable buffer.
    pub fn bytes(&self) -> &Bytes {
        &self.data
    }

    /// Array shape in `(height, width, channels)` order.
    pub fn shape(&self) -> (u32, u32, u32) {
        self.metadata.shape()
    }

    /// The total wire size of this frame (header + payload).
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.data.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_bytes_are_little_endian() {
        let meta = FrameMetadata::new(3, 2, 1);
        assert_eq!(
            meta.to_le_bytes(),
            [3, 0, 0, 0, 2, 0, 0, 0, 1, 0, 0, 0]
        );
        assert_eq!(FrameMetadata::from_le_bytes(meta.to_le_bytes()), meta);
    }

    #[test]
    fn shape_is_height_major() {
        let meta = FrameMetadata::new(640, 480, 3);
        assert_eq!(meta.shape(), (480, 640, 3));
        assert_eq!(meta.payload_len(), Some(640 * 480 * 3));
        assert_eq!(meta.to_string(), "640x480x3");
    }

    #[test]
    fn limits_reject_any_oversized_dimension() {
        let limits = FrameLimits::new(4, 4, 3);
        assert_eq!(limits.capacity(), Some(48));
        assert!(limits.check(&FrameMetadata::new(4, 4, 3)).is_ok());
        assert!(limits.check(&FrameMetadata::new(2, 2, 3)).is_ok());

        for meta in [
            FrameMetadata::new(5, 4, 3),
            FrameMetadata::new(4, 5, 3),
            FrameMetadata::new(4, 4, 4),
        ] {
            let err = limits.check(&meta).unwrap_err();
            assert!(matches!(err, FrameError::SizeExceeded { .. }));
        }
    }

    #[test]
    fn frame_rejects_mismatched_payload() {
        let err = Frame::new(FrameMetadata::new(2, 2, 3), vec![0u8; 11]).unwrap_err();
        assert!(matches!(
            err,
            FrameError::PayloadMismatch {
                expected: 12,
                actual: 11
            }
        ));
    }

    #[test]
    fn frame_rejects_zero_dimension() {
        let err = Frame::new(FrameMetadata::new(0, 2, 3), Vec::<u8>::new()).unwrap_err();
        assert!(matches!(err, FrameError::InvalidHeader { .. }));
    }

    #[test]
    fn filled_frame() {
        let frame = Frame::filled(FrameMetadata::new(2, 2, 3), 255).unwrap();
        assert_eq!(frame.data().len(), 12);
        assert!(frame.data().iter().all(|&b| b == 255));
        assert_eq!(frame.wire_size(), HEADER_SIZE + 12);
    }
}
