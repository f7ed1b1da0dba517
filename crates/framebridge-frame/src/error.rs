use crate::metadata::{FrameLimits, FrameMetadata};

/// Errors that can occur while building, encoding, or decoding frames.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The header describes a frame that can never be valid.
    #[error("invalid frame header {metadata}: {reason}")]
    InvalidHeader {
        metadata: FrameMetadata,
        reason: &'static str,
    },

    /// The frame does not fit the channel's configured maxima.
    #[error("frame {metadata} exceeds channel limits {limits}")]
    SizeExceeded {
        metadata: FrameMetadata,
        limits: FrameLimits,
    },

    /// The pixel buffer length does not match `width * height * channels`.
    #[error("payload is {actual} bytes, header describes {expected}")]
    PayloadMismatch { expected: usize, actual: usize },

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection was closed before a complete frame was received.
    #[error("connection closed (incomplete frame)")]
    ConnectionClosed,
}

pub type Result<T> = std::result::Result<T, FrameError>;
