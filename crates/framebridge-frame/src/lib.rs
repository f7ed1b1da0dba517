//! Frame metadata and the stream wire format shared by every frame channel.
//!
//! A frame is a 12-byte little-endian header (width, height, channels)
//! followed by exactly `width * height * channels` pixel bytes. The stream
//! codec adds nothing else: no magic, no version, no checksum.

pub mod codec;
pub mod error;
pub mod metadata;
pub mod reader;
pub mod writer;

#[cfg(feature = "async")]
pub mod async_codec;

#[cfg(feature = "async")]
pub use async_codec::FrameCodec;
pub use codec::{
    decode_frame, decode_header, encode_frame, encode_header, FrameConfig, DEFAULT_MAX_DIMENSION,
    DEFAULT_MAX_PAYLOAD,
};
pub use error::{FrameError, Result};
pub use metadata::{Frame, FrameLimits, FrameMetadata, HEADER_SIZE};
pub use reader::FrameReader;
pub use writer::FrameWriter;
