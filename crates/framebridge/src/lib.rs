//! Single-slot frame transport between a capture process and an inference
//! process.
//!
//! A producer publishes the most recent frame; a consumer picks up whatever
//! is newest when it is ready. Three interchangeable channels carry frames:
//! a CPU shared-memory slot, a GPU handle slot with host fallback, and a
//! TCP stream.
//!
//! # Crate Structure
//!
//! - [`transport`]: TCP endpoints and the bounded retry policy
//! - [`frame`]: Frame metadata, the 12-byte header codec, blocking reader/writer
//! - [`shm`]: Shared-memory channels (unix only for the channel types)
//! - [`stream`]: Socket frame server and receiver
//! - [`pipeline`]: Frame sources, consumers, and loop pacing
//! - [`config`]: TOML configuration

pub mod config;
pub mod pipeline;

/// Re-export transport types.
pub mod transport {
    pub use framebridge_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use framebridge_frame::*;
}

/// Re-export shared-memory channel types.
pub mod shm {
    pub use framebridge_shm::*;
}

/// Re-export socket channel types.
pub mod stream {
    pub use framebridge_stream::*;
}

pub use config::{AppConfig, ConfigError};
