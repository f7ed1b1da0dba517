//! Frame streaming over TCP.
//!
//! The producer binds a [`FrameServer`], accepts one client at a time, and
//! sends each frame as a 12-byte shape header followed by the raw pixels.
//! The consumer connects a [`FrameReceiver`] with bounded retry and turns
//! every bad cycle (invalid header, timeout, closed peer) into "no frame"
//! so it can keep working with its last good frame.
//!
//! There is no heartbeat: liveness is inferred from read and write results.

pub mod error;
pub mod receiver;
pub mod server;

pub use error::{Result, StreamError};
pub use receiver::{ConnectConfig, FrameReceiver, DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT};
pub use server::{FrameSender, FrameServer};
