//! Transport plumbing for framebridge.
//!
//! Provides the pieces every channel needs to find its counterpart:
//! - TCP endpoints for the streaming socket channel
//! - A bounded, fixed-delay retry policy shared by socket connect and
//!   shared-memory attach
//!
//! This is the lowest layer of framebridge. The frame, shared-memory, and
//! stream crates build on top of it.

pub mod error;
pub mod retry;
pub mod tcp;

pub use error::{Result, TransportError};
pub use retry::{
    is_transient_connect_error, RetryError, RetryPolicy, DEFAULT_MAX_ATTEMPTS,
    DEFAULT_RETRY_DELAY,
};
pub use tcp::{connect, connect_with_retry, resolve, TcpEndpoint};
