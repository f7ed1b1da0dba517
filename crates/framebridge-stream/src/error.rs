use std::net::SocketAddr;

/// Errors that can occur on the socket frame channel.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// Transport-level error (bind, accept, connect, retries).
    #[error("transport error: {0}")]
    Transport(#[from] framebridge_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] framebridge_frame::FrameError),

    /// A send failed; the connection to this client is finished.
    #[error("sending to {peer} failed: {source}")]
    SendFailed {
        peer: SocketAddr,
        source: framebridge_frame::FrameError,
    },

    /// The frame was refused before any byte was written; the connection
    /// is still usable.
    #[error("frame for {peer} rejected: {source}")]
    Rejected {
        peer: SocketAddr,
        source: framebridge_frame::FrameError,
    },

    /// The sender already failed once and refuses further frames.
    #[error("connection to {0} is closed")]
    SenderClosed(SocketAddr),
}

pub type Result<T> = std::result::Result<T, StreamError>;
