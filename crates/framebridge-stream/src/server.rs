use std::marker::PhantomData;
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

use framebridge_frame::{Frame, FrameConfig, FrameError, FrameWriter};
use framebridge_transport::TcpEndpoint;
use tracing::{debug, info, warn};

use crate::error::{Result, StreamError};

/// Producer side of the socket channel.
///
/// Serves one client at a time: [`FrameServer::accept`] borrows the server
/// mutably, so the next client can only be accepted once the previous
/// [`FrameSender`] is dropped.
pub struct FrameServer {
    endpoint: TcpEndpoint,
    config: FrameConfig,
}

impl FrameServer {
    /// Bind a listening endpoint on `addr` (`host:port`).
    pub fn bind(addr: &str) -> Result<Self> {
        Ok(Self {
            endpoint: TcpEndpoint::bind(addr)?,
            config: FrameConfig::default(),
        })
    }

    /// Override the frame configuration (write timeout, sanity bounds).
    pub fn with_frame_config(mut self, config: FrameConfig) -> Self {
        self.config = config;
        self
    }

    /// Wait for the next client (blocking).
    pub fn accept(&mut self) -> Result<FrameSender<'_>> {
        let (stream, peer) = self.endpoint.accept()?;
        self.sender(stream, peer)
    }

    /// Wait up to `timeout` for the next client.
    ///
    /// Returns `Ok(None)` when nobody connected in time, so the caller can
    /// check its own shutdown flag between waits.
    pub fn accept_timeout(&mut self, timeout: Duration) -> Result<Option<FrameSender<'_>>> {
        match self.endpoint.accept_timeout(timeout)? {
            Some((stream, peer)) => self.sender(stream, peer).map(Some),
            None => Ok(None),
        }
    }

    fn sender(&mut self, stream: TcpStream, peer: SocketAddr) -> Result<FrameSender<'_>> {
        let writer = FrameWriter::with_config_tcp(stream, self.config.clone())?;
        info!(%peer, "frame client connected");
        Ok(FrameSender {
            writer,
            peer,
            frames_sent: 0,
            failed: false,
            _server: PhantomData,
        })
    }

    /// The bound address (useful when binding port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.endpoint.local_addr()
    }
}

/// Sends frames to the one connected client.
///
/// The first failed send ends the connection: the peer may hold a partial
/// frame, so later calls return [`StreamError::SenderClosed`] without
/// touching the socket. A frame refused by the header check is reported as
/// [`StreamError::Rejected`] and leaves the connection open.
pub struct FrameSender<'a> {
    writer: FrameWriter<TcpStream>,
    peer: SocketAddr,
    frames_sent: u64,
    failed: bool,
    _server: PhantomData<&'a mut FrameServer>,
}

impl FrameSender<'_> {
    /// Send one frame: header, then payload.
    pub fn send(&mut self, frame: &Frame) -> Result<()> {
        if self.failed {
            return Err(StreamError::SenderClosed(self.peer));
        }
        match self.writer.send(frame) {
            Ok(()) => {
                self.frames_sent += 1;
                debug!(peer = %self.peer, shape = %frame.metadata(), "frame sent");
                Ok(())
            }
            Err(source @ (FrameError::InvalidHeader { .. } | FrameError::SizeExceeded { .. })) => {
                debug!(peer = %self.peer, error = %source, "frame rejected before write");
                Err(StreamError::Rejected {
                    peer: self.peer,
                    source,
                })
            }
            Err(source) => {
                self.failed = true;
                warn!(
                    peer = %self.peer,
                    frames_sent = self.frames_sent,
                    error = %source,
                    "send failed; closing client connection"
                );
                Err(StreamError::SendFailed {
                    peer: self.peer,
                    source,
                })
            }
        }
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }

    /// True once a send has failed.
    pub fn is_closed(&self) -> bool {
        self.failed
    }
}
