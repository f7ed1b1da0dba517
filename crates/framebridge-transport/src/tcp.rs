use std::io::ErrorKind;
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::retry::{is_transient_connect_error, RetryError, RetryPolicy};

/// A bound TCP listening endpoint.
///
/// The producer side of the socket channel binds one of these and accepts
/// exactly one client at a time.
pub struct TcpEndpoint {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl TcpEndpoint {
    /// Bind and listen on `addr` (`host:port`).
    ///
    /// `SO_REUSEADDR` is set by the standard library on Unix, so a restarted
    /// producer can rebind while old connections sit in `TIME_WAIT`.
    pub fn bind(addr: &str) -> Result<Self> {
        let listener = TcpListener::bind(addr).map_err(|e| TransportError::Bind {
            addr: addr.to_string(),
            source: e,
        })?;
        let local_addr = listener.local_addr().map_err(|e| TransportError::Bind {
            addr: addr.to_string(),
            source: e,
        })?;

        info!(%local_addr, "listening on tcp endpoint");

        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// Accept an incoming connection (blocking).
    pub fn accept(&self) -> Result<(TcpStream, SocketAddr)> {
        let (stream, peer) = self.listener.accept().map_err(TransportError::Accept)?;
        stream.set_nodelay(true)?;
        debug!(%peer, "accepted connection");
        Ok((stream, peer))
    }

    /// The address actually bound (useful when binding port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept an incoming connection, giving up after `timeout`.
    ///
    /// The listener is polled in nonblocking mode every [`ACCEPT_POLL`] and
    /// put back into blocking mode before returning.
    pub fn accept_timeout(&self, timeout: Duration) -> Result<Option<(TcpStream, SocketAddr)>> {
        self.listener.set_nonblocking(true)?;
        let deadline = Instant::now() + timeout;
        let accepted = loop {
            match self.listener.accept() {
                Ok(pair) => break Ok(Some(pair)),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => {
                    let now = Instant::now();
                    if now >= deadline {
                        break Ok(None);
                    }
                    thread::sleep(ACCEPT_POLL.min(deadline - now));
                }
                Err(err) => break Err(TransportError::Accept(err)),
            }
        };
        self.listener.set_nonblocking(false)?;

        let Some((stream, peer)) = accepted? else {
            return Ok(None);
        };
        // BSD-derived systems hand out accepted sockets in the listener's mode.
        stream.set_nonblocking(false)?;
        stream.set_nodelay(true)?;
        debug!(%peer, "accepted connection");
        Ok(Some((stream, peer)))
    }
}

/// Poll interval of [`TcpEndpoint::accept_timeout`].
pub const ACCEPT_POLL: Duration = Duration::from_millis(20);

/// Resolve `host:port` to the first socket address it names.
pub fn resolve(addr: &str) -> Result<SocketAddr> {
    let mut addrs = addr.to_socket_addrs().map_err(|e| TransportError::Resolve {
        addr: addr.to_string(),
        source: e,
    })?;
    addrs.next().ok_or_else(|| TransportError::Resolve {
        addr: addr.to_string(),
        source: std::io::Error::new(
            std::io::ErrorKind::AddrNotAvailable,
            "address resolved to nothing",
        ),
    })
}

/// Connect once, optionally bounded by `timeout`.
pub fn connect(addr: SocketAddr, timeout: Option<Duration>) -> Result<TcpStream> {
    let stream = open_stream(addr, timeout).map_err(|e| TransportError::Connect {
        addr,
        source: e,
    })?;
    debug!(%addr, "connected to tcp endpoint");
    Ok(stream)
}

/// Connect with a bounded retry loop.
///
/// Refused and timed-out attempts are retried with the policy's fixed delay;
/// any other error is returned immediately without further attempts.
pub fn connect_with_retry(
    addr: SocketAddr,
    timeout: Option<Duration>,
    policy: &RetryPolicy,
) -> Result<TcpStream> {
    let stream = policy
        .run("tcp server", is_transient_connect_error, |attempt| {
            debug!(%addr, attempt, "connecting");
            open_stream(addr, timeout)
        })
        .map_err(|err| match err {
            RetryError::Exhausted { attempts, last } => {
                TransportError::RetriesExhausted { attempts, last }
            }
            RetryError::Fatal { error, .. } => TransportError::Connect {
                addr,
                source: error,
            },
        })?;
    info!(%addr, "connected to tcp endpoint");
    Ok(stream)
}

fn open_stream(addr: SocketAddr, timeout: Option<Duration>) -> std::io::Result<TcpStream> {
    let stream = match timeout {
        Some(timeout) => TcpStream::connect_timeout(&addr, timeout)?,
        None => TcpStream::connect(addr)?,
    };
    stream.set_nodelay(true)?;
    Ok(stream)
}
