use std::io::ErrorKind;
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

use framebridge_frame::{Frame, FrameConfig, FrameError, FrameReader};
use framebridge_transport::{connect_with_retry, resolve, RetryPolicy};
use tracing::{debug, info, warn};

use crate::error::Result;

/// Default bound on a single connection attempt.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default bound on one blocking receive.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(10);

/// How a receiver reaches its server.
#[derive(Debug, Clone)]
pub struct ConnectConfig {
    /// Attempts and delay for the connect loop. Default: 10 attempts, 1s apart.
    pub retry: RetryPolicy,
    /// Bound on each connection attempt. Default: 5s.
    pub connect_timeout: Duration,
    /// Bound on each blocking read; `None` blocks indefinitely. Default: 10s.
    pub read_timeout: Option<Duration>,
    /// Largest width or height accepted from the server. Default: 10000.
    pub max_dimension: u32,
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: Some(DEFAULT_READ_TIMEOUT),
            max_dimension: framebridge_frame::DEFAULT_MAX_DIMENSION,
        }
    }
}

impl ConnectConfig {
    fn frame_config(&self) -> FrameConfig {
        FrameConfig {
            max_dimension: self.max_dimension,
            read_timeout: self.read_timeout,
            ..FrameConfig::default()
        }
    }
}

/// Consumer side of the socket channel.
pub struct FrameReceiver {
    reader: FrameReader<TcpStream>,
    peer: SocketAddr,
    closed: bool,
}

impl FrameReceiver {
    /// Connect to `addr` (`host:port`) with bounded retry.
    ///
    /// Refused and timed-out attempts are retried; other failures and
    /// exhausted retries are returned.
    pub fn connect(addr: &str, config: &ConnectConfig) -> Result<Self> {
        let target = resolve(addr)?;
        let stream = connect_with_retry(target, Some(config.connect_timeout), &config.retry)?;
        Self::from_stream(stream, config)
    }

    /// Wrap an already connected stream.
    pub fn from_stream(stream: TcpStream, config: &ConnectConfig) -> Result<Self> {
        let peer = stream.peer_addr().map_err(FrameError::Io)?;
        let reader = FrameReader::with_config_tcp(stream, config.frame_config())?;
        info!(%peer, "frame receiver connected");
        Ok(Self {
            reader,
            peer,
            closed: false,
        })
    }

    /// Receive the next frame, or `None` for "no frame this cycle".
    ///
    /// An invalid header, a read timeout, or a closed connection all yield
    /// `None` so the caller can keep its last good frame. Bytes of a frame
    /// interrupted by a timeout stay buffered for the next call.
    pub fn recv_frame(&mut self) -> Option<Frame> {
        if self.closed {
            return None;
        }
        match self.reader.read_frame() {
            Ok(frame) => Some(frame),
            Err(FrameError::InvalidHeader { metadata, reason }) => {
                warn!(peer = %self.peer, header = %metadata, reason, "discarding invalid frame header");
                None
            }
            Err(FrameError::Io(err))
                if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) =>
            {
                debug!(peer = %self.peer, buffered = self.reader.buffered_len(), "receive timed out");
                None
            }
            Err(FrameError::ConnectionClosed) => {
                info!(peer = %self.peer, "server closed the connection");
                self.closed = true;
                None
            }
            Err(err) => {
                warn!(peer = %self.peer, error = %err, "receive failed; treating connection as closed");
                self.closed = true;
                None
            }
        }
    }

    /// Receive the next frame, reporting every failure.
    pub fn read_frame(&mut self) -> Result<Frame> {
        match self.reader.read_frame() {
            Ok(frame) => Ok(frame),
            Err(err) => {
                if matches!(err, FrameError::ConnectionClosed) {
                    self.closed = true;
                }
                Err(err.into())
            }
        }
    }

    /// True once the connection was seen closed.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::net::TcpListener;
    use std::thread;
    use std::time::Instant;

    use framebridge_frame::{encode_header, FrameMetadata};
    use framebridge_transport::TransportError;

    use super::*;
    use crate::error::StreamError;
    use crate::server::FrameServer;

    fn quick_config() -> ConnectConfig {
        ConnectConfig {
            retry: RetryPolicy::new(3, Duration::from_millis(50)),
            connect_timeout: Duration::from_millis(500),
            read_timeout: Some(Duration::from_secs(5)),
            ..ConnectConfig::default()
        }
    }

    /// A loopback pair: (server side raw stream, receiver).
    fn pair(config: &ConnectConfig) -> (TcpStream, FrameReceiver) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let accept = thread::spawn(move || listener.accept().unwrap().0);
        let receiver = FrameReceiver::connect(&addr, config).unwrap();
        (accept.join().unwrap(), receiver)
    }

    #[test]
    fn defaults() {
        let config = ConnectConfig::default();
        assert_eq!(config.retry.max_attempts, 10);
        assert_eq!(config.retry.delay, Duration::from_secs(1));
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
        assert_eq!(config.read_timeout, Some(Duration::from_secs(10)));
        assert_eq!(config.max_dimension, 10_000);
    }

    #[test]
    fn receives_frame_from_server() {
        let mut server = FrameServer::bind("127.0.0.1:0").unwrap();
        let addr = server.local_addr().to_string();

        let producer = thread::spawn(move || {
            let mut sender = server.accept().unwrap();
            let frame = Frame::new(FrameMetadata::new(3, 2, 1), vec![1, 2, 3, 4, 5, 6]).unwrap();
            sender.send(&frame).unwrap();
        });

        let mut receiver = FrameReceiver::connect(&addr, &quick_config()).unwrap();
        let frame = receiver.recv_frame().unwrap();
        assert_eq!(frame.shape(), (2, 3, 1));
        assert_eq!(frame.data(), &[1, 2, 3, 4, 5, 6]);
        producer.join().unwrap();
    }

    #[test]
    fn reassembles_byte_at_a_time_delivery() {
        let (mut raw, mut receiver) = pair(&quick_config());
        raw.set_nodelay(true).unwrap();

        let frame = Frame::filled(FrameMetadata::new(4, 4, 3), 0x5a).unwrap();
        let mut wire = encode_header(frame.metadata()).to_vec();
        wire.extend_from_slice(frame.data());

        let writer = thread::spawn(move || {
            for byte in wire {
                raw.write_all(&[byte]).unwrap();
                raw.flush().unwrap();
            }
            raw
        });

        assert_eq!(receiver.recv_frame().unwrap(), frame);
        drop(writer.join().unwrap());
    }

    #[test]
    fn invalid_headers_yield_no_frame() {
        let (mut raw, mut receiver) = pair(&quick_config());

        raw.write_all(&encode_header(&FrameMetadata::new(3, 0, 1)))
            .unwrap();
        raw.write_all(&encode_header(&FrameMetadata::new(10_001, 1, 1)))
            .unwrap();
        let good = Frame::filled(FrameMetadata::new(2, 2, 1), 8).unwrap();
        raw.write_all(&encode_header(good.metadata())).unwrap();
        raw.write_all(good.data()).unwrap();

        assert!(receiver.recv_frame().is_none());
        assert!(receiver.recv_frame().is_none());
        assert!(!receiver.is_closed());
        assert_eq!(receiver.recv_frame().unwrap(), good);
    }

    #[test]
    fn strict_read_reports_invalid_header() {
        let (mut raw, mut receiver) = pair(&quick_config());
        raw.write_all(&encode_header(&FrameMetadata::new(0, 0, 0)))
            .unwrap();

        let err = receiver.read_frame().unwrap_err();
        assert!(matches!(
            err,
            StreamError::Frame(FrameError::InvalidHeader { .. })
        ));
    }

    #[test]
    fn close_mid_frame_yields_no_frame_and_marks_closed() {
        let (mut raw, mut receiver) = pair(&quick_config());
        raw.write_all(&encode_header(&FrameMetadata::new(4, 4, 3)))
            .unwrap();
        raw.write_all(&[1, 2, 3]).unwrap();
        drop(raw);

        assert!(receiver.recv_frame().is_none());
        assert!(receiver.is_closed());
        assert!(receiver.recv_frame().is_none());
    }

    #[test]
    fn timeout_keeps_partial_frame_buffered() {
        let config = ConnectConfig {
            read_timeout: Some(Duration::from_millis(100)),
            ..quick_config()
        };
        let (mut raw, mut receiver) = pair(&config);

        let frame = Frame::filled(FrameMetadata::new(3, 3, 3), 1).unwrap();
        raw.write_all(&encode_header(frame.metadata())).unwrap();
        raw.write_all(&frame.data()[..10]).unwrap();

        assert!(receiver.recv_frame().is_none());
        assert!(!receiver.is_closed());

        raw.write_all(&frame.data()[10..]).unwrap();
        assert_eq!(receiver.recv_frame().unwrap(), frame);
    }

    #[test]
    fn connect_makes_exactly_max_attempts() {
        let unused = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = unused.local_addr().unwrap().to_string();
        drop(unused);

        let start = Instant::now();
        let err = FrameReceiver::connect(&addr, &quick_config())
            .err()
            .unwrap();
        assert!(matches!(
            err,
            StreamError::Transport(TransportError::RetriesExhausted { attempts: 3, .. })
        ));
        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    #[test]
    fn connect_waits_for_late_server() {
        let placeholder = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = placeholder.local_addr().unwrap();
        drop(placeholder);

        let producer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(150));
            let mut server = FrameServer::bind(&addr.to_string()).unwrap();
            let mut sender = server.accept().unwrap();
            sender
                .send(&Frame::filled(FrameMetadata::new(1, 1, 1), 3).unwrap())
                .unwrap();
        });

        let config = ConnectConfig {
            retry: RetryPolicy::new(40, Duration::from_millis(50)),
            ..quick_config()
        };
        let mut receiver = FrameReceiver::connect(&addr.to_string(), &config).unwrap();
        assert_eq!(receiver.recv_frame().unwrap().data(), &[3]);
        producer.join().unwrap();
    }
}
