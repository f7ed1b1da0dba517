use std::fmt;
use std::io;

use framebridge::config::ConfigError;
use framebridge::frame::FrameError;
use framebridge::pipeline::PipelineError;
use framebridge::shm::ShmError;
use framebridge::stream::StreamError;
use framebridge::transport::TransportError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const CONFIG_INVALID: i32 = 20;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::ConnectionRefused | io::ErrorKind::AddrInUse => TRANSPORT_ERROR,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn config_error(context: &str, err: ConfigError) -> CliError {
    CliError::new(CONFIG_INVALID, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Bind { source, .. }
        | TransportError::Accept(source)
        | TransportError::Io(source) => io_error(context, source),
        TransportError::Resolve { .. } => CliError::new(USAGE, format!("{context}: {err}")),
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    match err {
        FrameError::Io(source) => io_error(context, source),
        FrameError::SizeExceeded { .. }
        | FrameError::InvalidHeader { .. }
        | FrameError::PayloadMismatch { .. } => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        FrameError::ConnectionClosed => CliError::new(FAILURE, format!("{context}: {err}")),
    }
}

pub fn shm_error(context: &str, err: ShmError) -> CliError {
    match err {
        ShmError::Frame(err) => frame_error(context, err),
        ShmError::Os { source, .. } => io_error(context, source),
        ShmError::InvalidName { .. } | ShmError::InvalidLimits { .. } => {
            CliError::new(CONFIG_INVALID, format!("{context}: {err}"))
        }
        ShmError::RetriesExhausted { .. } => CliError::new(TIMEOUT, format!("{context}: {err}")),
        ShmError::RegionTooSmall { .. } | ShmError::FrameIdRegression { .. } => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        ShmError::NotFound { .. }
        | ShmError::AlreadyExists { .. }
        | ShmError::DeviceUnavailable { .. } => {
            CliError::new(FAILURE, format!("{context}: {err}"))
        }
    }
}

pub fn stream_error(context: &str, err: StreamError) -> CliError {
    match err {
        StreamError::Transport(err) => transport_error(context, err),
        StreamError::Frame(err)
        | StreamError::SendFailed { source: err, .. }
        | StreamError::Rejected { source: err, .. } => frame_error(context, err),
        StreamError::SenderClosed(_) => CliError::new(FAILURE, format!("{context}: {err}")),
    }
}

pub fn pipeline_error(context: &str, err: PipelineError) -> CliError {
    match err {
        PipelineError::UnsupportedSource { .. } | PipelineError::EmptySource { .. } => {
            CliError::new(CONFIG_INVALID, format!("{context}: {err}"))
        }
        PipelineError::Read { source, .. } => io_error(context, source),
        PipelineError::Frame(err) => frame_error(context, err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_errors_use_config_exit_code() {
        let err = config_error("load", ConfigError::Invalid("fps".into()));
        assert_eq!(err.code, CONFIG_INVALID);
        assert_eq!(err.to_string(), "load: invalid configuration: fps");
    }

    #[test]
    fn attach_timeouts_map_to_timeout() {
        let err = shm_error(
            "attach",
            ShmError::RetriesExhausted {
                name: "/cam".into(),
                attempts: 3,
            },
        );
        assert_eq!(err.code, TIMEOUT);
    }

    #[test]
    fn unsupported_source_is_a_config_error() {
        let err = pipeline_error(
            "open source",
            PipelineError::UnsupportedSource {
                kind: "camera".into(),
            },
        );
        assert_eq!(err.code, CONFIG_INVALID);
    }
}
