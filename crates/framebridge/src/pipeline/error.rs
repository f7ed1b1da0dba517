use std::path::PathBuf;

use framebridge_frame::FrameError;

/// Errors raised by frame sources and consumers.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// The configured source kind needs a capture backend this build lacks.
    #[error("data source {kind} is not supported by this build")]
    UnsupportedSource { kind: String },

    /// The images directory holds no usable frames.
    #[error("no frames found in {}", dir.display())]
    EmptySource { dir: PathBuf },

    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error(transparent)]
    Frame(#[from] FrameError),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
