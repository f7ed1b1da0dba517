use framebridge_frame::{FrameError, FrameLimits};

/// Errors that can occur in shared-memory channel operations.
#[derive(Debug, thiserror::Error)]
pub enum ShmError {
    /// The name cannot be used as a POSIX shared memory object name.
    #[error("invalid shared memory name {name:?}: {reason}")]
    InvalidName { name: String, reason: &'static str },

    /// The channel maxima describe an empty or unaddressable payload slot.
    #[error("invalid channel limits {limits}: {reason}")]
    InvalidLimits {
        limits: FrameLimits,
        reason: &'static str,
    },

    /// A region with this name already exists.
    #[error("shared memory region {name} already exists")]
    AlreadyExists { name: String },

    /// No region with this name exists (yet).
    #[error("shared memory region {name} not found")]
    NotFound { name: String },

    /// The region is smaller than the layout both sides agreed on.
    #[error("shared memory region {name} is {len} bytes, need at least {required}")]
    RegionTooSmall {
        name: String,
        len: usize,
        required: usize,
    },

    /// An operating system call failed.
    #[error("{op} failed for shared memory region {name}: {source}")]
    Os {
        op: &'static str,
        name: String,
        source: std::io::Error,
    },

    /// Attaching kept failing because the owner never created the region.
    #[error("shared memory region {name} did not appear after {attempts} attempts")]
    RetriesExhausted { name: String, attempts: u32 },

    /// A GPU write reused or decreased the frame id.
    #[error("frame id {attempted} does not advance past {previous}")]
    FrameIdRegression { previous: u64, attempted: u64 },

    /// Device memory could not be allocated, uploaded, or imported.
    #[error("device memory unavailable: {reason}")]
    DeviceUnavailable { reason: String },

    /// The frame itself was rejected (size, shape, or payload length).
    #[error(transparent)]
    Frame(#[from] FrameError),
}

impl ShmError {
    /// True when the frame was larger than the channel's maxima.
    pub fn is_size_exceeded(&self) -> bool {
        matches!(self, ShmError::Frame(FrameError::SizeExceeded { .. }))
    }

    /// True when the owner has not finished creating the region yet.
    ///
    /// A region of length zero is one the owner has opened but not sized.
    pub fn is_not_ready(&self) -> bool {
        matches!(
            self,
            ShmError::NotFound { .. } | ShmError::RegionTooSmall { len: 0, .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, ShmError>;
