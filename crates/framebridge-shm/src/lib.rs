//! Single-slot shared-memory frame channels.
//!
//! A producer creates a named POSIX shared memory region sized for the
//! largest frame both sides agreed on; consumers attach to it and read the
//! most recent frame. There is no queue: every write replaces the slot.
//!
//! Two variants share the same lifecycle rules:
//! - [`SharedFrameChannel`] carries raw pixels behind a 12-byte header.
//! - [`GpuFrameChannel`] carries a device memory handle plus a strictly
//!   increasing frame id behind a 28-byte header, with a host fallback slot.
//!
//! The creating process owns the region and is the only one that unlinks it.

pub mod device;
pub mod error;
pub mod freshness;
pub mod layout;

#[cfg(unix)]
pub mod cpu;
#[cfg(unix)]
pub mod gpu;
#[cfg(unix)]
pub mod publisher;
#[cfg(unix)]
pub mod region;
#[cfg(unix)]
mod seqlock;

#[cfg(unix)]
pub use cpu::SharedFrameChannel;
pub use device::{
    DeviceAllocator, DeviceBuffer, DeviceContext, DeviceFallback, DeviceHandle, NoDevice,
};
pub use error::{Result, ShmError};
pub use freshness::{FrameIdTracker, Freshness};
#[cfg(unix)]
pub use gpu::{GpuFrame, GpuFrameChannel, GpuHeader, GpuPayload, GpuSource, GPU_HEADER_SIZE};
pub use layout::{ChannelOptions, Consistency, DEFAULT_READ_ATTEMPTS};
#[cfg(unix)]
pub use publisher::GpuPublisher;
#[cfg(unix)]
pub use region::{Role, SharedRegion};
