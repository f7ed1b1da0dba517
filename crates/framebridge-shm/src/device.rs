//! Device-memory capabilities.
//!
//! A [`DeviceHandle`] is an opaque token produced by a device buffer's
//! export and consumed by an explicit import on the other side. This crate
//! stores and compares handles but never dereferences them; only a
//! [`DeviceContext`] that shares the producer's device context can turn one
//! back into memory.

use std::fmt;
use std::num::NonZeroU64;

use framebridge_frame::FrameMetadata;

use crate::error::Result;

/// Opaque, non-zero device memory handle.
///
/// Zero is reserved on the wire for "host fallback".
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceHandle(NonZeroU64);

impl DeviceHandle {
    /// Wrap a raw handle. Returns `None` for zero.
    pub fn new(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(Self)
    }

    pub fn get(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Debug for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeviceHandle({:#x})", self.0)
    }
}

impl fmt::Display for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Producer-side device memory that frames are uploaded into.
pub trait DeviceBuffer {
    /// Copy host pixels into device memory using the device's own copy
    /// primitive. Must complete before the handle is published.
    fn upload(&mut self, pixels: &[u8]) -> Result<()>;

    /// Export a handle another context can import.
    fn export(&self) -> DeviceHandle;

    /// Size of the allocation in bytes.
    fn capacity(&self) -> usize;
}

/// Allocates device buffers for a producer.
pub trait DeviceAllocator {
    type Buffer: DeviceBuffer;

    /// Allocate `len` bytes of device memory.
    fn allocate(&self, len: usize) -> Result<Self::Buffer>;
}

/// Consumer-side device context able to import exported handles.
pub trait DeviceContext {
    /// Imported memory. Dropping it releases the import.
    type Mapping;

    /// Import the memory behind `handle` for a frame of shape `metadata`.
    fn import(&self, handle: DeviceHandle, metadata: FrameMetadata) -> Result<Self::Mapping>;
}

/// What a producer does when device memory cannot be allocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceFallback {
    /// Publish pixels through the region's host slot instead.
    Host,
    /// Treat the failure as fatal.
    #[default]
    Fail,
}

/// An allocator for hosts without a device runtime. Every allocation fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDevice;

/// Buffer type of [`NoDevice`]; can never be constructed.
#[derive(Debug)]
pub enum NoDeviceBuffer {}

impl DeviceBuffer for NoDeviceBuffer {
    fn upload(&mut self, _pixels: &[u8]) -> Result<()> {
        match *self {}
    }

    fn export(&self) -> DeviceHandle {
        match *self {}
    }

    fn capacity(&self) -> usize {
        match *self {}
    }
}

impl DeviceAllocator for NoDevice {
    type Buffer = NoDeviceBuffer;

    fn allocate(&self, len: usize) -> Result<NoDeviceBuffer> {
        Err(crate::error::ShmError::DeviceUnavailable {
            reason: format!("no device runtime available to allocate {len} bytes"),
        })
    }
}

impl DeviceContext for NoDevice {
    type Mapping = NoDeviceBuffer;

    fn import(&self, handle: DeviceHandle, _metadata: FrameMetadata) -> Result<NoDeviceBuffer> {
        Err(crate::error::ShmError::DeviceUnavailable {
            reason: format!("no device context to import handle {handle}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ShmError;

    #[test]
    fn zero_is_not_a_handle() {
        assert!(DeviceHandle::new(0).is_none());
        let handle = DeviceHandle::new(0xabc).unwrap();
        assert_eq!(handle.get(), 0xabc);
        assert_eq!(handle.to_string(), "0xabc");
    }

    #[test]
    fn no_device_refuses_everything() {
        assert!(matches!(
            NoDevice.allocate(16),
            Err(ShmError::DeviceUnavailable { .. })
        ));
        let handle = DeviceHandle::new(1).unwrap();
        assert!(NoDevice
            .import(handle, FrameMetadata::new(1, 1, 1))
            .is_err());
    }
}
