use framebridge_frame::Frame;
use tracing::{info, warn};

use crate::device::{DeviceAllocator, DeviceBuffer, DeviceFallback};
use crate::error::Result;
use crate::gpu::{GpuFrameChannel, GpuSource};

/// Producer side of a GPU channel: uploads each frame to device memory and
/// publishes its handle under a fresh frame id.
///
/// When allocation fails and the publisher was built with
/// [`DeviceFallback::Host`], frames go through the region's host slot
/// with a zero handle instead.
pub struct GpuPublisher<B> {
    channel: GpuFrameChannel,
    buffer: Option<B>,
    next_frame_id: u64,
}

impl<B: DeviceBuffer> GpuPublisher<B> {
    /// Allocate a device buffer sized for the channel's maxima.
    pub fn new<A>(channel: GpuFrameChannel, allocator: &A, fallback: DeviceFallback) -> Result<Self>
    where
        A: DeviceAllocator<Buffer = B>,
    {
        // Layout creation already rejected zero and overflowing capacities.
        let capacity = channel.limits().capacity().unwrap_or(0);
        let buffer = match allocator.allocate(capacity) {
            Ok(buffer) => {
                info!(capacity, "publishing frames from device memory");
                Some(buffer)
            }
            Err(err) if fallback == DeviceFallback::Host => {
                warn!(error = %err, "device allocation failed; using host fallback");
                None
            }
            Err(err) => return Err(err),
        };
        let next_frame_id = channel.last_frame_id().map_or(1, |id| id + 1);
        Ok(Self {
            channel,
            buffer,
            next_frame_id,
        })
    }

    /// Publish `frame` and return the frame id it was given.
    pub fn publish(&mut self, frame: &Frame) -> Result<u64> {
        self.channel.limits().check(frame.metadata())?;

        let frame_id = self.next_frame_id;
        let source = match self.buffer.as_mut() {
            Some(buffer) => {
                buffer.upload(frame.data())?;
                GpuSource::Device(buffer.export())
            }
            None => GpuSource::Host(frame.data()),
        };
        self.channel.write(*frame.metadata(), frame_id, source)?;
        self.next_frame_id += 1;
        Ok(frame_id)
    }

    pub fn is_host_fallback(&self) -> bool {
        self.buffer.is_none()
    }

    pub fn channel(&self) -> &GpuFrameChannel {
        &self.channel
    }

    /// Release the device buffer and return the channel.
    pub fn into_channel(self) -> GpuFrameChannel {
        self.channel
    }
}
