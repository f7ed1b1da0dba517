use bytes::Bytes;
use framebridge_frame::{decode_header, encode_header, FrameError, FrameLimits, FrameMetadata};
use framebridge_transport::RetryPolicy;
use tracing::{debug, info};

use crate::device::DeviceHandle;
use crate::error::{Result, ShmError};
use crate::layout::{ChannelOptions, RegionLayout};
use crate::region::{Role, SharedRegion};
use crate::seqlock;

/// Header of the GPU variant: shape, device handle, frame id.
pub const GPU_HEADER_SIZE: usize = 28;
const DEVICE_HANDLE_OFFSET: usize = 12;
const FRAME_ID_OFFSET: usize = 20;

/// Where the pixels of a GPU write live.
#[derive(Debug, Clone, Copy)]
pub enum GpuSource<'a> {
    /// Already uploaded to device memory; only the handle is published.
    Device(DeviceHandle),
    /// Host fallback: the bytes are copied into the region's payload slot.
    Host(&'a [u8]),
}

/// Pixels of a frame read from a GPU channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GpuPayload {
    /// Borrowed device memory, meaningful only inside a context that can
    /// import the handle.
    Device(DeviceHandle),
    /// Owned copy of host-fallback pixels.
    Host(Bytes),
}

/// A frame read from a GPU channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GpuFrame {
    pub metadata: FrameMetadata,
    pub frame_id: u64,
    pub payload: GpuPayload,
}

impl GpuFrame {
    pub fn is_host_fallback(&self) -> bool {
        matches!(self.payload, GpuPayload::Host(_))
    }
}

/// Raw GPU header as stored, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GpuHeader {
    pub metadata: FrameMetadata,
    pub device_handle: u64,
    pub frame_id: u64,
}

/// Single-slot shared-memory channel publishing device-memory handles.
///
/// Layout: `[0, 12)` shape, `[12, 20)` device handle (u64, zero in host
/// fallback), `[20, 28)` frame id (u64), then a host-fallback pixel slot
/// sized like the CPU channel's.
#[derive(Debug)]
pub struct GpuFrameChannel {
    region: SharedRegion,
    limits: FrameLimits,
    layout: RegionLayout,
    options: ChannelOptions,
    last_frame_id: Option<u64>,
}

impl GpuFrameChannel {
    /// Create the channel as its owner. Fails if the name already exists.
    pub fn create(name: &str, limits: FrameLimits, options: ChannelOptions) -> Result<Self> {
        let layout = Self::layout(&limits, &options)?;
        let region = SharedRegion::create(name, layout.region_len())?;
        Ok(Self::from_region(region, limits, layout, options))
    }

    /// Create the channel, replacing a stale region left under the same name.
    pub fn create_or_replace(
        name: &str,
        limits: FrameLimits,
        options: ChannelOptions,
    ) -> Result<Self> {
        let layout = Self::layout(&limits, &options)?;
        let region = SharedRegion::create_or_replace(name, layout.region_len())?;
        Ok(Self::from_region(region, limits, layout, options))
    }

    pub fn attach(name: &str, limits: FrameLimits, options: ChannelOptions) -> Result<Self> {
        let layout = Self::layout(&limits, &options)?;
        let region = SharedRegion::open(name, layout.region_len())?;
        Ok(Self::from_region(region, limits, layout, options))
    }

    pub fn attach_with_retry(
        name: &str,
        limits: FrameLimits,
        options: ChannelOptions,
        policy: &RetryPolicy,
    ) -> Result<Self> {
        let layout = Self::layout(&limits, &options)?;
        let region = SharedRegion::open_with_retry(name, layout.region_len(), policy)?;
        Ok(Self::from_region(region, limits, layout, options))
    }

    fn layout(limits: &FrameLimits, options: &ChannelOptions) -> Result<RegionLayout> {
        RegionLayout::new(GPU_HEADER_SIZE, limits, options.consistency)
    }

    fn from_region(
        region: SharedRegion,
        limits: FrameLimits,
        layout: RegionLayout,
        options: ChannelOptions,
    ) -> Self {
        info!(
            name = region.name(),
            role = ?region.role(),
            limits = %limits,
            consistency = ?options.consistency,
            "gpu frame channel ready"
        );
        Self {
            region,
            limits,
            layout,
            options,
            last_frame_id: None,
        }
    }

    /// Publish a frame.
    ///
    /// For [`GpuSource::Device`] the pixels must already be in device memory.
    /// For [`GpuSource::Host`] the bytes are copied into the slot before the
    /// header is written. `frame_id` must be strictly greater than the id of
    /// the previous write through this handle.
    pub fn write(
        &mut self,
        metadata: FrameMetadata,
        frame_id: u64,
        source: GpuSource<'_>,
    ) -> Result<()> {
        if metadata.has_zero_dimension() {
            return Err(FrameError::InvalidHeader {
                metadata,
                reason: "zero dimension",
            }
            .into());
        }
        self.limits.check(&metadata)?;
        if let Some(previous) = self.last_frame_id {
            if frame_id <= previous {
                return Err(ShmError::FrameIdRegression {
                    previous,
                    attempted: frame_id,
                });
            }
        }
        if let GpuSource::Host(pixels) = source {
            let expected = metadata.payload_len().unwrap_or(usize::MAX);
            if pixels.len() != expected {
                return Err(FrameError::PayloadMismatch {
                    expected,
                    actual: pixels.len(),
                }
                .into());
            }
        }

        let sequence = self
            .layout
            .sequence_offset
            .map(|offset| (offset, seqlock::begin_write(&self.region, offset)));

        let device_handle = match source {
            GpuSource::Device(handle) => handle.get(),
            GpuSource::Host(pixels) => {
                let payload_offset = self.layout.payload_offset();
                self.region.write_bytes(payload_offset, pixels);
                0
            }
        };
        self.region.write_bytes(0, &encode_header(&metadata));
        self.region.write_u64(DEVICE_HANDLE_OFFSET, device_handle);
        self.region.write_u64(FRAME_ID_OFFSET, frame_id);

        if let Some((offset, odd)) = sequence {
            seqlock::end_write(&self.region, offset, odd);
        }
        self.last_frame_id = Some(frame_id);
        Ok(())
    }

    /// Read the current frame.
    ///
    /// Returns `None` when the header is invalid or, in sequenced mode, when
    /// every attempt raced a write. A zero device handle means host fallback:
    /// the pixels are copied out of the slot.
    pub fn read(&self) -> Option<GpuFrame> {
        match self.layout.sequence_offset {
            Some(offset) => seqlock::read(&self.region, offset, self.options.read_attempts, |r| {
                self.read_slot(r)
            })
            .flatten(),
            None => self.read_slot(&self.region),
        }
    }

    fn read_slot(&self, region: &SharedRegion) -> Option<GpuFrame> {
        let header = read_header(region);
        let metadata = header.metadata;
        if metadata.has_zero_dimension() || !self.limits.allows(&metadata) {
            debug!(header = %metadata, "no valid gpu frame in slot");
            return None;
        }

        let payload = match DeviceHandle::new(header.device_handle) {
            Some(handle) => GpuPayload::Device(handle),
            None => {
                let mut data = vec![0u8; metadata.payload_len()?];
                region.read_bytes(self.layout.payload_offset(), &mut data);
                GpuPayload::Host(Bytes::from(data))
            }
        };
        Some(GpuFrame {
            metadata,
            frame_id: header.frame_id,
            payload,
        })
    }

    /// The raw header as currently stored, without validation.
    pub fn peek_header(&self) -> GpuHeader {
        read_header(&self.region)
    }

    /// Write counter, or `None` for an unsynchronized channel.
    pub fn sequence(&self) -> Option<u64> {
        self.layout
            .sequence_offset
            .map(|offset| seqlock::current(&self.region, offset))
    }

    /// Id of the last successful write through this handle.
    pub fn last_frame_id(&self) -> Option<u64> {
        self.last_frame_id
    }

    pub fn name(&self) -> &str {
        self.region.name()
    }

    pub fn limits(&self) -> FrameLimits {
        self.limits
    }

    pub fn options(&self) -> ChannelOptions {
        self.options
    }

    pub fn role(&self) -> Role {
        self.region.role()
    }

    pub fn region_len(&self) -> usize {
        self.layout.region_len()
    }

    /// Release the channel; the owner also unlinks the region.
    pub fn destroy(self) -> Result<()> {
        self.region.destroy()
    }
}

fn read_header(region: &SharedRegion) -> GpuHeader {
    let mut shape = [0u8; 12];
    region.read_bytes(0, &mut shape);
    GpuHeader {
        metadata: decode_header(&shape),
        device_handle: region.read_u64(DEVICE_HANDLE_OFFSET),
        frame_id: region.read_u64(FRAME_ID_OFFSET),
    }
}
