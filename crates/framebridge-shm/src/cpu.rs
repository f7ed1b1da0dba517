use framebridge_frame::{decode_header, encode_header, Frame, FrameLimits, FrameMetadata, HEADER_SIZE};
use framebridge_transport::RetryPolicy;
use tracing::{debug, info};

use crate::error::Result;
use crate::layout::{ChannelOptions, RegionLayout};
use crate::region::{Role, SharedRegion};
use crate::seqlock;

/// Single-slot shared-memory channel carrying raw pixel frames.
///
/// Layout: `[0, 12)` width, height, channels as little-endian u32, then the
/// pixel slot of `max_width * max_height * max_channels` bytes. Every write
/// overwrites the previous frame; there is no queue.
#[derive(Debug)]
pub struct SharedFrameChannel {
    region: SharedRegion,
    limits: FrameLimits,
    layout: RegionLayout,
    options: ChannelOptions,
}

impl SharedFrameChannel {
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

    /// Attach to a channel created by another process.
    pub fn attach(name: &str, limits: FrameLimits, options: ChannelOptions) -> Result<Self> {
        let layout = Self::layout(&limits, &options)?;
        let region = SharedRegion::open(name, layout.region_len())?;
        Ok(Self::from_region(region, limits, layout, options))
    }

    /// Attach, waiting for the owner with a bounded retry loop.
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
        RegionLayout::new(HEADER_SIZE, limits, options.consistency)
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
            "shared frame channel ready"
        );
        Self {
            region,
            limits,
            layout,
            options,
        }
    }

    /// Overwrite the slot with `frame`, header first.
    ///
    /// A frame exceeding any maximum is rejected before anything is written,
    /// so the previous frame stays readable.
    pub fn write(&mut self, frame: &Frame) -> Result<()> {
        self.limits.check(frame.metadata())?;

        let header = encode_header(frame.metadata());
        let payload_offset = self.layout.payload_offset();
        let sequence = self
            .layout
            .sequence_offset
            .map(|offset| (offset, seqlock::begin_write(&self.region, offset)));

        self.region.write_bytes(0, &header);
        self.region.write_bytes(payload_offset, frame.data());

        if let Some((offset, odd)) = sequence {
            seqlock::end_write(&self.region, offset, odd);
        }
        Ok(())
    }

    /// Copy the current frame out of the slot.
    ///
    /// Returns `None` when no valid frame is present (a zero or oversized
    /// dimension) or, in sequenced mode, when every attempt raced a write.
    pub fn read(&self) -> Option<Frame> {
        match self.layout.sequence_offset {
            Some(offset) => seqlock::read(&self.region, offset, self.options.read_attempts, |r| {
                self.read_slot(r)
            })
            .flatten(),
            None => self.read_slot(&self.region),
        }
    }

    fn read_slot(&self, region: &SharedRegion) -> Option<Frame> {
        let metadata = read_header(region);
        if metadata.has_zero_dimension() || !self.limits.allows(&metadata) {
            debug!(header = %metadata, "no valid frame in slot");
            return None;
        }

        let mut data = vec![0u8; metadata.payload_len()?];
        region.read_bytes(self.layout.payload_offset(), &mut data);
        Frame::new(metadata, data).ok()
    }

    /// The raw header as currently stored, without validation.
    pub fn peek_header(&self) -> FrameMetadata {
        read_header(&self.region)
    }

    /// Write counter, or `None` for an unsynchronized channel.
    ///
    /// Even values mean the slot is stable; an unchanged value means no new
    /// frame was written since the last look.
    pub fn sequence(&self) -> Option<u64> {
        self.layout
            .sequence_offset
            .map(|offset| seqlock::current(&self.region, offset))
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

    /// Size of the shared region in bytes.
    pub fn region_len(&self) -> usize {
        self.layout.region_len()
    }

    /// Release the channel; the owner also unlinks the region.
    pub fn destroy(self) -> Result<()> {
        self.region.destroy()
    }
}

fn read_header(region: &SharedRegion) -> FrameMetadata {
    let mut header = [0u8; HEADER_SIZE];
    region.read_bytes(0, &mut header);
    decode_header(&header)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::error::ShmError;
    use crate::region::tests::unique_name;

    fn limits() -> FrameLimits {
        FrameLimits::new(4, 4, 3)
    }

    fn filled(width: u32, height: u32, channels: u32, value: u8) -> Frame {
        Frame::filled(FrameMetadata::new(width, height, channels), value).unwrap()
    }

    #[test]
    fn overwrite_with_smaller_frame() {
        for options in [ChannelOptions::default(), ChannelOptions::unsynchronized()] {
            let name = unique_name("sc");
            let mut producer = SharedFrameChannel::create(&name, limits(), options).unwrap();
            let consumer = SharedFrameChannel::attach(&name, limits(), options).unwrap();

            producer.write(&filled(4, 4, 3, 0)).unwrap();
            let first = consumer.read().unwrap();
            assert_eq!(first.shape(), (4, 4, 3));
            assert!(first.data().iter().all(|&b| b == 0));

            producer.write(&filled(2, 2, 3, 255)).unwrap();
            let second = consumer.read().unwrap();
            assert_eq!(second.shape(), (2, 2, 3));
            assert_eq!(second.data().len(), 12);
            assert!(second.data().iter().all(|&b| b == 255));
        }
    }

    #[test]
    fn roundtrip_preserves_pixels() {
        let name = unique_name("rt");
        let mut channel =
            SharedFrameChannel::create(&name, limits(), ChannelOptions::default()).unwrap();

        for (w, h, c) in [(1, 1, 1), (3, 2, 1), (4, 4, 3), (4, 1, 2)] {
            let meta = FrameMetadata::new(w, h, c);
            let pixels: Vec<u8> = (0..meta.payload_len().unwrap())
                .map(|i| (i * 7 + w as usize) as u8)
                .collect();
            let frame = Frame::new(meta, pixels).unwrap();
            channel.write(&frame).unwrap();
            assert_eq!(channel.read().unwrap(), frame);
        }
    }

    #[test]
    fn oversized_frame_leaves_previous_frame() {
        let name = unique_name("ov");
        let mut channel =
            SharedFrameChannel::create(&name, limits(), ChannelOptions::default()).unwrap();
        let kept = filled(3, 3, 3, 42);
        channel.write(&kept).unwrap();

        for oversized in [filled(5, 1, 1, 1), filled(1, 5, 1, 1), filled(1, 1, 4, 1)] {
            let err = channel.write(&oversized).unwrap_err();
            assert!(err.is_size_exceeded(), "unexpected error: {err}");
            assert_eq!(channel.read().unwrap(), kept);
        }
    }

    #[test]
    fn fresh_channel_has_no_frame() {
        let name = unique_name("fr");
        let channel =
            SharedFrameChannel::create(&name, limits(), ChannelOptions::default()).unwrap();
        assert!(channel.read().is_none());
        assert_eq!(channel.peek_header(), FrameMetadata::default());
        assert_eq!(channel.sequence(), Some(0));
    }

    #[test]
    fn header_beyond_limits_reads_as_no_frame() {
        let name = unique_name("hl");
        let mut channel =
            SharedFrameChannel::create(&name, limits(), ChannelOptions::unsynchronized()).unwrap();
        channel
            .region
            .write_bytes(0, &encode_header(&FrameMetadata::new(5, 4, 3)));

        assert!(channel.read().is_none());
        assert_eq!(channel.peek_header(), FrameMetadata::new(5, 4, 3));
    }

    #[test]
    fn sequence_advances_by_two_per_write() {
        let name = unique_name("sq");
        let mut channel =
            SharedFrameChannel::create(&name, limits(), ChannelOptions::default()).unwrap();
        channel.write(&filled(1, 1, 1, 1)).unwrap();
        channel.write(&filled(1, 1, 1, 2)).unwrap();
        assert_eq!(channel.sequence(), Some(4));

        let legacy = SharedFrameChannel::create(
            &unique_name("sq"),
            limits(),
            ChannelOptions::unsynchronized(),
        )
        .unwrap();
        assert_eq!(legacy.sequence(), None);
    }

    #[test]
    fn reader_gives_up_while_write_in_progress() {
        let name = unique_name("wp");
        let mut channel =
            SharedFrameChannel::create(&name, limits(), ChannelOptions::default()).unwrap();
        channel.write(&filled(2, 2, 3, 9)).unwrap();

        let offset = channel.layout.sequence_offset.unwrap();
        let odd = seqlock::begin_write(&channel.region, offset);
        assert!(channel.read().is_none());

        seqlock::end_write(&channel.region, offset, odd);
        assert_eq!(channel.read().unwrap().shape(), (2, 2, 3));
    }

    #[test]
    fn mismatched_consistency_detected_on_attach() {
        let name = unique_name("mm");
        let _owner =
            SharedFrameChannel::create(&name, limits(), ChannelOptions::unsynchronized()).unwrap();
        let err =
            SharedFrameChannel::attach(&name, limits(), ChannelOptions::default()).unwrap_err();
        assert!(matches!(err, ShmError::RegionTooSmall { .. }));
    }

    #[test]
    fn attacher_destroy_keeps_channel_for_owner() {
        let name = unique_name("ow");
        let mut owner =
            SharedFrameChannel::create(&name, limits(), ChannelOptions::default()).unwrap();
        let attacher =
            SharedFrameChannel::attach(&name, limits(), ChannelOptions::default()).unwrap();
        assert_eq!(attacher.role(), Role::Attacher);
        attacher.destroy().unwrap();

        owner.write(&filled(1, 1, 1, 5)).unwrap();
        let late =
            SharedFrameChannel::attach(&name, limits(), ChannelOptions::default()).unwrap();
        assert_eq!(late.read().unwrap().data(), &[5]);

        drop(late);
        owner.destroy().unwrap();
        assert!(matches!(
            SharedFrameChannel::attach(&name, limits(), ChannelOptions::default()),
            Err(ShmError::NotFound { .. })
        ));
    }

    #[test]
    fn sequenced_reads_never_tear() {
        let name = unique_name("tr");
        let limits = FrameLimits::new(64, 64, 3);
        let mut producer =
            SharedFrameChannel::create(&name, limits, ChannelOptions::default()).unwrap();
        let consumer = SharedFrameChannel::attach(&name, limits, ChannelOptions::default()).unwrap();
        let stop = Arc::new(AtomicBool::new(false));

        let writer_stop = Arc::clone(&stop);
        let writer = std::thread::spawn(move || {
            let mut value = 0u8;
            while !writer_stop.load(Ordering::Relaxed) {
                let side = 32 + u32::from(value % 32);
                let frame = filled(side, side, 3, value);
                producer.write(&frame).unwrap();
                value = value.wrapping_add(1);
                std::thread::yield_now();
            }
            producer
        });

        let mut observed = 0;
        for _ in 0..2_000 {
            if let Some(frame) = consumer.read() {
                let first = frame.data()[0];
                assert!(
                    frame.data().iter().all(|&b| b == first),
                    "torn frame observed"
                );
                observed += 1;
            }
        }
        stop.store(true, Ordering::Relaxed);
        drop(writer.join().unwrap());
        assert!(observed > 0);
    }
}
