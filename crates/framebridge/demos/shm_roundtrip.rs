//! Create a shared-memory channel, publish a few frames, and read them back
//! through a second handle, the way a capture process and an inference
//! process would.
//!
//! Run with:
//!   cargo run --example shm-roundtrip
//!
//! While it runs, inspect the slot from another terminal:
//!   cargo run --features cli -- inspect --name /framebridge-demo

#[cfg(unix)]
fn main() -> Result<(), Box<dyn std::error::Error>> {
    use std::thread;
    use std::time::Duration;

    use framebridge::frame::{FrameLimits, FrameMetadata};
    use framebridge::pipeline::{FrameConsumer, FrameSource, FrameStats, PatternSource};
    use framebridge::shm::{ChannelOptions, SharedFrameChannel};

    let limits = FrameLimits::new(64, 48, 3);
    let mut writer =
        SharedFrameChannel::create_or_replace("/framebridge-demo", limits, ChannelOptions::default())?;
    let reader = SharedFrameChannel::attach("/framebridge-demo", limits, ChannelOptions::default())?;

    let mut source = PatternSource::new(FrameMetadata::new(64, 48, 3))?;
    let mut stats = FrameStats::new();

    for _ in 0..10 {
        if let Some(frame) = source.next_frame() {
            writer.write(&frame)?;
        }
        match reader.read() {
            Some(frame) => {
                let summary = stats.consume(&frame)?;
                eprintln!(
                    "seq={:?} shape={:?} mean={:.1} checksum={:#010x}",
                    reader.sequence(),
                    frame.shape(),
                    summary.mean,
                    summary.checksum
                );
            }
            None => eprintln!("no frame this cycle"),
        }
        thread::sleep(Duration::from_millis(200));
    }

    drop(reader);
    writer.destroy()?;
    Ok(())
}

#[cfg(not(unix))]
fn main() {
    eprintln!("shared-memory channels require a unix platform");
}
