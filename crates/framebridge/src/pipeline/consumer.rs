use framebridge_frame::Frame;
use serde::Serialize;

use crate::pipeline::error::Result;

/// Accepts one frame at a time.
///
/// The transport only cares that the call returned; a failed frame is
/// logged by the loop and the next frame is processed normally.
pub trait FrameConsumer {
    type Output;

    fn consume(&mut self, frame: &Frame) -> Result<Self::Output>;
}

/// Per-frame digest produced by [`FrameStats`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameSummary {
    pub width: u32,
    pub height: u32,
    pub channels: u32,
    /// Mean byte value across the payload.
    pub mean: f64,
    /// Adler-32 of the payload.
    pub checksum: u32,
}

/// Cheap stand-in for a detector: summarizes every frame it sees.
#[derive(Debug, Default)]
pub struct FrameStats {
    frames: u64,
    bytes: u64,
    last: Option<FrameSummary>,
}

impl FrameStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    pub fn last(&self) -> Option<&FrameSummary> {
        self.last.as_ref()
    }
}

impl FrameConsumer for FrameStats {
    type Output = FrameSummary;

    fn consume(&mut self, frame: &Frame) -> Result<FrameSummary> {
        let data = frame.data();
        let sum: u64 = data.iter().map(|&b| u64::from(b)).sum();
        let mean = if data.is_empty() {
            0.0
        } else {
            sum as f64 / data.len() as f64
        };
        let meta = frame.metadata();
        let summary = FrameSummary {
            width: meta.width,
            height: meta.height,
            channels: meta.channels,
            mean,
            checksum: adler32(data),
        };
        self.frames += 1;
        self.bytes += data.len() as u64;
        self.last = Some(summary.clone());
        Ok(summary)
    }
}

fn adler32(data: &[u8]) -> u32 {
    const MOD: u32 = 65_521;
    let (mut a, mut b) = (1u32, 0u32);
    // 5552 is the largest run before `b` can overflow u32.
    for chunk in data.chunks(5552) {
        for &byte in chunk {
            a += u32::from(byte);
            b += a;
        }
        a %= MOD;
        b %= MOD;
    }
    (b << 16) | a
}

#[cfg(test)]
mod tests {
    use framebridge_frame::FrameMetadata;

    use super::*;

    #[test]
    fn adler32_known_value() {
        assert_eq!(adler32(b"Wikipedia"), 0x11E6_0398);
        assert_eq!(adler32(&[]), 1);
    }

    #[test]
    fn summarizes_frames() {
        let mut stats = FrameStats::new();
        let frame = Frame::new(FrameMetadata::new(2, 1, 2), vec![0, 10, 20, 30]).unwrap();

        let summary = stats.consume(&frame).unwrap();
        assert_eq!((summary.width, summary.height, summary.channels), (2, 1, 2));
        assert!((summary.mean - 15.0).abs() < f64::EPSILON);
        assert_eq!(stats.frames(), 1);
        assert_eq!(stats.bytes(), 4);
        assert_eq!(stats.last(), Some(&summary));
    }

    #[test]
    fn summary_serializes() {
        let mut stats = FrameStats::new();
        let frame = Frame::filled(FrameMetadata::new(1, 1, 1), 255).unwrap();
        let json = serde_json::to_value(stats.consume(&frame).unwrap()).unwrap();
        assert_eq!(json["mean"], 255.0);
        assert_eq!(json["width"], 1);
    }
}
