//! Region layouts and the consistency modes a channel can run in.

use framebridge_frame::FrameLimits;

use crate::error::{Result, ShmError};

/// Readers retry this many times before reporting "no frame" in sequenced mode.
pub const DEFAULT_READ_ATTEMPTS: u32 = 8;

/// How readers protect themselves against a concurrent writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Consistency {
    /// An 8-byte sequence counter follows the payload area. The writer makes
    /// it odd before touching the slot and even afterwards; readers retry
    /// when it is odd or moved while they copied.
    #[default]
    Sequenced,
    /// No counter. The region is exactly header plus capacity bytes and a
    /// reader racing a writer may observe a torn frame.
    Unsynchronized,
}

/// Per-channel options both processes must agree on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelOptions {
    pub consistency: Consistency,
    /// Bounded retries for a sequenced read. Ignored when unsynchronized.
    pub read_attempts: u32,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            consistency: Consistency::Sequenced,
            read_attempts: DEFAULT_READ_ATTEMPTS,
        }
    }
}

impl ChannelOptions {
    pub fn unsynchronized() -> Self {
        Self {
            consistency: Consistency::Unsynchronized,
            ..Self::default()
        }
    }
}

/// Byte offsets of one channel's region.
///
/// ```text
/// [0, header_len)                      header
/// [header_len, header_len + capacity)  payload slot
/// [seq, seq + 8)                       sequence counter (sequenced only, 8-aligned)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RegionLayout {
    pub header_len: usize,
    pub capacity: usize,
    pub sequence_offset: Option<usize>,
}

impl RegionLayout {
    pub(crate) fn new(
        header_len: usize,
        limits: &FrameLimits,
        consistency: Consistency,
    ) -> Result<Self> {
        let invalid = |reason| ShmError::InvalidLimits {
            limits: *limits,
            reason,
        };
        let capacity = match limits.capacity() {
            Some(0) => return Err(invalid("every maximum must be non-zero")),
            Some(capacity) => capacity,
            None => return Err(invalid("capacity overflows")),
        };
        let end = header_len
            .checked_add(capacity)
            .ok_or_else(|| invalid("capacity overflows"))?;

        let sequence_offset = match consistency {
            Consistency::Sequenced => Some(
                end.checked_next_multiple_of(8)
                    .filter(|offset| offset.checked_add(8).is_some())
                    .ok_or_else(|| invalid("capacity overflows"))?,
            ),
            Consistency::Unsynchronized => None,
        };

        Ok(Self {
            header_len,
            capacity,
            sequence_offset,
        })
    }

    pub(crate) fn payload_offset(&self) -> usize {
        self.header_len
    }

    /// Total region size in bytes.
    pub(crate) fn region_len(&self) -> usize {
        match self.sequence_offset {
            Some(offset) => offset + 8,
            None => self.header_len + self.capacity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use framebridge_frame::HEADER_SIZE;

    #[test]
    fn unsynchronized_matches_legacy_size() {
        let limits = FrameLimits::new(1920, 1080, 3);
        let layout = RegionLayout::new(HEADER_SIZE, &limits, Consistency::Unsynchronized).unwrap();
        assert_eq!(layout.region_len(), 12 + 1920 * 1080 * 3);
        assert_eq!(layout.payload_offset(), 12);
        assert_eq!(layout.sequence_offset, None);
    }

    #[test]
    fn sequence_counter_is_aligned_after_payload() {
        let limits = FrameLimits::new(4, 4, 3);
        let layout = RegionLayout::new(HEADER_SIZE, &limits, Consistency::Sequenced).unwrap();
        // 12 + 48 = 60, next multiple of 8 is 64.
        assert_eq!(layout.sequence_offset, Some(64));
        assert_eq!(layout.region_len(), 72);
        assert_eq!(layout.payload_offset(), 12);
    }

    #[test]
    fn zero_maximum_rejected() {
        let err = RegionLayout::new(HEADER_SIZE, &FrameLimits::new(0, 4, 3), Consistency::Sequenced)
            .unwrap_err();
        assert!(matches!(err, ShmError::InvalidLimits { .. }));
    }

    #[test]
    fn overflowing_capacity_rejected() {
        let limits = FrameLimits::new(u32::MAX, u32::MAX, u32::MAX);
        assert!(RegionLayout::new(28, &limits, Consistency::Unsynchronized).is_err());
    }
}
