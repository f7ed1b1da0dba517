/// How a frame id compares with the last one a consumer processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Newer than anything seen so far.
    Fresh,
    /// Same id as the last frame; the work can be skipped.
    Repeat,
    /// Smaller than the last id: the producer restarted its counter.
    Restarted,
}

/// Tracks the last frame id a consumer processed.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameIdTracker {
    last: Option<u64>,
}

impl FrameIdTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify `frame_id` and remember it unless it is a repeat.
    pub fn observe(&mut self, frame_id: u64) -> Freshness {
        let freshness = match self.last {
            None => Freshness::Fresh,
            Some(last) if frame_id > last => Freshness::Fresh,
            Some(last) if frame_id == last => Freshness::Repeat,
            Some(_) => Freshness::Restarted,
        };
        if freshness != Freshness::Repeat {
            self.last = Some(frame_id);
        }
        freshness
    }

    pub fn last(&self) -> Option<u64> {
        self.last
    }

    pub fn reset(&mut self) {
        self.last = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_ids() {
        let mut tracker = FrameIdTracker::new();
        assert_eq!(tracker.observe(3), Freshness::Fresh);
        assert_eq!(tracker.observe(3), Freshness::Repeat);
        assert_eq!(tracker.observe(9), Freshness::Fresh);
        assert_eq!(tracker.observe(1), Freshness::Restarted);
        assert_eq!(tracker.last(), Some(1));
        assert_eq!(tracker.observe(2), Freshness::Fresh);

        tracker.reset();
        assert_eq!(tracker.observe(0), Freshness::Fresh);
    }
}
