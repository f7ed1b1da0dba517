use std::thread;
use std::time::{Duration, Instant};

/// Warn on the first miss of a streak, then on every 30th.
pub const MISS_WARN_EVERY: u64 = 30;

/// Progress is logged every `PROGRESS_SECONDS * fps` frames.
pub const PROGRESS_SECONDS: u64 = 3;

/// Caps a loop at `fps` iterations per second.
///
/// The configured rate is a maximum: each `wait` sleeps only for what is
/// left of the current interval, and a loop that fell behind starts a new
/// interval instead of bursting to catch up.
#[derive(Debug)]
pub struct RatePacer {
    interval: Duration,
    deadline: Option<Instant>,
}

impl RatePacer {
    pub fn new(fps: u32) -> Self {
        Self {
            interval: Duration::from_secs(1) / fps.max(1),
            deadline: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Block until the next iteration may start. The first call returns at once.
    pub fn wait(&mut self) {
        let delay = self.delay_at(Instant::now());
        if !delay.is_zero() {
            thread::sleep(delay);
        }
    }

    fn delay_at(&mut self, now: Instant) -> Duration {
        match self.deadline {
            Some(deadline) if deadline > now => {
                self.deadline = Some(deadline + self.interval);
                deadline - now
            }
            _ => {
                self.deadline = Some(now + self.interval);
                Duration::ZERO
            }
        }
    }
}

/// Counters that decide when a loop should log.
#[derive(Debug)]
pub struct LoopTally {
    progress_every: u64,
    frames: u64,
    misses: u64,
    miss_streak: u64,
}

impl LoopTally {
    pub fn new(fps: u32) -> Self {
        Self {
            progress_every: (u64::from(fps) * PROGRESS_SECONDS).max(1),
            frames: 0,
            misses: 0,
            miss_streak: 0,
        }
    }

    /// Count a handled frame; true when a progress line is due.
    pub fn frame(&mut self) -> bool {
        self.frames += 1;
        self.miss_streak = 0;
        self.frames % self.progress_every == 0
    }

    /// Count a cycle without a frame; true when a warning is due.
    pub fn miss(&mut self) -> bool {
        self.misses += 1;
        self.miss_streak += 1;
        self.miss_streak == 1 || self.miss_streak % MISS_WARN_EVERY == 0
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }

    pub fn miss_streak(&self) -> u64 {
        self.miss_streak
    }
}
