//! Single-writer sequence lock over a counter stored in the region.

use std::hint;
use std::sync::atomic::{fence, Ordering};

use crate::region::SharedRegion;

/// Mark the slot as being written. Returns the odd value to close with.
pub(crate) fn begin_write(region: &SharedRegion, offset: usize) -> u64 {
    let counter = region.atomic_u64(offset);
    let current = counter.load(Ordering::Relaxed);
    // An odd value left by a writer that died mid-write is skipped past.
    let odd = if current % 2 == 0 {
        current.wrapping_add(1)
    } else {
        current.wrapping_add(2)
    };
    counter.store(odd, Ordering::Relaxed);
    fence(Ordering::Release);
    odd
}

pub(crate) fn end_write(region: &SharedRegion, offset: usize, odd: u64) {
    region
        .atomic_u64(offset)
        .store(odd.wrapping_add(1), Ordering::Release);
}

/// Current counter value.
pub(crate) fn current(region: &SharedRegion, offset: usize) -> u64 {
    region.atomic_u64(offset).load(Ordering::Acquire)
}

/// Run `read` until it completes without a concurrent write.
///
/// The payload copy inside `read` is a plain memcpy over memory another
/// process may be writing. Its bytes are only trusted when the counter is
/// even and unchanged across the copy; a torn copy is discarded and never
/// interpreted. `read` must therefore copy into owned buffers and stay in
/// bounds whatever header values it sees mid-write.
///
/// Returns `None` when every attempt overlapped a write.
pub(crate) fn read<T>(
    region: &SharedRegion,
    offset: usize,
    attempts: u32,
    mut read: impl FnMut(&SharedRegion) -> T,
) -> Option<T> {
    let counter = region.atomic_u64(offset);
    for _ in 0..attempts.max(1) {
        let before = counter.load(Ordering::Acquire);
        if before % 2 == 1 {
            hint::spin_loop();
            continue;
        }
        let value = read(region);
        fence(Ordering::Acquire);
        if counter.load(Ordering::Relaxed) == before {
            return Some(value);
        }
    }
    None
}
