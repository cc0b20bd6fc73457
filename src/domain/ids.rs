//! Time-ordered id generation.
//!
//! Every id in the system (users, advs, photos, watches, request ids)
//! is a nanosecond wall-clock reading bumped by a compare-and-swap loop
//! so ids are unique and strictly increasing within a process even when
//! two allocations land in the same nanosecond.

use std::sync::atomic::{AtomicI64, Ordering};

use time::OffsetDateTime;

/// Lower bound of the valid id range. Anything at or below this value
/// predates the system and is rejected on load.
pub const MIN_VALID_ID: i64 = 1_720_060_451_151_465_000;

static LAST_ID: AtomicI64 = AtomicI64::new(0);

/// Current wall clock in nanoseconds since the epoch.
pub fn now_ns() -> i64 {
    // unix_timestamp_nanos fits i64 until the year 2262.
    OffsetDateTime::now_utc().unix_timestamp_nanos() as i64
}

/// Allocate the next id: the current wall clock in nanoseconds, or the
/// previous id plus one when the clock has not advanced.
pub fn next_id() -> i64 {
    let now = now_ns();
    loop {
        let last = LAST_ID.load(Ordering::Acquire);
        let candidate = if now > last { now } else { last + 1 };
        if LAST_ID
            .compare_exchange(last, candidate, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            return candidate;
        }
    }
}

/// Whether `id` falls inside the representable allocation window.
pub fn is_valid(id: i64) -> bool {
    id > MIN_VALID_ID && id <= now_ns()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_strictly_increasing() {
        let mut previous = next_id();
        for _ in 0..10_000 {
            let id = next_id();
            assert!(id > previous);
            previous = id;
        }
    }

    #[test]
    fn ids_fall_in_valid_window() {
        let id = next_id();
        assert!(is_valid(id), "id {id} outside valid window");
    }

    #[test]
    fn concurrent_allocation_never_collides() {
        let handles: Vec<_> = (0..8)
            .map(|_| std::thread::spawn(|| (0..2_000).map(|_| next_id()).collect::<Vec<_>>()))
            .collect();
        let mut all: Vec<i64> = handles
            .into_iter()
            .flat_map(|h| h.join().expect("thread"))
            .collect();
        let count = all.len();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), count);
    }
}
