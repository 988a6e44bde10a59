//! Admission gate between the render cadence and inference cost.

use std::time::{Duration, Instant};

/// Default minimum spacing between inference passes
pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_millis(100);

/// Whether a new frame may be handed to the worker.
///
/// Admits when at least `min_interval` has passed since the last inference
/// (equality admits), or when no inference has run yet.
pub fn should_admit(now: Instant, last_inference: Option<Instant>, min_interval: Duration) -> bool {
    match last_inference {
        None => true,
        Some(last) => now.saturating_duration_since(last) >= min_interval,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_frame_admitted() {
        assert!(should_admit(Instant::now(), None, DEFAULT_MIN_INTERVAL));
    }

    #[test]
    fn test_interval_boundaries() {
        let last = Instant::now();
        let min = Duration::from_millis(150);

        for elapsed_ms in [0u64, 1, 50, 149] {
            let now = last + Duration::from_millis(elapsed_ms);
            assert!(!should_admit(now, Some(last), min), "{elapsed_ms}ms");
        }
        for elapsed_ms in [150u64, 151, 1_000] {
            let now = last + Duration::from_millis(elapsed_ms);
            assert!(should_admit(now, Some(last), min), "{elapsed_ms}ms");
        }
    }

    #[test]
    fn test_zero_interval_always_admits() {
        let last = Instant::now();
        assert!(should_admit(last, Some(last), Duration::ZERO));
    }

    #[test]
    fn test_clock_behind_last_inference() {
        // a stale `now` saturates to zero elapsed instead of panicking
        let now = Instant::now();
        let last = now + Duration::from_millis(10);
        assert!(!should_admit(now, Some(last), DEFAULT_MIN_INTERVAL));
    }
}
