//! Platform-specific helpers: clocks, memory advice and backoff

use crate::{Result, SharedMemoryError};
use std::time::Duration;

/// Milliseconds on the system-wide monotonic clock.
///
/// Every process on the host reads the same clock, so a heartbeat stamped by
/// the producer can be aged by any consumer.
pub fn monotonic_millis() -> u64 {
    match nix::time::clock_gettime(nix::time::ClockId::CLOCK_MONOTONIC) {
        Ok(ts) => ts.tv_sec() as u64 * 1000 + ts.tv_nsec() as u64 / 1_000_000,
        Err(_) => 0,
    }
}

/// Platform utilities
pub struct PlatformUtils;

impl PlatformUtils {
    /// Generate a unique name for a short-lived POSIX shm object.
    ///
    /// Kept under 31 bytes, the shortest limit among supported platforms.
    pub fn generate_region_name(prefix: &str) -> String {
        let id = uuid::Uuid::new_v4().simple().to_string();
        let mut name = format!("/{}-{}", prefix, id);
        name.truncate(30);
        name
    }
}

/// Platform-specific optimizations
pub struct PlatformOptimizations;

impl PlatformOptimizations {
    /// Ask the kernel to fault the mapping in ahead of first use
    pub fn advise_will_need(ptr: *mut u8, size: usize) -> Result<()> {
        unsafe {
            nix::sys::mman::madvise(
                ptr as *mut std::ffi::c_void,
                size,
                nix::sys::mman::MmapAdvise::MADV_WILLNEED,
            )
        }
        .map_err(|e| SharedMemoryError::Platform(format!("madvise failed: {}", e)))
    }
}

/// Spin, then yield, then sleep.
///
/// Used by consumer loops that poll the write cursor: an idle loop first
/// spins to catch frames within microseconds, then yields the CPU, then backs
/// off to short sleeps capped at `max_sleep`.
#[derive(Debug, Clone)]
pub struct SpinBackoff {
    step: u32,
    spin_limit: u32,
    yield_limit: u32,
    max_sleep: Duration,
}

impl SpinBackoff {
    pub fn new(spin_limit: u32, max_sleep: Duration) -> Self {
        Self {
            step: 0,
            spin_limit,
            yield_limit: spin_limit.saturating_mul(2),
            max_sleep,
        }
    }

    /// Wait a little longer than last time
    pub fn snooze(&mut self) {
        if self.step < self.spin_limit {
            for _ in 0..(1u32 << self.step.min(6)) {
                std::hint::spin_loop();
            }
        } else if self.step < self.yield_limit {
            std::thread::yield_now();
        } else {
            let exponent = (self.step - self.yield_limit).min(10);
            let sleep = Duration::from_micros(10u64 << exponent).min(self.max_sleep);
            std::thread::sleep(sleep);
        }
        self.step = self.step.saturating_add(1);
    }

    /// Work arrived; go back to spinning
    pub fn reset(&mut self) {
        self.step = 0;
    }

    /// Whether the backoff has reached the sleeping phase
    pub fn is_sleeping(&self) -> bool {
        self.step >= self.yield_limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monotonic_clock_advances() {
        let first = monotonic_millis();
        std::thread::sleep(Duration::from_millis(5));
        let second = monotonic_millis();
        assert!(first > 0);
        assert!(second >= first + 4);
    }

    #[test]
    fn test_region_names_are_short_and_unique() {
        let a = PlatformUtils::generate_region_name("vitals");
        let b = PlatformUtils::generate_region_name("vitals");
        assert!(a.starts_with("/vitals-"));
        assert!(a.len() <= 30);
        assert_ne!(a, b);
    }

    #[test]
    fn test_backoff_phases() {
        let mut backoff = SpinBackoff::new(4, Duration::from_micros(200));
        for _ in 0..8 {
            assert!(!backoff.is_sleeping());
            backoff.snooze();
        }
        assert!(backoff.is_sleeping());
        backoff.snooze();

        backoff.reset();
        assert!(!backoff.is_sleeping());
    }
}
