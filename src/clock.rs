//! Monotonic timing source.
//!
//! A single operation, `now_ns`, backed by `CLOCK_MONOTONIC_RAW` on platforms
//! that expose it (Linux) and falling back to `std::time::Instant` elsewhere.
//! `CLOCK_MONOTONIC_RAW` is not subject to NTP slewing, unlike
//! `CLOCK_MONOTONIC`, so timings stay unaffected by clock adjustments.

use crate::error::SamplerError;

/// A monotonic, non-adjustable nanosecond time source.
///
/// Implementations must return strictly non-decreasing values across two
/// successive calls on the same thread. A failure to read the clock is
/// fatal — there is no recovery path, so the benchmark run aborts.
pub trait Clock: Send + Sync {
    /// Returns the current time in nanoseconds since an arbitrary epoch.
    fn now_ns(&self) -> Result<u64, SamplerError>;
}

/// Default [`Clock`] implementation.
///
/// On Linux this reads `CLOCK_MONOTONIC_RAW` directly via `libc`. Other
/// platforms fall back to `std::time::Instant` pinned against a
/// process-start epoch.
#[derive(Debug, Default, Clone, Copy)]
pub struct MonotonicClock;

impl MonotonicClock {
    /// Construct a new monotonic clock.
    pub fn new() -> Self {
        MonotonicClock
    }
}

#[cfg(target_os = "linux")]
impl Clock for MonotonicClock {
    fn now_ns(&self) -> Result<u64, SamplerError> {
        // SAFETY: `ts` is a plain-old-data struct fully initialized by
        // `clock_gettime` before use; the syscall has no side effects beyond
        // writing to `ts`.
        let mut ts: libc::timespec = unsafe { std::mem::zeroed() };
        let rc = unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC_RAW, &mut ts) };
        if rc != 0 {
            return Err(SamplerError::ClockFailure(format!(
                "clock_gettime(CLOCK_MONOTONIC_RAW) failed: {}",
                std::io::Error::last_os_error()
            )));
        }
        let secs = ts.tv_sec as i128;
        let nanos = ts.tv_nsec as i128;
        let total = secs * 1_000_000_000 + nanos;
        u64::try_from(total)
            .map_err(|_| SamplerError::ClockFailure("clock reading underflowed u64".into()))
    }
}

#[cfg(not(target_os = "linux"))]
impl Clock for MonotonicClock {
    fn now_ns(&self) -> Result<u64, SamplerError> {
        use std::sync::OnceLock;
        use std::time::Instant;
        static START: OnceLock<Instant> = OnceLock::new();
        let start = *START.get_or_init(Instant::now);
        Ok(start.elapsed().as_nanos() as u64)
    }
}
