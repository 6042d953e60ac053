//! Drives warmup and measurement over a [`SampleBuffer`].

use crate::allocator::AllocatorBridge;
use crate::clock::{Clock, MonotonicClock};
use crate::error::{Phase, SamplerError};
use crate::sample::SampleBuffer;
use std::sync::Arc;

/// One iteration under measurement. `is_warmup` is `true` during the
/// warmup loop and `false` during the sampling loop; the closure's return
/// value is the user error (if any), tagged with the phase it failed in by
/// the caller.
pub trait Measured {
    /// Run one iteration.
    fn call(&mut self, is_warmup: bool) -> Result<(), String>;
}

impl<F> Measured for F
where
    F: FnMut(bool) -> Result<(), String>,
{
    fn call(&mut self, is_warmup: bool) -> Result<(), String> {
        self(is_warmup)
    }
}

/// User-gated timer passed into a [`TimedMeasured`] closure under
/// `run_with_timer`. Lets the closure exclude setup/verification code
/// surrounding the region it actually wants measured.
///
/// If the closure returns without a matching `stop()` for its last
/// `start()`, the open interval is closed automatically at the point of
/// return — it neither hangs nor silently drops that interval, it counts up
/// to the closure's return.
pub struct Timer {
    clock: Arc<dyn Clock>,
    running_since: Option<u64>,
    elapsed_ns: u64,
}

impl Timer {
    fn new(clock: Arc<dyn Clock>) -> Self {
        Timer {
            clock,
            running_since: None,
            elapsed_ns: 0,
        }
    }

    /// Start (or resume) timing. Calling `start` while already running is a
    /// no-op.
    pub fn start(&mut self) -> Result<(), SamplerError> {
        if self.running_since.is_none() {
            self.running_since = Some(self.clock.now_ns()?);
        }
        Ok(())
    }

    /// Stop timing, folding the elapsed interval since the last `start()`
    /// into the accumulated total. Calling `stop` while not running is a
    /// no-op.
    pub fn stop(&mut self) -> Result<(), SamplerError> {
        if let Some(started) = self.running_since.take() {
            let now = self.clock.now_ns()?;
            self.elapsed_ns = self.elapsed_ns.saturating_add(now.saturating_sub(started));
        }
        Ok(())
    }

    fn close(&mut self) -> Result<u64, SamplerError> {
        self.stop()?;
        Ok(self.elapsed_ns)
    }
}

/// One iteration under measurement in `run_with_timer` mode: the closure
/// receives a [`Timer`] it starts/stops around the sub-region it wants
/// attributed to the sample.
pub trait TimedMeasured {
    /// Run one iteration, gating measured time via `timer`.
    fn call(&mut self, timer: &mut Timer) -> Result<(), String>;
}

impl<F> TimedMeasured for F
where
    F: FnMut(&mut Timer) -> Result<(), String>,
{
    fn call(&mut self, timer: &mut Timer) -> Result<(), String> {
        self(timer)
    }
}

/// Cooperative cancellation token, checked only between samples. Not
/// required to be `Send`/`Sync`: the measurement loop is single-threaded, so
/// the token only ever needs to be read on the sampling thread.
pub trait CancelToken {
    /// Returns `true` if the run should stop at the next opportunity.
    fn is_cancelled(&self) -> bool;
}

/// A token that never cancels, used when the caller has no cancellation
/// source.
#[derive(Debug, Default, Clone, Copy)]
pub struct NeverCancel;

impl CancelToken for NeverCancel {
    fn is_cancelled(&self) -> bool {
        false
    }
}

/// Drives a measured function through warmup and a sampling pass.
pub struct Sampler {
    clock: Arc<dyn Clock>,
}

impl Default for Sampler {
    fn default() -> Self {
        Self::new()
    }
}

impl Sampler {
    /// Construct a sampler backed by the default monotonic clock.
    pub fn new() -> Self {
        Sampler {
            clock: Arc::new(MonotonicClock::new()),
        }
    }

    /// Construct a sampler backed by an explicit clock (used by tests, and
    /// by any caller driving a warmup loop against a non-default time
    /// source).
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Sampler { clock }
    }

    /// Run `measured` against `buffer`: optionally clear the buffer, hand
    /// allocator control to the buffer for the duration of the run, warm up
    /// for `warmup_seconds`, then sample until `buffer` reaches its current
    /// capacity or cancellation/a user error interrupts the run.
    ///
    /// `postprocess` always runs, even when `measured` or cancellation
    /// terminates the loop early.
    pub fn run(
        &self,
        measured: &mut dyn Measured,
        buffer: &mut SampleBuffer,
        warmup_seconds: u64,
        clear_first: bool,
        bridge: &dyn AllocatorBridge,
        cancel: &dyn CancelToken,
    ) -> Result<(), SamplerError> {
        if clear_first {
            buffer.clear();
        }
        buffer.preprocess(bridge);
        log::debug!(
            "sampling {}: warmup={warmup_seconds}s capacity={}",
            buffer.name(),
            buffer.capacity()
        );

        let result = self.run_inner(measured, buffer, warmup_seconds, bridge, cancel);
        if let Err(ref e) = result {
            log::warn!("sampling {} interrupted: {e}", buffer.name());
        }

        buffer.postprocess(bridge);
        result
    }

    /// As [`Self::run`], but drives a [`TimedMeasured`] closure: the
    /// closure receives a [`Timer`] it starts/stops around the sub-region
    /// it wants measured, instead of the whole call being timed.
    ///
    /// This mode is incompatible with adaptive (RCIW-driven) resampling —
    /// the caller decides what counts as one iteration by how it gates the
    /// timer, so a controller-driven "collect more samples" verdict cannot
    /// be reconciled with it. Callers enforce this at the
    /// `BenchmarkRunner`/describe-builder layer via
    /// [`crate::error::DescribeError::TimerIncompatibleWithResampling`];
    /// the Sampler itself has no opinion on resampling.
    pub fn run_with_timer(
        &self,
        measured: &mut dyn TimedMeasured,
        buffer: &mut SampleBuffer,
        warmup_seconds: u64,
        clear_first: bool,
        bridge: &dyn AllocatorBridge,
        cancel: &dyn CancelToken,
    ) -> Result<(), SamplerError> {
        if clear_first {
            buffer.clear();
        }
        buffer.preprocess(bridge);
        log::debug!(
            "sampling {} (timed): warmup={warmup_seconds}s capacity={}",
            buffer.name(),
            buffer.capacity()
        );

        let result = self.run_with_timer_inner(measured, buffer, warmup_seconds, bridge, cancel);
        if let Err(ref e) = result {
            log::warn!("timed sampling {} interrupted: {e}", buffer.name());
        }

        buffer.postprocess(bridge);
        result
    }

    fn run_with_timer_inner(
        &self,
        measured: &mut dyn TimedMeasured,
        buffer: &mut SampleBuffer,
        warmup_seconds: u64,
        bridge: &dyn AllocatorBridge,
        cancel: &dyn CancelToken,
    ) -> Result<(), SamplerError> {
        if warmup_seconds > 0 {
            let budget_ns = warmup_seconds.saturating_mul(1_000_000_000);
            let t0 = self.clock.now_ns()?;
            loop {
                let elapsed = self.clock.now_ns()?.saturating_sub(t0);
                if elapsed >= budget_ns {
                    break;
                }
                let mut timer = Timer::new(self.clock.clone());
                measured.call(&mut timer).map_err(|message| SamplerError::UserError {
                    phase: Phase::Run,
                    message,
                })?;
            }
            log::debug!("warmup complete for {}", buffer.name());
        }

        while buffer.count() < buffer.capacity() {
            buffer.init_sample(bridge)?;
            let mut timer = Timer::new(self.clock.clone());
            let call_result = measured.call(&mut timer);
            let elapsed_ns = timer.close()?;
            buffer.update_sample_with_elapsed(bridge, elapsed_ns)?;
            if let Err(message) = call_result {
                return Err(SamplerError::UserError {
                    phase: Phase::Run,
                    message,
                });
            }
            if cancel.is_cancelled() {
                log::debug!("cancellation observed at n={}", buffer.count());
                return Err(SamplerError::Cancelled);
            }
        }
        Ok(())
    }

    fn run_inner(
        &self,
        measured: &mut dyn Measured,
        buffer: &mut SampleBuffer,
        warmup_seconds: u64,
        bridge: &dyn AllocatorBridge,
        cancel: &dyn CancelToken,
    ) -> Result<(), SamplerError> {
        if warmup_seconds > 0 {
            let budget_ns = warmup_seconds.saturating_mul(1_000_000_000);
            let t0 = self.clock.now_ns()?;
            loop {
                let elapsed = self.clock.now_ns()?.saturating_sub(t0);
                if elapsed >= budget_ns {
                    break;
                }
                measured.call(true).map_err(|message| SamplerError::UserError {
                    phase: Phase::Run,
                    message,
                })?;
            }
            log::debug!("warmup complete for {}", buffer.name());
        }

        while buffer.count() < buffer.capacity() {
            buffer.init_sample(bridge)?;
            let call_result = measured.call(false);
            // The sample slot is finalised regardless of the call outcome,
            // for timing consistency, then the error (if any) surfaces.
            buffer.update_sample(bridge)?;
            if let Err(message) = call_result {
                return Err(SamplerError::UserError {
                    phase: Phase::Run,
                    message,
                });
            }
            if cancel.is_cancelled() {
                log::debug!("cancellation observed at n={}", buffer.count());
                return Err(SamplerError::Cancelled);
            }
        }
        Ok(())
    }
}
