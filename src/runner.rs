//! Composes [`Sampler`] and [`CIController`] into the per-benchmark loop.

use crate::allocator::AllocatorBridge;
use crate::ci::{CIController, CIReport, MIN_SAMPLE_SIZE};
use crate::error::{BenchError, DescribeError, Phase, SamplerError};
use crate::sample::SampleBuffer;
use crate::sampler::{CancelToken, Measured, NeverCancel, Sampler, TimedMeasured};

/// Validated options a benchmark runs with: `context`, `warmup`, `gc_step`,
/// `confidence_level`, `rciw`, plus a hard cap on adaptive resampling that
/// the host is free to set.
#[derive(Debug, Clone)]
pub struct BenchOptions {
    /// Freeform context string surfaced in reports (the `context` option).
    pub context: Option<String>,
    /// Warmup duration in seconds, applied only on the first iteration.
    pub warmup_seconds: u64,
    /// Allocator step policy (`-1` disabled, `0` full-GC-per-sample, `>0`
    /// step threshold in KiB).
    pub gc_step: i64,
    /// Confidence level, percent, in `(0, 100]`.
    pub confidence_level: f64,
    /// Target relative CI width, percent, in `(0, 100]`.
    pub rciw: f64,
    /// Upper bound on the sample count the controller may recommend.
    pub hard_cap: usize,
    /// Whether the runner may grow the buffer and resample based on the
    /// CIController's verdict. `false` reduces the loop to a single pass —
    /// the only mode compatible with `run_with_timer` (see
    /// [`crate::describe::DescribeError::TimerIncompatibleWithResampling`]
    /// in `describe.rs`), since the user, not the controller, decides what
    /// counts as one measured iteration.
    pub adaptive_resampling: bool,
}

impl Default for BenchOptions {
    fn default() -> Self {
        BenchOptions {
            context: None,
            warmup_seconds: 1,
            gc_step: -1,
            confidence_level: 95.0,
            rciw: 5.0,
            hard_cap: 1_000_000,
            adaptive_resampling: true,
        }
    }
}

/// Result of a completed benchmark run: the final buffer (for reporting or
/// further merging) and the controller's last decision.
pub struct RunOutcome {
    /// The buffer as it stood when the controller decided to stop.
    pub buffer: SampleBuffer,
    /// The controller's final verdict.
    pub report: CIReport,
}

/// Drives one benchmark's full lifecycle: `setup_once`/`setup`, the
/// Sampler/CIController loop, and `teardown`.
pub struct BenchmarkRunner<'a> {
    sampler: Sampler,
    controller: CIController,
    bridge: &'a dyn AllocatorBridge,
}

impl<'a> BenchmarkRunner<'a> {
    /// Construct a runner using the default [`Sampler`] and [`CIController`].
    pub fn new(bridge: &'a dyn AllocatorBridge) -> Self {
        BenchmarkRunner {
            sampler: Sampler::new(),
            controller: CIController::new(),
            bridge,
        }
    }

    /// Override the confidence-interval controller (e.g. to opt into
    /// [`CIController::with_legacy_fallback`]).
    pub fn with_controller(mut self, controller: CIController) -> Self {
        self.controller = controller;
        self
    }

    /// Run one benchmark to completion.
    ///
    /// `setup_once` runs before the first iteration; `setup` runs before
    /// every sampling pass (including the first, after `setup_once`).
    /// `teardown` always runs, even if setup or the sampling loop raised —
    /// its own failure supersedes whatever the sampling loop returned.
    #[allow(clippy::too_many_arguments)]
    pub fn run(
        &self,
        buffer_name: &str,
        options: &BenchOptions,
        mut setup_once: Option<&mut dyn FnMut() -> Result<(), String>>,
        mut setup: Option<&mut dyn FnMut() -> Result<(), String>>,
        measured: &mut dyn Measured,
        mut teardown: Option<&mut dyn FnMut() -> Result<(), String>>,
        cancel: Option<&dyn CancelToken>,
    ) -> Result<RunOutcome, BenchError> {
        let cancel = cancel.unwrap_or(&NeverCancel);
        let inner = self.run_inner(buffer_name, options, &mut setup_once, &mut setup, measured, cancel);

        if let Some(teardown_fn) = teardown.as_mut() {
            if let Err(message) = teardown_fn() {
                return Err(SamplerError::UserError {
                    phase: Phase::Teardown,
                    message,
                }
                .into());
            }
        }

        let (buffer, report) = inner?;
        Ok(RunOutcome { buffer, report })
    }

    /// As [`Self::run`], but drives a [`TimedMeasured`] closure built via
    /// [`crate::describe::DescribeBuilder::run_with_timer`]. This mode is
    /// incompatible with adaptive (RCIW-driven) resampling —
    /// `options.adaptive_resampling` must be
    /// `false` (the describe builder already enforces this at construction,
    /// so a `Describe` built from it always satisfies this); the loop runs
    /// exactly one sampling pass and reports whatever quality the
    /// controller observes, it never grows the buffer and resamples.
    #[allow(clippy::too_many_arguments)]
    pub fn run_timed(
        &self,
        buffer_name: &str,
        options: &BenchOptions,
        mut setup_once: Option<&mut dyn FnMut() -> Result<(), String>>,
        mut setup: Option<&mut dyn FnMut() -> Result<(), String>>,
        measured: &mut dyn TimedMeasured,
        mut teardown: Option<&mut dyn FnMut() -> Result<(), String>>,
        cancel: Option<&dyn CancelToken>,
    ) -> Result<RunOutcome, BenchError> {
        if options.adaptive_resampling {
            return Err(DescribeError::TimerIncompatibleWithResampling.into());
        }
        let cancel = cancel.unwrap_or(&NeverCancel);
        let inner =
            self.run_timed_inner(buffer_name, options, &mut setup_once, &mut setup, measured, cancel);

        if let Some(teardown_fn) = teardown.as_mut() {
            if let Err(message) = teardown_fn() {
                return Err(SamplerError::UserError {
                    phase: Phase::Teardown,
                    message,
                }
                .into());
            }
        }

        let (buffer, report) = inner?;
        Ok(RunOutcome { buffer, report })
    }

    fn run_timed_inner(
        &self,
        buffer_name: &str,
        options: &BenchOptions,
        setup_once: &mut Option<&mut dyn FnMut() -> Result<(), String>>,
        setup: &mut Option<&mut dyn FnMut() -> Result<(), String>>,
        measured: &mut dyn TimedMeasured,
        cancel: &dyn CancelToken,
    ) -> Result<(SampleBuffer, CIReport), BenchError> {
        if let Some(once) = setup_once.as_mut() {
            once()
                .map_err(|message| SamplerError::UserError {
                    phase: Phase::Setup,
                    message,
                })
                .map_err(BenchError::from)?;
        }

        let mut buffer = SampleBuffer::new(
            buffer_name,
            MIN_SAMPLE_SIZE as i64,
            options.gc_step,
            options.confidence_level,
            options.rciw,
        )?;

        if let Some(setup_fn) = setup.as_mut() {
            setup_fn()
                .map_err(|message| SamplerError::UserError {
                    phase: Phase::Setup,
                    message,
                })
                .map_err(BenchError::from)?;
        }

        self.sampler.run_with_timer(
            measured,
            &mut buffer,
            options.warmup_seconds,
            true,
            self.bridge,
            cancel,
        )?;

        let controller = self.controller.with_hard_cap(options.hard_cap);
        let report = controller.decide(&buffer);
        Ok((buffer, report))
    }

    fn run_inner(
        &self,
        buffer_name: &str,
        options: &BenchOptions,
        setup_once: &mut Option<&mut dyn FnMut() -> Result<(), String>>,
        setup: &mut Option<&mut dyn FnMut() -> Result<(), String>>,
        measured: &mut dyn Measured,
        cancel: &dyn CancelToken,
    ) -> Result<(SampleBuffer, CIReport), BenchError> {
        if let Some(once) = setup_once.as_mut() {
            once()
                .map_err(|message| SamplerError::UserError {
                    phase: Phase::Setup,
                    message,
                })
                .map_err(BenchError::from)?;
        }

        let mut buffer = SampleBuffer::new(
            buffer_name,
            MIN_SAMPLE_SIZE as i64,
            options.gc_step,
            options.confidence_level,
            options.rciw,
        )?;

        let controller = self.controller.with_hard_cap(options.hard_cap);
        let mut iteration = 0usize;
        loop {
            iteration += 1;
            if let Some(setup_fn) = setup.as_mut() {
                setup_fn()
                    .map_err(|message| SamplerError::UserError {
                        phase: Phase::Setup,
                        message,
                    })
                    .map_err(BenchError::from)?;
            }

            let warmup = if iteration == 1 { options.warmup_seconds } else { 0 };
            let clear_first = iteration == 1;
            self.sampler
                .run(measured, &mut buffer, warmup, clear_first, self.bridge, cancel)?;

            let report = controller.decide(&buffer);
            if !options.adaptive_resampling {
                return Ok((buffer, report));
            }
            match report.resample_size {
                None => return Ok((buffer, report)),
                Some(target) => {
                    let additional = target.saturating_sub(buffer.capacity());
                    if additional == 0 {
                        return Ok((buffer, report));
                    }
                    buffer.grow(additional);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::{AllocatorBridge, TuningSnapshot};
    use crate::clock::Clock;
    use std::cell::Cell;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    struct StepClock {
        step_ns: u64,
        current: AtomicU64,
    }
    impl Clock for StepClock {
        fn now_ns(&self) -> Result<u64, SamplerError> {
            Ok(self.current.fetch_add(self.step_ns, Ordering::Relaxed))
        }
    }

    /// A clock that alternates between two elapsed durations per sample, so
    /// the resulting buffer has non-zero variance.
    struct AlternatingClock {
        calls: AtomicU64,
    }
    impl Clock for AlternatingClock {
        fn now_ns(&self) -> Result<u64, SamplerError> {
            let call = self.calls.fetch_add(1, Ordering::Relaxed);
            if call % 2 == 0 {
                Ok(0)
            } else {
                let pair = call / 2;
                Ok(if pair % 2 == 0 { 1_000_000 } else { 10_000_000 })
            }
        }
    }

    struct NoopBridge;
    impl AllocatorBridge for NoopBridge {
        fn heap_kb(&self) -> usize {
            0
        }
        fn collect_full(&self) {}
        fn stop(&self) {}
        fn restart(&self) {}
        fn step(&self, _kb: i64) {}
        fn save_tuning(&self) -> TuningSnapshot {
            TuningSnapshot::default()
        }
        fn restore_tuning(&self, _snapshot: TuningSnapshot) {}
    }

    #[test]
    fn constant_time_body_stops_without_resampling() {
        let bridge = NoopBridge;
        let runner = BenchmarkRunner::new(&bridge).with_controller(CIController::new());
        let clock: Arc<dyn Clock> = Arc::new(StepClock {
            step_ns: 1_000_000,
            current: AtomicU64::new(0),
        });
        let runner = BenchmarkRunner {
            sampler: Sampler::with_clock(clock),
            ..runner
        };
        let options = BenchOptions {
            warmup_seconds: 0,
            ..BenchOptions::default()
        };
        let mut measured = |_warmup: bool| -> Result<(), String> { Ok(()) };
        let outcome = runner
            .run("constant", &options, None, None, &mut measured, None, None)
            .unwrap();
        assert_eq!(outcome.buffer.count(), MIN_SAMPLE_SIZE);
        assert_eq!(outcome.report.resample_size, None);
    }

    #[test]
    fn teardown_runs_even_when_setup_once_fails() {
        let bridge = NoopBridge;
        let runner = BenchmarkRunner::new(&bridge);
        let options = BenchOptions::default();
        let mut measured = |_warmup: bool| -> Result<(), String> { Ok(()) };
        let teardown_called = Cell::new(false);
        let mut setup_once_fail = || -> Result<(), String> { Err("setup blew up".to_string()) };
        let mut teardown = || -> Result<(), String> {
            teardown_called.set(true);
            Ok(())
        };
        let err = runner
            .run(
                "failing",
                &options,
                Some(&mut setup_once_fail),
                None,
                &mut measured,
                Some(&mut teardown),
                None,
            )
            .unwrap_err();
        assert!(matches!(
            err,
            BenchError::Sampler(SamplerError::UserError { phase: Phase::Setup, .. })
        ));
        assert!(teardown_called.get());
    }

    #[test]
    fn resample_size_respects_options_hard_cap() {
        let bridge = NoopBridge;
        let runner = BenchmarkRunner::new(&bridge);
        let clock: Arc<dyn Clock> = Arc::new(AlternatingClock {
            calls: AtomicU64::new(0),
        });
        let runner = BenchmarkRunner {
            sampler: Sampler::with_clock(clock),
            ..runner
        };
        let options = BenchOptions {
            warmup_seconds: 0,
            confidence_level: 95.0,
            rciw: 0.5,
            hard_cap: 150,
            ..BenchOptions::default()
        };
        let mut measured = |_warmup: bool| -> Result<(), String> { Ok(()) };
        let outcome = runner
            .run("capped", &options, None, None, &mut measured, None, None)
            .unwrap();
        assert_eq!(
            outcome.report.resample_size,
            None,
            "buffer should stop growing once it hits the configured hard cap"
        );
        assert!(
            outcome.buffer.capacity() <= options.hard_cap,
            "capacity {} exceeded configured hard_cap {}",
            outcome.buffer.capacity(),
            options.hard_cap
        );
    }

    #[test]
    fn run_timed_rejects_adaptive_resampling() {
        let bridge = NoopBridge;
        let runner = BenchmarkRunner::new(&bridge);
        let options = BenchOptions::default(); // adaptive_resampling: true
        let mut measured = |timer: &mut crate::sampler::Timer| -> Result<(), String> {
            timer.start().map_err(|e| e.to_string())?;
            timer.stop().map_err(|e| e.to_string())
        };
        let err = runner
            .run_timed("x", &options, None, None, &mut measured, None, None)
            .unwrap_err();
        assert!(matches!(
            err,
            BenchError::Describe(DescribeError::TimerIncompatibleWithResampling)
        ));
    }

    #[test]
    fn run_timed_runs_exactly_one_pass_and_honours_teardown() {
        let bridge = NoopBridge;
        let runner = BenchmarkRunner::new(&bridge);
        let clock: Arc<dyn Clock> = Arc::new(StepClock {
            step_ns: 1_000,
            current: AtomicU64::new(0),
        });
        let runner = BenchmarkRunner {
            sampler: Sampler::with_clock(clock),
            ..runner
        };
        let options = BenchOptions {
            warmup_seconds: 0,
            adaptive_resampling: false,
            ..BenchOptions::default()
        };
        let mut measured = |timer: &mut crate::sampler::Timer| -> Result<(), String> {
            timer.start().map_err(|e| e.to_string())?;
            timer.stop().map_err(|e| e.to_string())
        };
        let teardown_called = Cell::new(false);
        let mut teardown = || -> Result<(), String> {
            teardown_called.set(true);
            Ok(())
        };
        let outcome = runner
            .run_timed(
                "x",
                &options,
                None,
                None,
                &mut measured,
                Some(&mut teardown),
                None,
            )
            .unwrap();
        assert_eq!(outcome.buffer.count(), MIN_SAMPLE_SIZE);
        assert!(teardown_called.get());
    }

    #[test]
    fn teardown_failure_supersedes_sampling_result() {
        let bridge = NoopBridge;
        let runner = BenchmarkRunner::new(&bridge);
        let clock: Arc<dyn Clock> = Arc::new(StepClock {
            step_ns: 1_000_000,
            current: AtomicU64::new(0),
        });
        let runner = BenchmarkRunner {
            sampler: Sampler::with_clock(clock),
            ..runner
        };
        let options = BenchOptions {
            warmup_seconds: 0,
            ..BenchOptions::default()
        };
        let mut measured = |_warmup: bool| -> Result<(), String> { Ok(()) };
        let mut teardown = || -> Result<(), String> { Err("teardown failed".to_string()) };
        let err = runner
            .run("x", &options, None, None, &mut measured, Some(&mut teardown), None)
            .unwrap_err();
        assert!(matches!(
            err,
            BenchError::Sampler(SamplerError::UserError { phase: Phase::Teardown, .. })
        ));
    }
}
