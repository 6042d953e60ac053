//! benchkit
//!
//! A statistically controlled micro-benchmark measurement engine: a
//! benchmark body runs many times under a monotonic clock, its samples
//! accumulate into online (Welford) statistics, and an adaptive controller
//! keeps resampling until the relative confidence interval width (RCIW)
//! narrows past a target or a hard cap is hit.
//!
//! The crate is organized into functional modules:
//! - **error**: unified error type hierarchy
//! - **clock**: monotonic nanosecond timing
//! - **allocator**: allocator/collector coordination for memory sampling
//! - **sample**: online statistics buffer (mean, variance, percentiles)
//! - **sampler**: warmup + measurement driver
//! - **ci**: adaptive confidence-interval controller
//! - **runner**: composes sampler + controller + allocator bridge into a run
//! - **describe**: builder surface for declaring a benchmark
//! - **config**: project-level default overrides (`benchkit.toml`)
//! - **loader**: discovery and dynamic loading of compiled benchmark files
//! - **report**: Markdown rendering of run results
//! - **system_info**: host probe included in every report
//! - **logging**: `log::Log` implementation used by the CLI
//! - **realtime** (feature `realtime`): best-effort real-time thread prep

#![allow(dead_code)]

pub mod error;

pub mod clock;

pub mod allocator;

pub mod sample;

pub mod sampler;

pub mod ci;

pub mod runner;

pub mod describe;

pub mod config;

pub mod loader;

pub mod report;

pub mod system_info;

pub mod logging;

#[cfg(feature = "realtime")]
pub mod realtime;

// ============================================================================
// PUBLIC RE-EXPORTS FOR CONVENIENCE
// ============================================================================

// Re-export error types for easy access
pub use error::{BenchError, BufferError, DescribeError, LoaderError, Phase, Result, SamplerError};

// Re-export clock types
pub use clock::{Clock, MonotonicClock};

// Re-export allocator bridge types
pub use allocator::{
    AllocatorBridge, CountingAllocator, CountingAllocatorBridge, RssAllocatorBridge, TuningSnapshot,
};

// Re-export the statistics buffer
pub use sample::{Dump, MemStat, SampleBuffer, SampleRecord};

// Re-export the measurement driver
pub use sampler::{CancelToken, Measured, NeverCancel, Sampler, TimedMeasured, Timer};

// Re-export the confidence-interval controller
pub use ci::{CIController, CIReport, Quality, MIN_SAMPLE_SIZE};

// Re-export the composed runner
pub use runner::{BenchOptions, BenchmarkRunner, RunOutcome};

// Re-export the describe builder surface
pub use describe::{
    Describe, DescribeBuilder, Hooks, HooksBuilder, RunBody, Setup, Spec, SpecBuilder,
};

// Re-export project configuration
pub use config::ProjectConfig;

// Re-export loader utilities
pub use loader::{discover, load, LoadedModule};

// Re-export report rendering
pub use report::{all_completed_without_errors, render, BenchResult, FileReport};

// Re-export the system-info probe
pub use system_info::SystemInfo;

/// Library version, surfaced in every rendered report via [`SystemInfo`].
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_constant_is_non_empty() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_error_reexport() {
        let _: Result<i32> = Ok(42);
    }

    #[test]
    fn test_sample_buffer_reexport_constructible() {
        let buffer = SampleBuffer::new("smoke", 10, -1, 95.0, 5.0);
        assert!(buffer.is_ok());
    }
}
