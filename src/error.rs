//! Unified error type hierarchy for the measurement engine.
//!
//! Mirrors the shape used throughout the rest of this crate's ambient stack:
//! one `thiserror` enum per concern, plus a top-level [`BenchError`] that
//! every public, fallible operation in the crate ultimately returns.

use thiserror::Error;

/// Errors raised while constructing, restoring, or mutating a
/// [`crate::sample::SampleBuffer`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BufferError {
    /// `capacity` was not a positive integer.
    #[error("capacity must be > 0, got {0}")]
    InvalidCapacity(i64),

    /// `name` exceeded the 255-byte limit.
    #[error("name exceeds 255 bytes ({0} bytes)")]
    NameTooLong(usize),

    /// `cl` (confidence level) was outside `(0, 100]`.
    #[error("confidence level must be in (0, 100], got {0}")]
    InvalidConfidenceLevel(f64),

    /// `rciw` (target relative CI width) was outside `(0, 100]`.
    #[error("target rciw must be in (0, 100], got {0}")]
    InvalidRciw(f64),

    /// The buffer is already full; a programmer error (the caller should
    /// respect `capacity()` before sampling).
    #[error("buffer at capacity ({0} records); call grow() before sampling further")]
    NoSpace(usize),

    /// A restored dump failed a field-wise consistency check.
    #[error("dump inconsistent: {0}")]
    InconsistentDump(String),
}

/// Phase tag carried by [`SamplerError::UserError`] and
/// [`DescribeError::UserError`], so the failing phase is encoded in the
/// error rather than inferred from a stack trace.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// `before_all` lifecycle hook.
    #[error("before_all")]
    BeforeAll,
    /// `before_each` lifecycle hook.
    #[error("before_each")]
    BeforeEach,
    /// `setup` or `setup_once`.
    #[error("setup")]
    Setup,
    /// The measured function body (`run` / `run_with_timer`).
    #[error("run")]
    Run,
    /// `teardown`.
    #[error("teardown")]
    Teardown,
    /// `after_each` lifecycle hook.
    #[error("after_each")]
    AfterEach,
    /// `after_all` lifecycle hook.
    #[error("after_all")]
    AfterAll,
}

/// Errors raised while a [`crate::sampler::Sampler`] drives a measured
/// function.
#[derive(Error, Debug)]
pub enum SamplerError {
    /// The measured function (or a lifecycle hook) raised an error.
    #[error("{phase}: {message}")]
    UserError {
        /// Which phase of the lifecycle raised the error.
        phase: Phase,
        /// The user-supplied message.
        message: String,
    },

    /// Cooperative cancellation was observed between samples.
    #[error("benchmark cancelled")]
    Cancelled,

    /// The monotonic clock failed to produce a reading. Fatal: there is no
    /// recovery path, the benchmark run is aborted.
    #[error("monotonic clock failure: {0}")]
    ClockFailure(String),

    /// The buffer ran out of space mid-run; propagated from [`BufferError`].
    #[error(transparent)]
    Buffer(#[from] BufferError),
}

/// Errors raised by the fluent `Describe`/`Spec` builder surface while
/// validating its state-transition lattice.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DescribeError {
    /// `options` was set more than once, or after `setup`/`run`/`teardown`.
    #[error("options() may be set at most once, and must precede setup/run/teardown")]
    OptionsMisplaced,

    /// Neither, or both, of `setup`/`setup_once` were supplied.
    #[error("exactly one of setup() or setup_once() is required")]
    SetupArity,

    /// Neither, or both, of `run`/`run_with_timer` were supplied.
    #[error("exactly one of run() or run_with_timer() is required")]
    RunArity,

    /// `teardown` was registered before `run`/`run_with_timer`.
    #[error("teardown() must follow run()/run_with_timer()")]
    TeardownMisplaced,

    /// `run_with_timer` was combined with RCIW-driven adaptive resampling.
    /// A caller-supplied timer reports only the measured interval, not the
    /// raw iteration count the resampling controller needs to decide when
    /// to stop, so the combination is rejected outright rather than guessed
    /// at.
    #[error("run_with_timer() cannot be combined with adaptive (rciw-driven) resampling")]
    TimerIncompatibleWithResampling,

    /// A hook or describe raised a user error outside the sampling path
    /// (e.g. during `before_all`).
    #[error("{phase}: {message}")]
    UserError {
        /// Which phase raised the error.
        phase: Phase,
        /// The user-supplied message.
        message: String,
    },
}

/// Errors raised while discovering or loading benchmark files.
#[derive(Error, Debug)]
pub enum LoaderError {
    /// No files matching `*_bench.<ext>` were found under the given path.
    #[error("no benchmark files found under {0}")]
    NoFilesFound(String),

    /// The path did not exist or could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        /// The path that failed to load.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A dynamic benchmark module failed to load or did not export the
    /// expected registration symbol.
    #[error("failed to load benchmark module {path}: {message}")]
    Module {
        /// The module path that failed to load.
        path: String,
        /// Description of the failure.
        message: String,
    },
}

/// Top-level error type for all fallible benchkit operations.
#[derive(Error, Debug)]
pub enum BenchError {
    /// Constructor/option validation failure. Recoverable by the caller.
    #[error(transparent)]
    InvalidArgument(#[from] BufferError),

    /// The measured function, a hook, or setup/teardown raised.
    #[error(transparent)]
    Sampler(#[from] SamplerError),

    /// The describe/spec builder surface was used out of order.
    #[error(transparent)]
    Describe(#[from] DescribeError),

    /// Benchmark file discovery/loading failed.
    #[error(transparent)]
    Loader(#[from] LoaderError),

    /// Configuration file parsing failed.
    #[error("configuration error: {0}")]
    Config(String),
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, BenchError>;
