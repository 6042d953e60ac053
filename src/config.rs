//! Project-level default options, loaded from an optional `benchkit.toml`.
//!
//! A plain read/parse/validate shape, using `toml` rather than
//! `serde_json` since this is a human-edited project file rather than a
//! machine-written settings blob. Loading a config file is pure ambient
//! convenience: it changes no
//! measurement semantics, and a benchmark that sets its own
//! [`crate::runner::BenchOptions`] is unaffected by its absence.

use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::error::BenchError;
use crate::runner::BenchOptions;

/// Default filename searched for by [`ProjectConfig::discover`].
pub const DEFAULT_CONFIG_FILENAME: &str = "benchkit.toml";

/// Project-level defaults overlaid under a benchmark's own options.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProjectConfig {
    /// Default confidence level, percent.
    pub confidence_level: Option<f64>,
    /// Default target relative CI width, percent.
    pub rciw: Option<f64>,
    /// Default warmup duration, seconds.
    pub warmup_seconds: Option<u64>,
    /// Default allocator step policy.
    pub gc_step: Option<i64>,
    /// Hard cap on adaptive resampling.
    pub hard_cap: Option<usize>,
}

impl ProjectConfig {
    /// Parse a `benchkit.toml` file at `path`.
    pub fn load(path: &Path) -> Result<Self, BenchError> {
        let content = fs::read_to_string(path)
            .map_err(|e| BenchError::Config(format!("failed to read {}: {e}", path.display())))?;
        toml::from_str(&content)
            .map_err(|e| BenchError::Config(format!("failed to parse {}: {e}", path.display())))
    }

    /// Search `dir` (non-recursively) for [`DEFAULT_CONFIG_FILENAME`] and
    /// load it if present; returns `Ok(None)` if the file does not exist.
    pub fn discover(dir: &Path) -> Result<Option<Self>, BenchError> {
        let candidate = dir.join(DEFAULT_CONFIG_FILENAME);
        if !candidate.is_file() {
            return Ok(None);
        }
        Ok(Some(Self::load(&candidate)?))
    }

    /// Overlay per-benchmark `options` on top of these project defaults:
    /// any field `options` left at [`BenchOptions::default`] is replaced by
    /// the project value, when one is configured. A benchmark that sets its
    /// own value always wins.
    pub fn merged(&self, options: BenchOptions) -> BenchOptions {
        let defaults = BenchOptions::default();
        BenchOptions {
            context: options.context,
            warmup_seconds: if options.warmup_seconds == defaults.warmup_seconds {
                self.warmup_seconds.unwrap_or(options.warmup_seconds)
            } else {
                options.warmup_seconds
            },
            gc_step: if options.gc_step == defaults.gc_step {
                self.gc_step.unwrap_or(options.gc_step)
            } else {
                options.gc_step
            },
            confidence_level: if options.confidence_level == defaults.confidence_level {
                self.confidence_level.unwrap_or(options.confidence_level)
            } else {
                options.confidence_level
            },
            rciw: if options.rciw == defaults.rciw {
                self.rciw.unwrap_or(options.rciw)
            } else {
                options.rciw
            },
            hard_cap: if options.hard_cap == defaults.hard_cap {
                self.hard_cap.unwrap_or(options.hard_cap)
            } else {
                options.hard_cap
            },
            adaptive_resampling: options.adaptive_resampling,
        }
    }
}
