//! Leveled, timestamped logging to stderr.
//!
//! A crate-local type implementing `log::Log` directly rather than pulling
//! in `env_logger`. There is no background thread or disk persistence — the
//! measurement loop is single-threaded and synchronous, so every log line is
//! written inline, before the caller continues.

use log::{Level, LevelFilter, Log, Metadata, Record};
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};

static INITIALIZED: AtomicBool = AtomicBool::new(false);

/// A `log::Log` implementation that writes leveled, timestamped lines to
/// stderr.
pub struct StderrLogger {
    level: LevelFilter,
}

impl StderrLogger {
    /// Construct a logger at the given level filter.
    pub fn new(level: LevelFilter) -> Self {
        StderrLogger { level }
    }
}

impl Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let timestamp = chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f");
        let level = color_tag(record.level());
        let mut stderr = std::io::stderr();
        let _ = writeln!(
            stderr,
            "{timestamp} {level} {target}: {args}",
            target = record.target(),
            args = record.args()
        );
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

fn color_tag(level: Level) -> &'static str {
    match level {
        Level::Error => "ERROR",
        Level::Warn => "WARN ",
        Level::Info => "INFO ",
        Level::Debug => "DEBUG",
        Level::Trace => "TRACE",
    }
}

/// Install a [`StderrLogger`] as the global logger, at the given level.
/// Safe to call more than once; only the first call takes effect.
pub fn init(level: LevelFilter) {
    if INITIALIZED.swap(true, Ordering::SeqCst) {
        return;
    }
    let logger = Box::new(StderrLogger::new(level));
    if log::set_boxed_logger(logger).is_ok() {
        log::set_max_level(level);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enabled_respects_level_filter() {
        let logger = StderrLogger::new(LevelFilter::Warn);
        assert!(logger.enabled(&log::Metadata::builder().level(Level::Error).build()));
        assert!(logger.enabled(&log::Metadata::builder().level(Level::Warn).build()));
        assert!(!logger.enabled(&log::Metadata::builder().level(Level::Info).build()));
    }

    #[test]
    fn init_is_idempotent() {
        init(LevelFilter::Info);
        init(LevelFilter::Trace);
    }
}
