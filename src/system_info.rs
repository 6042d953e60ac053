//! System-info probe: CLI reports begin with a fenced `sysinfo` block
//! describing the host the benchmarks ran on.
//!
//! Reads through the `sysinfo` crate rather than hand-parsing
//! `/proc/cpuinfo`, since this probe only needs to run once per CLI
//! invocation.

use serde::Serialize;
use sysinfo::System;

/// A snapshot of the host the benchmarks ran on.
#[derive(Debug, Clone, Serialize)]
pub struct SystemInfo {
    /// CPU model string (first detected core's brand).
    pub cpu_model: String,
    /// Number of logical cores.
    pub logical_cores: usize,
    /// Total system memory, in KiB.
    pub total_memory_kb: u64,
    /// OS name (e.g. `"Linux"`).
    pub os_name: String,
    /// Kernel/OS release version.
    pub os_version: String,
    /// `benchkit`'s own crate version.
    pub benchkit_version: &'static str,
}

impl SystemInfo {
    /// Probe the current host.
    pub fn probe() -> Self {
        let mut system = System::new_all();
        system.refresh_all();

        let cpu_model = system
            .cpus()
            .first()
            .map(|cpu| cpu.brand().to_string())
            .unwrap_or_else(|| "unknown".to_string());

        SystemInfo {
            cpu_model,
            logical_cores: system.cpus().len(),
            total_memory_kb: system.total_memory() / 1024,
            os_name: System::name().unwrap_or_else(|| "unknown".to_string()),
            os_version: System::os_version().unwrap_or_else(|| "unknown".to_string()),
            benchkit_version: crate::VERSION,
        }
    }

    /// Render as a fenced `sysinfo` Markdown block.
    pub fn to_markdown_block(&self) -> String {
        format!(
            "```sysinfo\ncpu: {}\nlogical_cores: {}\ntotal_memory_kb: {}\nos: {} {}\nbenchkit: {}\n```",
            self.cpu_model,
            self.logical_cores,
            self.total_memory_kb,
            self.os_name,
            self.os_version,
            self.benchkit_version,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_reports_at_least_one_core() {
        let info = SystemInfo::probe();
        assert!(info.logical_cores >= 1);
    }

    #[test]
    fn markdown_block_is_fenced() {
        let info = SystemInfo::probe();
        let block = info.to_markdown_block();
        assert!(block.starts_with("```sysinfo\n"));
        assert!(block.ends_with("```"));
    }
}
