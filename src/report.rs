//! Markdown report rendering: a fenced `sysinfo` block, then per-file
//! sections titled `## Exec: <path>`, each containing a result table.

use std::fmt::Write as _;

use crate::ci::CIReport;
use crate::runner::RunOutcome;
use crate::system_info::SystemInfo;

/// The outcome of running one describe within a file.
pub enum BenchResult {
    /// The benchmark completed; carries its name and the runner's outcome.
    Completed {
        /// The describe's name.
        name: String,
        /// The final buffer and the controller's last verdict.
        outcome: RunOutcome,
    },
    /// The benchmark failed; carries its name and the formatted error.
    Failed {
        /// The describe's name.
        name: String,
        /// The phase-tagged error message, formatted as `ERROR: <phase>:
        /// <message>`.
        message: String,
    },
}

/// One benchmark file's results, in registration order.
pub struct FileReport {
    /// The file's path, as displayed in its section heading.
    pub path: String,
    /// Results for each describe in the file, in registration order.
    pub results: Vec<BenchResult>,
}

/// Render a full CLI report: the `sysinfo` block followed by one `## Exec:
/// <path>` section per file.
pub fn render(system_info: &SystemInfo, files: &[FileReport]) -> String {
    let mut out = String::new();
    out.push_str(&system_info.to_markdown_block());
    out.push('\n');
    for file in files {
        out.push('\n');
        render_file_section(&mut out, file);
    }
    out
}

fn render_file_section(out: &mut String, file: &FileReport) {
    let _ = writeln!(out, "\n## Exec: {}\n", file.path);
    if file.results.is_empty() {
        out.push_str("_no benchmarks registered_\n");
        return;
    }
    out.push_str(
        "| Benchmark | Samples | Mean (ns) | StdDev (ns) | Min (ns) | Max (ns) | RCIW % | Quality | Throughput (ops/s) |\n",
    );
    out.push_str("|---|---|---|---|---|---|---|---|---|\n");
    for result in &file.results {
        render_row(out, result);
    }
}

fn render_row(out: &mut String, result: &BenchResult) {
    match result {
        BenchResult::Completed { name, outcome } => {
            let buffer = &outcome.buffer;
            let report: &CIReport = &outcome.report;
            let _ = writeln!(
                out,
                "| {} | {} | {:.1} | {:.1} | {} | {} | {} | {} | {} |",
                name,
                buffer.count(),
                buffer.mean(),
                buffer.stddev(),
                buffer.min(),
                buffer.max(),
                format_rciw(report.rciw_observed),
                report.quality,
                format_throughput(buffer.throughput()),
            );
        }
        BenchResult::Failed { name, message } => {
            let _ = writeln!(
                out,
                "| {} | — | — | — | — | — | — | **ERROR** | {} |",
                name, message
            );
        }
    }
}

fn format_rciw(rciw: f64) -> String {
    if rciw.is_nan() {
        "n/a".to_string()
    } else {
        format!("{:.2}", rciw)
    }
}

fn format_throughput(throughput: f64) -> String {
    if throughput.is_nan() {
        "n/a".to_string()
    } else {
        format!("{:.1}", throughput)
    }
}

/// `true` if every [`Quality`] in `files` is at least `acceptable` and no
/// describe failed — used by the CLI to decide between exit codes `0`/`1`
/// when the caller also wants a quality gate beyond the mandatory exit `1`
/// on load/parse error or zero files found.
pub fn all_completed_without_errors(files: &[FileReport]) -> bool {
    files
        .iter()
        .all(|f| f.results.iter().all(|r| matches!(r, BenchResult::Completed { .. })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::{AllocatorBridge, TuningSnapshot};
    use crate::ci::CIController;
    use crate::sample::SampleBuffer;

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

    fn completed_outcome() -> RunOutcome {
        let bridge = NoopBridge;
        let mut buffer = SampleBuffer::new("x", 100, -1, 95.0, 5.0).unwrap();
        buffer.preprocess(&bridge);
        for _ in 0..100 {
            buffer.init_sample(&bridge).unwrap();
            buffer.update_sample(&bridge).unwrap();
        }
        buffer.postprocess(&bridge);
        let report = CIController::new().decide(&buffer);
        RunOutcome { buffer, report }
    }

    #[test]
    fn render_includes_sysinfo_block_and_file_section() {
        let info = SystemInfo::probe();
        let files = vec![FileReport {
            path: "sort_bench.so".to_string(),
            results: vec![BenchResult::Completed {
                name: "bubble_sort".to_string(),
                outcome: completed_outcome(),
            }],
        }];
        let markdown = render(&info, &files);
        assert!(markdown.starts_with("```sysinfo\n"));
        assert!(markdown.contains("## Exec: sort_bench.so"));
        assert!(markdown.contains("bubble_sort"));
    }

    #[test]
    fn render_marks_failed_benchmarks() {
        let info = SystemInfo::probe();
        let files = vec![FileReport {
            path: "x_bench.so".to_string(),
            results: vec![BenchResult::Failed {
                name: "broken".to_string(),
                message: "run: boom".to_string(),
            }],
        }];
        let markdown = render(&info, &files);
        assert!(markdown.contains("**ERROR**"));
        assert!(markdown.contains("run: boom"));
        assert!(!all_completed_without_errors(&files));
    }

    #[test]
    fn empty_file_reports_no_benchmarks() {
        let info = SystemInfo::probe();
        let files = vec![FileReport {
            path: "empty_bench.so".to_string(),
            results: vec![],
        }];
        let markdown = render(&info, &files);
        assert!(markdown.contains("_no benchmarks registered_"));
        assert!(all_completed_without_errors(&files));
    }
}
