//! `benchkit` CLI: discovers `*_bench.<ext>` files under a path, evaluates
//! each in isolation, and prints a Markdown report.
//!
//! Argument parsing uses derive-`clap` over hand-rolled argv parsing.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use log::LevelFilter;

use benchkit::allocator::CountingAllocatorBridge;
use benchkit::config::ProjectConfig;
use benchkit::describe::{Describe, RunBody, Setup};
use benchkit::error::{BenchError, DescribeError, Phase, SamplerError};
use benchkit::loader::{self, LoadedModule};
use benchkit::logging;
use benchkit::report::{self, BenchResult, FileReport};
use benchkit::runner::BenchmarkRunner;
use benchkit::system_info::SystemInfo;

#[global_allocator]
static ALLOC: benchkit::allocator::CountingAllocator = benchkit::allocator::CountingAllocator::new();

/// Statistically controlled micro-benchmark harness.
#[derive(Debug, Parser)]
#[command(name = "benchkit", version, about, long_about = None)]
struct Args {
    /// A benchmark file, or a directory to search recursively for
    /// `*_bench.<so|dylib|dll>` files.
    path: PathBuf,

    /// Logging verbosity (error, warn, info, debug, trace).
    #[arg(long, default_value = "info")]
    log_level: LevelFilter,
}

fn main() -> ExitCode {
    let args = Args::parse();
    logging::init(args.log_level);

    match run(&args) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            eprintln!("ERROR: {err:#}");
            ExitCode::FAILURE
        }
    }
}

/// Returns `Ok(true)` if every discovered file loaded successfully (a
/// benchmark raising a `UserError` still counts as "loaded" — exit code
/// `1` is tied to load/parse failures and empty discovery, not to
/// individual benchmark failures, which are instead reported inline).
fn run(args: &Args) -> anyhow::Result<bool> {
    let config_dir = args.path.parent().unwrap_or_else(|| std::path::Path::new("."));
    let project_config = ProjectConfig::discover(config_dir)
        .with_context(|| format!("loading project config near {}", config_dir.display()))?;

    let files = loader::discover(&args.path)
        .with_context(|| format!("discovering benchmark files under {}", args.path.display()))?;
    log::info!("discovered {} benchmark file(s) under {:?}", files.len(), args.path);

    let bridge = CountingAllocatorBridge::new();
    let runner = BenchmarkRunner::new(&bridge);

    let mut reports = Vec::with_capacity(files.len());
    let mut all_loaded = true;
    for path in &files {
        let file_label = path.display().to_string();
        let module = match loader::load(path) {
            Ok(module) => module,
            Err(e) => {
                log::error!("failed to load {file_label}: {e}");
                all_loaded = false;
                reports.push(FileReport {
                    path: file_label,
                    results: vec![BenchResult::Failed {
                        name: "<load>".to_string(),
                        message: e.to_string(),
                    }],
                });
                continue;
            }
        };
        reports.push(run_file(&runner, file_label, module, project_config.as_ref()));
    }

    let info = SystemInfo::probe();
    println!("{}", report::render(&info, &reports));
    Ok(all_loaded)
}

fn run_file(
    runner: &BenchmarkRunner,
    file_label: String,
    module: LoadedModule,
    project_config: Option<&ProjectConfig>,
) -> FileReport {
    let LoadedModule { mut spec, .. } = module;
    let mut results = Vec::with_capacity(spec.describes.len());

    if let Err(e) = spec.hooks.run_before_all() {
        results.push(BenchResult::Failed {
            name: "<before_all>".to_string(),
            message: e.to_string(),
        });
        return FileReport { path: file_label, results };
    }

    for describe in &mut spec.describes {
        if let Err(e) = spec.hooks.run_before_each() {
            results.push(BenchResult::Failed {
                name: describe.name().to_string(),
                message: e.to_string(),
            });
            continue;
        }
        results.push(run_describe(runner, describe, project_config));
        if let Err(e) = spec.hooks.run_after_each() {
            results.push(BenchResult::Failed {
                name: format!("{}:<after_each>", describe.name()),
                message: e.to_string(),
            });
        }
    }

    if let Err(e) = spec.hooks.run_after_all() {
        results.push(BenchResult::Failed {
            name: "<after_all>".to_string(),
            message: e.to_string(),
        });
    }

    FileReport { path: file_label, results }
}

fn run_describe(
    runner: &BenchmarkRunner,
    describe: &mut Describe,
    project_config: Option<&ProjectConfig>,
) -> BenchResult {
    let name = describe.name().to_string();
    let options = match project_config {
        Some(config) => config.merged(describe.options().clone()),
        None => describe.options().clone(),
    };

    let (setup, run_body, teardown) = describe.parts_mut();
    let (mut setup_once, mut setup) = match setup {
        Setup::Once(f) => (Some(f), None),
        Setup::EveryPass(f) => (None, Some(f)),
    };

    let run_result = match run_body {
        RunBody::Plain(measured) => runner.run(
            &name,
            &options,
            setup_once.as_deref_mut(),
            setup.as_deref_mut(),
            measured,
            teardown,
            None,
        ),
        RunBody::WithTimer(measured) => runner.run_timed(
            &name,
            &options,
            setup_once.as_deref_mut(),
            setup.as_deref_mut(),
            measured,
            teardown,
            None,
        ),
    };

    match run_result {
        Ok(outcome) => BenchResult::Completed { name, outcome },
        Err(e) => BenchResult::Failed {
            name,
            message: format_phase_error(&e),
        },
    }
}

fn format_phase_error(error: &BenchError) -> String {
    match error {
        BenchError::Sampler(SamplerError::UserError { phase, message }) => {
            format!("{phase}: {message}")
        }
        BenchError::Describe(DescribeError::UserError { phase, message }) => {
            format!("{phase}: {message}")
        }
        other => format!("{}: {other}", Phase::Run),
    }
}
