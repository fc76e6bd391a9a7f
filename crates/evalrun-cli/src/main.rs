//! evalrun - evaluate recorded model outputs against benchmark run specs
//!
//! Loads run specs from JSON files (`--run-specs`) or canonical descriptions
//! (`--run-spec bbq:subject=age`), runs each through the local scenario,
//! adapter and recorded-response executor, and writes per-run statistics
//! under `<output-path>/runs/<suite>/`.
//!
//! Exits with status 1 if any run failed.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use evalrun_core::RunSpec;
use evalrun_engine::{
    run_specs_from_description, Collaborators, ExecutionSpec, FileScenarioFactory,
    PromptAdapterFactory, RecordedExecutor, RunAllReport, Runner, RunnerConfig,
};
use serde::Serialize;
use tracing::{info, Level};

#[derive(Parser, Debug)]
#[command(name = "evalrun")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Evaluate and aggregate language-model benchmark runs", long_about = None)]
struct Cli {
    /// JSON file holding an array of run specs (repeatable)
    #[arg(long = "run-specs", value_name = "FILE")]
    run_spec_files: Vec<PathBuf>,

    /// Canonical run spec description, e.g. `bbq:subject=age` (repeatable)
    #[arg(long = "run-spec", value_name = "DESCRIPTION")]
    run_spec_descriptions: Vec<String>,

    /// Root directory for scenarios, runs and the eval cache
    #[arg(short, long, env = "EVALRUN_OUTPUT_PATH", default_value = "benchmark_output")]
    output_path: PathBuf,

    /// Suite name; runs are written to `<output-path>/runs/<suite>`
    #[arg(long, env = "EVALRUN_SUITE", default_value = "latest")]
    suite: String,

    /// Directory that scenario data paths are resolved against
    #[arg(long, env = "EVALRUN_DATA_DIR", default_value = ".")]
    data_dir: PathBuf,

    /// JSON object of recorded completions keyed by instance ID or prompt
    #[arg(long, value_name = "FILE")]
    responses: Option<PathBuf>,

    /// Evaluate on an empty instance list and write nothing
    #[arg(long)]
    skip_instances: bool,

    /// Only count tokens; configured metrics are skipped
    #[arg(long)]
    dry_run: bool,

    /// Upper bound on concurrent per-instance work
    #[arg(short = 'n', long, default_value_t = 4)]
    parallelism: usize,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Emit JSON-formatted log lines and a JSON summary
    #[arg(long)]
    json: bool,
}

impl Cli {
    fn runner_config(&self) -> RunnerConfig {
        RunnerConfig {
            output_path: self.output_path.clone(),
            suite: self.suite.clone(),
            skip_instances: self.skip_instances,
            execution: ExecutionSpec {
                parallelism: self.parallelism.max(1),
                dry_run: self.dry_run,
            },
        }
    }
}

fn read_run_spec_file(path: &Path) -> Result<Vec<RunSpec>> {
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_slice(&bytes)
        .with_context(|| format!("Failed to parse run specs in {}", path.display()))
}

/// Run specs from files first, then from descriptions, in argument order.
fn load_run_specs(files: &[PathBuf], descriptions: &[String]) -> Result<Vec<RunSpec>> {
    let mut run_specs = Vec::new();
    for path in files {
        run_specs.extend(read_run_spec_file(path)?);
    }
    for description in descriptions {
        let expanded = run_specs_from_description(description)
            .with_context(|| format!("Invalid run spec description {:?}", description))?;
        run_specs.extend(expanded);
    }
    if run_specs.is_empty() {
        anyhow::bail!("No run specs given; pass --run-specs or --run-spec");
    }
    Ok(run_specs)
}

#[derive(Serialize)]
struct Summary<'a> {
    succeeded: usize,
    skipped: usize,
    failed: Vec<FailedRun<'a>>,
    runs: &'a [evalrun_engine::RunOutcome],
}

#[derive(Serialize)]
struct FailedRun<'a> {
    run_name: &'a str,
    phase: evalrun_engine::RunPhase,
    error: String,
}

fn print_summary(report: &RunAllReport, json: bool) -> Result<()> {
    if json {
        let summary = Summary {
            succeeded: report.succeeded(),
            skipped: report.skipped(),
            failed: report
                .failures
                .iter()
                .map(|f| FailedRun {
                    run_name: &f.run_name,
                    phase: f.phase,
                    error: f.kind.to_string(),
                })
                .collect(),
            runs: &report.outcomes,
        };
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    for outcome in &report.outcomes {
        let location = outcome
            .run_path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(not written)".to_string());
        println!(
            "✓ {:<50} {:>4} stats  {}",
            outcome.run_name, outcome.num_stats, location
        );
        for duplicate in &outcome.duplicate_stats {
            println!("    duplicate stat: {}", duplicate);
        }
    }
    for failure in &report.failures {
        println!("✗ {:<50} {}", failure.run_name, failure.kind);
    }
    println!(
        "\n{} succeeded, {} skipped, {} failed",
        report.succeeded(),
        report.skipped(),
        report.failed()
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    evalrun_core::init_tracing(cli.json, level);

    let run_specs = load_run_specs(&cli.run_spec_files, &cli.run_spec_descriptions)?;
    info!(count = run_specs.len(), version = evalrun_core::VERSION, "run specs loaded");

    let executor = match &cli.responses {
        Some(path) => RecordedExecutor::from_file(path).await?,
        None => RecordedExecutor::empty(),
    };
    let collaborators = Collaborators::new(
        Arc::new(FileScenarioFactory::new(&cli.data_dir)),
        Arc::new(PromptAdapterFactory),
        Arc::new(executor),
    );
    let runner = Runner::new(cli.runner_config(), collaborators)
        .context("Failed to prepare output directories")?;

    let report = runner.run_all(&run_specs).await;
    print_summary(&report, cli.json)?;

    if report.has_failures() {
        std::process::exit(1);
    }
    Ok(())
}
