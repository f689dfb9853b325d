// Command-line runner for the `motion_sentinel` engine.
//
//   motion_sentinel calibrate logs/segment-0001.jsonl
//   motion_sentinel analyze logs/*.jsonl
//
// Outputs land in $RESULTS_DIR (default ./results) unless paths are given.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use motion_sentinel::core_modules::calibration;
use motion_sentinel::telemetry_reader::JsonLinesSource;
use motion_sentinel::{CancelHandle, EngineConfig, JsonLinesWriter, ParallelPipeline, RunSummary, ThresholdConfig};
use std::fs;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Directory holding thresholds.json and edge_cases.jsonl
    #[arg(long, env = "RESULTS_DIR", default_value = "./results", global = true)]
    results_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Flag edge cases in one or more driving logs
    Analyze {
        /// JSON-lines driving logs, processed in the order given
        #[arg(required = true)]
        logs: Vec<PathBuf>,

        /// Threshold file (default: <results-dir>/thresholds.json)
        #[arg(short, long)]
        thresholds: Option<PathBuf>,

        /// Output store (default: <results-dir>/edge_cases.jsonl)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Analysis workers (default: number of CPUs)
        #[arg(short, long)]
        workers: Option<usize>,

        /// Store flagged frames without panorama thumbnails
        #[arg(long)]
        no_panoramas: bool,
    },
    /// Derive percentile thresholds from a driving log
    Calibrate {
        log: PathBuf,

        /// Where to write thresholds (default: <results-dir>/thresholds.json)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Overwrite an existing threshold file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("motion_sentinel=info")))
        .init();

    let args = Args::parse();
    fs::create_dir_all(&args.results_dir)
        .with_context(|| format!("cannot create results directory {}", args.results_dir.display()))?;

    match args.command {
        Command::Analyze { logs, thresholds, output, workers, no_panoramas } => {
            let thresholds_path = thresholds.unwrap_or_else(|| args.results_dir.join("thresholds.json"));
            let output_path = output.unwrap_or_else(|| args.results_dir.join("edge_cases.jsonl"));
            let mut config = workers.map(EngineConfig::with_workers).unwrap_or_default();
            config.build_panoramas = !no_panoramas;
            analyze(logs, thresholds_path, output_path, config).await
        }
        Command::Calibrate { log, output, force } => {
            let output_path = output.unwrap_or_else(|| args.results_dir.join("thresholds.json"));
            if output_path.exists() && !force {
                bail!("{} already exists; pass --force to overwrite", output_path.display());
            }
            let mut source = JsonLinesSource::open(&log)?;
            let thresholds = calibration::calibrate(&mut source)?;
            thresholds.save(&output_path)?;
            info!(path = %output_path.display(), "saved thresholds");
            Ok(())
        }
    }
}

async fn analyze(logs: Vec<PathBuf>, thresholds_path: PathBuf, output_path: PathBuf, config: EngineConfig) -> Result<()> {
    let thresholds = ThresholdConfig::load(&thresholds_path)?;
    info!(
        hard_brake = thresholds.hard_brake,
        lateral = thresholds.lateral,
        jerk = thresholds.jerk,
        "active thresholds (severity 0.0 at threshold, 1.0 at 3x)"
    );

    let mut writer = JsonLinesWriter::open(&output_path)
        .with_context(|| format!("cannot open output store {}", output_path.display()))?;

    let (cancel_handle, cancel_token) = CancelHandle::new();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; stopping after the current frame");
            cancel_handle.cancel();
        }
    });

    let pipeline = ParallelPipeline::new(thresholds, config, cancel_token);
    let mut run = RunSummary::default();

    for log in &logs {
        if pipeline.is_cancelled() {
            break;
        }
        let mut source = JsonLinesSource::open(log)?;
        let summary = pipeline.process_file(&mut source, &mut writer).await?;
        run.add(summary);
    }

    pipeline.shutdown().await;
    run.log();
    info!(path = %writer.path().display(), "results stored");
    Ok(())
}
