mod config;
mod dataset;
mod error;
mod extract;
mod grid;
mod job;
mod ledger;
mod manifest;
mod mlp;
mod results;
mod scaler;
mod surrogate;
mod sweep;
mod telemetry;
mod wait;

#[cfg(test)]
mod tests;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn, Level};

use crate::dataset::CurveDataset;
use crate::extract::{ExtractionReport, ResultExtractor};
use crate::manifest::{Bundle, Manifest};
use crate::results::JsonResultStore;
use crate::surrogate::{SurrogateTrainer, TrainingSummary};
use crate::sweep::{SweepDriver, SweepReport};
use crate::wait::CancelToken;

#[derive(Parser, Debug)]
#[command(name = "indenter")]
#[command(version)]
#[command(about = "Indentation parameter sweep: solver job orchestration, curve extraction and surrogate training")]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// Path to TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Directory for JSON result bundles
    #[arg(short, long, global = true, default_value = "results")]
    out: PathBuf,

    /// Log level (overridden by RUST_LOG)
    #[arg(long, global = true, default_value = "info")]
    log_level: Level,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Materialize, submit and archive every grid point
    Sweep,
    /// Extract force-displacement reports from archived jobs
    Extract,
    /// Train forward and inverse surrogates and write predictions
    Train,
    /// Sweep, extract and train in one go
    Run,
    /// Validate a configuration file
    Validate,
    /// Print version information
    Version,
}

fn write_bundle<T: Serialize>(
    out_dir: &Path,
    file: &str,
    stage: &'static str,
    report: &T,
    cfg: &config::Root,
    cfg_text: &str,
) -> Result<PathBuf> {
    fs::create_dir_all(out_dir)
        .with_context(|| format!("cannot create output dir {}", out_dir.display()))?;
    let path = out_dir.join(file);
    let bundle = Bundle { manifest: Manifest::new(cfg, cfg_text), stage, report };
    let json = serde_json::to_string_pretty(&bundle)?;
    fs::write(&path, json).with_context(|| format!("cannot write {}", path.display()))?;
    info!("JSON bundle: {}", path.display());
    Ok(path)
}

fn run_sweep(cfg: &config::Root, cfg_text: &str, out_dir: &Path, cancel: CancelToken) -> Result<SweepReport> {
    let report = SweepDriver::new(cfg, cancel).run()?;
    write_bundle(out_dir, "sweep_summary.json", "sweep", &report, cfg, cfg_text)?;
    if report.failed + report.aborted > 0 {
        warn!(
            failed = report.failed,
            aborted = report.aborted,
            "some jobs did not complete; their files are left in {}",
            cfg.sweep.work_dir.display()
        );
    }
    Ok(report)
}

fn run_extract(cfg: &config::Root, cfg_text: &str, out_dir: &Path) -> Result<ExtractionReport> {
    let store = JsonResultStore::new(&cfg.sweep.archive_dir, &cfg.extract.export_extension);
    let report = ResultExtractor::new(cfg, store).run()?;
    write_bundle(out_dir, "extract_summary.json", "extract", &report, cfg, cfg_text)?;
    Ok(report)
}

fn run_train(cfg: &config::Root, cfg_text: &str, out_dir: &Path) -> Result<TrainingSummary> {
    let ds = CurveDataset::from_config(cfg)?;
    let summary = SurrogateTrainer::new(&cfg.surrogate)?.run(&ds)?;
    write_bundle(out_dir, "training_summary.json", "train", &summary, cfg, cfg_text)?;
    Ok(summary)
}

fn validate_config(cfg_path: &Path) -> Result<()> {
    let (cfg, text) = config::Root::load(cfg_path)?;
    let jobs: usize = cfg.sweep.dimensions.iter().map(|d| d.count).product();

    eprintln!("[indenter] config valid: {}", cfg_path.display());
    eprintln!("  study: {} v{}", cfg.study.name, cfg.study.version);
    eprintln!("  digest: {}", manifest::config_digest(&text));
    eprintln!("  solver: {:?}", cfg.solver.command);
    for dim in &cfg.sweep.dimensions {
        eprintln!(
            "  dimension: {} ({}) [{}, {}] x{}",
            dim.name, dim.token, dim.start, dim.end, dim.count
        );
    }
    eprintln!("  jobs: {} ({} worker(s))", jobs, cfg.sweep.workers);
    eprintln!("  points per curve: {}", cfg.dataset.points_per_curve);
    eprintln!("  inverse models: {:?}", cfg.surrogate.inverse);
    Ok(())
}

fn print_version() {
    eprintln!("indenter {}", manifest::TOOL_VERSION);
    eprintln!("  Schema Version:    {}", manifest::SCHEMA_VERSION);
    eprintln!("  Platform:          {}", std::env::consts::OS);
    eprintln!("  Architecture:      {}", std::env::consts::ARCH);
}

fn main() -> Result<()> {
    let args = Args::parse();
    telemetry::init_tracing(args.json_logs, args.log_level);

    let cfg_path = match args.command {
        Commands::Version => {
            print_version();
            return Ok(());
        }
        Commands::Validate => {
            let cfg_path = args.config.context("--config required for validate")?;
            return validate_config(&cfg_path);
        }
        _ => args.config.clone().context("--config required")?,
    };

    let (cfg, cfg_text) = config::Root::load(&cfg_path)?;
    info!(study = %cfg.study.name, version = %cfg.study.version, "indenter {}", manifest::TOOL_VERSION);
    let cancel = CancelToken::new();

    match args.command {
        Commands::Sweep => {
            run_sweep(&cfg, &cfg_text, &args.out, cancel)?;
        }
        Commands::Extract => {
            run_extract(&cfg, &cfg_text, &args.out)?;
        }
        Commands::Train => {
            run_train(&cfg, &cfg_text, &args.out)?;
        }
        Commands::Run => {
            run_sweep(&cfg, &cfg_text, &args.out, cancel)?;
            run_extract(&cfg, &cfg_text, &args.out)?;
            run_train(&cfg, &cfg_text, &args.out)?;
        }
        Commands::Validate | Commands::Version => {}
    }
    Ok(())
}
