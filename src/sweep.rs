//! Parameter sweep: one materialized input deck and one solver job per
//! grid point, a parameter ledger row per job, successful artifacts moved
//! into the batch archive.

use anyhow::{bail, Context, Result};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Mutex;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::config;
use crate::grid::{self, JobNaming};
use crate::job::{JobRunner, Verdict};
use crate::ledger::LedgerWriter;
use crate::wait::CancelToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "Pending",
            JobStatus::Running => "Running",
            JobStatus::Completed => "Completed",
            JobStatus::Failed => "Failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Pending" => Ok(JobStatus::Pending),
            "Running" => Ok(JobStatus::Running),
            "Completed" => Ok(JobStatus::Completed),
            "Failed" => Ok(JobStatus::Failed),
            _ => bail!("unknown job status: {}", s),
        }
    }
}

/// Parameter ledger row. Parameters are the raw grid values.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobRecord {
    pub number: u32,
    pub params: Vec<f64>,
    pub status: JobStatus,
}

/// One materialized grid point.
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub number: u32,
    pub name: String,
    pub params: Vec<f64>,
    pub deck: PathBuf,
    pub outputs: Vec<PathBuf>,
}

/// Replace each token by its value formatted as `%{width}.{precision}f`.
pub fn substitute(template: &str, tokens: &[&str], values: &[f64], width: usize, precision: usize) -> String {
    let mut text = template.to_string();
    for (token, value) in tokens.iter().zip(values) {
        if !text.contains(token) {
            debug!(token, "placeholder not present in template");
            continue;
        }
        let formatted = format!("{:>width$.prec$}", value, width = width, prec = precision);
        text = text.replace(token, &formatted);
    }
    text
}

/// Rename, falling back to copy + delete across filesystems.
fn move_file(src: &Path, dst: &Path) -> std::io::Result<()> {
    if fs::rename(src, dst).is_ok() {
        return Ok(());
    }
    fs::copy(src, dst)?;
    fs::remove_file(src)
}

/// Writes rows strictly in plan order regardless of completion order.
struct OrderedLedger {
    writer: LedgerWriter,
    next: usize,
    pending: BTreeMap<usize, JobRecord>,
}

impl OrderedLedger {
    fn commit(&mut self, position: usize, record: JobRecord) -> Result<()> {
        self.pending.insert(position, record);
        let mut wrote = false;
        while let Some(rec) = self.pending.remove(&self.next) {
            self.writer.write_record(&rec)?;
            self.next += 1;
            wrote = true;
        }
        if wrote {
            self.writer.flush()?;
        }
        Ok(())
    }

    /// Flush rows stranded behind a job that never ran (cancelled sweep).
    fn finish(mut self) -> Result<()> {
        for rec in std::mem::take(&mut self.pending).into_values() {
            self.writer.write_record(&rec)?;
        }
        self.writer.flush()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SweepReport {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub aborted: usize,
    pub wall_time_ms: f64,
    pub records: Vec<JobRecord>,
}

pub struct SweepDriver {
    cfg: config::Sweep,
    naming: JobNaming,
    runner: JobRunner,
    cancel: CancelToken,
}

impl SweepDriver {
    pub fn new(cfg: &config::Root, cancel: CancelToken) -> Self {
        Self {
            cfg: cfg.sweep.clone(),
            naming: JobNaming::from_config(&cfg.sweep),
            runner: JobRunner::new(&cfg.solver, &cfg.sweep.work_dir, cancel.clone()),
            cancel,
        }
    }

    /// Every grid point in job-number order.
    pub fn plan(&self) -> Vec<JobSpec> {
        grid::enumerate(&grid::axes(&self.cfg))
            .into_iter()
            .map(|p| {
                let name = self.naming.name(p.number);
                JobSpec {
                    number: p.number,
                    deck: self.runner.artifact(&name, &self.cfg.deck_extension),
                    outputs: vec![self.runner.artifact(&name, &self.cfg.result_extension)],
                    name,
                    params: p.values,
                }
            })
            .collect()
    }

    pub fn load_template(&self) -> Result<String> {
        fs::read_to_string(&self.cfg.template)
            .with_context(|| format!("cannot read template deck {}", self.cfg.template.display()))
    }

    pub fn materialize(&self, spec: &JobSpec, template: &str) -> Result<()> {
        let tokens: Vec<&str> = self.cfg.dimensions.iter().map(|d| d.token.as_str()).collect();
        let deck = substitute(
            template,
            &tokens,
            &spec.params,
            self.cfg.value_width,
            self.cfg.value_precision,
        );
        fs::write(&spec.deck, deck)
            .with_context(|| format!("cannot write input deck {}", spec.deck.display()))
    }

    /// Move the surviving artifacts of a job into the archive.
    pub fn archive(&self, spec: &JobSpec) -> Vec<PathBuf> {
        let mut moved = Vec::new();
        for ext in self.cfg.archive_extensions() {
            let src = self.runner.artifact(&spec.name, &ext);
            if !src.exists() {
                warn!(job = %spec.name, path = %src.display(), "artifact missing, not archived");
                continue;
            }
            let dst = self.cfg.archive_dir.join(format!("{}.{}", spec.name, ext));
            match move_file(&src, &dst) {
                Ok(()) => moved.push(dst),
                Err(e) => warn!(job = %spec.name, path = %src.display(), error = %e, "could not archive artifact"),
            }
        }
        moved
    }

    /// Materialize, run and archive one job. Only deck I/O is fatal.
    fn execute(&self, spec: &JobSpec, template: &str) -> Result<(JobRecord, Verdict)> {
        info!(job = %spec.name, params = ?spec.params, "materializing job {}", spec.number);
        self.materialize(spec, template)?;

        let verdict = match self.runner.run(&spec.name) {
            Ok(outcome) => {
                debug!(
                    job = %spec.name,
                    state = ?outcome.state,
                    removed = outcome.cleanup.removed.len(),
                    absent = outcome.cleanup.absent.len(),
                    elapsed_ms = outcome.elapsed.as_secs_f64() * 1000.0,
                    "job lifecycle finished"
                );
                outcome.verdict
            }
            Err(e) if e.is_abort() => {
                warn!(job = %spec.name, error = %e, "job aborted");
                Verdict::Aborted
            }
            Err(e) => {
                warn!(job = %spec.name, error = %e, "job failed");
                Verdict::Failed
            }
        };

        let status = if verdict == Verdict::Succeeded {
            self.archive(spec);
            info!(job = %spec.name, "job completed");
            JobStatus::Completed
        } else {
            JobStatus::Failed
        };

        Ok((
            JobRecord { number: spec.number, params: spec.params.clone(), status },
            verdict,
        ))
    }

    pub fn run(&self) -> Result<SweepReport> {
        let start = Instant::now();
        let template = self.load_template()?;
        fs::create_dir_all(&self.cfg.archive_dir)
            .with_context(|| format!("cannot create archive {}", self.cfg.archive_dir.display()))?;
        let writer = LedgerWriter::create(&self.cfg.param_ledger)?;
        let ledger = Mutex::new(OrderedLedger { writer, next: 0, pending: BTreeMap::new() });

        let specs = self.plan();
        info!(jobs = specs.len(), workers = self.cfg.workers, "starting sweep");

        // Raised by the first fatal error; no job is submitted after it.
        let halt = CancelToken::new();
        let step = |(position, spec): (usize, &JobSpec)| -> Result<Option<(JobRecord, Verdict)>> {
            if self.cancel.is_cancelled() || halt.is_cancelled() {
                return Ok(None);
            }
            let committed = self
                .execute(spec, &template)
                .with_context(|| format!("sweep stage failed at {}", spec.name))
                .and_then(|(record, verdict)| {
                    ledger
                        .lock()
                        .map_err(|_| anyhow::anyhow!("parameter ledger lock poisoned"))?
                        .commit(position, record.clone())
                        .with_context(|| format!("sweep stage failed at {}: cannot write ledger", spec.name))?;
                    Ok((record, verdict))
                });
            if committed.is_err() {
                halt.cancel();
            }
            committed.map(Some)
        };

        let results: Vec<Result<Option<(JobRecord, Verdict)>>> = if self.cfg.workers > 1 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(self.cfg.workers)
                .build()
                .context("cannot start sweep worker pool")?;
            pool.install(|| specs.par_iter().enumerate().map(step).collect())
        } else {
            specs.iter().enumerate().map(step).collect()
        };

        ledger
            .into_inner()
            .map_err(|_| anyhow::anyhow!("parameter ledger lock poisoned"))?
            .finish()?;

        let mut report = SweepReport {
            total: specs.len(),
            completed: 0,
            failed: 0,
            aborted: 0,
            wall_time_ms: 0.0,
            records: Vec::new(),
        };
        for r in results {
            if let Some((record, verdict)) = r? {
                match verdict {
                    Verdict::Succeeded => report.completed += 1,
                    Verdict::Failed => report.failed += 1,
                    Verdict::Aborted => report.aborted += 1,
                }
                report.records.push(record);
            }
        }
        report.wall_time_ms = start.elapsed().as_secs_f64() * 1000.0;

        if self.cancel.is_cancelled() {
            bail!(
                "sweep cancelled after {} of {} jobs",
                report.records.len(),
                report.total
            );
        }

        info!(
            completed = report.completed,
            failed = report.failed,
            aborted = report.aborted,
            "sweep complete: {}/{} jobs completed in {:.1}ms",
            report.completed,
            report.total,
            report.wall_time_ms
        );
        Ok(report)
    }
}
