//! Per-job curve extraction from archived result sets.

use anyhow::{Context, Result};
use serde::Serialize;
use std::fs;
use std::path::PathBuf;
use tracing::{info, warn};

use crate::config;
use crate::error::ExtractError;
use crate::grid::JobNaming;
use crate::ledger::{write_report, LedgerWriter, ReportRow, SUMMARY_HEADER};
use crate::results::{Region, ResultSet, ResultStore};

/// Frame-time statistics of one job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub job: String,
    pub avg_time: f64,
    pub max_time: f64,
    pub frames: usize,
    pub time_mismatches: usize,
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub rows: Vec<ReportRow>,
    pub summary: RunSummary,
}

/// Read one row per output frame: reference-node displacement and reaction
/// force plus the contact-area history sample at the same index.
///
/// Field and history times are compared frame by frame; a mismatch is
/// logged and counted but does not fail the job.
pub fn read_curve(rs: &dyn ResultSet, job: &str, cfg: &config::Extract) -> Result<RunReport, ExtractError> {
    let region = Region { instance: cfg.instance.clone(), node_set: cfg.node_set.clone() };
    let times = rs.frame_times(&cfg.step)?;
    if times.is_empty() {
        return Err(ExtractError::NoFrames(cfg.step.clone()));
    }
    let history = rs.history(&cfg.step, &cfg.history_region, &cfg.history_output)?;
    if history.len() < times.len() {
        return Err(ExtractError::HistoryTooShort { frames: times.len(), history: history.len() });
    }

    let sign = if cfg.invert_sign { -1.0 } else { 1.0 };
    let mut rows = Vec::with_capacity(times.len());
    let mut sum = 0.0;
    let mut max_time = 0.0;
    let mut mismatches = 0;

    for (i, &time) in times.iter().enumerate() {
        let u = rs.field_component(&cfg.step, i, &cfg.displacement_field, &region, cfg.component)?;
        let rf = rs.field_component(&cfg.step, i, &cfg.force_field, &region, cfg.component)?;
        let (history_time, contact_area) = history[i];

        sum += time;
        if time > max_time {
            max_time = time;
        }
        if (time - history_time).abs() > cfg.time_tolerance {
            mismatches += 1;
            warn!(job, increment = i, field_time = time, history_time, "time mismatch between field and history output");
        }

        rows.push(ReportRow {
            time,
            displacement: sign * u,
            force: sign * rf,
            contact_area,
        });
    }

    Ok(RunReport {
        summary: RunSummary {
            job: job.to_string(),
            avg_time: sum / times.len() as f64,
            max_time,
            frames: rows.len(),
            time_mismatches: mismatches,
        },
        rows,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct ExtractionReport {
    pub scanned: usize,
    pub summaries: Vec<RunSummary>,
    pub skipped: Vec<String>,
}

pub struct ResultExtractor<S: ResultStore> {
    cfg: config::Extract,
    archive_dir: PathBuf,
    naming: JobNaming,
    result_extension: String,
    store: S,
}

impl<S: ResultStore> ResultExtractor<S> {
    pub fn new(cfg: &config::Root, store: S) -> Self {
        Self {
            cfg: cfg.extract.clone(),
            archive_dir: cfg.sweep.archive_dir.clone(),
            naming: JobNaming::from_config(&cfg.sweep),
            result_extension: cfg.sweep.result_extension.clone(),
            store,
        }
    }

    /// Archived jobs with a result set, sorted by name.
    pub fn scan_archive(&self) -> Result<Vec<String>> {
        let suffix = format!(".{}", self.result_extension);
        let mut jobs = Vec::new();
        let entries = fs::read_dir(&self.archive_dir)
            .with_context(|| format!("cannot list archive {}", self.archive_dir.display()))?;
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(job) = name.strip_suffix(&suffix) {
                if self.naming.parse(job).is_some() {
                    jobs.push(job.to_string());
                }
            }
        }
        jobs.sort();
        Ok(jobs)
    }

    pub fn extract(&self, job: &str) -> Result<RunReport, ExtractError> {
        let rs = self.store.open(job)?;
        read_curve(rs.as_ref(), job, &self.cfg)
    }

    pub fn report_path(&self, job: &str) -> PathBuf {
        self.cfg.report_dir.join(format!("{}.rpt", job))
    }

    /// Extract every archived job, writing its report file and a summary
    /// ledger row in scan order. Jobs that cannot be read are skipped.
    pub fn run(&self) -> Result<ExtractionReport> {
        fs::create_dir_all(&self.cfg.report_dir)
            .with_context(|| format!("cannot create report dir {}", self.cfg.report_dir.display()))?;
        let jobs = self.scan_archive()?;
        let mut ledger = LedgerWriter::create(&self.cfg.results_ledger)?;
        ledger.write_line(SUMMARY_HEADER)?;

        let mut report = ExtractionReport { scanned: jobs.len(), summaries: Vec::new(), skipped: Vec::new() };
        for job in &jobs {
            info!(job = %job, "reading job");
            let run = match self.extract(job) {
                Ok(run) => run,
                Err(e) => {
                    warn!(job = %job, error = %e, "result set unreadable, job skipped");
                    report.skipped.push(job.clone());
                    continue;
                }
            };
            write_report(&self.report_path(job), &run.rows)
                .with_context(|| format!("extract stage failed at {}: cannot write report", job))?;
            ledger
                .write_summary(job, run.summary.avg_time, run.summary.max_time)
                .with_context(|| format!("extract stage failed at {}: cannot write ledger", job))?;
            ledger.flush()?;
            report.summaries.push(run.summary);
        }

        info!(
            extracted = report.summaries.len(),
            skipped = report.skipped.len(),
            "all jobs processed, reports in {}",
            self.cfg.report_dir.display()
        );
        Ok(report)
    }
}
