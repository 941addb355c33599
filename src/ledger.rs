//! Plain-text ledgers, per-job reports and prediction files.
//!
//! Every file is whitespace separated, one record per line, with numbers in
//! C `%12.6e` notation so existing post-processing scripts keep working.

use anyhow::{bail, Context, Result};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use crate::sweep::{JobRecord, JobStatus};

pub const SUMMARY_HEADER: &str = "JobName      AvgTime       MaxTime";
pub const REPORT_HEADER: &str = "Time         Displacement        Force  ContactArea ";
pub const CURVE_PREDICTION_HEADER: &str = "Displacement    Force";

/// `value` as C's `%{width}.{precision}e`, e.g. `1.000000e+02`.
pub fn sci(value: f64, precision: usize, width: usize) -> String {
    let raw = format!("{:.*e}", precision, value);
    let text = match raw.split_once('e') {
        Some((mantissa, exp)) => {
            let exp: i32 = exp.parse().unwrap_or(0);
            format!("{}e{}{:02}", mantissa, if exp < 0 { '-' } else { '+' }, exp.abs())
        }
        // NaN and infinities carry no exponent
        None => raw,
    };
    format!("{:>width$}", text, width = width)
}

fn num(value: f64) -> String {
    sci(value, 6, 12)
}

pub struct LedgerWriter {
    w: BufWriter<File>,
}

impl LedgerWriter {
    pub fn create(path: &Path) -> Result<Self> {
        let f = File::create(path).with_context(|| format!("cannot create {}", path.display()))?;
        Ok(Self { w: BufWriter::new(f) })
    }

    pub fn write_line(&mut self, line: &str) -> Result<()> {
        writeln!(self.w, "{}", line)?;
        Ok(())
    }

    /// `%2d` job number, parameters, final status.
    pub fn write_record(&mut self, rec: &JobRecord) -> Result<()> {
        let mut line = format!("{:2}", rec.number);
        for v in &rec.params {
            line.push(' ');
            line.push_str(&num(*v));
        }
        line.push(' ');
        line.push_str(rec.status.as_str());
        self.write_line(&line)
    }

    pub fn write_summary(&mut self, job: &str, avg_time: f64, max_time: f64) -> Result<()> {
        self.write_line(&format!("{} {} {}", job, num(avg_time), num(max_time)))
    }

    pub fn flush(&mut self) -> Result<()> {
        self.w.flush()?;
        Ok(())
    }
}

/// Parameter ledger rows in file order.
///
/// Each line holds the job number, exactly `n_params` values and an
/// optional status word. Blank lines are ignored.
pub fn read_param_ledger(path: &Path, n_params: usize) -> Result<Vec<JobRecord>> {
    let f = File::open(path).with_context(|| format!("cannot open ledger {}", path.display()))?;
    let mut rows = Vec::new();
    for (i, line) in BufReader::new(f).lines().enumerate() {
        let line = line?;
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.is_empty() {
            continue;
        }
        if parts.len() < n_params + 1 {
            bail!("{}:{}: expected {} parameters", path.display(), i + 1, n_params);
        }
        let number: u32 = parts[0]
            .parse()
            .with_context(|| format!("{}:{}: bad job number {}", path.display(), i + 1, parts[0]))?;
        let params = parts[1..=n_params]
            .iter()
            .map(|p| p.parse::<f64>())
            .collect::<Result<Vec<_>, _>>()
            .with_context(|| format!("{}:{}: bad parameter value", path.display(), i + 1))?;
        let status = match parts.get(n_params + 1) {
            Some(s) => s
                .parse::<JobStatus>()
                .with_context(|| format!("{}:{}: bad status", path.display(), i + 1))?,
            None => JobStatus::Completed,
        };
        rows.push(JobRecord { number, params, status });
    }
    Ok(rows)
}

/// One solver output frame in a report file.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReportRow {
    pub time: f64,
    pub displacement: f64,
    pub force: f64,
    pub contact_area: f64,
}

pub fn write_report(path: &Path, rows: &[ReportRow]) -> Result<()> {
    let mut w = LedgerWriter::create(path)?;
    w.write_line(REPORT_HEADER)?;
    for r in rows {
        w.write_line(&format!(
            "{} {} {} {}",
            num(r.time),
            num(r.displacement),
            num(r.force),
            num(r.contact_area)
        ))?;
    }
    w.flush()
}

/// Report rows after the header line.
pub fn read_report(path: &Path) -> Result<Vec<ReportRow>> {
    let f = File::open(path).with_context(|| format!("cannot open report {}", path.display()))?;
    let mut rows = Vec::new();
    for (i, line) in BufReader::new(f).lines().enumerate().skip(1) {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let v = line
            .split_whitespace()
            .map(|p| p.parse::<f64>())
            .collect::<Result<Vec<_>, _>>()
            .with_context(|| format!("{}:{}: non-numeric field", path.display(), i + 1))?;
        if v.len() != 4 {
            bail!("{}:{}: expected 4 columns, found {}", path.display(), i + 1, v.len());
        }
        rows.push(ReportRow { time: v[0], displacement: v[1], force: v[2], contact_area: v[3] });
    }
    Ok(rows)
}

/// Interleaved `[d0, f0, d1, f1, ...]` curve as two columns.
pub fn write_curve_prediction(path: &Path, curve: &[f64]) -> Result<()> {
    let mut w = LedgerWriter::create(path)?;
    w.write_line(CURVE_PREDICTION_HEADER)?;
    for pair in curve.chunks_exact(2) {
        w.write_line(&format!("{} {}", num(pair[0]), num(pair[1])))?;
    }
    w.flush()
}

pub fn write_param_prediction(path: &Path, names: &[String], values: &[f64]) -> Result<()> {
    let mut w = LedgerWriter::create(path)?;
    w.write_line(&names.join("    "))?;
    let row: Vec<String> = values.iter().map(|v| num(*v)).collect();
    w.write_line(&row.join(" "))?;
    w.flush()
}
