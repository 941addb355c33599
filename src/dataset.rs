//! Training matrices rebuilt from the parameter ledger and report files.

use anyhow::{bail, Result};
use ndarray::Array2;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{info, warn};

use crate::config;
use crate::grid::JobNaming;
use crate::ledger::{read_param_ledger, read_report};

/// One job's parameters joined with its force-displacement curve.
#[derive(Debug, Clone, PartialEq)]
pub struct CurveSample {
    pub number: u32,
    pub job: String,
    pub params: Vec<f64>,
    /// `[d0, f0, d1, f1, ...]`, length `2 * points_per_curve`
    pub curve: Vec<f64>,
}

/// Curve encoding fed to an inverse model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Representation {
    Full,
    Binned(usize),
}

impl fmt::Display for Representation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Representation::Full => write!(f, "full"),
            Representation::Binned(n) => write!(f, "binned_{}", n),
        }
    }
}

impl FromStr for Representation {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        if s == "full" {
            return Ok(Representation::Full);
        }
        match s.strip_prefix("binned:").map(|n| n.parse::<usize>()) {
            Some(Ok(n)) => Ok(Representation::Binned(n)),
            _ => bail!("unknown curve representation {:?} (use \"full\" or \"binned:<n>\")", s),
        }
    }
}

/// Mean of each of `n_bins` contiguous chunks of `len / n_bins` values.
///
/// Chunk size uses floor division: the trailing `len % n_bins` values are
/// dropped, not folded into the last bin.
pub fn reduce(curve: &[f64], n_bins: usize) -> Result<Vec<f64>> {
    if n_bins == 0 {
        bail!("cannot reduce a curve into zero bins");
    }
    let size = curve.len() / n_bins;
    if size == 0 {
        bail!("curve of length {} is shorter than {} bins", curve.len(), n_bins);
    }
    Ok(curve
        .chunks_exact(size)
        .take(n_bins)
        .map(|chunk| chunk.iter().sum::<f64>() / size as f64)
        .collect())
}

#[derive(Debug, Clone)]
pub struct CurveDataset {
    pub param_names: Vec<String>,
    pub points_per_curve: usize,
    pub samples: Vec<CurveSample>,
    /// `(job, reason)` for every ledger row left out
    pub excluded: Vec<(String, String)>,
}

impl CurveDataset {
    pub fn from_config(cfg: &config::Root) -> Result<Self> {
        Self::load(
            &cfg.sweep.param_ledger,
            &cfg.extract.report_dir,
            &JobNaming::from_config(&cfg.sweep),
            cfg.sweep.parameter_names(),
            cfg.dataset.points_per_curve,
        )
    }

    /// Join ledger rows to `<report_dir>/<job>.rpt` in ledger order.
    ///
    /// A row is dropped, with a warning, when its report is missing,
    /// unreadable, or does not hold exactly `points_per_curve` rows.
    pub fn load(
        param_ledger: &Path,
        report_dir: &Path,
        naming: &JobNaming,
        param_names: Vec<String>,
        points_per_curve: usize,
    ) -> Result<Self> {
        let records = read_param_ledger(param_ledger, param_names.len())?;
        let mut samples = Vec::new();
        let mut excluded = Vec::new();

        for rec in records {
            let job = naming.name(rec.number);
            let path: PathBuf = report_dir.join(format!("{}.rpt", job));
            if !path.exists() {
                warn!(job = %job, path = %path.display(), "report not found, skipping");
                excluded.push((job, "missing report".to_string()));
                continue;
            }
            let rows = match read_report(&path) {
                Ok(rows) => rows,
                Err(e) => {
                    warn!(job = %job, error = %e, "report unreadable, skipping");
                    excluded.push((job, format!("unreadable report: {}", e)));
                    continue;
                }
            };
            if rows.len() != points_per_curve {
                warn!(job = %job, rows = rows.len(), expected = points_per_curve, "incomplete data, skipping");
                excluded.push((job, format!("{} rows, expected {}", rows.len(), points_per_curve)));
                continue;
            }
            let curve = rows.iter().flat_map(|r| [r.displacement, r.force]).collect();
            samples.push(CurveSample { number: rec.number, job, params: rec.params, curve });
        }

        info!(samples = samples.len(), excluded = excluded.len(), "dataset loaded");
        Ok(Self { param_names, points_per_curve, samples, excluded })
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn params_matrix(&self) -> Array2<f64> {
        to_matrix(self.samples.iter().map(|s| s.params.as_slice()), self.param_names.len())
    }

    pub fn curves_matrix(&self) -> Array2<f64> {
        to_matrix(self.samples.iter().map(|s| s.curve.as_slice()), 2 * self.points_per_curve)
    }

    /// Raw (unscaled) curves in the requested representation.
    pub fn representation_matrix(&self, repr: Representation) -> Result<Array2<f64>> {
        match repr {
            Representation::Full => Ok(self.curves_matrix()),
            Representation::Binned(n) => {
                let rows = self
                    .samples
                    .iter()
                    .map(|s| reduce(&s.curve, n))
                    .collect::<Result<Vec<_>>>()?;
                Ok(to_matrix(rows.iter().map(|r| r.as_slice()), n))
            }
        }
    }
}

fn to_matrix<'a>(rows: impl Iterator<Item = &'a [f64]>, width: usize) -> Array2<f64> {
    let flat: Vec<f64> = rows.flat_map(|r| r.iter().copied()).collect();
    let n = flat.len() / width.max(1);
    Array2::from_shape_vec((n, width), flat).unwrap_or_else(|_| Array2::zeros((0, width)))
}
