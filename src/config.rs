use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::dataset::Representation;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Root {
    pub study: Study,
    pub solver: Solver,
    pub sweep: Sweep,
    #[serde(default)]
    pub extract: Extract,
    #[serde(default)]
    pub dataset: Dataset,
    #[serde(default)]
    pub surrogate: Surrogate,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Study {
    pub name: String,
    #[serde(default = "default_version")]
    pub version: String,
}

fn default_version() -> String {
    "1".to_string()
}

/// External solver invocation and job-lifecycle polling.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Solver {
    /// Argument vector; every `{job}` is replaced by the job name
    pub command: Vec<String>,
    #[serde(default = "default_failure_marker")]
    pub failure_marker: String,
    #[serde(default = "default_status_extension")]
    pub status_extension: String,
    #[serde(default = "default_lock_extension")]
    pub lock_extension: String,
    #[serde(default = "default_status_poll")]
    pub status_poll_secs: f64,
    #[serde(default = "default_release_poll")]
    pub release_poll_secs: f64,
    /// Deadline for the whole wait phase of one job (absent = wait forever)
    #[serde(default)]
    pub timeout_secs: Option<f64>,
    #[serde(default = "default_scratch_extensions")]
    pub scratch_extensions: Vec<String>,
}

fn default_failure_marker() -> String {
    "THE ANALYSIS HAS NOT BEEN COMPLETED".to_string()
}
fn default_status_extension() -> String {
    "sta".to_string()
}
fn default_lock_extension() -> String {
    "lck".to_string()
}
fn default_status_poll() -> f64 { 10.0 }
fn default_release_poll() -> f64 { 1.0 }
fn default_scratch_extensions() -> Vec<String> {
    ["log", "prt", "msg", "sta", "com", "dat"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Solver {
    pub fn status_poll(&self) -> Duration {
        Duration::from_secs_f64(self.status_poll_secs)
    }

    pub fn release_poll(&self) -> Duration {
        Duration::from_secs_f64(self.release_poll_secs)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs_f64)
    }
}

/// One swept material parameter.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Dimension {
    pub name: String,
    /// Placeholder substituted in the template deck
    pub token: String,
    pub start: f64,
    pub end: f64,
    pub count: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Sweep {
    pub template: PathBuf,
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
    #[serde(default = "default_archive_dir")]
    pub archive_dir: PathBuf,
    #[serde(default = "default_param_ledger")]
    pub param_ledger: PathBuf,
    #[serde(default = "default_job_prefix")]
    pub job_prefix: String,
    #[serde(default = "default_id_width")]
    pub id_width: usize,
    #[serde(default = "default_deck_extension")]
    pub deck_extension: String,
    #[serde(default = "default_result_extension")]
    pub result_extension: String,
    /// Further per-job files moved into the archive, e.g. a result-set export
    #[serde(default)]
    pub extra_archive_extensions: Vec<String>,
    #[serde(default = "default_value_width")]
    pub value_width: usize,
    #[serde(default = "default_value_precision")]
    pub value_precision: usize,
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Outer dimension first
    pub dimensions: Vec<Dimension>,
}

fn default_work_dir() -> PathBuf {
    PathBuf::from(".")
}
fn default_archive_dir() -> PathBuf {
    PathBuf::from("Jobs_Batch")
}
fn default_param_ledger() -> PathBuf {
    PathBuf::from("Database-P.dat")
}
fn default_job_prefix() -> String {
    "Job-".to_string()
}
fn default_id_width() -> usize { 4 }
fn default_deck_extension() -> String {
    "inp".to_string()
}
fn default_result_extension() -> String {
    "odb".to_string()
}
fn default_value_width() -> usize { 12 }
fn default_value_precision() -> usize { 1 }
fn default_workers() -> usize { 1 }

impl Sweep {
    /// Extensions moved into the archive after a successful job.
    pub fn archive_extensions(&self) -> Vec<String> {
        let mut exts = vec![self.deck_extension.clone(), self.result_extension.clone()];
        exts.extend(self.extra_archive_extensions.iter().cloned());
        exts
    }

    pub fn parameter_names(&self) -> Vec<String> {
        self.dimensions.iter().map(|d| d.name.clone()).collect()
    }
}

/// Result-set locations read by the extractor.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Extract {
    #[serde(default = "default_report_dir")]
    pub report_dir: PathBuf,
    #[serde(default = "default_results_ledger")]
    pub results_ledger: PathBuf,
    #[serde(default = "default_export_extension")]
    pub export_extension: String,
    #[serde(default = "default_step")]
    pub step: String,
    #[serde(default = "default_instance")]
    pub instance: String,
    #[serde(default = "default_node_set")]
    pub node_set: String,
    #[serde(default = "default_displacement_field")]
    pub displacement_field: String,
    #[serde(default = "default_force_field")]
    pub force_field: String,
    #[serde(default = "default_component")]
    pub component: usize,
    #[serde(default = "default_history_region")]
    pub history_region: String,
    #[serde(default = "default_history_output")]
    pub history_output: String,
    /// Indentation is recorded as negative displacement and force
    #[serde(default = "default_true")]
    pub invert_sign: bool,
    #[serde(default)]
    pub time_tolerance: f64,
}

fn default_report_dir() -> PathBuf {
    PathBuf::from("RPT_Files")
}
fn default_results_ledger() -> PathBuf {
    PathBuf::from("Database-R.dat")
}
fn default_export_extension() -> String {
    "json".to_string()
}
fn default_step() -> String {
    "Step-1".to_string()
}
fn default_instance() -> String {
    "PART-1-1".to_string()
}
fn default_node_set() -> String {
    "SPHERE".to_string()
}
fn default_displacement_field() -> String {
    "U".to_string()
}
fn default_force_field() -> String {
    "RF".to_string()
}
fn default_component() -> usize { 1 }
fn default_history_region() -> String {
    "NodeSet  Z000001".to_string()
}
fn default_history_output() -> String {
    "CAREA    SURF/RSURF".to_string()
}
fn default_true() -> bool { true }

impl Default for Extract {
    fn default() -> Self {
        Self {
            report_dir: default_report_dir(),
            results_ledger: default_results_ledger(),
            export_extension: default_export_extension(),
            step: default_step(),
            instance: default_instance(),
            node_set: default_node_set(),
            displacement_field: default_displacement_field(),
            force_field: default_force_field(),
            component: default_component(),
            history_region: default_history_region(),
            history_output: default_history_output(),
            invert_sign: true,
            time_tolerance: 0.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Dataset {
    #[serde(default = "default_points_per_curve")]
    pub points_per_curve: usize,
}

fn default_points_per_curve() -> usize { 50 }

impl Default for Dataset {
    fn default() -> Self {
        Self { points_per_curve: default_points_per_curve() }
    }
}

/// Regressor hyper-parameters and prediction output.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Surrogate {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_hidden_layers")]
    pub hidden_layers: Vec<usize>,
    #[serde(default = "default_alpha")]
    pub alpha: f64,
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
    #[serde(default = "default_max_iter")]
    pub max_iter: usize,
    #[serde(default = "default_tol")]
    pub tol: f64,
    #[serde(default = "default_n_iter_no_change")]
    pub n_iter_no_change: usize,
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Curve representations fed to inverse models: "full" or "binned:<n>"
    #[serde(default = "default_inverse")]
    pub inverse: Vec<String>,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("NN_Output")
}
fn default_hidden_layers() -> Vec<usize> {
    vec![10]
}
fn default_alpha() -> f64 { 1e-5 }
fn default_learning_rate() -> f64 { 1e-3 }
fn default_max_iter() -> usize { 1000 }
fn default_tol() -> f64 { 1e-4 }
fn default_n_iter_no_change() -> usize { 10 }
fn default_seed() -> u64 { 42 }
fn default_inverse() -> Vec<String> {
    vec!["full".to_string()]
}

impl Default for Surrogate {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            hidden_layers: default_hidden_layers(),
            alpha: default_alpha(),
            learning_rate: default_learning_rate(),
            max_iter: default_max_iter(),
            tol: default_tol(),
            n_iter_no_change: default_n_iter_no_change(),
            seed: default_seed(),
            inverse: default_inverse(),
        }
    }
}

impl Surrogate {
    pub fn representations(&self) -> Result<Vec<Representation>> {
        self.inverse
            .iter()
            .map(|s| s.parse::<Representation>())
            .collect()
    }
}

impl Root {
    /// Read, parse and validate a configuration file.
    pub fn load(path: &Path) -> Result<(Self, String)> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read config: {}", path.display()))?;
        let cfg: Root = toml::from_str(&text)
            .with_context(|| format!("failed to parse config: {}", path.display()))?;
        cfg.validate()?;
        Ok((cfg, text))
    }

    pub fn validate(&self) -> Result<()> {
        if self.solver.command.is_empty() {
            bail!("solver.command must not be empty");
        }
        if self.solver.failure_marker.is_empty() {
            bail!("solver.failure_marker must not be empty");
        }
        if !(self.solver.status_poll_secs > 0.0) || !(self.solver.release_poll_secs > 0.0) {
            bail!("solver.status_poll_secs and solver.release_poll_secs must be positive");
        }
        if let Some(t) = self.solver.timeout_secs {
            if !(t > 0.0) {
                bail!("solver.timeout_secs must be positive");
            }
        }

        let sweep = &self.sweep;
        if sweep.dimensions.is_empty() {
            bail!("sweep.dimensions must name at least one parameter");
        }
        let mut tokens = HashSet::new();
        for dim in &sweep.dimensions {
            if dim.count == 0 {
                bail!("sweep.dimensions.{}.count must be >= 1", dim.name);
            }
            if dim.start > dim.end {
                bail!("sweep.dimensions.{}.start must be <= end", dim.name);
            }
            if dim.token.is_empty() {
                bail!("sweep.dimensions.{}.token must not be empty", dim.name);
            }
            if !tokens.insert(dim.token.as_str()) {
                bail!("sweep.dimensions token {} is used twice", dim.token);
            }
        }
        if sweep.id_width == 0 {
            bail!("sweep.id_width must be >= 1");
        }
        if sweep.workers == 0 {
            bail!("sweep.workers must be >= 1");
        }

        if self.dataset.points_per_curve == 0 {
            bail!("dataset.points_per_curve must be >= 1");
        }

        let sur = &self.surrogate;
        if sur.hidden_layers.is_empty() || sur.hidden_layers.contains(&0) {
            bail!("surrogate.hidden_layers must list positive layer widths");
        }
        if !(sur.learning_rate > 0.0) {
            bail!("surrogate.learning_rate must be positive");
        }
        if sur.alpha < 0.0 {
            bail!("surrogate.alpha must be >= 0");
        }
        if sur.max_iter == 0 {
            bail!("surrogate.max_iter must be >= 1");
        }
        let curve_len = 2 * self.dataset.points_per_curve;
        for repr in sur.representations()? {
            if let Representation::Binned(n) = repr {
                if n == 0 || n > curve_len {
                    bail!(
                        "surrogate.inverse binned:{} must be in [1, {}] for {} points per curve",
                        n,
                        curve_len,
                        self.dataset.points_per_curve
                    );
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn sample(work_dir: &Path) -> Root {
    let text = format!(
        r#"
[study]
name = "indentation"

[solver]
command = ["sh", "-c", '{solver}']
status_poll_secs = 0.01
release_poll_secs = 0.01
timeout_secs = 2.0

[sweep]
template = "{dir}/TemplateJob.inp"
work_dir = "{dir}"
archive_dir = "{dir}/Jobs_Batch"
param_ledger = "{dir}/Database-P.dat"

[[sweep.dimensions]]
name = "YoungsModulus"
token = "YOUNGSMODULUS"
start = 100.0
end = 200.0
count = 2

[[sweep.dimensions]]
name = "YieldStress"
token = "YIELDSTRESS"
start = 10.0
end = 10.0
count = 1

[extract]
report_dir = "{dir}/RPT_Files"
results_ledger = "{dir}/Database-R.dat"

[dataset]
points_per_curve = 3

[surrogate]
output_dir = "{dir}/NN_Output"
max_iter = 200
inverse = ["full", "binned:2"]
"#,
        dir = work_dir.display(),
        solver = crate::job::tests::STAGED_SOLVER,
    );
    toml::from_str(&text).expect("sample config parses")
}
