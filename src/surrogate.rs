//! Forward (parameters → curve) and inverse (curve → parameters) surrogates.
//!
//! Each feature space gets its own named scaler, fitted once on the full
//! dataset:
//! - `params_forward`: forward model input
//! - `params_inverse`: inverse model targets
//! - `curve_full`, `curve_binned_<n>`: forward targets and inverse inputs

use anyhow::{bail, Context, Result};
use ndarray::{Array2, ArrayView2, Axis};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::config;
use crate::dataset::{CurveDataset, CurveSample, Representation};
use crate::ledger::{write_curve_prediction, write_param_prediction};
use crate::mlp::{FitReport, Mlp, MlpConfig, Regressor};
use crate::scaler::StandardScaler;

pub const PARAMS_FORWARD: &str = "params_forward";
pub const PARAMS_INVERSE: &str = "params_inverse";

pub fn curve_scaler_name(repr: Representation) -> String {
    format!("curve_{}", repr)
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelSummary {
    pub direction: &'static str,
    pub representation: String,
    pub inputs: usize,
    pub outputs: usize,
    pub fit: FitReport,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrainingSummary {
    pub samples: usize,
    pub excluded: Vec<String>,
    pub models: Vec<ModelSummary>,
    pub prediction_files: usize,
    pub output_dir: PathBuf,
}

pub struct SurrogateTrainer {
    output_dir: PathBuf,
    mlp: MlpConfig,
    representations: Vec<Representation>,
    scalers: BTreeMap<String, StandardScaler>,
    forward: Option<Mlp>,
    inverse: BTreeMap<Representation, Mlp>,
}

impl SurrogateTrainer {
    pub fn new(cfg: &config::Surrogate) -> Result<Self> {
        Ok(Self {
            output_dir: cfg.output_dir.clone(),
            mlp: MlpConfig::from_config(cfg),
            representations: cfg.representations()?,
            scalers: BTreeMap::new(),
            forward: None,
            inverse: BTreeMap::new(),
        })
    }

    pub fn scaler(&self, name: &str) -> Result<&StandardScaler> {
        self.scalers
            .get(name)
            .with_context(|| format!("scaler {} has not been fitted", name))
    }

    fn scaled(&self, name: &str, data: ArrayView2<f64>) -> Result<Array2<f64>> {
        self.scaler(name)?.transform(data)
    }

    /// Fit every named scaler over the full dataset.
    pub fn fit_scalers(&mut self, ds: &CurveDataset) -> Result<()> {
        let params = ds.params_matrix();
        self.scalers.insert(PARAMS_FORWARD.to_string(), StandardScaler::fit(params.view())?);
        self.scalers.insert(PARAMS_INVERSE.to_string(), StandardScaler::fit(params.view())?);

        let mut spaces = vec![Representation::Full];
        spaces.extend(self.representations.iter().copied());
        for repr in spaces {
            let curves = ds.representation_matrix(repr)?;
            let scaler = StandardScaler::fit(curves.view())
                .with_context(|| format!("cannot fit {} scaler", curve_scaler_name(repr)))?;
            self.scalers.insert(curve_scaler_name(repr), scaler);
        }
        debug!(scalers = self.scalers.len(), "scalers fitted");
        Ok(())
    }

    pub fn train_forward(&mut self, ds: &CurveDataset) -> Result<ModelSummary> {
        let x = self.scaled(PARAMS_FORWARD, ds.params_matrix().view())?;
        let y = self.scaled(&curve_scaler_name(Representation::Full), ds.curves_matrix().view())?;
        let mut model = Mlp::new(self.mlp.clone());
        let fit = model.fit(x.view(), y.view()).context("forward model training failed")?;
        info!(iterations = fit.iterations, loss = fit.final_loss, converged = fit.converged, "forward model trained");
        self.forward = Some(model);
        Ok(ModelSummary {
            direction: "forward",
            representation: Representation::Full.to_string(),
            inputs: x.ncols(),
            outputs: y.ncols(),
            fit,
        })
    }

    pub fn train_inverse(&mut self, ds: &CurveDataset, repr: Representation) -> Result<ModelSummary> {
        let x = self.scaled(&curve_scaler_name(repr), ds.representation_matrix(repr)?.view())?;
        let y = self.scaled(PARAMS_INVERSE, ds.params_matrix().view())?;
        let mut model = Mlp::new(self.mlp.clone());
        let fit = model
            .fit(x.view(), y.view())
            .with_context(|| format!("inverse model ({}) training failed", repr))?;
        info!(
            representation = %repr,
            iterations = fit.iterations,
            loss = fit.final_loss,
            converged = fit.converged,
            "inverse model trained"
        );
        self.inverse.insert(repr, model);
        Ok(ModelSummary {
            direction: "inverse",
            representation: repr.to_string(),
            inputs: x.ncols(),
            outputs: y.ncols(),
            fit,
        })
    }

    pub fn forward_path(&self, job: &str) -> PathBuf {
        self.output_dir
            .join("forward_predictions")
            .join(format!("{}_curve_pred.dat", job))
    }

    pub fn inverse_path(&self, repr: Representation, job: &str) -> PathBuf {
        self.output_dir
            .join("inverse_predictions")
            .join(repr.to_string())
            .join(format!("{}_params_pred.dat", job))
    }

    /// Forward curve in physical units for one parameter vector.
    pub fn predict_curve(&self, params: &[f64]) -> Result<Vec<f64>> {
        let model = self.forward.as_ref().context("forward model has not been trained")?;
        let x = self.scaled(PARAMS_FORWARD, row(params)?.view())?;
        let y = model.predict(x.view())?;
        let curve = self
            .scaler(&curve_scaler_name(Representation::Full))?
            .inverse_transform(y.view())?;
        Ok(curve.index_axis(Axis(0), 0).to_vec())
    }

    /// Parameters in physical units recovered from a sample's curve.
    pub fn predict_params(&self, repr: Representation, curve: &[f64]) -> Result<Vec<f64>> {
        let model = self
            .inverse
            .get(&repr)
            .with_context(|| format!("inverse model ({}) has not been trained", repr))?;
        let input = match repr {
            Representation::Full => curve.to_vec(),
            Representation::Binned(n) => crate::dataset::reduce(curve, n)?,
        };
        let x = self.scaled(&curve_scaler_name(repr), row(&input)?.view())?;
        let y = model.predict(x.view())?;
        let params = self.scaler(PARAMS_INVERSE)?.inverse_transform(y.view())?;
        Ok(params.index_axis(Axis(0), 0).to_vec())
    }

    /// Run every trained model on one sample and write its prediction files.
    pub fn predict_and_emit(&self, sample: &CurveSample, param_names: &[String]) -> Result<Vec<PathBuf>> {
        let mut written = Vec::new();

        let path = self.forward_path(&sample.job);
        ensure_parent(&path)?;
        write_curve_prediction(&path, &self.predict_curve(&sample.params)?)?;
        written.push(path);

        for &repr in self.inverse.keys() {
            let path = self.inverse_path(repr, &sample.job);
            ensure_parent(&path)?;
            write_param_prediction(&path, param_names, &self.predict_params(repr, &sample.curve)?)?;
            written.push(path);
        }
        Ok(written)
    }

    /// Train every model from scratch on `ds` and emit predictions for all
    /// of its samples.
    pub fn run(&mut self, ds: &CurveDataset) -> Result<TrainingSummary> {
        if ds.is_empty() {
            bail!("dataset is empty: no job has a complete report");
        }
        info!(samples = ds.len(), "training surrogates");
        self.fit_scalers(ds)?;

        let mut models = vec![self.train_forward(ds)?];
        for repr in self.representations.clone() {
            models.push(self.train_inverse(ds, repr)?);
        }

        let mut files = 0;
        for sample in &ds.samples {
            files += self
                .predict_and_emit(sample, &ds.param_names)
                .with_context(|| format!("train stage failed at {}", sample.job))?
                .len();
        }
        info!(files, "predictions saved in {}", self.output_dir.display());

        Ok(TrainingSummary {
            samples: ds.len(),
            excluded: ds.excluded.iter().map(|(job, _)| job.clone()).collect(),
            models,
            prediction_files: files,
            output_dir: self.output_dir.clone(),
        })
    }
}

fn row(values: &[f64]) -> Result<Array2<f64>> {
    Ok(Array2::from_shape_vec((1, values.len()), values.to_vec())?)
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("cannot create {}", parent.display()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn dataset() -> CurveDataset {
        let samples = (0..6)
            .map(|i| {
                let e = 100.0 + 20.0 * i as f64;
                let y = 10.0 + (i % 3) as f64;
                let curve = (0..3)
                    .flat_map(|k| {
                        let d = 0.05 * k as f64;
                        [d, e * d * d + y * d]
                    })
                    .collect();
                CurveSample { number: i + 1, job: format!("Job-{:04}", i + 1), params: vec![e, y], curve }
            })
            .collect();
        CurveDataset {
            param_names: vec!["YoungsModulus".to_string(), "YieldStress".to_string()],
            points_per_curve: 3,
            samples,
            excluded: vec![("Job-0007".to_string(), "missing report".to_string())],
        }
    }

    fn surrogate_config(dir: &Path) -> config::Surrogate {
        config::Surrogate {
            output_dir: dir.join("NN_Output"),
            max_iter: 50,
            inverse: vec!["full".to_string(), "binned:2".to_string()],
            ..config::Surrogate::default()
        }
    }

    #[test]
    fn test_scalers_are_tracked_by_name() {
        let dir = TempDir::new().unwrap();
        let mut trainer = SurrogateTrainer::new(&surrogate_config(dir.path())).unwrap();
        trainer.fit_scalers(&dataset()).unwrap();

        for name in ["params_forward", "params_inverse", "curve_full", "curve_binned_2"] {
            assert!(trainer.scaler(name).is_ok(), "{}", name);
        }
        assert_eq!(trainer.scaler("curve_full").unwrap().n_features(), 6);
        assert_eq!(trainer.scaler("curve_binned_2").unwrap().n_features(), 2);
        assert!(trainer.scaler("curve_binned_3").is_err());
    }

    #[test]
    fn test_run_writes_one_file_per_job_per_model() {
        let dir = TempDir::new().unwrap();
        let ds = dataset();
        let mut trainer = SurrogateTrainer::new(&surrogate_config(dir.path())).unwrap();
        let summary = trainer.run(&ds).unwrap();

        assert_eq!(summary.samples, 6);
        assert_eq!(summary.excluded, vec!["Job-0007"]);
        assert_eq!(summary.models.len(), 3);
        assert_eq!(summary.models[2].representation, "binned_2");
        assert_eq!(summary.models[2].inputs, 2);
        assert_eq!(summary.prediction_files, 18);

        let fwd = fs::read_to_string(trainer.forward_path("Job-0003")).unwrap();
        let lines: Vec<&str> = fwd.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[1].split_whitespace().count(), 2);

        let inv = fs::read_to_string(trainer.inverse_path(Representation::Binned(2), "Job-0003")).unwrap();
        let lines: Vec<&str> = inv.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], "YoungsModulus    YieldStress");
        assert_eq!(lines[1].split_whitespace().count(), 2);
    }

    #[test]
    fn test_empty_dataset_is_fatal() {
        let dir = TempDir::new().unwrap();
        let mut ds = dataset();
        ds.samples.clear();
        let mut trainer = SurrogateTrainer::new(&surrogate_config(dir.path())).unwrap();
        assert!(trainer.run(&ds).is_err());
    }

    #[test]
    fn test_predict_before_training_fails() {
        let dir = TempDir::new().unwrap();
        let trainer = SurrogateTrainer::new(&surrogate_config(dir.path())).unwrap();
        assert!(trainer.predict_curve(&[100.0, 10.0]).is_err());
        assert!(trainer.predict_params(Representation::Full, &[0.0; 6]).is_err());
    }
}
