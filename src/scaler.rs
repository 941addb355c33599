//! Per-column standardization.

use anyhow::{bail, Result};
use ndarray::{Array1, Array2, ArrayView2, Axis};

/// Zero-mean, unit-variance scaling fitted column by column.
///
/// Uses the population standard deviation. A constant column gets scale 1
/// so it maps to zero instead of NaN.
#[derive(Debug, Clone, PartialEq)]
pub struct StandardScaler {
    pub mean: Array1<f64>,
    pub scale: Array1<f64>,
}

impl StandardScaler {
    pub fn fit(data: ArrayView2<f64>) -> Result<Self> {
        if data.nrows() == 0 {
            bail!("cannot fit a scaler on zero samples");
        }
        let mean = data.mean_axis(Axis(0)).unwrap_or_else(|| Array1::zeros(data.ncols()));
        let scale = data
            .std_axis(Axis(0), 0.0)
            .mapv(|s| if s > f64::EPSILON { s } else { 1.0 });
        Ok(Self { mean, scale })
    }

    pub fn n_features(&self) -> usize {
        self.mean.len()
    }

    pub fn transform(&self, data: ArrayView2<f64>) -> Result<Array2<f64>> {
        self.check(data)?;
        Ok((&data - &self.mean) / &self.scale)
    }

    pub fn inverse_transform(&self, data: ArrayView2<f64>) -> Result<Array2<f64>> {
        self.check(data)?;
        Ok(&data * &self.scale + &self.mean)
    }

    fn check(&self, data: ArrayView2<f64>) -> Result<()> {
        if data.ncols() != self.n_features() {
            bail!(
                "scaler fitted on {} columns, got {}",
                self.n_features(),
                data.ncols()
            );
        }
        Ok(())
    }
}
