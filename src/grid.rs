//! Parameter grid and job numbering.

use crate::config;

/// `count` evenly spaced values from `start` to `end`, both included.
/// A single point yields `start`.
pub fn generate_grid(start: f64, end: f64, count: usize) -> Vec<f64> {
    match count {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (end - start) / ((count - 1) as f64);
            (0..count)
                .map(|i| if i == count - 1 { end } else { start + (i as f64) * step })
                .collect()
        }
    }
}

/// Builds job names such as `Job-0007` from the 1-based sequence number.
#[derive(Debug, Clone)]
pub struct JobNaming {
    pub prefix: String,
    pub width: usize,
}

impl JobNaming {
    pub fn from_config(sweep: &config::Sweep) -> Self {
        Self {
            prefix: sweep.job_prefix.clone(),
            width: sweep.id_width,
        }
    }

    pub fn name(&self, number: u32) -> String {
        format!("{}{:0width$}", self.prefix, number, width = self.width)
    }

    /// Inverse of [`JobNaming::name`]; `None` for anything else.
    pub fn parse(&self, name: &str) -> Option<u32> {
        let digits = name.strip_prefix(&self.prefix)?;
        if digits.len() < self.width || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        digits.parse().ok()
    }
}

/// One point of the Cartesian product with its job number.
#[derive(Debug, Clone, PartialEq)]
pub struct GridPoint {
    pub number: u32,
    pub values: Vec<f64>,
}

/// Cartesian product of the per-dimension grids in nested-loop order:
/// the first axis varies slowest. Numbers start at 1.
pub fn enumerate(axes: &[Vec<f64>]) -> Vec<GridPoint> {
    if axes.is_empty() || axes.iter().any(|a| a.is_empty()) {
        return Vec::new();
    }
    let total: usize = axes.iter().map(|a| a.len()).product();
    let mut points = Vec::with_capacity(total);
    let mut index = vec![0usize; axes.len()];

    for n in 0..total {
        points.push(GridPoint {
            number: (n + 1) as u32,
            values: index.iter().zip(axes).map(|(&i, axis)| axis[i]).collect(),
        });
        // odometer increment, last axis fastest
        for d in (0..axes.len()).rev() {
            index[d] += 1;
            if index[d] < axes[d].len() {
                break;
            }
            index[d] = 0;
        }
    }
    points
}

pub fn axes(sweep: &config::Sweep) -> Vec<Vec<f64>> {
    sweep
        .dimensions
        .iter()
        .map(|d| generate_grid(d.start, d.end, d.count))
        .collect()
}
