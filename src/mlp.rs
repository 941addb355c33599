//! Feedforward regressor for the surrogate models.
//!
//! Fully connected ReLU hidden layers with an identity output layer,
//! trained full-batch with Adam on squared error plus an L2 penalty.
//!
//! References:
//! - Glorot, X., Bengio, Y. "Understanding the difficulty of training deep
//!   feedforward neural networks" (2010)
//! - Kingma, D., Ba, J. "Adam: A Method for Stochastic Optimization" (2015)

use anyhow::{bail, Result};
use ndarray::{Array, Array1, Array2, ArrayView2, Axis, Dimension, Zip};
use serde::Serialize;

use crate::config;

/// Something that learns a mapping from rows of `x` to rows of `y`.
pub trait Regressor {
    fn fit(&mut self, x: ArrayView2<f64>, y: ArrayView2<f64>) -> Result<FitReport>;
    fn predict(&self, x: ArrayView2<f64>) -> Result<Array2<f64>>;
}

#[derive(Clone, Debug)]
pub struct MlpConfig {
    /// Width of each hidden layer
    pub hidden_layers: Vec<usize>,
    /// L2 penalty strength
    pub alpha: f64,
    pub learning_rate: f64,
    pub max_iter: usize,
    /// Minimum loss improvement that resets the patience counter
    pub tol: f64,
    pub n_iter_no_change: usize,
    /// Adam moment decay rates
    pub beta1: f64,
    pub beta2: f64,
    pub epsilon: f64,
    /// Seed for reproducibility
    pub seed: u64,
}

impl Default for MlpConfig {
    fn default() -> Self {
        Self {
            hidden_layers: vec![10],
            alpha: 1e-5,
            learning_rate: 1e-3,
            max_iter: 1000,
            tol: 1e-4,
            n_iter_no_change: 10,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
            seed: 42,
        }
    }
}

impl MlpConfig {
    pub fn from_config(cfg: &config::Surrogate) -> Self {
        Self {
            hidden_layers: cfg.hidden_layers.clone(),
            alpha: cfg.alpha,
            learning_rate: cfg.learning_rate,
            max_iter: cfg.max_iter,
            tol: cfg.tol,
            n_iter_no_change: cfg.n_iter_no_change,
            seed: cfg.seed,
            ..Self::default()
        }
    }
}

/// Outcome of one `fit` call
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FitReport {
    pub iterations: usize,
    pub initial_loss: f64,
    pub final_loss: f64,
    /// Stopped on the patience rule rather than `max_iter`
    pub converged: bool,
}

#[derive(Clone, Debug)]
struct Layer {
    /// fan_in x fan_out
    w: Array2<f64>,
    b: Array1<f64>,
}

/// Adam first/second moment estimates for one layer
#[derive(Clone, Debug)]
struct Moments {
    m_w: Array2<f64>,
    v_w: Array2<f64>,
    m_b: Array1<f64>,
    v_b: Array1<f64>,
}

impl Moments {
    fn zeros_like(layer: &Layer) -> Self {
        Self {
            m_w: Array2::zeros(layer.w.raw_dim()),
            v_w: Array2::zeros(layer.w.raw_dim()),
            m_b: Array1::zeros(layer.b.raw_dim()),
            v_b: Array1::zeros(layer.b.raw_dim()),
        }
    }
}

/// Multi-layer perceptron
#[derive(Clone, Debug)]
pub struct Mlp {
    config: MlpConfig,
    layers: Vec<Layer>,
    rng_state: u64,
}

impl Mlp {
    pub fn new(config: MlpConfig) -> Self {
        Self {
            rng_state: config.seed,
            config,
            layers: Vec::new(),
        }
    }

    /// Simple LCG random number generator (deterministic)
    fn rand(&mut self) -> f64 {
        self.rng_state = self.rng_state.wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        ((self.rng_state >> 33) as f64) / ((1u64 << 31) as f64)
    }

    /// Glorot-uniform weights and biases for every layer
    fn initialize(&mut self, n_in: usize, n_out: usize) {
        self.rng_state = self.config.seed;
        let mut sizes = vec![n_in];
        sizes.extend(self.config.hidden_layers.iter().copied());
        sizes.push(n_out);

        self.layers = Vec::with_capacity(sizes.len() - 1);
        for pair in sizes.windows(2) {
            let (fan_in, fan_out) = (pair[0], pair[1]);
            let bound = (6.0 / (fan_in + fan_out) as f64).sqrt();
            let w = Array2::from_shape_simple_fn((fan_in, fan_out), || (2.0 * self.rand() - 1.0) * bound);
            let b = Array1::from_shape_simple_fn(fan_out, || (2.0 * self.rand() - 1.0) * bound);
            self.layers.push(Layer { w, b });
        }
    }

    /// Activations of every layer, input first.
    fn forward(&self, x: ArrayView2<f64>) -> Vec<Array2<f64>> {
        let last = self.layers.len() - 1;
        let mut acts = Vec::with_capacity(self.layers.len() + 1);
        acts.push(x.to_owned());
        for (i, layer) in self.layers.iter().enumerate() {
            let mut z = acts[i].dot(&layer.w) + &layer.b;
            if i < last {
                z.mapv_inplace(|v| v.max(0.0));
            }
            acts.push(z);
        }
        acts
    }

    fn loss(&self, out: &Array2<f64>, y: ArrayView2<f64>) -> f64 {
        let n = y.nrows() as f64;
        let sq: f64 = (out - &y).mapv(|e| e * e).sum();
        let l2: f64 = self.layers.iter().map(|l| l.w.mapv(|w| w * w).sum()).sum();
        sq / (2.0 * n) + self.config.alpha * l2 / (2.0 * n)
    }

    /// Gradients of the loss with respect to every layer's weights and biases.
    fn backward(&self, acts: &[Array2<f64>], y: ArrayView2<f64>) -> Vec<(Array2<f64>, Array1<f64>)> {
        let n = y.nrows() as f64;
        let depth = self.layers.len();
        let mut grads = Vec::with_capacity(depth);
        let mut delta = (&acts[depth] - &y) / n;

        for l in (0..depth).rev() {
            let layer = &self.layers[l];
            let gw = acts[l].t().dot(&delta) + &layer.w * (self.config.alpha / n);
            let gb = delta.sum_axis(Axis(0));
            if l > 0 {
                let mut next = delta.dot(&layer.w.t());
                next.zip_mut_with(&acts[l], |d, &a| {
                    if a <= 0.0 {
                        *d = 0.0;
                    }
                });
                delta = next;
            }
            grads.push((gw, gb));
        }
        grads.reverse();
        grads
    }
}

fn adam_step<D: Dimension>(
    param: &mut Array<f64, D>,
    m: &mut Array<f64, D>,
    v: &mut Array<f64, D>,
    grad: &Array<f64, D>,
    lr_t: f64,
    cfg: &MlpConfig,
) {
    Zip::from(param).and(m).and(v).and(grad).for_each(|p, m, v, &g| {
        *m = cfg.beta1 * *m + (1.0 - cfg.beta1) * g;
        *v = cfg.beta2 * *v + (1.0 - cfg.beta2) * g * g;
        *p -= lr_t * *m / (v.sqrt() + cfg.epsilon);
    });
}

impl Regressor for Mlp {
    fn fit(&mut self, x: ArrayView2<f64>, y: ArrayView2<f64>) -> Result<FitReport> {
        if x.nrows() == 0 {
            bail!("cannot fit on zero samples");
        }
        if x.nrows() != y.nrows() {
            bail!("x has {} rows but y has {}", x.nrows(), y.nrows());
        }
        self.initialize(x.ncols(), y.ncols());
        let mut moments: Vec<Moments> = self.layers.iter().map(Moments::zeros_like).collect();

        let mut initial_loss = f64::NAN;
        let mut best_loss = f64::INFINITY;
        let mut no_improvement = 0;
        let mut loss = f64::NAN;
        let mut iterations = 0;
        let mut converged = false;

        for iter in 0..self.config.max_iter {
            let acts = self.forward(x);
            loss = self.loss(&acts[self.layers.len()], y);
            if iter == 0 {
                initial_loss = loss;
            }
            let grads = self.backward(&acts, y);

            let t = (iter + 1) as i32;
            let lr_t = self.config.learning_rate * (1.0 - self.config.beta2.powi(t)).sqrt()
                / (1.0 - self.config.beta1.powi(t));
            for ((layer, mom), (gw, gb)) in self.layers.iter_mut().zip(moments.iter_mut()).zip(grads.iter()) {
                adam_step(&mut layer.w, &mut mom.m_w, &mut mom.v_w, gw, lr_t, &self.config);
                adam_step(&mut layer.b, &mut mom.m_b, &mut mom.v_b, gb, lr_t, &self.config);
            }
            iterations = iter + 1;

            if loss > best_loss - self.config.tol {
                no_improvement += 1;
            } else {
                no_improvement = 0;
            }
            if loss < best_loss {
                best_loss = loss;
            }
            if no_improvement > self.config.n_iter_no_change {
                converged = true;
                break;
            }
        }

        Ok(FitReport { iterations, initial_loss, final_loss: loss, converged })
    }

    fn predict(&self, x: ArrayView2<f64>) -> Result<Array2<f64>> {
        let Some(first) = self.layers.first() else {
            bail!("model has not been fitted");
        };
        if x.ncols() != first.w.nrows() {
            bail!("model expects {} input columns, got {}", first.w.nrows(), x.ncols());
        }
        let mut acts = self.forward(x);
        Ok(acts.pop().unwrap_or_else(|| Array2::zeros((0, 0))))
    }
}
