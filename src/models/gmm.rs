//! Gaussian mixture emitter
//!
//! Training uses the max approximation: each frame's posterior over
//! components is computed relative to the single best-scoring component, and
//! `log p(x)` is the score of that component.

use super::emitter::{Sampler, Scorer, Trainer};
use super::gaussian::{Gaussian, MIN_SAMPLES};
use super::persist::log_vec;
use crate::error::{HmmError, Result};
use crate::numeric::{exp_inplace, log_inplace, sample_discrete, NEG_INF};
use ndarray::{Array1, ArrayView1};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Mixture of diagonal Gaussians
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "GmmRecord", into = "GmmRecord")]
pub struct Gmm {
    name: String,
    dim: usize,
    components: Vec<Gaussian>,
    /// Canonical weights, log domain
    log_weights: Array1<f64>,
    weights: Array1<f64>,
    posterior_sum: Array1<f64>,
    n_samples: f64,
    likelihood: f64,
    iteration: usize,
    scratch: Vec<f64>,
}

impl PartialEq for Gmm {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.dim == other.dim
            && self.components == other.components
            && self.log_weights == other.log_weights
            && self.posterior_sum == other.posterior_sum
            && self.n_samples == other.n_samples
            && self.likelihood == other.likelihood
            && self.iteration == other.iteration
    }
}

impl Gmm {
    /// `k` standard normal components with uniform weights
    pub fn new(name: impl Into<String>, dim: usize, k: usize) -> Self {
        let name = name.into();
        let components = (0..k)
            .map(|i| Gaussian::new(format!("{}-{}", name, i), dim))
            .collect();
        let log_weights = Array1::from_elem(k, -(k as f64).ln());
        Self::build(name, dim, components, log_weights)
    }

    /// Mixture from explicit components and linear weights
    pub fn from_components(
        name: impl Into<String>,
        components: Vec<Gaussian>,
        weights: Array1<f64>,
    ) -> Result<Self> {
        let dim = components
            .first()
            .map(|c| c.dim())
            .ok_or_else(|| HmmError::field("components", "a mixture needs at least one component"))?;
        if let Some(bad) = components.iter().find(|c| c.dim() != dim) {
            return Err(HmmError::DimensionMismatch {
                expected: dim,
                found: bad.dim(),
            });
        }
        if weights.len() != components.len() {
            return Err(HmmError::DimensionMismatch {
                expected: components.len(),
                found: weights.len(),
            });
        }
        if weights.iter().any(|&w| !(w >= 0.0)) {
            return Err(HmmError::field("weights", "weights must be non-negative"));
        }
        let mut log_weights = weights;
        log_inplace(&mut log_weights);
        Ok(Self::build(name.into(), dim, components, log_weights))
    }

    /// `k` components with means drawn around `mean` using `sd`, uniform weights.
    ///
    /// Typically called with the mean and standard deviation of the training
    /// data.
    pub fn random(
        name: impl Into<String>,
        mean: &Array1<f64>,
        sd: &Array1<f64>,
        k: usize,
        seed: u64,
    ) -> Result<Self> {
        let name = name.into();
        let mut rng = StdRng::seed_from_u64(seed);
        let components = (0..k)
            .map(|i| Gaussian::random_with(format!("{}-{}", name, i), mean, sd, &mut rng))
            .collect::<Result<Vec<_>>>()?;
        Self::from_components(name, components, Array1::from_elem(k, 1.0 / k as f64))
    }

    fn build(name: String, dim: usize, components: Vec<Gaussian>, log_weights: Array1<f64>) -> Self {
        let k = components.len();
        let mut weights = log_weights.clone();
        exp_inplace(&mut weights);
        Self {
            name,
            dim,
            components,
            weights,
            log_weights,
            posterior_sum: Array1::zeros(k),
            n_samples: 0.0,
            likelihood: 0.0,
            iteration: 0,
            scratch: vec![0.0; k],
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn num_components(&self) -> usize {
        self.components.len()
    }

    pub fn components(&self) -> &[Gaussian] {
        &self.components
    }

    /// Linear mixture weights
    pub fn weights(&self) -> &Array1<f64> {
        &self.weights
    }

    pub fn log_weights(&self) -> &Array1<f64> {
        &self.log_weights
    }

    /// Accumulated per-component posterior mass
    pub fn posterior_sum(&self) -> &Array1<f64> {
        &self.posterior_sum
    }

    /// Sum of best-component log scores over accumulated frames
    pub fn likelihood(&self) -> f64 {
        self.likelihood
    }

    /// Number of completed re-estimations
    pub fn iteration(&self) -> usize {
        self.iteration
    }
}

impl Scorer for Gmm {
    fn dim(&self) -> usize {
        self.dim
    }

    fn log_prob(&self, x: ArrayView1<f64>) -> f64 {
        self.components
            .iter()
            .zip(self.log_weights.iter())
            .map(|(c, &lw)| c.log_prob(x) + lw)
            .fold(NEG_INF, f64::max)
    }
}

impl Trainer for Gmm {
    fn update_one(&mut self, x: ArrayView1<f64>, weight: f64) {
        if weight <= 0.0 {
            return;
        }
        let mut best = NEG_INF;
        for (k, (c, &lw)) in self.components.iter().zip(self.log_weights.iter()).enumerate() {
            let v = c.log_prob(x) + lw;
            self.scratch[k] = v;
            best = best.max(v);
        }
        self.likelihood += best;
        let log_weight = weight.ln();
        for (k, c) in self.components.iter_mut().enumerate() {
            let p = (self.scratch[k] - best + log_weight).exp();
            self.posterior_sum[k] += p;
            c.update_one(x, p);
        }
        self.n_samples += weight;
    }

    fn estimate(&mut self) {
        let total: f64 = self.posterior_sum.sum();
        if self.n_samples > MIN_SAMPLES && total > 0.0 {
            // Posteriors are relative to the best component, so renormalize
            // by their total rather than by the frame count.
            self.log_weights = self.posterior_sum.mapv(|p| (p / total).ln());
            self.weights.assign(&self.log_weights);
            exp_inplace(&mut self.weights);
        } else {
            tracing::warn!(
                "Mixture '{}' has {:.4} samples; keeping weights",
                self.name,
                self.n_samples
            );
        }
        for c in &mut self.components {
            c.estimate();
        }
        self.iteration += 1;
    }

    fn clear(&mut self) {
        for c in &mut self.components {
            c.clear();
        }
        self.posterior_sum.fill(0.0);
        self.n_samples = 0.0;
        self.likelihood = 0.0;
    }

    fn n_samples(&self) -> f64 {
        self.n_samples
    }

    fn merge(&mut self, other: &Self) -> Result<()> {
        if other.num_components() != self.num_components() {
            return Err(HmmError::DimensionMismatch {
                expected: self.num_components(),
                found: other.num_components(),
            });
        }
        for (a, b) in self.components.iter_mut().zip(&other.components) {
            a.merge(b)?;
        }
        self.posterior_sum += &other.posterior_sum;
        self.n_samples += other.n_samples;
        self.likelihood += other.likelihood;
        Ok(())
    }
}

impl Sampler for Gmm {
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Array1<f64> {
        let k = sample_discrete(self.weights.iter().copied(), rng);
        self.components[k].sample(rng)
    }
}

/// Persisted form of a mixture. `weights` holds log weights.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GmmRecord {
    pub name: String,
    pub dim: usize,
    pub nsamples: f64,
    pub diag: bool,
    pub num_components: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub posterior_sum: Vec<f64>,
    #[serde(with = "log_vec")]
    pub weights: Vec<f64>,
    pub likelihood: f64,
    pub components: Vec<Gaussian>,
    pub iteration: usize,
}

impl From<Gmm> for GmmRecord {
    fn from(m: Gmm) -> Self {
        let has_stats = m.n_samples != 0.0;
        GmmRecord {
            dim: m.dim,
            nsamples: m.n_samples,
            diag: true,
            num_components: m.components.len(),
            posterior_sum: if has_stats { m.posterior_sum.to_vec() } else { Vec::new() },
            weights: m.log_weights.to_vec(),
            likelihood: m.likelihood,
            iteration: m.iteration,
            components: m.components,
            name: m.name,
        }
    }
}

impl TryFrom<GmmRecord> for Gmm {
    type Error = HmmError;

    fn try_from(r: GmmRecord) -> Result<Self> {
        if !r.diag {
            return Err(HmmError::field("diag", "only diagonal covariance is supported"));
        }
        let k = r.num_components;
        if r.components.len() != k || r.weights.len() != k {
            return Err(HmmError::field(
                "num_components",
                format!(
                    "{} declared, {} components, {} weights",
                    k,
                    r.components.len(),
                    r.weights.len()
                ),
            ));
        }
        if let Some(c) = r.components.iter().find(|c| c.dim() != r.dim) {
            return Err(HmmError::field(
                "components",
                format!("component '{}' has dim {} != {}", c.name(), c.dim(), r.dim),
            ));
        }
        let mut m = Gmm::build(r.name, r.dim, r.components, Array1::from(r.weights));
        if !r.posterior_sum.is_empty() {
            if r.posterior_sum.len() != k {
                return Err(HmmError::field(
                    "posterior_sum",
                    format!("length {} != {}", r.posterior_sum.len(), k),
                ));
            }
            m.posterior_sum = Array1::from(r.posterior_sum);
        }
        m.n_samples = r.nsamples;
        m.likelihood = r.likelihood;
        m.iteration = r.iteration;
        Ok(m)
    }
}
