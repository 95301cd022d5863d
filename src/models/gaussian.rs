//! Diagonal multivariate Gaussian emitter

use super::emitter::{Sampler, Scorer, Trainer};
use crate::error::{HmmError, Result};
use crate::numeric::{floor_inplace, scale_inplace, square_inplace};
use ndarray::{Array1, ArrayView1, Zip};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Lower bound on every variance component
pub const VARIANCE_FLOOR: f64 = 1e-4;

/// Minimum accumulated weight required to re-estimate parameters
pub const MIN_SAMPLES: f64 = 1e-2;

/// Gaussian with diagonal covariance.
///
/// `mean` and `sd` are the persisted parameters; variance, inverse variance
/// and the log-density constants are derived from them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "GaussianRecord", into = "GaussianRecord")]
pub struct Gaussian {
    name: String,
    mean: Array1<f64>,
    sd: Array1<f64>,
    variance: Array1<f64>,
    inv_variance: Array1<f64>,
    /// `-(D/2) log(2π)`
    const1: f64,
    /// `const1 - ½ Σ log σ²`
    const2: f64,
    sum_x: Array1<f64>,
    sum_xsq: Array1<f64>,
    n_samples: f64,
}

impl Gaussian {
    /// Standard normal in `dim` dimensions
    pub fn new(name: impl Into<String>, dim: usize) -> Self {
        Self::build(name.into(), Array1::zeros(dim), Array1::ones(dim))
    }

    /// Gaussian with the given mean and standard deviation
    pub fn with_params(name: impl Into<String>, mean: Array1<f64>, sd: Array1<f64>) -> Result<Self> {
        if mean.len() != sd.len() {
            return Err(HmmError::DimensionMismatch {
                expected: mean.len(),
                found: sd.len(),
            });
        }
        if sd.iter().any(|&s| !(s > 0.0) || !s.is_finite()) {
            return Err(HmmError::field("sd", "standard deviations must be positive"));
        }
        Ok(Self::build(name.into(), mean, sd))
    }

    /// Gaussian with mean `mean + sd ⊙ z`, `z ~ N(0, I)`, and standard deviation `sd`
    pub fn random(name: impl Into<String>, mean: &Array1<f64>, sd: &Array1<f64>, seed: u64) -> Result<Self> {
        let mut rng = StdRng::seed_from_u64(seed);
        Self::random_with(name, mean, sd, &mut rng)
    }

    pub(crate) fn random_with<R: Rng + ?Sized>(
        name: impl Into<String>,
        mean: &Array1<f64>,
        sd: &Array1<f64>,
        rng: &mut R,
    ) -> Result<Self> {
        let shifted = Zip::from(mean)
            .and(sd)
            .map_collect(|&m, &s| m + s * rng.sample::<f64, _>(StandardNormal));
        Self::with_params(name, shifted, sd.clone())
    }

    fn build(name: String, mean: Array1<f64>, sd: Array1<f64>) -> Self {
        let dim = mean.len();
        let mut g = Self {
            name,
            mean,
            sd,
            variance: Array1::zeros(dim),
            inv_variance: Array1::zeros(dim),
            const1: -(dim as f64) / 2.0 * (2.0 * PI).ln(),
            const2: 0.0,
            sum_x: Array1::zeros(dim),
            sum_xsq: Array1::zeros(dim),
            n_samples: 0.0,
        };
        g.refresh();
        g
    }

    /// Recompute derived quantities from `sd`
    fn refresh(&mut self) {
        let mut variance = self.sd.clone();
        square_inplace(&mut variance);
        floor_inplace(&mut variance, VARIANCE_FLOOR);
        self.variance = variance;
        self.inv_variance = self.variance.mapv(|v| 1.0 / v);
        self.const2 = self.const1 - 0.5 * self.variance.iter().map(|v| v.ln()).sum::<f64>();
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mean(&self) -> &Array1<f64> {
        &self.mean
    }

    pub fn sd(&self) -> &Array1<f64> {
        &self.sd
    }

    pub fn variance(&self) -> &Array1<f64> {
        &self.variance
    }

    /// Accumulated `Σ w·x`
    pub fn sum_x(&self) -> &Array1<f64> {
        &self.sum_x
    }

    /// Accumulated `Σ w·x²`
    pub fn sum_xsq(&self) -> &Array1<f64> {
        &self.sum_xsq
    }

    /// Log density constant `-(D/2) log 2π - ½ Σ log σ²`
    pub fn log_constant(&self) -> f64 {
        self.const2
    }
}

impl Scorer for Gaussian {
    fn dim(&self) -> usize {
        self.mean.len()
    }

    #[inline]
    fn log_prob(&self, x: ArrayView1<f64>) -> f64 {
        let mut quad = 0.0;
        Zip::from(&x)
            .and(&self.mean)
            .and(&self.inv_variance)
            .for_each(|&xi, &mi, &iv| {
                let d = xi - mi;
                quad += d * d * iv;
            });
        -0.5 * quad + self.const2
    }
}

impl Trainer for Gaussian {
    fn update_one(&mut self, x: ArrayView1<f64>, weight: f64) {
        Zip::from(&mut self.sum_x)
            .and(&mut self.sum_xsq)
            .and(&x)
            .for_each(|sx, sxx, &xi| {
                let wx = weight * xi;
                *sx += wx;
                *sxx += wx * xi;
            });
        self.n_samples += weight;
    }

    fn estimate(&mut self) {
        if self.n_samples > MIN_SAMPLES {
            let n = self.n_samples;
            let mut mean = self.sum_x.clone();
            scale_inplace(&mut mean, 1.0 / n);
            self.mean = mean;
            let mut variance = Zip::from(&self.sum_xsq)
                .and(&self.mean)
                .map_collect(|&sxx, &m| sxx / n - m * m);
            floor_inplace(&mut variance, VARIANCE_FLOOR);
            self.sd = variance.mapv(f64::sqrt);
        } else {
            self.mean.fill(0.0);
            self.sd.fill(VARIANCE_FLOOR.sqrt());
        }
        self.refresh();
    }

    fn clear(&mut self) {
        self.sum_x.fill(0.0);
        self.sum_xsq.fill(0.0);
        self.n_samples = 0.0;
    }

    fn n_samples(&self) -> f64 {
        self.n_samples
    }

    fn merge(&mut self, other: &Self) -> Result<()> {
        if other.dim() != self.dim() {
            return Err(HmmError::DimensionMismatch {
                expected: self.dim(),
                found: other.dim(),
            });
        }
        self.sum_x += &other.sum_x;
        self.sum_xsq += &other.sum_xsq;
        self.n_samples += other.n_samples;
        Ok(())
    }
}

impl Sampler for Gaussian {
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Array1<f64> {
        Zip::from(&self.mean)
            .and(&self.sd)
            .map_collect(|&m, &s| m + s * rng.sample::<f64, _>(StandardNormal))
    }
}

/// Persisted form: `{name, dim, nsamples, diag, sumx?, sumx_sq?, mean, sd}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GaussianRecord {
    pub name: String,
    pub dim: usize,
    pub nsamples: f64,
    pub diag: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sumx: Vec<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sumx_sq: Vec<f64>,
    pub mean: Vec<f64>,
    pub sd: Vec<f64>,
}

impl From<Gaussian> for GaussianRecord {
    fn from(g: Gaussian) -> Self {
        let has_stats = g.n_samples != 0.0;
        GaussianRecord {
            dim: g.dim(),
            nsamples: g.n_samples,
            diag: true,
            sumx: if has_stats { g.sum_x.to_vec() } else { Vec::new() },
            sumx_sq: if has_stats { g.sum_xsq.to_vec() } else { Vec::new() },
            mean: g.mean.to_vec(),
            sd: g.sd.to_vec(),
            name: g.name,
        }
    }
}

impl TryFrom<GaussianRecord> for Gaussian {
    type Error = HmmError;

    fn try_from(r: GaussianRecord) -> Result<Self> {
        if !r.diag {
            return Err(HmmError::field("diag", "only diagonal covariance is supported"));
        }
        for (field, len) in [("mean", r.mean.len()), ("sd", r.sd.len())] {
            if len != r.dim {
                return Err(HmmError::field(field, format!("length {} != dim {}", len, r.dim)));
            }
        }
        let mut g = Gaussian::with_params(r.name, Array1::from(r.mean), Array1::from(r.sd))?;
        for (field, values, target) in [
            ("sumx", r.sumx, &mut g.sum_x),
            ("sumx_sq", r.sumx_sq, &mut g.sum_xsq),
        ] {
            if values.is_empty() {
                continue;
            }
            if values.len() != r.dim {
                return Err(HmmError::field(field, format!("length {} != dim {}", values.len(), r.dim)));
            }
            *target = Array1::from(values);
        }
        g.n_samples = r.nsamples;
        Ok(g)
    }
}
