//! Emission model capabilities
//!
//! A model can score a frame, accumulate weighted statistics and re-estimate
//! itself, and draw samples. HMM states hold an [`Emitter`], the closed set of
//! models this crate knows how to persist.

use super::gaussian::Gaussian;
use super::gmm::Gmm;
use crate::error::{HmmError, Result};
use ndarray::{Array1, ArrayView1, ArrayView2};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Log density of a single frame
pub trait Scorer {
    /// Frame dimension
    fn dim(&self) -> usize;

    /// `log p(x)`; `x` must have length [`Scorer::dim`]
    fn log_prob(&self, x: ArrayView1<f64>) -> f64;
}

/// Weighted sufficient statistics and re-estimation
pub trait Trainer {
    /// Accumulate one frame with weight `weight`
    fn update_one(&mut self, x: ArrayView1<f64>, weight: f64);

    /// Accumulate every row of `frames` with the same weight
    fn update(&mut self, frames: ArrayView2<f64>, weight: f64) {
        for row in frames.rows() {
            self.update_one(row, weight);
        }
    }

    /// Turn accumulated statistics into new parameters
    fn estimate(&mut self);

    /// Reset statistics, keeping parameters
    fn clear(&mut self);

    /// Total accumulated weight
    fn n_samples(&self) -> f64;

    /// Add another model's statistics into this one
    fn merge(&mut self, other: &Self) -> Result<()>;
}

/// Draw frames from the model
pub trait Sampler {
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Array1<f64>;
}

/// Emission model attached to an emitting HMM state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Emitter {
    Gaussian(Gaussian),
    Gmm(Gmm),
}

impl Emitter {
    pub fn name(&self) -> &str {
        match self {
            Emitter::Gaussian(g) => g.name(),
            Emitter::Gmm(m) => m.name(),
        }
    }
}

impl From<Gaussian> for Emitter {
    fn from(g: Gaussian) -> Self {
        Emitter::Gaussian(g)
    }
}

impl From<Gmm> for Emitter {
    fn from(m: Gmm) -> Self {
        Emitter::Gmm(m)
    }
}

impl Scorer for Emitter {
    fn dim(&self) -> usize {
        match self {
            Emitter::Gaussian(g) => g.dim(),
            Emitter::Gmm(m) => m.dim(),
        }
    }

    #[inline]
    fn log_prob(&self, x: ArrayView1<f64>) -> f64 {
        match self {
            Emitter::Gaussian(g) => g.log_prob(x),
            Emitter::Gmm(m) => m.log_prob(x),
        }
    }
}

impl Trainer for Emitter {
    fn update_one(&mut self, x: ArrayView1<f64>, weight: f64) {
        match self {
            Emitter::Gaussian(g) => g.update_one(x, weight),
            Emitter::Gmm(m) => m.update_one(x, weight),
        }
    }

    fn estimate(&mut self) {
        match self {
            Emitter::Gaussian(g) => g.estimate(),
            Emitter::Gmm(m) => m.estimate(),
        }
    }

    fn clear(&mut self) {
        match self {
            Emitter::Gaussian(g) => g.clear(),
            Emitter::Gmm(m) => m.clear(),
        }
    }

    fn n_samples(&self) -> f64 {
        match self {
            Emitter::Gaussian(g) => g.n_samples(),
            Emitter::Gmm(m) => m.n_samples(),
        }
    }

    fn merge(&mut self, other: &Self) -> Result<()> {
        match (self, other) {
            (Emitter::Gaussian(a), Emitter::Gaussian(b)) => a.merge(b),
            (Emitter::Gmm(a), Emitter::Gmm(b)) => a.merge(b),
            (a, b) => Err(HmmError::InvalidNet(format!(
                "cannot merge emitter '{}' with a different kind '{}'",
                a.name(),
                b.name()
            ))),
        }
    }
}

impl Sampler for Emitter {
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Array1<f64> {
        match self {
            Emitter::Gaussian(g) => g.sample(rng),
            Emitter::Gmm(m) => m.sample(rng),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_tagged_json() {
        let e = Emitter::from(Gaussian::new("g", 1));
        let json = serde_json::to_string(&e).unwrap();
        assert!(json.contains("\"type\":\"gaussian\""));
        let back: Emitter = serde_json::from_str(&json).unwrap();
        assert_eq!(back, e);
    }

    #[test]
    fn test_dispatch() {
        let g = Gaussian::with_params("g", array![1.0], array![1.0]).unwrap();
        let e = Emitter::from(g.clone());
        let x = array![0.5];
        assert_eq!(e.log_prob(x.view()), g.log_prob(x.view()));
        assert_eq!(e.dim(), 1);
    }

    #[test]
    fn test_merge_kind_mismatch() {
        let mut a = Emitter::from(Gaussian::new("g", 1));
        let b = Emitter::from(Gmm::new("m", 1, 2));
        assert!(a.merge(&b).is_err());
    }
}
