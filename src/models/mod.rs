//! Emission models

mod emitter;
mod gaussian;
mod gmm;
pub(crate) mod persist;

pub use emitter::{Emitter, Sampler, Scorer, Trainer};
pub use gaussian::{Gaussian, GaussianRecord, MIN_SAMPLES, VARIANCE_FLOOR};
pub use gmm::{Gmm, GmmRecord};
