//! Sampling observation sequences from nets and chains

use super::net::Net;
use super::set::HmmSet;
use crate::data::FloatObsSequence;
use crate::error::{HmmError, Result};
use crate::models::Sampler;
use crate::numeric::sample_discrete;
use ndarray::{s, Array2};
use rand::rngs::StdRng;
use rand::SeedableRng;

/// Seeded sequence generator
pub struct Generator {
    rng: StdRng,
}

impl Generator {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Walk `net` from its entry until the exit or `max_len` frames.
    ///
    /// Returns the frames (T x D) and the emitting state of each frame.
    pub fn sample_net(&mut self, net: &Net, max_len: usize) -> (Array2<f64>, Vec<usize>) {
        let dim = net.dim().unwrap_or(0);
        let exit = net.exit();
        let mut samples = Vec::new();
        let mut states = Vec::new();
        let mut state = 0;
        while states.len() < max_len {
            let row = net.trans().row(state);
            state = sample_discrete(row.iter().map(|a| a.exp()), &mut self.rng);
            if state == exit {
                break;
            }
            let Some(emitter) = net.emitter(state) else { break };
            samples.push(emitter.sample(&mut self.rng));
            states.push(state);
        }
        let frames = Array2::from_shape_fn((samples.len(), dim), |(t, d)| samples[t][d]);
        (frames, states)
    }

    /// Sample the named nets one after another into a labeled sequence.
    ///
    /// Each frame is labeled with the net that emitted it. The total length is
    /// capped at `max_len`.
    pub fn sample_chain(
        &mut self,
        set: &HmmSet,
        names: &[String],
        max_len: usize,
        id: impl Into<String>,
    ) -> Result<FloatObsSequence> {
        let nets = names
            .iter()
            .map(|n| set.index_of(n))
            .collect::<Result<Vec<_>>>()?;
        let dim = nets
            .iter()
            .find_map(|&i| set.net(i).dim())
            .ok_or(HmmError::EmptyChain)?;
        let mut parts = Vec::with_capacity(nets.len());
        let mut labels = Vec::new();
        for &idx in &nets {
            let net = set.net(idx);
            let budget = max_len - labels.len();
            if budget == 0 {
                break;
            }
            let (frames, _) = self.sample_net(net, budget);
            labels.extend(std::iter::repeat(net.name().to_string()).take(frames.nrows()));
            parts.push(frames);
        }
        let mut frames = Array2::zeros((labels.len(), dim));
        let mut t = 0;
        for part in &parts {
            frames
                .slice_mut(s![t..t + part.nrows(), ..])
                .assign(part);
            t += part.nrows();
        }
        Ok(FloatObsSequence::new(id, frames).with_labels(labels))
    }
}
