//! Embedded chain of nets and its forward-backward lattice
//!
//! A chain concatenates `Q` nets head to tail: the exit of net `q` feeds the
//! entry of net `q+1` one frame later, and an entry with a skip arc can pass
//! straight on to the next entry within the same frame. The lattices are
//! indexed `(q, i, t)` and stored in log domain.
//!
//! Reaching the exit of net `q` at `T-1` through the skip arcs of the trailing
//! nets counts as finishing the chain, so trailing nets that can be skipped
//! are handled like leading ones.

use super::graph::SearchGraph;
use super::net::Net;
use super::set::HmmSet;
use super::viterbi::{Decoding, ViterbiDecoder};
use crate::error::{HmmError, Result};
use crate::models::Scorer;
use crate::numeric::{log_add, NEG_INF};
use ndarray::{Array1, Array2, Array3, ArrayView2};
use std::collections::HashMap;

/// Posterior statistics for one chain position
#[derive(Debug, Clone)]
pub struct NetOccupancy {
    /// Index of the net in its set
    pub net: usize,
    /// State occupancy `P(state i at t)`, shape `N x T`
    pub gamma: Array2<f64>,
    /// Outgoing posterior mass per state
    pub sum_gamma: Array1<f64>,
    /// Transition posterior mass, shape `N x N`
    pub sum_xi: Array2<f64>,
}

/// Posterior statistics for a whole chain
#[derive(Debug, Clone)]
pub struct Occupancy {
    pub log_likelihood: f64,
    pub frames: usize,
    pub positions: Vec<NetOccupancy>,
}

/// Nets of a set laid out over one observation sequence
pub struct Chain<'a> {
    set: &'a HmmSet,
    nets: Vec<usize>,
    obs: ArrayView2<'a, f64>,
    /// One `N x T` emission table per distinct net
    emissions: Vec<Array2<f64>>,
    /// Emission table used by each chain position
    slots: Vec<usize>,
    alpha: Array3<f64>,
    beta: Array3<f64>,
    log_likelihood: f64,
    clamped: usize,
}

fn clamp(x: f64, clamped: &mut usize) -> f64 {
    if x.is_nan() {
        *clamped += 1;
        NEG_INF
    } else {
        x
    }
}

impl<'a> Chain<'a> {
    pub(crate) fn new(set: &'a HmmSet, nets: Vec<usize>, obs: ArrayView2<'a, f64>) -> Result<Self> {
        if nets.is_empty() {
            return Err(HmmError::EmptyChain);
        }
        let frames = obs.nrows();
        if frames == 0 {
            return Err(HmmError::EmptyObservation("sequence has no frames".into()));
        }
        let mut clamped = 0;
        let mut emissions = Vec::new();
        let mut slot_of: HashMap<usize, usize> = HashMap::new();
        let mut slots = Vec::with_capacity(nets.len());
        let mut max_states = 0;
        for &idx in &nets {
            let net = set.net(idx);
            max_states = max_states.max(net.n_states());
            if let Some(&slot) = slot_of.get(&idx) {
                slots.push(slot);
                continue;
            }
            if let Some(dim) = net.dim() {
                if dim != obs.ncols() {
                    return Err(HmmError::DimensionMismatch {
                        expected: dim,
                        found: obs.ncols(),
                    });
                }
            }
            let mut table = Array2::from_elem((net.n_states(), frames), NEG_INF);
            for (j, emitter) in net.emitters().iter().enumerate() {
                let Some(emitter) = emitter else { continue };
                for (t, frame) in obs.rows().into_iter().enumerate() {
                    table[[j, t]] = clamp(emitter.log_prob(frame), &mut clamped);
                }
            }
            slot_of.insert(idx, emissions.len());
            slots.push(emissions.len());
            emissions.push(table);
        }
        let shape = (nets.len(), max_states, frames);
        Ok(Self {
            set,
            nets,
            obs,
            emissions,
            slots,
            alpha: Array3::from_elem(shape, NEG_INF),
            beta: Array3::from_elem(shape, NEG_INF),
            log_likelihood: NEG_INF,
            clamped,
        })
    }

    /// Number of nets
    pub fn len(&self) -> usize {
        self.nets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nets.is_empty()
    }

    /// Number of frames
    pub fn frames(&self) -> usize {
        self.obs.nrows()
    }

    /// Set indices of the nets, in chain order
    pub fn net_indices(&self) -> &[usize] {
        &self.nets
    }

    /// Net at chain position `q`
    pub fn net(&self, q: usize) -> &'a Net {
        self.set.net(self.nets[q])
    }

    /// `log p(o_t | state j of net q)`
    pub fn emission(&self, q: usize, j: usize, t: usize) -> f64 {
        self.emissions[self.slots[q]][[j, t]]
    }

    pub fn alpha(&self, q: usize, i: usize, t: usize) -> f64 {
        self.alpha[[q, i, t]]
    }

    pub fn beta(&self, q: usize, i: usize, t: usize) -> f64 {
        self.beta[[q, i, t]]
    }

    /// Log-likelihood from the last [`Chain::update`]
    pub fn log_likelihood(&self) -> f64 {
        self.log_likelihood
    }

    /// Number of NaN values replaced by `-∞` or skipped
    pub fn clamped(&self) -> usize {
        self.clamped
    }

    /// Fill the forward lattice; returns `α(Q-1, N-1, T-1)`.
    pub fn forward(&mut self) -> f64 {
        let set = self.set;
        let n_nets = self.nets.len();
        let frames = self.obs.nrows();
        let mut clamped = 0;
        self.alpha.fill(NEG_INF);

        for t in 0..frames {
            for q in 0..n_nets {
                let net = set.net(self.nets[q]);
                let b = &self.emissions[self.slots[q]];
                let exit = net.exit();

                let entry = if q == 0 {
                    if t == 0 {
                        0.0
                    } else {
                        NEG_INF
                    }
                } else {
                    let prev = set.net(self.nets[q - 1]);
                    let through = if t > 0 {
                        self.alpha[[q - 1, prev.exit(), t - 1]]
                    } else {
                        NEG_INF
                    };
                    log_add(through, self.alpha[[q - 1, 0, t]] + prev.skip())
                };
                self.alpha[[q, 0, t]] = entry;

                for j in 1..exit {
                    let mut acc = entry + net.log_trans(0, j);
                    if t > 0 {
                        for i in 1..exit {
                            acc = log_add(acc, self.alpha[[q, i, t - 1]] + net.log_trans(i, j));
                        }
                    }
                    self.alpha[[q, j, t]] = clamp(acc + b[[j, t]], &mut clamped);
                }

                let mut acc = NEG_INF;
                for i in 1..exit {
                    acc = log_add(acc, self.alpha[[q, i, t]] + net.log_trans(i, exit));
                }
                if t + 1 == frames && q > 0 {
                    let prev_exit = set.net(self.nets[q - 1]).exit();
                    acc = log_add(acc, self.alpha[[q - 1, prev_exit, t]] + net.skip());
                }
                self.alpha[[q, exit, t]] = acc;
            }
        }
        self.clamped += clamped;
        let last = n_nets - 1;
        self.alpha[[last, self.net(last).exit(), frames - 1]]
    }

    /// Fill the backward lattice; returns `β(0, 0, 0)`.
    pub fn backward(&mut self) -> f64 {
        let set = self.set;
        let n_nets = self.nets.len();
        let frames = self.obs.nrows();
        let mut clamped = 0;
        self.beta.fill(NEG_INF);

        for t in (0..frames).rev() {
            let last_frame = t + 1 == frames;
            for q in (0..n_nets).rev() {
                let net = set.net(self.nets[q]);
                let b = &self.emissions[self.slots[q]];
                let exit = net.exit();

                self.beta[[q, exit, t]] = if q + 1 == n_nets {
                    if last_frame {
                        0.0
                    } else {
                        NEG_INF
                    }
                } else if last_frame {
                    let next = set.net(self.nets[q + 1]);
                    self.beta[[q + 1, next.exit(), t]] + next.skip()
                } else {
                    self.beta[[q + 1, 0, t + 1]]
                };

                for i in 1..exit {
                    let mut acc = net.log_trans(i, exit) + self.beta[[q, exit, t]];
                    if !last_frame {
                        for j in 1..exit {
                            acc = log_add(
                                acc,
                                net.log_trans(i, j) + b[[j, t + 1]] + self.beta[[q, j, t + 1]],
                            );
                        }
                    }
                    self.beta[[q, i, t]] = clamp(acc, &mut clamped);
                }

                let mut acc = NEG_INF;
                for j in 1..exit {
                    acc = log_add(acc, net.log_trans(0, j) + b[[j, t]] + self.beta[[q, j, t]]);
                }
                if q + 1 < n_nets {
                    acc = log_add(acc, net.skip() + self.beta[[q + 1, 0, t]]);
                }
                self.beta[[q, 0, t]] = acc;
            }
        }
        self.clamped += clamped;
        self.beta[[0, 0, 0]]
    }

    /// Run forward and backward passes and return the log-likelihood.
    ///
    /// Fails with [`HmmError::ZeroLikelihood`] when no path through the chain
    /// explains the sequence.
    pub fn update(&mut self) -> Result<f64> {
        let ll = self.forward();
        let check = self.backward();
        if !ll.is_finite() || !check.is_finite() {
            return Err(HmmError::ZeroLikelihood(self.describe()));
        }
        tracing::trace!(
            "chain [{}]: alpha {:.6}, beta {:.6}",
            self.describe(),
            ll,
            check
        );
        self.log_likelihood = ll;
        Ok(ll)
    }

    /// Log posterior occupancy `γ_q(i, t)`
    pub fn gamma(&self, q: usize, i: usize, t: usize) -> f64 {
        self.alpha[[q, i, t]] + self.beta[[q, i, t]] - self.log_likelihood
    }

    /// Collect posterior statistics for every chain position.
    ///
    /// Call after a successful [`Chain::update`].
    pub fn occupancy(&mut self) -> Occupancy {
        let set = self.set;
        let n_nets = self.nets.len();
        let frames = self.obs.nrows();
        let ll = self.log_likelihood;
        let mut skipped = 0;
        let mut positions = Vec::with_capacity(n_nets);

        let mut post = |x: f64| -> f64 {
            let p = (x - ll).exp();
            if p.is_nan() {
                skipped += 1;
                0.0
            } else {
                p
            }
        };

        for q in 0..n_nets {
            let net = set.net(self.nets[q]);
            let b = &self.emissions[self.slots[q]];
            let n = net.n_states();
            let exit = net.exit();
            let alpha = |i: usize, t: usize| self.alpha[[q, i, t]];
            let beta = |i: usize, t: usize| self.beta[[q, i, t]];

            let mut gamma = Array2::zeros((n, frames));
            let mut sum_xi = Array2::zeros((n, n));

            for t in 0..frames {
                for i in 0..n {
                    gamma[[i, t]] = post(alpha(i, t) + beta(i, t));
                }
                // Entry row: same-frame transitions
                for j in 1..exit {
                    sum_xi[[0, j]] += post(alpha(0, t) + net.log_trans(0, j) + b[[j, t]] + beta(j, t));
                }
                if q + 1 < n_nets {
                    sum_xi[[0, exit]] += post(alpha(0, t) + net.skip() + self.beta[[q + 1, 0, t]]);
                }
                for i in 1..exit {
                    if t + 1 < frames {
                        for j in 1..exit {
                            sum_xi[[i, j]] += post(
                                alpha(i, t) + net.log_trans(i, j) + b[[j, t + 1]] + beta(j, t + 1),
                            );
                        }
                    }
                    sum_xi[[i, exit]] += post(alpha(i, t) + net.log_trans(i, exit) + beta(exit, t));
                }
            }
            if q > 0 {
                let prev_exit = set.net(self.nets[q - 1]).exit();
                let t = frames - 1;
                sum_xi[[0, exit]] += post(self.alpha[[q - 1, prev_exit, t]] + net.skip() + beta(exit, t));
            }

            let sum_gamma = sum_xi.sum_axis(ndarray::Axis(1));
            positions.push(NetOccupancy {
                net: self.nets[q],
                gamma,
                sum_gamma,
                sum_xi,
            });
        }
        self.clamped += skipped;
        Occupancy {
            log_likelihood: ll,
            frames,
            positions,
        }
    }

    /// Left-to-right search graph through the nets of this chain
    pub fn search_graph(&self) -> SearchGraph {
        SearchGraph::linear(self.set, &self.nets)
    }

    /// Best single path through the chain (forced alignment)
    pub fn align(&self) -> Result<Decoding> {
        let graph = self.search_graph();
        ViterbiDecoder::new(self.set, &graph).decode(self.obs)
    }

    fn describe(&self) -> String {
        self.nets
            .iter()
            .map(|&i| self.set.net(i).name())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hmm::net::tests::{gaussian, one_state};
    use crate::numeric::log_sum_exp;
    use approx::assert_abs_diff_eq;
    use ndarray::{arr2, Array2};

    fn obs(values: &[f64]) -> Array2<f64> {
        Array2::from_shape_vec((values.len(), 1), values.to_vec()).unwrap()
    }

    /// Three emitting states with a skip from entry to exit
    fn skippy(name: &str) -> Net {
        let probs = arr2(&[
            [0.0, 0.6, 0.2, 0.0, 0.2],
            [0.0, 0.5, 0.4, 0.1, 0.0],
            [0.0, 0.0, 0.6, 0.3, 0.1],
            [0.0, 0.0, 0.0, 0.7, 0.3],
            [0.0, 0.0, 0.0, 0.0, 0.0],
        ]);
        let emitters = vec![
            None,
            gaussian(name, -1.0, 1.0),
            gaussian(name, 0.5, 0.7),
            gaussian(name, 2.0, 1.5),
            None,
        ];
        Net::from_probabilities(name, probs, emitters).unwrap()
    }

    fn set() -> HmmSet {
        let mut set = HmmSet::new();
        set.add_net(one_state("s1", 1.0, 1.0)).unwrap();
        set.add_net(one_state("s2", 4.0, 2.0)).unwrap();
        set.add_net(skippy("k")).unwrap();
        set
    }

    fn emitting_gamma_sum(chain: &Chain, t: usize) -> f64 {
        let mut terms = Vec::new();
        for q in 0..chain.len() {
            let exit = chain.net(q).exit();
            for i in 1..exit {
                terms.push(chain.gamma(q, i, t));
            }
        }
        log_sum_exp(&terms).exp()
    }

    #[test]
    fn test_single_net_matches_classic_forward() {
        let set = set();
        let o = obs(&[0.1, 0.3, 1.1]);
        let mut chain = set.chain_from_names(&["s1".to_string()], o.view()).unwrap();
        let ll = chain.update().unwrap();

        // One emitting state with a 0.5 self loop: every path is the same path
        let g = chain.net(0).emitter(1).unwrap();
        let expected: f64 = o.rows().into_iter().map(|r| g.log_prob(r)).sum::<f64>()
            + 2.0 * 0.5_f64.ln()
            + 0.5_f64.ln();
        assert_abs_diff_eq!(ll, expected, epsilon = 1e-10);
    }

    #[test]
    fn test_forward_backward_agree() {
        let set = set();
        let o = obs(&[0.1, 0.3, 1.1, 5.5, 7.8, 10.0, 5.2, 4.1, 3.3, 6.2, 8.3]);
        let names: Vec<String> = ["s1", "k", "s2", "k", "s1"].iter().map(|s| s.to_string()).collect();
        let mut chain = set.chain_from_names(&names, o.view()).unwrap();
        let alpha = chain.forward();
        let beta = chain.backward();
        assert!(alpha.is_finite());
        assert!((alpha - beta).abs() / 11.0 < 1e-5);
    }

    #[test]
    fn test_trailing_skips() {
        let set = set();
        let o = obs(&[0.2, 0.4]);
        let names: Vec<String> = ["s1", "k", "k"].iter().map(|s| s.to_string()).collect();
        let mut chain = set.chain_from_names(&names, o.view()).unwrap();
        let ll = chain.update().unwrap();
        assert_abs_diff_eq!(ll, chain.backward(), epsilon = 1e-9);
        assert_abs_diff_eq!(emitting_gamma_sum(&chain, 1), 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_single_frame() {
        let set = set();
        let o = obs(&[0.7]);
        let names: Vec<String> = ["k", "s1", "k"].iter().map(|s| s.to_string()).collect();
        let mut chain = set.chain_from_names(&names, o.view()).unwrap();
        let ll = chain.update().unwrap();
        assert_abs_diff_eq!(ll, chain.beta(0, 0, 0), epsilon = 1e-12);
        assert_abs_diff_eq!(emitting_gamma_sum(&chain, 0), 1.0, epsilon = 1e-9);
        // Only s1 can emit the frame
        assert_abs_diff_eq!(chain.gamma(1, 1, 0).exp(), 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_posteriors_partition_each_frame() {
        let set = set();
        let o = obs(&[-1.0, 0.0, 0.4, 2.5, 3.0, 1.0, 0.2, 4.2]);
        let names: Vec<String> = ["k", "s2", "k", "s1"].iter().map(|s| s.to_string()).collect();
        let mut chain = set.chain_from_names(&names, o.view()).unwrap();
        chain.update().unwrap();
        for t in 0..o.nrows() {
            assert_abs_diff_eq!(emitting_gamma_sum(&chain, t), 1.0, epsilon = 1e-6);
            for q in 0..chain.len() {
                let exit = chain.net(q).exit();
                let per_net: f64 = (1..exit).map(|i| chain.gamma(q, i, t).exp()).sum();
                assert!((-1e-9..=1.0 + 1e-9).contains(&per_net));
            }
        }
    }

    #[test]
    fn test_occupancy_is_consistent() {
        let set = set();
        let o = obs(&[-1.0, 0.0, 0.4, 2.5, 3.0, 1.0]);
        let names: Vec<String> = ["k", "s1", "k"].iter().map(|s| s.to_string()).collect();
        let mut chain = set.chain_from_names(&names, o.view()).unwrap();
        chain.update().unwrap();
        let occ = chain.occupancy();
        assert_eq!(occ.positions.len(), 3);
        let mut emitted = 0.0;
        for pos in &occ.positions {
            let net = set.net(pos.net);
            for i in 1..net.exit() {
                let gamma_total: f64 = pos.gamma.row(i).sum();
                // Outgoing transition mass equals occupancy for emitting states
                assert_abs_diff_eq!(pos.sum_gamma[i], gamma_total, epsilon = 1e-9);
                emitted += gamma_total;
            }
        }
        assert_abs_diff_eq!(emitted, o.nrows() as f64, epsilon = 1e-6);
        // The first entry is left exactly once
        assert_abs_diff_eq!(occ.positions[0].sum_gamma[0], 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_chain_too_long_for_sequence() {
        let set = set();
        let o = obs(&[0.1, 0.2]);
        let names: Vec<String> = ["s1", "s2", "s1"].iter().map(|s| s.to_string()).collect();
        let mut chain = set.chain_from_names(&names, o.view()).unwrap();
        assert!(matches!(chain.update(), Err(HmmError::ZeroLikelihood(_))));
    }

    #[test]
    fn test_empty_inputs() {
        let set = set();
        let o = obs(&[0.1]);
        assert!(matches!(
            set.chain_from_names(&[], o.view()),
            Err(HmmError::EmptyChain)
        ));
        let empty = Array2::<f64>::zeros((0, 1));
        assert!(matches!(
            set.chain_from_names(&["s1".to_string()], empty.view()),
            Err(HmmError::EmptyObservation(_))
        ));
    }

    #[test]
    fn test_dimension_mismatch() {
        let set = set();
        let o = Array2::<f64>::zeros((3, 2));
        assert!(matches!(
            set.chain_from_names(&["s1".to_string()], o.view()),
            Err(HmmError::DimensionMismatch { expected: 1, found: 2 })
        ));
    }

    #[test]
    fn test_nan_frame_is_clamped() {
        let set = set();
        let o = obs(&[0.1, f64::NAN, 0.3]);
        let mut chain = set.chain_from_names(&["s1".to_string()], o.view()).unwrap();
        assert!(chain.clamped() > 0);
        assert!(matches!(chain.update(), Err(HmmError::ZeroLikelihood(_))));
    }
}
