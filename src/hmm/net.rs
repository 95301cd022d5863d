//! A single HMM network with non-emitting entry and exit states

use crate::config::TrainerConfig;
use crate::error::{HmmError, Result};
use crate::models::persist::log_matrix;
use crate::models::{Emitter, Scorer, Trainer};
use crate::numeric::{log_normalize, log_sum_exp, NEG_INF};
use ndarray::{Array1, Array2, ArrayView2};
use serde::{Deserialize, Serialize};

/// Tolerance on the probability mass of each outgoing row
const ROW_TOLERANCE: f64 = 1e-6;

/// HMM network.
///
/// State `0` is the entry and state `N-1` the exit; both are non-emitting.
/// Every other state carries an emitter. Transitions are stored as logs with
/// `-∞` marking forbidden arcs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "NetRecord", into = "NetRecord")]
pub struct Net {
    name: String,
    trans: Array2<f64>,
    emitters: Vec<Option<Emitter>>,
    sum_gamma: Array1<f64>,
    sum_xi: Array2<f64>,
    trainable: bool,
}

impl Net {
    /// Create a net from a log-transition matrix and one emitter slot per state.
    pub fn new(name: impl Into<String>, trans: Array2<f64>, emitters: Vec<Option<Emitter>>) -> Result<Self> {
        let name = name.into();
        validate(&name, &trans, &emitters)?;
        let n = trans.nrows();
        Ok(Self {
            name,
            trans,
            emitters,
            sum_gamma: Array1::zeros(n),
            sum_xi: Array2::zeros((n, n)),
            trainable: true,
        })
    }

    /// Create a net from a transition matrix in probability space
    pub fn from_probabilities(
        name: impl Into<String>,
        probs: Array2<f64>,
        emitters: Vec<Option<Emitter>>,
    ) -> Result<Self> {
        Self::new(name, probs.mapv(f64::ln), emitters)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of states, including entry and exit
    pub fn n_states(&self) -> usize {
        self.trans.nrows()
    }

    /// Index of the exit state
    pub fn exit(&self) -> usize {
        self.trans.nrows() - 1
    }

    /// Log-transition matrix
    pub fn trans(&self) -> &Array2<f64> {
        &self.trans
    }

    /// `log a(i, j)`
    #[inline]
    pub fn log_trans(&self, i: usize, j: usize) -> f64 {
        self.trans[[i, j]]
    }

    /// `log a(0, N-1)`, the arc that skips the whole net
    pub fn skip(&self) -> f64 {
        self.trans[[0, self.exit()]]
    }

    /// Emitter of state `i`; `None` for entry and exit
    pub fn emitter(&self, i: usize) -> Option<&Emitter> {
        self.emitters.get(i).and_then(Option::as_ref)
    }

    pub fn emitters(&self) -> &[Option<Emitter>] {
        &self.emitters
    }

    /// Frame dimension, or `None` for a net without emitting states
    pub fn dim(&self) -> Option<usize> {
        self.emitters.iter().flatten().map(|e| e.dim()).next()
    }

    pub fn is_trainable(&self) -> bool {
        self.trainable
    }

    pub fn set_trainable(&mut self, trainable: bool) {
        self.trainable = trainable;
    }

    /// Accumulated state occupancy (outgoing posterior mass per state)
    pub fn sum_gamma(&self) -> &Array1<f64> {
        &self.sum_gamma
    }

    /// Accumulated transition posteriors
    pub fn sum_xi(&self) -> &Array2<f64> {
        &self.sum_xi
    }

    /// Posterior mass leaving the entry state, per destination
    pub fn sum_init(&self) -> Array1<f64> {
        self.sum_xi.row(0).to_owned()
    }

    /// Add transition statistics and emitter updates for one chain position.
    pub(crate) fn accumulate(
        &mut self,
        sum_gamma: &Array1<f64>,
        sum_xi: &Array2<f64>,
        gamma: &Array2<f64>,
        frames: ArrayView2<f64>,
    ) {
        self.sum_gamma += sum_gamma;
        self.sum_xi += sum_xi;
        for (i, emitter) in self.emitters.iter_mut().enumerate() {
            let Some(emitter) = emitter else { continue };
            for (t, frame) in frames.rows().into_iter().enumerate() {
                let w = gamma[[i, t]];
                if w > 0.0 {
                    emitter.update_one(frame, w);
                }
            }
        }
    }

    /// Reset statistics, keeping parameters
    pub fn clear(&mut self) {
        self.sum_gamma.fill(0.0);
        self.sum_xi.fill(0.0);
        for emitter in self.emitters.iter_mut().flatten() {
            emitter.clear();
        }
    }

    /// Add the statistics of an identically shaped net
    pub fn merge(&mut self, other: &Net) -> Result<()> {
        if other.n_states() != self.n_states() {
            return Err(HmmError::InvalidNet(format!(
                "cannot merge '{}' ({} states) with '{}' ({} states)",
                self.name,
                self.n_states(),
                other.name,
                other.n_states()
            )));
        }
        self.sum_gamma += &other.sum_gamma;
        self.sum_xi += &other.sum_xi;
        for (a, b) in self.emitters.iter_mut().zip(&other.emitters) {
            if let (Some(a), Some(b)) = (a, b) {
                a.merge(b)?;
            }
        }
        Ok(())
    }

    /// Re-estimate transitions and emitters from accumulated statistics.
    ///
    /// Fails with [`HmmError::Degenerate`] when the net has seen less than
    /// `min_samples` posterior mass; its parameters are then left unchanged.
    pub fn estimate(&mut self, config: &TrainerConfig) -> Result<()> {
        if !self.trainable {
            return Ok(());
        }
        let total = self.sum_gamma.sum();
        if !(total >= config.min_samples) {
            return Err(HmmError::Degenerate(format!(
                "net '{}' has {:.3e} posterior mass",
                self.name, total
            )));
        }
        let exit = self.exit();
        for i in 0..exit {
            let update = if i == 0 {
                config.update_init
            } else {
                config.update_trans
            };
            let denom = self.sum_gamma[i];
            if !update || !(denom > 0.0) {
                continue;
            }
            let mut row = self.trans.row(i).to_owned();
            for (j, a) in row.iter_mut().enumerate() {
                if *a != NEG_INF {
                    *a = (self.sum_xi[[i, j]] / denom).max(config.transition_floor).ln();
                }
            }
            log_normalize(&mut row);
            self.trans.row_mut(i).assign(&row);
        }
        for emitter in self.emitters.iter_mut().flatten() {
            emitter.estimate();
        }
        Ok(())
    }
}

fn validate(name: &str, trans: &Array2<f64>, emitters: &[Option<Emitter>]) -> Result<()> {
    let n = trans.nrows();
    if trans.ncols() != n {
        return Err(HmmError::InvalidNet(format!(
            "'{}': transition matrix is {}x{}, must be square",
            name,
            n,
            trans.ncols()
        )));
    }
    if n < 2 {
        return Err(HmmError::InvalidNet(format!(
            "'{}': needs at least an entry and an exit state",
            name
        )));
    }
    if emitters.len() != n {
        return Err(HmmError::InvalidNet(format!(
            "'{}': {} emitters for {} states",
            name,
            emitters.len(),
            n
        )));
    }
    let exit = n - 1;
    if emitters[0].is_some() || emitters[exit].is_some() {
        return Err(HmmError::InvalidNet(format!(
            "'{}': entry and exit states must be non-emitting",
            name
        )));
    }
    if let Some(i) = (1..exit).find(|&i| emitters[i].is_none()) {
        return Err(HmmError::InvalidNet(format!("'{}': state {} has no emitter", name, i)));
    }
    let mut dims = emitters.iter().flatten().map(|e| e.dim());
    if let Some(dim) = dims.next() {
        if let Some(found) = dims.find(|&d| d != dim) {
            return Err(HmmError::DimensionMismatch {
                expected: dim,
                found,
            });
        }
    }
    if trans.iter().any(|a| a.is_nan() || *a > ROW_TOLERANCE) {
        return Err(HmmError::InvalidNet(format!(
            "'{}': log transitions must be <= 0",
            name
        )));
    }
    if trans.column(0).iter().any(|&a| a != NEG_INF) {
        return Err(HmmError::InvalidNet(format!(
            "'{}': the entry state cannot have incoming arcs",
            name
        )));
    }
    if trans.row(exit).iter().any(|&a| a != NEG_INF) {
        return Err(HmmError::InvalidNet(format!(
            "'{}': the exit state cannot have outgoing arcs",
            name
        )));
    }
    for i in 0..exit {
        let row: Vec<f64> = trans.row(i).to_vec();
        let mass = log_sum_exp(&row).exp();
        if (mass - 1.0).abs() > ROW_TOLERANCE {
            return Err(HmmError::InvalidNet(format!(
                "'{}': row {} sums to {}, expected 1",
                name, i, mass
            )));
        }
    }
    Ok(())
}

/// Persisted form: `{name, A, B}` with `-∞` written as `null`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetRecord {
    pub name: String,
    #[serde(rename = "A", with = "log_matrix")]
    pub a: Vec<Vec<f64>>,
    #[serde(rename = "B")]
    pub b: Vec<Option<Emitter>>,
}

impl From<Net> for NetRecord {
    fn from(net: Net) -> Self {
        NetRecord {
            a: net.trans.rows().into_iter().map(|r| r.to_vec()).collect(),
            b: net.emitters,
            name: net.name,
        }
    }
}

impl TryFrom<NetRecord> for Net {
    type Error = HmmError;

    fn try_from(r: NetRecord) -> Result<Self> {
        let n = r.a.len();
        let mut trans = Array2::from_elem((n, n), NEG_INF);
        for (i, row) in r.a.iter().enumerate() {
            if row.len() != n {
                return Err(HmmError::field(
                    "A",
                    format!("row {} has {} entries, expected {}", i, row.len(), n),
                ));
            }
            for (j, &v) in row.iter().enumerate() {
                trans[[i, j]] = v;
            }
        }
        Net::new(r.name, trans, r.b)
    }
}
