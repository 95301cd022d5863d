//! Embedded Baum-Welch training over many sequences

use super::assigner::{Assigner, DirectAssigner};
use super::set::HmmSet;
use crate::config::TrainerConfig;
use crate::data::FloatObsSequence;
use crate::error::{HmmError, Result};
use crate::numeric::NEG_INF;
use rayon::prelude::*;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared flag for stopping training from another thread.
///
/// Checked between sequences and between iterations.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Outcome of a training run
#[derive(Debug, Clone, Default, Serialize)]
pub struct TrainingReport {
    /// Completed iterations
    pub iterations: usize,
    /// Total log-likelihood of the data before each update
    pub log_likelihood_history: Vec<f64>,
    pub converged: bool,
    /// Sequences used in the last iteration
    pub sequences: usize,
    /// Frames used in the last iteration
    pub frames: usize,
    /// Sequences skipped in the last iteration
    pub skipped: usize,
}

impl TrainingReport {
    pub fn final_log_likelihood(&self) -> Option<f64> {
        self.log_likelihood_history.last().copied()
    }
}

/// Statistics gathered in one pass over the data
pub struct Expectation {
    /// Copy of the model carrying the accumulated statistics
    pub set: HmmSet,
    pub log_likelihood: f64,
    pub sequences: usize,
    pub frames: usize,
    pub skipped: usize,
}

struct Accumulator {
    set: HmmSet,
    log_likelihood: f64,
    sequences: usize,
    frames: usize,
    skipped: usize,
    last_error: Option<HmmError>,
    fatal: Option<HmmError>,
}

impl Accumulator {
    fn new(model: &HmmSet) -> Self {
        let mut set = model.clone();
        set.clear();
        Self {
            set,
            log_likelihood: 0.0,
            sequences: 0,
            frames: 0,
            skipped: 0,
            last_error: None,
            fatal: None,
        }
    }

    fn add(&mut self, model: &HmmSet, seq: &FloatObsSequence, assigner: &dyn Assigner, cancel: &CancelToken) {
        if self.fatal.is_some() {
            return;
        }
        if cancel.is_cancelled() {
            self.fatal = Some(HmmError::Cancelled);
            return;
        }
        match self.accumulate(model, seq, assigner) {
            Ok(ll) => {
                tracing::debug!("Sequence {}: {} frames, log-likelihood = {:.4}", seq.id, seq.len(), ll);
                self.log_likelihood += ll;
                self.sequences += 1;
                self.frames += seq.len();
            }
            Err(e) if e.is_sequence_level() => {
                tracing::warn!("Skipping sequence {}: {}", seq.id, e);
                self.skipped += 1;
                self.last_error = Some(e);
            }
            Err(e) => self.fatal = Some(e),
        }
    }

    fn accumulate(&mut self, model: &HmmSet, seq: &FloatObsSequence, assigner: &dyn Assigner) -> Result<f64> {
        let tokens = seq.tokens().ok_or(HmmError::EmptyChain)?;
        let mut chain = model.chain_for(&tokens, assigner, seq.view())?;
        let ll = chain.update().map_err(|e| match e {
            HmmError::ZeroLikelihood(_) => HmmError::ZeroLikelihood(seq.id.clone()),
            e => e,
        })?;
        let occupancy = chain.occupancy();
        if chain.clamped() > 0 {
            tracing::debug!("Sequence {}: {} values clamped", seq.id, chain.clamped());
        }
        self.set.accumulate(&occupancy, seq.view())?;
        Ok(ll)
    }

    fn merge(mut self, other: Self) -> Self {
        if self.fatal.is_none() {
            self.fatal = other.fatal;
        }
        if self.fatal.is_none() {
            if let Err(e) = self.set.merge(&other.set) {
                self.fatal = Some(e);
            }
        }
        self.log_likelihood += other.log_likelihood;
        self.sequences += other.sequences;
        self.frames += other.frames;
        self.skipped += other.skipped;
        if other.last_error.is_some() {
            self.last_error = other.last_error;
        }
        self
    }
}

/// Baum-Welch trainer for embedded chains.
///
/// Each sequence is turned into a chain through its tokens and the assigner;
/// statistics of all sequences are pooled before every update.
pub struct BaumWelch {
    config: TrainerConfig,
    assigner: Box<dyn Assigner>,
    cancel: CancelToken,
}

impl BaumWelch {
    pub fn new(config: TrainerConfig) -> Self {
        Self {
            config,
            assigner: Box::new(DirectAssigner),
            cancel: CancelToken::new(),
        }
    }

    /// Translate sequence tokens with `assigner`
    pub fn with_assigner(mut self, assigner: impl Assigner + 'static) -> Self {
        self.assigner = Box::new(assigner);
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Accumulate statistics of `data` under `model` without changing it.
    ///
    /// Sequences that cannot be explained are skipped; fails when none can.
    pub fn expectation(&self, model: &HmmSet, data: &[FloatObsSequence]) -> Result<Expectation> {
        let assigner = self.assigner.as_ref();
        let cancel = &self.cancel;
        let acc = if self.config.parallel {
            data.par_iter()
                .fold(
                    || Accumulator::new(model),
                    |mut acc, seq| {
                        acc.add(model, seq, assigner, cancel);
                        acc
                    },
                )
                .reduce_with(Accumulator::merge)
                .unwrap_or_else(|| Accumulator::new(model))
        } else {
            data.iter().fold(Accumulator::new(model), |mut acc, seq| {
                acc.add(model, seq, assigner, cancel);
                acc
            })
        };

        if let Some(e) = acc.fatal {
            return Err(e);
        }
        if acc.sequences == 0 {
            return Err(acc.last_error.unwrap_or(HmmError::EmptyChain));
        }
        Ok(Expectation {
            set: acc.set,
            log_likelihood: acc.log_likelihood,
            sequences: acc.sequences,
            frames: acc.frames,
            skipped: acc.skipped,
        })
    }

    /// Train `set` in place.
    ///
    /// Stops after `max_iterations` or when the relative change of the total
    /// log-likelihood falls below `tolerance`. A tolerance of 0 runs every
    /// iteration.
    pub fn train(&self, set: &mut HmmSet, data: &[FloatObsSequence]) -> Result<TrainingReport> {
        self.config.validate()?;
        if data.is_empty() {
            return Err(HmmError::EmptyObservation("no training sequences".into()));
        }
        tracing::info!(
            "Training {} nets on {} sequences ({} iterations max)",
            set.len(),
            data.len(),
            self.config.max_iterations
        );

        let mut report = TrainingReport::default();
        let mut prev_ll = NEG_INF;
        for iter in 0..self.config.max_iterations {
            if self.cancel.is_cancelled() {
                return Err(HmmError::Cancelled);
            }
            let expectation = self.expectation(set, data)?;
            let log_ll = expectation.log_likelihood;
            let mut next = expectation.set;
            let updated = next.estimate(&self.config);
            *set = next;

            report.iterations = iter + 1;
            report.log_likelihood_history.push(log_ll);
            report.sequences = expectation.sequences;
            report.frames = expectation.frames;
            report.skipped = expectation.skipped;
            tracing::info!(
                "Iteration {}: log-likelihood = {:.4} ({} sequences, {} skipped, {} nets updated)",
                iter + 1,
                log_ll,
                expectation.sequences,
                expectation.skipped,
                updated
            );

            if (log_ll - prev_ll).abs() < self.config.tolerance * log_ll.abs().max(1.0) {
                tracing::info!("Converged after {} iterations", iter + 1);
                report.converged = true;
                break;
            }
            prev_ll = log_ll;
        }
        Ok(report)
    }
}
