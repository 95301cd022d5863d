//! Named collection of nets

use super::assigner::Assigner;
use super::chain::{Chain, Occupancy};
use super::graph::SearchGraph;
use super::net::Net;
use crate::config::{DecoderConfig, TrainerConfig};
use crate::error::{HmmError, Result};
use crate::models::Emitter;
use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

/// Nets addressable by name, in insertion order.
///
/// Serializes as a JSON array of nets.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Net>", into = "Vec<Net>")]
pub struct HmmSet {
    nets: Vec<Net>,
    index: HashMap<String, usize>,
}

impl HmmSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and register a new net; returns its index.
    pub fn new_net(
        &mut self,
        name: impl Into<String>,
        trans: Array2<f64>,
        emitters: Vec<Option<Emitter>>,
    ) -> Result<usize> {
        self.add_net(Net::new(name, trans, emitters)?)
    }

    /// Register an already built net; names must be unique.
    pub fn add_net(&mut self, net: Net) -> Result<usize> {
        if self.index.contains_key(net.name()) {
            return Err(HmmError::InvalidNet(format!(
                "a net named '{}' already exists",
                net.name()
            )));
        }
        let idx = self.nets.len();
        self.index.insert(net.name().to_string(), idx);
        self.nets.push(net);
        Ok(idx)
    }

    pub fn len(&self) -> usize {
        self.nets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nets.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Net> {
        self.index.get(name).map(|&i| &self.nets[i])
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Net> {
        match self.index.get(name) {
            Some(&i) => Some(&mut self.nets[i]),
            None => None,
        }
    }

    /// Index of a net, or [`HmmError::UnknownModel`]
    pub fn index_of(&self, name: &str) -> Result<usize> {
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| HmmError::UnknownModel(name.to_string()))
    }

    /// Net by index. Panics when out of range.
    pub fn net(&self, idx: usize) -> &Net {
        &self.nets[idx]
    }

    pub fn nets(&self) -> &[Net] {
        &self.nets
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.nets.iter().map(|n| n.name())
    }

    /// Chain of the named nets over `obs`
    pub fn chain_from_names<'a>(&'a self, names: &[String], obs: ArrayView2<'a, f64>) -> Result<Chain<'a>> {
        let nets = names
            .iter()
            .map(|n| self.index_of(n))
            .collect::<Result<Vec<_>>>()?;
        Chain::new(self, nets, obs)
    }

    /// Translate labels with `assigner` and build the chain
    pub fn chain_for<'a>(
        &'a self,
        labels: &[String],
        assigner: &dyn Assigner,
        obs: ArrayView2<'a, f64>,
    ) -> Result<Chain<'a>> {
        let names = assigner.assign(labels)?;
        self.chain_from_names(&names, obs)
    }

    /// Decoding graph in which any net can follow any net
    pub fn search_graph(&self) -> Result<SearchGraph> {
        self.search_graph_with(&DecoderConfig::default())
    }

    /// Decoding graph honoring the follow-set and junction weight of `config`
    pub fn search_graph_with(&self, config: &DecoderConfig) -> Result<SearchGraph> {
        SearchGraph::full(self, config)
    }

    /// Add posterior statistics of one sequence
    pub fn accumulate(&mut self, occupancy: &Occupancy, frames: ArrayView2<f64>) -> Result<()> {
        if occupancy.frames != frames.nrows() {
            return Err(HmmError::DimensionMismatch {
                expected: occupancy.frames,
                found: frames.nrows(),
            });
        }
        for pos in &occupancy.positions {
            let net = self
                .nets
                .get_mut(pos.net)
                .ok_or_else(|| HmmError::UnknownModel(format!("net index {}", pos.net)))?;
            net.accumulate(&pos.sum_gamma, &pos.sum_xi, &pos.gamma, frames);
        }
        Ok(())
    }

    /// Reset statistics of every net
    pub fn clear(&mut self) {
        for net in &mut self.nets {
            net.clear();
        }
    }

    /// Add the statistics of a set with the same layout
    pub fn merge(&mut self, other: &HmmSet) -> Result<()> {
        if other.len() != self.len() {
            return Err(HmmError::InvalidNet(format!(
                "cannot merge a set of {} nets into a set of {}",
                other.len(),
                self.len()
            )));
        }
        for (a, b) in self.nets.iter_mut().zip(&other.nets) {
            a.merge(b)?;
        }
        Ok(())
    }

    /// Re-estimate every trainable net; returns how many were updated.
    ///
    /// Nets without enough data keep their parameters.
    pub fn estimate(&mut self, config: &TrainerConfig) -> usize {
        let mut updated = 0;
        for net in &mut self.nets {
            match net.estimate(config) {
                Ok(()) => updated += 1,
                Err(e) => tracing::warn!("Skipping update: {}", e),
            }
        }
        updated
    }

    /// Save as a JSON array of nets
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    /// Load from a JSON array of nets
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }
}

impl TryFrom<Vec<Net>> for HmmSet {
    type Error = HmmError;

    fn try_from(nets: Vec<Net>) -> Result<Self> {
        let mut set = HmmSet::new();
        for net in nets {
            set.add_net(net)?;
        }
        Ok(set)
    }
}

impl From<HmmSet> for Vec<Net> {
    fn from(set: HmmSet) -> Self {
        set.nets
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hmm::assigner::{DictionaryAssigner, DirectAssigner};
    use crate::hmm::net::tests::one_state;
    use ndarray::Array2;

    fn set() -> HmmSet {
        let mut set = HmmSet::new();
        set.add_net(one_state("a", 0.0, 1.0)).unwrap();
        set.add_net(one_state("b", 5.0, 1.0)).unwrap();
        set
    }

    #[test]
    fn test_lookup() {
        let set = set();
        assert_eq!(set.len(), 2);
        assert_eq!(set.index_of("b").unwrap(), 1);
        assert!(set.get("a").is_some());
        assert!(matches!(set.index_of("zzz"), Err(HmmError::UnknownModel(_))));
        assert_eq!(set.names().collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn test_duplicate_name() {
        let mut set = set();
        assert!(set.add_net(one_state("a", 1.0, 1.0)).is_err());
    }

    #[test]
    fn test_chain_for_with_assigner() {
        let set = set();
        let obs = Array2::from_shape_vec((3, 1), vec![0.0, 5.0, 5.0]).unwrap();
        let chain = set
            .chain_for(&["a".into(), "b".into()], &DirectAssigner, obs.view())
            .unwrap();
        assert_eq!(chain.net_indices(), &[0, 1]);

        let dict = DictionaryAssigner::new(HashMap::from([(
            "W".to_string(),
            vec!["b".to_string(), "a".to_string()],
        )]));
        let chain = set.chain_for(&["W".into()], &dict, obs.view()).unwrap();
        assert_eq!(chain.net_indices(), &[1, 0]);
        assert!(matches!(
            set.chain_for(&["X".into()], &dict, obs.view()),
            Err(HmmError::UnknownLabel(_))
        ));
    }

    #[test]
    fn test_accumulate_merge_estimate() {
        let set = set();
        let obs = Array2::from_shape_vec((4, 1), vec![0.1, -0.1, 5.2, 4.8]).unwrap();
        let names = vec!["a".to_string(), "b".to_string()];

        let mut acc = set.clone();
        acc.clear();
        let mut chain = set.chain_from_names(&names, obs.view()).unwrap();
        chain.update().unwrap();
        let occ = chain.occupancy();
        acc.accumulate(&occ, obs.view()).unwrap();

        let mut other = set.clone();
        other.clear();
        other.accumulate(&occ, obs.view()).unwrap();
        acc.merge(&other).unwrap();
        assert!((acc.net(0).sum_gamma().sum() - 2.0 * 3.0).abs() < 1e-3);

        assert_eq!(acc.estimate(&TrainerConfig::default()), 2);
        let mean_a = match acc.net(0).emitter(1).unwrap() {
            Emitter::Gaussian(g) => g.mean()[0],
            Emitter::Gmm(_) => unreachable!(),
        };
        assert!(mean_a.abs() < 0.2);
    }

    #[test]
    fn test_estimate_skips_unused_nets() {
        let mut set = set();
        set.clear();
        assert_eq!(set.estimate(&TrainerConfig::default()), 0);
    }

    #[test]
    fn test_file_roundtrip() {
        let set = set();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        set.to_file(&path).unwrap();
        let back = HmmSet::from_file(&path).unwrap();
        assert_eq!(back, set);
        let json = std::fs::read_to_string(&path).unwrap();
        assert!(json.trim_start().starts_with('['));
    }
}
