//! Token-passing Viterbi decoder over a search graph
//!
//! Scores are kept per frame slot: slot `s` holds the best log score of being
//! at a node after consuming `s` frames. Emitting nodes advance one slot;
//! non-emitting nodes are relaxed inside a slot until nothing improves.

use super::graph::{NodeKind, SearchGraph};
use super::set::HmmSet;
use crate::data::ANode;
use crate::error::{HmmError, Result};
use crate::models::Scorer;
use crate::numeric::{max_index, NEG_INF};
use ndarray::{Array2, ArrayView2};
use serde::Serialize;

const NO_NODE: usize = usize::MAX;

/// Best path through a search graph
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Decoding {
    /// Log score of the path
    pub log_prob: f64,
    /// Graph node emitting each frame
    pub states: Vec<usize>,
    /// Net name emitting each frame
    pub labels: Vec<String>,
    /// One leaf per visited net instance
    pub alignment: ANode,
}

impl Decoding {
    /// Names of the nets along the path
    pub fn tokens(&self) -> Vec<String> {
        self.alignment
            .leaves()
            .into_iter()
            .map(|leaf| leaf.name.clone())
            .collect()
    }
}

pub struct ViterbiDecoder<'a> {
    set: &'a HmmSet,
    graph: &'a SearchGraph,
}

impl<'a> ViterbiDecoder<'a> {
    pub fn new(set: &'a HmmSet, graph: &'a SearchGraph) -> Self {
        Self { set, graph }
    }

    /// Decode `obs` (T x D)
    pub fn decode(&self, obs: ArrayView2<f64>) -> Result<Decoding> {
        let frames = obs.nrows();
        if frames == 0 {
            return Err(HmmError::EmptyObservation("nothing to decode".into()));
        }
        for idx in self.graph.instance_nets() {
            if let Some(dim) = self.set.net(idx).dim() {
                if dim != obs.ncols() {
                    return Err(HmmError::DimensionMismatch {
                        expected: dim,
                        found: obs.ncols(),
                    });
                }
            }
        }

        let graph = self.graph;
        let n = graph.len();
        let mut score = Array2::from_elem((frames + 1, n), NEG_INF);
        let mut back = Array2::from_elem((frames + 1, n), NO_NODE);
        score[[0, graph.start()]] = 0.0;
        self.relax(0, &mut score, &mut back);

        for s in 1..=frames {
            let frame = obs.row(s - 1);
            for &j in graph.emitting() {
                let mut best = NEG_INF;
                let mut arg = NO_NODE;
                for &(k, w) in graph.incoming(j) {
                    let v = score[[s - 1, k]] + w;
                    if v > best {
                        best = v;
                        arg = k;
                    }
                }
                if arg == NO_NODE {
                    continue;
                }
                let node = graph.node(j);
                let emission = node
                    .net
                    .and_then(|net| self.set.net(net).emitter(node.state))
                    .map_or(NEG_INF, |e| e.log_prob(frame));
                let v = best + emission;
                if !v.is_nan() {
                    score[[s, j]] = v;
                    back[[s, j]] = arg;
                }
            }
            self.relax(s, &mut score, &mut back);
        }

        let mut last = graph.end();
        let mut log_prob = score[[frames, last]];
        if log_prob == NEG_INF {
            let scores = graph.emitting().iter().map(|&j| &score[[frames, j]]);
            match max_index(scores) {
                Some((i, v)) if v > NEG_INF => {
                    last = graph.emitting()[i];
                    log_prob = v;
                    tracing::warn!(
                        "No complete path through the graph; ending at node {} instead",
                        last
                    );
                }
                _ => return Err(HmmError::ZeroLikelihood("decoding".into())),
            }
        }

        let path = self.backtrace(&back, frames, last)?;
        Ok(self.build(path, frames, log_prob))
    }

    /// Propagate scores through non-emitting nodes within slot `s`
    fn relax(&self, s: usize, score: &mut Array2<f64>, back: &mut Array2<usize>) {
        let graph = self.graph;
        for _ in 0..=graph.non_emitting().len() {
            let mut changed = false;
            for &j in graph.non_emitting() {
                for &(k, w) in graph.incoming(j) {
                    let v = score[[s, k]] + w;
                    if v > score[[s, j]] {
                        score[[s, j]] = v;
                        back[[s, j]] = k;
                        changed = true;
                    }
                }
            }
            if !changed {
                break;
            }
        }
    }

    fn backtrace(&self, back: &Array2<usize>, frames: usize, last: usize) -> Result<Vec<usize>> {
        let graph = self.graph;
        let limit = (frames + 1) * graph.len();
        let mut path = Vec::new();
        let (mut node, mut slot) = (last, frames);
        while !(node == graph.start() && slot == 0) {
            path.push(node);
            if path.len() > limit {
                return Err(HmmError::InvalidNet(
                    "back-pointers form a cycle; junction weights are too large".into(),
                ));
            }
            let prev = back[[slot, node]];
            if prev == NO_NODE {
                return Err(HmmError::InvalidNet(format!(
                    "broken back-pointer at node {} slot {}",
                    node, slot
                )));
            }
            if graph.node(node).kind.is_emitting() {
                slot -= 1;
            }
            node = prev;
        }
        path.reverse();
        Ok(path)
    }

    fn build(&self, path: Vec<usize>, frames: usize, log_prob: f64) -> Decoding {
        let graph = self.graph;
        let mut states = Vec::with_capacity(frames);
        let mut labels = Vec::with_capacity(frames);
        let mut alignment = ANode::new(0, frames, "");
        let mut segment: Option<&str> = None;

        for &id in &path {
            let node = graph.node(id);
            match node.kind {
                NodeKind::Entry => {
                    if let Some(name) = segment.take() {
                        close_segment(&mut alignment, states.len(), name);
                    }
                    segment = Some(graph.instance_label(node.instance));
                }
                NodeKind::Emitting => {
                    states.push(id);
                    labels.push(graph.instance_label(node.instance).to_string());
                }
                _ => {}
            }
        }
        if let Some(name) = segment {
            close_segment(&mut alignment, states.len(), name);
        }
        Decoding {
            log_prob,
            states,
            labels,
            alignment,
        }
    }
}

/// Add a leaf ending at `end` unless it would be empty
fn close_segment(alignment: &mut ANode, end: usize, name: &str) {
    let start = alignment.children.last().map_or(alignment.start, |c| c.end);
    if end > start {
        let appended = alignment.append_child(end, name).is_ok();
        debug_assert!(appended, "segment {}..{} does not fit the alignment", start, end);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hmm::net::tests::one_state;
    use approx::assert_abs_diff_eq;

    fn set() -> HmmSet {
        let mut set = HmmSet::new();
        set.add_net(one_state("a", 0.0, 1.0)).unwrap();
        set.add_net(one_state("b", 5.0, 1.0)).unwrap();
        set
    }

    fn obs(values: &[f64]) -> Array2<f64> {
        Array2::from_shape_vec((values.len(), 1), values.to_vec()).unwrap()
    }

    #[test]
    fn test_decode_full_mesh() {
        let set = set();
        let graph = set.search_graph().unwrap();
        let o = obs(&[0.1, -0.2, 5.1, 4.9, 0.3]);
        let d = ViterbiDecoder::new(&set, &graph).decode(o.view()).unwrap();
        assert_eq!(d.labels, vec!["a", "a", "b", "b", "a"]);
        assert_eq!(d.tokens(), vec!["a", "b", "a"]);
        assert_eq!(d.alignment.children.len(), 3);
        assert!(d.alignment.is_valid());
        assert_eq!(d.alignment.children[1].start, 2);
        assert_eq!(d.states.len(), 5);
        assert!(d.log_prob.is_finite());
    }

    #[test]
    fn test_self_loop_beats_reentry_on_tie() {
        // Staying (0.5) and exit (0.5) + junction (0) + entry (1.0) score the
        // same; the path must stay inside one instance.
        let set = set();
        let graph = set.search_graph().unwrap();
        let o = obs(&[0.0, 0.1, -0.1, 0.2, 5.0, 5.1, 4.9]);
        let d = ViterbiDecoder::new(&set, &graph).decode(o.view()).unwrap();
        assert_eq!(d.tokens(), vec!["a", "b"]);
        assert_eq!(d.alignment.children.len(), 2);
        assert_eq!(d.alignment.children[0].end, 4);
    }

    #[test]
    fn test_repeated_net_splits_segments() {
        let set = set();
        let graph = SearchGraph::linear(&set, &[0, 0]);
        let o = obs(&[0.1, -0.2, 0.3]);
        let d = ViterbiDecoder::new(&set, &graph).decode(o.view()).unwrap();
        assert_eq!(d.tokens(), vec!["a", "a"]);
        assert_eq!(d.alignment.children.len(), 2);
    }

    #[test]
    fn test_single_frame_log_prob() {
        let set = set();
        let graph = SearchGraph::linear(&set, &[1]);
        let o = obs(&[5.0]);
        let d = ViterbiDecoder::new(&set, &graph).decode(o.view()).unwrap();
        let b = set.net(1).emitter(1).unwrap().log_prob(o.row(0));
        // entry -> state (1.0), state -> exit (0.5)
        assert_abs_diff_eq!(d.log_prob, b + 0.5_f64.ln(), epsilon = 1e-12);
        assert_eq!(d.labels, vec!["b"]);
    }

    #[test]
    fn test_incomplete_path_falls_back() {
        let set = set();
        // Two nets without skips cannot fit a single frame
        let graph = SearchGraph::linear(&set, &[0, 1]);
        let o = obs(&[0.0]);
        let d = ViterbiDecoder::new(&set, &graph).decode(o.view()).unwrap();
        assert_eq!(d.labels, vec!["a"]);
    }

    #[test]
    fn test_dimension_mismatch() {
        let set = set();
        let graph = set.search_graph().unwrap();
        let o = Array2::<f64>::zeros((2, 3));
        assert!(matches!(
            ViterbiDecoder::new(&set, &graph).decode(o.view()),
            Err(HmmError::DimensionMismatch { .. })
        ));
    }
}
