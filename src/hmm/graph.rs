//! Decoding graphs composed from the nets of a set

use super::set::HmmSet;
use crate::config::DecoderConfig;
use crate::error::Result;
use crate::numeric::NEG_INF;

/// Role of a node in a search graph
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// Super start (non-emitting)
    Start,
    /// Super end (non-emitting)
    End,
    /// Entry state of a net instance
    Entry,
    /// Emitting state of a net instance
    Emitting,
    /// Exit state of a net instance
    Exit,
}

impl NodeKind {
    pub fn is_emitting(self) -> bool {
        self == NodeKind::Emitting
    }
}

/// A state of a net instance, or one of the two super nodes
#[derive(Debug, Clone, PartialEq)]
pub struct GraphNode {
    pub kind: NodeKind,
    /// Index of the net in its set; `None` for super nodes
    pub net: Option<usize>,
    /// State index within the net
    pub state: usize,
    /// Net instance the node belongs to
    pub instance: usize,
}

/// Graph of net instances joined through their entry and exit states.
///
/// Arcs are stored per destination with their log weight.
#[derive(Debug, Clone)]
pub struct SearchGraph {
    nodes: Vec<GraphNode>,
    incoming: Vec<Vec<(usize, f64)>>,
    instances: Vec<(usize, String)>,
    emitting: Vec<usize>,
    non_emitting: Vec<usize>,
    start: usize,
    end: usize,
}

impl SearchGraph {
    fn with_start() -> Self {
        let mut graph = Self {
            nodes: Vec::new(),
            incoming: Vec::new(),
            instances: Vec::new(),
            emitting: Vec::new(),
            non_emitting: Vec::new(),
            start: 0,
            end: 0,
        };
        graph.start = graph.add_node(NodeKind::Start, None, 0, usize::MAX);
        graph
    }

    fn add_node(&mut self, kind: NodeKind, net: Option<usize>, state: usize, instance: usize) -> usize {
        let id = self.nodes.len();
        self.nodes.push(GraphNode {
            kind,
            net,
            state,
            instance,
        });
        self.incoming.push(Vec::new());
        if kind.is_emitting() {
            self.emitting.push(id);
        } else {
            self.non_emitting.push(id);
        }
        id
    }

    fn add_arc(&mut self, from: usize, to: usize, weight: f64) {
        if weight != NEG_INF {
            self.incoming[to].push((from, weight));
        }
    }

    /// Add every state of net `idx`; returns the entry and exit node ids.
    fn add_instance(&mut self, set: &HmmSet, idx: usize) -> (usize, usize) {
        let net = set.net(idx);
        let instance = self.instances.len();
        self.instances.push((idx, net.name().to_string()));
        let base = self.nodes.len();
        let exit = net.exit();
        for s in 0..net.n_states() {
            let kind = match s {
                0 => NodeKind::Entry,
                s if s == exit => NodeKind::Exit,
                _ => NodeKind::Emitting,
            };
            self.add_node(kind, Some(idx), s, instance);
        }
        // Arcs from emitting states come before the entry row, so a self-loop
        // wins a tie against leaving and re-entering the net.
        for i in (1..net.n_states()).chain(0..1) {
            for j in 0..net.n_states() {
                self.add_arc(base + i, base + j, net.log_trans(i, j));
            }
        }
        (base, base + exit)
    }

    fn finish(&mut self, exits: &[usize]) {
        self.end = self.add_node(NodeKind::End, None, 0, usize::MAX);
        for &exit in exits {
            self.add_arc(exit, self.end, 0.0);
        }
    }

    /// Nets of `nets` in sequence, each feeding the next
    pub fn linear(set: &HmmSet, nets: &[usize]) -> Self {
        let mut graph = Self::with_start();
        let mut prev = graph.start;
        for &idx in nets {
            let (entry, exit) = graph.add_instance(set, idx);
            graph.add_arc(prev, entry, 0.0);
            prev = exit;
        }
        graph.finish(&[prev]);
        graph
    }

    /// One instance of every net; the exit of each net feeds the entry of
    /// every net in its follow-set (all nets when no follow-set is given).
    pub fn full(set: &HmmSet, config: &DecoderConfig) -> Result<Self> {
        let mut graph = Self::with_start();
        let mut ends = Vec::with_capacity(set.len());
        for idx in 0..set.len() {
            let (entry, exit) = graph.add_instance(set, idx);
            graph.add_arc(graph.start, entry, 0.0);
            ends.push((entry, exit));
        }
        let weight = config.junction_log_weight;
        match &config.follow {
            None => {
                for a in 0..ends.len() {
                    for b in 0..ends.len() {
                        graph.add_arc(ends[a].1, ends[b].0, weight);
                    }
                }
            }
            Some(follow) => {
                for (from, successors) in follow {
                    let a = set.index_of(from)?;
                    for to in successors {
                        let b = set.index_of(to)?;
                        graph.add_arc(ends[a].1, ends[b].0, weight);
                    }
                }
            }
        }
        let exits: Vec<usize> = ends.iter().map(|&(_, exit)| exit).collect();
        graph.finish(&exits);
        tracing::debug!(
            "Search graph: {} nodes, {} arcs, {} net instances",
            graph.len(),
            graph.incoming.iter().map(Vec::len).sum::<usize>(),
            graph.instances.len()
        );
        Ok(graph)
    }

    /// Number of nodes
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: usize) -> &GraphNode {
        &self.nodes[id]
    }

    pub fn start(&self) -> usize {
        self.start
    }

    pub fn end(&self) -> usize {
        self.end
    }

    /// Incoming arcs of `id` as `(source, log weight)`
    pub fn incoming(&self, id: usize) -> &[(usize, f64)] {
        &self.incoming[id]
    }

    pub fn emitting(&self) -> &[usize] {
        &self.emitting
    }

    pub fn non_emitting(&self) -> &[usize] {
        &self.non_emitting
    }

    /// Net name of an instance
    pub fn instance_label(&self, instance: usize) -> &str {
        &self.instances[instance].1
    }

    /// Set indices of the nets instantiated in this graph
    pub fn instance_nets(&self) -> impl Iterator<Item = usize> + '_ {
        self.instances.iter().map(|&(idx, _)| idx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HmmError;
    use crate::hmm::net::tests::one_state;
    use std::collections::HashMap;

    fn set() -> HmmSet {
        let mut set = HmmSet::new();
        set.add_net(one_state("a", 0.0, 1.0)).unwrap();
        set.add_net(one_state("b", 5.0, 1.0)).unwrap();
        set
    }

    #[test]
    fn test_linear_graph() {
        let set = set();
        let graph = SearchGraph::linear(&set, &[0, 1, 0]);
        // start + 3 x 3 states + end
        assert_eq!(graph.len(), 11);
        assert_eq!(graph.emitting().len(), 3);
        let first_entry = graph.incoming(graph.start()).len();
        assert_eq!(first_entry, 0);
        // Exit of instance 0 feeds entry of instance 1
        assert_eq!(graph.incoming(4), &[(3, 0.0)]);
        assert_eq!(graph.instance_label(2), "a");
        assert_eq!(graph.incoming(graph.end()), &[(9, 0.0)]);
    }

    #[test]
    fn test_full_mesh() {
        let set = set();
        let graph = set.search_graph().unwrap();
        assert_eq!(graph.len(), 8);
        // Entry of "a" is reached from start and from both exits
        let sources: Vec<usize> = graph.incoming(1).iter().map(|&(s, _)| s).collect();
        assert_eq!(sources, vec![0, 3, 6]);
        assert_eq!(graph.incoming(graph.end()).len(), 2);
        // The self-loop precedes the arc from the entry
        assert_eq!(graph.incoming(2), &[(2, 0.5_f64.ln()), (1, 0.0)]);
    }

    #[test]
    fn test_follow_set() {
        let set = set();
        let config = DecoderConfig {
            follow: Some(HashMap::from([("a".to_string(), vec!["b".to_string()])])),
            junction_log_weight: -1.5,
        };
        let graph = set.search_graph_with(&config).unwrap();
        assert_eq!(graph.incoming(1), &[(0, 0.0)]);
        assert_eq!(graph.incoming(4), &[(0, 0.0), (3, -1.5)]);

        let bad = DecoderConfig {
            follow: Some(HashMap::from([("a".to_string(), vec!["zzz".to_string()])])),
            junction_log_weight: 0.0,
        };
        assert!(matches!(set.search_graph_with(&bad), Err(HmmError::UnknownModel(_))));
    }
}
