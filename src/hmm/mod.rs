//! Networks, embedded chains, training and decoding

mod assigner;
mod chain;
mod generator;
mod graph;
mod net;
mod set;
mod trainer;
mod viterbi;

pub use assigner::{Assigner, DictionaryAssigner, DirectAssigner};
pub use chain::{Chain, NetOccupancy, Occupancy};
pub use generator::Generator;
pub use graph::{GraphNode, NodeKind, SearchGraph};
pub use net::{Net, NetRecord};
pub use set::HmmSet;
pub use trainer::{BaumWelch, CancelToken, Expectation, TrainingReport};
pub use viterbi::{Decoding, ViterbiDecoder};
