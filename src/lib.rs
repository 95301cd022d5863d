//! # HMM Chain
//!
//! Continuous-density hidden Markov models trained as embedded chains.
//!
//! ## Features
//!
//! - Diagonal Gaussian and Gaussian mixture emitters
//! - Left-to-right nets with non-emitting entry and exit states
//! - Forward-backward over chains of nets with skip arcs
//! - Embedded Baum-Welch training, parallel over sequences
//! - Token-passing Viterbi decoding and forced alignment
//! - Seeded sampling of sequences from nets and chains
//! - JSON persistence of models, observations and alignments
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use hmm_chain::prelude::*;
//!
//! // Load labeled observation sequences
//! let data = Manifest::from_file("train.json")?.load()?;
//!
//! // Train every net of the model on the embedded chains
//! let mut set = HmmSet::from_file("model.json")?;
//! let report = BaumWelch::new(TrainerConfig::default()).train(&mut set, &data)?;
//!
//! // Decode with a graph in which any net can follow any net
//! let graph = set.search_graph()?;
//! let decoding = ViterbiDecoder::new(&set, &graph).decode(data[0].view())?;
//! println!("{:?}", decoding.tokens());
//! ```

pub mod config;
pub mod data;
pub mod error;
pub mod eval;
pub mod hmm;
pub mod models;
pub mod numeric;

pub use config::{Config, DecoderConfig, TrainerConfig};
pub use data::{ANode, FloatObsSequence, Manifest, ObsReader};
pub use error::{HmmError, Result};
pub use eval::{DecodeResult, Score};
pub use hmm::{
    Assigner, BaumWelch, CancelToken, Chain, Decoding, DictionaryAssigner, DirectAssigner,
    Generator, HmmSet, Net, SearchGraph, TrainingReport, ViterbiDecoder,
};
pub use models::{Emitter, Gaussian, Gmm, Sampler, Scorer, Trainer};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::config::{Config, DecoderConfig, TrainerConfig};
    pub use crate::data::{ANode, FloatObsSequence, Manifest, ObsReader};
    pub use crate::error::{HmmError, Result};
    pub use crate::eval::{score, DecodeResult, Score};
    pub use crate::hmm::{
        Assigner, BaumWelch, CancelToken, Chain, Decoding, DictionaryAssigner, DirectAssigner,
        Generator, HmmSet, Net, SearchGraph, TrainingReport, ViterbiDecoder,
    };
    pub use crate::models::{Emitter, Gaussian, Gmm, Sampler, Scorer, Trainer};
}
