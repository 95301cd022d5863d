//! Observation data, alignments and stream readers

mod alignment;
mod observation;
mod reader;

pub use alignment::ANode;
pub use observation::{FloatObsSequence, ObsRecord};
pub use reader::{write_sequences, Manifest, ObsReader};
