//! Decoding results and scoring

mod metrics;

pub use metrics::{frame_accuracy, read_results, score, write_results, DecodeResult, Score};
