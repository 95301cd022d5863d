//! Error types for the HMM toolkit

use thiserror::Error;

/// Result type alias for this crate
pub type Result<T> = std::result::Result<T, HmmError>;

/// Main error type for the library
#[derive(Error, Debug)]
pub enum HmmError {
    /// Observation dimensionality or parameter-vector length disagrees
    #[error("Dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch { expected: usize, found: usize },

    /// Malformed transition matrix or emitter layout
    #[error("Invalid net: {0}")]
    InvalidNet(String),

    /// The assigner could not resolve a label
    #[error("Unknown label: {0}")]
    UnknownLabel(String),

    /// A model name that is not registered in the set
    #[error("Unknown model: {0}")]
    UnknownModel(String),

    /// A chain with no nets
    #[error("Empty chain")]
    EmptyChain,

    /// Interval tree invariant violated
    #[error("Invalid alignment: {0}")]
    InvalidAlignment(String),

    /// A zero-length observation sequence
    #[error("Empty observation: {0}")]
    EmptyObservation(String),

    /// Not enough effective samples for a parameter update
    #[error("Degenerate statistics: {0}")]
    Degenerate(String),

    /// The chain assigns zero probability to the sequence
    #[error("Zero likelihood for sequence {0}")]
    ZeroLikelihood(String),

    /// Underlying reader/writer failure
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error attributed to a named field
    #[error("Serialization error in field '{field}': {message}")]
    Serialization { field: String, message: String },

    /// JSON parse/emit error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Training was cancelled by the caller
    #[error("Cancelled")]
    Cancelled,
}

impl HmmError {
    /// Build a serialization error for a named field
    pub fn field(field: &str, message: impl Into<String>) -> Self {
        HmmError::Serialization {
            field: field.to_string(),
            message: message.into(),
        }
    }

    /// Whether the error only affects the current sequence.
    ///
    /// Training skips such sequences and continues with the next one.
    pub fn is_sequence_level(&self) -> bool {
        matches!(
            self,
            HmmError::DimensionMismatch { .. }
                | HmmError::UnknownLabel(_)
                | HmmError::UnknownModel(_)
                | HmmError::EmptyChain
                | HmmError::EmptyObservation(_)
                | HmmError::ZeroLikelihood(_)
        )
    }
}
