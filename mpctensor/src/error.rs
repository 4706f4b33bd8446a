//! Error types.

use serde::{Deserialize, Serialize};

/// Common error type used throughout.
///
/// Ring overflow is deliberately absent: values wrap modulo 2^64 and that is
/// part of the arithmetic, not a failure.
#[derive(Clone, Debug, Deserialize, Serialize, thiserror::Error)]
pub enum Error {
    #[error("Unexpected error")]
    Unexpected(Option<String>),

    #[error("Shape mismatch, {lhs:?} is incompatible with {rhs:?}")]
    ShapeMismatch { lhs: Vec<usize>, rhs: Vec<usize> },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Correlated randomness exhausted: {0}")]
    TripleExhaustion(String),

    #[error("Triple {0} was already consumed")]
    TripleReuse(u64),

    #[error("Protocol desync in round {round} ({label})")]
    ProtocolDesync { round: u64, label: String },

    #[error("Communication error: {0}")]
    Communication(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl Error {
    pub(crate) fn shape_mismatch(lhs: &[usize], rhs: &[usize]) -> Error {
        Error::ShapeMismatch {
            lhs: lhs.to_vec(),
            rhs: rhs.to_vec(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
