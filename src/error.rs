//! Errors raised by the TRPO core
//!
//! Only configuration misuse is reported here. Numerical trouble is absorbed by
//! epsilon guards and a line search that finds no acceptable step is an ordinary
//! outcome, not an error.

use thiserror::Error;

/// Fatal errors that abort a training step
#[derive(Debug, Error)]
pub enum TrpoError {
    /// A parameter name was looked up but is not part of the set
    #[error("missing parameter `{0}`")]
    MissingParameter(String),

    /// The same parameter name was inserted twice
    #[error("duplicate parameter `{0}`")]
    DuplicateParameter(String),

    /// Two name-keyed sets that must line up do not
    #[error("parameter keyset mismatch: expected {expected:?}, found {found:?}")]
    KeysetMismatch {
        expected: Vec<String>,
        found: Vec<String>,
    },

    /// A parameter exists on both sides but with different shapes
    #[error("parameter `{name}` has shape {found:?}, expected {expected:?}")]
    ShapeMismatch {
        name: String,
        expected: Vec<usize>,
        found: Vec<usize>,
    },

    /// A parameter was requested at a rank other than the one it was stored with
    #[error("parameter `{name}` has rank {rank}, requested rank {requested}")]
    RankMismatch {
        name: String,
        rank: usize,
        requested: usize,
    },

    /// Backward pass produced no gradient for a parameter that should be in the graph
    #[error("no gradient recorded for parameter `{0}`")]
    MissingGradient(String),

    /// A required collaborator (network, optimizer) is not available
    #[error("missing collaborator: {0}")]
    MissingCollaborator(&'static str),

    /// Hyperparameters outside their valid range
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Tensor data could not be read back to the host
    #[error("tensor data conversion failed: {0}")]
    TensorData(String),

    /// The policy produced probabilities no action can be sampled from
    #[error("cannot sample an action: {0}")]
    Sampling(String),
}

pub type Result<T> = std::result::Result<T, TrpoError>;
