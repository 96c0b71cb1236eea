//! Error types for the training job.

use thiserror::Error;

/// Crate-wide error taxonomy.
///
/// This is a batch training job, not a service: every variant is fatal and
/// propagates to `main`, which prints a diagnostic and exits nonzero. No
/// internal retry or rollback exists anywhere in the crate.
#[derive(Debug, Error)]
pub enum Error {
    /// Input arrays or checkpoint tensors are missing, mistyped, or have the
    /// wrong shape. Raised before training starts.
    #[error("data format: {0}")]
    DataFormat(String),

    /// The minibatch loss became non-finite during training.
    #[error("non-finite loss {loss} at step {step}")]
    NumericDivergence { step: usize, loss: f32 },

    /// A checkpoint snapshot could not be persisted.
    #[error("checkpoint I/O: {0}")]
    CheckpointIo(String),

    /// SafeTensors encoding or decoding failed.
    #[error("serialization: {0}")]
    Serialization(String),

    /// Invalid split ratio or training hyperparameter.
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("I/O: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for all fallible operations in this crate.
pub type Result<T> = std::result::Result<T, Error>;
