//! Error types emitted by attention implementations.

use thiserror::Error;

/// Attention-specific error category.
#[derive(Debug, Error)]
pub enum AttentionError {
    /// The supplied tensor shapes do not align with the documented contract.
    #[error("{0}")]
    Shape(String),
    /// The module configuration is invalid.
    #[error("{0}")]
    Config(String),
    /// A failure propagated from the numeric backend.
    #[error(transparent)]
    Backend(#[from] candle_core::Error),
}
