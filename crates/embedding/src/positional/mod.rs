//! Positional embedding variants and their shared entry point.
//!
//! Every variant consumes `(batch, seq_len, embed_dim)` sequences and returns
//! a tensor of exactly the same shape. The closed set of variants is wrapped
//! by [`PositionalEmbedding`], whose [`produce`](PositionalEmbedding::produce)
//! entry point enforces the shared preconditions before dispatching.

pub mod learned;
pub mod rotary;
pub mod sinusoidal;

use candle_core::{DType, Device, Tensor};
use thiserror::Error;

use crate::incremental::IncrementalStateBag;

pub use learned::LearnedPositionalEmbedding;
pub use rotary::RotaryEmbedding;
pub use sinusoidal::SinusoidalPositionalEmbedding;

/// Errors produced by the positional embedding engine.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// Input does not satisfy a documented shape contract.
    #[error("{0}")]
    Shape(String),
    /// The module configuration is invalid.
    #[error("{0}")]
    Config(String),
    /// A failure propagated from the numeric backend.
    #[error(transparent)]
    Backend(#[from] candle_core::Error),
}

/// Geometry and placement shared by all positional embedding variants.
#[derive(Debug, Clone)]
pub struct PositionalConfig {
    /// The expected maximum sequence length.
    pub max_seq_len: usize,
    /// The dimensionality of the positional embeddings.
    pub embed_dim: usize,
    /// Storage dtype of the weight tables.
    pub dtype: DType,
    /// Device hosting the weight tables.
    pub device: Device,
}

impl PositionalConfig {
    /// Creates a CPU/f32 configuration for the given geometry.
    pub fn new(max_seq_len: usize, embed_dim: usize) -> Self {
        Self {
            max_seq_len,
            embed_dim,
            dtype: DType::F32,
            device: Device::Cpu,
        }
    }

    pub(crate) fn validate(&self) -> Result<(), EmbeddingError> {
        if self.max_seq_len == 0 {
            return Err(EmbeddingError::Config(
                "max_seq_len must be greater than zero".into(),
            ));
        }
        if self.embed_dim == 0 {
            return Err(EmbeddingError::Config(
                "embed_dim must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// The closed set of positional embedding variants.
#[derive(Debug)]
pub enum PositionalEmbedding {
    /// Deterministic sinusoidal embeddings.
    Sinusoidal(SinusoidalPositionalEmbedding),
    /// Trainable embeddings initialised from `N(0, 1)`.
    Learned(LearnedPositionalEmbedding),
    /// Rotary embeddings applied as per-pair 2D rotations.
    Rotary(RotaryEmbedding),
}

impl PositionalEmbedding {
    /// The dimensionality of the produced embeddings.
    pub fn embed_dim(&self) -> usize {
        match self {
            Self::Sinusoidal(m) => m.embed_dim(),
            Self::Learned(m) => m.embed_dim(),
            Self::Rotary(m) => m.embed_dim(),
        }
    }

    /// The configured maximum sequence length.
    pub fn max_seq_len(&self) -> usize {
        match self {
            Self::Sinusoidal(m) => m.max_seq_len(),
            Self::Learned(m) => m.max_seq_len(),
            Self::Rotary(m) => m.max_seq_len(),
        }
    }

    /// Whether the module is in training mode.
    pub fn is_training(&self) -> bool {
        match self {
            Self::Sinusoidal(m) => m.is_training(),
            Self::Learned(m) => m.is_training(),
            Self::Rotary(m) => m.is_training(),
        }
    }

    /// Switches between training and evaluation mode.
    ///
    /// The incremental decoding offset is only honoured in evaluation mode.
    pub fn set_training(&mut self, training: bool) {
        match self {
            Self::Sinusoidal(m) => m.set_training(training),
            Self::Learned(m) => m.set_training(training),
            Self::Rotary(m) => m.set_training(training),
        }
    }

    /// Encodes `seqs` with positional information.
    ///
    /// `padding_mask` is the float padding mask of `seqs`, accepted for
    /// interface parity with front-end composers; none of the built-in
    /// variants consults it. When the module is in evaluation mode and a
    /// `state_bag` is supplied, positions continue from the bag's step so an
    /// incremental decode picks up where it left off.
    ///
    /// The output shape equals the input shape exactly.
    pub fn produce(
        &self,
        seqs: &Tensor,
        padding_mask: Option<&Tensor>,
        state_bag: Option<&IncrementalStateBag>,
    ) -> Result<Tensor, EmbeddingError> {
        let _ = padding_mask;

        let (_batch, seq_len, embed_dim) = seqs.dims3().map_err(|_| {
            EmbeddingError::Shape(format!(
                "sequences must be shaped (batch, seq_len, embed_dim), got {:?}",
                seqs.dims()
            ))
        })?;

        if embed_dim != self.embed_dim() {
            return Err(EmbeddingError::Shape(format!(
                "sequences have embedding dimension {embed_dim} but the module produces {}",
                self.embed_dim()
            )));
        }

        if seq_len > self.max_seq_len() {
            return Err(EmbeddingError::Shape(format!(
                "the input sequence length must be less than or equal to the maximum sequence length ({}), but is {seq_len} instead",
                self.max_seq_len()
            )));
        }

        let start_step = if !self.is_training() {
            state_bag.map(IncrementalStateBag::step).unwrap_or(0)
        } else {
            0
        };

        if start_step + seq_len > self.max_seq_len() {
            return Err(EmbeddingError::Shape(format!(
                "positions [{start_step}, {}) are not covered by the weight table of length {}",
                start_step + seq_len,
                self.max_seq_len()
            )));
        }

        match self {
            Self::Sinusoidal(m) => m.apply(seqs, start_step),
            Self::Learned(m) => m.apply(seqs, start_step),
            Self::Rotary(m) => m.apply(seqs, start_step),
        }
    }

    /// Recomputes the weight tables in place.
    ///
    /// With `skip_persistent` set, persistent trainable state (the learned
    /// variant's table) is left untouched; the deterministic variants own no
    /// persistent state and always recompute.
    pub fn reset_parameters(&mut self, skip_persistent: bool) -> Result<(), EmbeddingError> {
        match self {
            Self::Sinusoidal(m) => m.reset_parameters(skip_persistent),
            Self::Learned(m) => m.reset_parameters(skip_persistent),
            Self::Rotary(m) => m.reset_parameters(skip_persistent),
        }
    }
}

impl From<SinusoidalPositionalEmbedding> for PositionalEmbedding {
    fn from(module: SinusoidalPositionalEmbedding) -> Self {
        Self::Sinusoidal(module)
    }
}

impl From<LearnedPositionalEmbedding> for PositionalEmbedding {
    fn from(module: LearnedPositionalEmbedding) -> Self {
        Self::Learned(module)
    }
}

impl From<RotaryEmbedding> for PositionalEmbedding {
    fn from(module: RotaryEmbedding) -> Self {
        Self::Rotary(module)
    }
}
