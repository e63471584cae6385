//! Trainable positional embeddings.

use candle_core::{Tensor, Var};

use super::{EmbeddingError, PositionalConfig};

/// Learns positional embeddings.
///
/// The weight table is trainable state sampled from `N(0, 1)` at construction
/// and on reset.
#[derive(Debug)]
pub struct LearnedPositionalEmbedding {
    config: PositionalConfig,
    weight: Var,
    training: bool,
}

impl LearnedPositionalEmbedding {
    /// Builds the module and samples its weight table.
    pub fn new(config: PositionalConfig) -> Result<Self, EmbeddingError> {
        config.validate()?;

        let weight = Self::sample_table(&config)?;

        Ok(Self {
            config,
            weight,
            training: true,
        })
    }

    fn sample_table(config: &PositionalConfig) -> Result<Var, EmbeddingError> {
        let shape = (config.max_seq_len, config.embed_dim);
        let initial = Var::randn(0f32, 1f32, shape, &config.device)?;
        if initial.dtype() == config.dtype {
            Ok(initial)
        } else {
            let cast = initial.to_dtype(config.dtype)?;
            Ok(Var::from_tensor(&cast)?)
        }
    }

    /// The dimensionality of the produced embeddings.
    pub fn embed_dim(&self) -> usize {
        self.config.embed_dim
    }

    /// The configured maximum sequence length.
    pub fn max_seq_len(&self) -> usize {
        self.config.max_seq_len
    }

    /// Whether the module is in training mode.
    pub fn is_training(&self) -> bool {
        self.training
    }

    /// Switches between training and evaluation mode.
    pub fn set_training(&mut self, training: bool) {
        self.training = training;
    }

    /// Returns a clone of the trainable weight table.
    pub fn weight(&self) -> Tensor {
        self.weight.as_tensor().clone()
    }

    /// Re-samples the weight table from `N(0, 1)`.
    ///
    /// The table is persistent trainable state: when `skip_persistent` is
    /// set, it is left untouched so checkpointed parameters survive a reset
    /// performed for other reasons.
    pub fn reset_parameters(&mut self, skip_persistent: bool) -> Result<(), EmbeddingError> {
        if skip_persistent {
            return Ok(());
        }
        let fresh = Self::sample_table(&self.config)?;
        self.weight.set(fresh.as_tensor())?;
        Ok(())
    }

    pub(crate) fn apply(
        &self,
        seqs: &Tensor,
        start_step: usize,
    ) -> Result<Tensor, EmbeddingError> {
        let (_batch, seq_len, _embed_dim) = seqs.dims3()?;
        let table = self.weight.as_tensor().narrow(0, start_step, seq_len)?;
        Ok(seqs.broadcast_add(&table)?)
    }
}
