//! Deterministic sinusoidal positional embeddings.
//!
//! The weight table follows the tensor2tensor layout rather than the one in
//! the original attention paper: the first `embed_dim / 2` channels hold the
//! sines and the second half the cosines, instead of interleaving them. The
//! frequency exponent divides by `num_sin - 1`, also for tensor2tensor
//! compatibility; both choices must be preserved for checkpoint parity with
//! the reference models.

use candle_core::Tensor;

use super::{EmbeddingError, PositionalConfig};

/// Produces sinusoidal positional embeddings.
///
/// The table is a non-trainable buffer recomputed deterministically from the
/// configuration; two resets with the same configuration yield bit-identical
/// tables.
#[derive(Debug)]
pub struct SinusoidalPositionalEmbedding {
    config: PositionalConfig,
    sin_offset: usize,
    weight: Tensor,
    training: bool,
}

impl SinusoidalPositionalEmbedding {
    /// Builds the module and computes its weight table.
    ///
    /// `legacy_pad_token_idx` shifts every position by `1 + pad_idx`; it only
    /// exists for compatibility with embeddings trained by legacy fairseq
    /// models and should be `None` otherwise.
    pub fn new(
        config: PositionalConfig,
        legacy_pad_token_idx: Option<usize>,
    ) -> Result<Self, EmbeddingError> {
        config.validate()?;

        let sin_offset = match legacy_pad_token_idx {
            Some(pad_idx) => 1 + pad_idx,
            None => 0,
        };

        let weight = Self::build_table(&config, sin_offset)?;

        Ok(Self {
            config,
            sin_offset,
            weight,
            training: true,
        })
    }

    fn build_table(
        config: &PositionalConfig,
        sin_offset: usize,
    ) -> Result<Tensor, EmbeddingError> {
        let PositionalConfig {
            max_seq_len,
            embed_dim,
            ..
        } = *config;

        let num_sin = embed_dim / 2;

        // Identical to tensor2tensor: the exponent divides by `num_sin - 1`.
        let denom = num_sin as f64 - 1.0;
        let freqs: Vec<f64> = (0..num_sin)
            .map(|i| (i as f64 * -(10_000f64.ln()) / denom).exp())
            .collect();

        // The last channel stays zero when the embedding size is odd.
        let mut data = vec![0f32; max_seq_len * embed_dim];
        for pos in 0..max_seq_len {
            let p = (sin_offset + pos) as f64;
            let row = pos * embed_dim;
            for (i, freq) in freqs.iter().enumerate() {
                let angle = p * freq;
                data[row + i] = angle.sin() as f32;
                data[row + num_sin + i] = angle.cos() as f32;
            }
        }

        let table = Tensor::from_vec(data, (max_seq_len, embed_dim), &config.device)?;
        Ok(table.to_dtype(config.dtype)?)
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

    /// Returns a clone of the weight table.
    pub fn weight(&self) -> Tensor {
        self.weight.clone()
    }

    /// Recomputes the weight table, e.g. after a device or dtype change in
    /// the configuration. The table is a non-persistent buffer, so the
    /// `skip_persistent` flag never applies to this variant.
    pub fn reset_parameters(&mut self, _skip_persistent: bool) -> Result<(), EmbeddingError> {
        self.weight = Self::build_table(&self.config, self.sin_offset)?;
        log::debug!(
            "sinusoidal positional table rebuilt max_seq_len={} embed_dim={} sin_offset={}",
            self.config.max_seq_len,
            self.config.embed_dim,
            self.sin_offset
        );
        Ok(())
    }

    pub(crate) fn apply(
        &self,
        seqs: &Tensor,
        start_step: usize,
    ) -> Result<Tensor, EmbeddingError> {
        let (_batch, seq_len, _embed_dim) = seqs.dims3()?;
        let table = self.weight.narrow(0, start_step, seq_len)?;
        Ok(seqs.broadcast_add(&table)?)
    }
}
