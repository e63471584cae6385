//! Rotary positional embeddings.
//!
//! Each adjacent channel pair `(2i, 2i + 1)` is rotated by the angle
//! `p * 10000^(-2i / embed_dim)` for position `p`. The rotation is expressed
//! as `cos ⊙ seqs + sin ⊙ swapped` where `swapped` maps every pair
//! `(x0, x1)` to `(-x1, x0)`, so no explicit rotation matrix is built.

use candle_core::Tensor;

use super::{EmbeddingError, PositionalConfig};

/// Produces relative positional embeddings via per-pair 2D rotations.
#[derive(Debug)]
pub struct RotaryEmbedding {
    config: PositionalConfig,
    cos_weight: Tensor,
    sin_weight: Tensor,
    training: bool,
}

impl RotaryEmbedding {
    /// Builds the module and computes its cosine/sine tables.
    ///
    /// Fails when `embed_dim` is odd, since channels are rotated in pairs.
    pub fn new(config: PositionalConfig) -> Result<Self, EmbeddingError> {
        config.validate()?;

        if config.embed_dim % 2 != 0 {
            return Err(EmbeddingError::Config(format!(
                "embed_dim must be even, but is {} instead",
                config.embed_dim
            )));
        }

        let (cos_weight, sin_weight) = Self::build_tables(&config)?;

        Ok(Self {
            config,
            cos_weight,
            sin_weight,
            training: true,
        })
    }

    fn build_tables(config: &PositionalConfig) -> Result<(Tensor, Tensor), EmbeddingError> {
        let PositionalConfig {
            max_seq_len,
            embed_dim,
            ..
        } = *config;

        let half = embed_dim / 2;
        let mut cos_data = vec![0f32; max_seq_len * embed_dim];
        let mut sin_data = vec![0f32; max_seq_len * embed_dim];

        for pos in 0..max_seq_len {
            let row = pos * embed_dim;
            for i in 0..half {
                let angle =
                    pos as f64 * 10_000f64.powf(-2.0 * i as f64 / embed_dim as f64);
                let cos = angle.cos() as f32;
                let sin = angle.sin() as f32;
                // Both channels of a pair share the rotation angle.
                cos_data[row + 2 * i] = cos;
                cos_data[row + 2 * i + 1] = cos;
                sin_data[row + 2 * i] = sin;
                sin_data[row + 2 * i + 1] = sin;
            }
        }

        let cos = Tensor::from_vec(cos_data, (max_seq_len, embed_dim), &config.device)?
            .to_dtype(config.dtype)?;
        let sin = Tensor::from_vec(sin_data, (max_seq_len, embed_dim), &config.device)?
            .to_dtype(config.dtype)?;
        Ok((cos, sin))
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

    /// Returns a clone of the cosine table.
    pub fn cos_weight(&self) -> Tensor {
        self.cos_weight.clone()
    }

    /// Returns a clone of the sine table.
    pub fn sin_weight(&self) -> Tensor {
        self.sin_weight.clone()
    }

    /// Recomputes both tables. They are non-persistent buffers, so the
    /// `skip_persistent` flag never applies to this variant.
    pub fn reset_parameters(&mut self, _skip_persistent: bool) -> Result<(), EmbeddingError> {
        let (cos, sin) = Self::build_tables(&self.config)?;
        self.cos_weight = cos;
        self.sin_weight = sin;
        log::debug!(
            "rotary positional tables rebuilt max_seq_len={} embed_dim={}",
            self.config.max_seq_len,
            self.config.embed_dim
        );
        Ok(())
    }

    pub(crate) fn apply(
        &self,
        seqs: &Tensor,
        start_step: usize,
    ) -> Result<Tensor, EmbeddingError> {
        let (_batch, seq_len, _embed_dim) = seqs.dims3()?;

        let swapped = Self::swap_pairs(seqs)?;

        let cos = self.cos_weight.narrow(0, start_step, seq_len)?;
        let sin = self.sin_weight.narrow(0, start_step, seq_len)?;

        let rotated = seqs
            .broadcast_mul(&cos)?
            .add(&swapped.broadcast_mul(&sin)?)?;
        Ok(rotated)
    }

    /// Maps every adjacent channel pair `(x0, x1)` to `(-x1, x0)`.
    fn swap_pairs(seqs: &Tensor) -> candle_core::Result<Tensor> {
        let (batch, seq_len, embed_dim) = seqs.dims3()?;
        let half = embed_dim / 2;

        let pairs = seqs.reshape((batch, seq_len, half, 2))?;
        let chunks = pairs.chunk(2, 3)?;
        let x1 = chunks[0].squeeze(3)?;
        let x2 = chunks[1].squeeze(3)?;

        let swapped = Tensor::stack(&[&x2.neg()?, &x1], 3)?;
        swapped.reshape((batch, seq_len, embed_dim))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn swapping_negates_and_exchanges_pairs() -> candle_core::Result<()> {
        let device = Device::Cpu;
        let seqs = Tensor::from_vec(vec![1f32, 2.0, 3.0, 4.0], (1, 1, 4), &device)?;
        let swapped = RotaryEmbedding::swap_pairs(&seqs)?;
        let values = swapped.flatten_all()?.to_vec1::<f32>()?;
        assert_eq!(values, vec![-2.0, 1.0, -4.0, 3.0]);
        Ok(())
    }

    #[test]
    fn position_zero_is_the_identity_rotation() -> Result<(), EmbeddingError> {
        let module = RotaryEmbedding::new(PositionalConfig::new(4, 4))?;
        let seqs = Tensor::from_vec(
            vec![0.5f32, -1.0, 2.0, 0.25],
            (1, 1, 4),
            &Device::Cpu,
        )?;
        let out = module.apply(&seqs, 0)?;
        let values = out.flatten_all()?.to_vec1::<f32>()?;
        assert_eq!(values, vec![0.5, -1.0, 2.0, 0.25]);
        Ok(())
    }

    #[test]
    fn rotation_matches_the_closed_form() -> Result<(), EmbeddingError> {
        let module = RotaryEmbedding::new(PositionalConfig::new(4, 2))?;
        let seqs = Tensor::from_vec(vec![1f32, 0.0], (1, 1, 2), &Device::Cpu)?;
        let out = module.apply(&seqs, 1)?;
        let values = out.flatten_all()?.to_vec1::<f32>()?;
        assert!((values[0] - 1f32.cos()).abs() < 1e-6);
        assert!((values[1] - 1f32.sin()).abs() < 1e-6);
        Ok(())
    }
}
