//! Non-fused reference attention.
//!
//! The naive path materialises the full weight matrix, which makes it the
//! only strategy able to return attention weights. It also serves as the
//! fallback body for the fused strategy.

use candle_core::Tensor;
use candle_nn::ops::{dropout, softmax_last_dim};

use crate::core::{validate_inputs, AttentionError, Sdpa};
use crate::mask::AttentionMask;

/// Computes scaled dot-product attention using a non-fused implementation.
#[derive(Debug)]
pub struct NaiveSdpa {
    attn_dropout_p: f32,
    training: bool,
}

impl NaiveSdpa {
    /// Creates the module with the given dropout probability on attention
    /// weights.
    pub fn new(attn_dropout_p: f32) -> Self {
        Self {
            attn_dropout_p,
            training: true,
        }
    }

    /// The configured dropout probability on attention weights.
    pub fn attn_dropout_p(&self) -> f32 {
        self.attn_dropout_p
    }
}

impl Sdpa for NaiveSdpa {
    fn compute(
        &self,
        queries: &Tensor,
        keys: &Tensor,
        values: &Tensor,
        mask: Option<&AttentionMask>,
        needs_weights: bool,
    ) -> Result<(Tensor, Option<Tensor>), AttentionError> {
        validate_inputs(queries, keys, values, mask)?;
        naive_scaled_dot_product_attention(
            queries,
            keys,
            values,
            mask,
            self.attn_dropout_p,
            needs_weights,
            self.training,
        )
    }

    fn set_training(&mut self, training: bool) {
        self.training = training;
    }
}

/// The shared non-fused attention body.
///
/// Queries are scaled by `1 / sqrt(K)` before the batched matmul so that,
/// when a mask is present, the bias joins the already-scaled product in one
/// combined `mask + scores` step. Keeping that operation order matters for
/// the magnitude of large additive biases relative to the scores.
pub(crate) fn naive_scaled_dot_product_attention(
    queries: &Tensor,
    keys: &Tensor,
    values: &Tensor,
    mask: Option<&AttentionMask>,
    dropout_p: f32,
    needs_weights: bool,
    training: bool,
) -> Result<(Tensor, Option<Tensor>), AttentionError> {
    let (_batch, _q_len, k_dim) = queries.dims3()?;
    let scale = (k_dim as f64).powf(-0.5);

    let queries = queries.affine(scale, 0.0)?;

    // (N, S, K) @ (N, K, S_kv) = (N, S, S_kv)
    let scores = queries.matmul(&keys.transpose(1, 2)?)?;

    let weights = match mask {
        Some(mask) => mask.bias().broadcast_add(&scores)?,
        None => scores,
    };

    let mut weights = softmax_last_dim(&weights)?;

    if training && dropout_p > 0.0 {
        weights = dropout(&weights, dropout_p)?;
    }

    // (N, S, S_kv) @ (N, S_kv, V) = (N, S, V)
    let attn = weights.matmul(values)?;

    Ok((attn, if needs_weights { Some(weights) } else { None }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};

    fn build_inputs(device: &Device) -> candle_core::Result<(Tensor, Tensor, Tensor)> {
        let data: Vec<f32> = (0..48).map(|i| (i as f32) * 0.03 - 0.5).collect();
        let q = Tensor::from_vec(data[..24].to_vec(), (2, 3, 4), device)?;
        let k = Tensor::from_vec(data[12..36].to_vec(), (2, 3, 4), device)?;
        let v = Tensor::from_vec(data[24..].to_vec(), (2, 3, 4), device)?;
        Ok((q, k, v))
    }

    #[test]
    fn weights_are_normalised() -> Result<(), AttentionError> {
        let device = Device::Cpu;
        let (q, k, v) = build_inputs(&device)?;
        let sdpa = NaiveSdpa::new(0.0);

        let (_, weights) = sdpa.compute(&q, &k, &v, None, true)?;
        let weights = weights.expect("weights requested");
        assert_eq!(weights.dims(), &[2, 3, 3]);

        let sums = weights.sum(2)?.flatten_all()?.to_vec1::<f32>()?;
        for sum in sums {
            assert!((sum - 1.0).abs() < 1e-5);
        }
        Ok(())
    }

    #[test]
    fn weights_are_omitted_unless_requested() -> Result<(), AttentionError> {
        let device = Device::Cpu;
        let (q, k, v) = build_inputs(&device)?;
        let sdpa = NaiveSdpa::new(0.0);
        let (attn, weights) = sdpa.compute(&q, &k, &v, None, false)?;
        assert_eq!(attn.dims(), &[2, 3, 4]);
        assert!(weights.is_none());
        Ok(())
    }

    #[test]
    fn mismatched_key_batch_is_rejected() {
        let device = Device::Cpu;
        let q = Tensor::zeros((1, 3, 4), DType::F32, &device).unwrap();
        let k = Tensor::zeros((2, 3, 4), DType::F32, &device).unwrap();
        let v = Tensor::zeros((1, 3, 4), DType::F32, &device).unwrap();
        let err = NaiveSdpa::new(0.0).compute(&q, &k, &v, None, false).unwrap_err();
        assert!(matches!(err, AttentionError::Shape(_)));
    }

    #[test]
    fn dropout_is_inert_outside_training() -> Result<(), AttentionError> {
        let device = Device::Cpu;
        let (q, k, v) = build_inputs(&device)?;

        let mut with_dropout = NaiveSdpa::new(0.5);
        with_dropout.set_training(false);
        let baseline = NaiveSdpa::new(0.0);

        let (a, _) = with_dropout.compute(&q, &k, &v, None, false)?;
        let (b, _) = baseline.compute(&q, &k, &v, None, false)?;
        let diff = a.sub(&b)?.abs()?.max_all()?.to_vec0::<f32>()?;
        assert_eq!(diff, 0.0);
        Ok(())
    }
}
