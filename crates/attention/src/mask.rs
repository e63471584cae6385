//! Additive attention masks.
//!
//! Masks carry a float bias added to raw attention scores before
//! normalisation: `0.0` keeps a position, `f32::NEG_INFINITY` discards it.
//! Causally constructed masks additionally carry a marker that routes fused
//! kernels into their dedicated causal mode instead of additive-bias mode.

use candle_core::{DType, Device, Tensor};

use crate::core::AttentionError;

/// A float bias added to attention scores, with an optional causal marker.
#[derive(Debug, Clone)]
pub struct AttentionMask {
    bias: Tensor,
    causal: bool,
}

impl AttentionMask {
    /// Wraps an additive bias shaped `(seq_len, kv_len)` or
    /// `(batch, seq_len, kv_len)`.
    pub fn from_bias(bias: Tensor) -> Result<Self, AttentionError> {
        match bias.rank() {
            2 | 3 => Ok(Self { bias, causal: false }),
            _ => Err(AttentionError::Shape(format!(
                "mask bias must have rank 2 or 3, got {:?}",
                bias.dims()
            ))),
        }
    }

    /// Builds a causal mask carrying the causal marker.
    ///
    /// When `kv_len > q_len`, queries align with the most recent `q_len` keys
    /// so the extended prefix stays visible.
    pub fn causal(
        q_len: usize,
        kv_len: usize,
        dtype: DType,
        device: &Device,
    ) -> Result<Self, AttentionError> {
        let offset = kv_len.saturating_sub(q_len);
        let mut data = vec![0f32; q_len * kv_len];
        for q in 0..q_len {
            for k in (q + offset + 1)..kv_len {
                data[q * kv_len + k] = f32::NEG_INFINITY;
            }
        }

        let bias = Tensor::from_vec(data, (q_len, kv_len), device)?.to_dtype(dtype)?;
        Ok(Self { bias, causal: true })
    }

    /// The additive bias tensor.
    pub fn bias(&self) -> &Tensor {
        &self.bias
    }

    /// Whether the mask was constructed as a causal mask.
    ///
    /// Fused kernels use this to select their causal mode; the bias is then
    /// not applied, as the two are mutually exclusive.
    pub fn is_causal(&self) -> bool {
        self.causal
    }
}
