//! Fused single-pass attention.
//!
//! The kernel streams over key/value positions with online-softmax
//! accumulation, so the `(S, S_kv)` weight matrix is never materialised.
//! That is what makes it fast, and also why it cannot return attention
//! weights: requests for weights fall back to the naive path. The kernel is
//! a portable scalar implementation operating on host memory; accelerator
//! tensors likewise fall back to the naive candle path, which dispatches
//! natively on their device.

use std::sync::OnceLock;

use candle_core::{DType, DeviceLocation, Tensor};
use rand::Rng;

use crate::backend::{BackendCapability, MIN_FUSED_KERNEL_VERSION};
use crate::core::{validate_inputs, AttentionError, Sdpa};
use crate::mask::AttentionMask;
use crate::naive::naive_scaled_dot_product_attention;

/// Computes scaled dot-product attention using the fused kernel.
#[derive(Debug)]
pub struct FusedSdpa {
    attn_dropout_p: f32,
    training: bool,
    fallback_warned: OnceLock<()>,
}

impl FusedSdpa {
    /// Creates the module against the capability probed from this build.
    pub fn new(attn_dropout_p: f32) -> Result<Self, AttentionError> {
        Self::with_capability(BackendCapability::detect(), attn_dropout_p)
    }

    /// Creates the module against an explicit backend capability.
    ///
    /// Fails when the capability reports no fused kernel or one older than
    /// [`MIN_FUSED_KERNEL_VERSION`].
    pub fn with_capability(
        capability: BackendCapability,
        attn_dropout_p: f32,
    ) -> Result<Self, AttentionError> {
        match capability.kernel_version() {
            Some(version) if version >= MIN_FUSED_KERNEL_VERSION => {
                log::debug!("fused sdpa selected kernel_version={version} dropout_p={attn_dropout_p}");
                Ok(Self {
                    attn_dropout_p,
                    training: true,
                    fallback_warned: OnceLock::new(),
                })
            }
            Some(version) => Err(AttentionError::Config(format!(
                "fused kernel version {version} is below the supported minimum {MIN_FUSED_KERNEL_VERSION}"
            ))),
            None => Err(AttentionError::Config(
                "no fused attention kernel is available in this build".into(),
            )),
        }
    }

    /// The configured dropout probability on attention weights.
    pub fn attn_dropout_p(&self) -> f32 {
        self.attn_dropout_p
    }

    fn fall_back(
        &self,
        queries: &Tensor,
        keys: &Tensor,
        values: &Tensor,
        mask: Option<&AttentionMask>,
        needs_weights: bool,
    ) -> Result<(Tensor, Option<Tensor>), AttentionError> {
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
}

impl Sdpa for FusedSdpa {
    fn compute(
        &self,
        queries: &Tensor,
        keys: &Tensor,
        values: &Tensor,
        mask: Option<&AttentionMask>,
        needs_weights: bool,
    ) -> Result<(Tensor, Option<Tensor>), AttentionError> {
        validate_inputs(queries, keys, values, mask)?;

        if !matches!(queries.device().location(), DeviceLocation::Cpu) {
            return self.fall_back(queries, keys, values, mask, needs_weights);
        }

        if needs_weights {
            if self.fallback_warned.set(()).is_ok() {
                log::warn!(
                    "falling back to a non-fused implementation because the fused kernel cannot return attention weights"
                );
            }
            return self.fall_back(queries, keys, values, mask, needs_weights);
        }

        let dropout_p = if self.training { self.attn_dropout_p } else { 0.0 };

        // A causal marker selects the kernel's causal mode; the bias is then
        // not applied, as the two are mutually exclusive.
        let (causal, bias) = match mask {
            Some(mask) if mask.is_causal() => (true, None),
            Some(mask) => (false, Some(mask.bias())),
            None => (false, None),
        };

        let attn = fused_attention(queries, keys, values, bias, dropout_p, causal)?;
        Ok((attn, None))
    }

    fn set_training(&mut self, training: bool) {
        self.training = training;
    }
}

/// Streaming attention over host memory.
///
/// Scores for each query row are folded into a running maximum, denominator,
/// and value accumulator; the normalisation happens once at the end of the
/// stream. Dropout scales surviving score contributions by `1 / (1 - p)` in
/// the numerator only, which matches dropping post-normalisation weights.
fn fused_attention(
    queries: &Tensor,
    keys: &Tensor,
    values: &Tensor,
    bias: Option<&Tensor>,
    dropout_p: f32,
    causal: bool,
) -> Result<Tensor, AttentionError> {
    let (batch, q_len, k_dim) = queries.dims3()?;
    let (_, kv_len, _) = keys.dims3()?;
    let (_, _, v_dim) = values.dims3()?;
    let dtype = queries.dtype();

    let q = queries.to_dtype(DType::F32)?.flatten_all()?.to_vec1::<f32>()?;
    let k = keys.to_dtype(DType::F32)?.flatten_all()?.to_vec1::<f32>()?;
    let v = values.to_dtype(DType::F32)?.flatten_all()?.to_vec1::<f32>()?;

    let bias_data = match bias {
        Some(bias) => {
            let per_batch = bias.rank() == 3;
            let data = bias
                .to_dtype(DType::F32)?
                .flatten_all()?
                .to_vec1::<f32>()?;
            Some((data, per_batch))
        }
        None => None,
    };

    let scale = 1.0 / (k_dim as f32).sqrt();
    let causal_offset = kv_len.saturating_sub(q_len);
    let keep_scale = 1.0 / (1.0 - dropout_p);
    let mut rng = rand::rng();

    let mut out = vec![0f32; batch * q_len * v_dim];

    for b in 0..batch {
        for i in 0..q_len {
            let q_row = &q[(b * q_len + i) * k_dim..(b * q_len + i + 1) * k_dim];

            let mut running_max = f32::NEG_INFINITY;
            let mut denom = 0f32;
            let mut acc = vec![0f32; v_dim];

            for j in 0..kv_len {
                if causal && j > i + causal_offset {
                    break;
                }

                let k_row = &k[(b * kv_len + j) * k_dim..(b * kv_len + j + 1) * k_dim];
                let mut score = q_row
                    .iter()
                    .zip(k_row)
                    .map(|(&q_val, &k_val)| q_val * k_val)
                    .sum::<f32>()
                    * scale;

                if let Some((bias_data, per_batch)) = &bias_data {
                    let base = if *per_batch { b * q_len * kv_len } else { 0 };
                    score += bias_data[base + i * kv_len + j];
                }

                if score == f32::NEG_INFINITY {
                    continue;
                }

                let new_max = running_max.max(score);
                let correction = if running_max == f32::NEG_INFINITY {
                    0.0
                } else {
                    (running_max - new_max).exp()
                };
                let prob = (score - new_max).exp();

                let kept = if dropout_p > 0.0 {
                    if rng.random::<f32>() < dropout_p {
                        0.0
                    } else {
                        keep_scale
                    }
                } else {
                    1.0
                };

                denom = denom * correction + prob;
                let v_row = &v[(b * kv_len + j) * v_dim..(b * kv_len + j + 1) * v_dim];
                for (a, &v_val) in acc.iter_mut().zip(v_row) {
                    *a = *a * correction + kept * prob * v_val;
                }
                running_max = new_max;
            }

            if denom > 0.0 {
                let out_row = &mut out[(b * q_len + i) * v_dim..(b * q_len + i + 1) * v_dim];
                for (o, a) in out_row.iter_mut().zip(&acc) {
                    *o = a / denom;
                }
            }
        }
    }

    let attn = Tensor::from_vec(out, (batch, q_len, v_dim), queries.device())?;
    Ok(attn.to_dtype(dtype)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::KernelVersion;
    use candle_core::Device;

    #[test]
    fn outdated_kernel_version_is_rejected() {
        let capability = BackendCapability::with_kernel_version(KernelVersion::new(1, 13));
        let err = FusedSdpa::with_capability(capability, 0.0).unwrap_err();
        assert!(matches!(err, AttentionError::Config(_)));
    }

    #[test]
    fn missing_kernel_is_rejected() {
        let err =
            FusedSdpa::with_capability(BackendCapability::without_fused_kernel(), 0.0).unwrap_err();
        assert!(matches!(err, AttentionError::Config(_)));
    }

    #[test]
    fn kernel_handles_uneven_value_dims() -> Result<(), AttentionError> {
        let device = Device::Cpu;
        let q = Tensor::randn(0f32, 1.0, (2, 3, 4), &device)?;
        let k = Tensor::randn(0f32, 1.0, (2, 5, 4), &device)?;
        let v = Tensor::randn(0f32, 1.0, (2, 5, 6), &device)?;

        let sdpa = FusedSdpa::new(0.0)?;
        let (attn, weights) = sdpa.compute(&q, &k, &v, None, false)?;
        assert_eq!(attn.dims(), &[2, 3, 6]);
        assert!(weights.is_none());
        Ok(())
    }
}
