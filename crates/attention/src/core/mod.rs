//! Core trait and types shared across attention implementations.

pub mod errors;

use candle_core::Tensor;

use crate::mask::AttentionMask;

pub use errors::AttentionError;

/// Computes scaled dot-product attention.
///
/// * `queries` are shaped `(N, S, K)`, `keys` `(N, S_kv, K)`, and `values`
///   `(N, S_kv, V)`.
/// * The optional mask carries an additive float bias broadcastable to
///   `(N, S, S_kv)` that joins the raw attention scores before
///   normalisation.
/// * The attention output is shaped `(N, S, V)`; the weights, when
///   requested, `(N, S, S_kv)`.
///
/// Implementations are selected once at configuration time and never change
/// strategy afterwards; see [`crate::get_default_sdpa`].
pub trait Sdpa: std::fmt::Debug + Send + Sync {
    /// Computes attention for the given queries, keys, and values.
    ///
    /// With `needs_weights` set, the post-normalisation attention weights are
    /// returned alongside the output.
    fn compute(
        &self,
        queries: &Tensor,
        keys: &Tensor,
        values: &Tensor,
        mask: Option<&AttentionMask>,
        needs_weights: bool,
    ) -> Result<(Tensor, Option<Tensor>), AttentionError>;

    /// Switches between training and evaluation mode.
    ///
    /// Dropout on attention weights is only applied in training mode.
    fn set_training(&mut self, training: bool);
}

/// Validates the q/k/v/mask contract shared by every strategy.
pub(crate) fn validate_inputs(
    queries: &Tensor,
    keys: &Tensor,
    values: &Tensor,
    mask: Option<&AttentionMask>,
) -> Result<(), AttentionError> {
    let (batch, q_len, k_dim) = queries.dims3().map_err(|_| {
        AttentionError::Shape(format!(
            "queries must be shaped (batch, seq_len, key_dim), got {:?}",
            queries.dims()
        ))
    })?;
    let (kb, kv_len, kd) = keys.dims3().map_err(|_| {
        AttentionError::Shape(format!(
            "keys must be shaped (batch, kv_len, key_dim), got {:?}",
            keys.dims()
        ))
    })?;
    let (vb, v_len, _v_dim) = values.dims3().map_err(|_| {
        AttentionError::Shape(format!(
            "values must be shaped (batch, kv_len, value_dim), got {:?}",
            values.dims()
        ))
    })?;

    if kb != batch || kd != k_dim {
        return Err(AttentionError::Shape(format!(
            "keys shape mismatch: expected ({batch}, ?, {k_dim}), got ({kb}, {kv_len}, {kd})"
        )));
    }
    if vb != batch || v_len != kv_len {
        return Err(AttentionError::Shape(format!(
            "values shape mismatch: expected ({batch}, {kv_len}, ?), got {:?}",
            values.dims()
        )));
    }

    let device = queries.device();
    if !device.same_device(keys.device()) || !device.same_device(values.device()) {
        return Err(AttentionError::Shape(
            "queries, keys, and values must reside on the same device".into(),
        ));
    }

    let dtype = queries.dtype();
    if dtype != keys.dtype() || dtype != values.dtype() {
        return Err(AttentionError::Shape(
            "queries, keys, and values must share the same dtype".into(),
        ));
    }

    if let Some(mask) = mask {
        let bias = mask.bias();
        match bias.dims() {
            [s, s_kv] => {
                if *s != q_len || *s_kv != kv_len {
                    return Err(AttentionError::Shape(format!(
                        "mask shape mismatch: expected ({q_len}, {kv_len}), got ({s}, {s_kv})"
                    )));
                }
            }
            [n, s, s_kv] => {
                if *n != batch || *s != q_len || *s_kv != kv_len {
                    return Err(AttentionError::Shape(format!(
                        "mask shape mismatch: expected ({batch}, {q_len}, {kv_len}), got {:?}",
                        bias.dims()
                    )));
                }
            }
            dims => {
                return Err(AttentionError::Shape(format!(
                    "mask must be shaped (seq_len, kv_len) or (batch, seq_len, kv_len), got {dims:?}"
                )));
            }
        }
        if !device.same_device(bias.device()) {
            return Err(AttentionError::Shape(
                "mask must reside on the same device as the queries".into(),
            ));
        }
    }

    Ok(())
}
