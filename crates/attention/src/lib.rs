//! Scaled dot-product attention primitives for the sequence-model toolkit.
//!
//! The crate defines a portable API for computing attention over tensors with
//! layout `(batch, seq_len, dim)`: queries `(N, S, K)`, keys `(N, S_kv, K)`,
//! and values `(N, S_kv, V)` produce an output `(N, S, V)`.
//!
//! Two interchangeable strategies implement the [`Sdpa`] trait: a fused
//! single-pass kernel that never materialises the weight matrix, and a naive
//! reference path built from candle primitives. The strategy is chosen once at
//! configuration time from the probed [`backend::BackendCapability`]; the
//! fused strategy transparently falls back to the naive path whenever the
//! caller requests attention weights or the execution device is unsupported.

pub mod backend;
pub mod core;
pub mod mask;
pub mod naive;

#[cfg(feature = "fused")]
pub mod fused;

pub use crate::core::{AttentionError, Sdpa};
pub use mask::AttentionMask;
pub use naive::NaiveSdpa;

#[cfg(feature = "fused")]
pub use fused::FusedSdpa;

/// Returns the default scaled dot-product attention module.
///
/// The backend capability is probed once here; the fused strategy is
/// preferred whenever the probed kernel version meets the supported minimum,
/// otherwise the naive reference path is used. The choice is fixed for the
/// lifetime of the returned module.
pub fn get_default_sdpa(attn_dropout_p: f32) -> Box<dyn Sdpa> {
    #[cfg(feature = "fused")]
    {
        let capability = backend::BackendCapability::detect();
        if capability.supports_fused() {
            match fused::FusedSdpa::with_capability(capability, attn_dropout_p) {
                Ok(sdpa) => return Box::new(sdpa),
                Err(err) => log::warn!("fused sdpa unavailable, using the naive path: {err}"),
            }
        }
    }

    Box::new(NaiveSdpa::new(attn_dropout_p))
}
