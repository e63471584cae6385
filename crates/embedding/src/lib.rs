//! Positional embedding engine for the sequence-model toolkit.
//!
//! The [`positional`] module produces position-dependent vectors added to or
//! fused into `(batch, seq_len, embed_dim)` sequence tensors, with support for
//! continuing from an incremental-decoding offset tracked by
//! [`incremental::IncrementalStateBag`].

pub mod incremental;
pub mod positional;

pub use incremental::IncrementalStateBag;
pub use positional::{
    EmbeddingError, LearnedPositionalEmbedding, PositionalConfig, PositionalEmbedding,
    RotaryEmbedding, SinusoidalPositionalEmbedding,
};
