//! Shared building blocks for the sequence-model crates.
//!
//! The crate hosts the validation helpers, the mixed-precision policy, the
//! dense [`projection`] layer behind the [`Projection`](projection::Projection)
//! seam, and the padding-mask utilities consumed by the front-end and the
//! positional-embedding engine.

pub mod checks;
pub mod dtypes;
pub mod mask;
pub mod projection;

pub use dtypes::PrecisionPolicy;
pub use mask::{apply_padding_mask, to_padding_mask};
pub use projection::{Linear, LinearConfig, LinearInit, Projection};
