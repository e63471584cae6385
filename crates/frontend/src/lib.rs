//! Transformer front-end composition.
//!
//! [`TransformerFrontend`] turns raw input sequences into model-ready
//! representations: optional feature extraction, padding-mask derivation from
//! sequence lengths, `sqrt(model_dim)` scaling, optional positional
//! embedding, optional output projection, and optional dropout. Every
//! optional stage is an owned, possibly-absent component checked for
//! dimensional compatibility at construction time.

use candle_core::Tensor;
use candle_nn::{Dropout, ModuleT};
use thiserror::Error;

use embedding::{EmbeddingError, IncrementalStateBag, PositionalEmbedding};
use layers::mask::to_padding_mask;
use layers::projection::Projection;

/// Errors produced by the front-end composer.
#[derive(Debug, Error)]
pub enum FrontendError {
    /// Input does not satisfy a documented shape contract.
    #[error("{0}")]
    Shape(String),
    /// The composed modules are incompatible.
    #[error("{0}")]
    Config(String),
    /// A failure propagated from the numeric backend.
    #[error(transparent)]
    Backend(#[from] candle_core::Error),
    /// A failure propagated from the positional embedding engine.
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
}

/// Extracts features from raw input sequences.
///
/// Implementations are external and swappable; when no extractor is
/// supplied, features are assumed to be extracted before reaching the
/// front-end.
pub trait FeatureExtractor: Send + Sync {
    /// Dimensionality of the extracted features.
    fn feature_dim(&self) -> usize;

    /// Extracts features, returning the transformed sequences and their
    /// updated lengths.
    fn extract(
        &self,
        seqs: &Tensor,
        seq_lens: Option<&Tensor>,
    ) -> candle_core::Result<(Tensor, Option<Tensor>)>;
}

/// Configuration of the front-end composer.
#[derive(Debug, Clone)]
pub struct FrontendConfig {
    /// The dimensionality of the model (inputs and outputs).
    pub model_dim: usize,
    /// The dropout probability on outputs.
    pub dropout_p: f32,
}

impl FrontendConfig {
    /// Creates a configuration with the customary 0.1 output dropout.
    pub fn new(model_dim: usize) -> Self {
        Self {
            model_dim,
            dropout_p: 0.1,
        }
    }

    fn validate(&self) -> Result<(), FrontendError> {
        if self.model_dim == 0 {
            return Err(FrontendError::Config(
                "model_dim must be greater than zero".into(),
            ));
        }
        if !(0.0..1.0).contains(&self.dropout_p) {
            return Err(FrontendError::Config(format!(
                "dropout_p must be in [0, 1), got {}",
                self.dropout_p
            )));
        }
        Ok(())
    }
}

/// Produces sequences ready for a transformer encoder or decoder stack,
/// along with their padding mask.
pub struct TransformerFrontend {
    model_dim: usize,
    feat_extractor: Option<Box<dyn FeatureExtractor>>,
    scale: f64,
    pos_embed: Option<PositionalEmbedding>,
    proj: Option<Box<dyn Projection>>,
    dropout: Option<Dropout>,
    training: bool,
}

impl std::fmt::Debug for TransformerFrontend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransformerFrontend")
            .field("model_dim", &self.model_dim)
            .field("feat_extractor", &self.feat_extractor.as_ref().map(|_| ".."))
            .field("scale", &self.scale)
            .field("pos_embed", &self.pos_embed.as_ref().map(|_| ".."))
            .field("proj", &self.proj.as_ref().map(|_| ".."))
            .field("dropout", &self.dropout.as_ref().map(|_| ".."))
            .field("training", &self.training)
            .finish()
    }
}

impl TransformerFrontend {
    /// Composes a front-end from its optional stages.
    ///
    /// Fails when the feature extractor, positional embedding, or projection
    /// dimensionality does not match `model_dim`.
    pub fn new(
        config: FrontendConfig,
        feat_extractor: Option<Box<dyn FeatureExtractor>>,
        pos_embed: Option<PositionalEmbedding>,
        proj: Option<Box<dyn Projection>>,
    ) -> Result<Self, FrontendError> {
        config.validate()?;
        let model_dim = config.model_dim;

        if let Some(extractor) = &feat_extractor {
            if extractor.feature_dim() != model_dim {
                return Err(FrontendError::Config(format!(
                    "feature_dim of the extractor and model_dim must be equal, but are {} and {model_dim} instead",
                    extractor.feature_dim()
                )));
            }
        }

        if let Some(pos_embed) = &pos_embed {
            if pos_embed.embed_dim() != model_dim {
                return Err(FrontendError::Config(format!(
                    "embed_dim of the positional embedding and model_dim must be equal, but are {} and {model_dim} instead",
                    pos_embed.embed_dim()
                )));
            }
        }

        if let Some(proj) = &proj {
            if proj.input_dim() != model_dim || proj.output_dim() != model_dim {
                return Err(FrontendError::Config(format!(
                    "projection must map {model_dim} to {model_dim}, but maps {} to {} instead",
                    proj.input_dim(),
                    proj.output_dim()
                )));
            }
        }

        let dropout = if config.dropout_p > 0.0 {
            Some(Dropout::new(config.dropout_p))
        } else {
            None
        };

        Ok(Self {
            model_dim,
            feat_extractor,
            scale: (model_dim as f64).sqrt(),
            pos_embed,
            proj,
            dropout,
            training: true,
        })
    }

    /// The dimensionality of the produced sequences.
    pub fn model_dim(&self) -> usize {
        self.model_dim
    }

    /// Whether the front-end is in training mode.
    pub fn is_training(&self) -> bool {
        self.training
    }

    /// Switches between training and evaluation mode, cascading to the owned
    /// positional embedding.
    pub fn set_training(&mut self, training: bool) {
        self.training = training;
        if let Some(pos_embed) = &mut self.pos_embed {
            pos_embed.set_training(training);
        }
    }

    /// Runs the front-end pipeline.
    ///
    /// Returns the processed sequences together with the float padding mask
    /// derived from `seq_lens` (or `None` when no lengths were supplied).
    pub fn forward(
        &self,
        seqs: &Tensor,
        seq_lens: Option<&Tensor>,
        state_bag: Option<&IncrementalStateBag>,
    ) -> Result<(Tensor, Option<Tensor>), FrontendError> {
        let (mut seqs, seq_lens) = match &self.feat_extractor {
            Some(extractor) => extractor.extract(seqs, seq_lens)?,
            None => (seqs.clone(), seq_lens.cloned()),
        };

        let padding_mask = to_padding_mask(&seqs, seq_lens.as_ref())?;

        seqs = seqs.affine(self.scale, 0.0)?;

        if let Some(pos_embed) = &self.pos_embed {
            seqs = pos_embed.produce(&seqs, padding_mask.as_ref(), state_bag)?;
        }

        if let Some(proj) = &self.proj {
            seqs = proj.project(&seqs)?;
        }

        if let Some(dropout) = &self.dropout {
            seqs = dropout.forward_t(&seqs, self.training)?;
        }

        Ok((seqs, padding_mask))
    }
}
