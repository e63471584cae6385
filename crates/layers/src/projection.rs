//! Dense projections applied to sequence tensors.
//!
//! Projections expect inputs shaped `(batch, seq, in_dim)` and return tensors
//! with `(batch, seq, out_dim)`. Weights and activations are cast to
//! [`PrecisionPolicy::compute`](crate::dtypes::PrecisionPolicy) for matmuls and
//! back to the storage dtype for outputs. Initialisation policies mirror
//! common transformer recipes so downstream crates share one implementation.

use candle_core::{DType, Device, Error, Result, Tensor};

use crate::{checks, dtypes::PrecisionPolicy};

/// A projection that maps sequences to sequences.
///
/// Implementations are swappable at the front-end boundary; the dimension
/// accessors let composers validate compatibility at construction time.
pub trait Projection: Send + Sync {
    /// Incoming feature dimension.
    fn input_dim(&self) -> usize;

    /// Outgoing feature dimension.
    fn output_dim(&self) -> usize;

    /// Applies the projection to `(batch, seq, in_dim)` sequences.
    fn project(&self, seqs: &Tensor) -> Result<Tensor>;
}

/// Configuration shared by dense projection layers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinearConfig {
    /// Incoming feature dimension.
    pub input_dim: usize,
    /// Outgoing feature dimension.
    pub output_dim: usize,
    /// Whether a learnable bias vector should be applied.
    pub bias: bool,
}

impl LinearConfig {
    /// Creates a configuration with a bias term.
    pub fn new(input_dim: usize, output_dim: usize) -> Self {
        Self {
            input_dim,
            output_dim,
            bias: true,
        }
    }
}

/// Supported weight initialisation policies.
#[derive(Debug, Clone)]
pub enum LinearInit {
    /// Xavier/Glorot uniform initialisation.
    XavierUniform,
    /// Xavier/Glorot normal initialisation.
    XavierNormal,
    /// Kaiming/He uniform initialisation.
    KaimingUniform { negative_slope: f64 },
}

impl LinearInit {
    fn sample(&self, shape: (usize, usize), device: &Device, dtype: DType) -> Result<Tensor> {
        let (out_dim, in_dim) = shape;
        let (fan_in, fan_out) = (in_dim as f64, out_dim as f64);
        let weight_f32 = match self {
            LinearInit::XavierUniform => {
                let bound = (6.0f64 / (fan_in + fan_out)).sqrt();
                Tensor::rand(-bound as f32, bound as f32, shape, device)?
            }
            LinearInit::XavierNormal => {
                let std = (2.0f64 / (fan_in + fan_out)).sqrt();
                Tensor::randn(0f32, std as f32, shape, device)?
            }
            LinearInit::KaimingUniform { negative_slope } => {
                let gain = (2.0f64 / (1.0 + negative_slope.powi(2))).sqrt();
                let bound = (3.0f64).sqrt() * gain / fan_in.sqrt();
                Tensor::rand(-bound as f32, bound as f32, shape, device)?
            }
        };
        if dtype == DType::F32 {
            Ok(weight_f32)
        } else {
            weight_f32.to_dtype(dtype)
        }
    }
}

/// Dense affine projection with optional bias.
#[derive(Debug, Clone)]
pub struct Linear {
    config: LinearConfig,
    weight: Tensor,
    bias: Option<Tensor>,
    policy: PrecisionPolicy,
}

impl Linear {
    /// Constructs a linear layer from pre-existing parameters.
    pub fn new(config: LinearConfig, weight: Tensor, bias: Option<Tensor>) -> Result<Self> {
        Self::validate_weight(&config, &weight)?;
        Self::validate_bias(&config, bias.as_ref())?;
        let policy = PrecisionPolicy::from_parameter_dtype(weight.dtype());
        Ok(Self {
            config,
            weight,
            bias,
            policy,
        })
    }

    /// Builds a linear layer with randomly initialised weights following `init`.
    pub fn with_init(
        config: LinearConfig,
        init: &LinearInit,
        device: &Device,
        dtype: DType,
    ) -> Result<Self> {
        let weight = init.sample((config.output_dim, config.input_dim), device, dtype)?;
        let bias = if config.bias {
            Some(Tensor::zeros(config.output_dim, dtype, device)?)
        } else {
            None
        };
        Self::new(config, weight, bias)
    }

    /// Returns the static configuration.
    pub fn config(&self) -> &LinearConfig {
        &self.config
    }

    /// Returns a clone of the underlying weight tensor.
    pub fn weight(&self) -> Tensor {
        self.weight.clone()
    }

    /// Returns a clone of the bias tensor if present.
    pub fn bias(&self) -> Option<Tensor> {
        self.bias.clone()
    }

    fn validate_weight(config: &LinearConfig, weight: &Tensor) -> Result<()> {
        checks::expect_rank("linear.weight", weight, 2)?;
        checks::expect_shape(
            "linear.weight",
            weight,
            &[config.output_dim, config.input_dim],
        )?;
        checks::expect_dtype_in(
            "linear.weight",
            weight,
            &[DType::F16, DType::BF16, DType::F32],
        )?;
        checks::expect_contiguous("linear.weight", weight)?;
        Ok(())
    }

    fn validate_bias(config: &LinearConfig, bias: Option<&Tensor>) -> Result<()> {
        match (config.bias, bias) {
            (true, Some(tensor)) => {
                checks::expect_rank("linear.bias", tensor, 1)?;
                checks::expect_shape("linear.bias", tensor, &[config.output_dim])?;
                Ok(())
            }
            (false, Some(_)) => Err(Error::Msg("bias provided but config disables bias".into())),
            (true, None) => Err(Error::Msg("config expects bias but none supplied".into())),
            (false, None) => Ok(()),
        }
    }
}

impl Projection for Linear {
    fn input_dim(&self) -> usize {
        self.config.input_dim
    }

    fn output_dim(&self) -> usize {
        self.config.output_dim
    }

    fn project(&self, seqs: &Tensor) -> Result<Tensor> {
        checks::expect_batch_seq_hidden("linear.input", seqs, self.config.input_dim)?;
        let (batch, seq, _) = seqs.dims3()?;

        let input = self.policy.cast_for_matmul(seqs)?;
        let weight = self.policy.cast_for_matmul(&self.weight)?;
        let weight_t = weight.t()?;

        let flat = input.reshape((batch * seq, self.config.input_dim))?;
        let mut output = flat
            .matmul(&weight_t)?
            .reshape((batch, seq, self.config.output_dim))?;

        if let Some(bias) = &self.bias {
            let bias = self.policy.cast_for_matmul(bias)?;
            output = output.broadcast_add(&bias)?;
        }

        self.policy.cast_to_storage(&output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};

    fn reference_linear(input: &Tensor, weight: &Tensor, bias: Option<&Tensor>) -> Result<Tensor> {
        let (batch, seq, hidden) = input.dims3()?;
        let flat = input.reshape((batch * seq, hidden))?;
        let mut out = flat
            .matmul(&weight.t()?)?
            .reshape((batch, seq, weight.dims()[0]))?;
        if let Some(bias) = bias {
            out = out.broadcast_add(bias)?;
        }
        Ok(out)
    }

    #[test]
    fn forward_matches_reference_across_dtypes() -> Result<()> {
        let device = Device::Cpu;
        let config = LinearConfig::new(8, 4);
        let weight = Tensor::randn(0f32, 0.05, (4, 8), &device)?;
        let bias = Tensor::randn(0f32, 0.02, 4, &device)?;

        for &dtype in &[DType::F32, DType::F16, DType::BF16] {
            let linear = Linear::new(
                config.clone(),
                weight.to_dtype(dtype)?,
                Some(bias.to_dtype(dtype)?),
            )?;
            let input = Tensor::randn(0f32, 1.0, (2, 5, 8), &device)?.to_dtype(dtype)?;
            let output = linear.project(&input)?;

            assert_eq!(output.dims(), &[2, 5, 4]);
            assert_eq!(output.dtype(), dtype);

            let reference = reference_linear(&input.to_dtype(DType::F32)?, &weight, Some(&bias))?;
            let diff = output
                .to_dtype(DType::F32)?
                .sub(&reference)?
                .abs()?
                .max_all()?;
            let tol = match dtype {
                DType::F16 => 1e-2,
                DType::BF16 => 2e-2,
                _ => 1e-4,
            };
            let max = diff.to_vec0::<f32>()?;
            assert!(max <= tol, "max diff {max} for {dtype:?}");
        }

        Ok(())
    }

    #[test]
    fn weight_shape_is_validated() {
        let device = Device::Cpu;
        let weight = Tensor::zeros((4, 7), DType::F32, &device).unwrap();
        let err = Linear::new(LinearConfig::new(8, 4), weight, None);
        assert!(err.is_err());
    }

    #[test]
    fn input_dim_mismatch_is_rejected() {
        let device = Device::Cpu;
        let linear = Linear::with_init(
            LinearConfig::new(8, 4),
            &LinearInit::XavierUniform,
            &device,
            DType::F32,
        )
        .unwrap();
        let input = Tensor::zeros((1, 2, 6), DType::F32, &device).unwrap();
        assert!(linear.project(&input).is_err());
    }

    #[test]
    fn glorot_normal_stats_are_reasonable() -> Result<()> {
        let device = Device::Cpu;
        let config = LinearConfig::new(128, 64);
        let linear = Linear::with_init(config, &LinearInit::XavierNormal, &device, DType::F32)?;
        let values = linear.weight().flatten_all()?.to_vec1::<f32>()?;
        let mean = values.iter().copied().map(f64::from).sum::<f64>() / values.len() as f64;
        let var = values
            .iter()
            .copied()
            .map(|v| {
                let diff = f64::from(v) - mean;
                diff * diff
            })
            .sum::<f64>()
            / values.len() as f64;
        let expected = (2.0f64 / (128.0 + 64.0)).sqrt();
        assert!(mean.abs() < 5e-3);
        assert!((var.sqrt() - expected).abs() < expected * 0.25);
        Ok(())
    }
}
