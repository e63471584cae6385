//! Precision policy used by projection layers.
//!
//! Parameters may reside in `f16`/`bf16` for memory efficiency while matmuls
//! promote tensors to `f32`. [`PrecisionPolicy`] keeps the storage/compute
//! pairing in one place so layers cast consistently before and after the
//! heavy operations.

use candle_core::{DType, Result, Tensor};

/// Describes how tensors are cast during a layer's forward pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrecisionPolicy {
    storage: DType,
    compute: DType,
}

impl PrecisionPolicy {
    /// Constructs a policy from explicit dtype selections.
    pub fn new(storage: DType, compute: DType) -> Self {
        Self { storage, compute }
    }

    /// Builds a policy from the parameter storage dtype, promoting
    /// half-precision storage to `f32` compute.
    pub fn from_parameter_dtype(storage: DType) -> Self {
        let compute = match storage {
            DType::F16 | DType::BF16 => DType::F32,
            other => other,
        };
        Self::new(storage, compute)
    }

    /// Dtype used to store parameters and outputs.
    pub fn storage(&self) -> DType {
        self.storage
    }

    /// Dtype used for matmuls.
    pub fn compute(&self) -> DType {
        self.compute
    }

    /// Indicates whether the policy performs mixed precision work.
    pub fn is_mixed_precision(&self) -> bool {
        self.storage != self.compute
    }

    /// Casts a tensor to the compute dtype for matmul readiness.
    pub fn cast_for_matmul(&self, tensor: &Tensor) -> Result<Tensor> {
        cast_tensor(tensor, self.compute)
    }

    /// Casts a tensor back to the storage dtype (or leaves it unchanged).
    pub fn cast_to_storage(&self, tensor: &Tensor) -> Result<Tensor> {
        cast_tensor(tensor, self.storage)
    }
}

fn cast_tensor(tensor: &Tensor, dtype: DType) -> Result<Tensor> {
    if tensor.dtype() == dtype {
        Ok(tensor.clone())
    } else {
        tensor.to_dtype(dtype)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn policy_promotes_reduced_precision_parameters() {
        let policy = PrecisionPolicy::from_parameter_dtype(DType::F16);
        assert_eq!(policy.storage(), DType::F16);
        assert_eq!(policy.compute(), DType::F32);
        assert!(policy.is_mixed_precision());
    }

    #[test]
    fn full_precision_policy_is_identity() -> Result<()> {
        let device = Device::Cpu;
        let policy = PrecisionPolicy::from_parameter_dtype(DType::F32);
        assert!(!policy.is_mixed_precision());
        let tensor = Tensor::from_vec(vec![1f32, 2.0], (2,), &device)?;
        let promoted = policy.cast_for_matmul(&tensor)?;
        assert_eq!(promoted.dtype(), DType::F32);
        Ok(())
    }
}
