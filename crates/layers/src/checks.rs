//! Lightweight validation helpers shared across the workspace.
//!
//! These routines provide concise shape and dtype assertions that can be wired
//! into constructors or forward paths. They return `candle_core::Result<()>`
//! so call sites can propagate errors without panicking.

use candle_core::{DType, Error, Result, Tensor};

/// Ensures a tensor has the expected rank.
pub fn expect_rank(context: &str, tensor: &Tensor, rank: usize) -> Result<()> {
    if tensor.rank() == rank {
        Ok(())
    } else {
        Err(Error::Msg(format!(
            "{context}: expected rank {rank}, got {:?}",
            tensor.dims()
        )))
    }
}

/// Ensures a tensor matches the expected dimensions exactly.
pub fn expect_shape(context: &str, tensor: &Tensor, expected: &[usize]) -> Result<()> {
    if tensor.dims() == expected {
        Ok(())
    } else {
        Err(Error::Msg(format!(
            "{context}: expected shape {:?}, got {:?}",
            expected,
            tensor.dims()
        )))
    }
}

/// Validates the `(batch, seq, hidden)` convention with a known hidden size.
pub fn expect_batch_seq_hidden(context: &str, tensor: &Tensor, hidden: usize) -> Result<()> {
    match tensor.dims() {
        [_, _, actual] if *actual == hidden => Ok(()),
        dims => Err(Error::Msg(format!(
            "{context}: expected (batch, seq, {hidden}) layout, got {dims:?}"
        ))),
    }
}

/// Checks the tensor dtype is one of the allowed values.
pub fn expect_dtype_in(context: &str, tensor: &Tensor, allowed: &[DType]) -> Result<()> {
    let dtype = tensor.dtype();
    if allowed.iter().any(|candidate| *candidate == dtype) {
        Ok(())
    } else {
        Err(Error::Msg(format!(
            "{context}: expected dtype in {allowed:?}, got {dtype:?}"
        )))
    }
}

/// Checks two tensors share a dtype.
pub fn expect_same_dtype(
    left_context: &str,
    left: &Tensor,
    right_context: &str,
    right: &Tensor,
) -> Result<()> {
    if left.dtype() == right.dtype() {
        Ok(())
    } else {
        Err(Error::Msg(format!(
            "{left_context} has dtype {:?} but {right_context} has dtype {:?}",
            left.dtype(),
            right.dtype()
        )))
    }
}

/// Ensures a tensor is contiguous in memory.
pub fn expect_contiguous(context: &str, tensor: &Tensor) -> Result<()> {
    if tensor.is_contiguous() {
        Ok(())
    } else {
        Err(Error::Msg(format!("{context}: tensor must be contiguous")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn rank_and_shape_checks() {
        let device = Device::Cpu;
        let tensor = Tensor::zeros((2, 3, 4), DType::F32, &device).unwrap();
        assert!(expect_rank("t", &tensor, 3).is_ok());
        assert!(expect_rank("t", &tensor, 2).is_err());
        assert!(expect_shape("t", &tensor, &[2, 3, 4]).is_ok());
        assert!(expect_shape("t", &tensor, &[2, 4, 3]).is_err());
        assert!(expect_batch_seq_hidden("t", &tensor, 4).is_ok());
        assert!(expect_batch_seq_hidden("t", &tensor, 5).is_err());
    }

    #[test]
    fn dtype_checks() {
        let device = Device::Cpu;
        let tensor = Tensor::zeros((2, 2), DType::F32, &device).unwrap();
        assert!(expect_dtype_in("t", &tensor, &[DType::F32, DType::F16]).is_ok());
        assert!(expect_dtype_in("t", &tensor, &[DType::F16]).is_err());
        let other = Tensor::zeros((2, 2), DType::F16, &device).unwrap();
        assert!(expect_same_dtype("a", &tensor, "b", &other).is_err());
    }
}
