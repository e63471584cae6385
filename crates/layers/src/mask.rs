//! Padding-mask utilities for batched variable-length sequences.
//!
//! Padding masks are additive float tensors shaped `(batch, seq_len)` with
//! `0.0` at valid positions and `f32::NEG_INFINITY` at padding, matching the
//! softmax-friendly convention used by the attention masks. The mask batch may
//! be smaller than the sequence batch as long as it divides it, in which case
//! application tiles the mask.

use candle_core::{DType, Error, Result, Tensor};

use crate::checks;

/// Builds the float padding mask of `seqs` from per-sequence valid lengths.
///
/// `seq_lens` is a rank-1 integer tensor with one entry per batch element.
/// Returns `None` when no lengths are supplied, meaning every position is
/// valid.
pub fn to_padding_mask(seqs: &Tensor, seq_lens: Option<&Tensor>) -> Result<Option<Tensor>> {
    let seq_lens = match seq_lens {
        Some(seq_lens) => seq_lens,
        None => return Ok(None),
    };

    checks::expect_rank("padding.seq_lens", seq_lens, 1)?;
    let (batch, seq_len, _) = seqs.dims3()?;
    let lens = seq_lens.to_dtype(DType::I64)?.to_vec1::<i64>()?;
    if lens.len() != batch {
        return Err(Error::Msg(format!(
            "seq_lens has {} entries but the batch size is {batch}",
            lens.len()
        )));
    }

    let mut data = vec![0f32; batch * seq_len];
    for (b, &valid) in lens.iter().enumerate() {
        if valid < 0 || valid as usize > seq_len {
            return Err(Error::Msg(format!(
                "sequence length {valid} is outside [0, {seq_len}]"
            )));
        }
        for s in valid as usize..seq_len {
            data[b * seq_len + s] = f32::NEG_INFINITY;
        }
    }

    let mask = Tensor::from_vec(data, (batch, seq_len), seqs.device())?;
    Ok(Some(mask.to_dtype(seqs.dtype())?))
}

/// Zeroes out the padded positions of `seqs`.
///
/// The mask batch must equal the sequence batch or divide it; in the latter
/// case the mask is tiled across the sequence batch before being applied.
pub fn apply_padding_mask(seqs: &Tensor, padding_mask: &Tensor) -> Result<Tensor> {
    checks::expect_rank("padding.mask", padding_mask, 2)?;
    let (batch, seq_len, _) = seqs.dims3()?;
    let (mask_batch, mask_seq_len) = padding_mask.dims2()?;
    if mask_seq_len != seq_len {
        return Err(Error::Msg(format!(
            "padding mask covers {mask_seq_len} positions but sequences have {seq_len}"
        )));
    }

    let mask = if mask_batch == batch {
        padding_mask.clone()
    } else if mask_batch != 0 && batch % mask_batch == 0 {
        Tensor::cat(&vec![padding_mask; batch / mask_batch], 0)?
    } else {
        return Err(Error::Msg(format!(
            "padding mask batch {mask_batch} does not divide the sequence batch {batch}"
        )));
    };

    let keep = mask.ge(0f64)?.to_dtype(seqs.dtype())?.unsqueeze(2)?;
    seqs.broadcast_mul(&keep)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn mask_marks_padded_positions() -> Result<()> {
        let device = Device::Cpu;
        let seqs = Tensor::ones((2, 4, 3), DType::F32, &device)?;
        let seq_lens = Tensor::from_vec(vec![4u32, 2], (2,), &device)?;
        let mask = to_padding_mask(&seqs, Some(&seq_lens))?.unwrap();
        let rows = mask.to_vec2::<f32>()?;
        assert_eq!(rows[0], vec![0.0, 0.0, 0.0, 0.0]);
        assert!(rows[1][..2].iter().all(|&v| v == 0.0));
        assert!(rows[1][2..].iter().all(|&v| v == f32::NEG_INFINITY));
        Ok(())
    }

    #[test]
    fn no_lengths_means_no_mask() -> Result<()> {
        let device = Device::Cpu;
        let seqs = Tensor::ones((1, 3, 2), DType::F32, &device)?;
        assert!(to_padding_mask(&seqs, None)?.is_none());
        Ok(())
    }

    #[test]
    fn applying_zeroes_padded_positions() -> Result<()> {
        let device = Device::Cpu;
        let seqs = Tensor::ones((1, 3, 2), DType::F32, &device)?;
        let seq_lens = Tensor::from_vec(vec![1u32], (1,), &device)?;
        let mask = to_padding_mask(&seqs, Some(&seq_lens))?.unwrap();
        let masked = apply_padding_mask(&seqs, &mask)?;
        let values = masked.to_vec3::<f32>()?;
        assert_eq!(values[0][0], vec![1.0, 1.0]);
        assert_eq!(values[0][1], vec![0.0, 0.0]);
        assert_eq!(values[0][2], vec![0.0, 0.0]);
        Ok(())
    }

    #[test]
    fn mask_batch_is_tiled_when_it_divides() -> Result<()> {
        let device = Device::Cpu;
        let seqs = Tensor::ones((4, 2, 2), DType::F32, &device)?;
        let mask = Tensor::from_vec(vec![0f32, f32::NEG_INFINITY], (1, 2), &device)?;
        let masked = apply_padding_mask(&seqs, &mask)?;
        let values = masked.to_vec3::<f32>()?;
        for batch in values {
            assert_eq!(batch[0], vec![1.0, 1.0]);
            assert_eq!(batch[1], vec![0.0, 0.0]);
        }
        Ok(())
    }

    #[test]
    fn non_dividing_mask_batch_is_rejected() {
        let device = Device::Cpu;
        let seqs = Tensor::ones((3, 2, 2), DType::F32, &device).unwrap();
        let mask = Tensor::zeros((2, 2), DType::F32, &device).unwrap();
        assert!(apply_padding_mask(&seqs, &mask).is_err());
    }
}
