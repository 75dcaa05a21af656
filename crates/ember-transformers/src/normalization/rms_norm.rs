//! Root Mean Square Layer Normalization (RMSNorm)
//!
//! The variance is always accumulated in f32; only the normalized output is
//! rounded back to the working dtype.

use anyhow::{anyhow, Result};
use ndarray::{Array, Array1, ArrayBase, Axis, Data, Dimension};

use crate::tensor::{ComputeOp, PrecisionPolicy};

/// How the learned scale is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NormStyle {
    /// `y = x̂ * w`
    Standard,
    /// `y = x̂ * (w + 1)`, the Gemma convention.
    UnitOffset,
}

impl NormStyle {
    /// Weight value that makes the norm a pure normalization.
    pub fn identity_weight(&self) -> f32 {
        match self {
            NormStyle::Standard => 1.0,
            NormStyle::UnitOffset => 0.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RMSNorm {
    pub weight: Array1<f32>,
    pub eps: f32,
    pub style: NormStyle,
    policy: PrecisionPolicy,
    /// `weight` or `weight + 1`, precomputed.
    scale: Array1<f32>,
}

impl RMSNorm {
    pub fn new(weight: Array1<f32>, eps: f32, style: NormStyle, policy: PrecisionPolicy) -> Self {
        let scale = match style {
            NormStyle::Standard => weight.clone(),
            NormStyle::UnitOffset => weight.mapv(|w| w + 1.0),
        };
        Self { weight, eps, style, policy, scale }
    }

    pub fn dim(&self) -> usize {
        self.weight.len()
    }

    #[inline]
    fn apply_row(&self, row: &mut [f32]) {
        let sum_sq: f32 = row.iter().map(|v| v * v).sum();
        let mean = sum_sq / row.len() as f32;
        let scale = 1.0 / (mean + self.eps).sqrt();

        for (x, w) in row.iter_mut().zip(self.scale.iter()) {
            *x = *x * scale * *w;
        }
    }

    /// Normalizes over the last axis of `hidden`, which must equal the weight length.
    pub fn forward<S, D>(&self, hidden: &ArrayBase<S, D>) -> Result<Array<f32, D>>
    where
        S: Data<Elem = f32>,
        D: Dimension,
    {
        let last = hidden.ndim().checked_sub(1).ok_or_else(|| anyhow!("RMSNorm on a 0-d array"))?;
        if hidden.len_of(Axis(last)) != self.dim() {
            return Err(anyhow!(
                "RMSNorm over {} features applied to last axis of {:?}",
                self.dim(),
                hidden.shape()
            ));
        }
        let mut out = hidden.as_standard_layout().into_owned();
        for mut row in out.lanes_mut(Axis(last)) {
            match row.as_slice_mut() {
                Some(slice) => self.apply_row(slice),
                None => {
                    let mut buf = row.to_vec();
                    self.apply_row(&mut buf);
                    row.iter_mut().zip(buf).for_each(|(dst, v)| *dst = v);
                }
            }
        }
        self.policy.cast(ComputeOp::NormOutput, &mut out);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::DType;
    use approx::assert_abs_diff_eq;
    use ndarray::{arr1, Array2, Array3, Array4};

    fn make_test_input_3d(batch: usize, seq: usize, hidden: usize) -> Array3<f32> {
        Array3::from_shape_fn((batch, seq, hidden), |(b, s, h)| {
            ((b * 1000 + s * hidden + h) as f32) * 0.005 - 2.0
        })
    }

    fn reference(row: &[f32], weight: &[f32], eps: f32) -> Vec<f32> {
        let mean = row.iter().map(|v| v * v).sum::<f32>() / row.len() as f32;
        let inv = 1.0 / (mean + eps).sqrt();
        row.iter().zip(weight).map(|(x, w)| x * inv * w).collect()
    }

    #[test]
    fn test_rms_norm_matches_reference() {
        let hidden = 7;
        let weight = Array1::from_shape_fn(hidden, |i| 1.0 + i as f32 * 0.1);
        let norm = RMSNorm::new(weight.clone(), 1e-6, NormStyle::Standard, PrecisionPolicy::default());
        let input = make_test_input_3d(2, 3, hidden);
        let out = norm.forward(&input).unwrap();
        assert_eq!(out.dim(), input.dim());

        let w = weight.to_vec();
        for (in_row, out_row) in input.lanes(Axis(2)).into_iter().zip(out.lanes(Axis(2))) {
            let expected = reference(&in_row.to_vec(), &w, 1e-6);
            for (a, b) in out_row.iter().zip(expected) {
                assert_abs_diff_eq!(*a, b, epsilon = 1e-5);
            }
        }
    }

    #[test]
    fn test_unit_offset_adds_one() {
        let input = Array2::from_shape_vec((1, 2), vec![3.0f32, 4.0]).unwrap();
        let zero = arr1(&[0.0f32, 0.0]);
        let offset = RMSNorm::new(zero, 0.0, NormStyle::UnitOffset, PrecisionPolicy::default());
        let out = offset.forward(&input).unwrap();
        // rms = sqrt((9 + 16) / 2)
        let rms = (12.5f32).sqrt();
        assert_abs_diff_eq!(out[[0, 0]], 3.0 / rms, epsilon = 1e-6);
        assert_abs_diff_eq!(out[[0, 1]], 4.0 / rms, epsilon = 1e-6);
    }

    #[test]
    fn test_large_values_do_not_overflow_in_half_precision() {
        let policy = PrecisionPolicy::new(DType::F16);
        let norm = RMSNorm::new(Array1::ones(4), 1e-6, NormStyle::Standard, policy);
        // x² = 9e8 overflows f16 but not the f32 variance path
        let input = Array2::from_elem((1, 4), 30000.0f32);
        let out = norm.forward(&input).unwrap();
        assert!(out.iter().all(|v| v.is_finite()));
        assert_abs_diff_eq!(out[[0, 0]], 1.0, epsilon = 1e-3);
    }

    #[test]
    fn test_per_head_norm_on_4d() {
        let norm = RMSNorm::new(Array1::ones(4), 1e-6, NormStyle::Standard, PrecisionPolicy::default());
        let x = Array4::from_shape_fn((1, 2, 3, 4), |(_, h, s, d)| (h + s + d) as f32 + 1.0);
        let y = norm.forward(&x).unwrap();
        for lane in y.lanes(Axis(3)) {
            let ms = lane.iter().map(|v| v * v).sum::<f32>() / 4.0;
            assert_abs_diff_eq!(ms, 1.0, epsilon = 1e-4);
        }
    }

    #[test]
    fn test_shape_mismatch_errors() {
        let norm = RMSNorm::new(Array1::ones(4), 1e-6, NormStyle::Standard, PrecisionPolicy::default());
        assert!(norm.forward(&Array2::<f32>::zeros((2, 3))).is_err());
    }
}
