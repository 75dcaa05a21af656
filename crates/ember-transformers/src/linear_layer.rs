//! Dense linear layer (`y = xWᵀ + b`).
//!
//! Weights are kept in the checkpoint's `[out_features, in_features]` layout.

use anyhow::{anyhow, Result};
use ndarray::{Array1, Array2, Array3, Axis};

#[derive(Debug, Clone)]
pub struct LinearLayer {
    pub weight: Array2<f32>,
    pub bias: Option<Array1<f32>>,
}

impl LinearLayer {
    pub fn new(weight: Array2<f32>, bias: Option<Array1<f32>>) -> Self {
        Self { weight, bias }
    }

    pub fn out_features(&self) -> usize {
        self.weight.nrows()
    }

    pub fn in_features(&self) -> usize {
        self.weight.ncols()
    }

    /// `[rows, in] -> [rows, out]`
    pub fn matmul(&self, input: &Array2<f32>) -> Result<Array2<f32>> {
        if input.ncols() != self.in_features() {
            return Err(anyhow!(
                "linear layer expects {} input features, got {}",
                self.in_features(),
                input.ncols()
            ));
        }
        let mut out = input.dot(&self.weight.t());
        if let Some(bias) = &self.bias {
            out += bias;
        }
        Ok(out)
    }

    /// `[batch, seq, in] -> [batch, seq, out]`
    pub fn forward_3d(&self, input: &Array3<f32>) -> Result<Array3<f32>> {
        let (batch, seq, hidden) = input.dim();
        let flat = input
            .to_shape((batch * seq, hidden))
            .map_err(|e| anyhow!("cannot flatten linear input: {}", e))?
            .to_owned();
        let out = self.matmul(&flat)?;
        let out_features = out.ncols();
        out.into_shape_with_order((batch, seq, out_features))
            .map_err(|e| anyhow!("cannot restore linear output shape: {}", e))
    }
}

/// Splits `[b, s, n*d]` along the last axis into `n` equal chunks.
pub fn split_last_axis(x: &Array3<f32>, parts: usize) -> Result<Vec<Array3<f32>>> {
    let width = x.len_of(Axis(2));
    if parts == 0 || width % parts != 0 {
        return Err(anyhow!("cannot split width {} into {} parts", width, parts));
    }
    let chunk = width / parts;
    Ok((0..parts)
        .map(|i| x.slice(ndarray::s![.., .., i * chunk..(i + 1) * chunk]).to_owned())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{arr1, arr2, Array3};

    #[test]
    fn test_matmul_uses_out_in_layout() {
        // 2 outputs, 3 inputs
        let layer = LinearLayer::new(arr2(&[[1.0, 0.0, 0.0], [0.0, 1.0, 1.0]]), Some(arr1(&[0.5, -1.0])));
        let y = layer.matmul(&arr2(&[[1.0, 2.0, 3.0]])).unwrap();
        assert_abs_diff_eq!(y[[0, 0]], 1.5);
        assert_abs_diff_eq!(y[[0, 1]], 4.0);
    }

    #[test]
    fn test_forward_3d_shape() {
        let layer = LinearLayer::new(Array2::ones((5, 4)), None);
        let x = Array3::ones((2, 3, 4));
        let y = layer.forward_3d(&x).unwrap();
        assert_eq!(y.dim(), (2, 3, 5));
        assert_abs_diff_eq!(y[[1, 2, 4]], 4.0);
    }

    #[test]
    fn test_wrong_input_width_errors() {
        let layer = LinearLayer::new(Array2::ones((5, 4)), None);
        assert!(layer.forward_3d(&Array3::ones((1, 1, 3))).is_err());
    }

    #[test]
    fn test_split_last_axis() {
        let x = Array3::from_shape_fn((1, 2, 6), |(_, s, h)| (s * 10 + h) as f32);
        let parts = split_last_axis(&x, 3).unwrap();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[1][[0, 1, 0]], 12.0);
        assert!(split_last_axis(&x, 4).is_err());
    }
}
