//! Rotary Position Embeddings (RoPE)
//!
//! Uses the "rotate half" convention: dimension `i` is paired with
//! `i + head_dim / 2`, not with its interleaved neighbour.

use anyhow::{anyhow, Result};
use ndarray::{Array1, Array2, Array4};

use crate::tensor::{ComputeOp, PrecisionPolicy};

/// Positions covered by the precomputed cos/sin tables.
pub const DEFAULT_ROPE_CACHE: usize = 4096;

/// Rotary Position Embeddings
#[derive(Debug, Clone)]
pub struct RoPE {
    /// Cosine cache: [max_seq_len, head_dim]
    pub cos_cache: Array2<f32>,
    /// Sine cache: [max_seq_len, head_dim]
    pub sin_cache: Array2<f32>,
    pub inv_freq: Array1<f32>,
    pub head_dim: usize,
    pub theta: f32,
    policy: PrecisionPolicy,
}

impl RoPE {
    pub fn new(head_dim: usize, max_seq_len: usize, theta: f32, policy: PrecisionPolicy) -> Self {
        let inv_freq = Self::calculate_inv_freq(head_dim, theta);
        let (cos_cache, sin_cache) = Self::build_cache(max_seq_len, &inv_freq);
        Self {
            cos_cache,
            sin_cache,
            inv_freq,
            head_dim,
            theta,
            policy,
        }
    }

    /// `inv_freq[j] = theta^(-2j / head_dim)`
    pub fn calculate_inv_freq(head_dim: usize, theta: f32) -> Array1<f32> {
        Array1::from_iter((0..head_dim / 2).map(|i| {
            let exponent = (2 * i) as f32 / head_dim as f32;
            1.0 / theta.powf(exponent)
        }))
    }

    fn build_cache(max_seq_len: usize, inv_freq: &Array1<f32>) -> (Array2<f32>, Array2<f32>) {
        let half_dim = inv_freq.len();
        let head_dim = half_dim * 2;
        let mut cos_cache = Array2::<f32>::zeros((max_seq_len, head_dim));
        let mut sin_cache = Array2::<f32>::zeros((max_seq_len, head_dim));

        for pos in 0..max_seq_len {
            for i in 0..half_dim {
                let angle = pos as f32 * inv_freq[i];
                let (sin_val, cos_val) = angle.sin_cos();

                // freqs concatenated with itself
                cos_cache[[pos, i]] = cos_val;
                sin_cache[[pos, i]] = sin_val;
                cos_cache[[pos, i + half_dim]] = cos_val;
                sin_cache[[pos, i + half_dim]] = sin_val;
            }
        }
        (cos_cache, sin_cache)
    }

    pub fn max_seq_len(&self) -> usize {
        self.cos_cache.nrows()
    }

    #[inline]
    fn cos_sin(&self, pos: usize, i: usize) -> (f32, f32) {
        if pos < self.max_seq_len() {
            (self.cos_cache[[pos, i]], self.sin_cache[[pos, i]])
        } else {
            let (sin, cos) = (pos as f32 * self.inv_freq[i]).sin_cos();
            (cos, sin)
        }
    }

    /// Rotates `[batch, heads, seq, head_dim]`, treating row `s` as position
    /// `position_offset + s`.
    pub fn rotate_4d(&self, x: &Array4<f32>, position_offset: usize) -> Result<Array4<f32>> {
        let (batch, num_heads, seq_len, head_dim) = x.dim();
        if head_dim != self.head_dim {
            return Err(anyhow!(
                "RoPE built for head_dim {} applied to head_dim {}",
                self.head_dim,
                head_dim
            ));
        }
        let half_dim = head_dim / 2;
        let mut rotated = x.to_owned();

        for b in 0..batch {
            for h in 0..num_heads {
                for s in 0..seq_len {
                    let pos = position_offset + s;
                    for i in 0..half_dim {
                        let (cos, sin) = self.cos_sin(pos, i);
                        let x0 = x[[b, h, s, i]];
                        let x1 = x[[b, h, s, i + half_dim]];

                        rotated[[b, h, s, i]] = x0 * cos - x1 * sin;
                        rotated[[b, h, s, i + half_dim]] = x1 * cos + x0 * sin;
                    }
                }
            }
        }
        self.policy.cast(ComputeOp::RotaryEmbedding, &mut rotated);
        Ok(rotated)
    }

    pub fn apply_4d(
        &self,
        q: &Array4<f32>,
        k: &Array4<f32>,
        position_offset: usize,
    ) -> Result<(Array4<f32>, Array4<f32>)> {
        Ok((self.rotate_4d(q, position_offset)?, self.rotate_4d(k, position_offset)?))
    }
}
