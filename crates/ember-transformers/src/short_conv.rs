//! Gated short-convolution token mixer used by LFM2 conv layers.
//!
//! `B, C, x = split3(in_proj(x))`, `y = C ⊙ conv1d(B ⊙ x)`, `out_proj(y)`,
//! where `conv1d` is a causal depthwise convolution over the sequence axis.

use anyhow::{anyhow, Context, Result};
use ndarray::{Array1, Array2, Array3};

use crate::linear_layer::{split_last_axis, LinearLayer};
use crate::tensor::{ComputeOp, PrecisionPolicy};

#[derive(Debug, Clone)]
pub struct ShortConv {
    /// `[3 * hidden, hidden]`
    pub in_proj: LinearLayer,
    /// Per-channel kernels `[hidden, kernel]`.
    pub conv_weight: Array2<f32>,
    pub conv_bias: Option<Array1<f32>>,
    pub out_proj: LinearLayer,
    policy: PrecisionPolicy,
}

impl ShortConv {
    pub fn new(
        in_proj: LinearLayer,
        conv_weight: Array2<f32>,
        conv_bias: Option<Array1<f32>>,
        out_proj: LinearLayer,
        policy: PrecisionPolicy,
    ) -> Result<Self> {
        let hidden = out_proj.in_features();
        if in_proj.out_features() != 3 * hidden {
            return Err(anyhow!(
                "short conv in_proj must produce {} features, got {}",
                3 * hidden,
                in_proj.out_features()
            ));
        }
        if conv_weight.nrows() != hidden {
            return Err(anyhow!(
                "short conv kernel has {} channels, expected {}",
                conv_weight.nrows(),
                hidden
            ));
        }
        Ok(Self { in_proj, conv_weight, conv_bias, out_proj, policy })
    }

    pub fn kernel_size(&self) -> usize {
        self.conv_weight.ncols()
    }

    /// Causal depthwise conv over `[b, s, c]`: output `t` sees inputs `t-L+1..=t`,
    /// with zeros before the start of the sequence.
    pub fn causal_conv(&self, x: &Array3<f32>) -> Array3<f32> {
        let (batch, seq, channels) = x.dim();
        let kernel = self.kernel_size();
        let mut out = Array3::<f32>::zeros((batch, seq, channels));
        for b in 0..batch {
            for t in 0..seq {
                for c in 0..channels {
                    let mut acc = self.conv_bias.as_ref().map_or(0.0, |bias| bias[c]);
                    for k in 0..kernel {
                        // tap k multiplies input at t - (kernel - 1 - k)
                        let back = kernel - 1 - k;
                        if back <= t {
                            acc += self.conv_weight[[c, k]] * x[[b, t - back, c]];
                        }
                    }
                    out[[b, t, c]] = acc;
                }
            }
        }
        out
    }

    pub fn forward(&self, x: &Array3<f32>) -> Result<Array3<f32>> {
        let mut projected = self.in_proj.forward_3d(x).context("conv in_proj")?;
        self.policy.cast(ComputeOp::Projection, &mut projected);

        let mut parts = split_last_axis(&projected, 3)?.into_iter();
        let (b_gate, c_gate, x_in) = match (parts.next(), parts.next(), parts.next()) {
            (Some(b), Some(c), Some(x)) => (b, c, x),
            _ => return Err(anyhow!("short conv split produced fewer than 3 parts")),
        };

        let mut bx = b_gate * &x_in;
        self.policy.cast(ComputeOp::Activation, &mut bx);

        let mut conv = self.causal_conv(&bx);
        self.policy.cast(ComputeOp::Convolution, &mut conv);

        let mut y = c_gate * &conv;
        self.policy.cast(ComputeOp::Activation, &mut y);

        let mut out = self.out_proj.forward_3d(&y).context("conv out_proj")?;
        self.policy.cast(ComputeOp::Projection, &mut out);
        Ok(out)
    }
}
