use anyhow::{Context, Result};
use ndarray::{Array3, Array4};

use crate::attention::SelfAttention;
use crate::feedforward::SwiGluFeedForward;
use crate::normalization::RMSNorm;
use crate::short_conv::ShortConv;
use crate::tensor::{ComputeOp, PrecisionPolicy};

/// The sequence-mixing sublayer of a decoder layer.
pub enum TokenMixer {
    Attention(SelfAttention),
    ShortConv(ShortConv),
}

impl TokenMixer {
    fn forward(&self, x: &Array3<f32>, mask_bias: &Array4<f32>) -> Result<Array3<f32>> {
        match self {
            TokenMixer::Attention(attn) => attn.forward(x, mask_bias),
            TokenMixer::ShortConv(conv) => conv.forward(x),
        }
    }
}

/// Pre-norm residual block:
/// `h = x + mixer(norm1(x))`, `out = h + mlp(norm2(h))`.
///
/// With sandwich norms the sublayer outputs are normed before each add:
/// `h = x + post1(mixer(norm1(x)))`, `out = h + post2(mlp(norm2(h)))`.
pub struct TransformerLayer {
    pub attn_norm: RMSNorm,
    pub mixer: TokenMixer,
    pub post_attn_norm: Option<RMSNorm>,
    pub ffn_norm: RMSNorm,
    pub feedforward: SwiGluFeedForward,
    pub post_ffn_norm: Option<RMSNorm>,
    policy: PrecisionPolicy,
}

impl TransformerLayer {
    pub fn new(
        attn_norm: RMSNorm,
        mixer: TokenMixer,
        ffn_norm: RMSNorm,
        feedforward: SwiGluFeedForward,
        policy: PrecisionPolicy,
    ) -> Self {
        Self {
            attn_norm,
            mixer,
            post_attn_norm: None,
            ffn_norm,
            feedforward,
            post_ffn_norm: None,
            policy,
        }
    }

    pub fn with_sandwich_norms(mut self, post_attn_norm: Option<RMSNorm>, post_ffn_norm: Option<RMSNorm>) -> Self {
        self.post_attn_norm = post_attn_norm;
        self.post_ffn_norm = post_ffn_norm;
        self
    }

    pub fn forward(&self, hidden: &Array3<f32>, mask_bias: &Array4<f32>) -> Result<Array3<f32>> {
        let normed = self.attn_norm.forward(hidden).context("attention norm")?;
        let mut mixed = self.mixer.forward(&normed, mask_bias)?;
        if let Some(norm) = &self.post_attn_norm {
            mixed = norm.forward(&mixed).context("post-attention norm")?;
        }
        let mut residual = hidden + &mixed;
        self.policy.cast(ComputeOp::Residual, &mut residual);

        let normed = self.ffn_norm.forward(&residual).context("feed-forward norm")?;
        let mut ffn_out = self.feedforward.forward(&normed).context("feed-forward")?;
        if let Some(norm) = &self.post_ffn_norm {
            ffn_out = norm.forward(&ffn_out).context("post-feed-forward norm")?;
        }
        let mut out = residual + &ffn_out;
        self.policy.cast(ComputeOp::Residual, &mut out);
        Ok(out)
    }
}
