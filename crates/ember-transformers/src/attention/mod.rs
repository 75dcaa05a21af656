//! Causal self-attention with grouped-query heads.
//!
//! Projections, per-head norms and RoPE run in the working dtype. The score
//! matmul, softcap, mask and softmax run in f32; probabilities are rounded
//! back to the working dtype before the context matmul.

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use ndarray::{s, Array3, Array4};

use crate::activations::{softcap_inplace, softmax_last_axis};
use crate::linear_layer::LinearLayer;
use crate::normalization::RMSNorm;
use crate::rope::RoPE;
use crate::tensor::{ComputeOp, PrecisionPolicy};
use crate::utils::matmul_4d;

/// Key/value head read by query head `q` when `groups` query heads share one kv head.
#[inline]
pub fn kv_head_for_query_head(q: usize, groups: usize) -> usize {
    q / groups.max(1)
}

/// Expands `[b, kv_heads, s, d]` to `[b, kv_heads * groups, s, d]` by
/// repeat-interleave: query heads `[i*groups, (i+1)*groups)` all copy kv head `i`.
pub fn repeat_kv(kv: &Array4<f32>, groups: usize) -> Array4<f32> {
    if groups <= 1 {
        return kv.to_owned();
    }
    let (batch, kv_heads, seq, dim) = kv.dim();
    let mut out = Array4::zeros((batch, kv_heads * groups, seq, dim));
    for i in 0..kv_heads {
        for g in 0..groups {
            out.slice_mut(s![.., i * groups + g, .., ..])
                .assign(&kv.slice(s![.., i, .., ..]));
        }
    }
    out
}

/// `[b, s, heads*d] -> [b, heads, s, d]`
pub fn split_heads(x: &Array3<f32>, heads: usize, head_dim: usize) -> Result<Array4<f32>> {
    let (batch, seq, width) = x.dim();
    if width != heads * head_dim {
        return Err(anyhow!(
            "cannot split width {} into {} heads of {}",
            width,
            heads,
            head_dim
        ));
    }
    let reshaped = x
        .to_shape((batch, seq, heads, head_dim))
        .map_err(|e| anyhow!("failed to split heads: {}", e))?;
    Ok(reshaped.permuted_axes([0, 2, 1, 3]).as_standard_layout().into_owned())
}

/// `[b, heads, s, d] -> [b, s, heads*d]`
pub fn merge_heads(x: &Array4<f32>) -> Result<Array3<f32>> {
    let (batch, heads, seq, dim) = x.dim();
    x.view()
        .permuted_axes([0, 2, 1, 3])
        .as_standard_layout()
        .into_owned()
        .into_shape_with_order((batch, seq, heads * dim))
        .map_err(|e| anyhow!("failed to merge heads: {}", e))
}

pub struct SelfAttention {
    pub q_proj: LinearLayer,
    pub k_proj: LinearLayer,
    pub v_proj: LinearLayer,
    pub o_proj: LinearLayer,
    /// Per-head norms applied to Q and K before RoPE.
    pub q_norm: Option<RMSNorm>,
    pub k_norm: Option<RMSNorm>,
    pub num_heads: usize,
    pub num_kv_heads: usize,
    pub head_dim: usize,
    /// 0 disables.
    pub logit_softcap: f32,
    rope: Arc<RoPE>,
    policy: PrecisionPolicy,
}

impl SelfAttention {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        q_proj: LinearLayer,
        k_proj: LinearLayer,
        v_proj: LinearLayer,
        o_proj: LinearLayer,
        qk_norm: Option<(RMSNorm, RMSNorm)>,
        num_heads: usize,
        num_kv_heads: usize,
        head_dim: usize,
        logit_softcap: f32,
        rope: Arc<RoPE>,
        policy: PrecisionPolicy,
    ) -> Self {
        let (q_norm, k_norm) = match qk_norm {
            Some((q, k)) => (Some(q), Some(k)),
            None => (None, None),
        };
        Self {
            q_proj,
            k_proj,
            v_proj,
            o_proj,
            q_norm,
            k_norm,
            num_heads,
            num_kv_heads,
            head_dim,
            logit_softcap,
            rope,
            policy,
        }
    }

    pub fn groups(&self) -> usize {
        self.num_heads / self.num_kv_heads
    }

    /// Scaled and softcapped scores `[b, h, s_q, s_k]`, before masking.
    pub fn capped_scores(&self, q: &Array4<f32>, k: &Array4<f32>) -> Result<Array4<f32>> {
        let k_t = k.view().permuted_axes([0, 1, 3, 2]).as_standard_layout().into_owned();
        let mut scores = matmul_4d(q, &k_t).context("attention score matmul")?;
        let scale = 1.0 / (self.head_dim as f32).sqrt();
        scores.mapv_inplace(|v| v * scale);
        self.policy.cast(ComputeOp::AttentionScores, &mut scores);
        softcap_inplace(&mut scores, self.logit_softcap);
        self.policy.cast(ComputeOp::Softcap, &mut scores);
        Ok(scores)
    }

    /// `x: [b, s, hidden]`, `mask_bias: [1, 1, s, s]` additive.
    pub fn forward(&self, x: &Array3<f32>, mask_bias: &Array4<f32>) -> Result<Array3<f32>> {
        let seq = x.dim().1;

        let mut q = self.q_proj.forward_3d(x).context("q_proj")?;
        let mut k = self.k_proj.forward_3d(x).context("k_proj")?;
        let mut v = self.v_proj.forward_3d(x).context("v_proj")?;
        self.policy.cast(ComputeOp::Projection, &mut q);
        self.policy.cast(ComputeOp::Projection, &mut k);
        self.policy.cast(ComputeOp::Projection, &mut v);

        let mut q = split_heads(&q, self.num_heads, self.head_dim)?;
        let mut k = split_heads(&k, self.num_kv_heads, self.head_dim)?;
        let v = split_heads(&v, self.num_kv_heads, self.head_dim)?;

        if let Some(norm) = &self.q_norm {
            q = norm.forward(&q).context("q_norm")?;
        }
        if let Some(norm) = &self.k_norm {
            k = norm.forward(&k).context("k_norm")?;
        }

        let (q, k) = self.rope.apply_4d(&q, &k, 0)?;

        let groups = self.groups();
        let k = repeat_kv(&k, groups);
        let v = repeat_kv(&v, groups);

        let mut scores = self.capped_scores(&q, &k)?;

        let mask = mask_bias
            .broadcast(scores.dim())
            .ok_or_else(|| anyhow!("mask {:?} does not broadcast to sequence {}", mask_bias.shape(), seq))?;
        scores += &mask;

        softmax_last_axis(&mut scores);
        self.policy.cast(ComputeOp::AttentionSoftmax, &mut scores);
        self.policy.to_working(&mut scores);

        let mut context = matmul_4d(&scores, &v).context("attention context matmul")?;
        self.policy.cast(ComputeOp::AttentionContext, &mut context);

        let merged = merge_heads(&context)?;
        let mut out = self.o_proj.forward_3d(&merged).context("o_proj")?;
        self.policy.cast(ComputeOp::Projection, &mut out);
        Ok(out)
    }
}

#[cfg(test)]
mod tests;
