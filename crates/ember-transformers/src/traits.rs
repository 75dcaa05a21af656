//! Shared model-facing types: device selection, weight-name layouts and the
//! causal language-model capability consumed by the generation loop.

use ndarray::Array1;

use crate::error::InferenceResult;
use crate::normalization::NormStyle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Device {
    #[default]
    Cpu,
}

impl Device {
    pub fn is_cpu(&self) -> bool {
        matches!(self, Device::Cpu)
    }
}

/// Replaces the `{}` layer placeholder in a weight-name template.
pub fn layer_name(template: &str, layer: usize) -> String {
    template.replace("{}", &layer.to_string())
}

/// Naming templates for a self-attention block.
#[derive(Debug, Clone)]
pub struct AttentionLayout {
    pub q_weight: String,
    pub q_bias: Option<String>,
    pub k_weight: String,
    pub k_bias: Option<String>,
    pub v_weight: String,
    pub v_bias: Option<String>,
    pub o_weight: String,
    /// Per-head Q/K norms, present only for architectures that declare them.
    pub q_norm: Option<String>,
    pub k_norm: Option<String>,
}

/// Naming templates for a gated feed-forward block.
#[derive(Debug, Clone)]
pub struct FeedForwardLayout {
    pub gate_weight: String,
    pub up_weight: String,
    pub down_weight: String,
}

/// Naming templates for a short-convolution token mixer.
#[derive(Debug, Clone)]
pub struct ShortConvLayout {
    pub in_proj_weight: String,
    pub conv_weight: String,
    pub conv_bias: Option<String>,
    pub out_proj_weight: String,
}

/// Naming templates for a complete decoder layer.
#[derive(Debug, Clone)]
pub struct DecoderLayerLayout {
    pub attn_norm: String,
    pub self_attn: AttentionLayout,
    pub short_conv: Option<ShortConvLayout>,
    /// Applied to the mixer output before the first residual add.
    pub post_attn_norm: Option<String>,
    pub ffn_norm: String,
    pub ffn: FeedForwardLayout,
    /// Applied to the feed-forward output before the second residual add.
    pub post_ffn_norm: Option<String>,
}

/// Every tensor name a decoder-only model binds.
#[derive(Debug, Clone)]
pub struct DecoderLayout {
    pub token_embedding: String,
    pub final_norm: String,
    /// Bound only when embeddings are untied.
    pub lm_head: String,
    pub layer: DecoderLayerLayout,
}

/// Per-family numeric switches that are not part of the manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchitectureOptions {
    /// Style of the layer and final norms.
    pub norm_style: NormStyle,
    /// Style of the per-head Q/K norms, when the layout declares them.
    pub qk_norm_style: NormStyle,
    /// Multiply embeddings by `sqrt(hidden_size)`.
    pub scale_embeddings: bool,
}

impl Default for ArchitectureOptions {
    fn default() -> Self {
        Self {
            norm_style: NormStyle::Standard,
            qk_norm_style: NormStyle::Standard,
            scale_embeddings: false,
        }
    }
}

/// Anything that maps a token sequence to next-token logits.
///
/// The forward pass must not mutate the model, so one instance can serve a
/// new generation right after a cancelled one.
pub trait CausalLm: Send + Sync {
    fn vocab_size(&self) -> usize;

    /// Logits over the vocabulary for the position after the last token.
    fn next_token_logits(&self, tokens: &[u32]) -> InferenceResult<Array1<f32>>;
}
