//! Gemma 2 and Gemma 3 decoders.
//!
//! Every norm stores `weight - 1` (unit-offset), embeddings are scaled by
//! `sqrt(hidden_size)`, and softcapping comes from the manifest. Each layer
//! is a sandwich: both sublayer outputs are normed again before the residual
//! add, so `post_attention_layernorm` is a post-norm here and the feed-forward
//! input goes through `pre_feedforward_layernorm`.

use ember_transformers::traits::{ArchitectureOptions, DecoderLayout};
use ember_transformers::{ModelConfiguration, NormStyle};

use super::{hf_decoder_layout, merge_eos, VariantSpec};
use crate::architecture::{ArchitectureFamily, ArchitectureTag};

/// `<eos>` and `<end_of_turn>`.
pub const DEFAULT_EOS_TOKEN_IDS: &[u32] = &[1, 107];

pub fn layout(qkv_bias: bool, qk_norm: bool) -> DecoderLayout {
    let mut layout = hf_decoder_layout(qkv_bias, qk_norm);
    let layer = &mut layout.layer;
    layer.post_attn_norm = Some("model.layers.{}.post_attention_layernorm.weight".to_string());
    layer.ffn_norm = "model.layers.{}.pre_feedforward_layernorm.weight".to_string();
    layer.post_ffn_norm = Some("model.layers.{}.post_feedforward_layernorm.weight".to_string());
    layout
}

pub fn variant(tag: &ArchitectureTag, config: &ModelConfiguration) -> VariantSpec {
    let options = ArchitectureOptions {
        norm_style: NormStyle::UnitOffset,
        qk_norm_style: NormStyle::UnitOffset,
        scale_embeddings: true,
    };

    VariantSpec {
        family: ArchitectureFamily::Gemma,
        options,
        // Gemma 2 checkpoints ship no q_norm/k_norm tensors.
        layout: layout(config.uses_attention_bias(), tag.is_gemma3()),
        eos_token_ids: merge_eos(DEFAULT_EOS_TOKEN_IDS, &config.eos_token_ids),
    }
}
