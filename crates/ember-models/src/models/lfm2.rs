//! LFM2 hybrid decoders: attention layers interleaved with gated
//! short-convolution layers.

use ember_transformers::traits::{
    ArchitectureOptions, AttentionLayout, DecoderLayerLayout, DecoderLayout, FeedForwardLayout,
    ShortConvLayout,
};
use ember_transformers::ModelConfiguration;

use super::{merge_eos, VariantSpec};
use crate::architecture::ArchitectureFamily;

/// `<|im_end|>`.
pub const DEFAULT_EOS_TOKEN_IDS: &[u32] = &[7];

fn layer(name: &str) -> String {
    format!("model.layers.{{}}.{}", name)
}

pub fn layout() -> DecoderLayout {
    DecoderLayout {
        token_embedding: "model.embed_tokens.weight".to_string(),
        final_norm: "model.embedding_norm.weight".to_string(),
        lm_head: "lm_head.weight".to_string(),
        layer: DecoderLayerLayout {
            attn_norm: layer("operator_norm.weight"),
            self_attn: AttentionLayout {
                q_weight: layer("self_attn.q_proj.weight"),
                q_bias: None,
                k_weight: layer("self_attn.k_proj.weight"),
                k_bias: None,
                v_weight: layer("self_attn.v_proj.weight"),
                v_bias: None,
                o_weight: layer("self_attn.out_proj.weight"),
                q_norm: Some(layer("self_attn.q_layernorm.weight")),
                k_norm: Some(layer("self_attn.k_layernorm.weight")),
            },
            short_conv: Some(ShortConvLayout {
                in_proj_weight: layer("conv.in_proj.weight"),
                conv_weight: layer("conv.conv.weight"),
                conv_bias: Some(layer("conv.conv.bias")),
                out_proj_weight: layer("conv.out_proj.weight"),
            }),
            post_attn_norm: None,
            ffn_norm: layer("ffn_norm.weight"),
            ffn: FeedForwardLayout {
                gate_weight: layer("feed_forward.w1.weight"),
                up_weight: layer("feed_forward.w3.weight"),
                down_weight: layer("feed_forward.w2.weight"),
            },
            post_ffn_norm: None,
        },
    }
}

pub fn variant(config: &ModelConfiguration) -> VariantSpec {
    VariantSpec {
        family: ArchitectureFamily::Lfm2,
        options: ArchitectureOptions::default(),
        layout: layout(),
        eos_token_ids: merge_eos(DEFAULT_EOS_TOKEN_IDS, &config.eos_token_ids),
    }
}
