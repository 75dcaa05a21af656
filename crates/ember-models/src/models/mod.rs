//! Per-family weight layouts and variant switches.
//!
//! Llama, Qwen and Gemma checkpoints share the HF `model.layers.{i}` naming
//! scheme and only differ in which optional tensors exist. LFM2 has its own
//! scheme.

pub mod gemma;
pub mod lfm2;
pub mod llama;
pub mod qwen;

use ember_transformers::traits::{
    ArchitectureOptions, AttentionLayout, DecoderLayerLayout, DecoderLayout, FeedForwardLayout,
};
use ember_transformers::ModelConfiguration;

use crate::architecture::{ArchitectureFamily, ArchitectureTag};

/// Everything the factory needs to build one concrete decoder.
#[derive(Debug, Clone)]
pub struct VariantSpec {
    pub family: ArchitectureFamily,
    pub options: ArchitectureOptions,
    pub layout: DecoderLayout,
    /// Family defaults unioned with the manifest's `eos_token_id`.
    pub eos_token_ids: Vec<u32>,
}

impl VariantSpec {
    pub fn has_qk_norm(&self) -> bool {
        self.layout.layer.self_attn.q_norm.is_some()
    }

    pub fn has_qkv_bias(&self) -> bool {
        self.layout.layer.self_attn.q_bias.is_some()
    }
}

/// Resolves the variant for a parsed tag. One arm per family.
pub fn variant_for(tag: &ArchitectureTag, config: &ModelConfiguration) -> VariantSpec {
    match tag.family() {
        ArchitectureFamily::Llama => llama::variant(config),
        ArchitectureFamily::Qwen => qwen::variant(tag, config),
        ArchitectureFamily::Gemma => gemma::variant(tag, config),
        ArchitectureFamily::Lfm2 => lfm2::variant(config),
    }
}

/// Family defaults first, then manifest ids not already present.
pub(crate) fn merge_eos(defaults: &[u32], manifest: &[u32]) -> Vec<u32> {
    let mut ids = defaults.to_vec();
    for id in manifest {
        if !ids.contains(id) {
            ids.push(*id);
        }
    }
    ids
}

/// HF naming shared by the Llama, Qwen and Gemma families.
pub(crate) fn hf_decoder_layout(qkv_bias: bool, qk_norm: bool) -> DecoderLayout {
    let attn = |name: &str| format!("model.layers.{{}}.self_attn.{}", name);
    let bias = |proj: &str| qkv_bias.then(|| attn(&format!("{}.bias", proj)));

    DecoderLayout {
        token_embedding: "model.embed_tokens.weight".to_string(),
        final_norm: "model.norm.weight".to_string(),
        lm_head: "lm_head.weight".to_string(),
        layer: DecoderLayerLayout {
            attn_norm: "model.layers.{}.input_layernorm.weight".to_string(),
            self_attn: AttentionLayout {
                q_weight: attn("q_proj.weight"),
                q_bias: bias("q_proj"),
                k_weight: attn("k_proj.weight"),
                k_bias: bias("k_proj"),
                v_weight: attn("v_proj.weight"),
                v_bias: bias("v_proj"),
                o_weight: attn("o_proj.weight"),
                q_norm: qk_norm.then(|| attn("q_norm.weight")),
                k_norm: qk_norm.then(|| attn("k_norm.weight")),
            },
            short_conv: None,
            post_attn_norm: None,
            ffn_norm: "model.layers.{}.post_attention_layernorm.weight".to_string(),
            ffn: FeedForwardLayout {
                gate_weight: "model.layers.{}.mlp.gate_proj.weight".to_string(),
                up_weight: "model.layers.{}.mlp.up_proj.weight".to_string(),
                down_weight: "model.layers.{}.mlp.down_proj.weight".to_string(),
            },
            post_ffn_norm: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_eos_keeps_order_and_dedups() {
        assert_eq!(merge_eos(&[1, 107], &[107, 5]), vec![1, 107, 5]);
        assert_eq!(merge_eos(&[], &[2]), vec![2]);
        assert!(merge_eos(&[], &[]).is_empty());
    }

    #[test]
    fn test_hf_layout_optional_tensors() {
        let plain = hf_decoder_layout(false, false);
        assert!(plain.layer.self_attn.q_bias.is_none());
        assert!(plain.layer.self_attn.q_norm.is_none());
        assert!(plain.layer.short_conv.is_none());
        assert!(plain.layer.post_attn_norm.is_none());
        assert!(plain.layer.post_ffn_norm.is_none());

        let full = hf_decoder_layout(true, true);
        assert_eq!(
            full.layer.self_attn.v_bias.as_deref(),
            Some("model.layers.{}.self_attn.v_proj.bias")
        );
        assert_eq!(
            full.layer.self_attn.k_norm.as_deref(),
            Some("model.layers.{}.self_attn.k_norm.weight")
        );
    }
}
