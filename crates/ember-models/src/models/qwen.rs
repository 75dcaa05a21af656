//! Qwen2, Qwen2.5 and Qwen3 decoders.
//!
//! A Llama-family stack with different switches: Qwen2/2.5 carry q/k/v biases
//! unless the manifest sets `attention_bias: false`, Qwen3 replaces them with
//! per-head RMSNorms on Q and K.

use ember_transformers::traits::ArchitectureOptions;
use ember_transformers::ModelConfiguration;

use super::{hf_decoder_layout, merge_eos, VariantSpec};
use crate::architecture::{ArchitectureFamily, ArchitectureTag};

/// `<|endoftext|>` and `<|im_end|>`.
pub const DEFAULT_EOS_TOKEN_IDS: &[u32] = &[151643, 151645];

pub fn variant(tag: &ArchitectureTag, config: &ModelConfiguration) -> VariantSpec {
    if tag.is_vision_stub() {
        log::warn!(
            "{} has a vision branch that is not implemented; building the text-only Qwen2 stack",
            tag
        );
    }

    let (qkv_bias, qk_norm) = if tag.is_qwen3() {
        (config.uses_attention_bias(), true)
    } else {
        // Qwen2 manifests usually omit the flag but the checkpoints are biased.
        (config.attention_bias.unwrap_or(true), false)
    };

    VariantSpec {
        family: ArchitectureFamily::Qwen,
        options: ArchitectureOptions::default(),
        layout: hf_decoder_layout(qkv_bias, qk_norm),
        eos_token_ids: merge_eos(DEFAULT_EOS_TOKEN_IDS, &config.eos_token_ids),
    }
}
