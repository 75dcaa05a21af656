//! Llama-family decoders (Llama 2/3, Granite, Mistral).

use ember_transformers::traits::ArchitectureOptions;
use ember_transformers::ModelConfiguration;

use super::{hf_decoder_layout, merge_eos, VariantSpec};
use crate::architecture::ArchitectureFamily;

/// Llama checkpoints declare their own stop ids.
pub const DEFAULT_EOS_TOKEN_IDS: &[u32] = &[];

pub fn variant(config: &ModelConfiguration) -> VariantSpec {
    VariantSpec {
        family: ArchitectureFamily::Llama,
        options: ArchitectureOptions::default(),
        layout: hf_decoder_layout(config.uses_attention_bias(), false),
        eos_token_ids: merge_eos(DEFAULT_EOS_TOKEN_IDS, &config.eos_token_ids),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_transformers::NormStyle;
    use serde_json::json;

    fn config(extra: serde_json::Value) -> ModelConfiguration {
        let mut value = json!({
            "model_type": "llama",
            "hidden_size": 64,
            "num_attention_heads": 8,
            "num_key_value_heads": 2,
            "num_hidden_layers": 2,
            "vocab_size": 128,
            "intermediate_size": 128,
            "eos_token_id": [128001, 128009]
        });
        for (k, v) in extra.as_object().unwrap() {
            value[k] = v.clone();
        }
        ModelConfiguration::from_value(value).unwrap()
    }

    #[test]
    fn test_llama_variant() {
        let spec = variant(&config(json!({})));
        assert_eq!(spec.family, ArchitectureFamily::Llama);
        assert_eq!(spec.options.norm_style, NormStyle::Standard);
        assert!(!spec.options.scale_embeddings);
        assert!(!spec.has_qk_norm());
        assert!(!spec.has_qkv_bias());
        assert_eq!(spec.eos_token_ids, vec![128001, 128009]);
    }

    #[test]
    fn test_attention_bias_follows_manifest() {
        let spec = variant(&config(json!({"attention_bias": true})));
        assert!(spec.has_qkv_bias());
    }
}
