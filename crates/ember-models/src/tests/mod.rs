//! Checkpoint fixtures shared by the load and service tests.


use std::collections::HashMap;
use std::path::{Path, PathBuf};

use ember_transformers::error::{InferenceError, InferenceResult};
use ember_transformers::tokenizer::TextTokenizer;
use ember_transformers::ModelConfiguration;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use safetensors::tensor::{Dtype, TensorView};
use serde_json::{json, Value};

use crate::factory::ArchitectureFactory;

/// hidden 8, 2 heads sharing 1 kv head of width 4, vocab 10.
pub(crate) fn tiny_manifest_value(model_type: &str, extra: Value) -> Value {
    let mut value = json!({
        "model_type": model_type,
        "hidden_size": 8,
        "num_attention_heads": 2,
        "num_key_value_heads": 1,
        "head_dim": 4,
        "num_hidden_layers": 1,
        "vocab_size": 10,
        "intermediate_size": 16
    });
    if let Some(extra) = extra.as_object() {
        for (k, v) in extra {
            value[k] = v.clone();
        }
    }
    value
}

pub(crate) fn tiny_manifest(model_type: &str, extra: Value) -> ModelConfiguration {
    ModelConfiguration::from_value(tiny_manifest_value(model_type, extra)).unwrap()
}

/// Random fixed-seed weights for every declared parameter of `config`,
/// dealt round-robin over `shards` files. Names in `omit` are left out and
/// names in `reshape` are written with the given shape instead.
pub(crate) fn write_checkpoint(
    dir: &Path,
    config: &ModelConfiguration,
    shards: usize,
    seed: u64,
    omit: &[&str],
    reshape: &[(&str, Vec<usize>)],
) -> Vec<PathBuf> {
    let params = ArchitectureFactory::declared_parameters(&config.architecture, config).unwrap();
    let mut rng = StdRng::seed_from_u64(seed);

    let mut files: Vec<Vec<(String, Vec<usize>, Vec<u8>)>> = vec![Vec::new(); shards];
    for (i, (name, shape)) in params.into_iter().enumerate() {
        if omit.contains(&name.as_str()) {
            continue;
        }
        let shape = reshape
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, s)| s.clone())
            .unwrap_or(shape);
        let is_norm = name.contains("norm");
        let numel: usize = shape.iter().product();
        let bytes: Vec<u8> = (0..numel)
            .flat_map(|_| {
                let r: f32 = rng.gen_range(-1.0..1.0);
                let v = if is_norm { 1.0 + 0.1 * r } else { 0.4 * r };
                v.to_le_bytes()
            })
            .collect();
        files[i % shards].push((name, shape, bytes));
    }

    files
        .iter()
        .enumerate()
        .map(|(i, tensors)| {
            let path = dir.join(format!("model-{:05}-of-{:05}.safetensors", i + 1, shards));
            let views: HashMap<String, TensorView> = tensors
                .iter()
                .map(|(name, shape, bytes)| {
                    (name.clone(), TensorView::new(Dtype::F32, shape.clone(), bytes).unwrap())
                })
                .collect();
            safetensors::serialize_to_file(&views, &None, &path).unwrap();
            path
        })
        .collect()
}

/// Whitespace-separated integers in, `<id>` fragments out.
pub(crate) struct NumberTokenizer;

impl TextTokenizer for NumberTokenizer {
    fn encode(&self, text: &str) -> InferenceResult<Vec<u32>> {
        text.split_whitespace()
            .map(|w| w.parse::<u32>().map_err(|e| InferenceError::Tokenizer(e.to_string())))
            .collect()
    }

    fn decode(&self, ids: &[u32]) -> InferenceResult<String> {
        Ok(ids.iter().map(|id| format!("<{}>", id)).collect())
    }
}

/// WordLevel `tokenizer.json` over `t0`..`t9`.
pub(crate) fn word_level_tokenizer_json() -> String {
    let vocab: serde_json::Map<String, Value> = (0..10).map(|i| (format!("t{}", i), json!(i))).collect();
    json!({
        "version": "1.0",
        "truncation": null,
        "padding": null,
        "added_tokens": [],
        "normalizer": null,
        "pre_tokenizer": {"type": "Whitespace"},
        "post_processor": null,
        "decoder": null,
        "model": {"type": "WordLevel", "vocab": vocab, "unk_token": "t0"}
    })
    .to_string()
}
