//! Hyperparameter manifest parsing and validation.
//!
//! Manifests are HF-style `config.json` objects. They are read into an
//! all-optional [`RawManifest`] first so that a missing field can be reported
//! by name instead of as a serde error, then validated into a
//! [`ModelConfiguration`].

use std::path::Path;

use anyhow::Context;
use serde::de::{self, Deserializer, SeqAccess, Visitor};
use serde::Deserialize;

use crate::error::{InferenceError, InferenceResult};

fn default_rms_norm_eps() -> f32 { 1e-6 }
fn default_rope_theta() -> f32 { 10000.0 }
fn default_hidden_activation() -> String { "silu".to_string() }
fn default_conv_kernel() -> usize { 3 }

fn deserialize_token_ids<'de, D>(deserializer: D) -> Result<Option<Vec<u32>>, D::Error>
where
    D: Deserializer<'de>,
{
    struct TokenIdsVisitor;
    impl<'de> Visitor<'de> for TokenIdsVisitor {
        type Value = Option<Vec<u32>>;
        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("null, u32 or array of u32")
        }
        fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }
        fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }
        fn visit_some<D2: Deserializer<'de>>(self, d: D2) -> Result<Self::Value, D2::Error> {
            d.deserialize_any(TokenIdsVisitor)
        }
        fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
            u32::try_from(v)
                .map(|id| Some(vec![id]))
                .map_err(|_| de::Error::custom(format!("token id {} out of range", v)))
        }
        fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
            u32::try_from(v)
                .map(|id| Some(vec![id]))
                .map_err(|_| de::Error::custom(format!("token id {} out of range", v)))
        }
        fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
            let mut ids = Vec::new();
            while let Some(id) = seq.next_element::<u32>()? {
                ids.push(id);
            }
            Ok(Some(ids))
        }
    }
    deserializer.deserialize_option(TokenIdsVisitor)
}

/// The manifest exactly as written on disk. Every field is optional; HF
/// aliases are kept as separate fields because some checkpoints carry both.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawManifest {
    pub model_type: Option<String>,
    #[serde(default)]
    pub architectures: Vec<String>,

    pub hidden_size: Option<usize>,
    pub num_hidden_layers: Option<usize>,
    pub num_attention_heads: Option<usize>,
    pub num_heads: Option<usize>,
    pub num_key_value_heads: Option<usize>,
    pub num_kv_heads: Option<usize>,
    pub head_dim: Option<usize>,
    pub intermediate_size: Option<usize>,
    pub vocab_size: Option<usize>,
    pub max_position_embeddings: Option<usize>,

    pub rms_norm_eps: Option<f32>,
    pub norm_eps: Option<f32>,
    pub rope_theta: Option<f32>,
    pub attn_logit_softcapping: Option<f32>,
    pub final_logit_softcapping: Option<f32>,

    pub hidden_activation: Option<String>,
    pub hidden_act: Option<String>,

    pub tie_word_embeddings: Option<bool>,
    pub tie_embedding: Option<bool>,
    pub attention_bias: Option<bool>,

    #[serde(default, deserialize_with = "deserialize_token_ids")]
    pub eos_token_id: Option<Vec<u32>>,
    #[serde(default, deserialize_with = "deserialize_token_ids")]
    pub bos_token_id: Option<Vec<u32>>,

    // LFM2 hybrid conv/attention fields
    pub layer_types: Option<Vec<String>>,
    pub full_attn_idxs: Option<Vec<usize>>,
    #[serde(rename = "conv_L_cache")]
    pub conv_l_cache: Option<usize>,
    pub conv_bias: Option<bool>,
    pub block_auto_adjust_ff_dim: Option<bool>,
    pub block_ff_dim: Option<usize>,
    pub block_ffn_dim_multiplier: Option<f32>,
    pub block_multiple_of: Option<usize>,

    /// Multimodal checkpoints nest the language-model fields here.
    pub text_config: Option<Box<RawManifest>>,
}

/// Token mixer used by one decoder layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerKind {
    Attention,
    ShortConv,
}

/// Validated model hyperparameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelConfiguration {
    pub architecture: String,
    pub hidden_size: usize,
    pub num_layers: usize,
    pub num_attention_heads: usize,
    pub num_kv_heads: usize,
    pub head_dim: usize,
    pub intermediate_size: usize,
    pub vocab_size: usize,
    pub max_position_embeddings: Option<usize>,
    pub rms_norm_eps: f32,
    pub rope_theta: f32,
    /// 0 disables.
    pub attn_logit_softcapping: f32,
    /// 0 disables.
    pub final_logit_softcapping: f32,
    pub hidden_activation: String,
    pub tie_word_embeddings: bool,
    /// `None` when the manifest is silent, so a family can pick its own default.
    pub attention_bias: Option<bool>,
    pub eos_token_ids: Vec<u32>,
    pub bos_token_id: Option<u32>,
    /// One entry per layer.
    pub layer_kinds: Vec<LayerKind>,
    pub conv_kernel_size: usize,
    pub conv_bias: bool,
}

/// LFM2 feed-forward width: `2/3` of the block width, scaled, rounded up to a multiple.
pub fn adjusted_ff_dim(block_ff_dim: usize, multiplier: Option<f32>, multiple_of: usize) -> usize {
    let mut ff = 2 * block_ff_dim / 3;
    if let Some(m) = multiplier {
        ff = (m * ff as f32) as usize;
    }
    let multiple_of = multiple_of.max(1);
    multiple_of * ff.div_ceil(multiple_of)
}

fn required(value: Option<usize>, field: &str) -> InferenceResult<usize> {
    value.ok_or_else(|| InferenceError::ConfigMissingField(field.to_string()))
}

impl ModelConfiguration {
    pub fn from_json(json: &str) -> InferenceResult<Self> {
        let raw: RawManifest = serde_json::from_str(json)
            .map_err(|e| InferenceError::InvalidConfig(format!("malformed manifest: {}", e)))?;
        Self::from_raw(raw)
    }

    pub fn from_value(value: serde_json::Value) -> InferenceResult<Self> {
        let raw: RawManifest = serde_json::from_value(value)
            .map_err(|e| InferenceError::InvalidConfig(format!("malformed manifest: {}", e)))?;
        Self::from_raw(raw)
    }

    pub fn from_file(path: impl AsRef<Path>) -> InferenceResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read manifest {}", path.display()))
            .map_err(InferenceError::Checkpoint)?;
        Self::from_json(&json)
    }

    pub fn from_raw(raw: RawManifest) -> InferenceResult<Self> {
        let outer_type = raw.model_type.clone();
        let raw = match raw.text_config {
            Some(text) if raw.hidden_size.is_none() => {
                log::debug!("Reading language-model fields from nested text_config");
                *text
            }
            _ => raw,
        };

        let architecture = outer_type
            .or_else(|| raw.model_type.clone())
            .ok_or_else(|| InferenceError::ConfigMissingField("model_type".to_string()))?;
        let hidden_size = required(raw.hidden_size, "hidden_size")?;
        let num_layers = required(raw.num_hidden_layers, "num_hidden_layers")?;
        let num_attention_heads = required(
            raw.num_attention_heads.or(raw.num_heads),
            "num_attention_heads",
        )?;
        let vocab_size = required(raw.vocab_size, "vocab_size")?;

        let block_ff = raw.block_ff_dim.or(raw.intermediate_size);
        let mut intermediate_size = required(block_ff, "intermediate_size")?;
        if raw.block_auto_adjust_ff_dim.unwrap_or(false) {
            intermediate_size = adjusted_ff_dim(
                intermediate_size,
                raw.block_ffn_dim_multiplier,
                raw.block_multiple_of.unwrap_or(256),
            );
        }

        if num_attention_heads == 0 {
            return Err(InferenceError::InvalidConfig(
                "num_attention_heads must be positive".to_string(),
            ));
        }
        let num_kv_heads = raw
            .num_key_value_heads
            .or(raw.num_kv_heads)
            .unwrap_or(num_attention_heads);
        let head_dim = raw.head_dim.unwrap_or(hidden_size / num_attention_heads);

        let layer_kinds = Self::resolve_layer_kinds(&raw, num_layers)?;

        let config = Self {
            architecture,
            hidden_size,
            num_layers,
            num_attention_heads,
            num_kv_heads,
            head_dim,
            intermediate_size,
            vocab_size,
            max_position_embeddings: raw.max_position_embeddings,
            rms_norm_eps: raw.rms_norm_eps.or(raw.norm_eps).unwrap_or_else(default_rms_norm_eps),
            rope_theta: raw.rope_theta.unwrap_or_else(default_rope_theta),
            attn_logit_softcapping: raw.attn_logit_softcapping.unwrap_or(0.0),
            final_logit_softcapping: raw.final_logit_softcapping.unwrap_or(0.0),
            hidden_activation: raw
                .hidden_activation
                .or(raw.hidden_act)
                .unwrap_or_else(default_hidden_activation),
            tie_word_embeddings: raw.tie_word_embeddings.or(raw.tie_embedding).unwrap_or(true),
            attention_bias: raw.attention_bias,
            eos_token_ids: raw.eos_token_id.unwrap_or_default(),
            bos_token_id: raw.bos_token_id.and_then(|ids| ids.first().copied()),
            layer_kinds,
            conv_kernel_size: raw.conv_l_cache.unwrap_or_else(default_conv_kernel),
            conv_bias: raw.conv_bias.unwrap_or(false),
        };
        config.validate()?;
        Ok(config)
    }

    fn resolve_layer_kinds(raw: &RawManifest, num_layers: usize) -> InferenceResult<Vec<LayerKind>> {
        if let Some(types) = &raw.layer_types {
            if types.len() != num_layers {
                return Err(InferenceError::InvalidConfig(format!(
                    "layer_types has {} entries for {} layers",
                    types.len(),
                    num_layers
                )));
            }
            return types
                .iter()
                .map(|t| match t.as_str() {
                    "full_attention" | "attention" | "sliding_attention" => Ok(LayerKind::Attention),
                    "conv" | "short_conv" => Ok(LayerKind::ShortConv),
                    other => Err(InferenceError::InvalidConfig(format!(
                        "unknown layer type '{}'",
                        other
                    ))),
                })
                .collect();
        }
        if let Some(idxs) = &raw.full_attn_idxs {
            if let Some(bad) = idxs.iter().find(|&&i| i >= num_layers) {
                return Err(InferenceError::InvalidConfig(format!(
                    "full_attn_idxs entry {} out of range for {} layers",
                    bad, num_layers
                )));
            }
            return Ok((0..num_layers)
                .map(|i| {
                    if idxs.contains(&i) {
                        LayerKind::Attention
                    } else {
                        LayerKind::ShortConv
                    }
                })
                .collect());
        }
        Ok(vec![LayerKind::Attention; num_layers])
    }

    fn validate(&self) -> InferenceResult<()> {
        let invalid = |msg: String| Err(InferenceError::InvalidConfig(msg));
        if self.hidden_size == 0 || self.num_layers == 0 || self.vocab_size == 0 {
            return invalid("hidden_size, num_hidden_layers and vocab_size must be positive".into());
        }
        if self.intermediate_size == 0 {
            return invalid("intermediate_size must be positive".into());
        }
        if self.num_kv_heads == 0 {
            return invalid("num_kv_heads must be positive".into());
        }
        if self.num_attention_heads % self.num_kv_heads != 0 {
            return invalid(format!(
                "num_attention_heads ({}) is not divisible by num_kv_heads ({})",
                self.num_attention_heads, self.num_kv_heads
            ));
        }
        if self.head_dim == 0 {
            return invalid("head_dim must be positive".into());
        }
        if self.head_dim % 2 != 0 {
            return invalid(format!("head_dim ({}) must be even for rotary embeddings", self.head_dim));
        }
        if self.attn_logit_softcapping < 0.0 || self.final_logit_softcapping < 0.0 {
            return invalid("softcapping values must not be negative".into());
        }
        if self.layer_kinds.contains(&LayerKind::ShortConv) && self.conv_kernel_size == 0 {
            return invalid("conv_L_cache must be positive".into());
        }
        Ok(())
    }

    /// Number of query heads sharing one key/value head.
    pub fn gqa_groups(&self) -> usize {
        self.num_attention_heads / self.num_kv_heads
    }

    pub fn q_dim(&self) -> usize {
        self.num_attention_heads * self.head_dim
    }

    pub fn kv_dim(&self) -> usize {
        self.num_kv_heads * self.head_dim
    }

    /// q/k/v bias as declared, absent meaning none.
    pub fn uses_attention_bias(&self) -> bool {
        self.attention_bias.unwrap_or(false)
    }

    pub fn uses_gelu(&self) -> bool {
        self.hidden_activation.to_ascii_lowercase().contains("gelu")
    }

    pub fn layer_kind(&self, layer: usize) -> LayerKind {
        self.layer_kinds.get(layer).copied().unwrap_or(LayerKind::Attention)
    }
}
