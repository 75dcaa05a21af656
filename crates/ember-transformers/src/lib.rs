//! Core building blocks for decoder-only language models on the CPU.
//!
//! Architecture-specific wiring lives in `ember-models`; this crate knows
//! about layers, weights, precision and the greedy generation loop.

pub mod activations;
pub mod attention;
pub mod common;
pub mod config;
pub mod decoder;
pub mod embeddings;
pub mod error;
pub mod feedforward;
pub mod generation;
pub mod linear_layer;
pub mod normalization;
pub mod rope;
pub mod short_conv;
pub mod tensor;
pub mod tokenizer;
pub mod traits;
pub mod utils;
pub mod weights;

// Re-export commonly used items
pub use crate::{
    activations::Activation,
    attention::SelfAttention,
    common::{CancellationHandle, CancellationToken, GenerationConfig, DEFAULT_CONTEXT_WINDOW},
    config::{LayerKind, ModelConfiguration, RawManifest},
    decoder::{DecoderBuilder, DecoderStack},
    embeddings::Embeddings,
    error::{InferenceError, InferenceResult},
    feedforward::SwiGluFeedForward,
    generation::{GenerationLoop, GenerationPhase, GenerationStats},
    linear_layer::LinearLayer,
    normalization::{NormStyle, RMSNorm},
    rope::RoPE,
    short_conv::ShortConv,
    tensor::{ComputeOp, DType, PrecisionPolicy},
    tokenizer::{HfTokenizer, TextTokenizer},
    traits::{ArchitectureOptions, CausalLm, DecoderLayout, Device},
    weights::{BindingMode, LoadReport, ParameterBinder, WeightTable},
};

pub mod prelude {
    pub use crate::common::{CancellationToken, GenerationConfig};
    pub use crate::error::{InferenceError, InferenceResult};
    pub use crate::tensor::DType;
    pub use crate::traits::{CausalLm, Device};
}
