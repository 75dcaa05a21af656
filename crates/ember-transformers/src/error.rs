//! Error taxonomy shared by loading, binding and generation.

use thiserror::Error;

/// Errors surfaced at the public boundaries of ember.
///
/// Numeric primitives work with `anyhow::Result` internally; anything that
/// escapes a forward pass is wrapped in [`InferenceError::ForwardPassFailure`].
#[derive(Debug, Error)]
pub enum InferenceError {
    /// A required manifest field is absent.
    #[error("model configuration is missing required field '{0}'")]
    ConfigMissingField(String),

    /// The manifest parsed but violates an invariant.
    #[error("invalid model configuration: {0}")]
    InvalidConfig(String),

    /// No architecture family matches the model-type tag.
    #[error("unsupported architecture: '{0}'")]
    UnsupportedArchitecture(String),

    /// A checkpoint tensor exists but its shape differs from the declared parameter.
    #[error("weight '{name}' has shape {actual:?}, expected {expected:?}")]
    WeightShapeMismatch {
        name: String,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    /// A declared parameter has no tensor in the checkpoint.
    #[error("weight '{0}' not found in checkpoint")]
    MissingWeight(String),

    /// The checkpoint stores a tensor in a dtype we cannot widen to f32.
    #[error("weight '{name}' is stored as unsupported dtype {dtype}")]
    UnsupportedDType { name: String, dtype: String },

    /// I/O or container-level failure while reading shards or manifests.
    #[error("failed to read checkpoint: {0}")]
    Checkpoint(#[source] anyhow::Error),

    #[error("no tokenizer is loaded")]
    TokenizerNotLoaded,

    #[error("no model is loaded")]
    ModelNotLoaded,

    /// A service operation was attempted from the wrong lifecycle state.
    #[error("invalid service state: expected {expected}, found {actual}")]
    InvalidState {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("forward pass failed: {0}")]
    ForwardPassFailure(#[source] anyhow::Error),

    #[error("tokenizer error: {0}")]
    Tokenizer(String),
}

impl InferenceError {
    /// True for the binding errors that lenient loading downgrades to warnings.
    pub fn is_binding_error(&self) -> bool {
        matches!(
            self,
            InferenceError::MissingWeight(_) | InferenceError::WeightShapeMismatch { .. }
        )
    }
}

/// Result alias for ember operations.
pub type InferenceResult<T> = Result<T, InferenceError>;
