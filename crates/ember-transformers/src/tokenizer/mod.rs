//! Tokenizer capability: text ↔ token ids.
//!
//! The generation loop only needs `encode` and `decode`; [`HfTokenizer`]
//! adapts a `tokenizer.json` through the `tokenizers` crate.

use std::path::Path;

use crate::error::{InferenceError, InferenceResult};

pub trait TextTokenizer: Send + Sync {
    fn encode(&self, text: &str) -> InferenceResult<Vec<u32>>;
    fn decode(&self, ids: &[u32]) -> InferenceResult<String>;
}

pub struct HfTokenizer {
    inner: tokenizers::Tokenizer,
    add_special_tokens: bool,
}

impl HfTokenizer {
    pub fn new(inner: tokenizers::Tokenizer) -> Self {
        Self {
            inner,
            add_special_tokens: true,
        }
    }

    pub fn from_file(path: impl AsRef<Path>) -> InferenceResult<Self> {
        let path = path.as_ref();
        let inner = tokenizers::Tokenizer::from_file(path)
            .map_err(|e| InferenceError::Tokenizer(format!("failed to load {}: {}", path.display(), e)))?;
        log::info!("Loaded tokenizer from {}", path.display());
        Ok(Self::new(inner))
    }

    /// Whether `encode` lets the tokenizer's post-processor add BOS/EOS markers.
    pub fn with_special_tokens(mut self, add: bool) -> Self {
        self.add_special_tokens = add;
        self
    }

    pub fn vocab_size(&self) -> usize {
        self.inner.get_vocab_size(true)
    }
}

impl TextTokenizer for HfTokenizer {
    fn encode(&self, text: &str) -> InferenceResult<Vec<u32>> {
        let encoding = self
            .inner
            .encode(text, self.add_special_tokens)
            .map_err(|e| InferenceError::Tokenizer(e.to_string()))?;
        Ok(encoding.get_ids().to_vec())
    }

    fn decode(&self, ids: &[u32]) -> InferenceResult<String> {
        self.inner
            .decode(ids, false)
            .map_err(|e| InferenceError::Tokenizer(e.to_string()))
    }
}
