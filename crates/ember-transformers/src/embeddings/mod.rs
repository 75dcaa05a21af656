//! Token embedding lookup.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use ndarray::{s, Array2, Array3};

use crate::tensor::{ComputeOp, PrecisionPolicy};

/// Word-embedding table `[vocab, hidden]`, shared with a tied output head.
#[derive(Debug, Clone)]
pub struct Embeddings {
    pub word_embeddings: Arc<Array2<f32>>,
    /// Multiplier applied after lookup (`sqrt(hidden)` for Gemma).
    scale: Option<f32>,
    policy: PrecisionPolicy,
}

impl Embeddings {
    pub fn new(word_embeddings: Arc<Array2<f32>>, policy: PrecisionPolicy) -> Self {
        Self { word_embeddings, scale: None, policy }
    }

    /// Scales looked-up rows by `sqrt(hidden)`; the factor itself is rounded
    /// to the working dtype first.
    pub fn with_sqrt_hidden_scale(mut self) -> Self {
        let hidden = self.hidden_size() as f32;
        self.scale = Some(self.policy.round_scalar(ComputeOp::Embedding, hidden.sqrt()));
        self
    }

    pub fn scale(&self) -> Option<f32> {
        self.scale
    }

    pub fn vocab_size(&self) -> usize {
        self.word_embeddings.nrows()
    }

    pub fn hidden_size(&self) -> usize {
        self.word_embeddings.ncols()
    }

    /// `[batch, seq]` ids -> `[batch, seq, hidden]`
    pub fn forward(&self, input_ids: &Array2<u32>) -> Result<Array3<f32>> {
        let (batch, seq) = input_ids.dim();
        let vocab = self.vocab_size();
        let mut out = Array3::<f32>::zeros((batch, seq, self.hidden_size()));
        for ((b, t), &id) in input_ids.indexed_iter() {
            let row = id as usize;
            if row >= vocab {
                return Err(anyhow!("token id {} out of range for vocabulary of {}", id, vocab));
            }
            out.slice_mut(s![b, t, ..]).assign(&self.word_embeddings.row(row));
        }
        if let Some(scale) = self.scale {
            out.mapv_inplace(|v| v * scale);
        }
        self.policy.cast(ComputeOp::Embedding, &mut out);
        Ok(out)
    }
}
