use anyhow::{anyhow, Context, Result};
use ndarray::{s, Array1, Array2, Array3};

use crate::activations::softcap_inplace;
use crate::embeddings::Embeddings;
use crate::error::{InferenceError, InferenceResult};
use crate::linear_layer::LinearLayer;
use crate::normalization::RMSNorm;
use crate::tensor::{ComputeOp, PrecisionPolicy};
use crate::traits::CausalLm;
use crate::utils::causal_mask_bias;

use super::TransformerLayer;

/// Projection from the final hidden state to vocabulary logits.
pub enum OutputHead {
    /// Reuses the embedding table (transposed).
    Tied,
    Dedicated(LinearLayer),
}

/// Embedding table, ordered layers, final norm and output head.
///
/// All weights are read-only during a forward pass; intermediates live only
/// for the duration of the call.
pub struct DecoderStack {
    pub embeddings: Embeddings,
    pub layers: Vec<TransformerLayer>,
    pub final_norm: RMSNorm,
    pub head: OutputHead,
    /// 0 disables.
    pub final_logit_softcap: f32,
    policy: PrecisionPolicy,
}

impl DecoderStack {
    pub fn new(
        embeddings: Embeddings,
        layers: Vec<TransformerLayer>,
        final_norm: RMSNorm,
        head: OutputHead,
        final_logit_softcap: f32,
        policy: PrecisionPolicy,
    ) -> Self {
        Self {
            embeddings,
            layers,
            final_norm,
            head,
            final_logit_softcap,
            policy,
        }
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    pub fn policy(&self) -> PrecisionPolicy {
        self.policy
    }

    pub fn is_tied(&self) -> bool {
        matches!(self.head, OutputHead::Tied)
    }

    /// `[batch, seq]` ids -> f32 logits `[batch, seq, vocab]`.
    pub fn forward(&self, input_ids: &Array2<u32>) -> InferenceResult<Array3<f32>> {
        self.forward_inner(input_ids).map_err(InferenceError::ForwardPassFailure)
    }

    /// Single-sequence convenience for [`forward`](Self::forward).
    pub fn forward_tokens(&self, tokens: &[u32]) -> InferenceResult<Array3<f32>> {
        let ids = Array2::from_shape_vec((1, tokens.len()), tokens.to_vec())
            .map_err(|e| InferenceError::ForwardPassFailure(anyhow!(e)))?;
        self.forward(&ids)
    }

    /// Logits at the final position of `tokens`.
    pub fn last_token_logits(&self, tokens: &[u32]) -> InferenceResult<Array1<f32>> {
        let logits = self.forward_tokens(tokens)?;
        let last = tokens.len() - 1;
        Ok(logits.slice(s![0, last, ..]).to_owned())
    }

    fn forward_inner(&self, input_ids: &Array2<u32>) -> Result<Array3<f32>> {
        let (batch, seq) = input_ids.dim();
        if batch == 0 || seq == 0 {
            return Err(anyhow!("forward pass needs at least one token, got shape [{}, {}]", batch, seq));
        }

        let mut hidden = self.embeddings.forward(input_ids).context("embedding lookup")?;
        let mask = causal_mask_bias(seq);

        for (i, layer) in self.layers.iter().enumerate() {
            hidden = layer
                .forward(&hidden, &mask)
                .with_context(|| format!("decoder layer {}", i))?;
        }

        let hidden = self.final_norm.forward(&hidden).context("final norm")?;
        self.logits(&hidden)
    }

    fn logits(&self, hidden: &Array3<f32>) -> Result<Array3<f32>> {
        let (batch, seq, width) = hidden.dim();
        let flat = hidden
            .to_shape((batch * seq, width))
            .map_err(|e| anyhow!("cannot flatten hidden states: {}", e))?
            .to_owned();

        let mut logits = match &self.head {
            OutputHead::Tied => flat.dot(&self.embeddings.word_embeddings.t()),
            OutputHead::Dedicated(head) => head.matmul(&flat).context("lm_head")?,
        };
        self.policy.cast(ComputeOp::FinalLogits, &mut logits);
        softcap_inplace(&mut logits, self.final_logit_softcap);
        self.policy.cast(ComputeOp::Softcap, &mut logits);

        let vocab = logits.ncols();
        logits
            .into_shape_with_order((batch, seq, vocab))
            .map_err(|e| anyhow!("cannot restore logits shape: {}", e))
    }
}

impl CausalLm for DecoderStack {
    fn vocab_size(&self) -> usize {
        self.embeddings.vocab_size()
    }

    fn next_token_logits(&self, tokens: &[u32]) -> InferenceResult<Array1<f32>> {
        if tokens.is_empty() {
            return Err(InferenceError::ForwardPassFailure(anyhow!("empty token sequence")));
        }
        self.last_token_logits(tokens)
    }
}
