//! Generation state machine:
//! `Idle → Prefill → Decoding → {Completed | Cancelled | Failed}`.
//!
//! Each call to `next` runs at most one decoding step. Every step re-runs the
//! forward pass over the whole window; there is no KV cache.

use std::iter::FusedIterator;
use std::sync::Arc;
use std::time::Instant;

use anyhow::anyhow;
use log::{debug, info};

use crate::common::{argmax, CancellationToken, GenerationConfig};
use crate::error::{InferenceError, InferenceResult};
use crate::tokenizer::TextTokenizer;
use crate::traits::CausalLm;

use super::{GenerationState, GenerationStats};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationPhase {
    Idle,
    Prefill,
    Decoding,
    Completed,
    Cancelled,
    Failed,
}

impl GenerationPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            GenerationPhase::Completed | GenerationPhase::Cancelled | GenerationPhase::Failed
        )
    }
}

/// Lazy, single-pass sequence of decoded text fragments.
pub struct GenerationLoop {
    model: Arc<dyn CausalLm>,
    tokenizer: Arc<dyn TextTokenizer>,
    prompt: String,
    eos_token_ids: Vec<u32>,
    config: GenerationConfig,
    cancel: CancellationToken,
    phase: GenerationPhase,
    state: GenerationState,
    steps: usize,
}

impl GenerationLoop {
    /// `prompt` is used as-is; apply any chat formatting before calling.
    pub fn new(
        model: Arc<dyn CausalLm>,
        tokenizer: Arc<dyn TextTokenizer>,
        prompt: impl Into<String>,
        eos_token_ids: Vec<u32>,
        config: GenerationConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            model,
            tokenizer,
            prompt: prompt.into(),
            eos_token_ids,
            state: GenerationState::new(config.context_window),
            config,
            cancel,
            phase: GenerationPhase::Idle,
            steps: 0,
        }
    }

    pub fn phase(&self) -> GenerationPhase {
        self.phase
    }

    pub fn state(&self) -> &GenerationState {
        &self.state
    }

    pub fn stats(&self) -> &GenerationStats {
        &self.state.stats
    }

    fn finish(&mut self, phase: GenerationPhase) {
        self.phase = phase;
        self.state.stats.finished_at = Some(Instant::now());
        let stats = &self.state.stats;
        info!(
            "Generation {:?}: {} tokens in {:.3}s ({:.2} tok/s)",
            phase,
            stats.emitted_tokens,
            stats.elapsed().map(|d| d.as_secs_f64()).unwrap_or_default(),
            stats.tokens_per_second().unwrap_or_default()
        );
    }

    fn fail(&mut self, err: InferenceError) -> Option<InferenceResult<String>> {
        log::warn!("Generation failed: {}", err);
        self.finish(GenerationPhase::Failed);
        Some(Err(err))
    }

    fn prefill(&mut self) -> InferenceResult<()> {
        self.phase = GenerationPhase::Prefill;
        self.state.stats.started_at = Some(Instant::now());

        let ids = self.tokenizer.encode(&self.prompt)?;
        if ids.is_empty() {
            return Err(InferenceError::Tokenizer("prompt encoded to zero tokens".to_string()));
        }
        let prompt_len = ids.len();
        self.state.load_prompt(ids);
        if self.state.len() < prompt_len {
            debug!(
                "Prompt of {} tokens trimmed to context window of {}",
                prompt_len,
                self.state.context_window()
            );
        }
        debug!("Prefill: {} prompt tokens", self.state.len());
        self.phase = GenerationPhase::Decoding;
        Ok(())
    }

    fn step(&mut self) -> Option<InferenceResult<String>> {
        if self.steps >= self.config.max_new_tokens {
            debug!("Reached max_new_tokens ({})", self.config.max_new_tokens);
            self.finish(GenerationPhase::Completed);
            return None;
        }
        if self.cancel.is_cancelled() {
            self.finish(GenerationPhase::Cancelled);
            return None;
        }

        let logits = match self.model.next_token_logits(self.state.tokens()) {
            Ok(logits) => logits,
            Err(e) => return self.fail(e),
        };
        self.steps += 1;

        let Some(next) = argmax(&logits) else {
            return self.fail(InferenceError::ForwardPassFailure(anyhow!(
                "logits contain no comparable values"
            )));
        };

        if self.eos_token_ids.contains(&next) {
            debug!("Stop token generated: {}", next);
            self.finish(GenerationPhase::Completed);
            return None;
        }

        self.state.push(next);
        self.state.stats.emitted_tokens += 1;

        match self.tokenizer.decode(&[next]) {
            Ok(text) => Some(Ok(text)),
            Err(e) => self.fail(e),
        }
    }
}

impl Iterator for GenerationLoop {
    type Item = InferenceResult<String>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.phase {
            GenerationPhase::Idle => {
                if let Err(e) = self.prefill() {
                    return self.fail(e);
                }
                self.step()
            }
            GenerationPhase::Prefill | GenerationPhase::Decoding => self.step(),
            GenerationPhase::Completed | GenerationPhase::Cancelled | GenerationPhase::Failed => None,
        }
    }
}

impl FusedIterator for GenerationLoop {}
