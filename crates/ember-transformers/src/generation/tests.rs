use std::sync::{Arc, Mutex};

use anyhow::anyhow;
use ndarray::Array1;

use super::*;
use crate::common::{CancellationToken, GenerationConfig};
use crate::error::{InferenceError, InferenceResult};
use crate::tokenizer::TextTokenizer;
use crate::traits::CausalLm;

/// Emits `script[step]` as the argmax and records every window it is shown.
struct ScriptedModel {
    script: Vec<u32>,
    vocab: usize,
    fail_at: Option<usize>,
    seen: Mutex<Vec<Vec<u32>>>,
}

impl ScriptedModel {
    fn new(script: Vec<u32>) -> Self {
        Self { script, vocab: 16, fail_at: None, seen: Mutex::new(Vec::new()) }
    }

    fn failing_at(mut self, step: usize) -> Self {
        self.fail_at = Some(step);
        self
    }

    fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    fn window(&self, call: usize) -> Vec<u32> {
        self.seen.lock().unwrap()[call].clone()
    }
}

impl CausalLm for ScriptedModel {
    fn vocab_size(&self) -> usize {
        self.vocab
    }

    fn next_token_logits(&self, tokens: &[u32]) -> InferenceResult<Array1<f32>> {
        let mut seen = self.seen.lock().unwrap();
        let step = seen.len();
        seen.push(tokens.to_vec());
        if self.fail_at == Some(step) {
            return Err(InferenceError::ForwardPassFailure(anyhow!("scripted failure")));
        }
        let mut logits = Array1::zeros(self.vocab);
        logits[self.script[step % self.script.len()] as usize] = 1.0;
        Ok(logits)
    }
}

/// Whitespace-separated integers in, `<id>` fragments out.
struct NumberTokenizer;

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

fn run(
    model: &Arc<ScriptedModel>,
    prompt: &str,
    eos: Vec<u32>,
    config: GenerationConfig,
    cancel: CancellationToken,
) -> GenerationLoop {
    GenerationLoop::new(model.clone(), Arc::new(NumberTokenizer), prompt, eos, config, cancel)
}

fn config(max_new_tokens: usize, context_window: usize) -> GenerationConfig {
    GenerationConfig { max_new_tokens, context_window }
}

#[test]
fn test_emits_until_max_new_tokens() {
    let model = Arc::new(ScriptedModel::new(vec![4, 5, 6]));
    let mut generation = run(&model, "1 2 3", vec![], config(4, 4096), CancellationToken::never());
    assert_eq!(generation.phase(), GenerationPhase::Idle);

    let fragments: Vec<String> = generation.by_ref().map(|r| r.unwrap()).collect();
    assert_eq!(fragments, vec!["<4>", "<5>", "<6>", "<4>"]);
    assert_eq!(generation.phase(), GenerationPhase::Completed);
    assert_eq!(generation.stats().emitted_tokens, 4);
    assert_eq!(generation.stats().prompt_tokens, 3);
    assert!(generation.stats().is_finished());
    assert_eq!(model.calls(), 4);
    assert_eq!(model.window(3), vec![1, 2, 3, 4, 5, 6]);
    assert!(generation.next().is_none());
}

#[test]
fn test_eos_is_neither_emitted_nor_counted() {
    let model = Arc::new(ScriptedModel::new(vec![5, 6, 9, 7]));
    let mut generation = run(&model, "1", vec![9, 11], config(10, 4096), CancellationToken::never());

    assert_eq!(generation.next().unwrap().unwrap(), "<5>");
    assert_eq!(generation.next().unwrap().unwrap(), "<6>");
    assert!(generation.next().is_none());
    assert_eq!(generation.phase(), GenerationPhase::Completed);
    assert_eq!(generation.stats().emitted_tokens, 2);
    assert_eq!(generation.state().last(), Some(6));
    assert_eq!(generation.state().len(), 3);
    assert_eq!(model.calls(), 3);
}

#[test]
fn test_cancellation_checked_between_steps() {
    let model = Arc::new(ScriptedModel::new(vec![2]));
    let (token, handle) = CancellationToken::new();
    let mut generation = run(&model, "1", vec![], config(10, 4096), token);

    assert!(generation.next().unwrap().is_ok());
    handle.cancel();
    assert!(generation.next().is_none());
    assert_eq!(generation.phase(), GenerationPhase::Cancelled);
    assert_eq!(generation.stats().emitted_tokens, 1);
    assert_eq!(model.calls(), 1);

    // the model is untouched and serves a fresh generation
    let mut again = run(&model, "1", vec![], config(1, 4096), CancellationToken::never());
    assert_eq!(again.next().unwrap().unwrap(), "<2>");
}

#[test]
fn test_already_cancelled_never_runs_forward() {
    let model = Arc::new(ScriptedModel::new(vec![2]));
    let mut generation = run(&model, "1 2", vec![], config(10, 4096), CancellationToken::already_cancelled());
    assert!(generation.next().is_none());
    assert_eq!(generation.phase(), GenerationPhase::Cancelled);
    assert_eq!(model.calls(), 0);
}

#[test]
fn test_small_window_evicts_oldest_first() {
    let model = Arc::new(ScriptedModel::new(vec![7, 8, 9, 10, 11]));
    let generation = run(&model, "1 2 3", vec![], config(5, 4), CancellationToken::never());
    assert_eq!(generation.count(), 5);

    let lengths: Vec<usize> = (0..5).map(|i| model.window(i).len()).collect();
    assert_eq!(lengths, vec![3, 4, 4, 4, 4]);
    assert_eq!(model.window(1), vec![1, 2, 3, 7]);
    assert_eq!(model.window(2), vec![2, 3, 7, 8]);
    assert_eq!(model.window(4), vec![7, 8, 9, 10]);
}

#[test]
fn test_default_window_holds_exactly_4096() {
    let model = Arc::new(ScriptedModel::new(vec![3]));
    let prompt: Vec<String> = (0..4095).map(|i| (i % 13).to_string()).collect();
    let prompt_ids: Vec<u32> = (0..4095).map(|i| (i % 13) as u32).collect();
    let generation = run(&model, &prompt.join(" "), vec![], GenerationConfig::with_max_new_tokens(4), CancellationToken::never());
    assert_eq!(generation.count(), 4);

    assert_eq!(model.window(0).len(), 4095);
    for call in 1..4 {
        assert_eq!(model.window(call).len(), 4096);
    }
    assert_eq!(model.window(2)[0], prompt_ids[1]);
    assert_eq!(model.window(3)[0], prompt_ids[2]);
}

#[test]
fn test_long_prompt_trimmed_to_window() {
    let model = Arc::new(ScriptedModel::new(vec![1]));
    let mut generation = run(&model, "1 2 3 4 5 6", vec![], config(1, 4), CancellationToken::never());
    generation.next().unwrap().unwrap();
    assert_eq!(model.window(0), vec![3, 4, 5, 6]);
    assert_eq!(generation.stats().prompt_tokens, 6);
    assert_eq!(generation.stats().evicted_tokens, 3);
}

#[test]
fn test_forward_failure_ends_stream_after_delivered_fragments() {
    let model = Arc::new(ScriptedModel::new(vec![4]).failing_at(2));
    let mut generation = run(&model, "1", vec![], config(10, 4096), CancellationToken::never());
    assert_eq!(generation.next().unwrap().unwrap(), "<4>");
    assert_eq!(generation.next().unwrap().unwrap(), "<4>");
    assert!(matches!(generation.next(), Some(Err(InferenceError::ForwardPassFailure(_)))));
    assert!(generation.next().is_none());
    assert_eq!(generation.phase(), GenerationPhase::Failed);
    assert_eq!(generation.stats().emitted_tokens, 2);
}

#[test]
fn test_empty_prompt_fails() {
    let model = Arc::new(ScriptedModel::new(vec![4]));
    let mut generation = run(&model, "   ", vec![], config(10, 4096), CancellationToken::never());
    assert!(matches!(generation.next(), Some(Err(InferenceError::Tokenizer(_)))));
    assert_eq!(generation.phase(), GenerationPhase::Failed);
    assert_eq!(model.calls(), 0);
}

#[test]
fn test_zero_max_new_tokens_completes_immediately() {
    let model = Arc::new(ScriptedModel::new(vec![4]));
    let mut generation = run(&model, "1 2", vec![], config(0, 4096), CancellationToken::never());
    assert!(generation.next().is_none());
    assert_eq!(generation.phase(), GenerationPhase::Completed);
    assert_eq!(model.calls(), 0);
}

#[test]
fn test_repeated_runs_are_identical() {
    let collect = || {
        let model = Arc::new(ScriptedModel::new(vec![3, 1, 4, 1, 5]));
        run(&model, "2 7", vec![5], config(8, 4096), CancellationToken::never())
            .map(|r| r.unwrap())
            .collect::<String>()
    };
    let first = collect();
    assert_eq!(first, "<3><1><4><1>");
    assert_eq!(first, collect());
}

#[test]
fn test_stats_rate() {
    let mut stats = GenerationStats::default();
    assert!(stats.tokens_per_second().is_none());
    let start = std::time::Instant::now();
    stats.started_at = Some(start);
    stats.finished_at = Some(start + std::time::Duration::from_secs(2));
    stats.emitted_tokens = 10;
    assert_eq!(stats.tokens_per_second(), Some(5.0));
}
