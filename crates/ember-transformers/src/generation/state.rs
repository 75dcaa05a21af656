use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Timing and counters for one generation call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationStats {
    pub started_at: Option<Instant>,
    pub finished_at: Option<Instant>,
    pub prompt_tokens: usize,
    /// Tokens yielded to the consumer. EOS is never counted.
    pub emitted_tokens: usize,
    /// Tokens dropped from the front of the window.
    pub evicted_tokens: usize,
}

impl GenerationStats {
    pub fn elapsed(&self) -> Option<Duration> {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => Some(end.saturating_duration_since(start)),
            (Some(start), None) => Some(start.elapsed()),
            _ => None,
        }
    }

    pub fn tokens_per_second(&self) -> Option<f64> {
        let secs = self.elapsed()?.as_secs_f64();
        (secs > 0.0).then(|| self.emitted_tokens as f64 / secs)
    }

    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }
}

/// Token window (prompt + generated) for one generation call.
///
/// Holds at most `context_window` tokens; pushing past the cap evicts from
/// the front.
#[derive(Debug, Clone)]
pub struct GenerationState {
    tokens: VecDeque<u32>,
    context_window: usize,
    pub stats: GenerationStats,
}

impl GenerationState {
    pub fn new(context_window: usize) -> Self {
        Self {
            tokens: VecDeque::new(),
            context_window: context_window.max(1),
            stats: GenerationStats::default(),
        }
    }

    /// Seeds the window with the prompt, keeping its newest tokens if it is too long.
    pub fn load_prompt(&mut self, prompt: Vec<u32>) {
        self.stats.prompt_tokens = prompt.len();
        self.tokens = prompt.into();
        self.enforce_window();
    }

    pub fn push(&mut self, token: u32) {
        self.tokens.push_back(token);
        self.enforce_window();
    }

    fn enforce_window(&mut self) {
        while self.tokens.len() > self.context_window {
            self.tokens.pop_front();
            self.stats.evicted_tokens += 1;
        }
    }

    /// The current window as one slice.
    pub fn tokens(&mut self) -> &[u32] {
        self.tokens.make_contiguous()
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn context_window(&self) -> usize {
        self.context_window
    }

    pub fn last(&self) -> Option<u32> {
        self.tokens.back().copied()
    }
}
