//! Prompt formatters, applied once before prefill.
//!
//! Only single user turns are rendered; multi-turn chat templating is left
//! to callers.

/// Turns a user message into the text the tokenizer sees.
pub trait PromptFormatter: Send + Sync {
    fn format(&self, user_message: &str) -> String;
}

/// Passes the message through unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawPrompt;

impl PromptFormatter for RawPrompt {
    fn format(&self, user_message: &str) -> String {
        user_message.to_string()
    }
}

/// ChatML, as used by Qwen and LFM2 instruct checkpoints.
///
/// ```text
/// <|im_start|>system
/// {system}<|im_end|>
/// <|im_start|>user
/// {message}<|im_end|>
/// <|im_start|>assistant
/// ```
#[derive(Debug, Clone, Default)]
pub struct ChatMlFormatter {
    pub system: Option<String>,
}

impl ChatMlFormatter {
    const IM_START: &'static str = "<|im_start|>";
    const IM_END: &'static str = "<|im_end|>";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_system(system: impl Into<String>) -> Self {
        Self {
            system: Some(system.into()),
        }
    }
}

impl PromptFormatter for ChatMlFormatter {
    fn format(&self, user_message: &str) -> String {
        let mut prompt = String::new();
        if let Some(system) = &self.system {
            prompt.push_str(&format!("{}system\n{}{}\n", Self::IM_START, system, Self::IM_END));
        }
        prompt.push_str(&format!(
            "{}user\n{}{}\n{}assistant\n",
            Self::IM_START,
            user_message,
            Self::IM_END,
            Self::IM_START
        ));
        prompt
    }
}

/// Gemma turn markers. Gemma has no system role.
#[derive(Debug, Clone, Copy, Default)]
pub struct GemmaFormatter;

impl PromptFormatter for GemmaFormatter {
    fn format(&self, user_message: &str) -> String {
        format!(
            "<start_of_turn>user\n{}<end_of_turn>\n<start_of_turn>model\n",
            user_message
        )
    }
}
