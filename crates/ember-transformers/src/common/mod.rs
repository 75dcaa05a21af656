pub mod cancellation;
pub mod sampling;

use serde::{Deserialize, Serialize};

pub use cancellation::{CancellationHandle, CancellationToken};
pub use sampling::argmax;

/// Tokens kept in the sliding generation window.
pub const DEFAULT_CONTEXT_WINDOW: usize = 4096;

fn default_max_new_tokens() -> usize { 256 }
fn default_context_window() -> usize { DEFAULT_CONTEXT_WINDOW }

/// Per-call generation settings. Decoding is always greedy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationConfig {
    #[serde(default = "default_max_new_tokens")]
    pub max_new_tokens: usize,
    /// Maximum tokens fed to each forward pass; the oldest are evicted first.
    #[serde(default = "default_context_window")]
    pub context_window: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_new_tokens: default_max_new_tokens(),
            context_window: default_context_window(),
        }
    }
}

impl GenerationConfig {
    pub fn with_max_new_tokens(max_new_tokens: usize) -> Self {
        Self {
            max_new_tokens,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_config_defaults_from_json() {
        let config: GenerationConfig = serde_json::from_str(r#"{"max_new_tokens": 8}"#).unwrap();
        assert_eq!(config.max_new_tokens, 8);
        assert_eq!(config.context_window, 4096);
        assert_eq!(GenerationConfig::default().context_window, DEFAULT_CONTEXT_WINDOW);
    }
}
