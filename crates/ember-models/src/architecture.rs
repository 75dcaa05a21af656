//! Model-type tag dispatch.
//!
//! Tags come from the manifest's `model_type`. They are lower-cased and
//! hyphens become underscores before matching, so `Qwen2.5-VL`, `qwen2_5_vl`
//! and `QWEN2.5_VL` all resolve the same way.

use std::fmt;

use ember_transformers::error::{InferenceError, InferenceResult};

/// The closed set of decoder families this crate can build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArchitectureFamily {
    Llama,
    Qwen,
    Gemma,
    Lfm2,
}

impl ArchitectureFamily {
    pub fn name(&self) -> &'static str {
        match self {
            ArchitectureFamily::Llama => "llama",
            ArchitectureFamily::Qwen => "qwen",
            ArchitectureFamily::Gemma => "gemma",
            ArchitectureFamily::Lfm2 => "lfm2",
        }
    }
}

impl fmt::Display for ArchitectureFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

const VISION_TAGS: &[&str] = &["qwen2_vl", "qwen2_5_vl", "qwen2.5_vl"];
const LLAMA_PREFIXES: &[&str] = &["llama", "granite", "mistral"];
const QWEN_PREFIXES: &[&str] = &["qwen2", "qwen3"];
const GEMMA_PREFIXES: &[&str] = &["gemma2", "gemma3"];

/// A parsed model-type tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchitectureTag {
    normalized: String,
    family: ArchitectureFamily,
    vision_stub: bool,
}

impl ArchitectureTag {
    pub fn parse(tag: &str) -> InferenceResult<Self> {
        let normalized = tag.trim().to_lowercase().replace('-', "_");
        let starts = |prefixes: &[&str]| prefixes.iter().any(|p| normalized.starts_with(p));

        // Vision tags share the qwen2 prefix, so they must be checked first.
        let (family, vision_stub) = if starts(VISION_TAGS) {
            (ArchitectureFamily::Qwen, true)
        } else if normalized.starts_with("lfm2") {
            (ArchitectureFamily::Lfm2, false)
        } else if starts(GEMMA_PREFIXES) {
            (ArchitectureFamily::Gemma, false)
        } else if starts(QWEN_PREFIXES) {
            (ArchitectureFamily::Qwen, false)
        } else if starts(LLAMA_PREFIXES) {
            (ArchitectureFamily::Llama, false)
        } else {
            return Err(InferenceError::UnsupportedArchitecture(tag.to_string()));
        };

        Ok(Self {
            normalized,
            family,
            vision_stub,
        })
    }

    pub fn family(&self) -> ArchitectureFamily {
        self.family
    }

    pub fn as_str(&self) -> &str {
        &self.normalized
    }

    /// Multimodal tag whose vision branch is not built; only the text stack loads.
    pub fn is_vision_stub(&self) -> bool {
        self.vision_stub
    }

    /// Qwen3 and later add per-head Q/K norms and drop the mandatory q/k/v bias.
    pub fn is_qwen3(&self) -> bool {
        self.family == ArchitectureFamily::Qwen && self.normalized.starts_with("qwen3")
    }

    pub fn is_gemma3(&self) -> bool {
        self.family == ArchitectureFamily::Gemma && self.normalized.starts_with("gemma3")
    }
}

impl fmt::Display for ArchitectureTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.normalized)
    }
}
