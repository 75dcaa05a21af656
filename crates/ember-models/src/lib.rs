//! Decoder families and the model service built on `ember-transformers`.
//!
//! - [`architecture`]: model-type tag parsing into a closed family enum
//! - [`models`]: Llama, Qwen, Gemma and LFM2 weight layouts and switches
//! - [`factory`]: tag + manifest → bound decoder stack
//! - [`model`]: [`BoundModel`] and [`LoadOptions`]
//! - [`service`]: [`InferenceService`] with load/unload and streaming generation
//!
//! # Example
//!
//! ```ignore
//! use ember_models::{InferenceService, LoadOptions};
//! use ember_transformers::CancellationToken;
//!
//! let service = InferenceService::from_pretrained("models/qwen2.5-0.5b", &LoadOptions::default())?;
//! let text = service.generate_text("Hello", 32, CancellationToken::never()).await?;
//! ```

pub mod architecture;
pub mod factory;
pub mod model;
pub mod models;
pub mod prompt;
pub mod service;

pub use architecture::{ArchitectureFamily, ArchitectureTag};
pub use factory::ArchitectureFactory;
pub use model::{BoundModel, LoadOptions};
pub use models::VariantSpec;
pub use prompt::{ChatMlFormatter, GemmaFormatter, PromptFormatter, RawPrompt};
pub use service::{InferenceService, ServiceState};

#[cfg(test)]
mod tests;
