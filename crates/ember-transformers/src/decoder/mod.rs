//! Decoder-only transformer stack.

pub mod builder;
pub mod layer;
pub mod stack;

pub use builder::DecoderBuilder;
pub use layer::{TokenMixer, TransformerLayer};
pub use stack::{DecoderStack, OutputHead};
