//! Greedy autoregressive generation.

pub mod generation_loop;
pub mod state;

pub use generation_loop::{GenerationLoop, GenerationPhase};
pub use state::{GenerationState, GenerationStats};

#[cfg(test)]
mod tests;
