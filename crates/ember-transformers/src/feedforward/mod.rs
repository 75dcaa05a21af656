pub mod swiglu;

pub use swiglu::SwiGluFeedForward;
