//! Element types and the per-operation compute-precision policy.

pub mod dtype;
pub mod precision;

pub use dtype::DType;
pub use precision::{ComputeOp, PrecisionPolicy};
