pub mod linear_algebra;
pub mod masks;

pub use linear_algebra::matmul_4d;
pub use masks::{causal_mask_bias, CAUSAL_MASK_VALUE};
