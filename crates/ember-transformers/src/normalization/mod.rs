pub mod rms_norm;

pub use rms_norm::{NormStyle, RMSNorm};
