//! Checkpoint reading and name-based parameter binding.

pub mod binder;
pub mod weight_table;

pub use binder::{BindingMode, DefaultInit, LoadReport, ParameterBinder};
pub use weight_table::WeightTable;
