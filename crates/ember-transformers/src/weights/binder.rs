//! Binds declared parameters to checkpoint tensors by exact name and shape.

use anyhow::anyhow;
use ndarray::{Array1, Array2, Array3, ArrayD, IxDyn};

use crate::error::{InferenceError, InferenceResult};
use crate::tensor::PrecisionPolicy;
use crate::weights::WeightTable;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BindingMode {
    /// Any missing or mis-shaped parameter aborts the load.
    #[default]
    Strict,
    /// Missing or mis-shaped parameters are logged and default-initialised.
    Lenient,
}

/// Value used for a parameter that lenient binding could not fill.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DefaultInit {
    Zeros,
    Ones,
    Constant(f32),
}

impl DefaultInit {
    fn value(&self) -> f32 {
        match self {
            DefaultInit::Zeros => 0.0,
            DefaultInit::Ones => 1.0,
            DefaultInit::Constant(v) => *v,
        }
    }
}

/// Outcome of a load, including every lenient downgrade.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadReport {
    pub bound: usize,
    /// Parameters left at their default initialisation.
    pub defaulted: Vec<String>,
    /// Human-readable reason for each default.
    pub warnings: Vec<String>,
    /// Checkpoint tensors nothing asked for.
    pub unused: Vec<String>,
}

impl LoadReport {
    pub fn is_clean(&self) -> bool {
        self.defaulted.is_empty()
    }
}

pub struct ParameterBinder {
    table: WeightTable,
    mode: BindingMode,
    policy: PrecisionPolicy,
    report: LoadReport,
}

impl ParameterBinder {
    pub fn new(table: WeightTable, mode: BindingMode, policy: PrecisionPolicy) -> Self {
        Self {
            table,
            mode,
            policy,
            report: LoadReport::default(),
        }
    }

    pub fn mode(&self) -> BindingMode {
        self.mode
    }

    pub fn policy(&self) -> PrecisionPolicy {
        self.policy
    }

    pub fn report(&self) -> &LoadReport {
        &self.report
    }

    /// Binds `name` with the expected `shape`, rounding to the working dtype.
    pub fn bind(&mut self, name: &str, shape: &[usize], init: DefaultInit) -> InferenceResult<ArrayD<f32>> {
        let failure = match self.table.take(name) {
            Some(mut tensor) if tensor.shape() == shape => {
                self.policy.to_working(&mut tensor);
                self.report.bound += 1;
                return Ok(tensor);
            }
            Some(tensor) => InferenceError::WeightShapeMismatch {
                name: name.to_string(),
                expected: shape.to_vec(),
                actual: tensor.shape().to_vec(),
            },
            None => match self.table.unsupported_dtype(name) {
                Some(dtype) => {
                    return Err(InferenceError::UnsupportedDType {
                        name: name.to_string(),
                        dtype: dtype.to_string(),
                    })
                }
                None => InferenceError::MissingWeight(name.to_string()),
            },
        };

        match self.mode {
            BindingMode::Strict => Err(failure),
            BindingMode::Lenient => {
                log::warn!("{}; using default initialisation", failure);
                self.report.defaulted.push(name.to_string());
                self.report.warnings.push(failure.to_string());
                Ok(ArrayD::from_elem(IxDyn(shape), init.value()))
            }
        }
    }

    pub fn bind_1d(&mut self, name: &str, len: usize, init: DefaultInit) -> InferenceResult<Array1<f32>> {
        into_dim(self.bind(name, &[len], init)?, name)
    }

    pub fn bind_2d(&mut self, name: &str, shape: [usize; 2], init: DefaultInit) -> InferenceResult<Array2<f32>> {
        into_dim(self.bind(name, &shape, init)?, name)
    }

    pub fn bind_3d(&mut self, name: &str, shape: [usize; 3], init: DefaultInit) -> InferenceResult<Array3<f32>> {
        into_dim(self.bind(name, &shape, init)?, name)
    }

    /// Ends binding and reports which checkpoint tensors went unused.
    pub fn finish(mut self) -> LoadReport {
        self.report.unused = self.table.names();
        if !self.report.unused.is_empty() {
            log::debug!("{} checkpoint tensors were not bound", self.report.unused.len());
        }
        if !self.report.defaulted.is_empty() {
            log::warn!(
                "{} parameter(s) left at default initialisation",
                self.report.defaulted.len()
            );
        }
        self.report
    }
}

fn into_dim<D: ndarray::Dimension>(array: ArrayD<f32>, name: &str) -> InferenceResult<ndarray::Array<f32, D>> {
    array
        .into_dimensionality::<D>()
        .map_err(|e| InferenceError::Checkpoint(anyhow!("tensor '{}' has wrong rank: {}", name, e)))
}
