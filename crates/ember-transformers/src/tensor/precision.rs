//! Explicit compute-precision table.
//!
//! Every cast in the forward pass goes through [`PrecisionPolicy`], so the
//! operations that must stay in f32 are listed in one place.

use ndarray::{ArrayBase, DataMut, Dimension};

use super::DType;

/// Numeric operations that have a precision rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComputeOp {
    Embedding,
    Projection,
    NormOutput,
    RmsNormVariance,
    RotaryEmbedding,
    AttentionScores,
    AttentionSoftmax,
    AttentionContext,
    Activation,
    GeluActivation,
    Softcap,
    Residual,
    Convolution,
    FinalLogits,
}

impl ComputeOp {
    /// Operations pinned to f32 regardless of the working dtype.
    pub fn requires_f32(&self) -> bool {
        matches!(
            self,
            ComputeOp::AttentionScores
                | ComputeOp::AttentionSoftmax
                | ComputeOp::RmsNormVariance
                | ComputeOp::FinalLogits
                | ComputeOp::Softcap
                | ComputeOp::GeluActivation
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PrecisionPolicy {
    working: DType,
}

impl PrecisionPolicy {
    pub fn new(working: DType) -> Self {
        Self { working }
    }

    pub fn working_dtype(&self) -> DType {
        self.working
    }

    pub fn precision_for(&self, op: ComputeOp) -> DType {
        if op.requires_f32() {
            DType::F32
        } else {
            self.working
        }
    }

    /// Rounds `array` to the precision `op` runs in.
    pub fn cast<S, D>(&self, op: ComputeOp, array: &mut ArrayBase<S, D>)
    where
        S: DataMut<Elem = f32>,
        D: Dimension,
    {
        self.precision_for(op).round_array(array);
    }

    /// Rounds `array` back to the working dtype after an f32-pinned step.
    pub fn to_working<S, D>(&self, array: &mut ArrayBase<S, D>)
    where
        S: DataMut<Elem = f32>,
        D: Dimension,
    {
        self.working.round_array(array);
    }

    #[inline]
    pub fn round_scalar(&self, op: ComputeOp, x: f32) -> f32 {
        self.precision_for(op).round(x)
    }
}
