//! Gated feed-forward network: `down(act(gate(x)) ⊙ up(x))`.
//!
//! The gate activation is SiLU or tanh-approximate GELU. GELU is evaluated in
//! f32 because the cubic term overflows half precision.

use anyhow::{anyhow, Result};
use ndarray::{Array2, Array3};

use crate::activations::{apply_activation, Activation};
use crate::linear_layer::LinearLayer;
use crate::tensor::{ComputeOp, PrecisionPolicy};

#[derive(Debug, Clone)]
pub struct SwiGluFeedForward {
    pub gate: LinearLayer,
    pub up: LinearLayer,
    pub down: LinearLayer,
    pub activation: Activation,
    policy: PrecisionPolicy,
}

impl SwiGluFeedForward {
    pub fn new(
        gate: LinearLayer,
        up: LinearLayer,
        down: LinearLayer,
        activation: Activation,
        policy: PrecisionPolicy,
    ) -> Self {
        Self { gate, up, down, activation, policy }
    }

    pub fn forward_2d(&self, hidden: &Array2<f32>) -> Result<Array2<f32>> {
        // Gate and Up can run simultaneously
        let (gate_out, up_out) = rayon::join(|| self.gate.matmul(hidden), || self.up.matmul(hidden));
        let (mut gate_out, mut up_out) = (gate_out?, up_out?);
        self.policy.cast(ComputeOp::Projection, &mut gate_out);
        self.policy.cast(ComputeOp::Projection, &mut up_out);

        let op = match self.activation {
            Activation::GeluTanh => ComputeOp::GeluActivation,
            Activation::SilU => ComputeOp::Activation,
        };
        self.policy.cast(op, &mut gate_out);
        apply_activation(&mut gate_out, self.activation);
        self.policy.cast(ComputeOp::Activation, &mut gate_out);

        let mut activated = gate_out * up_out;
        self.policy.cast(ComputeOp::Activation, &mut activated);

        let mut out = self.down.matmul(&activated)?;
        self.policy.cast(ComputeOp::Projection, &mut out);
        Ok(out)
    }

    pub fn forward(&self, hidden: &Array3<f32>) -> Result<Array3<f32>> {
        let (batch, seq, hidden_dim) = hidden.dim();
        let hidden_2d = hidden
            .to_shape((batch * seq, hidden_dim))
            .map_err(|e| anyhow!("cannot flatten MLP input: {}", e))?
            .to_owned();
        let out = self.forward_2d(&hidden_2d)?;
        out.into_shape_with_order((batch, seq, self.down.out_features()))
            .map_err(|e| anyhow!("cannot restore MLP output shape: {}", e))
    }
}
