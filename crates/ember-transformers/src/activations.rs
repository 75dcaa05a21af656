//! Activation functions, softmax and logit softcapping.

use std::str::FromStr;

use libm::{expf, tanhf};
use ndarray::{ArrayBase, Axis, DataMut, Dimension};

/// Minimum array size for parallel execution.
pub const PARALLEL_THRESHOLD: usize = 16_384;

const SQRT_2_OVER_PI: f32 = 0.7978845608;
const GELU_COEFF: f32 = 0.044715;

/// Gate activations supported by the gated MLP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Activation {
    #[default]
    SilU,
    /// Tanh-approximate GELU (`gelu_pytorch_tanh`, `gelu_new`).
    GeluTanh,
}

impl Activation {
    /// Resolves a manifest activation name. Any name containing "gelu" maps to
    /// the tanh approximation; everything else is SiLU.
    pub fn from_name(name: &str) -> Self {
        if name.to_ascii_lowercase().contains("gelu") {
            Activation::GeluTanh
        } else {
            Activation::SilU
        }
    }

    #[inline(always)]
    pub fn apply_scalar(&self, x: f32) -> f32 {
        match self {
            Activation::SilU => silu_scalar(x),
            Activation::GeluTanh => gelu_tanh_scalar(x),
        }
    }
}

impl FromStr for Activation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "silu" | "swish" => Ok(Activation::SilU),
            "gelu" | "gelu_new" | "gelu_fast" | "gelu_pytorch_tanh" => Ok(Activation::GeluTanh),
            _ => Err(format!("unknown activation function: {}", s)),
        }
    }
}

#[inline(always)]
pub fn gelu_tanh_scalar(x: f32) -> f32 {
    let x_cubed = x * x * x;
    let inner = SQRT_2_OVER_PI * (x + GELU_COEFF * x_cubed);
    0.5 * x * (1.0 + tanhf(inner))
}

#[inline(always)]
pub fn silu_scalar(x: f32) -> f32 {
    if x <= -20.0 {
        0.0
    } else if x >= 20.0 {
        x
    } else {
        x / (1.0 + expf(-x))
    }
}

/// Applies `activation` element-wise in place.
pub fn apply_activation<S, D>(arr: &mut ArrayBase<S, D>, activation: Activation)
where
    S: DataMut<Elem = f32>,
    D: Dimension,
{
    if arr.len() >= PARALLEL_THRESHOLD {
        arr.par_mapv_inplace(|x| activation.apply_scalar(x));
    } else {
        arr.mapv_inplace(|x| activation.apply_scalar(x));
    }
}

/// Applies softmax in-place to a slice.
pub fn softmax_inplace(slice: &mut [f32]) {
    if slice.is_empty() {
        return;
    }

    let max = slice.iter().fold(f32::NEG_INFINITY, |a, &b| a.max(b));

    let mut sum = 0.0;
    for v in slice.iter_mut() {
        *v = (*v - max).exp();
        sum += *v;
    }

    if sum > 0.0 {
        let scale = 1.0 / sum;
        for v in slice.iter_mut() {
            *v *= scale;
        }
    }
}

/// Applies softmax along the last axis of an array of any rank.
pub fn softmax_last_axis<S, D>(arr: &mut ArrayBase<S, D>)
where
    S: DataMut<Elem = f32>,
    D: Dimension,
{
    let last = Axis(arr.ndim().saturating_sub(1));
    for mut lane in arr.lanes_mut(last) {
        if let Some(slice) = lane.as_slice_mut() {
            softmax_inplace(slice);
        } else {
            let max = lane.iter().fold(f32::NEG_INFINITY, |a, &b| a.max(b));
            lane.mapv_inplace(|x| (x - max).exp());
            let sum = lane.sum();
            if sum > 0.0 {
                lane /= sum;
            }
        }
    }
}

/// Bounds values to `[-cap, cap]` with `tanh(x / cap) * cap`. `cap <= 0` is a no-op.
pub fn softcap_inplace<S, D>(arr: &mut ArrayBase<S, D>, cap: f32)
where
    S: DataMut<Elem = f32>,
    D: Dimension,
{
    if cap <= 0.0 {
        return;
    }
    arr.mapv_inplace(|x| tanhf(x / cap) * cap);
}
