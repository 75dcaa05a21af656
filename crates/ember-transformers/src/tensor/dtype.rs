use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, Result};
use half::{bf16, f16};
use ndarray::{ArrayBase, DataMut, Dimension};

/// Working element type of a loaded model.
///
/// Tensors are always stored as `f32`. Selecting a narrower dtype rounds values
/// through the narrower format at every cast point, so overflow and precision
/// loss behave as they would on a half-precision device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DType {
    /// Standard 32-bit float
    #[default]
    F32,
    /// 16-bit float (IEEE 754 half-precision)
    F16,
    /// 16-bit brain float (more range, less precision than F16)
    BF16,
}

impl DType {
    /// Maps a safetensors::Dtype to our internal DType.
    pub fn from_safetensors(dtype: safetensors::Dtype) -> Result<Self> {
        match dtype {
            safetensors::Dtype::F32 => Ok(DType::F32),
            safetensors::Dtype::F16 => Ok(DType::F16),
            safetensors::Dtype::BF16 => Ok(DType::BF16),
            _ => Err(anyhow!("Unsupported or unknown safetensors DType: {:?}", dtype)),
        }
    }

    pub fn size_of(&self) -> usize {
        match self {
            DType::F32 => 4,
            DType::F16 | DType::BF16 => 2,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DType::F32 => "f32",
            DType::F16 => "f16",
            DType::BF16 => "bf16",
        }
    }

    /// Rounds one value through this dtype.
    #[inline(always)]
    pub fn round(&self, x: f32) -> f32 {
        match self {
            DType::F32 => x,
            DType::F16 => f16::from_f32(x).to_f32(),
            DType::BF16 => bf16::from_f32(x).to_f32(),
        }
    }

    /// Rounds every element of `array` in place. No-op for F32.
    pub fn round_array<S, D>(&self, array: &mut ArrayBase<S, D>)
    where
        S: DataMut<Elem = f32>,
        D: Dimension,
    {
        if *self == DType::F32 {
            return;
        }
        let dtype = *self;
        array.mapv_inplace(|x| dtype.round(x));
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "f32" | "float32" | "fp32" => Ok(DType::F32),
            "f16" | "float16" | "fp16" | "half" => Ok(DType::F16),
            "bf16" | "bfloat16" => Ok(DType::BF16),
            other => Err(anyhow!("unknown dtype '{}'", other)),
        }
    }
}
