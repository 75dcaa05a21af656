use ndarray::Array4;

/// Large negative finite bias for masked positions (f16::MIN).
///
/// Finite so that a fully-masked row never produces `-inf - -inf = NaN`.
pub const CAUSAL_MASK_VALUE: f32 = -65504.0;

/// Additive causal bias `[1, 1, seq, seq]`: zero on and below the diagonal,
/// [`CAUSAL_MASK_VALUE`] above it.
pub fn causal_mask_bias(seq_len: usize) -> Array4<f32> {
    Array4::from_shape_fn((1, 1, seq_len, seq_len), |(_, _, q, k)| {
        if k > q { CAUSAL_MASK_VALUE } else { 0.0 }
    })
}
