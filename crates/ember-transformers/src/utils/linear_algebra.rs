use anyhow::{anyhow, Result};
use ndarray::{Array4, Zip};

/// Batched matmul over the two leading axes: `[b, h, m, k] × [b, h, k, n] -> [b, h, m, n]`.
///
/// Batches run in parallel; heads within a batch run sequentially.
pub fn matmul_4d(a: &Array4<f32>, b: &Array4<f32>) -> Result<Array4<f32>> {
    let (batch, heads, seq1, dim) = a.dim();
    let (b_batch, b_heads, b_dim, seq2) = b.dim();
    if batch != b_batch || heads != b_heads || dim != b_dim {
        return Err(anyhow!(
            "matmul_4d shape mismatch: {:?} x {:?}",
            a.shape(),
            b.shape()
        ));
    }

    let mut output = Array4::<f32>::zeros((batch, heads, seq1, seq2));

    Zip::from(output.outer_iter_mut())
        .and(a.outer_iter())
        .and(b.outer_iter())
        .par_for_each(|mut out_b, a_b, b_b| {
            Zip::from(out_b.outer_iter_mut())
                .and(a_b.outer_iter())
                .and(b_b.outer_iter())
                .for_each(|mut out_h, a_h, b_h| {
                    out_h.assign(&a_h.dot(&b_h));
                });
        });

    Ok(output)
}
