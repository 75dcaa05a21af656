use super::*;
use crate::normalization::NormStyle;
use crate::rope::DEFAULT_ROPE_CACHE;
use crate::tensor::DType;
use crate::utils::causal_mask_bias;
use approx::assert_abs_diff_eq;
use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn random_matrix(rng: &mut StdRng, rows: usize, cols: usize, scale: f32) -> Array2<f32> {
    Array2::from_shape_fn((rows, cols), |_| rng.gen_range(-1.0..1.0) * scale)
}

fn build(
    hidden: usize,
    heads: usize,
    kv_heads: usize,
    head_dim: usize,
    softcap: f32,
    weight_scale: f32,
    seed: u64,
) -> SelfAttention {
    let mut rng = StdRng::seed_from_u64(seed);
    let policy = PrecisionPolicy::default();
    SelfAttention::new(
        LinearLayer::new(random_matrix(&mut rng, heads * head_dim, hidden, weight_scale), None),
        LinearLayer::new(random_matrix(&mut rng, kv_heads * head_dim, hidden, weight_scale), None),
        LinearLayer::new(random_matrix(&mut rng, kv_heads * head_dim, hidden, weight_scale), None),
        LinearLayer::new(random_matrix(&mut rng, hidden, heads * head_dim, weight_scale), None),
        None,
        heads,
        kv_heads,
        head_dim,
        softcap,
        Arc::new(RoPE::new(head_dim, DEFAULT_ROPE_CACHE, 10000.0, policy)),
        policy,
    )
}

fn random_input(seed: u64, batch: usize, seq: usize, hidden: usize) -> Array3<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    Array3::from_shape_fn((batch, seq, hidden), |_| rng.gen_range(-1.0..1.0))
}

/// Straightforward per-head loop implementation used as the oracle.
fn naive_attention(attn: &SelfAttention, x: &Array3<f32>) -> Array3<f32> {
    let (batch, seq, _) = x.dim();
    let d = attn.head_dim;
    let q = split_heads(&attn.q_proj.forward_3d(x).unwrap(), attn.num_heads, d).unwrap();
    let k = split_heads(&attn.k_proj.forward_3d(x).unwrap(), attn.num_kv_heads, d).unwrap();
    let v = split_heads(&attn.v_proj.forward_3d(x).unwrap(), attn.num_kv_heads, d).unwrap();
    let (q, k) = attn.rope.apply_4d(&q, &k, 0).unwrap();

    let groups = attn.num_heads / attn.num_kv_heads;
    let mut ctx = Array4::<f32>::zeros((batch, attn.num_heads, seq, d));
    for b in 0..batch {
        for h in 0..attn.num_heads {
            let kvh = h / groups;
            for i in 0..seq {
                let mut weights: Vec<f32> = (0..=i)
                    .map(|j| {
                        let dot: f32 = (0..d).map(|t| q[[b, h, i, t]] * k[[b, kvh, j, t]]).sum();
                        let s = dot / (d as f32).sqrt();
                        if attn.logit_softcap > 0.0 {
                            (s / attn.logit_softcap).tanh() * attn.logit_softcap
                        } else {
                            s
                        }
                    })
                    .collect();
                let max = weights.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
                let sum: f32 = weights.iter_mut().map(|w| {
                    *w = (*w - max).exp();
                    *w
                }).sum();
                for (j, w) in weights.iter().enumerate() {
                    for t in 0..d {
                        ctx[[b, h, i, t]] += w / sum * v[[b, kvh, j, t]];
                    }
                }
            }
        }
    }
    attn.o_proj.forward_3d(&merge_heads(&ctx).unwrap()).unwrap()
}

#[test]
fn test_gqa_query_heads_map_to_kv_blocks() {
    // 8 query heads over 2 kv heads
    let groups = 8 / 2;
    for q in 0..4 {
        assert_eq!(kv_head_for_query_head(q, groups), 0);
    }
    for q in 4..8 {
        assert_eq!(kv_head_for_query_head(q, groups), 1);
    }

    let kv = Array4::from_shape_fn((1, 2, 3, 4), |(_, h, s, d)| (h * 100 + s * 10 + d) as f32);
    let expanded = repeat_kv(&kv, groups);
    assert_eq!(expanded.dim(), (1, 8, 3, 4));
    for q in 0..8 {
        let source = kv_head_for_query_head(q, groups);
        assert_eq!(
            expanded.slice(s![0, q, .., ..]),
            kv.slice(s![0, source, .., ..]),
            "query head {} should read kv head {}",
            q,
            source
        );
    }
}

#[test]
fn test_repeat_kv_skips_when_no_grouping() {
    let kv = Array4::from_shape_fn((1, 3, 2, 2), |(_, h, s, d)| (h + s + d) as f32);
    assert_eq!(repeat_kv(&kv, 1), kv);
}

#[test]
fn test_split_merge_heads_inverse() {
    let x = random_input(1, 2, 3, 8);
    let heads = split_heads(&x, 2, 4).unwrap();
    assert_eq!(heads.dim(), (2, 2, 3, 4));
    assert_eq!(heads[[1, 1, 2, 3]], x[[1, 2, 7]]);
    assert_eq!(merge_heads(&heads).unwrap(), x);
}

#[test]
fn test_forward_matches_naive_gqa() {
    let attn = build(8, 4, 2, 4, 0.0, 0.5, 7);
    let x = random_input(11, 2, 5, 8);
    let y = attn.forward(&x, &causal_mask_bias(5)).unwrap();
    let expected = naive_attention(&attn, &x);
    assert_eq!(y.dim(), (2, 5, 8));
    for (a, b) in y.iter().zip(expected.iter()) {
        assert_abs_diff_eq!(a, b, epsilon = 1e-4);
    }
}

#[test]
fn test_forward_matches_naive_with_softcap() {
    let attn = build(8, 2, 1, 4, 2.0, 2.0, 3);
    let x = random_input(5, 1, 4, 8);
    let y = attn.forward(&x, &causal_mask_bias(4)).unwrap();
    let expected = naive_attention(&attn, &x);
    for (a, b) in y.iter().zip(expected.iter()) {
        assert_abs_diff_eq!(a, b, epsilon = 1e-4);
    }
}

#[test]
fn test_softcapped_scores_are_bounded() {
    let cap = 3.0;
    let attn = build(8, 2, 2, 4, cap, 1.0, 9);
    let mut rng = StdRng::seed_from_u64(4);
    let q = Array4::from_shape_fn((1, 2, 6, 4), |_| rng.gen_range(-50.0..50.0));
    let k = Array4::from_shape_fn((1, 2, 6, 4), |_| rng.gen_range(-50.0..50.0));
    let scores = attn.capped_scores(&q, &k).unwrap();
    assert!(scores.iter().all(|&v| (-cap..=cap).contains(&v)));
    assert!(scores.iter().any(|&v| v.abs() > cap * 0.9));
}

#[test]
fn test_causality_prefix_unchanged_by_later_tokens() {
    let attn = build(8, 2, 1, 4, 0.0, 0.5, 21);
    let x = random_input(2, 1, 6, 8);
    let full = attn.forward(&x, &causal_mask_bias(6)).unwrap();
    let prefix = x.slice(s![.., 0..3, ..]).to_owned();
    let short = attn.forward(&prefix, &causal_mask_bias(3)).unwrap();
    for i in 0..3 {
        for h in 0..8 {
            assert_abs_diff_eq!(full[[0, i, h]], short[[0, i, h]], epsilon = 1e-5);
        }
    }
}

#[test]
fn test_qk_norm_is_applied_before_rope() {
    let policy = PrecisionPolicy::default();
    let mut attn = build(8, 2, 1, 4, 0.0, 0.5, 13);
    let plain = attn.forward(&random_input(3, 1, 3, 8), &causal_mask_bias(3)).unwrap();
    attn.q_norm = Some(RMSNorm::new(Array1::zeros(4), 1e-6, NormStyle::UnitOffset, policy));
    attn.k_norm = Some(RMSNorm::new(Array1::zeros(4), 1e-6, NormStyle::UnitOffset, policy));
    let normed = attn.forward(&random_input(3, 1, 3, 8), &causal_mask_bias(3)).unwrap();
    assert!(normed.iter().all(|v| v.is_finite()));
    assert!(plain.iter().zip(normed.iter()).any(|(a, b)| (a - b).abs() > 1e-6));
}

#[test]
fn test_half_precision_forward_is_finite() {
    let policy = PrecisionPolicy::new(DType::F16);
    let mut attn = build(8, 2, 1, 4, 0.0, 0.5, 17);
    attn.policy = policy;
    attn.rope = Arc::new(RoPE::new(4, 16, 10000.0, policy));
    let y = attn.forward(&random_input(8, 1, 4, 8), &causal_mask_bias(4)).unwrap();
    assert!(y.iter().all(|v| v.is_finite()));
}

#[test]
fn test_mask_shape_mismatch_errors() {
    let attn = build(8, 2, 1, 4, 0.0, 0.5, 1);
    let x = random_input(1, 1, 4, 8);
    assert!(attn.forward(&x, &causal_mask_bias(3)).is_err());
}
