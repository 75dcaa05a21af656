use ndarray::ArrayBase;
use ndarray::{Data, Ix1};

/// Index of the largest logit. Ties resolve to the lowest index; NaN entries
/// are never selected. Returns `None` when no finite-or-infinite value exists.
pub fn argmax<S>(logits: &ArrayBase<S, Ix1>) -> Option<u32>
where
    S: Data<Elem = f32>,
{
    let mut best: Option<(usize, f32)> = None;
    for (i, &v) in logits.iter().enumerate() {
        if v.is_nan() {
            continue;
        }
        match best {
            Some((_, b)) if v <= b => {}
            _ => best = Some((i, v)),
        }
    }
    best.map(|(i, _)| i as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr1, Array1};

    #[test]
    fn test_argmax_basic() {
        assert_eq!(argmax(&arr1(&[0.1f32, 2.0, -1.0])), Some(1));
    }

    #[test]
    fn test_argmax_ties_pick_first() {
        assert_eq!(argmax(&arr1(&[1.0f32, 3.0, 3.0, 3.0])), Some(1));
        assert_eq!(argmax(&arr1(&[5.0f32, 5.0])), Some(0));
    }

    #[test]
    fn test_argmax_skips_nan() {
        assert_eq!(argmax(&arr1(&[f32::NAN, -2.0, -3.0])), Some(1));
        assert_eq!(argmax(&arr1(&[f32::NAN, f32::NAN])), None);
        assert_eq!(argmax(&Array1::<f32>::zeros(0)), None);
    }
}
