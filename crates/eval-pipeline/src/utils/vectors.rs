//! Vector math shared by the in-process index and the fallback embedder.

/// Cosine similarity of two equal-length vectors. `None` when the lengths
/// differ or either vector has zero magnitude; the retrieval layer treats
/// an unscorable pair as "no match" rather than an error.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }

    let mut dot = 0.0f32;
    let mut mag_a = 0.0f32;
    let mut mag_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        mag_a += x * x;
        mag_b += y * y;
    }
    if mag_a == 0.0 || mag_b == 0.0 {
        return None;
    }

    // rounding can push the ratio slightly outside [-1, 1]
    Some((dot / (mag_a.sqrt() * mag_b.sqrt())).clamp(-1.0, 1.0))
}

/// Scale a vector to unit L2 norm in place. Zero and non-finite magnitudes
/// are left untouched and reported back to the caller.
pub fn l2_normalize(v: &mut [f32]) -> bool {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm == 0.0 || !norm.is_finite() {
        return false;
    }
    for x in v.iter_mut() {
        *x /= norm;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_self_similarity_is_one() {
        let v = vec![0.3, -1.2, 4.0];
        let sim = cosine_similarity(&v, &v).unwrap();
        assert!((sim - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_orthogonal_axes_score_zero() {
        let sim = cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).unwrap();
        assert!(sim.abs() < 1e-6);
    }

    #[test]
    fn test_sign_flip_scores_minus_one() {
        let v = vec![2.0, -3.0, 0.5];
        let flipped: Vec<f32> = v.iter().map(|x| -x).collect();
        let sim = cosine_similarity(&v, &flipped).unwrap();
        assert!((sim + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_mismatched_lengths_are_unscorable() {
        assert!(cosine_similarity(&[1.0, 2.0], &[1.0, 2.0, 3.0]).is_none());
        assert!(cosine_similarity(&[], &[]).is_none());
    }

    #[test]
    fn test_zero_vector_is_unscorable() {
        assert!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]).is_none());
    }

    #[test]
    fn test_normalize_then_score_against_original() {
        let original = vec![3.0, 4.0];
        let mut scaled = original.clone();
        assert!(l2_normalize(&mut scaled));

        let norm: f32 = scaled.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
        // direction is unchanged by scaling
        let sim = cosine_similarity(&original, &scaled).unwrap();
        assert!((sim - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_normalize_rejects_zero_magnitude() {
        let mut v = vec![0.0, 0.0];
        assert!(!l2_normalize(&mut v));
        assert_eq!(v, vec![0.0, 0.0]);
    }
}
