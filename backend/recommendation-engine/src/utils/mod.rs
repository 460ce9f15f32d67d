// Vector and scoring helpers shared by the engine components

/// Scale `values` to unit length in place. Zero vectors stay zero.
pub fn l2_normalize(values: &mut [f32]) {
    let norm = values.iter().map(|v| (*v as f64) * (*v as f64)).sum::<f64>().sqrt();
    if norm > f64::EPSILON {
        for v in values.iter_mut() {
            *v = (*v as f64 / norm) as f32;
        }
    }
}

/// Cosine similarity; 0.0 when either side is a zero vector or lengths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a <= f64::EPSILON || norm_b <= f64::EPSILON {
        return 0.0;
    }
    (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0) as f32
}

/// Half-life decay factor: 1.0 at age 0, 0.5 at one half-life.
pub fn half_life_decay(age_hours: f64, half_life_hours: f64) -> f64 {
    if age_hours <= 0.0 {
        return 1.0;
    }
    0.5f64.powf(age_hours / half_life_hours)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_l2_normalize() {
        let mut v = vec![3.0, 4.0];
        l2_normalize(&mut v);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);

        let mut zero = vec![0.0, 0.0];
        l2_normalize(&mut zero);
        assert_eq!(zero, vec![0.0, 0.0]);
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[2.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_half_life_decay() {
        assert!((half_life_decay(24.0, 24.0) - 0.5).abs() < 1e-9);
        assert!((half_life_decay(0.0, 24.0) - 1.0).abs() < 1e-9);
        assert!((half_life_decay(48.0, 24.0) - 0.25).abs() < 1e-9);
    }
}
