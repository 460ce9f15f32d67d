//! Per-user ranking quality formulas.

use std::collections::HashSet;
use uuid::Uuid;

/// Hits of `top_k` in `relevant`
pub fn hits(top_k: &[Uuid], relevant: &HashSet<Uuid>) -> usize {
    top_k.iter().filter(|id| relevant.contains(*id)).count()
}

/// hits / K. K is the requested cutoff, not the shown length.
pub fn precision_at_k(top_k: &[Uuid], relevant: &HashSet<Uuid>, k: usize) -> f64 {
    if k == 0 {
        return 0.0;
    }
    hits(top_k, relevant) as f64 / k as f64
}

/// None for users without relevant items.
pub fn recall_at_k(top_k: &[Uuid], relevant: &HashSet<Uuid>) -> Option<f64> {
    if relevant.is_empty() {
        return None;
    }
    Some(hits(top_k, relevant) as f64 / relevant.len() as f64)
}

/// Binary-relevance NDCG with a `log2(rank + 1)` discount. The ideal list
/// holds `min(|relevant|, k)` hits. None for users without relevant items.
pub fn ndcg_at_k(top_k: &[Uuid], relevant: &HashSet<Uuid>, k: usize) -> Option<f64> {
    if relevant.is_empty() || k == 0 {
        return None;
    }

    let dcg: f64 = top_k
        .iter()
        .take(k)
        .enumerate()
        .filter(|(_, id)| relevant.contains(*id))
        .map(|(i, _)| discount(i + 1))
        .sum();

    let ideal_hits = relevant.len().min(k);
    let idcg: f64 = (1..=ideal_hits).map(discount).sum();

    Some(dcg / idcg)
}

/// F1 of already-averaged precision and recall
pub fn f1(precision: Option<f64>, recall: Option<f64>) -> Option<f64> {
    match (precision, recall) {
        (Some(p), Some(r)) if p + r > 0.0 => Some(2.0 * p * r / (p + r)),
        (Some(_), Some(_)) => Some(0.0),
        _ => None,
    }
}

/// Mean pairwise `1 - cosine` over a list of vectors. None below two.
pub fn intra_list_diversity(vectors: &[&[f32]]) -> Option<f64> {
    if vectors.len() < 2 {
        return None;
    }
    let mut total = 0.0;
    let mut pairs = 0usize;
    for i in 0..vectors.len() {
        for j in (i + 1)..vectors.len() {
            total += 1.0 - crate::utils::cosine_similarity(vectors[i], vectors[j]) as f64;
            pairs += 1;
        }
    }
    Some(total / pairs as f64)
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

fn discount(rank: usize) -> f64 {
    1.0 / ((rank + 1) as f64).log2()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(n: usize) -> Vec<Uuid> {
        (0..n).map(|_| Uuid::new_v4()).collect()
    }

    #[test]
    fn test_precision_uses_k_as_denominator() {
        let shown = ids(2);
        let relevant: HashSet<Uuid> = [shown[0]].into_iter().collect();
        assert!((precision_at_k(&shown, &relevant, 5) - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_recall_undefined_without_relevant_items() {
        assert_eq!(recall_at_k(&ids(3), &HashSet::new()), None);

        let shown = ids(3);
        let mut relevant: HashSet<Uuid> = [shown[1]].into_iter().collect();
        relevant.insert(Uuid::new_v4());
        assert!((recall_at_k(&shown, &relevant).unwrap() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_ndcg_perfect_and_partial() {
        let shown = ids(3);
        let relevant: HashSet<Uuid> = [shown[0]].into_iter().collect();
        assert!((ndcg_at_k(&shown, &relevant, 3).unwrap() - 1.0).abs() < 1e-9);

        let relevant: HashSet<Uuid> = [shown[1]].into_iter().collect();
        let expected = 1.0 / 3f64.log2();
        assert!((ndcg_at_k(&shown, &relevant, 3).unwrap() - expected).abs() < 1e-9);
    }

    #[test]
    fn test_ndcg_bounded() {
        let shown = ids(4);
        let relevant: HashSet<Uuid> = shown.iter().cloned().chain(ids(10)).collect();
        let value = ndcg_at_k(&shown, &relevant, 4).unwrap();
        assert!((0.0..=1.0 + 1e-9).contains(&value));
    }

    #[test]
    fn test_f1_edge_cases() {
        assert_eq!(f1(None, Some(0.5)), None);
        assert_eq!(f1(Some(0.0), Some(0.0)), Some(0.0));
        assert!((f1(Some(0.5), Some(0.5)).unwrap() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_diversity_of_identical_and_orthogonal() {
        let a = [1.0f32, 0.0];
        let b = [0.0f32, 1.0];
        assert!(intra_list_diversity(&[&a[..], &a[..]]).unwrap().abs() < 1e-6);
        assert!((intra_list_diversity(&[&a[..], &b[..]]).unwrap() - 1.0).abs() < 1e-6);
        assert_eq!(intra_list_diversity(&[&a[..]]), None);
    }
}
