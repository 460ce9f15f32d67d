pub mod popularity;

pub use popularity::PopularityRanker;

use crate::error::{EngineError, Result};
use crate::models::{ContentVector, ScoredItem, UserProfile};
use crate::services::diversity::DiversityLayer;
use crate::utils::cosine_similarity;
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::HashSet;
use uuid::Uuid;

/// Ranked candidate before the diversity pass
#[derive(Debug, Clone)]
pub(crate) struct RankedCandidate {
    pub content_id: Uuid,
    pub score: f32,
    pub published_at: DateTime<Utc>,
    pub category: Option<String>,
}

impl RankedCandidate {
    fn into_item(self) -> ScoredItem {
        ScoredItem {
            content_id: self.content_id,
            score: self.score,
            category: self.category,
        }
    }
}

/// Score desc, then newer content first, then content id. NaN sorts last.
pub(crate) fn rank_order(a: &RankedCandidate, b: &RankedCandidate) -> Ordering {
    match (a.score.is_nan(), b.score.is_nan()) {
        (true, false) => return Ordering::Greater,
        (false, true) => return Ordering::Less,
        _ => {}
    }
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| b.published_at.cmp(&a.published_at))
        .then_with(|| a.content_id.cmp(&b.content_id))
}

/// Sort, drop duplicate ids, then apply the category cap.
pub(crate) fn finalize(
    mut ranked: Vec<RankedCandidate>,
    diversity: &DiversityLayer,
    k: usize,
) -> Vec<ScoredItem> {
    ranked.sort_by(rank_order);

    let mut seen = HashSet::with_capacity(ranked.len());
    let ordered: Vec<ScoredItem> = ranked
        .into_iter()
        .filter(|c| seen.insert(c.content_id))
        .map(RankedCandidate::into_item)
        .collect();

    diversity.rerank(ordered, k)
}

/// Content-based top-K generation
pub struct RecommendationGenerator {
    scheme_version: String,
    dims: usize,
    diversity: DiversityLayer,
}

impl RecommendationGenerator {
    pub fn new(scheme_version: &str, dims: usize, max_per_category: usize) -> Self {
        Self {
            scheme_version: scheme_version.to_string(),
            dims,
            diversity: DiversityLayer::new(max_per_category),
        }
    }

    pub fn diversity(&self) -> &DiversityLayer {
        &self.diversity
    }

    /// Rank `candidates` by cosine similarity to the profile.
    ///
    /// Candidates in `already_seen` never appear; zero vectors are skipped;
    /// a vector built under another scheme is an error.
    pub fn generate(
        &self,
        profile: &UserProfile,
        candidates: &[ContentVector],
        k: usize,
        already_seen: &HashSet<Uuid>,
    ) -> Result<Vec<ScoredItem>> {
        if profile.vector.len() != self.dims {
            return Err(EngineError::DimensionMismatch {
                expected: self.dims,
                actual: profile.vector.len(),
            });
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut ranked = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            if already_seen.contains(&candidate.content_id) {
                continue;
            }
            if !candidate.matches_scheme(&self.scheme_version, self.dims) {
                return Err(EngineError::StaleVector {
                    content_id: candidate.content_id,
                    found: candidate.scheme_version.clone(),
                    expected: self.scheme_version.clone(),
                });
            }
            if candidate.is_zero() {
                continue;
            }

            ranked.push(RankedCandidate {
                content_id: candidate.content_id,
                score: cosine_similarity(&profile.vector, &candidate.values),
                published_at: candidate.published_at,
                category: candidate.primary_category.clone(),
            });
        }

        Ok(finalize(ranked, &self.diversity, k))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    const SCHEME: &str = "test-v1";

    fn candidate(values: Vec<f32>, category: &str) -> ContentVector {
        let now = Utc::now();
        ContentVector {
            content_id: Uuid::new_v4(),
            values,
            scheme_version: SCHEME.to_string(),
            primary_category: Some(category.to_string()),
            source_updated_at: now,
            published_at: now,
            extracted_at: now,
        }
    }

    fn profile(values: Vec<f32>) -> UserProfile {
        let mut profile = UserProfile::empty(Uuid::new_v4(), values.len(), SCHEME);
        profile.vector = values;
        profile
    }

    #[test]
    fn test_generate_orders_by_similarity() {
        let generator = RecommendationGenerator::new(SCHEME, 2, 5);
        let close = candidate(vec![1.0, 0.1], "a");
        let far = candidate(vec![0.1, 1.0], "b");

        let items = generator
            .generate(
                &profile(vec![1.0, 0.0]),
                &[far.clone(), close.clone()],
                2,
                &HashSet::new(),
            )
            .unwrap();
        assert_eq!(items[0].content_id, close.content_id);
        assert_eq!(items[1].content_id, far.content_id);
        assert!(items[0].score > items[1].score);
    }

    #[test]
    fn test_generate_excludes_seen_and_duplicates() {
        let generator = RecommendationGenerator::new(SCHEME, 2, 5);
        let seen = candidate(vec![1.0, 0.0], "a");
        let other = candidate(vec![0.9, 0.1], "b");

        let items = generator
            .generate(
                &profile(vec![1.0, 0.0]),
                &[seen.clone(), other.clone(), other.clone()],
                5,
                &HashSet::from([seen.content_id]),
            )
            .unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].content_id, other.content_id);
    }

    #[test]
    fn test_ties_break_on_recency_then_id() {
        let generator = RecommendationGenerator::new(SCHEME, 2, 5);
        let mut older = candidate(vec![1.0, 0.0], "a");
        older.published_at = older.published_at - Duration::days(1);
        let newer = candidate(vec![1.0, 0.0], "b");

        let items = generator
            .generate(
                &profile(vec![1.0, 0.0]),
                &[older.clone(), newer.clone()],
                2,
                &HashSet::new(),
            )
            .unwrap();
        assert_eq!(items[0].content_id, newer.content_id);
    }

    #[test]
    fn test_stale_candidate_rejected() {
        let generator = RecommendationGenerator::new(SCHEME, 2, 5);
        let mut stale = candidate(vec![1.0, 0.0], "a");
        stale.scheme_version = "test-v0".to_string();

        let err = generator
            .generate(&profile(vec![1.0, 0.0]), &[stale], 2, &HashSet::new())
            .unwrap_err();
        assert!(matches!(err, EngineError::StaleVector { .. }));
    }

    #[test]
    fn test_zero_candidates_skipped() {
        let generator = RecommendationGenerator::new(SCHEME, 2, 5);
        let items = generator
            .generate(
                &profile(vec![1.0, 0.0]),
                &[candidate(vec![0.0, 0.0], "a")],
                2,
                &HashSet::new(),
            )
            .unwrap();
        assert!(items.is_empty());
    }
}
