//! Popularity fallback for users without a usable profile.

use super::{finalize, RankedCandidate};
use crate::config::EventWeights;
use crate::models::{ContentVector, InteractionEvent, ScoredItem};
use crate::services::diversity::DiversityLayer;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

pub struct PopularityRanker {
    weights: EventWeights,
    diversity: DiversityLayer,
}

impl PopularityRanker {
    pub fn new(weights: EventWeights, max_per_category: usize) -> Self {
        Self {
            weights,
            diversity: DiversityLayer::new(max_per_category),
        }
    }

    /// Rank catalog items by weighted positive interactions in `events`.
    ///
    /// Only content present in `vectors` is eligible; scores are scaled so
    /// the most popular item gets 1.0.
    pub fn rank(
        &self,
        events: &[InteractionEvent],
        vectors: &HashMap<Uuid, ContentVector>,
        k: usize,
        already_seen: &HashSet<Uuid>,
    ) -> Vec<ScoredItem> {
        if k == 0 {
            return Vec::new();
        }

        let mut totals: HashMap<Uuid, f64> = HashMap::new();
        for event in events.iter().filter(|e| e.kind.is_positive()) {
            if already_seen.contains(&event.content_id) {
                continue;
            }
            *totals.entry(event.content_id).or_insert(0.0) += self.weights.weight(event.kind) as f64;
        }

        totals.retain(|content_id, total| *total > 0.0 && vectors.contains_key(content_id));
        let max = totals.values().cloned().fold(0.0f64, f64::max);
        if max <= 0.0 {
            return Vec::new();
        }

        let ranked: Vec<RankedCandidate> = totals
            .into_iter()
            .filter_map(|(content_id, total)| {
                vectors.get(&content_id).map(|v| RankedCandidate {
                    content_id,
                    score: (total / max) as f32,
                    published_at: v.published_at,
                    category: v.primary_category.clone(),
                })
            })
            .collect();

        finalize(ranked, &self.diversity, k)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EventKind;
    use chrono::Utc;

    fn vector(category: &str) -> ContentVector {
        let now = Utc::now();
        ContentVector {
            content_id: Uuid::new_v4(),
            values: vec![1.0],
            scheme_version: "test-v1".to_string(),
            primary_category: Some(category.to_string()),
            source_updated_at: now,
            published_at: now,
            extracted_at: now,
        }
    }

    fn event(content_id: Uuid, kind: EventKind) -> InteractionEvent {
        InteractionEvent {
            seq: 0,
            user_id: Uuid::new_v4(),
            content_id,
            kind,
            occurred_at: Utc::now(),
            source: None,
            position: None,
            engagement: None,
        }
    }

    #[test]
    fn test_rank_by_weighted_positive_interactions() {
        let ranker = PopularityRanker::new(EventWeights::default(), 5);
        let (liked, clicked, impressed) = (vector("a"), vector("b"), vector("c"));
        let vectors = HashMap::from([
            (liked.content_id, liked.clone()),
            (clicked.content_id, clicked.clone()),
            (impressed.content_id, impressed.clone()),
        ]);
        let events = vec![
            event(liked.content_id, EventKind::Like),
            event(clicked.content_id, EventKind::Click),
            event(impressed.content_id, EventKind::Impression),
            event(impressed.content_id, EventKind::Impression),
        ];

        let items = ranker.rank(&events, &vectors, 10, &HashSet::new());
        let ids: Vec<Uuid> = items.iter().map(|i| i.content_id).collect();
        assert_eq!(ids, vec![liked.content_id, clicked.content_id]);
        assert!((items[0].score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_deleted_and_seen_content_excluded() {
        let ranker = PopularityRanker::new(EventWeights::default(), 5);
        let (kept, seen) = (vector("a"), vector("b"));
        let vectors = HashMap::from([
            (kept.content_id, kept.clone()),
            (seen.content_id, seen.clone()),
        ]);
        let events = vec![
            event(kept.content_id, EventKind::Click),
            event(seen.content_id, EventKind::Like),
            event(Uuid::new_v4(), EventKind::Like),
        ];

        let items = ranker.rank(&events, &vectors, 10, &HashSet::from([seen.content_id]));
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].content_id, kept.content_id);
    }

    #[test]
    fn test_no_events_gives_empty_list() {
        let ranker = PopularityRanker::new(EventWeights::default(), 5);
        assert!(ranker.rank(&[], &HashMap::new(), 10, &HashSet::new()).is_empty());
    }
}
