use crate::models::ScoredItem;
use std::collections::HashMap;

/// Diversity Layer - category-capped greedy rerank
///
/// Walks the relevance-ordered candidates and keeps at most
/// `max_per_category` items of any primary category. Among the allowed
/// items it prefers one whose category differs from the previous pick, so
/// a category only repeats back-to-back when nothing else is left.
/// Uncategorized items are never capped.
///
/// Each item is keyed by its primary category alone (see
/// [`ContentItem::primary_category`](crate::models::ContentItem::primary_category)).
/// Secondary categories of a multi-category item are not counted against
/// their caps, so two items tagged `[garden, home]` and `[home]` can sit
/// next to each other under a cap of one.
pub struct DiversityLayer {
    max_per_category: usize,
}

impl DiversityLayer {
    pub fn new(max_per_category: usize) -> Self {
        Self {
            max_per_category: max_per_category.max(1),
        }
    }

    /// `ranked` must already be in final relevance order. The result may be
    /// shorter than `top_k` when the cap exhausts the candidates.
    pub fn rerank(&self, ranked: Vec<ScoredItem>, top_k: usize) -> Vec<ScoredItem> {
        let mut selected: Vec<ScoredItem> = Vec::with_capacity(top_k.min(ranked.len()));
        let mut remaining = ranked;
        let mut per_category: HashMap<String, usize> = HashMap::new();

        while selected.len() < top_k && !remaining.is_empty() {
            let previous = selected.last().and_then(|s| s.category.clone());

            let mut fallback = None;
            let mut chosen = None;
            for (i, item) in remaining.iter().enumerate() {
                if !self.under_cap(&per_category, item) {
                    continue;
                }
                let repeats = previous.is_some() && item.category == previous;
                if !repeats {
                    chosen = Some(i);
                    break;
                }
                if fallback.is_none() {
                    fallback = Some(i);
                }
            }

            let idx = match chosen.or(fallback) {
                Some(idx) => idx,
                None => break,
            };

            let item = remaining.remove(idx);
            if let Some(category) = &item.category {
                *per_category.entry(category.clone()).or_insert(0) += 1;
            }
            selected.push(item);
        }

        selected
    }

    fn under_cap(&self, per_category: &HashMap<String, usize>, item: &ScoredItem) -> bool {
        match &item.category {
            Some(category) => {
                per_category.get(category).copied().unwrap_or(0) < self.max_per_category
            }
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn item(score: f32, category: Option<&str>) -> ScoredItem {
        ScoredItem {
            content_id: Uuid::new_v4(),
            score,
            category: category.map(|c| c.to_string()),
        }
    }

    #[test]
    fn test_cap_limits_each_category() {
        let layer = DiversityLayer::new(2);
        let ranked = vec![
            item(0.9, Some("home")),
            item(0.8, Some("home")),
            item(0.7, Some("home")),
            item(0.6, Some("garden")),
        ];

        let result = layer.rerank(ranked, 10);
        let home = result
            .iter()
            .filter(|i| i.category.as_deref() == Some("home"))
            .count();
        assert_eq!(home, 2);
        assert_eq!(result.len(), 3);
    }

    #[test]
    fn test_cap_of_one_never_repeats_category_back_to_back() {
        let layer = DiversityLayer::new(1);
        let ranked = vec![
            item(0.9, Some("home")),
            item(0.85, Some("home")),
            item(0.8, Some("garden")),
            item(0.75, Some("garden")),
            item(0.7, Some("travel")),
        ];

        let result = layer.rerank(ranked, 5);
        assert_eq!(result.len(), 3);
        for pair in result.windows(2) {
            assert_ne!(pair[0].category, pair[1].category);
        }
    }

    #[test]
    fn test_interleaves_when_alternatives_exist() {
        let layer = DiversityLayer::new(3);
        let ranked = vec![
            item(0.9, Some("home")),
            item(0.85, Some("home")),
            item(0.8, Some("garden")),
        ];

        let result = layer.rerank(ranked, 3);
        let categories: Vec<_> = result.iter().map(|i| i.category.as_deref()).collect();
        assert_eq!(categories, vec![Some("home"), Some("garden"), Some("home")]);
    }

    #[test]
    fn test_cap_keys_on_primary_category_only() {
        // "home" is the secondary category of the first item
        let layer = DiversityLayer::new(1);
        let ranked = vec![item(0.9, Some("garden")), item(0.8, Some("home"))];
        let result = layer.rerank(ranked, 2);
        assert_eq!(result.len(), 2);
    }

    #[test]
    fn test_uncategorized_items_are_uncapped() {
        let layer = DiversityLayer::new(1);
        let ranked = vec![item(0.9, None), item(0.8, None), item(0.7, None)];
        assert_eq!(layer.rerank(ranked, 3).len(), 3);
    }

    #[test]
    fn test_top_k_respected() {
        let layer = DiversityLayer::new(5);
        let ranked = (0..10).map(|i| item(1.0 - i as f32 * 0.05, None)).collect();
        assert_eq!(layer.rerank(ranked, 4).len(), 4);
        assert!(layer.rerank(Vec::new(), 4).is_empty());
    }
}
