// ============================================
// Recommendation Service
// ============================================
//
// Per-user entry point: content-based ranking when the stored profile is
// usable, popularity otherwise. A profile left behind by a feature scheme
// change is rebuilt on the spot rather than dropped. Every produced list is
// persisted with its provenance so impressions can later be attributed to a
// source.

use crate::config::RecommendationConfig;
use crate::db::SharedStore;
use crate::error::{EngineError, Result};
use crate::metrics::RECOMMENDATIONS_SERVED_TOTAL;
use crate::models::{
    EventKind, Provenance, RecommendationList, RecommendationSource, TimeWindow, UserProfile,
};
use crate::services::features::CatalogService;
use crate::services::profile_builder::ProfileUpdater;
use crate::services::ranking::{PopularityRanker, RecommendationGenerator};
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

pub struct RecommendationService {
    store: SharedStore,
    catalog: CatalogService,
    updater: Arc<ProfileUpdater>,
    generator: RecommendationGenerator,
    popularity: PopularityRanker,
    config: RecommendationConfig,
}

impl RecommendationService {
    pub fn new(
        store: SharedStore,
        catalog: CatalogService,
        updater: Arc<ProfileUpdater>,
        generator: RecommendationGenerator,
        popularity: PopularityRanker,
        config: RecommendationConfig,
    ) -> Self {
        Self {
            store,
            catalog,
            updater,
            generator,
            popularity,
            config,
        }
    }

    pub fn default_k(&self) -> usize {
        self.config.default_k
    }

    pub fn validate_k(&self, k: usize) -> Result<()> {
        if k == 0 || k > self.config.max_k {
            return Err(EngineError::Validation(format!(
                "k must be within [1, {}], got {}",
                self.config.max_k, k
            )));
        }
        Ok(())
    }

    pub async fn recommend(&self, user_id: Uuid, k: usize) -> Result<RecommendationList> {
        self.recommend_with_job(user_id, k, None).await
    }

    /// Same as [`recommend`](Self::recommend), tagging the provenance with
    /// the batch job that produced the list.
    pub async fn recommend_with_job(
        &self,
        user_id: Uuid,
        k: usize,
        job_id: Option<Uuid>,
    ) -> Result<RecommendationList> {
        self.validate_k(k)?;

        let now = Utc::now();
        let already_seen = self.already_seen(user_id, now).await?;
        let candidates = self.catalog.catalog_vectors().await?;

        let profile = self
            .updater
            .current_profile(user_id)
            .await?
            .filter(|p| self.is_usable(p));

        let (items, source) = match profile {
            Some(profile) => {
                let items = self
                    .generator
                    .generate(&profile, &candidates, k, &already_seen)?;
                (items, RecommendationSource::ContentBased)
            }
            None => {
                let window = TimeWindow::trailing_hours(now, self.config.popularity_window_hours);
                let events = self.store.events_in(window).await?;
                let vectors: HashMap<Uuid, _> =
                    candidates.into_iter().map(|v| (v.content_id, v)).collect();
                let items = self.popularity.rank(&events, &vectors, k, &already_seen);
                (items, RecommendationSource::Popularity)
            }
        };

        let list = RecommendationList {
            user_id,
            k,
            items,
            provenance: Provenance {
                source,
                generated_at: now,
                job_id,
            },
        };
        self.store.put_recommendations(list.clone()).await?;

        RECOMMENDATIONS_SERVED_TOTAL
            .with_label_values(&[source.as_str()])
            .inc();
        debug!(
            user_id = %user_id,
            source = %source,
            items = list.items.len(),
            "Recommendations generated"
        );
        if list.items.len() < k {
            info!(
                user_id = %user_id,
                requested = k,
                returned = list.items.len(),
                "Recommendation list shorter than requested"
            );
        }

        Ok(list)
    }

    fn is_usable(&self, profile: &UserProfile) -> bool {
        !profile.is_zero()
            && profile.is_compatible(
                self.catalog.extractor().scheme_version(),
                self.catalog.extractor().dims(),
            )
    }

    /// Content impressed to the user within the cooldown window
    async fn already_seen(&self, user_id: Uuid, now: chrono::DateTime<Utc>) -> Result<HashSet<Uuid>> {
        if self.config.cooldown_hours == 0 {
            return Ok(HashSet::new());
        }
        let window = TimeWindow::trailing_hours(now, self.config.cooldown_hours);
        let events = self.store.events_for_user_in(user_id, window).await?;
        Ok(events
            .into_iter()
            .filter(|e| e.kind == EventKind::Impression)
            .map(|e| e.content_id)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EventWeights, FeatureConfig, ProfileConfig};
    use crate::db::InMemoryStore;
    use crate::models::{ContentItem, NewInteractionEvent};
    use crate::services::features::FeatureExtractor;
    use crate::services::profile_builder::ProfileBuilder;
    use chrono::Duration;

    struct Fixture {
        store: SharedStore,
        service: RecommendationService,
        updater: Arc<ProfileUpdater>,
    }

    fn fixture() -> Fixture {
        let store: SharedStore = Arc::new(InMemoryStore::new());
        let extractor = Arc::new(FeatureExtractor::new(&FeatureConfig::default()));
        let catalog = CatalogService::new(store.clone(), extractor.clone());
        let config = RecommendationConfig::default();
        let updater = Arc::new(ProfileUpdater::new(
            store.clone(),
            catalog.clone(),
            ProfileBuilder::new(
                &ProfileConfig::default(),
                extractor.scheme_version(),
                extractor.dims(),
            ),
        ));
        let service = RecommendationService::new(
            store.clone(),
            catalog,
            updater.clone(),
            RecommendationGenerator::new(
                extractor.scheme_version(),
                extractor.dims(),
                config.max_per_category,
            ),
            PopularityRanker::new(EventWeights::default(), config.max_per_category),
            config,
        );
        Fixture {
            store,
            service,
            updater,
        }
    }

    async fn add_item(store: &SharedStore, title: &str, body: &str, category: &str) -> Uuid {
        let now = Utc::now();
        let item = ContentItem {
            id: Uuid::new_v4(),
            title: title.to_string(),
            body: body.to_string(),
            categories: vec![category.to_string()],
            tags: vec![],
            created_at: now,
            updated_at: now,
        };
        let id = item.id;
        store.upsert_content(item).await.unwrap();
        id
    }

    #[tokio::test]
    async fn test_new_user_gets_popularity_list() {
        let f = fixture();
        let popular = add_item(&f.store, "Roof repair", "shingles", "home").await;
        let other = Uuid::new_v4();
        f.store
            .append(NewInteractionEvent::new(
                other,
                popular,
                EventKind::Like,
                Utc::now() - Duration::hours(1),
            ))
            .await
            .unwrap();

        let list = f.service.recommend(Uuid::new_v4(), 5).await.unwrap();
        assert_eq!(list.provenance.source, RecommendationSource::Popularity);
        assert_eq!(list.items[0].content_id, popular);
    }

    #[tokio::test]
    async fn test_profiled_user_gets_content_based_list() {
        let f = fixture();
        let user = Uuid::new_v4();
        let liked = add_item(&f.store, "Roof repair", "roof shingles repair", "home").await;
        let roof = add_item(&f.store, "Roof leaks", "roof repair guide", "home").await;
        let kitchen = add_item(&f.store, "Kitchen design", "kitchen cabinets", "interior").await;

        f.store
            .append(NewInteractionEvent::new(
                user,
                liked,
                EventKind::Like,
                Utc::now() - Duration::hours(1),
            ))
            .await
            .unwrap();
        f.updater.refresh_profile(user, i64::MAX).await.unwrap();

        let list = f.service.recommend(user, 3).await.unwrap();
        assert_eq!(list.provenance.source, RecommendationSource::ContentBased);
        let score = |id: Uuid| {
            list.items
                .iter()
                .find(|i| i.content_id == id)
                .map(|i| i.score)
                .unwrap()
        };
        assert!(score(roof) > score(kitchen));

        let stored = f.store.get_recommendations(user).await.unwrap().unwrap();
        assert_eq!(stored, list);
    }

    #[tokio::test]
    async fn test_profile_from_old_scheme_is_rebuilt_not_dropped() {
        let f = fixture();
        let user = Uuid::new_v4();
        let liked = add_item(&f.store, "Roof repair", "roof shingles repair", "home").await;
        add_item(&f.store, "Roof leaks", "roof repair guide", "home").await;
        f.store
            .append(NewInteractionEvent::new(
                user,
                liked,
                EventKind::Like,
                Utc::now() - Duration::hours(1),
            ))
            .await
            .unwrap();

        let mut old = UserProfile::empty(user, 16, "tfhash-v0");
        old.vector[3] = 1.0;
        old.last_event_seq = 1;
        f.store.put_profile(old).await.unwrap();

        let list = f.service.recommend(user, 3).await.unwrap();
        assert_eq!(list.provenance.source, RecommendationSource::ContentBased);
        let stored = f.store.get_profile(user).await.unwrap().unwrap();
        assert!(f.updater.builder().is_compatible(&stored));
    }

    #[tokio::test]
    async fn test_recent_impressions_excluded() {
        let f = fixture();
        let user = Uuid::new_v4();
        let shown = add_item(&f.store, "Roof repair", "roof", "home").await;
        let fresh = add_item(&f.store, "Garden tools", "garden", "garden").await;
        for content in [shown, fresh] {
            f.store
                .append(NewInteractionEvent::new(
                    Uuid::new_v4(),
                    content,
                    EventKind::Like,
                    Utc::now() - Duration::hours(2),
                ))
                .await
                .unwrap();
        }
        f.store
            .append(NewInteractionEvent::new(
                user,
                shown,
                EventKind::Impression,
                Utc::now() - Duration::hours(1),
            ))
            .await
            .unwrap();

        let list = f.service.recommend(user, 5).await.unwrap();
        assert!(list.items.iter().all(|i| i.content_id != shown));
        assert!(list.items.iter().any(|i| i.content_id == fresh));
    }

    #[tokio::test]
    async fn test_invalid_k_rejected() {
        let f = fixture();
        assert!(matches!(
            f.service.recommend(Uuid::new_v4(), 0).await,
            Err(EngineError::Validation(_))
        ));
        assert!(matches!(
            f.service.recommend(Uuid::new_v4(), 10_000).await,
            Err(EngineError::Validation(_))
        ));
    }
}
