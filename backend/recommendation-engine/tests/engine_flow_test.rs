//! End-to-end engine flows against the in-memory store.

use chrono::{Duration, Utc};
use recommendation_engine::config::EngineConfig;
use recommendation_engine::db::{InMemoryStore, SharedStore};
use recommendation_engine::models::{
    AccessState, ContentItem, EventKind, JobStatus, NewInteractionEvent, RecommendationSource,
    TimeWindow, SYSTEM_ACTOR,
};
use recommendation_engine::{AppState, EngineError};
use std::sync::Arc;
use uuid::Uuid;

/// Default tunables, with every appended event immediately foldable.
fn test_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.profile.commit_lag_secs = 0;
    config
}

fn state_with(config: EngineConfig) -> AppState {
    let store: SharedStore = Arc::new(InMemoryStore::new());
    AppState::build(store, config, None).unwrap()
}

fn state() -> AppState {
    state_with(test_config())
}

async fn add_content(state: &AppState, title: &str, body: &str, category: &str) -> Uuid {
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
    state.catalog.upsert_content(item).await.unwrap();
    id
}

async fn record(state: &AppState, user: Uuid, content: Uuid, kind: EventKind) {
    state
        .store
        .append(NewInteractionEvent::new(user, content, kind, Utc::now()))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_roof_repair_reader_gets_roof_content_first() {
    let state = state();
    let roof = add_content(&state, "Roof repair", "roof repair", "home").await;
    let kitchen = add_content(&state, "Kitchen design", "kitchen design", "interior").await;
    let user = Uuid::new_v4();

    for _ in 0..10 {
        record(&state, user, roof, EventKind::Click).await;
    }

    let stats = state.profile_job.update_all_profiles().await.unwrap();
    assert_eq!(stats.users_updated, 1);
    assert_eq!(stats.checkpoint_to, Some(10));

    let list = state.recommendations.recommend(user, 5).await.unwrap();
    assert_eq!(list.provenance.source, RecommendationSource::ContentBased);
    assert_eq!(list.items[0].content_id, roof);
    if let Some(pos) = list.items.iter().position(|i| i.content_id == kitchen) {
        assert!(pos > 0);
        assert!(list.items[0].score > list.items[pos].score);
    }

    let stored = state.store.get_recommendations(user).await.unwrap().unwrap();
    assert_eq!(stored, list);
}

#[tokio::test]
async fn test_incremental_profile_matches_full_rebuild() {
    let state = state();
    let roof = add_content(&state, "Roof repair", "shingles and flashing", "home").await;
    let garden = add_content(&state, "Garden beds", "raised beds and compost", "garden").await;
    let user = Uuid::new_v4();

    record(&state, user, roof, EventKind::Like).await;
    record(&state, user, garden, EventKind::Impression).await;
    state.profile_job.update_all_profiles().await.unwrap();

    record(&state, user, garden, EventKind::Completion).await;
    record(&state, user, roof, EventKind::Comment).await;
    let second = state.profile_job.update_all_profiles().await.unwrap();
    assert_eq!(second.users_updated, 1);

    let incremental = state.store.get_profile(user).await.unwrap().unwrap();
    let events = state
        .store
        .events_for_user_after(user, 0, i64::MAX)
        .await
        .unwrap();
    let vectors = state.catalog.fresh_vectors(&[roof, garden]).await.unwrap();
    let full = state
        .updater
        .builder()
        .build_profile(user, &events, &vectors)
        .unwrap();

    assert_eq!(incremental.event_count, full.event_count);
    assert_eq!(incremental.last_event_seq, full.last_event_seq);
    for (a, b) in incremental.vector.iter().zip(full.vector.iter()) {
        assert!((a - b).abs() < 1e-4, "{} vs {}", a, b);
    }

    // nothing new: checkpoint holds and nothing is rewritten
    let third = state.profile_job.update_all_profiles().await.unwrap();
    assert_eq!(third.users_processed, 0);
}

#[tokio::test]
async fn test_feature_scheme_change_rebuilds_existing_profiles() {
    let store: SharedStore = Arc::new(InMemoryStore::new());
    let before = AppState::build(store.clone(), test_config(), None).unwrap();
    let roof = add_content(&before, "Roof repair", "roof repair", "home").await;
    add_content(&before, "Kitchen design", "kitchen design", "interior").await;
    let user = Uuid::new_v4();
    for _ in 0..10 {
        record(&before, user, roof, EventKind::Click).await;
    }
    before.profile_job.update_all_profiles().await.unwrap();
    let list = before.recommendations.recommend(user, 5).await.unwrap();
    assert_eq!(list.provenance.source, RecommendationSource::ContentBased);

    let mut config = test_config();
    config.features.term_dims = 128;
    let after = AppState::build(store.clone(), config, None).unwrap();
    after.vector_job.run(false).await.unwrap();

    let stats = after.profile_job.update_all_profiles().await.unwrap();
    assert_eq!(stats.users_rescheme, 1);
    assert_eq!(stats.users_updated, 1);

    let profile = store.get_profile(user).await.unwrap().unwrap();
    assert_eq!(profile.vector.len(), 128 + 32);
    assert_eq!(profile.scheme_version, after.catalog.extractor().scheme_version());
    assert_eq!(profile.event_count, 10);

    let list = after.recommendations.recommend(user, 5).await.unwrap();
    assert_eq!(list.provenance.source, RecommendationSource::ContentBased);
    assert_eq!(list.items[0].content_id, roof);

    // rebuilt once; the next pass has nothing to do
    let again = after.profile_job.update_all_profiles().await.unwrap();
    assert_eq!(again.users_processed, 0);
}

#[tokio::test]
async fn test_profile_pass_leaves_unsettled_events_for_later() {
    let mut config = test_config();
    config.profile.commit_lag_secs = 3600;
    let state = state_with(config);
    let roof = add_content(&state, "Roof repair", "roof repair", "home").await;
    let user = Uuid::new_v4();
    record(&state, user, roof, EventKind::Like).await;

    let stats = state.profile_job.update_all_profiles().await.unwrap();
    assert_eq!(stats.users_processed, 0);
    assert_eq!(stats.checkpoint_to, Some(0));
    assert!(state.store.get_profile(user).await.unwrap().is_none());
}

#[tokio::test]
async fn test_new_user_falls_back_to_popularity_without_seen_items() {
    let state = state();
    let popular = add_content(&state, "Roof repair", "roof", "home").await;
    let quiet = add_content(&state, "Kitchen design", "kitchen", "interior").await;
    let seen = add_content(&state, "Garden beds", "garden", "garden").await;

    for _ in 0..3 {
        record(&state, Uuid::new_v4(), popular, EventKind::Like).await;
    }
    record(&state, Uuid::new_v4(), quiet, EventKind::Click).await;
    record(&state, Uuid::new_v4(), seen, EventKind::Like).await;

    let newcomer = Uuid::new_v4();
    record(&state, newcomer, seen, EventKind::Impression).await;

    let list = state.recommendations.recommend(newcomer, 10).await.unwrap();
    assert_eq!(list.provenance.source, RecommendationSource::Popularity);
    assert_eq!(list.items[0].content_id, popular);
    assert!(list.items.iter().all(|i| i.content_id != seen));
}

#[tokio::test]
async fn test_batch_of_active_users_persists_lists_per_chunk() {
    let state = state();
    let roof = add_content(&state, "Roof repair", "roof", "home").await;
    let users: Vec<Uuid> = (0..250).map(|_| Uuid::new_v4()).collect();
    for user in &users {
        record(&state, *user, roof, EventKind::Click).await;
    }

    let handles = state
        .dispatcher
        .run_active_to_completion(0, 5)
        .await
        .unwrap();
    assert_eq!(handles.len(), 3);
    assert_eq!(
        handles.iter().map(|h| h.user_count).sum::<usize>(),
        users.len()
    );
    assert!(handles.iter().all(|h| h.status == JobStatus::Completed));
    assert!(handles.iter().all(|h| h.failure_count == 0));

    let list = state.store.get_recommendations(users[0]).await.unwrap().unwrap();
    assert!(list.provenance.job_id.is_some());
}

#[tokio::test]
async fn test_sustained_burst_blocks_then_admin_unblocks() {
    let mut config = test_config();
    config.anomaly.threshold = 0.7;
    let state = state_with(config);
    let clip = add_content(&state, "Short clip", "clip", "video").await;
    let user = Uuid::new_v4();

    let mut blocked = None;
    for _ in 0..10 {
        for _ in 0..60 {
            record(&state, user, clip, EventKind::Like).await;
        }
        let evaluation = state.anomaly.evaluate(user, None).await.unwrap();
        if evaluation.access.state == AccessState::AutoBlocked {
            blocked = Some(evaluation);
            break;
        }
    }

    let blocked = blocked.expect("sustained burst should block");
    assert!(blocked.score.score >= 0.7);
    assert!(blocked.access.reason.is_some());

    let controller = state.anomaly.controller();
    assert!(matches!(
        controller.unblock(user, "  ", None).await,
        Err(EngineError::Validation(_))
    ));

    let unblocked = controller
        .unblock(user, "admin@ops", Some("false positive".to_string()))
        .await
        .unwrap();
    assert_eq!(unblocked.state, AccessState::Unblocked);
    assert_eq!(unblocked.unblocked_by.as_deref(), Some("admin@ops"));

    assert!(matches!(
        controller.unblock(user, "admin@ops", None).await,
        Err(EngineError::InvalidTransition { .. })
    ));

    // still inside the re-block grace period
    record_burst(&state, user, clip).await;
    let evaluation = state.anomaly.evaluate(user, None).await.unwrap();
    assert_eq!(evaluation.access.state, AccessState::Unblocked);

    let history = controller.transitions(user).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].actor, SYSTEM_ACTOR);
    assert_eq!(history[1].actor, "admin@ops");
}

async fn record_burst(state: &AppState, user: Uuid, content: Uuid) {
    for _ in 0..60 {
        record(state, user, content, EventKind::Like).await;
    }
}

#[tokio::test]
async fn test_report_over_served_recommendations() {
    let state = state();
    let roof = add_content(&state, "Roof repair", "roof", "home").await;
    let kitchen = add_content(&state, "Kitchen design", "kitchen", "interior").await;
    let user = Uuid::new_v4();
    let now = Utc::now();

    let shown = [(roof, 0u32), (kitchen, 1u32)];
    for (content, position) in shown {
        state
            .store
            .append(
                NewInteractionEvent::new(user, content, EventKind::Impression, now)
                    .with_source(RecommendationSource::ContentBased)
                    .with_position(position),
            )
            .await
            .unwrap();
    }
    state
        .store
        .append(
            NewInteractionEvent::new(user, roof, EventKind::Click, now)
                .with_source(RecommendationSource::ContentBased),
        )
        .await
        .unwrap();

    let window = TimeWindow::new(now - Duration::hours(1), now + Duration::hours(1));
    let report = state.metrics_engine.compute(2, window, None).await.unwrap();
    assert_eq!(report.impressions, 2);
    assert_eq!(report.clicks, 1);
    assert_eq!(report.precision_at_k, Some(0.5));
    assert_eq!(report.recall_at_k, Some(1.0));
    assert_eq!(report.ndcg_at_k, Some(1.0));
    assert_eq!(report.ctr, Some(0.5));
    assert_eq!(report.coverage, Some(1.0));

    let by_source = state.metrics_engine.compute_by_source(2, window).await.unwrap();
    assert_eq!(by_source.len(), RecommendationSource::ALL.len());
    assert!(!by_source[&RecommendationSource::ContentBased].insufficient_data);
    assert!(by_source[&RecommendationSource::Popularity].insufficient_data);
}
