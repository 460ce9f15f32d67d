//! Storage collaborator seams.
//!
//! The engine keeps no shared mutable state of its own: the interaction
//! log, vectors, profiles, access state and job bookkeeping all live behind
//! these traits. Every write is scoped to a single entity.

pub mod memory;
pub mod postgres;

pub use memory::InMemoryStore;
pub use postgres::PgStore;

use crate::error::Result;
use crate::models::{
    AccessRecord, AccessTransition, AnomalyScore, ContentItem, ContentVector, InteractionEvent,
    NewInteractionEvent, PopulationBaseline, RecommendationBatchJob, RecommendationList,
    TimeWindow, UserProfile,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use uuid::Uuid;

/// Content catalog and derived vectors
#[async_trait]
pub trait ContentStore: Send + Sync {
    async fn upsert_content(&self, item: ContentItem) -> Result<()>;

    async fn get_content(&self, content_id: Uuid) -> Result<Option<ContentItem>>;

    /// Removes the item together with its vector. Returns false if absent.
    async fn delete_content(&self, content_id: Uuid) -> Result<bool>;

    async fn list_content(&self) -> Result<Vec<ContentItem>>;

    /// Ids of every item currently in the catalog
    async fn catalog_ids(&self) -> Result<HashSet<Uuid>>;

    async fn put_vector(&self, vector: ContentVector) -> Result<()>;

    async fn get_vectors(&self, content_ids: &[Uuid]) -> Result<HashMap<Uuid, ContentVector>>;

    async fn all_vectors(&self) -> Result<Vec<ContentVector>>;
}

/// Append-only interaction log
#[async_trait]
pub trait EventLog: Send + Sync {
    /// Appends the event and assigns the next sequence number.
    async fn append(&self, event: NewInteractionEvent) -> Result<InteractionEvent>;

    /// Events of one user with `after_seq < seq <= up_to_seq`, in sequence order.
    async fn events_for_user_after(
        &self,
        user_id: Uuid,
        after_seq: i64,
        up_to_seq: i64,
    ) -> Result<Vec<InteractionEvent>>;

    async fn events_for_user_in(
        &self,
        user_id: Uuid,
        window: TimeWindow,
    ) -> Result<Vec<InteractionEvent>>;

    async fn events_in(&self, window: TimeWindow) -> Result<Vec<InteractionEvent>>;

    /// Distinct users with at least one event in `after_seq < seq <= up_to_seq`
    /// (limit 0 = all).
    async fn users_with_events_after(
        &self,
        after_seq: i64,
        up_to_seq: i64,
        limit: usize,
    ) -> Result<Vec<Uuid>>;

    /// Distinct users with events at or after `since`, most recent first (limit 0 = all).
    async fn active_users(&self, since: DateTime<Utc>, limit: usize) -> Result<Vec<Uuid>>;

    async fn max_seq(&self) -> Result<i64>;

    /// Highest sequence such that it and every sequence below it were
    /// appended at or before `appended_before`.
    async fn settled_seq(&self, appended_before: DateTime<Utc>) -> Result<i64>;
}

#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn get_profile(&self, user_id: Uuid) -> Result<Option<UserProfile>>;

    /// Last-write-wins on `(watermark, last_event_seq)`. Returns false when
    /// a newer profile was already stored and this write was dropped.
    async fn put_profile(&self, profile: UserProfile) -> Result<bool>;

    /// Users whose stored profile was built under a scheme other than
    /// `scheme_version` (limit 0 = all).
    async fn users_with_stale_profiles(
        &self,
        scheme_version: &str,
        limit: usize,
    ) -> Result<Vec<Uuid>>;
}

/// Anomaly scores, access state and the population baseline
#[async_trait]
pub trait AccessStore: Send + Sync {
    async fn get_access(&self, user_id: Uuid) -> Result<Option<AccessRecord>>;

    /// Stores the new record and its audit entry as one write, provided the
    /// stored state still equals `transition.from_state` (no record counts
    /// as `Active`). Fails with `InvalidTransition` otherwise.
    async fn apply_transition(
        &self,
        record: AccessRecord,
        transition: AccessTransition,
    ) -> Result<()>;

    async fn transitions(&self, user_id: Uuid) -> Result<Vec<AccessTransition>>;

    async fn get_anomaly_score(&self, user_id: Uuid) -> Result<Option<AnomalyScore>>;

    async fn put_anomaly_score(&self, score: AnomalyScore) -> Result<()>;

    async fn get_baseline(&self) -> Result<Option<PopulationBaseline>>;

    async fn put_baseline(&self, baseline: PopulationBaseline) -> Result<()>;
}

#[async_trait]
pub trait RecommendationStore: Send + Sync {
    /// Overwrites any previous list for the same user.
    async fn put_recommendations(&self, list: RecommendationList) -> Result<()>;

    async fn get_recommendations(&self, user_id: Uuid) -> Result<Option<RecommendationList>>;
}

/// Batch job bookkeeping and dirty-tracking checkpoints
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn put_job(&self, job: RecommendationBatchJob) -> Result<()>;

    async fn get_job(&self, job_id: Uuid) -> Result<Option<RecommendationBatchJob>>;

    async fn jobs_for_batch(&self, batch_id: Uuid) -> Result<Vec<RecommendationBatchJob>>;

    /// Last successfully processed event sequence for a named job (0 if none).
    async fn get_checkpoint(&self, name: &str) -> Result<i64>;

    async fn set_checkpoint(&self, name: &str, seq: i64) -> Result<()>;
}

/// Everything the engine needs from storage
pub trait EngineStore:
    ContentStore + EventLog + ProfileStore + AccessStore + RecommendationStore + JobStore
{
}

impl<T> EngineStore for T where
    T: ContentStore + EventLog + ProfileStore + AccessStore + RecommendationStore + JobStore
{
}

pub type SharedStore = Arc<dyn EngineStore>;
