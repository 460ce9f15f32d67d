//! In-process store used for development and tests.

use super::{AccessStore, ContentStore, EventLog, JobStore, ProfileStore, RecommendationStore};
use crate::error::{EngineError, Result};
use crate::models::{
    AccessRecord, AccessState, AccessTransition, AnomalyScore, ContentItem, ContentVector,
    InteractionEvent, NewInteractionEvent, PopulationBaseline, RecommendationBatchJob,
    RecommendationList, TimeWindow, UserProfile,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
pub struct InMemoryStore {
    content: DashMap<Uuid, ContentItem>,
    vectors: DashMap<Uuid, ContentVector>,
    events: RwLock<Vec<InteractionEvent>>,
    /// Append time of each event, parallel to `events`
    appended_at: RwLock<Vec<DateTime<Utc>>>,
    profiles: DashMap<Uuid, UserProfile>,
    access: DashMap<Uuid, AccessRecord>,
    transitions: DashMap<Uuid, Vec<AccessTransition>>,
    scores: DashMap<Uuid, AnomalyScore>,
    baseline: RwLock<Option<PopulationBaseline>>,
    recommendations: DashMap<Uuid, RecommendationList>,
    jobs: DashMap<Uuid, RecommendationBatchJob>,
    checkpoints: DashMap<String, i64>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read_events<T>(&self, f: impl FnOnce(&[InteractionEvent]) -> T) -> Result<T> {
        let events = self
            .events
            .read()
            .map_err(|_| EngineError::Internal("event log lock poisoned".to_string()))?;
        Ok(f(&events))
    }
}

#[async_trait]
impl ContentStore for InMemoryStore {
    async fn upsert_content(&self, item: ContentItem) -> Result<()> {
        self.content.insert(item.id, item);
        Ok(())
    }

    async fn get_content(&self, content_id: Uuid) -> Result<Option<ContentItem>> {
        Ok(self.content.get(&content_id).map(|c| c.clone()))
    }

    async fn delete_content(&self, content_id: Uuid) -> Result<bool> {
        self.vectors.remove(&content_id);
        Ok(self.content.remove(&content_id).is_some())
    }

    async fn list_content(&self) -> Result<Vec<ContentItem>> {
        let mut items: Vec<ContentItem> = self.content.iter().map(|c| c.clone()).collect();
        items.sort_by_key(|c| c.id);
        Ok(items)
    }

    async fn catalog_ids(&self) -> Result<HashSet<Uuid>> {
        Ok(self.content.iter().map(|c| *c.key()).collect())
    }

    async fn put_vector(&self, vector: ContentVector) -> Result<()> {
        self.vectors.insert(vector.content_id, vector);
        Ok(())
    }

    async fn get_vectors(&self, content_ids: &[Uuid]) -> Result<HashMap<Uuid, ContentVector>> {
        Ok(content_ids
            .iter()
            .filter_map(|id| self.vectors.get(id).map(|v| (*id, v.clone())))
            .collect())
    }

    async fn all_vectors(&self) -> Result<Vec<ContentVector>> {
        let mut vectors: Vec<ContentVector> = self.vectors.iter().map(|v| v.clone()).collect();
        vectors.sort_by_key(|v| v.content_id);
        Ok(vectors)
    }
}

#[async_trait]
impl EventLog for InMemoryStore {
    async fn append(&self, event: NewInteractionEvent) -> Result<InteractionEvent> {
        let mut events = self
            .events
            .write()
            .map_err(|_| EngineError::Internal("event log lock poisoned".to_string()))?;
        let mut appended_at = self
            .appended_at
            .write()
            .map_err(|_| EngineError::Internal("event log lock poisoned".to_string()))?;
        let seq = events.last().map(|e| e.seq).unwrap_or(0) + 1;
        let event = event.into_event(seq);
        events.push(event.clone());
        appended_at.push(Utc::now());
        Ok(event)
    }

    async fn events_for_user_after(
        &self,
        user_id: Uuid,
        after_seq: i64,
        up_to_seq: i64,
    ) -> Result<Vec<InteractionEvent>> {
        self.read_events(|events| {
            events
                .iter()
                .filter(|e| e.user_id == user_id && e.seq > after_seq && e.seq <= up_to_seq)
                .cloned()
                .collect()
        })
    }

    async fn events_for_user_in(
        &self,
        user_id: Uuid,
        window: TimeWindow,
    ) -> Result<Vec<InteractionEvent>> {
        self.read_events(|events| {
            events
                .iter()
                .filter(|e| e.user_id == user_id && window.contains(e.occurred_at))
                .cloned()
                .collect()
        })
    }

    async fn events_in(&self, window: TimeWindow) -> Result<Vec<InteractionEvent>> {
        self.read_events(|events| {
            events
                .iter()
                .filter(|e| window.contains(e.occurred_at))
                .cloned()
                .collect()
        })
    }

    async fn users_with_events_after(
        &self,
        after_seq: i64,
        up_to_seq: i64,
        limit: usize,
    ) -> Result<Vec<Uuid>> {
        self.read_events(|events| {
            let mut seen = HashSet::new();
            let mut users = Vec::new();
            for event in events
                .iter()
                .filter(|e| e.seq > after_seq && e.seq <= up_to_seq)
            {
                if seen.insert(event.user_id) {
                    users.push(event.user_id);
                    if limit > 0 && users.len() >= limit {
                        break;
                    }
                }
            }
            users
        })
    }

    async fn active_users(&self, since: DateTime<Utc>, limit: usize) -> Result<Vec<Uuid>> {
        self.read_events(|events| {
            let mut latest: HashMap<Uuid, DateTime<Utc>> = HashMap::new();
            for event in events.iter().filter(|e| e.occurred_at >= since) {
                let entry = latest.entry(event.user_id).or_insert(event.occurred_at);
                if event.occurred_at > *entry {
                    *entry = event.occurred_at;
                }
            }
            let mut users: Vec<(Uuid, DateTime<Utc>)> = latest.into_iter().collect();
            users.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
            if limit > 0 {
                users.truncate(limit);
            }
            users.into_iter().map(|(id, _)| id).collect()
        })
    }

    async fn max_seq(&self) -> Result<i64> {
        self.read_events(|events| events.last().map(|e| e.seq).unwrap_or(0))
    }

    async fn settled_seq(&self, appended_before: DateTime<Utc>) -> Result<i64> {
        // Released before `read_events`; `append` locks events first.
        let settled = self
            .appended_at
            .read()
            .map_err(|_| EngineError::Internal("event log lock poisoned".to_string()))?
            .iter()
            .take_while(|at| **at <= appended_before)
            .count();
        self.read_events(|events| {
            settled
                .checked_sub(1)
                .and_then(|idx| events.get(idx))
                .map(|e| e.seq)
                .unwrap_or(0)
        })
    }
}

#[async_trait]
impl ProfileStore for InMemoryStore {
    async fn get_profile(&self, user_id: Uuid) -> Result<Option<UserProfile>> {
        Ok(self.profiles.get(&user_id).map(|p| p.clone()))
    }

    async fn put_profile(&self, profile: UserProfile) -> Result<bool> {
        let mut entry = self
            .profiles
            .entry(profile.user_id)
            .or_insert_with(|| profile.clone());
        if entry.write_key() > profile.write_key() {
            return Ok(false);
        }
        *entry = profile;
        Ok(true)
    }

    async fn users_with_stale_profiles(
        &self,
        scheme_version: &str,
        limit: usize,
    ) -> Result<Vec<Uuid>> {
        let mut users: Vec<Uuid> = self
            .profiles
            .iter()
            .filter(|p| p.scheme_version != scheme_version)
            .map(|p| p.user_id)
            .collect();
        users.sort();
        if limit > 0 {
            users.truncate(limit);
        }
        Ok(users)
    }
}

#[async_trait]
impl AccessStore for InMemoryStore {
    async fn get_access(&self, user_id: Uuid) -> Result<Option<AccessRecord>> {
        Ok(self.access.get(&user_id).map(|r| r.clone()))
    }

    async fn apply_transition(
        &self,
        record: AccessRecord,
        transition: AccessTransition,
    ) -> Result<()> {
        // The entry guard keeps the shard locked until both writes are in.
        let entry = self.access.entry(record.user_id);
        let current = match &entry {
            Entry::Occupied(slot) => slot.get().state,
            Entry::Vacant(_) => AccessState::Active,
        };
        if current != transition.from_state {
            return Err(EngineError::InvalidTransition {
                from: current.to_string(),
                to: transition.to_state.to_string(),
            });
        }

        self.transitions
            .entry(transition.user_id)
            .or_default()
            .push(transition);
        match entry {
            Entry::Occupied(mut slot) => {
                slot.insert(record);
            }
            Entry::Vacant(slot) => {
                slot.insert(record);
            }
        }
        Ok(())
    }

    async fn transitions(&self, user_id: Uuid) -> Result<Vec<AccessTransition>> {
        Ok(self
            .transitions
            .get(&user_id)
            .map(|t| t.clone())
            .unwrap_or_default())
    }

    async fn get_anomaly_score(&self, user_id: Uuid) -> Result<Option<AnomalyScore>> {
        Ok(self.scores.get(&user_id).map(|s| s.clone()))
    }

    async fn put_anomaly_score(&self, score: AnomalyScore) -> Result<()> {
        self.scores.insert(score.user_id, score);
        Ok(())
    }

    async fn get_baseline(&self) -> Result<Option<PopulationBaseline>> {
        let baseline = self
            .baseline
            .read()
            .map_err(|_| EngineError::Internal("baseline lock poisoned".to_string()))?;
        Ok(baseline.clone())
    }

    async fn put_baseline(&self, baseline: PopulationBaseline) -> Result<()> {
        let mut slot = self
            .baseline
            .write()
            .map_err(|_| EngineError::Internal("baseline lock poisoned".to_string()))?;
        *slot = Some(baseline);
        Ok(())
    }
}

#[async_trait]
impl RecommendationStore for InMemoryStore {
    async fn put_recommendations(&self, list: RecommendationList) -> Result<()> {
        self.recommendations.insert(list.user_id, list);
        Ok(())
    }

    async fn get_recommendations(&self, user_id: Uuid) -> Result<Option<RecommendationList>> {
        Ok(self.recommendations.get(&user_id).map(|l| l.clone()))
    }
}

#[async_trait]
impl JobStore for InMemoryStore {
    async fn put_job(&self, job: RecommendationBatchJob) -> Result<()> {
        self.jobs.insert(job.id, job);
        Ok(())
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Option<RecommendationBatchJob>> {
        Ok(self.jobs.get(&job_id).map(|j| j.clone()))
    }

    async fn jobs_for_batch(&self, batch_id: Uuid) -> Result<Vec<RecommendationBatchJob>> {
        let mut jobs: Vec<RecommendationBatchJob> = self
            .jobs
            .iter()
            .filter(|j| j.batch_id == batch_id)
            .map(|j| j.clone())
            .collect();
        jobs.sort_by_key(|j| j.chunk_index);
        Ok(jobs)
    }

    async fn get_checkpoint(&self, name: &str) -> Result<i64> {
        Ok(self.checkpoints.get(name).map(|c| *c).unwrap_or(0))
    }

    async fn set_checkpoint(&self, name: &str, seq: i64) -> Result<()> {
        self.checkpoints.insert(name.to_string(), seq);
        Ok(())
    }
}
