//! Postgres-backed store.
//!
//! Schema lives in `migrations/`. Enum columns are stored as TEXT using the
//! `as_str` names of the model enums.

use super::{AccessStore, ContentStore, EventLog, JobStore, ProfileStore, RecommendationStore};
use crate::error::{EngineError, Result};
use crate::models::{
    AccessRecord, AccessState, AccessTransition, AnomalyScore, ContentItem, ContentVector,
    EventKind, InteractionEvent, JobStatus, NewInteractionEvent, PopulationBaseline, Provenance,
    RecommendationBatchJob, RecommendationList, RecommendationSource, ScoredItem,
    SignalBreakdown, TimeWindow, UserProfile,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use uuid::Uuid;

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        Ok(Self::new(pool))
    }

    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| EngineError::Database(format!("migration failed: {}", e)))?;
        Ok(())
    }
}

fn parse<T: FromStr<Err = String>>(value: &str) -> Result<T> {
    value.parse::<T>().map_err(EngineError::Database)
}

fn to_i64(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn to_usize(value: i64) -> usize {
    usize::try_from(value).unwrap_or(0)
}

#[derive(FromRow)]
struct ContentRow {
    id: Uuid,
    title: String,
    body: String,
    categories: Vec<String>,
    tags: Vec<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<ContentRow> for ContentItem {
    fn from(row: ContentRow) -> Self {
        ContentItem {
            id: row.id,
            title: row.title,
            body: row.body,
            categories: row.categories,
            tags: row.tags,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(FromRow)]
struct VectorRow {
    content_id: Uuid,
    vals: Vec<f32>,
    scheme_version: String,
    primary_category: Option<String>,
    source_updated_at: DateTime<Utc>,
    published_at: DateTime<Utc>,
    extracted_at: DateTime<Utc>,
}

impl From<VectorRow> for ContentVector {
    fn from(row: VectorRow) -> Self {
        ContentVector {
            content_id: row.content_id,
            values: row.vals,
            scheme_version: row.scheme_version,
            primary_category: row.primary_category,
            source_updated_at: row.source_updated_at,
            published_at: row.published_at,
            extracted_at: row.extracted_at,
        }
    }
}

#[derive(FromRow)]
struct EventRow {
    seq: i64,
    user_id: Uuid,
    content_id: Uuid,
    kind: String,
    occurred_at: DateTime<Utc>,
    source: Option<String>,
    position: Option<i32>,
    engagement: Option<f32>,
}

impl TryFrom<EventRow> for InteractionEvent {
    type Error = EngineError;

    fn try_from(row: EventRow) -> Result<Self> {
        Ok(InteractionEvent {
            seq: row.seq,
            user_id: row.user_id,
            content_id: row.content_id,
            kind: parse::<EventKind>(&row.kind)?,
            occurred_at: row.occurred_at,
            source: row
                .source
                .as_deref()
                .map(parse::<RecommendationSource>)
                .transpose()?,
            position: row.position.and_then(|p| u32::try_from(p).ok()),
            engagement: row.engagement,
        })
    }
}

fn collect_events(rows: Vec<EventRow>) -> Result<Vec<InteractionEvent>> {
    rows.into_iter().map(InteractionEvent::try_from).collect()
}

const EVENT_COLUMNS: &str =
    "seq, user_id, content_id, kind, occurred_at, source, position, engagement";

#[derive(FromRow)]
struct ProfileRow {
    user_id: Uuid,
    vector: Vec<f32>,
    weighted_sum: Vec<f64>,
    total_weight: f64,
    event_count: i64,
    watermark: Option<DateTime<Utc>>,
    last_event_seq: i64,
    scheme_version: String,
    updated_at: DateTime<Utc>,
}

impl From<ProfileRow> for UserProfile {
    fn from(row: ProfileRow) -> Self {
        UserProfile {
            user_id: row.user_id,
            vector: row.vector,
            weighted_sum: row.weighted_sum,
            total_weight: row.total_weight,
            event_count: u64::try_from(row.event_count).unwrap_or(0),
            watermark: row.watermark,
            last_event_seq: row.last_event_seq,
            scheme_version: row.scheme_version,
            updated_at: row.updated_at,
        }
    }
}

#[derive(FromRow)]
struct AccessRow {
    user_id: Uuid,
    state: String,
    score: Option<f64>,
    reason: Option<String>,
    blocked_at: Option<DateTime<Utc>>,
    unblocked_at: Option<DateTime<Utc>>,
    unblocked_by: Option<String>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<AccessRow> for AccessRecord {
    type Error = EngineError;

    fn try_from(row: AccessRow) -> Result<Self> {
        Ok(AccessRecord {
            user_id: row.user_id,
            state: parse::<AccessState>(&row.state)?,
            score: row.score,
            reason: row.reason,
            blocked_at: row.blocked_at,
            unblocked_at: row.unblocked_at,
            unblocked_by: row.unblocked_by,
            updated_at: row.updated_at,
        })
    }
}

#[derive(FromRow)]
struct TransitionRow {
    id: Uuid,
    user_id: Uuid,
    from_state: String,
    to_state: String,
    actor: String,
    reason: Option<String>,
    score: Option<f64>,
    occurred_at: DateTime<Utc>,
}

impl TryFrom<TransitionRow> for AccessTransition {
    type Error = EngineError;

    fn try_from(row: TransitionRow) -> Result<Self> {
        Ok(AccessTransition {
            id: row.id,
            user_id: row.user_id,
            from_state: parse::<AccessState>(&row.from_state)?,
            to_state: parse::<AccessState>(&row.to_state)?,
            actor: row.actor,
            reason: row.reason,
            score: row.score,
            occurred_at: row.occurred_at,
        })
    }
}

#[derive(FromRow)]
struct ScoreRow {
    user_id: Uuid,
    score: f64,
    raw_score: f64,
    rate_signal: f64,
    category_signal: f64,
    abuse_signal: f64,
    events_in_window: i64,
    evaluated_at: DateTime<Utc>,
    reason: Option<String>,
}

impl From<ScoreRow> for AnomalyScore {
    fn from(row: ScoreRow) -> Self {
        AnomalyScore {
            user_id: row.user_id,
            score: row.score,
            raw_score: row.raw_score,
            signals: SignalBreakdown {
                rate: row.rate_signal,
                category_deviation: row.category_signal,
                abuse: row.abuse_signal,
            },
            events_in_window: to_usize(row.events_in_window),
            evaluated_at: row.evaluated_at,
            reason: row.reason,
        }
    }
}

#[derive(FromRow)]
struct BaselineRow {
    mean_rate_per_minute: f64,
    std_rate_per_minute: f64,
    sample_users: i64,
    window_hours: i64,
    computed_at: DateTime<Utc>,
}

#[derive(FromRow)]
struct RecommendationRow {
    user_id: Uuid,
    k: i64,
    items: Json<Vec<ScoredItem>>,
    source: String,
    generated_at: DateTime<Utc>,
    job_id: Option<Uuid>,
}

#[derive(FromRow)]
struct JobRow {
    id: Uuid,
    batch_id: Uuid,
    chunk_index: i64,
    user_ids: Vec<Uuid>,
    k: i64,
    status: String,
    attempts: i32,
    succeeded: i64,
    failure_count: i64,
    last_error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<JobRow> for RecommendationBatchJob {
    type Error = EngineError;

    fn try_from(row: JobRow) -> Result<Self> {
        Ok(RecommendationBatchJob {
            id: row.id,
            batch_id: row.batch_id,
            chunk_index: to_usize(row.chunk_index),
            user_ids: row.user_ids,
            k: to_usize(row.k),
            status: parse::<JobStatus>(&row.status)?,
            attempts: u32::try_from(row.attempts).unwrap_or(0),
            succeeded: to_usize(row.succeeded),
            failure_count: to_usize(row.failure_count),
            last_error: row.last_error,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[async_trait]
impl ContentStore for PgStore {
    async fn upsert_content(&self, item: ContentItem) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO content_items (id, title, body, categories, tags, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO UPDATE
            SET title = EXCLUDED.title,
                body = EXCLUDED.body,
                categories = EXCLUDED.categories,
                tags = EXCLUDED.tags,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(item.id)
        .bind(&item.title)
        .bind(&item.body)
        .bind(&item.categories)
        .bind(&item.tags)
        .bind(item.created_at)
        .bind(item.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_content(&self, content_id: Uuid) -> Result<Option<ContentItem>> {
        let row = sqlx::query_as::<_, ContentRow>(
            r#"
            SELECT id, title, body, categories, tags, created_at, updated_at
            FROM content_items
            WHERE id = $1
            "#,
        )
        .bind(content_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(ContentItem::from))
    }

    async fn delete_content(&self, content_id: Uuid) -> Result<bool> {
        // content_vectors rows go with the item (ON DELETE CASCADE)
        let result = sqlx::query("DELETE FROM content_items WHERE id = $1")
            .bind(content_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_content(&self) -> Result<Vec<ContentItem>> {
        let rows = sqlx::query_as::<_, ContentRow>(
            r#"
            SELECT id, title, body, categories, tags, created_at, updated_at
            FROM content_items
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(ContentItem::from).collect())
    }

    async fn catalog_ids(&self) -> Result<HashSet<Uuid>> {
        let ids: Vec<Uuid> = sqlx::query_scalar("SELECT id FROM content_items")
            .fetch_all(&self.pool)
            .await?;
        Ok(ids.into_iter().collect())
    }

    async fn put_vector(&self, vector: ContentVector) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO content_vectors (
                content_id, vals, scheme_version, primary_category,
                source_updated_at, published_at, extracted_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (content_id) DO UPDATE
            SET vals = EXCLUDED.vals,
                scheme_version = EXCLUDED.scheme_version,
                primary_category = EXCLUDED.primary_category,
                source_updated_at = EXCLUDED.source_updated_at,
                published_at = EXCLUDED.published_at,
                extracted_at = EXCLUDED.extracted_at
            "#,
        )
        .bind(vector.content_id)
        .bind(&vector.values)
        .bind(&vector.scheme_version)
        .bind(&vector.primary_category)
        .bind(vector.source_updated_at)
        .bind(vector.published_at)
        .bind(vector.extracted_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_vectors(&self, content_ids: &[Uuid]) -> Result<HashMap<Uuid, ContentVector>> {
        let rows = sqlx::query_as::<_, VectorRow>(
            r#"
            SELECT content_id, vals, scheme_version, primary_category,
                   source_updated_at, published_at, extracted_at
            FROM content_vectors
            WHERE content_id = ANY($1)
            "#,
        )
        .bind(content_ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|row| (row.content_id, ContentVector::from(row)))
            .collect())
    }

    async fn all_vectors(&self) -> Result<Vec<ContentVector>> {
        let rows = sqlx::query_as::<_, VectorRow>(
            r#"
            SELECT content_id, vals, scheme_version, primary_category,
                   source_updated_at, published_at, extracted_at
            FROM content_vectors
            ORDER BY content_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(ContentVector::from).collect())
    }
}

#[async_trait]
impl EventLog for PgStore {
    async fn append(&self, event: NewInteractionEvent) -> Result<InteractionEvent> {
        let position = event
            .position
            .map(i32::try_from)
            .transpose()
            .map_err(|_| EngineError::Validation("position is out of range".to_string()))?;
        let row = sqlx::query_as::<_, EventRow>(&format!(
            r#"
            INSERT INTO interaction_events (
                user_id, content_id, kind, occurred_at, source, position, engagement
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {}
            "#,
            EVENT_COLUMNS
        ))
        .bind(event.user_id)
        .bind(event.content_id)
        .bind(event.kind.as_str())
        .bind(event.occurred_at)
        .bind(event.source.map(|s| s.as_str()))
        .bind(position)
        .bind(event.engagement.map(|e| e.clamp(0.0, 1.0)))
        .fetch_one(&self.pool)
        .await?;
        InteractionEvent::try_from(row)
    }

    async fn events_for_user_after(
        &self,
        user_id: Uuid,
        after_seq: i64,
        up_to_seq: i64,
    ) -> Result<Vec<InteractionEvent>> {
        let rows = sqlx::query_as::<_, EventRow>(&format!(
            r#"
            SELECT {}
            FROM interaction_events
            WHERE user_id = $1 AND seq > $2 AND seq <= $3
            ORDER BY seq
            "#,
            EVENT_COLUMNS
        ))
        .bind(user_id)
        .bind(after_seq)
        .bind(up_to_seq)
        .fetch_all(&self.pool)
        .await?;
        collect_events(rows)
    }

    async fn events_for_user_in(
        &self,
        user_id: Uuid,
        window: TimeWindow,
    ) -> Result<Vec<InteractionEvent>> {
        let rows = sqlx::query_as::<_, EventRow>(&format!(
            r#"
            SELECT {}
            FROM interaction_events
            WHERE user_id = $1 AND occurred_at >= $2 AND occurred_at < $3
            ORDER BY seq
            "#,
            EVENT_COLUMNS
        ))
        .bind(user_id)
        .bind(window.start)
        .bind(window.end)
        .fetch_all(&self.pool)
        .await?;
        collect_events(rows)
    }

    async fn events_in(&self, window: TimeWindow) -> Result<Vec<InteractionEvent>> {
        let rows = sqlx::query_as::<_, EventRow>(&format!(
            r#"
            SELECT {}
            FROM interaction_events
            WHERE occurred_at >= $1 AND occurred_at < $2
            ORDER BY seq
            "#,
            EVENT_COLUMNS
        ))
        .bind(window.start)
        .bind(window.end)
        .fetch_all(&self.pool)
        .await?;
        collect_events(rows)
    }

    async fn users_with_events_after(
        &self,
        after_seq: i64,
        up_to_seq: i64,
        limit: usize,
    ) -> Result<Vec<Uuid>> {
        let limit = if limit == 0 { i64::MAX } else { to_i64(limit) };
        let users: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT user_id
            FROM interaction_events
            WHERE seq > $1 AND seq <= $2
            GROUP BY user_id
            ORDER BY MIN(seq)
            LIMIT $3
            "#,
        )
        .bind(after_seq)
        .bind(up_to_seq)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(users)
    }

    async fn active_users(&self, since: DateTime<Utc>, limit: usize) -> Result<Vec<Uuid>> {
        let limit = if limit == 0 { i64::MAX } else { to_i64(limit) };
        let users: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT user_id
            FROM interaction_events
            WHERE occurred_at >= $1
            GROUP BY user_id
            ORDER BY MAX(occurred_at) DESC, user_id
            LIMIT $2
            "#,
        )
        .bind(since)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(users)
    }

    async fn max_seq(&self) -> Result<i64> {
        let seq: Option<i64> = sqlx::query_scalar("SELECT MAX(seq) FROM interaction_events")
            .fetch_one(&self.pool)
            .await?;
        Ok(seq.unwrap_or(0))
    }

    async fn settled_seq(&self, appended_before: DateTime<Utc>) -> Result<i64> {
        // Everything below the first row appended after the cutoff
        let seq: i64 = sqlx::query_scalar(
            r#"
            SELECT COALESCE(
                (SELECT MIN(seq) - 1 FROM interaction_events WHERE recorded_at > $1),
                (SELECT MAX(seq) FROM interaction_events),
                0
            )
            "#,
        )
        .bind(appended_before)
        .fetch_one(&self.pool)
        .await?;
        Ok(seq)
    }
}

#[async_trait]
impl ProfileStore for PgStore {
    async fn get_profile(&self, user_id: Uuid) -> Result<Option<UserProfile>> {
        let row = sqlx::query_as::<_, ProfileRow>(
            r#"
            SELECT user_id, vector, weighted_sum, total_weight, event_count,
                   watermark, last_event_seq, scheme_version, updated_at
            FROM user_profiles
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(UserProfile::from))
    }

    async fn put_profile(&self, profile: UserProfile) -> Result<bool> {
        // NULL watermark sorts first, so any folded profile replaces an empty one
        let result = sqlx::query(
            r#"
            INSERT INTO user_profiles (
                user_id, vector, weighted_sum, total_weight, event_count,
                watermark, last_event_seq, scheme_version, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (user_id) DO UPDATE
            SET vector = EXCLUDED.vector,
                weighted_sum = EXCLUDED.weighted_sum,
                total_weight = EXCLUDED.total_weight,
                event_count = EXCLUDED.event_count,
                watermark = EXCLUDED.watermark,
                last_event_seq = EXCLUDED.last_event_seq,
                scheme_version = EXCLUDED.scheme_version,
                updated_at = EXCLUDED.updated_at
            WHERE (COALESCE(user_profiles.watermark, '-infinity'::timestamptz), user_profiles.last_event_seq)
               <= (COALESCE(EXCLUDED.watermark, '-infinity'::timestamptz), EXCLUDED.last_event_seq)
            "#,
        )
        .bind(profile.user_id)
        .bind(&profile.vector)
        .bind(&profile.weighted_sum)
        .bind(profile.total_weight)
        .bind(i64::try_from(profile.event_count).unwrap_or(i64::MAX))
        .bind(profile.watermark)
        .bind(profile.last_event_seq)
        .bind(&profile.scheme_version)
        .bind(profile.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn users_with_stale_profiles(
        &self,
        scheme_version: &str,
        limit: usize,
    ) -> Result<Vec<Uuid>> {
        let limit = if limit == 0 { i64::MAX } else { to_i64(limit) };
        let users: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT user_id
            FROM user_profiles
            WHERE scheme_version <> $1
            ORDER BY user_id
            LIMIT $2
            "#,
        )
        .bind(scheme_version)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(users)
    }
}

#[async_trait]
impl AccessStore for PgStore {
    async fn get_access(&self, user_id: Uuid) -> Result<Option<AccessRecord>> {
        let row = sqlx::query_as::<_, AccessRow>(
            r#"
            SELECT user_id, state, score, reason, blocked_at, unblocked_at,
                   unblocked_by, updated_at
            FROM access_records
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(AccessRecord::try_from).transpose()
    }

    async fn apply_transition(
        &self,
        record: AccessRecord,
        transition: AccessTransition,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let current: Option<String> = sqlx::query_scalar(
            "SELECT state FROM access_records WHERE user_id = $1 FOR UPDATE",
        )
        .bind(record.user_id)
        .fetch_optional(&mut *tx)
        .await?;
        let current = current
            .as_deref()
            .map(parse::<AccessState>)
            .transpose()?
            .unwrap_or(AccessState::Active);
        if current != transition.from_state {
            return Err(EngineError::InvalidTransition {
                from: current.to_string(),
                to: transition.to_state.to_string(),
            });
        }

        // A concurrent first insert for the same user leaves nothing to update.
        let written = sqlx::query(
            r#"
            INSERT INTO access_records (
                user_id, state, score, reason, blocked_at, unblocked_at,
                unblocked_by, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (user_id) DO UPDATE
            SET state = EXCLUDED.state,
                score = EXCLUDED.score,
                reason = EXCLUDED.reason,
                blocked_at = EXCLUDED.blocked_at,
                unblocked_at = EXCLUDED.unblocked_at,
                unblocked_by = EXCLUDED.unblocked_by,
                updated_at = EXCLUDED.updated_at
            WHERE access_records.state = $9
            "#,
        )
        .bind(record.user_id)
        .bind(record.state.as_str())
        .bind(record.score)
        .bind(&record.reason)
        .bind(record.blocked_at)
        .bind(record.unblocked_at)
        .bind(&record.unblocked_by)
        .bind(record.updated_at)
        .bind(transition.from_state.as_str())
        .execute(&mut *tx)
        .await?
        .rows_affected();
        if written == 0 {
            return Err(EngineError::InvalidTransition {
                from: transition.from_state.to_string(),
                to: transition.to_state.to_string(),
            });
        }

        sqlx::query(
            r#"
            INSERT INTO access_transitions (
                id, user_id, from_state, to_state, actor, reason, score, occurred_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(transition.id)
        .bind(transition.user_id)
        .bind(transition.from_state.as_str())
        .bind(transition.to_state.as_str())
        .bind(&transition.actor)
        .bind(&transition.reason)
        .bind(transition.score)
        .bind(transition.occurred_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn transitions(&self, user_id: Uuid) -> Result<Vec<AccessTransition>> {
        let rows = sqlx::query_as::<_, TransitionRow>(
            r#"
            SELECT id, user_id, from_state, to_state, actor, reason, score, occurred_at
            FROM access_transitions
            WHERE user_id = $1
            ORDER BY occurred_at
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(AccessTransition::try_from).collect()
    }

    async fn get_anomaly_score(&self, user_id: Uuid) -> Result<Option<AnomalyScore>> {
        let row = sqlx::query_as::<_, ScoreRow>(
            r#"
            SELECT user_id, score, raw_score, rate_signal, category_signal, abuse_signal,
                   events_in_window, evaluated_at, reason
            FROM anomaly_scores
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(AnomalyScore::from))
    }

    async fn put_anomaly_score(&self, score: AnomalyScore) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO anomaly_scores (
                user_id, score, raw_score, rate_signal, category_signal, abuse_signal,
                events_in_window, evaluated_at, reason
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (user_id) DO UPDATE
            SET score = EXCLUDED.score,
                raw_score = EXCLUDED.raw_score,
                rate_signal = EXCLUDED.rate_signal,
                category_signal = EXCLUDED.category_signal,
                abuse_signal = EXCLUDED.abuse_signal,
                events_in_window = EXCLUDED.events_in_window,
                evaluated_at = EXCLUDED.evaluated_at,
                reason = EXCLUDED.reason
            "#,
        )
        .bind(score.user_id)
        .bind(score.score)
        .bind(score.raw_score)
        .bind(score.signals.rate)
        .bind(score.signals.category_deviation)
        .bind(score.signals.abuse)
        .bind(to_i64(score.events_in_window))
        .bind(score.evaluated_at)
        .bind(&score.reason)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_baseline(&self) -> Result<Option<PopulationBaseline>> {
        let row = sqlx::query_as::<_, BaselineRow>(
            r#"
            SELECT mean_rate_per_minute, std_rate_per_minute, sample_users,
                   window_hours, computed_at
            FROM population_baselines
            ORDER BY computed_at DESC
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|row| PopulationBaseline {
            mean_rate_per_minute: row.mean_rate_per_minute,
            std_rate_per_minute: row.std_rate_per_minute,
            sample_users: to_usize(row.sample_users),
            window_hours: row.window_hours,
            computed_at: row.computed_at,
        }))
    }

    async fn put_baseline(&self, baseline: PopulationBaseline) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO population_baselines (
                mean_rate_per_minute, std_rate_per_minute, sample_users,
                window_hours, computed_at
            )
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(baseline.mean_rate_per_minute)
        .bind(baseline.std_rate_per_minute)
        .bind(to_i64(baseline.sample_users))
        .bind(baseline.window_hours)
        .bind(baseline.computed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl RecommendationStore for PgStore {
    async fn put_recommendations(&self, list: RecommendationList) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO recommendation_lists (user_id, k, items, source, generated_at, job_id)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (user_id) DO UPDATE
            SET k = EXCLUDED.k,
                items = EXCLUDED.items,
                source = EXCLUDED.source,
                generated_at = EXCLUDED.generated_at,
                job_id = EXCLUDED.job_id
            "#,
        )
        .bind(list.user_id)
        .bind(to_i64(list.k))
        .bind(Json(&list.items))
        .bind(list.provenance.source.as_str())
        .bind(list.provenance.generated_at)
        .bind(list.provenance.job_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_recommendations(&self, user_id: Uuid) -> Result<Option<RecommendationList>> {
        let row = sqlx::query_as::<_, RecommendationRow>(
            r#"
            SELECT user_id, k, items, source, generated_at, job_id
            FROM recommendation_lists
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            Ok(RecommendationList {
                user_id: row.user_id,
                k: to_usize(row.k),
                items: row.items.0,
                provenance: Provenance {
                    source: parse::<RecommendationSource>(&row.source)?,
                    generated_at: row.generated_at,
                    job_id: row.job_id,
                },
            })
        })
        .transpose()
    }
}

#[async_trait]
impl JobStore for PgStore {
    async fn put_job(&self, job: RecommendationBatchJob) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO batch_jobs (
                id, batch_id, chunk_index, user_ids, k, status, attempts,
                succeeded, failure_count, last_error, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (id) DO UPDATE
            SET status = EXCLUDED.status,
                attempts = EXCLUDED.attempts,
                succeeded = EXCLUDED.succeeded,
                failure_count = EXCLUDED.failure_count,
                last_error = EXCLUDED.last_error,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(job.id)
        .bind(job.batch_id)
        .bind(to_i64(job.chunk_index))
        .bind(&job.user_ids)
        .bind(to_i64(job.k))
        .bind(job.status.as_str())
        .bind(i32::try_from(job.attempts).unwrap_or(i32::MAX))
        .bind(to_i64(job.succeeded))
        .bind(to_i64(job.failure_count))
        .bind(&job.last_error)
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Option<RecommendationBatchJob>> {
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            SELECT id, batch_id, chunk_index, user_ids, k, status, attempts,
                   succeeded, failure_count, last_error, created_at, updated_at
            FROM batch_jobs
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(RecommendationBatchJob::try_from).transpose()
    }

    async fn jobs_for_batch(&self, batch_id: Uuid) -> Result<Vec<RecommendationBatchJob>> {
        let rows = sqlx::query_as::<_, JobRow>(
            r#"
            SELECT id, batch_id, chunk_index, user_ids, k, status, attempts,
                   succeeded, failure_count, last_error, created_at, updated_at
            FROM batch_jobs
            WHERE batch_id = $1
            ORDER BY chunk_index
            "#,
        )
        .bind(batch_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(RecommendationBatchJob::try_from)
            .collect()
    }

    async fn get_checkpoint(&self, name: &str) -> Result<i64> {
        let seq: Option<i64> =
            sqlx::query_scalar("SELECT last_seq FROM job_checkpoints WHERE name = $1")
                .bind(name)
                .fetch_optional(&self.pool)
                .await?;
        Ok(seq.unwrap_or(0))
    }

    async fn set_checkpoint(&self, name: &str, seq: i64) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO job_checkpoints (name, last_seq, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (name) DO UPDATE
            SET last_seq = EXCLUDED.last_seq,
                updated_at = NOW()
            "#,
        )
        .bind(name)
        .bind(seq)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
