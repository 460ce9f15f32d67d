use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Kind of interaction reported by the collector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Impression,
    Click,
    Completion,
    Like,
    Comment,
}

impl EventKind {
    pub const ALL: [EventKind; 5] = [
        EventKind::Impression,
        EventKind::Click,
        EventKind::Completion,
        EventKind::Like,
        EventKind::Comment,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Impression => "impression",
            EventKind::Click => "click",
            EventKind::Completion => "completion",
            EventKind::Like => "like",
            EventKind::Comment => "comment",
        }
    }

    /// Counts as a relevant outcome for ranking-quality metrics.
    pub fn is_positive(&self) -> bool {
        match self {
            EventKind::Impression => false,
            EventKind::Click | EventKind::Completion | EventKind::Like | EventKind::Comment => {
                true
            }
        }
    }
}

impl FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("unknown event kind: {}", s))
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Generation path that produced a recommendation impression
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationSource {
    /// Cosine similarity against the user profile
    ContentBased,
    /// Cold-start fallback ranked by recent positive interactions
    Popularity,
}

impl RecommendationSource {
    pub const ALL: [RecommendationSource; 2] = [
        RecommendationSource::ContentBased,
        RecommendationSource::Popularity,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RecommendationSource::ContentBased => "content_based",
            RecommendationSource::Popularity => "popularity",
        }
    }
}

impl FromStr for RecommendationSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RecommendationSource::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("unknown recommendation source: {}", s))
    }
}

impl fmt::Display for RecommendationSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Append-only interaction log record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionEvent {
    /// Monotonic sequence assigned by the log on append
    pub seq: i64,
    pub user_id: Uuid,
    pub content_id: Uuid,
    pub kind: EventKind,
    pub occurred_at: DateTime<Utc>,
    pub source: Option<RecommendationSource>,
    /// Rank in the delivered list (impressions only)
    pub position: Option<u32>,
    /// Collaborator-supplied engagement score in [0, 1]
    pub engagement: Option<f32>,
}

/// Event as submitted by the collector, before the log assigns `seq`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewInteractionEvent {
    pub user_id: Uuid,
    pub content_id: Uuid,
    pub kind: EventKind,
    pub occurred_at: DateTime<Utc>,
    #[serde(default)]
    pub source: Option<RecommendationSource>,
    #[serde(default)]
    pub position: Option<u32>,
    #[serde(default)]
    pub engagement: Option<f32>,
}

impl NewInteractionEvent {
    pub fn new(user_id: Uuid, content_id: Uuid, kind: EventKind, occurred_at: DateTime<Utc>) -> Self {
        Self {
            user_id,
            content_id,
            kind,
            occurred_at,
            source: None,
            position: None,
            engagement: None,
        }
    }

    pub fn with_source(mut self, source: RecommendationSource) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_position(mut self, position: u32) -> Self {
        self.position = Some(position);
        self
    }

    pub fn with_engagement(mut self, engagement: f32) -> Self {
        self.engagement = Some(engagement);
        self
    }

    pub fn into_event(self, seq: i64) -> InteractionEvent {
        InteractionEvent {
            seq,
            user_id: self.user_id,
            content_id: self.content_id,
            kind: self.kind,
            occurred_at: self.occurred_at,
            source: self.source,
            position: self.position,
            engagement: self.engagement.map(|e| e.clamp(0.0, 1.0)),
        }
    }
}

/// Half-open time interval `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// Window ending at `end` and reaching back `hours`
    pub fn trailing_hours(end: DateTime<Utc>, hours: i64) -> Self {
        Self {
            start: end - Duration::hours(hours),
            end,
        }
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start && ts < self.end
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}
