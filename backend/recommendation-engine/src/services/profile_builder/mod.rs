// ============================================
// Profile Builder
// ============================================
//
// Folds a user's interaction history into a preference vector:
//
//   S = Σ weight(kind) * 0.5^((watermark - t) / half_life) * v(content)
//   profile = S / |S|
//
// Decay is measured against the watermark (newest folded event) rather
// than wall-clock time, so a rebuild over the same events is identical.
// The un-normalized accumulator is kept on the profile; an incremental
// update rescales it to the new watermark and adds the new terms, which
// gives the same result as a full rebuild.

pub mod profile_updater;

pub use profile_updater::{ProfileUpdate, ProfileUpdater, UpdateMode};

use crate::config::{EventWeights, ProfileConfig};
use crate::error::{EngineError, Result};
use crate::models::{ContentVector, InteractionEvent, UserProfile};
use crate::utils::half_life_decay;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

pub struct ProfileBuilder {
    weights: EventWeights,
    half_life_hours: f64,
    dims: usize,
    scheme_version: String,
}

impl ProfileBuilder {
    pub fn new(config: &ProfileConfig, scheme_version: &str, dims: usize) -> Self {
        Self {
            weights: config.weights.clone(),
            half_life_hours: config.half_life_hours,
            dims,
            scheme_version: scheme_version.to_string(),
        }
    }

    /// Full rebuild from a user's history.
    ///
    /// Events whose content has no vector (deleted, never extracted) or a
    /// zero vector contribute nothing. A vector from another scheme is an
    /// error; callers regenerate stale vectors first.
    pub fn build_profile(
        &self,
        user_id: Uuid,
        events: &[InteractionEvent],
        vectors: &HashMap<Uuid, ContentVector>,
    ) -> Result<UserProfile> {
        let empty = UserProfile::empty(user_id, self.dims, &self.scheme_version);
        self.fold(empty, events, vectors)
    }

    /// Fold events newer than `prior.last_event_seq` into `prior`.
    pub fn update_profile(
        &self,
        prior: UserProfile,
        new_events: &[InteractionEvent],
        vectors: &HashMap<Uuid, ContentVector>,
    ) -> Result<UserProfile> {
        if !prior.is_compatible(&self.scheme_version, self.dims) {
            return Err(EngineError::DimensionMismatch {
                expected: self.dims,
                actual: prior.weighted_sum.len(),
            });
        }
        self.fold(prior, new_events, vectors)
    }

    pub fn scheme_version(&self) -> &str {
        &self.scheme_version
    }

    pub fn is_compatible(&self, profile: &UserProfile) -> bool {
        profile.is_compatible(&self.scheme_version, self.dims)
    }

    fn fold(
        &self,
        mut profile: UserProfile,
        events: &[InteractionEvent],
        vectors: &HashMap<Uuid, ContentVector>,
    ) -> Result<UserProfile> {
        let mut pending: Vec<&InteractionEvent> = events
            .iter()
            .filter(|e| e.user_id == profile.user_id && e.seq > profile.last_event_seq)
            .collect();
        if pending.is_empty() {
            return Ok(profile);
        }
        pending.sort_by_key(|e| e.seq);

        for event in &pending {
            if let Some(vector) = vectors.get(&event.content_id) {
                if vector.scheme_version != self.scheme_version || vector.values.len() != self.dims
                {
                    return Err(EngineError::StaleVector {
                        content_id: event.content_id,
                        found: vector.scheme_version.clone(),
                        expected: self.scheme_version.clone(),
                    });
                }
            }
        }

        let newest = pending.iter().map(|e| e.occurred_at).max();
        let watermark = match (profile.watermark, newest) {
            (Some(prior), Some(newest)) => prior.max(newest),
            (prior, newest) => newest.or(prior).unwrap_or_else(Utc::now),
        };

        if let Some(prior) = profile.watermark {
            let factor = half_life_decay(hours_between(prior, watermark), self.half_life_hours);
            for v in profile.weighted_sum.iter_mut() {
                *v *= factor;
            }
            profile.total_weight *= factor;
        }

        let mut skipped = 0usize;
        for event in &pending {
            let vector = match vectors.get(&event.content_id) {
                Some(v) if !v.is_zero() => v,
                _ => {
                    skipped += 1;
                    continue;
                }
            };

            let weight = self.weights.weight(event.kind) as f64
                * half_life_decay(
                    hours_between(event.occurred_at, watermark),
                    self.half_life_hours,
                );
            if weight <= 0.0 {
                continue;
            }

            for (acc, value) in profile.weighted_sum.iter_mut().zip(vector.values.iter()) {
                *acc += weight * (*value as f64);
            }
            profile.total_weight += weight;
            profile.event_count += 1;
        }

        if skipped > 0 {
            debug!(user_id = %profile.user_id, skipped, "Events without usable vectors skipped");
        }

        profile.vector = normalized(&profile.weighted_sum);
        profile.watermark = Some(watermark);
        profile.last_event_seq = pending
            .iter()
            .map(|e| e.seq)
            .max()
            .unwrap_or(profile.last_event_seq);
        profile.updated_at = Utc::now();

        Ok(profile)
    }
}

fn hours_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> f64 {
    (later - earlier).num_milliseconds() as f64 / 3_600_000.0
}

fn normalized(sum: &[f64]) -> Vec<f32> {
    let norm = sum.iter().map(|v| v * v).sum::<f64>().sqrt();
    if norm <= f64::EPSILON {
        return vec![0.0; sum.len()];
    }
    sum.iter().map(|v| (v / norm) as f32).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EventKind;
    use chrono::Duration;

    const SCHEME: &str = "test-v1";

    fn vector(content_id: Uuid, values: Vec<f32>) -> ContentVector {
        let now = Utc::now();
        ContentVector {
            content_id,
            values,
            scheme_version: SCHEME.to_string(),
            primary_category: None,
            source_updated_at: now,
            published_at: now,
            extracted_at: now,
        }
    }

    fn event(
        seq: i64,
        user_id: Uuid,
        content_id: Uuid,
        kind: EventKind,
        at: DateTime<Utc>,
    ) -> InteractionEvent {
        InteractionEvent {
            seq,
            user_id,
            content_id,
            kind,
            occurred_at: at,
            source: None,
            position: None,
            engagement: None,
        }
    }

    fn builder() -> ProfileBuilder {
        ProfileBuilder::new(&ProfileConfig::default(), SCHEME, 3)
    }

    fn assert_close(a: &[f32], b: &[f32]) {
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b) {
            assert!((x - y).abs() < 1e-5, "{:?} != {:?}", a, b);
        }
    }

    #[test]
    fn test_build_profile_is_deterministic() {
        let builder = builder();
        let user = Uuid::new_v4();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let now = Utc::now();
        let vectors = HashMap::from([
            (a, vector(a, vec![1.0, 0.0, 0.0])),
            (b, vector(b, vec![0.0, 1.0, 0.0])),
        ]);
        let events = vec![
            event(1, user, a, EventKind::Like, now - Duration::hours(10)),
            event(2, user, b, EventKind::Click, now),
        ];

        let first = builder.build_profile(user, &events, &vectors).unwrap();
        let second = builder.build_profile(user, &events, &vectors).unwrap();
        assert_eq!(first.vector, second.vector);
        assert_eq!(first.event_count, 2);
        assert_eq!(first.last_event_seq, 2);
    }

    #[test]
    fn test_decay_favors_recent_events() {
        let builder = builder();
        let user = Uuid::new_v4();
        let (old, recent) = (Uuid::new_v4(), Uuid::new_v4());
        let now = Utc::now();
        let vectors = HashMap::from([
            (old, vector(old, vec![1.0, 0.0, 0.0])),
            (recent, vector(recent, vec![0.0, 1.0, 0.0])),
        ]);
        let events = vec![
            event(1, user, old, EventKind::Like, now - Duration::hours(72 * 3)),
            event(2, user, recent, EventKind::Like, now),
        ];

        let profile = builder.build_profile(user, &events, &vectors).unwrap();
        assert!(profile.vector[1] > profile.vector[0]);
    }

    #[test]
    fn test_incremental_update_matches_full_rebuild() {
        let builder = builder();
        let user = Uuid::new_v4();
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let now = Utc::now();
        let vectors = HashMap::from([
            (a, vector(a, vec![1.0, 0.0, 0.0])),
            (b, vector(b, vec![0.0, 1.0, 0.0])),
            (c, vector(c, vec![0.6, 0.0, 0.8])),
        ]);
        let events = vec![
            event(1, user, a, EventKind::Completion, now - Duration::hours(100)),
            event(2, user, b, EventKind::Click, now - Duration::hours(40)),
            event(3, user, c, EventKind::Like, now - Duration::hours(5)),
            event(4, user, a, EventKind::Comment, now),
        ];

        let full = builder.build_profile(user, &events, &vectors).unwrap();
        let partial = builder.build_profile(user, &events[..2], &vectors).unwrap();
        let updated = builder.update_profile(partial, &events[2..], &vectors).unwrap();

        assert_close(&full.vector, &updated.vector);
        assert!((full.total_weight - updated.total_weight).abs() < 1e-9);
        assert_eq!(full.event_count, updated.event_count);
        assert_eq!(full.watermark, updated.watermark);
    }

    #[test]
    fn test_reapplying_events_is_noop() {
        let builder = builder();
        let user = Uuid::new_v4();
        let a = Uuid::new_v4();
        let vectors = HashMap::from([(a, vector(a, vec![1.0, 0.0, 0.0]))]);
        let events = vec![event(1, user, a, EventKind::Like, Utc::now())];

        let profile = builder.build_profile(user, &events, &vectors).unwrap();
        let again = builder
            .update_profile(profile.clone(), &events, &vectors)
            .unwrap();
        assert_eq!(profile, again);
    }

    #[test]
    fn test_missing_and_zero_vectors_skipped() {
        let builder = builder();
        let user = Uuid::new_v4();
        let (deleted, empty) = (Uuid::new_v4(), Uuid::new_v4());
        let vectors = HashMap::from([(empty, vector(empty, vec![0.0, 0.0, 0.0]))]);
        let events = vec![
            event(1, user, deleted, EventKind::Like, Utc::now()),
            event(2, user, empty, EventKind::Like, Utc::now()),
        ];

        let profile = builder.build_profile(user, &events, &vectors).unwrap();
        assert!(profile.is_zero());
        assert_eq!(profile.event_count, 0);
        assert_eq!(profile.last_event_seq, 2);
    }

    #[test]
    fn test_no_events_gives_zero_profile() {
        let profile = builder()
            .build_profile(Uuid::new_v4(), &[], &HashMap::new())
            .unwrap();
        assert!(profile.is_zero());
        assert!(profile.watermark.is_none());
    }

    #[test]
    fn test_stale_vector_rejected() {
        let builder = builder();
        let user = Uuid::new_v4();
        let a = Uuid::new_v4();
        let mut stale = vector(a, vec![1.0, 0.0, 0.0]);
        stale.scheme_version = "test-v0".to_string();
        let vectors = HashMap::from([(a, stale)]);
        let events = vec![event(1, user, a, EventKind::Like, Utc::now())];

        let err = builder.build_profile(user, &events, &vectors).unwrap_err();
        assert!(matches!(err, EngineError::StaleVector { .. }));
    }

    #[test]
    fn test_incompatible_prior_rejected() {
        let builder = builder();
        let prior = UserProfile::empty(Uuid::new_v4(), 5, SCHEME);
        let err = builder
            .update_profile(prior, &[], &HashMap::new())
            .unwrap_err();
        assert!(matches!(err, EngineError::DimensionMismatch { .. }));
    }
}
