// ============================================
// Access State Controller
// ============================================
//
//   Active --(score >= threshold)--> AutoBlocked --(admin)--> Unblocked
//   Unblocked --(below threshold, grace elapsed)--> Active
//   Unblocked --(anomaly recurs, grace elapsed)--> AutoBlocked
//
// Every transition is stored together with an audit entry, and only if the
// stored state is still the one the decision was made on.

use super::{AnomalyScorer, ScoringContext};
use crate::config::AnomalyConfig;
use crate::db::SharedStore;
use crate::error::{EngineError, Result};
use crate::metrics::{ACCESS_TRANSITIONS_TOTAL, ANOMALY_EVALUATIONS_TOTAL, AUTO_BLOCKS_TOTAL};
use crate::models::{
    AccessRecord, AccessState, AccessTransition, AnomalyScore, TimeWindow, SYSTEM_ACTOR,
};
use crate::services::features::FeatureExtractor;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub struct AccessController {
    store: SharedStore,
    threshold: f64,
    reblock_grace: Duration,
}

impl AccessController {
    pub fn new(store: SharedStore, config: &AnomalyConfig) -> Self {
        Self {
            store,
            threshold: config.threshold,
            reblock_grace: Duration::hours(config.reblock_grace_hours),
        }
    }

    /// Current record; users never evaluated are `Active`.
    pub async fn get_state(&self, user_id: Uuid) -> Result<AccessRecord> {
        Ok(self
            .store
            .get_access(user_id)
            .await?
            .unwrap_or_else(|| AccessRecord::active(user_id)))
    }

    pub async fn transitions(&self, user_id: Uuid) -> Result<Vec<AccessTransition>> {
        self.store.transitions(user_id).await
    }

    /// React to a freshly computed score.
    pub async fn apply_score(&self, score: &AnomalyScore) -> Result<AccessRecord> {
        match self.decide(score).await {
            Err(EngineError::InvalidTransition { from, to }) => {
                // Another writer moved the state first; decide again on theirs.
                debug!(
                    user_id = %score.user_id,
                    from = %from,
                    to = %to,
                    "Access state changed concurrently"
                );
                self.decide(score).await
            }
            other => other,
        }
    }

    async fn decide(&self, score: &AnomalyScore) -> Result<AccessRecord> {
        let record = self.get_state(score.user_id).await?;
        let anomalous = score.score >= self.threshold;

        let next = match record.state {
            AccessState::Active if anomalous => Some(AccessState::AutoBlocked),
            AccessState::Active | AccessState::AutoBlocked => None,
            AccessState::Unblocked => {
                if self.in_grace(&record, score.evaluated_at) {
                    None
                } else if anomalous {
                    Some(AccessState::AutoBlocked)
                } else {
                    Some(AccessState::Active)
                }
            }
        };

        match next {
            Some(to) => {
                let reason = if to == AccessState::AutoBlocked {
                    score.reason.clone()
                } else {
                    Some("score below threshold after unblock".to_string())
                };
                self.transition(record, to, SYSTEM_ACTOR, reason, Some(score.score), score.evaluated_at)
                    .await
            }
            None => Ok(record),
        }
    }

    /// Administrator override of an automatic block.
    pub async fn unblock(
        &self,
        user_id: Uuid,
        actor: &str,
        note: Option<String>,
    ) -> Result<AccessRecord> {
        let actor = actor.trim();
        if actor.is_empty() {
            return Err(EngineError::Validation(
                "unblock requires an administrator actor".to_string(),
            ));
        }

        let record = self.get_state(user_id).await?;
        let score = record.score;
        self.transition(record, AccessState::Unblocked, actor, note, score, Utc::now())
            .await
    }

    fn in_grace(&self, record: &AccessRecord, at: DateTime<Utc>) -> bool {
        match record.unblocked_at {
            Some(unblocked_at) => at < unblocked_at + self.reblock_grace,
            None => false,
        }
    }

    async fn transition(
        &self,
        mut record: AccessRecord,
        to: AccessState,
        actor: &str,
        reason: Option<String>,
        score: Option<f64>,
        at: DateTime<Utc>,
    ) -> Result<AccessRecord> {
        let from = record.state;
        if !from.can_transition_to(to) {
            return Err(EngineError::InvalidTransition {
                from: from.to_string(),
                to: to.to_string(),
            });
        }

        record.state = to;
        record.score = score;
        record.updated_at = at;
        match to {
            AccessState::AutoBlocked => {
                record.reason = reason.clone();
                record.blocked_at = Some(at);
            }
            AccessState::Unblocked => {
                record.unblocked_at = Some(at);
                record.unblocked_by = Some(actor.to_string());
            }
            AccessState::Active => {
                record.reason = None;
            }
        }

        let transition = AccessTransition {
            id: Uuid::new_v4(),
            user_id: record.user_id,
            from_state: from,
            to_state: to,
            actor: actor.to_string(),
            reason,
            score,
            occurred_at: at,
        };
        self.store
            .apply_transition(record.clone(), transition)
            .await?;

        ACCESS_TRANSITIONS_TOTAL
            .with_label_values(&[from.as_str(), to.as_str()])
            .inc();

        match to {
            AccessState::AutoBlocked => {
                AUTO_BLOCKS_TOTAL.inc();
                warn!(
                    user_id = %record.user_id,
                    from = %from,
                    score = ?score,
                    reason = ?record.reason,
                    "User auto-blocked"
                );
            }
            _ => {
                info!(
                    user_id = %record.user_id,
                    from = %from,
                    to = %to,
                    actor = %actor,
                    "Access state changed"
                );
            }
        }

        Ok(record)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AnomalyEvaluation {
    pub score: AnomalyScore,
    pub access: AccessRecord,
}

/// Inline evaluation on event ingestion
pub struct AnomalyService {
    store: SharedStore,
    scorer: AnomalyScorer,
    controller: AccessController,
    extractor: Arc<FeatureExtractor>,
}

impl AnomalyService {
    pub fn new(
        store: SharedStore,
        config: &AnomalyConfig,
        extractor: Arc<FeatureExtractor>,
    ) -> Self {
        Self {
            scorer: AnomalyScorer::new(config.clone(), extractor.category_offset()),
            controller: AccessController::new(store.clone(), config),
            store,
            extractor,
        }
    }

    pub fn controller(&self) -> &AccessController {
        &self.controller
    }

    pub async fn evaluate(&self, user_id: Uuid, abuse_signal: Option<f64>) -> Result<AnomalyEvaluation> {
        self.evaluate_at(user_id, abuse_signal, Utc::now()).await
    }

    /// Score the window ending at `now` (events stamped `now` included).
    pub async fn evaluate_at(
        &self,
        user_id: Uuid,
        abuse_signal: Option<f64>,
        now: DateTime<Utc>,
    ) -> Result<AnomalyEvaluation> {
        let window = TimeWindow::new(
            now - Duration::seconds(self.scorer.window_secs()),
            now + Duration::milliseconds(1),
        );
        let events = self.store.events_for_user_in(user_id, window).await?;

        let baseline = self.store.get_baseline().await?;
        let profile = self
            .store
            .get_profile(user_id)
            .await?
            .filter(|p| p.is_compatible(self.extractor.scheme_version(), self.extractor.dims()));

        let content_ids: Vec<Uuid> = events
            .iter()
            .map(|e| e.content_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let mut vectors = self.store.get_vectors(&content_ids).await?;
        vectors.retain(|_, v| self.extractor.is_current(v));

        let prior = self.store.get_anomaly_score(user_id).await?;
        let context = ScoringContext {
            baseline: baseline.as_ref(),
            profile: profile.as_ref(),
            vectors: &vectors,
            abuse_signal,
            now,
        };
        let score = self.scorer.score(user_id, &events, &context, prior.as_ref());
        self.store.put_anomaly_score(score.clone()).await?;

        ANOMALY_EVALUATIONS_TOTAL.inc();
        debug!(
            user_id = %user_id,
            score = score.score,
            raw = score.raw_score,
            events = score.events_in_window,
            "Anomaly score evaluated"
        );

        let access = self.controller.apply_score(&score).await?;
        Ok(AnomalyEvaluation { score, access })
    }
}
