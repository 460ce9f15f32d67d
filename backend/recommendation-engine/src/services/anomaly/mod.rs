// ============================================
// Anomaly Scorer
// ============================================
//
// Scores one user's recent interaction window against population norms.
//
// Signals (each in [0, 1]):
//   rate      - z-score of events/minute vs. the population baseline
//   category  - 1 - cosine(profile category block, session category block)
//   abuse     - rapid identical repeats, max'd with an external signal
//
// raw   = weighted mean of the signals
// score = smoothing * raw + (1 - smoothing) * prior score

pub mod access;

pub use access::{AccessController, AnomalyEvaluation, AnomalyService};

use crate::config::AnomalyConfig;
use crate::models::{
    AnomalyScore, ContentVector, InteractionEvent, PopulationBaseline, SignalBreakdown,
    UserProfile,
};
use crate::utils::cosine_similarity;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use uuid::Uuid;

/// Read-only inputs for one evaluation
pub struct ScoringContext<'a> {
    pub baseline: Option<&'a PopulationBaseline>,
    pub profile: Option<&'a UserProfile>,
    pub vectors: &'a HashMap<Uuid, ContentVector>,
    /// Collaborator-supplied abuse signal in [0, 1]
    pub abuse_signal: Option<f64>,
    pub now: DateTime<Utc>,
}

pub struct AnomalyScorer {
    config: AnomalyConfig,
    category_offset: usize,
}

impl AnomalyScorer {
    pub fn new(config: AnomalyConfig, category_offset: usize) -> Self {
        Self {
            config,
            category_offset,
        }
    }

    pub fn threshold(&self) -> f64 {
        self.config.threshold
    }

    pub fn window_secs(&self) -> i64 {
        self.config.window_secs
    }

    /// `recent_events` must be this user's events inside the scoring window.
    pub fn score(
        &self,
        user_id: Uuid,
        recent_events: &[InteractionEvent],
        context: &ScoringContext<'_>,
        prior: Option<&AnomalyScore>,
    ) -> AnomalyScore {
        let signals = SignalBreakdown {
            rate: self.rate_signal(recent_events.len(), context.baseline),
            category_deviation: self.category_signal(recent_events, context),
            abuse: self.abuse_signal(recent_events, context.abuse_signal),
        };

        let w = &self.config.weights;
        let weight_sum = w.rate + w.category + w.abuse;
        let raw = ((w.rate * signals.rate
            + w.category * signals.category_deviation
            + w.abuse * signals.abuse)
            / weight_sum)
            .clamp(0.0, 1.0);

        let score = match prior {
            Some(prior) => {
                self.config.smoothing * raw + (1.0 - self.config.smoothing) * prior.score
            }
            None => raw,
        }
        .clamp(0.0, 1.0);

        let reason = if score >= self.config.threshold {
            Some(self.reason(score, &signals))
        } else {
            None
        };

        AnomalyScore {
            user_id,
            score,
            raw_score: raw,
            signals,
            events_in_window: recent_events.len(),
            evaluated_at: context.now,
            reason,
        }
    }

    fn rate_signal(&self, events: usize, baseline: Option<&PopulationBaseline>) -> f64 {
        let minutes = self.config.window_secs as f64 / 60.0;
        let rate = events as f64 / minutes;

        let (mean, std) = match baseline {
            Some(b) => (b.mean_rate_per_minute, b.std_rate_per_minute),
            None => (
                self.config.default_rate_per_minute,
                self.config.default_rate_per_minute,
            ),
        };

        let z = (rate - mean) / std.max(self.config.min_std);
        (z / self.config.z_saturation).clamp(0.0, 1.0)
    }

    fn category_signal(&self, events: &[InteractionEvent], context: &ScoringContext<'_>) -> f64 {
        let profile_block = match context.profile {
            Some(p) if p.vector.len() > self.category_offset => &p.vector[self.category_offset..],
            _ => return 0.0,
        };
        if profile_block.iter().all(|v| *v == 0.0) {
            return 0.0;
        }

        let mut session = vec![0.0f32; profile_block.len()];
        let mut used = 0usize;
        for event in events {
            let vector = match context.vectors.get(&event.content_id) {
                Some(v) if v.values.len() == context.profile.map(|p| p.vector.len()).unwrap_or(0) => v,
                _ => continue,
            };
            let block = &vector.values[self.category_offset..];
            if block.iter().all(|v| *v == 0.0) {
                continue;
            }
            for (acc, value) in session.iter_mut().zip(block) {
                *acc += value;
            }
            used += 1;
        }
        if used == 0 {
            return 0.0;
        }

        (1.0 - cosine_similarity(profile_block, &session) as f64).clamp(0.0, 1.0)
    }

    fn abuse_signal(&self, events: &[InteractionEvent], external: Option<f64>) -> f64 {
        let mut ordered: Vec<&InteractionEvent> = events.iter().collect();
        ordered.sort_by(|a, b| {
            a.content_id
                .cmp(&b.content_id)
                .then(a.kind.as_str().cmp(b.kind.as_str()))
                .then(a.occurred_at.cmp(&b.occurred_at))
        });

        let repeats = ordered
            .windows(2)
            .filter(|pair| {
                pair[0].content_id == pair[1].content_id
                    && pair[0].kind == pair[1].kind
                    && (pair[1].occurred_at - pair[0].occurred_at).num_seconds()
                        <= self.config.rapid_repeat_secs
            })
            .count();

        let repeat_signal = (repeats as f64 / self.config.repeat_saturation as f64).min(1.0);
        let external = external.unwrap_or(0.0).clamp(0.0, 1.0);
        repeat_signal.max(external)
    }

    fn reason(&self, score: f64, signals: &SignalBreakdown) -> String {
        let mut parts: Vec<(&str, f64)> = vec![
            ("rate", signals.rate),
            ("category_deviation", signals.category_deviation),
            ("abuse", signals.abuse),
        ];
        parts.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        let top = parts[0].1;
        let dominant: Vec<String> = parts
            .iter()
            .filter(|(_, v)| *v > 0.0 && (*v >= 0.5 || *v >= top))
            .map(|(name, v)| format!("{}={:.2}", name, v))
            .collect();

        format!(
            "anomaly score {:.2} >= {:.2} ({})",
            score,
            self.config.threshold,
            dominant.join(", ")
        )
    }
}
