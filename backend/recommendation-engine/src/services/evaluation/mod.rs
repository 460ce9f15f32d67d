// ============================================
// Metrics Engine
// ============================================
//
// Offline ranking-quality evaluation over logged impressions and outcomes.
// Read-only: it never writes to the store and never regenerates vectors.
// Zero denominators yield `None` plus an entry in `insufficient_data`.
// Coverage is measured against the catalog as it is now; impressions of
// deleted content do not count.

pub mod ranking_metrics;

use crate::db::SharedStore;
use crate::error::{EngineError, Result};
use crate::models::{
    ContentVector, EventKind, InteractionEvent, MetricsReport, RecommendationSource,
    SourceSummary, TimeWindow,
};
use crate::services::features::FeatureExtractor;
use chrono::Utc;
use ranking_metrics as rm;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

pub struct MetricsEngine {
    store: SharedStore,
    extractor: Arc<FeatureExtractor>,
}

impl MetricsEngine {
    pub fn new(store: SharedStore, extractor: Arc<FeatureExtractor>) -> Self {
        Self { store, extractor }
    }

    pub async fn compute(
        &self,
        k: usize,
        window: TimeWindow,
        source: Option<RecommendationSource>,
    ) -> Result<MetricsReport> {
        validate(k, &window)?;
        let events = self.store.events_in(window).await?;
        let vectors = self.current_vectors().await?;
        let catalog = self.store.catalog_ids().await?;

        let report = compute_report(k, window, source, &events, &vectors, &catalog);
        debug!(
            k,
            source = ?source,
            impressions = report.impressions,
            users = report.users_evaluated,
            "Metrics report computed"
        );
        Ok(report)
    }

    /// One summary per recommendation source, including sources without data.
    pub async fn compute_by_source(
        &self,
        k: usize,
        window: TimeWindow,
    ) -> Result<BTreeMap<RecommendationSource, SourceSummary>> {
        validate(k, &window)?;
        let events = self.store.events_in(window).await?;
        let vectors = self.current_vectors().await?;
        let catalog = self.store.catalog_ids().await?;

        Ok(RecommendationSource::ALL
            .iter()
            .map(|source| {
                let report =
                    compute_report(k, window, Some(*source), &events, &vectors, &catalog);
                (*source, SourceSummary::from_report(*source, &report))
            })
            .collect())
    }

    async fn current_vectors(&self) -> Result<HashMap<Uuid, ContentVector>> {
        Ok(self
            .store
            .all_vectors()
            .await?
            .into_iter()
            .filter(|v| self.extractor.is_current(v) && !v.is_zero())
            .map(|v| (v.content_id, v))
            .collect())
    }
}

fn validate(k: usize, window: &TimeWindow) -> Result<()> {
    if k == 0 {
        return Err(EngineError::Validation("k must be at least 1".to_string()));
    }
    if window.is_empty() {
        return Err(EngineError::Validation(
            "window start must be before end".to_string(),
        ));
    }
    Ok(())
}

#[derive(Default)]
struct UserSlice<'a> {
    impressions: Vec<&'a InteractionEvent>,
    outcomes: Vec<&'a InteractionEvent>,
}

/// Pure report computation over already-loaded window events.
pub fn compute_report(
    k: usize,
    window: TimeWindow,
    source: Option<RecommendationSource>,
    events: &[InteractionEvent],
    vectors: &HashMap<Uuid, ContentVector>,
    catalog: &HashSet<Uuid>,
) -> MetricsReport {
    let in_segment = |e: &InteractionEvent| source.map_or(true, |s| e.source == Some(s));

    let mut users: BTreeMap<Uuid, UserSlice<'_>> = BTreeMap::new();
    let mut impressions = 0u64;
    let mut clicks = 0u64;
    for event in events.iter().filter(|e| window.contains(e.occurred_at)) {
        if !in_segment(event) {
            continue;
        }
        match event.kind {
            EventKind::Impression => {
                impressions += 1;
                users.entry(event.user_id).or_default().impressions.push(event);
            }
            kind => {
                if kind == EventKind::Click {
                    clicks += 1;
                }
                users.entry(event.user_id).or_default().outcomes.push(event);
            }
        }
    }

    let mut precisions = Vec::new();
    let mut recalls = Vec::new();
    let mut ndcgs = Vec::new();
    let mut diversities = Vec::new();
    let mut engagements = Vec::new();
    let mut impressed: HashSet<Uuid> = HashSet::new();
    let mut users_evaluated = 0usize;

    for slice in users.values() {
        if slice.impressions.is_empty() {
            continue;
        }
        users_evaluated += 1;

        let shown = shown_list(&slice.impressions);
        impressed.extend(shown.iter().copied());
        let top_k: Vec<Uuid> = shown.iter().take(k).copied().collect();

        let relevant: HashSet<Uuid> = slice
            .outcomes
            .iter()
            .filter(|e| e.kind.is_positive())
            .map(|e| e.content_id)
            .collect();

        precisions.push(rm::precision_at_k(&top_k, &relevant, k));
        if let Some(recall) = rm::recall_at_k(&top_k, &relevant) {
            recalls.push(recall);
        }
        if let Some(ndcg) = rm::ndcg_at_k(&top_k, &relevant, k) {
            ndcgs.push(ndcg);
        }

        let list_vectors: Vec<&[f32]> = top_k
            .iter()
            .filter_map(|id| vectors.get(id).map(|v| v.values.as_slice()))
            .collect();
        if let Some(diversity) = rm::intra_list_diversity(&list_vectors) {
            diversities.push(diversity);
        }

        let best = best_engagement(&slice.outcomes);
        for impression in &slice.impressions {
            engagements.push(best.get(&impression.content_id).copied().unwrap_or(0.0));
        }
    }

    let precision_at_k = rm::mean(&precisions);
    let recall_at_k = rm::mean(&recalls);
    let ctr = (impressions > 0).then(|| clicks as f64 / impressions as f64);
    let coverage = (!catalog.is_empty()).then(|| {
        impressed.intersection(catalog).count() as f64 / catalog.len() as f64
    });

    let mut report = MetricsReport {
        k,
        window,
        source,
        generated_at: Utc::now(),
        impressions,
        clicks,
        users_evaluated,
        users_with_relevant: recalls.len(),
        precision_at_k,
        recall_at_k,
        f1: rm::f1(precision_at_k, recall_at_k),
        ndcg_at_k: rm::mean(&ndcgs),
        ctr,
        avg_engagement: rm::mean(&engagements),
        diversity: rm::mean(&diversities),
        coverage,
        insufficient_data: Vec::new(),
    };
    report.insufficient_data = insufficient_notes(&report);
    report
}

/// Distinct impressed content, by position then time then log order.
fn shown_list(impressions: &[&InteractionEvent]) -> Vec<Uuid> {
    let mut ordered: Vec<&&InteractionEvent> = impressions.iter().collect();
    ordered.sort_by(|a, b| {
        a.position
            .unwrap_or(u32::MAX)
            .cmp(&b.position.unwrap_or(u32::MAX))
            .then(a.occurred_at.cmp(&b.occurred_at))
            .then(a.seq.cmp(&b.seq))
    });

    let mut seen = HashSet::new();
    ordered
        .into_iter()
        .filter(|e| seen.insert(e.content_id))
        .map(|e| e.content_id)
        .collect()
}

/// Best engagement per content: completion counts as 1.0.
fn best_engagement(outcomes: &[&InteractionEvent]) -> HashMap<Uuid, f64> {
    let mut best: HashMap<Uuid, f64> = HashMap::new();
    for event in outcomes {
        let value = if event.kind == EventKind::Completion {
            1.0
        } else {
            event.engagement.map(|e| e.clamp(0.0, 1.0) as f64).unwrap_or(0.0)
        };
        let entry = best.entry(event.content_id).or_insert(0.0);
        if value > *entry {
            *entry = value;
        }
    }
    best
}

fn insufficient_notes(report: &MetricsReport) -> Vec<String> {
    let mut notes = Vec::new();
    if report.users_evaluated == 0 {
        notes.push("no impressions in window".to_string());
    }
    let checks = [
        ("precision_at_k", report.precision_at_k, "no users with impressions"),
        ("recall_at_k", report.recall_at_k, "no users with relevant items"),
        ("f1", report.f1, "precision or recall undefined"),
        ("ndcg_at_k", report.ndcg_at_k, "no users with relevant items"),
        ("ctr", report.ctr, "no impressions"),
        ("avg_engagement", report.avg_engagement, "no impressions"),
        ("diversity", report.diversity, "no user with two or more vectorized items"),
        ("coverage", report.coverage, "empty catalog"),
    ];
    for (name, value, why) in checks {
        if value.is_none() {
            notes.push(format!("{}: {}", name, why));
        }
    }
    notes
}
