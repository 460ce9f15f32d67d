use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, HistogramVec,
    IntCounter, IntCounterVec,
};

lazy_static! {
    /// Content vectors extracted, by result (ok/error).
    pub static ref VECTOR_EXTRACTIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "engine_vector_extractions_total",
        "Content vector extractions segmented by result",
        &["result"]
    )
    .expect("failed to register engine_vector_extractions_total");

    /// Profile writes by outcome (written/stale/unchanged/error).
    pub static ref PROFILE_UPDATES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "engine_profile_updates_total",
        "Profile refreshes segmented by outcome",
        &["outcome"]
    )
    .expect("failed to register engine_profile_updates_total");

    /// Recommendation lists produced, by source.
    pub static ref RECOMMENDATIONS_SERVED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "engine_recommendations_served_total",
        "Recommendation lists generated segmented by source",
        &["source"]
    )
    .expect("failed to register engine_recommendations_served_total");

    /// Batch recommendation chunks finished, by final status.
    pub static ref BATCH_CHUNKS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "engine_batch_chunks_total",
        "Batch recommendation chunks segmented by final status",
        &["status"]
    )
    .expect("failed to register engine_batch_chunks_total");

    /// Background job duration by job name.
    pub static ref JOB_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "engine_job_duration_seconds",
        "Background job run time segmented by job",
        &["job"]
    )
    .expect("failed to register engine_job_duration_seconds");

    pub static ref ANOMALY_EVALUATIONS_TOTAL: IntCounter = register_int_counter!(
        "engine_anomaly_evaluations_total",
        "Inline anomaly evaluations"
    )
    .expect("failed to register engine_anomaly_evaluations_total");

    pub static ref AUTO_BLOCKS_TOTAL: IntCounter = register_int_counter!(
        "engine_auto_blocks_total",
        "Users moved to auto_blocked"
    )
    .expect("failed to register engine_auto_blocks_total");

    /// Access state changes by from/to state.
    pub static ref ACCESS_TRANSITIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "engine_access_transitions_total",
        "Access state transitions segmented by from and to state",
        &["from", "to"]
    )
    .expect("failed to register engine_access_transitions_total");

    /// Metrics report cache events (hit/miss/error).
    pub static ref REPORT_CACHE_EVENTS: IntCounterVec = register_int_counter_vec!(
        "engine_report_cache_events_total",
        "Metrics report cache events segmented by outcome",
        &["event"]
    )
    .expect("failed to register engine_report_cache_events_total");
}
