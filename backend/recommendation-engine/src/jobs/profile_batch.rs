// ============================================
// Profile Batch Job
// ============================================
//
// Periodic pass that brings every dirty profile up to date.
//
// Workflow:
// 1. Read the "profile_batch" checkpoint and the settled log head
// 2. Fetch users with events in (checkpoint, head], plus users whose
//    profile was built under another feature scheme
// 3. Refresh each user's profile in chunks of `batch_size`
// 4. Advance the checkpoint only when every user succeeded
//
// Usage:
//   recommendation-engine --mode profile-batch

use crate::config::ProfileConfig;
use crate::db::SharedStore;
use crate::error::Result;
use crate::metrics::{JOB_DURATION_SECONDS, PROFILE_UPDATES_TOTAL};
use crate::services::profile_builder::{ProfileUpdater, UpdateMode};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

pub const PROFILE_CHECKPOINT: &str = "profile_batch";

/// Profile batch job statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProfileBatchStats {
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub users_processed: usize,
    pub users_updated: usize,
    pub users_unchanged: usize,
    /// Writes dropped because a newer profile was already stored
    pub users_superseded: usize,
    pub users_failed: usize,
    /// Users visited only because their profile used an old scheme
    pub users_rescheme: usize,
    pub checkpoint_from: i64,
    pub checkpoint_to: Option<i64>,
    pub cancelled: bool,
    pub total_duration_ms: u64,
}

pub struct ProfileBatchJob {
    store: SharedStore,
    updater: Arc<ProfileUpdater>,
    batch_size: usize,
    max_users: usize,
    cancel: Arc<AtomicBool>,
}

impl ProfileBatchJob {
    pub fn new(store: SharedStore, updater: Arc<ProfileUpdater>, config: &ProfileConfig) -> Self {
        Self {
            store,
            updater,
            batch_size: config.batch_size.max(1),
            max_users: config.max_users,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag checked between users; setting it stops the pass early.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    /// Run one pass over every user with settled events since the
    /// checkpoint or a profile from an older feature scheme.
    pub async fn update_all_profiles(&self) -> Result<ProfileBatchStats> {
        let start_time = Instant::now();
        let checkpoint = self.store.get_checkpoint(PROFILE_CHECKPOINT).await?;
        let head = self.updater.settled_head().await?.max(checkpoint);

        let mut stats = ProfileBatchStats {
            started_at: Some(Utc::now()),
            checkpoint_from: checkpoint,
            ..Default::default()
        };

        let mut users = self
            .store
            .users_with_events_after(checkpoint, head, self.max_users)
            .await?;
        let mut truncated = self.max_users > 0 && users.len() >= self.max_users;

        let scheme = self.updater.builder().scheme_version();
        let stale = self
            .store
            .users_with_stale_profiles(scheme, self.max_users)
            .await?;
        let mut seen: HashSet<_> = users.iter().copied().collect();
        for user_id in stale {
            if !seen.insert(user_id) {
                continue;
            }
            if self.max_users > 0 && users.len() >= self.max_users {
                truncated = true;
                break;
            }
            users.push(user_id);
            stats.users_rescheme += 1;
        }

        info!(
            checkpoint,
            head,
            user_count = users.len(),
            rescheme = stats.users_rescheme,
            batch_size = self.batch_size,
            "Starting profile batch pass"
        );

        'chunks: for (batch_idx, batch) in users.chunks(self.batch_size).enumerate() {
            info!(batch = batch_idx + 1, users = batch.len(), "Processing user batch");

            for user_id in batch {
                if self.cancel.load(Ordering::Relaxed) {
                    stats.cancelled = true;
                    warn!(processed = stats.users_processed, "Profile batch cancelled");
                    break 'chunks;
                }
                stats.users_processed += 1;

                match self.updater.refresh_profile(*user_id, head).await {
                    Ok(update) => {
                        let outcome = match (update.mode, update.written) {
                            (UpdateMode::Unchanged, _) => {
                                stats.users_unchanged += 1;
                                "unchanged"
                            }
                            (_, true) => {
                                stats.users_updated += 1;
                                "written"
                            }
                            (_, false) => {
                                stats.users_superseded += 1;
                                "superseded"
                            }
                        };
                        PROFILE_UPDATES_TOTAL.with_label_values(&[outcome]).inc();
                    }
                    Err(e) => {
                        stats.users_failed += 1;
                        PROFILE_UPDATES_TOTAL.with_label_values(&["error"]).inc();
                        error!(user_id = %user_id, error = %e, "Failed to update user profile");
                    }
                }
            }
        }

        if stats.users_failed == 0 && !stats.cancelled && !truncated {
            self.store.set_checkpoint(PROFILE_CHECKPOINT, head).await?;
            stats.checkpoint_to = Some(head);
        } else {
            warn!(
                failed = stats.users_failed,
                cancelled = stats.cancelled,
                truncated,
                "Checkpoint not advanced; remaining users are retried next pass"
            );
        }

        stats.completed_at = Some(Utc::now());
        stats.total_duration_ms = start_time.elapsed().as_millis() as u64;
        JOB_DURATION_SECONDS
            .with_label_values(&["profile_batch"])
            .observe(start_time.elapsed().as_secs_f64());

        info!(
            processed = stats.users_processed,
            updated = stats.users_updated,
            unchanged = stats.users_unchanged,
            failed = stats.users_failed,
            duration_ms = stats.total_duration_ms,
            "Profile batch pass completed"
        );

        Ok(stats)
    }
}
