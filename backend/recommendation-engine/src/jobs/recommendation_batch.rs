// ============================================
// Batch Recommendation Dispatcher
// ============================================
//
// Splits a user set into `batch_size` chunks, persists one job per chunk
// and runs the chunks on tokio tasks gated by a semaphore of
// `worker_concurrency` permits.
//
// Per-user failures are counted on the job without failing the chunk.
// A chunk-level failure is retried up to `max_attempts` and then marks
// only that job `Failed`. Re-running a job overwrites the per-user lists.
// A job left `Queued`/`Running` for `stale_job_secs` (lost worker) can be
// retried like a failed one.

use crate::config::RecommendationConfig;
use crate::db::SharedStore;
use crate::error::{EngineError, Result};
use crate::metrics::BATCH_CHUNKS_TOTAL;
use crate::models::{JobHandle, JobStatus, RecommendationBatchJob};
use crate::services::recommendation::RecommendationService;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use futures::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Work performed for one chunk
#[async_trait]
pub trait ChunkRunner: Send + Sync {
    /// Chunk-level preparation; an error here fails the whole attempt.
    async fn prepare(&self, _job: &RecommendationBatchJob) -> Result<()> {
        Ok(())
    }

    async fn run_user(&self, user_id: Uuid, k: usize, job_id: Uuid) -> Result<()>;
}

#[async_trait]
impl ChunkRunner for RecommendationService {
    async fn run_user(&self, user_id: Uuid, k: usize, job_id: Uuid) -> Result<()> {
        self.recommend_with_job(user_id, k, Some(job_id)).await?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct BatchDispatcher {
    store: SharedStore,
    runner: Arc<dyn ChunkRunner>,
    semaphore: Arc<Semaphore>,
    config: RecommendationConfig,
}

impl BatchDispatcher {
    pub fn new(
        store: SharedStore,
        runner: Arc<dyn ChunkRunner>,
        config: RecommendationConfig,
    ) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(config.worker_concurrency.max(1))),
            store,
            runner,
            config,
        }
    }

    /// Persist and start one job per chunk; returns immediately.
    pub async fn submit(&self, user_ids: Vec<Uuid>, k: usize) -> Result<Vec<JobHandle>> {
        let (handles, _) = self.dispatch(user_ids, k).await?;
        Ok(handles)
    }

    /// Like [`submit`](Self::submit) but waits for every chunk and returns
    /// the final state of each job.
    pub async fn run_to_completion(&self, user_ids: Vec<Uuid>, k: usize) -> Result<Vec<JobHandle>> {
        let (handles, tasks) = self.dispatch(user_ids, k).await?;
        join_all(tasks).await;
        self.final_handles(&handles).await
    }

    /// Target users with events in the last `active_user_window_hours`.
    pub async fn submit_active(&self, limit: usize, k: usize) -> Result<Vec<JobHandle>> {
        let users = self.active_users(limit).await?;
        self.submit(users, k).await
    }

    pub async fn run_active_to_completion(&self, limit: usize, k: usize) -> Result<Vec<JobHandle>> {
        let users = self.active_users(limit).await?;
        self.run_to_completion(users, k).await
    }

    pub async fn get_job(&self, job_id: Uuid) -> Result<RecommendationBatchJob> {
        self.store
            .get_job(job_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("batch job {}", job_id)))
    }

    /// Re-run a failed or stale job in the background.
    pub async fn retry(&self, job_id: Uuid) -> Result<JobHandle> {
        let (handle, _) = self.requeue(job_id).await?;
        Ok(handle)
    }

    pub async fn retry_to_completion(&self, job_id: Uuid) -> Result<JobHandle> {
        let (_, task) = self.requeue(job_id).await?;
        if let Err(e) = task.await {
            error!(job_id = %job_id, error = %e, "Batch chunk task panicked");
        }
        Ok(self.get_job(job_id).await?.handle())
    }

    async fn requeue(&self, job_id: Uuid) -> Result<(JobHandle, JoinHandle<()>)> {
        let mut job = self.get_job(job_id).await?;
        if !self.is_retryable(&job) {
            return Err(EngineError::InvalidTransition {
                from: job.status.to_string(),
                to: JobStatus::Queued.to_string(),
            });
        }

        job.status = JobStatus::Queued;
        job.attempts = 0;
        job.succeeded = 0;
        job.failure_count = 0;
        job.last_error = None;
        job.updated_at = Utc::now();
        self.store.put_job(job.clone()).await?;

        info!(job_id = %job.id, batch_id = %job.batch_id, "Retrying batch chunk");
        let handle = job.handle();
        Ok((handle, self.spawn_chunk(job)))
    }

    fn is_retryable(&self, job: &RecommendationBatchJob) -> bool {
        match job.status {
            JobStatus::Failed => true,
            JobStatus::Queued | JobStatus::Running => {
                Utc::now() - job.updated_at >= Duration::seconds(self.config.stale_job_secs)
            }
            JobStatus::Completed => false,
        }
    }

    async fn active_users(&self, limit: usize) -> Result<Vec<Uuid>> {
        let since = Utc::now() - Duration::hours(self.config.active_user_window_hours);
        self.store.active_users(since, limit).await
    }

    async fn dispatch(
        &self,
        user_ids: Vec<Uuid>,
        k: usize,
    ) -> Result<(Vec<JobHandle>, Vec<JoinHandle<()>>)> {
        if k == 0 || k > self.config.max_k {
            return Err(EngineError::Validation(format!(
                "k must be within [1, {}], got {}",
                self.config.max_k, k
            )));
        }

        let mut seen = HashSet::with_capacity(user_ids.len());
        let users: Vec<Uuid> = user_ids.into_iter().filter(|u| seen.insert(*u)).collect();
        if users.is_empty() {
            return Ok((Vec::new(), Vec::new()));
        }

        let batch_id = Uuid::new_v4();
        let mut jobs = Vec::new();
        for (index, chunk) in users.chunks(self.config.batch_size.max(1)).enumerate() {
            let job = RecommendationBatchJob::new(batch_id, index, chunk.to_vec(), k);
            self.store.put_job(job.clone()).await?;
            jobs.push(job);
        }

        info!(
            batch_id = %batch_id,
            users = users.len(),
            chunks = jobs.len(),
            "Batch recommendation submitted"
        );

        let handles = jobs.iter().map(|j| j.handle()).collect();
        let tasks = jobs.into_iter().map(|job| self.spawn_chunk(job)).collect();
        Ok((handles, tasks))
    }

    async fn final_handles(&self, handles: &[JobHandle]) -> Result<Vec<JobHandle>> {
        let mut finals = Vec::with_capacity(handles.len());
        for handle in handles {
            finals.push(self.get_job(handle.job_id).await?.handle());
        }
        Ok(finals)
    }

    fn spawn_chunk(&self, job: RecommendationBatchJob) -> JoinHandle<()> {
        let worker = self.clone();
        tokio::spawn(async move {
            let fallback = job.clone();
            if let Err(e) = worker.run_chunk(job).await {
                error!(job_id = %fallback.id, error = %e, "Could not record batch chunk state");
                worker.mark_failed(fallback, &e).await;
            }
        })
    }

    /// Best effort: leave the job retryable instead of stuck mid-run.
    async fn mark_failed(&self, fallback: RecommendationBatchJob, cause: &EngineError) {
        let job_id = fallback.id;
        let mut job = match self.store.get_job(fallback.id).await {
            Ok(Some(job)) => job,
            _ => fallback,
        };
        job.status = JobStatus::Failed;
        job.last_error = Some(cause.to_string());
        job.updated_at = Utc::now();
        match self.store.put_job(job).await {
            Ok(()) => {
                BATCH_CHUNKS_TOTAL.with_label_values(&["failed"]).inc();
            }
            Err(e) => {
                error!(
                    job_id = %job_id,
                    error = %e,
                    "Could not mark batch chunk failed; retry once it goes stale"
                );
            }
        }
    }

    async fn run_chunk(&self, mut job: RecommendationBatchJob) -> Result<()> {
        let _permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| EngineError::Internal(format!("worker pool closed: {}", e)))?;

        loop {
            job.attempts += 1;
            job.status = JobStatus::Running;
            job.updated_at = Utc::now();
            self.store.put_job(job.clone()).await?;

            match self.runner.prepare(&job).await {
                Ok(()) => break,
                Err(e) => {
                    job.last_error = Some(e.to_string());
                    if job.attempts >= self.config.max_attempts {
                        job.status = JobStatus::Failed;
                        job.updated_at = Utc::now();
                        self.store.put_job(job.clone()).await?;
                        BATCH_CHUNKS_TOTAL.with_label_values(&["failed"]).inc();
                        error!(
                            job_id = %job.id,
                            chunk = job.chunk_index,
                            attempts = job.attempts,
                            error = %e,
                            "Batch chunk failed"
                        );
                        return Ok(());
                    }
                    warn!(
                        job_id = %job.id,
                        attempt = job.attempts,
                        error = %e,
                        "Batch chunk attempt failed, retrying"
                    );
                }
            }
        }

        let mut succeeded = 0usize;
        let mut failed = 0usize;
        for user_id in &job.user_ids {
            match self.runner.run_user(*user_id, job.k, job.id).await {
                Ok(()) => succeeded += 1,
                Err(e) => {
                    failed += 1;
                    warn!(job_id = %job.id, user_id = %user_id, error = %e, "Recommendation failed for user");
                    job.last_error = Some(e.to_string());
                }
            }
        }

        job.succeeded = succeeded;
        job.failure_count = failed;
        job.status = JobStatus::Completed;
        job.updated_at = Utc::now();
        self.store.put_job(job.clone()).await?;
        BATCH_CHUNKS_TOTAL.with_label_values(&["completed"]).inc();

        debug!(
            job_id = %job.id,
            chunk = job.chunk_index,
            succeeded,
            failed,
            "Batch chunk completed"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::InMemoryStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fails chunk-level preparation for one chunk index, and per-user for
    /// a fixed set of users.
    struct ScriptedRunner {
        failing_chunk: Option<usize>,
        failing_users: HashSet<Uuid>,
        runs: AtomicUsize,
    }

    #[async_trait]
    impl ChunkRunner for ScriptedRunner {
        async fn prepare(&self, job: &RecommendationBatchJob) -> Result<()> {
            if Some(job.chunk_index) == self.failing_chunk {
                return Err(EngineError::Internal("chunk unavailable".to_string()));
            }
            Ok(())
        }

        async fn run_user(&self, user_id: Uuid, _k: usize, _job_id: Uuid) -> Result<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            if self.failing_users.contains(&user_id) {
                return Err(EngineError::Internal("user failed".to_string()));
            }
            Ok(())
        }
    }

    fn dispatcher(runner: Arc<ScriptedRunner>) -> BatchDispatcher {
        let store: SharedStore = Arc::new(InMemoryStore::new());
        BatchDispatcher::new(store, runner, RecommendationConfig::default())
    }

    fn healthy_runner() -> Arc<ScriptedRunner> {
        Arc::new(ScriptedRunner {
            failing_chunk: None,
            failing_users: HashSet::new(),
            runs: AtomicUsize::new(0),
        })
    }

    fn users(n: usize) -> Vec<Uuid> {
        (0..n).map(|_| Uuid::new_v4()).collect()
    }

    #[tokio::test]
    async fn test_chunks_and_isolated_chunk_failure() {
        let runner = Arc::new(ScriptedRunner {
            failing_chunk: Some(1),
            failing_users: HashSet::new(),
            runs: AtomicUsize::new(0),
        });
        let dispatcher = dispatcher(runner.clone());

        let handles = dispatcher.run_to_completion(users(250), 10).await.unwrap();
        assert_eq!(handles.len(), 3);
        assert_eq!(
            handles.iter().map(|h| h.user_count).collect::<Vec<_>>(),
            vec![100, 100, 50]
        );
        assert_eq!(handles[0].status, JobStatus::Completed);
        assert_eq!(handles[1].status, JobStatus::Failed);
        assert_eq!(handles[2].status, JobStatus::Completed);
        assert_eq!(runner.runs.load(Ordering::SeqCst), 150);

        let failed = dispatcher.get_job(handles[1].job_id).await.unwrap();
        assert_eq!(failed.attempts, 3);
        assert!(failed.last_error.is_some());
    }

    #[tokio::test]
    async fn test_user_failures_counted_without_failing_chunk() {
        let all = users(10);
        let runner = Arc::new(ScriptedRunner {
            failing_chunk: None,
            failing_users: all[..3].iter().cloned().collect(),
            runs: AtomicUsize::new(0),
        });
        let dispatcher = dispatcher(runner);

        let handles = dispatcher.run_to_completion(all, 10).await.unwrap();
        assert_eq!(handles.len(), 1);
        assert_eq!(handles[0].status, JobStatus::Completed);
        assert_eq!(handles[0].failure_count, 3);
    }

    #[tokio::test]
    async fn test_retry_only_allowed_for_failed_jobs() {
        let runner = Arc::new(ScriptedRunner {
            failing_chunk: None,
            failing_users: HashSet::new(),
            runs: AtomicUsize::new(0),
        });
        let dispatcher = dispatcher(runner);

        let handles = dispatcher.run_to_completion(users(5), 10).await.unwrap();
        let err = dispatcher.retry(handles[0].job_id).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidTransition { .. }));

        let err = dispatcher.retry(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_duplicate_users_and_empty_input() {
        let runner = Arc::new(ScriptedRunner {
            failing_chunk: None,
            failing_users: HashSet::new(),
            runs: AtomicUsize::new(0),
        });
        let dispatcher = dispatcher(runner.clone());
        let user = Uuid::new_v4();

        let handles = dispatcher
            .run_to_completion(vec![user, user, user], 10)
            .await
            .unwrap();
        assert_eq!(handles[0].user_count, 1);
        assert!(dispatcher.submit(Vec::new(), 10).await.unwrap().is_empty());
        assert!(matches!(
            dispatcher.submit(vec![user], 0).await,
            Err(EngineError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_stale_running_job_can_be_retried() {
        let runner = healthy_runner();
        let dispatcher = dispatcher(runner.clone());

        // A worker died mid-run and left the job Running.
        let mut job = RecommendationBatchJob::new(Uuid::new_v4(), 0, users(4), 10);
        job.status = JobStatus::Running;
        job.attempts = 1;
        dispatcher.store.put_job(job.clone()).await.unwrap();

        let err = dispatcher.retry(job.id).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidTransition { .. }));

        job.updated_at = Utc::now() - Duration::seconds(dispatcher.config.stale_job_secs + 1);
        dispatcher.store.put_job(job.clone()).await.unwrap();
        let handle = dispatcher.retry_to_completion(job.id).await.unwrap();
        assert_eq!(handle.status, JobStatus::Completed);
        assert_eq!(runner.runs.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_chunk_that_cannot_run_is_marked_failed() {
        let dispatcher = dispatcher(healthy_runner());
        dispatcher.semaphore.close();

        let handles = dispatcher.run_to_completion(users(3), 10).await.unwrap();
        assert_eq!(handles.len(), 1);
        assert_eq!(handles[0].status, JobStatus::Failed);

        let job = dispatcher.get_job(handles[0].job_id).await.unwrap();
        assert!(job.last_error.is_some());
    }
}
