use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status: {}", other)),
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One chunk of a batch recommendation request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendationBatchJob {
    pub id: Uuid,
    /// Shared by every chunk of the same trigger
    pub batch_id: Uuid,
    pub chunk_index: usize,
    pub user_ids: Vec<Uuid>,
    pub k: usize,
    pub status: JobStatus,
    pub attempts: u32,
    pub succeeded: usize,
    /// Users inside this chunk whose generation failed
    pub failure_count: usize,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RecommendationBatchJob {
    pub fn new(batch_id: Uuid, chunk_index: usize, user_ids: Vec<Uuid>, k: usize) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            batch_id,
            chunk_index,
            user_ids,
            k,
            status: JobStatus::Queued,
            attempts: 0,
            succeeded: 0,
            failure_count: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn handle(&self) -> JobHandle {
        JobHandle {
            job_id: self.id,
            batch_id: self.batch_id,
            chunk_index: self.chunk_index,
            user_count: self.user_ids.len(),
            status: self.status,
            failure_count: self.failure_count,
        }
    }
}

/// What the batch trigger hands back per chunk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobHandle {
    pub job_id: Uuid,
    pub batch_id: Uuid,
    pub chunk_index: usize,
    pub user_count: usize,
    pub status: JobStatus,
    pub failure_count: usize,
}
