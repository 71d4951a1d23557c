//! Job records and lifecycle states.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Job identifier, assigned at submission.
pub type JobId = Uuid;

/// Lifecycle state of a job. Stored as a string in the database.
///
/// Transitions are monotonic: `Pending` → `Running` → one of the terminal
/// states. Terminal states are absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    TimedOut,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::TimedOut => "timed_out",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "pending" => JobStatus::Pending,
            "running" => JobStatus::Running,
            "completed" => JobStatus::Completed,
            "timed_out" => JobStatus::TimedOut,
            _ => JobStatus::Failed,
        }
    }

    /// Completed, failed and timed-out jobs accept no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::TimedOut
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of work and its lifecycle state.
///
/// The payload is opaque to the dispatcher; it is handed back to the external
/// processor through the `Started` event and never interpreted here.
#[derive(Debug, Clone)]
pub struct JobRecord {
    pub id: JobId,
    pub payload: serde_json::Value,
    pub status: JobStatus,
    /// Lane currently (or, once persisted, previously) holding the job.
    pub lane_index: usize,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Effective timeout, resolved at submission from the request-specific
    /// value or the lane default.
    pub timeout_ms: u64,
    pub error: Option<String>,
}

impl JobRecord {
    /// Create a pending job at submission time.
    pub fn new(payload: serde_json::Value, lane_index: usize, timeout_ms: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            payload,
            status: JobStatus::Pending,
            lane_index,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            timeout_ms,
            error: None,
        }
    }
}
