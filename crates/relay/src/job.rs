use std::fmt;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use crate::inspector::OutputKind;
use crate::status::Submitter;
use crate::tracker::ProgressTracker;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        JobId(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPhase {
    Queued,
    Fetching,
    Probing,
    Converting,
    Uploading,
    Done,
    Canceled,
    TimedOut,
    Failed,
}

impl JobPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobPhase::Done | JobPhase::Canceled | JobPhase::TimedOut | JobPhase::Failed)
    }
}

/// One submitted media request
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub url: String,
    pub kind: OutputKind,
    pub submitter: Submitter,
    pub phase: JobPhase,
    pub created_at: DateTime<Utc>,
    /// Set when the job becomes head
    pub cancel: Option<CancellationToken>,
    /// Absolute deadline, set when the job becomes head
    pub deadline: Option<Instant>,
    pub canceled: bool,
    pub timed_out: bool,
}

impl Job {
    pub fn new(url: impl Into<String>, kind: OutputKind, submitter: Submitter) -> Self {
        Job {
            id: JobId::new(),
            url: url.into(),
            kind,
            submitter,
            phase: JobPhase::Queued,
            created_at: Utc::now(),
            cancel: None,
            deadline: None,
            canceled: false,
            timed_out: false,
        }
    }
}

/// A queued job together with its status renderer
pub(crate) struct JobEntry {
    pub job: Job,
    pub tracker: ProgressTracker,
    /// Last waiting position pushed to the submitter (0 = none yet)
    pub shown_position: usize,
}

impl JobEntry {
    pub fn new(job: Job, tracker: ProgressTracker) -> Self {
        JobEntry { job, tracker, shown_position: 0 }
    }
}

/// Read-only view of a queued job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub id: JobId,
    pub url: String,
    pub kind: OutputKind,
    pub submitter: Submitter,
    pub phase: JobPhase,
    /// 0 for the active job, 1-based among waiting jobs otherwise
    pub position: usize,
    pub created_at: DateTime<Utc>,
}

impl JobSnapshot {
    pub fn of(job: &Job, position: usize) -> Self {
        JobSnapshot {
            id: job.id,
            url: job.url.clone(),
            kind: job.kind,
            submitter: job.submitter.clone(),
            phase: job.phase,
            position,
            created_at: job.created_at,
        }
    }
}

/// Handle returned to a submitter on enqueue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ticket {
    pub id: JobId,
    /// 0 if the job started right away
    pub position: usize,
}
