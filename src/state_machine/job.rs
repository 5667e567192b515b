use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::state::JobStatus;
use crate::deck::DeckState;
use crate::error::JobFailure;
use crate::ir::IrJob;
use crate::policy::UserRole;
use crate::worklist::WorklistRecord;

/// Where a paused dry run stopped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimProgress {
    pub cursor: usize,
    pub deck: DeckState,
}

/// A job tracked by the manager, with everything its run produced so far.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub job: IrJob,
    pub status: JobStatus,
    pub history: Vec<JobStatus>,
    /// Role of the caller that submitted the job.
    pub role: UserRole,
    pub confirmed: bool,
    pub paused_from: Option<JobStatus>,
    pub failure: Option<JobFailure>,
    pub worklist: Vec<WorklistRecord>,
    pub progress: Option<SimProgress>,
    pub result_deck: Option<DeckState>,
    /// Set while a worker is executing this job.
    #[serde(skip)]
    pub claimed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    pub fn new(job: IrJob, role: UserRole) -> Self {
        let now = Utc::now();
        Self {
            job,
            status: JobStatus::Pending,
            history: Vec::new(),
            role,
            confirmed: false,
            paused_from: None,
            failure: None,
            worklist: Vec::new(),
            progress: None,
            result_deck: None,
            claimed: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn id(&self) -> &str {
        &self.job.job_id
    }

    /// Ready for a worker: pending, or resumed and not yet picked up.
    pub fn is_runnable(&self) -> bool {
        !self.claimed && matches!(self.status, JobStatus::Pending | JobStatus::Running)
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Structured audit record produced once a job reaches a terminal state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub job_id: String,
    pub name: Option<String>,
    pub role: UserRole,
    pub status: JobStatus,
    pub state_transitions: Vec<JobStatus>,
    pub confirmed: bool,
    pub record_count: usize,
    pub failure: Option<JobFailure>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: i64,
}

impl AuditRecord {
    pub fn from_job(job: &JobRecord) -> Self {
        let mut transitions = job.history.clone();
        transitions.push(job.status);

        Self {
            job_id: job.id().to_string(),
            name: job.job.name.clone(),
            role: job.role,
            status: job.status,
            state_transitions: transitions,
            confirmed: job.confirmed,
            record_count: job.worklist.len(),
            failure: job.failure.clone(),
            started_at: job.created_at,
            completed_at: job.updated_at,
            duration_ms: (job.updated_at - job.created_at).num_milliseconds(),
        }
    }
}
