use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;

use crate::capabilities::CapabilityRegistry;
use crate::compiler::Compiler;
use crate::deck::DeckState;
use crate::error::{JobError, JobFailure};
use crate::ir::IrJob;
use crate::policy::{RiskLevel, RiskPolicy, UserRole};
use crate::preflight::Validator;
use crate::simulator::{self, Simulation};
use crate::state_machine::{
    AuditRecord, Event, JobRecord, JobStatus, SimProgress, StateMachine, Transition,
};
use crate::worklist::WorklistRecord;

/// Whether completed dry runs update the manager's deck.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeckMode {
    /// Every job simulates against its own copy of the deck.
    #[default]
    Isolated,
    /// Completed jobs commit their simulated volumes back to the shared deck.
    Shared,
}

/// Outcome of one `run_next` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub job_id: String,
    pub status: JobStatus,
}

/// Snapshot returned by [`JobManager::robot_state`].
#[derive(Debug, Clone, Serialize)]
pub struct RobotSnapshot {
    pub deck_state: DeckState,
    pub queued_job_count: usize,
    pub current_status: Option<JobStatus>,
}

// Everything behind the single mutation point.
#[derive(Default)]
struct Queue {
    jobs: Vec<JobRecord>,
    index: HashMap<String, usize>,
    deck: DeckState,
    last_touched: Option<String>,
}

impl Queue {
    fn get(&self, job_id: &str) -> Result<&JobRecord, JobError> {
        self.index
            .get(job_id)
            .map(|&i| &self.jobs[i])
            .ok_or_else(|| JobError::UnknownJobId(job_id.to_string()))
    }

    fn get_mut(&mut self, job_id: &str) -> Result<&mut JobRecord, JobError> {
        match self.index.get(job_id) {
            Some(&i) => {
                self.last_touched = Some(job_id.to_string());
                Ok(&mut self.jobs[i])
            }
            None => Err(JobError::UnknownJobId(job_id.to_string())),
        }
    }
}

// Work copied out of the queue so the pipeline runs without the lock.
struct Claim {
    job: IrJob,
    role: UserRole,
    confirmed: bool,
    progress: Option<SimProgress>,
    deck: DeckState,
}

enum Checkpoint {
    Continue,
    Stop(JobStatus),
}

/// Owns the job queue and drives each job through
/// validate → authorize → compile → simulate → complete.
///
/// Cloning is cheap; clones share the same queue, which is how concurrent
/// workers are fed.
#[derive(Clone)]
pub struct JobManager {
    queue: Arc<Mutex<Queue>>,
    registry: Arc<CapabilityRegistry>,
    policy: Arc<RiskPolicy>,
    compiler: Arc<Compiler>,
    deck_mode: DeckMode,
    default_role: UserRole,
}

impl JobManager {
    pub fn new(registry: Arc<CapabilityRegistry>, deck: DeckState) -> Self {
        Self {
            queue: Arc::new(Mutex::new(Queue {
                deck,
                ..Default::default()
            })),
            registry,
            policy: Arc::new(RiskPolicy::default()),
            compiler: Arc::new(Compiler::default()),
            deck_mode: DeckMode::default(),
            default_role: UserRole::Operator,
        }
    }

    pub fn with_policy(mut self, policy: RiskPolicy) -> Self {
        self.policy = Arc::new(policy);
        self
    }

    pub fn with_compiler(mut self, compiler: Compiler) -> Self {
        self.compiler = Arc::new(compiler);
        self
    }

    pub fn with_deck_mode(mut self, mode: DeckMode) -> Self {
        self.deck_mode = mode;
        self
    }

    pub fn with_default_role(mut self, role: UserRole) -> Self {
        self.default_role = role;
        self
    }

    fn lock(&self) -> MutexGuard<'_, Queue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enqueue `job` under the default role.
    pub fn submit(&self, job: IrJob) -> String {
        self.submit_as(job, self.default_role)
    }

    /// Enqueue `job` as `role`. Resubmitting a known `job_id` returns the
    /// existing id and leaves the queue unchanged.
    pub fn submit_as(&self, job: IrJob, role: UserRole) -> String {
        let mut queue = self.lock();
        let job_id = job.job_id.clone();
        if queue.index.contains_key(&job_id) {
            tracing::debug!(job_id = %job_id, "duplicate submission ignored");
            return job_id;
        }
        let position = queue.jobs.len();
        queue.jobs.push(JobRecord::new(job, role));
        queue.index.insert(job_id.clone(), position);
        queue.last_touched = Some(job_id.clone());
        tracing::info!(job_id = %job_id, %role, "job submitted");
        job_id
    }

    pub fn status(&self, job_id: &str) -> Result<JobStatus, JobError> {
        Ok(self.lock().get(job_id)?.status)
    }

    /// A snapshot of the job and everything its run has produced.
    pub fn job(&self, job_id: &str) -> Result<JobRecord, JobError> {
        Ok(self.lock().get(job_id)?.clone())
    }

    /// Snapshots of every job in submission order.
    pub fn jobs(&self) -> Vec<JobRecord> {
        self.lock().jobs.clone()
    }

    pub fn audit(&self, job_id: &str) -> Result<AuditRecord, JobError> {
        Ok(AuditRecord::from_job(self.lock().get(job_id)?))
    }

    pub fn pause(&self, job_id: &str) -> Result<JobStatus, JobError> {
        self.control(job_id, Event::Pause)
    }

    pub fn resume(&self, job_id: &str) -> Result<JobStatus, JobError> {
        self.control(job_id, Event::Resume)
    }

    pub fn abort(&self, job_id: &str) -> Result<JobStatus, JobError> {
        self.control(job_id, Event::Abort)
    }

    /// Grant confirmation for a job waiting on a `confirm`-level step.
    /// Roles that could not run such a step themselves are refused without
    /// changing the job.
    pub fn confirm(&self, job_id: &str, role: UserRole) -> Result<JobStatus, JobError> {
        let mut queue = self.lock();
        let job = queue.get_mut(job_id)?;
        if !job.confirmed && !role.permits(RiskLevel::Confirm) {
            return Err(JobError::Unauthorized {
                job_id: job_id.to_string(),
                role,
                required: RiskLevel::Confirm,
            });
        }
        let transition = StateMachine::apply(job, Event::Confirm)?;
        log_transition(job_id, "confirm", transition);
        Ok(job.status)
    }

    fn control(&self, job_id: &str, event: Event) -> Result<JobStatus, JobError> {
        let mut queue = self.lock();
        let job = queue.get_mut(job_id)?;
        let action = event.action();
        let transition = StateMachine::apply(job, event)?;
        log_transition(job_id, action, transition);
        Ok(job.status)
    }

    pub fn robot_state(&self) -> RobotSnapshot {
        let queue = self.lock();
        RobotSnapshot {
            deck_state: queue.deck.clone(),
            queued_job_count: queue.jobs.iter().filter(|j| j.is_runnable()).count(),
            current_status: queue
                .last_touched
                .as_deref()
                .and_then(|id| queue.get(id).ok())
                .map(|j| j.status),
        }
    }

    pub fn list_capabilities(&self) -> Arc<CapabilityRegistry> {
        Arc::clone(&self.registry)
    }

    /// Claim the oldest runnable job and drive it as far as it can go.
    /// Returns `None` when nothing is runnable.
    pub fn run_next(&self) -> Option<RunOutcome> {
        let claim = self.claim_next()?;
        let job_id = claim.job.job_id.clone();
        let status = self.execute(claim);
        Some(RunOutcome { job_id, status })
    }

    fn claim_next(&self) -> Option<Claim> {
        let mut queue = self.lock();
        let position = queue.jobs.iter().position(JobRecord::is_runnable)?;
        let deck = queue.deck.clone();
        let job = &mut queue.jobs[position];
        let job_id = job.id().to_string();

        // Pending → Running, or picking up a resumed job.
        match StateMachine::apply(job, Event::Start) {
            Ok(transition) => log_transition(&job_id, "start", transition),
            Err(e) => {
                tracing::warn!(job_id = %job_id, "cannot start runnable job: {e}");
                return None;
            }
        }
        job.claimed = true;
        let claim = Claim {
            job: job.job.clone(),
            role: job.role,
            confirmed: job.confirmed,
            progress: job.progress.take(),
            deck,
        };
        queue.last_touched = Some(job_id);
        Some(claim)
    }

    fn execute(&self, claim: Claim) -> JobStatus {
        let job_id = claim.job.job_id.clone();

        // A resumed dry run already passed preflight and authorization.
        if claim.progress.is_none() {
            let errors = Validator::new(&self.registry).check(&claim.job, &claim.deck);
            if !errors.is_empty() {
                return self.fail(&job_id, JobFailure::Validation { errors });
            }

            let level = self.policy.job_level(&claim.job.steps);
            tracing::debug!(job_id = %job_id, risk = %level, role = %claim.role, "job classified");
            if level == RiskLevel::Block
                && let Some(step) = claim
                    .job
                    .steps
                    .iter()
                    .find(|step| self.policy.classify(step) == RiskLevel::Block)
            {
                return self.fail(
                    &job_id,
                    JobFailure::Blocked {
                        step_id: step.id.clone(),
                        op: step.op().to_string(),
                    },
                );
            }
            if !claim.role.permits(level) && !claim.confirmed {
                return self.suspend(&job_id);
            }
        }

        let records = match self.compiler.compile(&claim.job) {
            Ok(records) => records,
            Err(error) => return self.fail(&job_id, JobFailure::Compile { error }),
        };

        let mut sim = match claim.progress {
            Some(progress) => Simulation::resume(progress.deck, progress.cursor),
            None => Simulation::new(claim.deck),
        };
        while sim.cursor() < records.len() {
            if let Checkpoint::Stop(status) = self.checkpoint(&job_id, &sim) {
                return status;
            }
            if let Err(error) = sim.step(&records[sim.cursor()]) {
                return self.fail(&job_id, JobFailure::Simulation { error });
            }
        }

        self.finish(&job_id, records, sim)
    }

    fn checkpoint(&self, job_id: &str, sim: &Simulation) -> Checkpoint {
        let mut queue = self.lock();
        match queue.get_mut(job_id) {
            Ok(job) => hold(job, sim),
            Err(_) => Checkpoint::Stop(JobStatus::Aborted),
        }
    }

    fn finish(&self, job_id: &str, records: Vec<WorklistRecord>, sim: Simulation) -> JobStatus {
        let mut queue = self.lock();
        match queue.get_mut(job_id) {
            Ok(job) => {
                if let Checkpoint::Stop(status) = hold(job, &sim) {
                    return status;
                }
            }
            Err(_) => return JobStatus::Aborted,
        }

        // Replay onto the live deck so concurrent jobs compose.
        let shared_deck = match self.deck_mode {
            DeckMode::Shared => Some(simulator::apply(&records, &queue.deck)),
            DeckMode::Isolated => None,
        };
        let shared_deck = match shared_deck.transpose() {
            Ok(deck) => deck,
            Err(error) => return fail_in(&mut queue, job_id, JobFailure::Simulation { error }),
        };

        let Ok(job) = queue.get_mut(job_id) else {
            return JobStatus::Aborted;
        };
        job.worklist = records;
        job.result_deck = Some(sim.into_deck());
        job.claimed = false;
        match StateMachine::apply(job, Event::Complete) {
            Ok(transition) => log_transition(job_id, "complete", transition),
            Err(e) => tracing::warn!(job_id, "completion rejected: {e}"),
        }
        let status = job.status;
        if status == JobStatus::Completed
            && let Some(deck) = shared_deck
        {
            queue.deck = deck;
        }
        status
    }

    fn suspend(&self, job_id: &str) -> JobStatus {
        let mut queue = self.lock();
        let Ok(job) = queue.get_mut(job_id) else {
            return JobStatus::Aborted;
        };
        job.claimed = false;
        if job.status == JobStatus::Running {
            match StateMachine::apply(job, Event::RequireConfirmation) {
                Ok(transition) => log_transition(job_id, "await confirmation", transition),
                Err(e) => tracing::warn!(job_id, "cannot suspend: {e}"),
            }
        }
        job.status
    }

    fn fail(&self, job_id: &str, failure: JobFailure) -> JobStatus {
        fail_in(&mut self.lock(), job_id, failure)
    }
}

// Decide whether a claimed job keeps running. Abort and pause only take
// effect here, between records.
fn hold(job: &mut JobRecord, sim: &Simulation) -> Checkpoint {
    match job.status {
        JobStatus::Running => Checkpoint::Continue,
        JobStatus::Paused => {
            job.progress = Some(SimProgress {
                cursor: sim.cursor(),
                deck: sim.deck().clone(),
            });
            job.claimed = false;
            tracing::info!(job_id = job.id(), cursor = sim.cursor(), "dry run paused");
            Checkpoint::Stop(JobStatus::Paused)
        }
        other => {
            job.claimed = false;
            Checkpoint::Stop(other)
        }
    }
}

fn fail_in(queue: &mut Queue, job_id: &str, failure: JobFailure) -> JobStatus {
    let Ok(job) = queue.get_mut(job_id) else {
        return JobStatus::Aborted;
    };
    job.claimed = false;
    tracing::warn!(job_id, "job failed: {failure}");
    if let Err(e) = StateMachine::apply(job, Event::Fail(failure)) {
        tracing::debug!(job_id, "failure not recorded: {e}");
    }
    job.status
}

fn log_transition(job_id: &str, action: &str, transition: Transition) {
    match transition {
        Transition::Moved { from, to } => {
            tracing::info!(job_id, action, %from, %to, "job transition");
        }
        Transition::Unchanged(status) => {
            tracing::debug!(job_id, action, %status, "job state unchanged");
        }
    }
}

/// Run `workers` blocking workers until no job is runnable. Outcomes are
/// returned in completion order.
pub async fn drain(manager: &JobManager, workers: usize) -> Vec<RunOutcome> {
    let mut set = JoinSet::new();
    for _ in 0..workers.max(1) {
        let manager = manager.clone();
        set.spawn_blocking(move || {
            let mut outcomes = Vec::new();
            while let Some(outcome) = manager.run_next() {
                outcomes.push(outcome);
            }
            outcomes
        });
    }

    let mut outcomes = Vec::new();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(batch) => outcomes.extend(batch),
            Err(e) => tracing::error!("worker task failed: {e}"),
        }
    }
    outcomes
}
