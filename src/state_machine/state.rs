use std::fmt;

use serde::{Deserialize, Serialize};

use super::job::JobRecord;
use crate::error::{JobError, JobFailure};

/// Lifecycle state of a job in the manager.
///
/// `Pending → Running → {WaitingConfirmation ⇄ Running} → Completed`, with
/// `Paused` (resumable) and `Aborted` (terminal) reachable from the active
/// states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    WaitingConfirmation,
    Paused,
    Completed,
    Aborted,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Aborted)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::WaitingConfirmation => write!(f, "waiting_confirmation"),
            JobStatus::Paused => write!(f, "paused"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Aborted => write!(f, "aborted"),
        }
    }
}

/// Inputs that drive a job between states. The first four come from the
/// execution pipeline, the rest from callers.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Start,
    RequireConfirmation,
    Complete,
    Fail(JobFailure),
    Pause,
    Resume,
    Abort,
    Confirm,
}

impl Event {
    /// Verb used in logs and `InvalidStateTransition` errors.
    pub(crate) fn action(&self) -> &'static str {
        match self {
            Event::Start => "start",
            Event::RequireConfirmation => "suspend",
            Event::Complete => "complete",
            Event::Fail(_) => "fail",
            Event::Pause => "pause",
            Event::Resume => "resume",
            Event::Abort => "abort",
            Event::Confirm => "confirm",
        }
    }
}

/// The result of applying an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The job moved between two states.
    Moved { from: JobStatus, to: JobStatus },
    /// Accepted, but the state did not change (e.g. a repeated confirm).
    Unchanged(JobStatus),
}

/// Applies lifecycle events to a [`JobRecord`].
pub struct StateMachine;

impl StateMachine {
    /// Apply `event` to `job`. Invalid events return
    /// [`JobError::InvalidStateTransition`] and leave the job untouched.
    pub fn apply(job: &mut JobRecord, event: Event) -> Result<Transition, JobError> {
        use JobStatus::*;

        let from = job.status;
        let to = match (&event, from) {
            (Event::Start, Pending | Running) => Running,
            (Event::RequireConfirmation, Running) => WaitingConfirmation,
            (Event::Complete, Running) => Completed,
            (Event::Fail(_), s) if !s.is_terminal() => Aborted,

            (Event::Pause, Running | WaitingConfirmation) => Paused,

            (Event::Resume, Paused) => match job.paused_from {
                Some(WaitingConfirmation) if !job.confirmed => WaitingConfirmation,
                _ => Running,
            },
            (Event::Resume, WaitingConfirmation) if job.confirmed => Running,

            (Event::Abort, s) if !s.is_terminal() => Aborted,

            (Event::Confirm, _) if job.confirmed => return Ok(Transition::Unchanged(from)),
            (Event::Confirm, WaitingConfirmation) => Running,
            (Event::Confirm, Paused) if job.paused_from == Some(WaitingConfirmation) => {
                job.confirmed = true;
                job.touch();
                return Ok(Transition::Unchanged(from));
            }

            _ => {
                return Err(JobError::InvalidStateTransition {
                    job_id: job.id().to_string(),
                    from,
                    action: event.action(),
                });
            }
        };

        match event {
            Event::Fail(failure) => job.failure = Some(failure),
            Event::Abort => job.failure = Some(JobFailure::Aborted),
            Event::Confirm => job.confirmed = true,
            Event::Pause => job.paused_from = Some(from),
            Event::Resume => job.paused_from = None,
            _ => {}
        }

        if from == to {
            return Ok(Transition::Unchanged(from));
        }
        job.history.push(from);
        job.status = to;
        job.touch();
        Ok(Transition::Moved { from, to })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::IrJob;
    use crate::policy::UserRole;

    fn make_job() -> JobRecord {
        JobRecord::new(IrJob::new("job-1", vec![]), UserRole::Operator)
    }

    fn moved(from: JobStatus, to: JobStatus) -> Transition {
        Transition::Moved { from, to }
    }

    #[test]
    fn happy_path_walks_all_states() {
        let mut job = make_job();
        assert_eq!(job.status, JobStatus::Pending);

        let t = StateMachine::apply(&mut job, Event::Start).unwrap();
        assert_eq!(t, moved(JobStatus::Pending, JobStatus::Running));

        let t = StateMachine::apply(&mut job, Event::Complete).unwrap();
        assert_eq!(t, moved(JobStatus::Running, JobStatus::Completed));
        assert_eq!(job.history, vec![JobStatus::Pending, JobStatus::Running]);
        assert!(job.status.is_terminal());
    }

    #[test]
    fn confirmation_round_trip() {
        let mut job = make_job();
        StateMachine::apply(&mut job, Event::Start).unwrap();
        StateMachine::apply(&mut job, Event::RequireConfirmation).unwrap();
        assert_eq!(job.status, JobStatus::WaitingConfirmation);

        // Resume without confirmation is refused.
        assert!(StateMachine::apply(&mut job, Event::Resume).is_err());
        assert_eq!(job.status, JobStatus::WaitingConfirmation);

        let t = StateMachine::apply(&mut job, Event::Confirm).unwrap();
        assert_eq!(t, moved(JobStatus::WaitingConfirmation, JobStatus::Running));
        assert!(job.confirmed);

        // Confirming again is a no-op.
        let t = StateMachine::apply(&mut job, Event::Confirm).unwrap();
        assert_eq!(t, Transition::Unchanged(JobStatus::Running));
    }

    #[test]
    fn pause_and_resume_return_to_running() {
        let mut job = make_job();
        StateMachine::apply(&mut job, Event::Start).unwrap();
        StateMachine::apply(&mut job, Event::Pause).unwrap();
        assert_eq!(job.status, JobStatus::Paused);
        assert_eq!(job.paused_from, Some(JobStatus::Running));

        let t = StateMachine::apply(&mut job, Event::Resume).unwrap();
        assert_eq!(t, moved(JobStatus::Paused, JobStatus::Running));
        assert_eq!(job.paused_from, None);
    }

    #[test]
    fn paused_while_waiting_resumes_to_waiting_unless_confirmed() {
        let mut job = make_job();
        StateMachine::apply(&mut job, Event::Start).unwrap();
        StateMachine::apply(&mut job, Event::RequireConfirmation).unwrap();
        StateMachine::apply(&mut job, Event::Pause).unwrap();

        let mut unconfirmed = job.clone();
        StateMachine::apply(&mut unconfirmed, Event::Resume).unwrap();
        assert_eq!(unconfirmed.status, JobStatus::WaitingConfirmation);

        let t = StateMachine::apply(&mut job, Event::Confirm).unwrap();
        assert_eq!(t, Transition::Unchanged(JobStatus::Paused));
        StateMachine::apply(&mut job, Event::Resume).unwrap();
        assert_eq!(job.status, JobStatus::Running);
    }

    #[test]
    fn pause_only_from_active_states() {
        let mut job = make_job();
        let err = StateMachine::apply(&mut job, Event::Pause).unwrap_err();
        assert_eq!(
            err,
            JobError::InvalidStateTransition {
                job_id: "job-1".into(),
                from: JobStatus::Pending,
                action: "pause",
            }
        );
        assert!(job.history.is_empty());
    }

    #[test]
    fn abort_from_any_non_terminal_state() {
        for setup in [vec![], vec![Event::Start], vec![Event::Start, Event::Pause]] {
            let mut job = make_job();
            for event in setup {
                StateMachine::apply(&mut job, event).unwrap();
            }
            StateMachine::apply(&mut job, Event::Abort).unwrap();
            assert_eq!(job.status, JobStatus::Aborted);
            assert_eq!(job.failure, Some(JobFailure::Aborted));
        }
    }

    #[test]
    fn terminal_states_reject_everything() {
        let mut job = make_job();
        StateMachine::apply(&mut job, Event::Start).unwrap();
        StateMachine::apply(&mut job, Event::Complete).unwrap();
        for event in [Event::Start, Event::Pause, Event::Resume, Event::Abort, Event::Confirm] {
            assert!(StateMachine::apply(&mut job, event).is_err());
        }
        assert_eq!(job.status, JobStatus::Completed);
    }

    #[test]
    fn failure_is_recorded() {
        let mut job = make_job();
        StateMachine::apply(&mut job, Event::Start).unwrap();
        let failure = JobFailure::Blocked {
            step_id: "s1".into(),
            op: "flush".into(),
        };
        StateMachine::apply(&mut job, Event::Fail(failure.clone())).unwrap();
        assert_eq!(job.status, JobStatus::Aborted);
        assert_eq!(job.failure, Some(failure));
    }

    #[test]
    fn status_display() {
        assert_eq!(JobStatus::Pending.to_string(), "pending");
        assert_eq!(JobStatus::WaitingConfirmation.to_string(), "waiting_confirmation");
        assert_eq!(JobStatus::Aborted.to_string(), "aborted");
    }
}
