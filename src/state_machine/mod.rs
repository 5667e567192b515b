mod job;
mod state;

pub use job::{AuditRecord, JobRecord, SimProgress};
pub use state::{Event, JobStatus, StateMachine, Transition};
