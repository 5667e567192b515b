use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ir::Well;
use crate::policy::{RiskLevel, UserRole};
use crate::state_machine::JobStatus;

#[derive(Debug, Error)]
pub enum FluentError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Invalid IR: {0}")]
    Ir(#[from] IrError),

    #[error("Capability registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Compilation failed: {0}")]
    Compile(#[from] CompileError),

    #[error("Simulation failed: {0}")]
    Simulation(#[from] SimError),

    #[error("Job error: {0}")]
    Job(#[from] JobError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Rejections raised while building IR values from untyped input.
#[derive(Debug, Error)]
pub enum IrError {
    #[error("unknown operation `{0}`")]
    UnknownOperation(String),

    #[error("invalid well `{0}` (expected A1..H12)")]
    InvalidWell(String),

    #[error("invalid arguments for `{op}`: {source}")]
    InvalidArgs {
        op: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("wash scheme {0} is not a single digit")]
    InvalidWashScheme(u8),
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("TOML: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Closed taxonomy of preflight problems.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    UnknownOperation,
    LabwareNotFound,
    VolumeOutOfRange,
    PreconditionFailed,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::UnknownOperation => write!(f, "UnknownOperation"),
            ErrorKind::LabwareNotFound => write!(f, "LabwareNotFound"),
            ErrorKind::VolumeOutOfRange => write!(f, "VolumeOutOfRange"),
            ErrorKind::PreconditionFailed => write!(f, "PreconditionFailed"),
        }
    }
}

/// One preflight finding. `step_id` is `None` for job-level constraints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationError {
    pub step_id: Option<String>,
    pub kind: ErrorKind,
    pub message: String,
}

impl ValidationError {
    pub fn step(step_id: &str, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            step_id: Some(step_id.to_string()),
            kind,
            message: message.into(),
        }
    }

    pub fn job(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            step_id: None,
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scope = self.step_id.as_deref().unwrap_or("job");
        write!(f, "{scope}: {} - {}", self.kind, self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
pub enum CompileError {
    #[error("unsupported operation `{op}` in step {step_id}")]
    UnsupportedOperation { step_id: String, op: String },
}

#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
pub enum SimError {
    #[error("insufficient volume in {labware}:{well}: {available:.2}uL available, {requested:.2}uL requested")]
    InsufficientVolume {
        labware: String,
        well: Well,
        available: f64,
        requested: f64,
    },

    #[error("capacity exceeded in {labware}:{well}: {resulting:.2}uL exceeds {capacity:.2}uL")]
    CapacityExceeded {
        labware: String,
        well: Well,
        capacity: f64,
        resulting: f64,
    },

    #[error("no {} tip left on any rack", tip_type.as_deref().unwrap_or("usable"))]
    TipsExhausted { tip_type: Option<String> },
}

/// Errors returned synchronously by status/control calls on the job manager.
/// None of these change job state.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum JobError {
    #[error("job not found: {0}")]
    UnknownJobId(String),

    #[error("cannot {action} job {job_id} while it is {from}")]
    InvalidStateTransition {
        job_id: String,
        from: JobStatus,
        action: &'static str,
    },

    #[error("role {role} may not confirm job {job_id} (requires {required})")]
    Unauthorized {
        job_id: String,
        role: UserRole,
        required: RiskLevel,
    },
}

/// Why a job ended up `aborted`. Stored on the job, never thrown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum JobFailure {
    Validation { errors: Vec<ValidationError> },
    Blocked { step_id: String, op: String },
    Compile { error: CompileError },
    Simulation { error: SimError },
    Aborted,
}

impl fmt::Display for JobFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobFailure::Validation { errors } => {
                write!(f, "preflight failed with {} error(s)", errors.len())?;
                for e in errors {
                    write!(f, "; {e}")?;
                }
                Ok(())
            }
            JobFailure::Blocked { step_id, op } => {
                write!(f, "step {step_id} ({op}) is blocked by policy")
            }
            JobFailure::Compile { error } => write!(f, "compilation failed: {error}"),
            JobFailure::Simulation { error } => write!(f, "simulation failed: {error}"),
            JobFailure::Aborted => write!(f, "aborted by user"),
        }
    }
}
