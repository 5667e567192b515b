//! Lowers validated IR jobs into worklist records.
//!
//! Compilation is deterministic and all-or-nothing: the same job always
//! produces the same records, and an unsupported operation anywhere in the
//! job discards all output.

use crate::error::{CompileError, IrError};
use crate::ir::{IrJob, IrStep, Operation, TransferArgs, Well};
use crate::worklist::{PipettingFields, WorklistRecord};

pub const DEFAULT_LIQUID_CLASS: &str = "Water";

/// Convert a well label such as `A2` to its 1-based position (`9`).
pub fn well_to_position(well: &str) -> Result<u32, IrError> {
    Ok(well.parse::<Well>()?.position())
}

#[derive(Debug, Clone)]
pub struct Compiler {
    default_liquid_class: String,
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new(DEFAULT_LIQUID_CLASS)
    }
}

impl Compiler {
    pub fn new(default_liquid_class: &str) -> Self {
        Self {
            default_liquid_class: default_liquid_class.to_string(),
        }
    }

    /// Compile every step in order. Assumes preflight validation and
    /// authorization already passed.
    pub fn compile(&self, job: &IrJob) -> Result<Vec<WorklistRecord>, CompileError> {
        let mut records = Vec::with_capacity(job.steps.len() * 2);
        for step in &job.steps {
            self.compile_step(job, step, &mut records)?;
        }
        Ok(records)
    }

    fn compile_step(
        &self,
        job: &IrJob,
        step: &IrStep,
        records: &mut Vec<WorklistRecord>,
    ) -> Result<(), CompileError> {
        match &step.operation {
            Operation::Transfer(args) => {
                let liquid_class = self.liquid_class(job, args);
                records.push(WorklistRecord::Aspirate(pipetting(
                    &args.source_labware,
                    &args.source_well,
                    args,
                    liquid_class,
                )));
                records.push(WorklistRecord::Dispense(pipetting(
                    &args.dest_labware,
                    &args.dest_well,
                    args,
                    liquid_class,
                )));
            }
            Operation::Wash(args) => records.push(WorklistRecord::Wash {
                scheme: args.scheme(),
            }),
            Operation::Decontaminate => records.push(WorklistRecord::Decontaminate),
            Operation::Flush | Operation::Break | Operation::SetDitiType(_) => {
                return Err(CompileError::UnsupportedOperation {
                    step_id: step.id.clone(),
                    op: step.op().to_string(),
                });
            }
        }
        Ok(())
    }

    // Step argument > job constraint > configured default.
    fn liquid_class<'a>(&'a self, job: &'a IrJob, args: &'a TransferArgs) -> &'a str {
        args.liquid_class
            .as_deref()
            .or_else(|| job.liquid_class())
            .unwrap_or(&self.default_liquid_class)
    }
}

fn pipetting(labware: &str, well: &Well, args: &TransferArgs, liquid_class: &str) -> PipettingFields {
    let mut fields = PipettingFields::new(labware, *well, args.volume_ul, liquid_class);
    if let Some(tip) = &args.tip_type {
        fields.tip_type = tip.clone();
    }
    fields
}

/// Compile with the default liquid class.
pub fn compile(job: &IrJob) -> Result<Vec<WorklistRecord>, CompileError> {
    Compiler::default().compile(job)
}
