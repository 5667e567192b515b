//! Preflight validation of IR jobs against the deck and capability registry.

use crate::capabilities::CapabilityRegistry;
use crate::deck::DeckState;
use crate::error::{ErrorKind, ValidationError};
use crate::ir::{IrJob, IrStep, Operation, TransferArgs};
use crate::precondition;

/// Checks jobs before anything is compiled. Holds no mutable state.
pub struct Validator<'a> {
    registry: &'a CapabilityRegistry,
}

impl<'a> Validator<'a> {
    pub fn new(registry: &'a CapabilityRegistry) -> Self {
        Self { registry }
    }

    /// Collect every problem in `job`, in step order. An empty result means
    /// the job is valid. Checks continue past the first failure.
    pub fn check(&self, job: &IrJob, deck: &DeckState) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if job.require_homed()
            && precondition::evaluate("robot.homed == true", &deck.robot) != Ok(true)
        {
            errors.push(ValidationError::job(
                ErrorKind::PreconditionFailed,
                "job requires a homed robot but robot.homed is not true",
            ));
        }

        // Tip racks are drawn down on a scratch copy so later transfers see
        // the tips earlier ones used.
        let mut racks = deck.tracks_tips().then(|| deck.clone());
        for step in &job.steps {
            self.check_step(step, deck, racks.as_mut(), &mut errors);
        }
        errors
    }

    fn check_step(
        &self,
        step: &IrStep,
        deck: &DeckState,
        racks: Option<&mut DeckState>,
        errors: &mut Vec<ValidationError>,
    ) {
        let spec = self.registry.lookup(step.op());
        if spec.is_none() {
            errors.push(ValidationError::step(
                &step.id,
                ErrorKind::UnknownOperation,
                format!("Unknown op: {}", step.op()),
            ));
        }

        if let Operation::Transfer(args) = &step.operation {
            self.check_labware(step, args, deck, errors);
            self.check_volume(step, args, deck, errors);
            if let Some(racks) = racks
                && racks.take_tip(args.tip_type.as_deref()).is_none()
            {
                errors.push(ValidationError::step(
                    &step.id,
                    ErrorKind::PreconditionFailed,
                    format!(
                        "no {} tip left on any rack",
                        args.tip_type.as_deref().unwrap_or("usable")
                    ),
                ));
            }
        }

        for expr in &step.preconditions {
            match precondition::evaluate(expr, &deck.robot) {
                Ok(true) => {}
                Ok(false) => errors.push(ValidationError::step(
                    &step.id,
                    ErrorKind::PreconditionFailed,
                    format!("precondition `{expr}` is false"),
                )),
                Err(reason) => errors.push(ValidationError::step(
                    &step.id,
                    ErrorKind::PreconditionFailed,
                    format!("precondition `{expr}` could not be evaluated: {reason}"),
                )),
            }
        }
    }

    fn check_labware(
        &self,
        step: &IrStep,
        args: &TransferArgs,
        deck: &DeckState,
        errors: &mut Vec<ValidationError>,
    ) {
        if !deck.contains(&args.source_labware) {
            errors.push(ValidationError::step(
                &step.id,
                ErrorKind::LabwareNotFound,
                format!("Source labware {} missing", args.source_labware),
            ));
        }
        if !deck.contains(&args.dest_labware) {
            errors.push(ValidationError::step(
                &step.id,
                ErrorKind::LabwareNotFound,
                format!("Destination labware {} missing", args.dest_labware),
            ));
        }
    }

    fn check_volume(
        &self,
        step: &IrStep,
        args: &TransferArgs,
        deck: &DeckState,
        errors: &mut Vec<ValidationError>,
    ) {
        let volume = args.volume_ul;
        let mut out_of_range = |message: String| {
            errors.push(ValidationError::step(&step.id, ErrorKind::VolumeOutOfRange, message));
        };

        if !volume.is_finite() || volume <= 0.0 {
            out_of_range(format!("Volume {volume}uL must be positive"));
            return;
        }

        let constraints = self.registry.global_constraints();
        if let Some(min) = constraints.min_volume()
            && volume < min
        {
            out_of_range(format!("Volume {volume}uL is below the instrument minimum {min}uL"));
        }
        if let Some(max) = constraints.max_volume()
            && volume > max
        {
            out_of_range(format!("Volume {volume}uL exceeds the instrument maximum {max}uL"));
        }

        if let Some(range) = self
            .registry
            .lookup(step.op())
            .and_then(|spec| spec.range("volume_uL"))
            && !range.contains(volume)
        {
            out_of_range(format!(
                "Volume {volume}uL is outside the {} range [{}, {}]",
                step.op(),
                range.min.map_or("-".to_string(), |v| v.to_string()),
                range.max.map_or("-".to_string(), |v| v.to_string()),
            ));
        }

        if let Some(tip) = &args.tip_type
            && let Some(capacity) = constraints.tip_capacities.get(tip)
            && volume > *capacity
        {
            out_of_range(format!("Volume {volume}uL exceeds {tip} tip capacity {capacity}uL"));
        }

        if let Some(remaining) = deck
            .get(&args.dest_labware)
            .and_then(|lw| lw.remaining_capacity(&args.dest_well))
            && volume > remaining
        {
            out_of_range(format!(
                "Volume {volume}uL exceeds remaining capacity {remaining}uL of {}:{}",
                args.dest_labware, args.dest_well
            ));
        }
    }
}

/// Convenience wrapper around [`Validator::check`].
pub fn check(job: &IrJob, deck: &DeckState, registry: &CapabilityRegistry) -> Vec<ValidationError> {
    Validator::new(registry).check(job, deck)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deck::{LabwareState, RobotState};
    use crate::ir::WashArgs;

    fn transfer(id: &str, src: &str, dest: &str, volume: f64) -> IrStep {
        IrStep::new(
            id,
            Operation::Transfer(TransferArgs {
                source_labware: src.into(),
                source_well: "A1".parse().unwrap(),
                dest_labware: dest.into(),
                dest_well: "B1".parse().unwrap(),
                volume_ul: volume,
                liquid_class: None,
                tip_type: None,
            }),
        )
    }

    fn deck() -> DeckState {
        DeckState::new()
            .with_labware("S1", LabwareState::default())
            .with_labware("D1", LabwareState::default())
    }

    fn kinds(errors: &[ValidationError]) -> Vec<ErrorKind> {
        errors.iter().map(|e| e.kind).collect()
    }

    #[test]
    fn valid_job_has_no_errors() {
        let registry = CapabilityRegistry::builtin();
        let job = IrJob::new(
            "job1",
            vec![
                transfer("s1", "S1", "D1", 100.0),
                IrStep::new("s2", Operation::Wash(WashArgs { scheme: Some(1) })),
                IrStep::new("s3", Operation::Decontaminate),
            ],
        );
        assert!(check(&job, &deck(), &registry).is_empty());
    }

    #[test]
    fn missing_labware_reported_for_each_side() {
        let registry = CapabilityRegistry::builtin();
        let job = IrJob::new("job2", vec![transfer("s1", "S2", "D9", 10.0)]);
        let errors = check(&job, &deck(), &registry);
        assert_eq!(kinds(&errors), vec![ErrorKind::LabwareNotFound, ErrorKind::LabwareNotFound]);
        assert!(errors[0].message.contains("S2"));
        assert!(errors[1].message.contains("D9"));
    }

    #[test]
    fn volume_above_instrument_maximum() {
        let registry = CapabilityRegistry::builtin();
        let job = IrJob::new("job3", vec![transfer("s1", "S1", "D1", 2000.0)]);
        let errors = check(&job, &deck(), &registry);
        assert!(!errors.is_empty());
        assert!(errors.iter().all(|e| e.kind == ErrorKind::VolumeOutOfRange));
    }

    #[test]
    fn non_positive_volume_rejected() {
        let registry = CapabilityRegistry::builtin();
        let job = IrJob::new("job", vec![transfer("s1", "S1", "D1", 0.0)]);
        assert_eq!(kinds(&check(&job, &deck(), &registry)), vec![ErrorKind::VolumeOutOfRange]);
    }

    #[test]
    fn volume_exceeding_tip_and_well_capacity() {
        let registry = CapabilityRegistry::builtin();
        let mut step = transfer("s1", "S1", "D1", 150.0);
        if let Operation::Transfer(args) = &mut step.operation {
            args.tip_type = Some("DiTi_50".into());
        }
        let deck = DeckState::new()
            .with_labware("S1", LabwareState::default())
            .with_labware(
                "D1",
                LabwareState::with_capacity(250.0).with_volume("B1".parse().unwrap(), 200.0),
            );
        let errors = check(&IrJob::new("job", vec![step]), &deck, &registry);
        assert_eq!(errors.len(), 2);
        assert!(errors[0].message.contains("DiTi_50"));
        assert!(errors[1].message.contains("remaining capacity 50"));
    }

    #[test]
    fn empty_registry_treats_every_op_as_unknown() {
        let registry = CapabilityRegistry::empty();
        let job = IrJob::new(
            "job",
            vec![
                transfer("s1", "S1", "D1", 10.0),
                IrStep::new("s2", Operation::Decontaminate),
            ],
        );
        let errors = check(&job, &deck(), &registry);
        assert_eq!(kinds(&errors), vec![ErrorKind::UnknownOperation, ErrorKind::UnknownOperation]);
    }

    #[test]
    fn reserved_ops_are_unknown_to_builtin_registry() {
        let registry = CapabilityRegistry::builtin();
        let job = IrJob::new("job", vec![IrStep::new("f", Operation::Flush)]);
        let errors = check(&job, &deck(), &registry);
        assert_eq!(errors[0].step_id.as_deref(), Some("f"));
        assert_eq!(errors[0].kind, ErrorKind::UnknownOperation);
    }

    #[test]
    fn preconditions_evaluate_against_robot_state() {
        let registry = CapabilityRegistry::builtin();
        let step = transfer("s1", "S1", "D1", 20.0)
            .with_preconditions(["robot.homed == true", "tip.attached == true", "robot.homed =="]);
        let deck = deck().with_robot(RobotState::default().with("robot.homed", true));
        let errors = check(&IrJob::new("job", vec![step]), &deck, &registry);
        assert_eq!(kinds(&errors), vec![ErrorKind::PreconditionFailed, ErrorKind::PreconditionFailed]);
        assert!(errors[0].message.contains("tip.attached == true"));
        assert!(errors[1].message.contains("could not be evaluated"));
    }

    #[test]
    fn require_homed_constraint_is_job_level() {
        let registry = CapabilityRegistry::builtin();
        let job = IrJob::new("job", vec![transfer("s1", "S1", "D1", 20.0)])
            .with_constraint("require_homed", true);

        let errors = check(&job, &deck(), &registry);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].step_id, None);

        let homed = deck().with_robot(RobotState::default().with("robot.homed", true));
        assert!(check(&job, &homed, &registry).is_empty());
    }

    #[test]
    fn collects_every_problem_across_steps() {
        let registry = CapabilityRegistry::builtin();
        let job = IrJob::new(
            "job",
            vec![
                transfer("s1", "NOPE", "D1", 5000.0),
                IrStep::new("s2", Operation::Break),
                transfer("s3", "S1", "D1", 10.0).with_preconditions(["tip.attached"]),
            ],
        );
        let errors = check(&job, &deck(), &registry);
        // LabwareNotFound + 2x VolumeOutOfRange (global, op range) + UnknownOperation + PreconditionFailed
        assert!(errors.len() >= 4);
        let steps: Vec<_> = errors.iter().filter_map(|e| e.step_id.as_deref()).collect();
        assert_eq!(steps.first(), Some(&"s1"));
        assert_eq!(steps.last(), Some(&"s3"));
        assert!(kinds(&errors).contains(&ErrorKind::UnknownOperation));
    }

    #[test]
    fn transfers_need_a_tip_when_racks_are_tracked() {
        let registry = CapabilityRegistry::builtin();
        let deck = deck()
            .with_labware("TIPS_1", LabwareState::tip_rack(Some("DiTi_200"), 1))
            .with_labware("TIPS_2", LabwareState::tip_rack(Some("DiTi_1000"), 5));
        let typed = |id: &str| {
            let mut step = transfer(id, "S1", "D1", 10.0);
            if let Operation::Transfer(args) = &mut step.operation {
                args.tip_type = Some("DiTi_200".into());
            }
            step
        };
        let job = IrJob::new("job", vec![typed("s1"), typed("s2"), transfer("s3", "S1", "D1", 10.0)]);

        let errors = check(&job, &deck, &registry);
        assert_eq!(kinds(&errors), vec![ErrorKind::PreconditionFailed]);
        assert_eq!(errors[0].step_id.as_deref(), Some("s2"));
        assert!(errors[0].message.contains("no DiTi_200 tip left"));
        assert_eq!(deck.get("TIPS_1").unwrap().tips_remaining, Some(1));
    }

    #[test]
    fn validator_does_not_mutate_deck() {
        let registry = CapabilityRegistry::builtin();
        let deck = deck();
        let before = deck.clone();
        let job = IrJob::new("job", vec![transfer("s1", "S1", "D1", 10.0)]);
        let _ = check(&job, &deck, &registry);
        assert_eq!(deck, before);
    }
}
