//! Dry-run simulation of worklist records against a virtual deck.

use crate::deck::{DeckState, LabwareState};
use crate::error::SimError;
use crate::worklist::{PipettingFields, WorklistRecord};

// Tolerance for floating point residue when a well is drained exactly.
const EPSILON_UL: f64 = 1e-9;

/// Step-wise simulation over a private copy of the deck. Callers can stop
/// between records and pick up again from [`Simulation::cursor`].
#[derive(Debug, Clone)]
pub struct Simulation {
    deck: DeckState,
    cursor: usize,
}

impl Simulation {
    pub fn new(deck: DeckState) -> Self {
        Self { deck, cursor: 0 }
    }

    /// Resume a simulation that already applied `cursor` records to `deck`.
    pub fn resume(deck: DeckState, cursor: usize) -> Self {
        Self { deck, cursor }
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn deck(&self) -> &DeckState {
        &self.deck
    }

    pub fn into_deck(self) -> DeckState {
        self.deck
    }

    /// Apply one record. On error the deck is left unchanged.
    pub fn step(&mut self, record: &WorklistRecord) -> Result<(), SimError> {
        match record {
            WorklistRecord::Aspirate(fields) => self.aspirate(fields)?,
            WorklistRecord::Dispense(fields) => self.dispense(fields)?,
            other => {
                tracing::debug!(record = %other, "simulated record leaves deck unchanged");
            }
        }
        self.cursor += 1;
        Ok(())
    }

    /// Each aspirate picks up a fresh tip when the deck tracks tip racks.
    fn aspirate(&mut self, fields: &PipettingFields) -> Result<(), SimError> {
        let well = fields.well;
        let requested = fields.rendered_volume();
        let available = self
            .deck
            .get(&fields.rack_label)
            .map_or(0.0, |lw| lw.volume(&well));
        if available + EPSILON_UL < requested {
            return Err(SimError::InsufficientVolume {
                labware: fields.rack_label.clone(),
                well,
                available,
                requested,
            });
        }
        if self.deck.tracks_tips() {
            let rack = self
                .deck
                .take_tip(fields.tip())
                .ok_or_else(|| SimError::TipsExhausted {
                    tip_type: fields.tip().map(str::to_string),
                })?;
            tracing::debug!(rack = %rack, "tip picked up");
        }
        let remaining = (available - requested).max(0.0);
        self.deck
            .labware
            .entry(fields.rack_label.clone())
            .or_default()
            .volumes
            .insert(well, remaining);
        Ok(())
    }

    fn dispense(&mut self, fields: &PipettingFields) -> Result<(), SimError> {
        let well = fields.well;
        let labware: &mut LabwareState = self.deck.labware.entry(fields.rack_label.clone()).or_default();
        let resulting = labware.volume(&well) + fields.rendered_volume();
        if let Some(capacity) = labware.capacity_ul
            && resulting > capacity + EPSILON_UL
        {
            return Err(SimError::CapacityExceeded {
                labware: fields.rack_label.clone(),
                well,
                capacity,
                resulting,
            });
        }
        labware.volumes.insert(well, resulting);
        Ok(())
    }
}

/// Apply all `records` to a copy of `deck` and return the resulting state.
/// The input deck is never modified.
pub fn apply(records: &[WorklistRecord], deck: &DeckState) -> Result<DeckState, SimError> {
    let mut sim = Simulation::new(deck.clone());
    for record in records {
        sim.step(record)?;
    }
    Ok(sim.into_deck())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compile;
    use crate::deck::volume_deltas;
    use crate::ir::{IrJob, IrStep, Operation, TransferArgs, WashArgs, Well};

    fn well(label: &str) -> Well {
        label.parse().unwrap()
    }

    fn transfer_job(volume: f64) -> IrJob {
        IrJob::new(
            "sim",
            vec![
                IrStep::new(
                    "s1",
                    Operation::Transfer(TransferArgs {
                        source_labware: "S1".into(),
                        source_well: well("A1"),
                        dest_labware: "D1".into(),
                        dest_well: well("B1"),
                        volume_ul: volume,
                        liquid_class: None,
                        tip_type: None,
                    }),
                ),
                IrStep::new("s2", Operation::Wash(WashArgs { scheme: Some(1) })),
                IrStep::new("s3", Operation::Decontaminate),
            ],
        )
    }

    fn deck() -> DeckState {
        DeckState::new()
            .with_labware("S1", LabwareState::default().with_volume(well("A1"), 100.0))
            .with_labware("D1", LabwareState::default())
    }

    #[test]
    fn transfer_conserves_volume() {
        let records = compile(&transfer_job(25.0)).unwrap();
        let start = deck();
        let end = apply(&records, &start).unwrap();

        assert_eq!(end.get("S1").unwrap().volume(&well("A1")), 75.0);
        assert_eq!(end.get("D1").unwrap().volume(&well("B1")), 25.0);

        let deltas = volume_deltas(&start, &end);
        assert_eq!(deltas["S1"], -25.0);
        assert_eq!(deltas["D1"], 25.0);
        assert_eq!(deltas.values().sum::<f64>(), 0.0);
    }

    #[test]
    fn simulation_is_deterministic_and_pure() {
        let records = compile(&transfer_job(40.0)).unwrap();
        let start = deck();
        let a = apply(&records, &start).unwrap();
        let b = apply(&records, &start).unwrap();
        assert_eq!(a, b);
        assert_eq!(start, deck());
    }

    #[test]
    fn wash_and_decontaminate_do_not_touch_deck() {
        let start = deck();
        let end = apply(
            &[
                WorklistRecord::Wash { scheme: 2 },
                WorklistRecord::Decontaminate,
                WorklistRecord::Flush,
                WorklistRecord::Break,
                WorklistRecord::SetDitiType { index: 1 },
            ],
            &start,
        )
        .unwrap();
        assert_eq!(start, end);
    }

    #[test]
    fn aspirating_too_much_fails() {
        let records = compile(&transfer_job(150.0)).unwrap();
        let err = apply(&records, &deck()).unwrap_err();
        assert_eq!(
            err,
            SimError::InsufficientVolume {
                labware: "S1".into(),
                well: well("A1"),
                available: 100.0,
                requested: 150.0,
            }
        );
    }

    #[test]
    fn aspirating_from_unknown_labware_fails() {
        let start = DeckState::new();
        let records = compile(&transfer_job(1.0)).unwrap();
        assert!(matches!(
            apply(&records, &start),
            Err(SimError::InsufficientVolume { available, .. }) if available == 0.0
        ));
    }

    #[test]
    fn dispensing_past_capacity_fails_when_known() {
        let start = deck().with_labware(
            "D1",
            LabwareState::with_capacity(250.0).with_volume(well("B1"), 230.0),
        );
        let records = compile(&transfer_job(30.0)).unwrap();
        let err = apply(&records, &start).unwrap_err();
        assert!(matches!(err, SimError::CapacityExceeded { capacity, resulting, .. }
            if capacity == 250.0 && resulting == 260.0));
    }

    #[test]
    fn dispense_creates_labware_without_capacity() {
        let start = DeckState::new()
            .with_labware("S1", LabwareState::default().with_volume(well("A1"), 10.0));
        let records = compile(&transfer_job(10.0)).unwrap();
        let end = apply(&records, &start).unwrap();
        let dest = end.get("D1").unwrap();
        assert_eq!(dest.volume(&well("B1")), 10.0);
        assert_eq!(dest.capacity_ul, None);
    }

    #[test]
    fn moves_the_volume_written_to_the_worklist() {
        let records = compile(&transfer_job(12.345)).unwrap();
        let end = apply(&records, &deck()).unwrap();
        assert!((end.get("S1").unwrap().volume(&well("A1")) - 87.65).abs() < 1e-9);
        assert_eq!(end.get("D1").unwrap().volume(&well("B1")), 12.35);
    }

    #[test]
    fn each_aspirate_uses_a_tip() {
        let start = deck().with_labware("TIPS", LabwareState::tip_rack(None, 1));
        let records = compile(&transfer_job(10.0)).unwrap();
        let end = apply(&records, &start).unwrap();
        assert_eq!(end.get("TIPS").unwrap().tips_remaining, Some(0));

        let err = apply(&records, &end).unwrap_err();
        assert_eq!(err, SimError::TipsExhausted { tip_type: None });
        assert_eq!(err.to_string(), "no usable tip left on any rack");
    }

    #[test]
    fn stepwise_simulation_can_resume() {
        let records = compile(&transfer_job(10.0)).unwrap();
        let mut sim = Simulation::new(deck());
        sim.step(&records[0]).unwrap();
        assert_eq!(sim.cursor(), 1);

        let (cursor, partial) = (sim.cursor(), sim.deck().clone());
        let mut resumed = Simulation::resume(partial, cursor);
        for record in &records[resumed.cursor()..] {
            resumed.step(record).unwrap();
        }
        assert_eq!(resumed.into_deck(), apply(&records, &deck()).unwrap());
    }
}
