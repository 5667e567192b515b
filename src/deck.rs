//! Virtual deck: labware well volumes plus runtime robot variables.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ir::Well;

/// Volumes and limits for one piece of labware.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LabwareState {
    /// Current volume per well in uL. Absent wells hold 0 uL.
    #[serde(default)]
    pub volumes: BTreeMap<Well, f64>,
    /// Per-well capacity in uL, when known.
    #[serde(default, rename = "capacity_uL", skip_serializing_if = "Option::is_none")]
    pub capacity_ul: Option<f64>,
    /// Remaining tips for tip-rack labware.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tips_remaining: Option<u32>,
    /// Tip type held by a rack, e.g. `DiTi_200`. A rack without one
    /// supplies any transfer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tip_type: Option<String>,
}

impl LabwareState {
    pub fn with_capacity(capacity_ul: f64) -> Self {
        Self {
            capacity_ul: Some(capacity_ul),
            ..Default::default()
        }
    }

    pub fn with_volume(mut self, well: Well, volume_ul: f64) -> Self {
        self.volumes.insert(well, volume_ul);
        self
    }

    pub fn volume(&self, well: &Well) -> f64 {
        self.volumes.get(well).copied().unwrap_or(0.0)
    }

    /// Space left in `well`, or `None` when capacity is unknown.
    pub fn remaining_capacity(&self, well: &Well) -> Option<f64> {
        self.capacity_ul.map(|cap| (cap - self.volume(well)).max(0.0))
    }

    pub fn total_volume(&self) -> f64 {
        self.volumes.values().sum()
    }

    pub fn tip_rack(tip_type: Option<&str>, tips: u32) -> Self {
        Self {
            tips_remaining: Some(tips),
            tip_type: tip_type.map(str::to_string),
            ..Default::default()
        }
    }

    pub fn is_tip_rack(&self) -> bool {
        self.tips_remaining.is_some()
    }

    fn supplies(&self, tip_type: Option<&str>) -> bool {
        let matches = match (tip_type, self.tip_type.as_deref()) {
            (Some(wanted), Some(held)) => wanted == held,
            _ => true,
        };
        matches && self.tips_remaining.is_some_and(|n| n > 0)
    }
}

/// Runtime robot variables that preconditions are evaluated against,
/// e.g. `robot.homed` or `tip.attached`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RobotState {
    vars: BTreeMap<String, Value>,
}

impl RobotState {
    pub fn get(&self, path: &str) -> Option<&Value> {
        self.vars.get(path)
    }

    pub fn set(&mut self, path: &str, value: impl Into<Value>) {
        self.vars.insert(path.to_string(), value.into());
    }

    pub fn with(mut self, path: &str, value: impl Into<Value>) -> Self {
        self.set(path, value);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeckState {
    #[serde(default)]
    pub labware: BTreeMap<String, LabwareState>,
    #[serde(default)]
    pub robot: RobotState,
}

impl DeckState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_labware(mut self, id: &str, labware: LabwareState) -> Self {
        self.labware.insert(id.to_string(), labware);
        self
    }

    pub fn with_robot(mut self, robot: RobotState) -> Self {
        self.robot = robot;
        self
    }

    pub fn contains(&self, id: &str) -> bool {
        self.labware.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&LabwareState> {
        self.labware.get(id)
    }

    /// Tips are only tracked once the deck declares at least one rack.
    pub fn tracks_tips(&self) -> bool {
        self.labware.values().any(LabwareState::is_tip_rack)
    }

    /// Take one tip from the first rack, by labware id, that can supply
    /// `tip_type`. Returns the rack id, or `None` with the deck unchanged.
    pub fn take_tip(&mut self, tip_type: Option<&str>) -> Option<String> {
        let (id, rack) = self
            .labware
            .iter_mut()
            .find(|(_, labware)| labware.supplies(tip_type))?;
        rack.tips_remaining = rack.tips_remaining.map(|n| n - 1);
        Some(id.clone())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read deck file {}", path.display()))?;
        let deck = serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse deck file {}", path.display()))?;
        Ok(deck)
    }
}

/// Per-labware change in total volume between two deck snapshots.
/// Labware present in either snapshot is reported.
pub fn volume_deltas(before: &DeckState, after: &DeckState) -> BTreeMap<String, f64> {
    let total = |deck: &DeckState, id: &str| deck.get(id).map_or(0.0, LabwareState::total_volume);
    before
        .labware
        .keys()
        .chain(after.labware.keys())
        .map(|id| (id.clone(), total(after, id) - total(before, id)))
        .collect()
}
