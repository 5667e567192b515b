//! Gemini worklist (`.gwl`) records.
//!
//! Pipetting records always render all ten fields in protocol order:
//!
//! ```text
//! A;RackLabel;RackID;RackType;Position;TubeID;Volume;LiquidClass;TipType;TipMask;ForcedRackType
//! ```
//!
//! Empty fields are kept as empty strings so the field count never changes.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ir::Well;

/// Fields shared by aspirate and dispense records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipettingFields {
    pub rack_label: String,
    pub rack_id: String,
    pub rack_type: String,
    pub well: Well,
    pub tube_id: String,
    #[serde(rename = "volume_uL")]
    pub volume_ul: f64,
    pub liquid_class: String,
    pub tip_type: String,
    pub tip_mask: Option<u16>,
    pub forced_rack_type: String,
}

impl PipettingFields {
    pub fn new(rack_label: &str, well: Well, volume_ul: f64, liquid_class: &str) -> Self {
        Self {
            rack_label: rack_label.to_string(),
            rack_id: String::new(),
            rack_type: String::new(),
            well,
            tube_id: String::new(),
            volume_ul,
            liquid_class: liquid_class.to_string(),
            tip_type: String::new(),
            tip_mask: None,
            forced_rack_type: String::new(),
        }
    }

    /// The volume as written to the `.gwl` line, rounded to 0.01 uL.
    pub fn rendered_volume(&self) -> f64 {
        format!("{:.2}", self.volume_ul)
            .parse()
            .unwrap_or(self.volume_ul)
    }

    pub fn tip(&self) -> Option<&str> {
        Some(self.tip_type.as_str()).filter(|tip| !tip.is_empty())
    }
}

impl fmt::Display for PipettingFields {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tip_mask = self.tip_mask.map(|m| m.to_string()).unwrap_or_default();
        write!(
            f,
            "{};{};{};{};{};{:.2};{};{};{};{}",
            self.rack_label,
            self.rack_id,
            self.rack_type,
            self.well.position(),
            self.tube_id,
            self.volume_ul,
            self.liquid_class,
            self.tip_type,
            tip_mask,
            self.forced_rack_type,
        )
    }
}

/// One compiled device instruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorklistRecord {
    Aspirate(PipettingFields),
    Dispense(PipettingFields),
    Wash { scheme: u8 },
    Decontaminate,
    Flush,
    Break,
    SetDitiType { index: u32 },
    Comment { text: String },
}

impl WorklistRecord {
    pub fn prefix(&self) -> String {
        match self {
            WorklistRecord::Aspirate(_) => "A".to_string(),
            WorklistRecord::Dispense(_) => "D".to_string(),
            WorklistRecord::Wash { scheme } => format!("W{scheme}"),
            WorklistRecord::Decontaminate => "WD".to_string(),
            WorklistRecord::Flush => "F".to_string(),
            WorklistRecord::Break => "B".to_string(),
            WorklistRecord::SetDitiType { .. } => "S".to_string(),
            WorklistRecord::Comment { .. } => "C".to_string(),
        }
    }

    /// Whether applying this record changes well volumes.
    pub fn moves_liquid(&self) -> bool {
        matches!(self, WorklistRecord::Aspirate(_) | WorklistRecord::Dispense(_))
    }
}

impl fmt::Display for WorklistRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = self.prefix();
        match self {
            WorklistRecord::Aspirate(fields) | WorklistRecord::Dispense(fields) => {
                write!(f, "{prefix};{fields}")
            }
            WorklistRecord::SetDitiType { index } => write!(f, "{prefix};{index}"),
            WorklistRecord::Comment { text } => write!(f, "{prefix};{text}"),
            WorklistRecord::Wash { .. }
            | WorklistRecord::Decontaminate
            | WorklistRecord::Flush
            | WorklistRecord::Break => write!(f, "{prefix};"),
        }
    }
}

pub fn render_lines(records: &[WorklistRecord]) -> Vec<String> {
    records.iter().map(ToString::to_string).collect()
}

/// Full `.gwl` file contents, one record per line with a trailing newline.
pub fn render(records: &[WorklistRecord]) -> String {
    render_lines(records)
        .into_iter()
        .map(|line| line + "\n")
        .collect()
}
