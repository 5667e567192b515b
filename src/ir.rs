//! Robot-agnostic intermediate representation of a liquid-handling job.
//!
//! An [`IrJob`] is an ordered list of [`IrStep`]s plus job-level constraints.
//! Each step carries a closed [`Operation`] whose arguments are typed per
//! variant; an unrecognized `op` tag fails at deserialization time.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::IrError;

pub const IR_VERSION: &str = "1.0";

const ROWS: u8 = 8;
const COLUMNS: u8 = 12;

/// A well on a 96-well plate, `A1` through `H12`.
///
/// Ordering follows the numeric position: column-major, rows A..H within
/// each column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Well {
    column: u8,
    row: u8,
}

impl Well {
    /// 1-based position: `column_index * 8 + row_index + 1`.
    pub fn position(&self) -> u32 {
        u32::from(self.column) * u32::from(ROWS) + u32::from(self.row) + 1
    }
}

impl FromStr for Well {
    type Err = IrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || IrError::InvalidWell(s.to_string());
        let mut chars = s.trim().chars();
        let row_char = chars.next().ok_or_else(invalid)?.to_ascii_uppercase();
        if !row_char.is_ascii_uppercase() {
            return Err(invalid());
        }
        let digits = chars.as_str();
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        let row = row_char as u8 - b'A';
        let column: u8 = digits.parse().map_err(|_| invalid())?;
        if row >= ROWS || column == 0 || column > COLUMNS {
            return Err(invalid());
        }
        Ok(Self {
            column: column - 1,
            row,
        })
    }
}

impl TryFrom<String> for Well {
    type Error = IrError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Well> for String {
    fn from(well: Well) -> Self {
        well.to_string()
    }
}

impl fmt::Display for Well {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", (b'A' + self.row) as char, self.column + 1)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransferArgs {
    pub source_labware: String,
    pub source_well: Well,
    pub dest_labware: String,
    pub dest_well: Well,
    #[serde(rename = "volume_uL")]
    pub volume_ul: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub liquid_class: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tip_type: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WashArgs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheme: Option<u8>,
}

impl WashArgs {
    pub const DEFAULT_SCHEME: u8 = 1;

    pub fn scheme(&self) -> u8 {
        self.scheme.unwrap_or(Self::DEFAULT_SCHEME)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NoArgs {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SetDitiTypeArgs {
    pub index: u32,
}

/// The closed operation set. `Flush`, `Break` and `SetDitiType` are part of
/// the IR but have no compiler lowering yet.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    Transfer(TransferArgs),
    Wash(WashArgs),
    Decontaminate,
    Flush,
    Break,
    SetDitiType(SetDitiTypeArgs),
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Transfer(_) => "transfer",
            Operation::Wash(_) => "wash",
            Operation::Decontaminate => "decontaminate",
            Operation::Flush => "flush",
            Operation::Break => "break",
            Operation::SetDitiType(_) => "set_diti_type",
        }
    }

    /// Build an operation from its tag and an untyped argument payload.
    /// A missing or null payload is treated as `{}`.
    pub fn from_parts(op: &str, args: Value) -> Result<Self, IrError> {
        let args = if args.is_null() {
            Value::Object(Default::default())
        } else {
            args
        };
        let invalid = |source| IrError::InvalidArgs {
            op: op.to_string(),
            source,
        };
        let operation = match op {
            "transfer" => Operation::Transfer(serde_json::from_value(args).map_err(invalid)?),
            "wash" => {
                let wash: WashArgs = serde_json::from_value(args).map_err(invalid)?;
                if let Some(scheme) = wash.scheme
                    && scheme > 9
                {
                    return Err(IrError::InvalidWashScheme(scheme));
                }
                Operation::Wash(wash)
            }
            "decontaminate" => {
                serde_json::from_value::<NoArgs>(args).map_err(invalid)?;
                Operation::Decontaminate
            }
            "flush" => {
                serde_json::from_value::<NoArgs>(args).map_err(invalid)?;
                Operation::Flush
            }
            "break" => {
                serde_json::from_value::<NoArgs>(args).map_err(invalid)?;
                Operation::Break
            }
            "set_diti_type" => {
                Operation::SetDitiType(serde_json::from_value(args).map_err(invalid)?)
            }
            other => return Err(IrError::UnknownOperation(other.to_string())),
        };
        Ok(operation)
    }

    fn args_value(&self) -> Value {
        let value = match self {
            Operation::Transfer(args) => serde_json::to_value(args),
            Operation::Wash(args) => serde_json::to_value(args),
            Operation::SetDitiType(args) => serde_json::to_value(args),
            Operation::Decontaminate | Operation::Flush | Operation::Break => {
                serde_json::to_value(NoArgs {})
            }
        };
        value.unwrap_or_default()
    }
}

/// A single step of an IR job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawStep", into = "RawStep")]
pub struct IrStep {
    pub id: String,
    pub operation: Operation,
    /// Boolean expressions over runtime robot state, evaluated in order.
    pub preconditions: Vec<String>,
}

impl IrStep {
    pub fn new(id: impl Into<String>, operation: Operation) -> Self {
        Self {
            id: id.into(),
            operation,
            preconditions: Vec::new(),
        }
    }

    pub fn with_preconditions<I, S>(mut self, preconditions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.preconditions = preconditions.into_iter().map(Into::into).collect();
        self
    }

    pub fn op(&self) -> &'static str {
        self.operation.name()
    }
}

// Wire shape of a step: `{id, op, args, preconditions}`.
#[derive(Serialize, Deserialize)]
struct RawStep {
    id: String,
    op: String,
    #[serde(default)]
    args: Value,
    #[serde(default)]
    preconditions: Vec<String>,
}

impl TryFrom<RawStep> for IrStep {
    type Error = IrError;

    fn try_from(raw: RawStep) -> Result<Self, Self::Error> {
        Ok(Self {
            operation: Operation::from_parts(&raw.op, raw.args)?,
            id: raw.id,
            preconditions: raw.preconditions,
        })
    }
}

impl From<IrStep> for RawStep {
    fn from(step: IrStep) -> Self {
        Self {
            args: step.operation.args_value(),
            op: step.operation.name().to_string(),
            id: step.id,
            preconditions: step.preconditions,
        }
    }
}

/// A job: ordered steps plus job-level constraints. `job_id` is the
/// caller-supplied idempotency key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IrJob {
    pub version: String,
    pub job_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub steps: Vec<IrStep>,
    #[serde(default)]
    pub constraints: BTreeMap<String, Value>,
}

impl IrJob {
    pub fn new(job_id: impl Into<String>, steps: Vec<IrStep>) -> Self {
        Self {
            version: IR_VERSION.to_string(),
            job_id: job_id.into(),
            name: None,
            steps,
            constraints: BTreeMap::new(),
        }
    }

    pub fn with_constraint(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.constraints.insert(key.to_string(), value.into());
        self
    }

    pub fn require_homed(&self) -> bool {
        self.constraints
            .get("require_homed")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Job-level default liquid class, if the planner set one.
    pub fn liquid_class(&self) -> Option<&str> {
        self.constraints.get("liquid_class").and_then(Value::as_str)
    }

    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}
