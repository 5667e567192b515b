//! Risk classification and role-based authorization for IR steps.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ir::{IrStep, Operation};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Allow,
    Confirm,
    Block,
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskLevel::Allow => write!(f, "allow"),
            RiskLevel::Confirm => write!(f, "confirm"),
            RiskLevel::Block => write!(f, "block"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    Operator,
    Supervisor,
    Admin,
}

impl UserRole {
    /// Whether this role may run steps classified as `level`.
    pub fn permits(self, level: RiskLevel) -> bool {
        match level {
            RiskLevel::Allow => true,
            RiskLevel::Confirm => matches!(self, UserRole::Supervisor | UserRole::Admin),
            RiskLevel::Block => false,
        }
    }
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserRole::Operator => write!(f, "operator"),
            UserRole::Supervisor => write!(f, "supervisor"),
            UserRole::Admin => write!(f, "admin"),
        }
    }
}

/// Static op-name → risk mapping. Anything unmapped is blocked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskPolicy {
    levels: BTreeMap<String, RiskLevel>,
    /// Transfers above this volume are escalated from `allow` to `confirm`.
    #[serde(default, rename = "confirm_above_uL", skip_serializing_if = "Option::is_none")]
    confirm_above_ul: Option<f64>,
}

impl Default for RiskPolicy {
    fn default() -> Self {
        let levels = [
            ("transfer", RiskLevel::Allow),
            ("wash", RiskLevel::Allow),
            ("decontaminate", RiskLevel::Confirm),
        ]
        .into_iter()
        .map(|(op, level)| (op.to_string(), level))
        .collect();
        Self {
            levels,
            confirm_above_ul: None,
        }
    }
}

impl RiskPolicy {
    /// Apply per-op overrides on top of the default mapping.
    pub fn with_overrides(mut self, overrides: &BTreeMap<String, RiskLevel>) -> Self {
        self.levels
            .extend(overrides.iter().map(|(op, level)| (op.clone(), *level)));
        self
    }

    pub fn with_confirm_threshold(mut self, threshold_ul: Option<f64>) -> Self {
        self.confirm_above_ul = threshold_ul;
        self
    }

    pub fn classify(&self, step: &IrStep) -> RiskLevel {
        let level = self
            .levels
            .get(step.op())
            .copied()
            .unwrap_or(RiskLevel::Block);

        match (&step.operation, self.confirm_above_ul) {
            (Operation::Transfer(args), Some(threshold))
                if level == RiskLevel::Allow && args.volume_ul > threshold =>
            {
                RiskLevel::Confirm
            }
            _ => level,
        }
    }

    pub fn authorize(&self, step: &IrStep, role: UserRole) -> bool {
        role.permits(self.classify(step))
    }

    /// Highest risk level over all steps, `Allow` for an empty job.
    pub fn job_level<'a>(&self, steps: impl IntoIterator<Item = &'a IrStep>) -> RiskLevel {
        steps
            .into_iter()
            .map(|s| self.classify(s))
            .max()
            .unwrap_or(RiskLevel::Allow)
    }
}
