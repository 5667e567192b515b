//! Read-only capability registry.
//!
//! Loaded once at startup and shared behind an `Arc`. A missing or broken
//! registry document degrades to an empty registry, in which every operation
//! is unknown.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::RegistryError;

const BUILTIN_REGISTRY: &str = include_str!("../capabilities.toml");

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParamRange {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

impl ParamRange {
    pub fn contains(&self, value: f64) -> bool {
        self.min.is_none_or(|min| value >= min) && self.max.is_none_or(|max| value <= max)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationSpec {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub required: Vec<String>,
    #[serde(default)]
    pub optional: Vec<String>,
    #[serde(default)]
    pub ranges: BTreeMap<String, ParamRange>,
}

impl OperationSpec {
    pub fn range(&self, param: &str) -> Option<&ParamRange> {
        self.ranges.get(param)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GlobalConstraints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<ParamRange>,
    /// Maximum volume per tip type, in uL.
    #[serde(default)]
    pub tip_capacities: BTreeMap<String, f64>,
}

impl GlobalConstraints {
    pub fn min_volume(&self) -> Option<f64> {
        self.volume.and_then(|v| v.min)
    }

    pub fn max_volume(&self) -> Option<f64> {
        self.volume.and_then(|v| v.max)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CapabilityRegistry {
    #[serde(default)]
    capabilities: BTreeMap<String, OperationSpec>,
    #[serde(default)]
    constraints: GlobalConstraints,
}

impl CapabilityRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// The registry document shipped with the crate.
    pub fn builtin() -> Self {
        Self::from_toml_str(BUILTIN_REGISTRY).unwrap_or_else(|e| {
            tracing::warn!("built-in capability registry is invalid: {e}");
            Self::empty()
        })
    }

    pub fn from_toml_str(s: &str) -> Result<Self, RegistryError> {
        Ok(toml::from_str(s)?)
    }

    pub fn from_json_str(s: &str) -> Result<Self, RegistryError> {
        Ok(serde_json::from_str(s)?)
    }

    /// Load a registry document (`.json` or TOML). Never fails: an absent or
    /// unparseable document yields an empty registry.
    pub fn load(path: &Path) -> Self {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(path = %path.display(), "capability registry unavailable: {e}");
                return Self::empty();
            }
        };
        let parsed = if path.extension().is_some_and(|ext| ext == "json") {
            Self::from_json_str(&contents)
        } else {
            Self::from_toml_str(&contents)
        };
        match parsed {
            Ok(registry) => {
                tracing::debug!(
                    path = %path.display(),
                    operations = registry.capabilities.len(),
                    "loaded capability registry"
                );
                registry
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), "capability registry unparseable: {e}");
                Self::empty()
            }
        }
    }

    pub fn lookup(&self, op: &str) -> Option<&OperationSpec> {
        self.capabilities.get(op)
    }

    pub fn global_constraints(&self) -> &GlobalConstraints {
        &self.constraints
    }

    pub fn operations(&self) -> impl Iterator<Item = &str> {
        self.capabilities.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }
}
