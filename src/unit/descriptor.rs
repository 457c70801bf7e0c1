//! Declarative description of a unit: its name, properties and, for a
//! composite, its member descriptors.

use crate::constants;
use crate::error::{BootstrapError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// String-keyed unit configuration passed through to collaborators.
pub type Properties = BTreeMap<String, String>;

/// Merge `overrides` on top of `base`, returning a new map.
pub fn merge_properties(base: &Properties, overrides: &Properties) -> Properties {
    let mut merged = base.clone();
    merged.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitDescriptor {
    pub name: String,
    #[serde(default)]
    pub properties: Properties,
    /// Declared members; non-empty makes this unit a composite.
    #[serde(default)]
    pub members: Vec<UnitDescriptor>,
    /// Per-member overrides keyed by member name, resolved by the member's
    /// first barrier stage.
    #[serde(default)]
    pub member_overrides: BTreeMap<String, Properties>,
    /// The unit is only valid as a member of a composite.
    #[serde(default)]
    pub member_only: bool,
}

impl UnitDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_properties(mut self, properties: Properties) -> Self {
        self.properties.extend(properties);
        self
    }

    #[must_use]
    pub fn with_member(mut self, member: UnitDescriptor) -> Self {
        self.members.push(member);
        self
    }

    #[must_use]
    pub fn with_member_override(
        mut self,
        member: impl Into<String>,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.member_overrides
            .entry(member.into())
            .or_default()
            .insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn member_only(mut self) -> Self {
        self.member_only = true;
        self
    }

    pub fn is_composite(&self) -> bool {
        !self.members.is_empty()
    }
}

/// Whether, and how, the unit's transformer is handed to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeavingMode {
    /// Transformer built and returned from the first successful prepare.
    Dynamic,
    /// Classes are woven ahead of time; the transformer is built but not returned.
    Static,
    Disabled,
}

impl WeavingMode {
    pub fn from_properties(unit: &str, properties: &Properties) -> Result<Self> {
        match properties.get(constants::WEAVING).map(|v| v.trim().to_ascii_lowercase()) {
            None => Ok(Self::Dynamic),
            Some(value) => match value.as_str() {
                "true" => Ok(Self::Dynamic),
                "false" => Ok(Self::Disabled),
                "static" => Ok(Self::Static),
                other => Err(BootstrapError::configuration(
                    unit,
                    format!("invalid {} value '{other}'", constants::WEAVING),
                )),
            },
        }
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self, Self::Disabled)
    }
}
