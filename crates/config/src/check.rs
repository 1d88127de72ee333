#![forbid(unsafe_code)]

use crate::level::Level;
use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use std::{collections::BTreeMap, time::Duration};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum CheckKind {
    Memory,
    Cpu,
    Alive,
    Identity,
}

/// One check as written in configuration.
///
/// Every field is optional so that a check declared at group level can be
/// refined field-by-field further down (see [`merge`](crate::merge)). Missing
/// fields are not serialized, which keeps them from shadowing inherited
/// values during a merge.
#[serde_as]
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CheckConfig {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<CheckKind>,

    /// Healthy while the sampled value stays below this bound.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub below: Option<f64>,

    /// Healthy while the sampled value stays above this bound.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub above: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub equal: Option<f64>,

    /// Consecutive breaching samples required before firing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub times: Option<u32>,

    /// Sampling period in seconds.
    #[serde_as(as = "Option<serde_with::DurationSeconds>")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub every: Option<Duration>,

    /// Action scheduled on the process lifecycle collaborator when firing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<Level>,
}

impl CheckConfig {
    /// Kind of this check. Falls back to the check's name, so that
    /// `[checks.memory]` does not need an explicit `type = "memory"`.
    pub fn kind_or_name(&self, name: &str) -> Option<CheckKind> {
        self.kind.or(match name {
            "memory" => Some(CheckKind::Memory),
            "cpu" => Some(CheckKind::Cpu),
            "alive" => Some(CheckKind::Alive),
            "identity" => Some(CheckKind::Identity),
            _ => None,
        })
    }
}

pub type Checks = BTreeMap<String, CheckConfig>;

#[serde_as]
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MonitorChildren {
    /// Checks attached to every child discovered under the parent.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub checks: Checks,

    /// How often the parent's child list is re-scanned.
    #[serde_as(as = "Option<serde_with::DurationSeconds>")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub children_update_period: Option<Duration>,
}
