#![forbid(unsafe_code)]

use crate::check::{Checks, MonitorChildren};
use crate::level::NotifyMap;
use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use std::{collections::BTreeMap, path::PathBuf, time::Duration};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProbeKind {
    /// Use the process filesystem when present, otherwise the process table.
    #[default]
    Auto,
    Procfs,
    Sysinfo,
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Engine {
    pub probe: ProbeKind,

    /// Root of the process-information filesystem.
    pub proc_root: PathBuf,

    /// Default child re-scan period, in seconds. Keep it above any probe-side
    /// caching interval or reconciliation may see stale child lists.
    #[serde_as(as = "serde_with::DurationSeconds")]
    pub children_update_period: Duration,

    /// Scheduler ticks per second. Detected from the system when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ticks_per_second: Option<u64>,

    /// Memory page size in bytes. Detected from the system when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_size: Option<u64>,
}

impl Default for Engine {
    fn default() -> Self {
        Self {
            probe: ProbeKind::Auto,
            proc_root: PathBuf::from("/proc"),
            children_update_period: Duration::from_secs(30),
            ticks_per_second: None,
            page_size: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Process {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid_file: Option<PathBuf>,

    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub notify: NotifyMap,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub nonotify: Vec<String>,

    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub checks: Checks,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub monitor_children: Option<MonitorChildren>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Group {
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub notify: NotifyMap,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub nonotify: Vec<String>,

    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub checks: Checks,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub monitor_children: Option<MonitorChildren>,

    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub processes: BTreeMap<String, Process>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Application {
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub notify: NotifyMap,

    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub checks: Checks,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub monitor_children: Option<MonitorChildren>,

    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub groups: BTreeMap<String, Group>,

    /// Processes declared directly on the application, outside any group.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub processes: BTreeMap<String, Process>,
}
