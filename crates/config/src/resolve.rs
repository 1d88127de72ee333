#![forbid(unsafe_code)]

use crate::check::{Checks, MonitorChildren};
use crate::level::NotifyMap;
use crate::merge::{inherit_notify, merge, merge_opt};
use crate::model::{Application, Group, Process};
use crate::{Config, Error};
use std::{fmt, path::PathBuf, time::Duration};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PidSource {
    Pid(u32),
    PidFile(PathBuf),
}

/// A process with everything inherited from its group and application
/// already folded in.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedProcess {
    pub application: String,
    pub group: Option<String>,
    pub name: String,
    pub pid: PidSource,
    pub notify: NotifyMap,
    pub checks: Checks,
    pub monitor_children: Option<ResolvedMonitorChildren>,
}

impl ResolvedProcess {
    pub fn full_name(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ResolvedProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.group {
            Some(group) => write!(f, "{}:{}:{}", self.application, group, self.name),
            None => write!(f, "{}:{}", self.application, self.name),
        }
    }
}

/// Child monitoring settings after merging, with the refresh period filled in.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedMonitorChildren {
    pub checks: Checks,
    pub children_update_period: Duration,
}

impl Config {
    /// Flatten the application/group/process tree into one entry per process.
    pub fn resolve(&self) -> Result<Vec<ResolvedProcess>, Error> {
        let mut resolved = Vec::new();
        for (app_name, app) in &self.applications {
            let app_layer = Layer::application(app);
            for (name, process) in &app.processes {
                resolved.push(self.resolve_one(app_name, None, name, &app_layer, process)?);
            }
            for (group_name, group) in &app.groups {
                let group_layer = app_layer.descend(group)?;
                for (name, process) in &group.processes {
                    resolved.push(self.resolve_one(
                        app_name,
                        Some(group_name),
                        name,
                        &group_layer,
                        process,
                    )?);
                }
            }
        }
        Ok(resolved)
    }

    fn resolve_one(
        &self,
        application: &str,
        group: Option<&str>,
        name: &str,
        parent: &Layer,
        process: &Process,
    ) -> Result<ResolvedProcess, Error> {
        let pid = match (process.pid, &process.pid_file) {
            (Some(pid), _) => PidSource::Pid(pid),
            (None, Some(path)) => PidSource::PidFile(path.clone()),
            (None, None) => {
                return Err(Error::MissingPid {
                    process: name.to_string(),
                });
            }
        };
        let notify = inherit_notify(&parent.notify, &process.notify, &process.nonotify);
        let checks = merge(&parent.checks, &process.checks)?;
        let monitor_children = merge_opt(
            parent.monitor_children.as_ref(),
            process.monitor_children.as_ref(),
        )?
        .map(|mc| ResolvedMonitorChildren {
            checks: mc.checks,
            children_update_period: mc
                .children_update_period
                .unwrap_or(self.engine.children_update_period),
        });

        Ok(ResolvedProcess {
            application: application.to_string(),
            group: group.map(str::to_string),
            name: name.to_string(),
            pid,
            notify,
            checks,
            monitor_children,
        })
    }
}

struct Layer {
    notify: NotifyMap,
    checks: Checks,
    monitor_children: Option<MonitorChildren>,
}

impl Layer {
    fn application(app: &Application) -> Self {
        Self {
            notify: app.notify.clone(),
            checks: app.checks.clone(),
            monitor_children: app.monitor_children.clone(),
        }
    }

    fn descend(&self, group: &Group) -> Result<Self, Error> {
        Ok(Self {
            notify: inherit_notify(&self.notify, &group.notify, &group.nonotify),
            checks: merge(&self.checks, &group.checks)?,
            monitor_children: merge_opt(
                self.monitor_children.as_ref(),
                group.monitor_children.as_ref(),
            )?,
        })
    }
}
