use super::ProcessSource;
use crate::Error;
use crate::sample::{CpuTimes, non_empty_args};
use sysinfo::{Pid, ProcessRefreshKind, ProcessStatus, ProcessesToUpdate, System, UpdateKind};

/// Portable source built on the platform process table.
///
/// Used where no process filesystem exists. Every call takes a fresh,
/// narrowly scoped snapshot, so nothing is shared between callers. The table
/// only reports a combined CPU time: it is exposed as user time, with system
/// time left at zero.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessTable;

impl ProcessTable {
    pub fn new() -> Self {
        Self
    }

    pub fn is_supported() -> bool {
        sysinfo::IS_SUPPORTED_SYSTEM
    }

    fn with_process<T>(
        &self,
        pid: u32,
        refresh_kind: ProcessRefreshKind,
        f: impl FnOnce(&sysinfo::Process) -> T,
    ) -> Result<T, Error> {
        let mut system = System::new();
        let sys_pid = Pid::from_u32(pid);
        system.refresh_processes_specifics(ProcessesToUpdate::Some(&[sys_pid]), true, refresh_kind);
        system
            .process(sys_pid)
            .map(f)
            .ok_or(Error::NoSuchProcess(pid))
    }
}

impl ProcessSource for ProcessTable {
    fn resident_bytes(&self, pid: u32) -> Result<u64, Error> {
        self.with_process(pid, ProcessRefreshKind::nothing().with_memory(), |p| {
            p.memory()
        })
    }

    fn cpu_times(&self, pid: u32) -> Result<CpuTimes, Error> {
        self.with_process(pid, ProcessRefreshKind::nothing().with_cpu(), |p| CpuTimes {
            user_ms: p.accumulated_cpu_time(),
            sys_ms: 0,
            start_time_ms: p.start_time() * 1000,
        })
    }

    fn args(&self, pid: u32) -> Result<Vec<String>, Error> {
        self.with_process(
            pid,
            ProcessRefreshKind::nothing().with_cmd(UpdateKind::Always),
            |p| {
                non_empty_args(
                    p.cmd()
                        .iter()
                        .map(|arg| arg.to_string_lossy().into_owned())
                        .collect(),
                )
            },
        )
    }

    fn children(&self, ppid: u32) -> Vec<u32> {
        let mut system = System::new();
        system.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::nothing(),
        );
        let parent = Pid::from_u32(ppid);
        let mut children: Vec<u32> = system
            .processes()
            .iter()
            .filter(|(_, process)| process.parent() == Some(parent))
            .map(|(pid, _)| pid.as_u32())
            .collect();
        children.sort_unstable();
        children
    }

    fn is_alive(&self, pid: u32) -> bool {
        self.with_process(pid, ProcessRefreshKind::nothing(), |p| {
            p.status() != ProcessStatus::Zombie
        })
        .unwrap_or(false)
    }
}
