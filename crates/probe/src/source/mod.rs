mod proc_root;
mod process_table;

pub use proc_root::ProcRoot;
pub use process_table::ProcessTable;

use crate::Error;
use crate::sample::CpuTimes;
use std::fmt;

/// What a process information source has to provide.
pub(crate) trait ProcessSource {
    fn resident_bytes(&self, pid: u32) -> Result<u64, Error>;
    fn cpu_times(&self, pid: u32) -> Result<CpuTimes, Error>;
    fn args(&self, pid: u32) -> Result<Vec<String>, Error>;
    /// PIDs whose immediate parent is `ppid`, sorted.
    fn children(&self, ppid: u32) -> Vec<u32>;
    fn is_alive(&self, pid: u32) -> bool;
}

/// The source picked at construction time. Never changes afterwards.
#[derive(Debug)]
pub(crate) enum Source {
    ProcRoot(ProcRoot),
    ProcessTable(ProcessTable),
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ProcRoot(root) => write!(f, "procfs at {}", root.path().display()),
            Self::ProcessTable(_) => f.write_str("process table"),
        }
    }
}

impl ProcessSource for Source {
    fn resident_bytes(&self, pid: u32) -> Result<u64, Error> {
        match self {
            Self::ProcRoot(s) => s.resident_bytes(pid),
            Self::ProcessTable(s) => s.resident_bytes(pid),
        }
    }

    fn cpu_times(&self, pid: u32) -> Result<CpuTimes, Error> {
        match self {
            Self::ProcRoot(s) => s.cpu_times(pid),
            Self::ProcessTable(s) => s.cpu_times(pid),
        }
    }

    fn args(&self, pid: u32) -> Result<Vec<String>, Error> {
        match self {
            Self::ProcRoot(s) => s.args(pid),
            Self::ProcessTable(s) => s.args(pid),
        }
    }

    fn children(&self, ppid: u32) -> Vec<u32> {
        match self {
            Self::ProcRoot(s) => s.children(ppid),
            Self::ProcessTable(s) => s.children(ppid),
        }
    }

    fn is_alive(&self, pid: u32) -> bool {
        match self {
            Self::ProcRoot(s) => s.is_alive(pid),
            Self::ProcessTable(s) => s.is_alive(pid),
        }
    }
}
