use super::ProcessSource;
use crate::Error;
use crate::sample::{CpuTimes, non_empty_args};
use crate::stat::StatLine;
use rayon::prelude::*;
use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing::{debug, warn};

/// Reads process information straight from a procfs-style directory tree.
///
/// The root is configurable so that tests can point it at a fake tree.
#[derive(Debug, Clone)]
pub struct ProcRoot {
    root: PathBuf,
    ticks_per_second: u64,
    page_size: u64,
    boot_time_ms: u64,
}

impl ProcRoot {
    /// Open `root`. Fails if it does not look like a process filesystem.
    ///
    /// Boot time is read here once; it does not change while we run.
    pub fn open(
        root: impl Into<PathBuf>,
        ticks_per_second: u64,
        page_size: u64,
    ) -> Result<Self, Error> {
        let root = root.into();
        let stat_path = root.join("stat");
        if !root.is_dir() || !stat_path.is_file() {
            return Err(Error::NoProcessSource(root));
        }

        let boot_time_ms = match read_boot_time(&stat_path)? {
            Some(secs) => secs * 1000,
            None => {
                warn!(path = ?stat_path, "no btime entry, process start times will be off");
                0
            }
        };
        debug!(?root, ticks_per_second, page_size, boot_time_ms, "opened proc root");

        Ok(Self {
            root,
            ticks_per_second: ticks_per_second.max(1),
            page_size,
            boot_time_ms,
        })
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    pub fn boot_time_ms(&self) -> u64 {
        self.boot_time_ms
    }

    pub fn ticks_to_ms(&self, ticks: u64) -> u64 {
        ticks.saturating_mul(1000) / self.ticks_per_second
    }

    fn read(&self, pid: u32, file: &str) -> Result<Vec<u8>, Error> {
        fs::read(self.root.join(pid.to_string()).join(file)).map_err(|err| Error::from_io(pid, err))
    }

    fn read_to_string(&self, pid: u32, file: &str) -> Result<String, Error> {
        fs::read_to_string(self.root.join(pid.to_string()).join(file))
            .map_err(|err| Error::from_io(pid, err))
    }

    pub fn stat(&self, pid: u32) -> Result<StatLine, Error> {
        self.read_to_string(pid, "stat")?.parse()
    }

    fn pids(&self) -> Vec<u32> {
        let Ok(entries) = fs::read_dir(&self.root) else {
            warn!(root = ?self.root, "cannot list proc root");
            return Vec::new();
        };
        entries
            .filter_map(Result::ok)
            .filter_map(|entry| entry.file_name().to_str()?.parse().ok())
            .collect()
    }
}

impl ProcessSource for ProcRoot {
    fn resident_bytes(&self, pid: u32) -> Result<u64, Error> {
        let statm = self.read_to_string(pid, "statm")?;
        let resident_pages: u64 = statm
            .split_whitespace()
            .nth(1)
            .and_then(|field| field.parse().ok())
            .ok_or_else(|| {
                Error::InvalidProcessRecord(format!("bad statm for pid {pid}: {statm:?}"))
            })?;
        Ok(resident_pages * self.page_size)
    }

    fn cpu_times(&self, pid: u32) -> Result<CpuTimes, Error> {
        let stat = self.stat(pid)?;
        Ok(CpuTimes {
            user_ms: self.ticks_to_ms(stat.utime),
            sys_ms: self.ticks_to_ms(stat.stime),
            start_time_ms: self.boot_time_ms + self.ticks_to_ms(stat.starttime),
        })
    }

    fn args(&self, pid: u32) -> Result<Vec<String>, Error> {
        let raw = self.read(pid, "cmdline")?;
        let cmdline = String::from_utf8_lossy(&raw);
        let cmdline = cmdline.trim_end_matches('\0');
        if cmdline.is_empty() {
            return Ok(non_empty_args(Vec::new()));
        }
        Ok(cmdline.split('\0').map(str::to_string).collect())
    }

    fn children(&self, ppid: u32) -> Vec<u32> {
        let mut children: Vec<u32> = self
            .pids()
            .into_par_iter()
            .filter(|&pid| pid != ppid)
            // A process may exit while we scan; it is simply not a child then.
            .filter_map(|pid| self.stat(pid).ok())
            .filter(|stat| stat.ppid == ppid)
            .map(|stat| stat.pid)
            .collect();
        children.sort_unstable();
        children
    }

    fn is_alive(&self, pid: u32) -> bool {
        self.stat(pid).is_ok_and(|stat| stat.is_running())
    }
}

fn read_boot_time(stat_path: &Path) -> Result<Option<u64>, Error> {
    let content = fs::read_to_string(stat_path)?;
    Ok(content
        .lines()
        .find_map(|line| line.strip_prefix("btime "))
        .and_then(|secs| secs.trim().parse().ok()))
}
