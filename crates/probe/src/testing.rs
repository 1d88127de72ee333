//! A fake process filesystem, laid out like the real one.

use crate::{DEFAULT_PAGE_SIZE, DEFAULT_TICKS_PER_SECOND, Error, MetricReader};
use std::{fs, io, path::Path};
use tempfile::TempDir;

pub const BOOT_TIME_SECS: u64 = 1_700_000_000;

/// Per-process values written into the fake tree.
#[derive(Debug, Clone)]
pub struct FakeProcess {
    pub comm: String,
    pub ppid: u32,
    pub utime: u64,
    pub stime: u64,
    pub starttime: u64,
    pub resident_pages: u64,
    pub cmdline: Vec<u8>,
}

impl Default for FakeProcess {
    fn default() -> Self {
        Self {
            comm: "ruby".into(),
            ppid: 1,
            utime: 500,
            stime: 200,
            starttime: 100_000,
            resident_pages: 10_000,
            cmdline: b"ruby\0script.rb\0--verbose".to_vec(),
        }
    }
}

impl FakeProcess {
    pub fn child_of(ppid: u32) -> Self {
        Self {
            ppid,
            ..Default::default()
        }
    }

    pub fn with_resident_bytes(mut self, bytes: u64) -> Self {
        self.resident_pages = bytes / DEFAULT_PAGE_SIZE;
        self
    }

    pub fn with_starttime(mut self, starttime: u64) -> Self {
        self.starttime = starttime;
        self
    }
}

pub struct FakeProcRoot {
    dir: TempDir,
}

impl FakeProcRoot {
    pub fn new() -> io::Result<Self> {
        let dir = tempfile::tempdir()?;
        fs::write(
            dir.path().join("stat"),
            format!("cpu  123 456 789\nbtime {BOOT_TIME_SECS}\n"),
        )?;
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Reader over this tree with the default tick rate and page size.
    pub fn reader(&self) -> Result<MetricReader, Error> {
        MetricReader::with_proc_root(self.path(), DEFAULT_TICKS_PER_SECOND, DEFAULT_PAGE_SIZE)
    }

    /// Create or overwrite the records of `pid`.
    pub fn spawn(&self, pid: u32, process: &FakeProcess) -> io::Result<()> {
        let dir = self.dir.path().join(pid.to_string());
        fs::create_dir_all(&dir)?;
        fs::write(dir.join("stat"), stat_line(pid, process))?;
        fs::write(
            dir.join("statm"),
            format!("50000 {} 5000 1000 0 8000 0", process.resident_pages),
        )?;
        fs::write(dir.join("cmdline"), &process.cmdline)?;
        Ok(())
    }

    pub fn set_resident_bytes(&self, pid: u32, bytes: u64) -> io::Result<()> {
        fs::write(
            self.dir.path().join(pid.to_string()).join("statm"),
            format!("50000 {} 5000 1000 0 8000 0", bytes / DEFAULT_PAGE_SIZE),
        )
    }

    pub fn write_raw(&self, pid: u32, file: &str, content: impl AsRef<[u8]>) -> io::Result<()> {
        let dir = self.dir.path().join(pid.to_string());
        fs::create_dir_all(&dir)?;
        fs::write(dir.join(file), content)
    }

    pub fn kill(&self, pid: u32) -> io::Result<()> {
        fs::remove_dir_all(self.dir.path().join(pid.to_string()))
    }
}

fn stat_line(pid: u32, p: &FakeProcess) -> String {
    format!(
        "{pid} ({}) S {} {pid} {pid} 0 -1 0 0 0 0 0 {} {} 0 0 20 0 1 0 {} \
         0 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0",
        p.comm, p.ppid, p.utime, p.stime, p.starttime
    )
}
