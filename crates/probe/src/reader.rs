use crate::Error;
use crate::cpu::CpuAccountant;
use crate::query::ProcessQuery;
use crate::sample::{CpuSample, ProcessSample};
use crate::source::{ProcRoot, ProcessSource, ProcessTable, Source};
use config::ProbeKind;
use std::{path::PathBuf, time::Instant};
use tracing::{debug, info};

/// Scheduler ticks per second when the system cannot tell us.
pub const DEFAULT_TICKS_PER_SECOND: u64 = 100;
/// Page size when the system cannot tell us.
pub const DEFAULT_PAGE_SIZE: u64 = 4096;

/// Reads memory, CPU, arguments and children of processes.
///
/// Safe to share between any number of watchers. The only mutable state is
/// the CPU accountant, which locks per PID.
#[derive(Debug)]
pub struct MetricReader {
    source: Source,
    cpu: CpuAccountant,
    origin: Instant,
}

impl MetricReader {
    /// Pick a source according to the engine settings.
    ///
    /// Failing here is fatal for the caller: nothing can be observed without
    /// a source.
    pub fn new(settings: &config::Engine) -> Result<Self, Error> {
        let ticks = settings.ticks_per_second.unwrap_or_else(system_ticks_per_second);
        let page_size = settings.page_size.unwrap_or_else(system_page_size);
        let root = settings.proc_root.clone();

        let source = match settings.probe {
            ProbeKind::Procfs => Source::ProcRoot(ProcRoot::open(root, ticks, page_size)?),
            ProbeKind::Sysinfo => Source::ProcessTable(process_table(root)?),
            ProbeKind::Auto => match ProcRoot::open(root.clone(), ticks, page_size) {
                Ok(proc_root) => Source::ProcRoot(proc_root),
                Err(err) => {
                    debug!(%err, "proc root unusable, falling back to process table");
                    Source::ProcessTable(process_table(root)?)
                }
            },
        };
        info!(%source, "process probe ready");

        Ok(Self::from_source(source))
    }

    /// Reader over a procfs-style tree at `root`.
    pub fn with_proc_root(
        root: impl Into<PathBuf>,
        ticks_per_second: u64,
        page_size: u64,
    ) -> Result<Self, Error> {
        Ok(Self::from_source(Source::ProcRoot(ProcRoot::open(
            root,
            ticks_per_second,
            page_size,
        )?)))
    }

    pub fn with_process_table() -> Self {
        Self::from_source(Source::ProcessTable(ProcessTable::new()))
    }

    fn from_source(source: Source) -> Self {
        Self {
            source,
            cpu: CpuAccountant::new(),
            origin: Instant::now(),
        }
    }

    /// Human readable name of the source in use.
    pub fn source_name(&self) -> String {
        self.source.to_string()
    }

    /// Resident memory in bytes.
    pub fn memory(&self, pid: u32) -> Result<u64, Error> {
        self.source.resident_bytes(pid)
    }

    /// CPU accounting, including the usage since the previous call for `pid`.
    pub fn cpu(&self, pid: u32) -> Result<CpuSample, Error> {
        let times = self.source.cpu_times(pid)?;
        let total_ms = times.total_ms();
        let percent = self.cpu.update(pid, total_ms, self.now_ms());
        Ok(CpuSample {
            percent,
            start_time_ms: times.start_time_ms,
            total_ms,
            user_ms: times.user_ms,
            sys_ms: times.sys_ms,
        })
    }

    /// Process start time in milliseconds since the epoch. Does not touch the
    /// CPU accountant.
    pub fn start_time(&self, pid: u32) -> Result<u64, Error> {
        Ok(self.source.cpu_times(pid)?.start_time_ms)
    }

    /// Argument vector; `[""]` when the process has none.
    pub fn args(&self, pid: u32) -> Result<Vec<String>, Error> {
        self.source.args(pid)
    }

    /// Immediate children of `ppid`. Empty when there are none.
    pub fn children(&self, ppid: u32) -> Vec<u32> {
        self.source.children(ppid)
    }

    /// Run a listing query. A malformed query matches nothing.
    pub fn list(&self, query: &str) -> Vec<u32> {
        match query.parse::<ProcessQuery>() {
            Ok(ProcessQuery::ParentPid(ppid)) => self.children(ppid),
            Err(err) => {
                debug!(%err, "ignoring process query");
                Vec::new()
            }
        }
    }

    pub fn is_alive(&self, pid: u32) -> bool {
        self.source.is_alive(pid)
    }

    /// Everything at once.
    pub fn sample(&self, pid: u32) -> Result<ProcessSample, Error> {
        let resident = self.memory(pid)?;
        let cpu = self.cpu(pid)?;
        let args = self.args(pid)?;
        Ok(ProcessSample::new(pid, resident, cpu, args))
    }

    /// Drop cached CPU state for a PID that is no longer watched.
    pub fn forget(&self, pid: u32) {
        self.cpu.evict(pid);
    }

    pub fn cpu_accountant(&self) -> &CpuAccountant {
        &self.cpu
    }

    fn now_ms(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

fn process_table(tried: PathBuf) -> Result<ProcessTable, Error> {
    if ProcessTable::is_supported() {
        Ok(ProcessTable::new())
    } else {
        Err(Error::NoProcessSource(tried))
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn system_ticks_per_second() -> u64 {
    procfs::ticks_per_second()
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn system_ticks_per_second() -> u64 {
    DEFAULT_TICKS_PER_SECOND
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn system_page_size() -> u64 {
    procfs::page_size()
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn system_page_size() -> u64 {
    DEFAULT_PAGE_SIZE
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{BOOT_TIME_SECS, FakeProcRoot, FakeProcess};
    use pretty_assertions::assert_eq;
    use std::{thread, time::Duration};

    fn fake() -> FakeProcRoot {
        FakeProcRoot::new().unwrap()
    }

    #[test]
    fn memory_is_resident_pages_times_page_size() {
        let root = fake();
        root.spawn(
            42,
            &FakeProcess {
                resident_pages: 12_345,
                ..Default::default()
            },
        )
        .unwrap();
        let reader = root.reader().unwrap();

        assert_eq!(reader.memory(42).unwrap(), 12_345 * 4096);
    }

    #[test]
    fn missing_process_is_no_such_process() {
        let reader = fake().reader().unwrap();

        assert!(matches!(reader.memory(99_999), Err(Error::NoSuchProcess(99_999))));
        assert!(matches!(reader.cpu(99_999), Err(Error::NoSuchProcess(99_999))));
        assert!(matches!(reader.args(99_999), Err(Error::NoSuchProcess(99_999))));
        assert!(!reader.is_alive(99_999));
    }

    #[test]
    fn cpu_converts_ticks_to_milliseconds() {
        let root = fake();
        root.spawn(42, &FakeProcess::default()).unwrap();
        let reader = root.reader().unwrap();

        let cpu = reader.cpu(42).unwrap();
        assert_eq!(cpu.percent, 0.0);
        assert_eq!(cpu.total_ms, 7000);
        assert_eq!(cpu.user_ms, 5000);
        assert_eq!(cpu.sys_ms, 2000);
        assert_eq!(cpu.start_time_ms, BOOT_TIME_SECS * 1000 + 100_000 * 1000 / 100);
        assert_eq!(reader.start_time(42).unwrap(), cpu.start_time_ms);
    }

    #[test]
    fn cpu_percent_follows_usage() {
        let root = fake();
        root.spawn(42, &FakeProcess::default()).unwrap();
        let reader = root.reader().unwrap();

        reader.cpu(42).unwrap();
        thread::sleep(Duration::from_millis(50));
        root.spawn(
            42,
            &FakeProcess {
                utime: 600,
                stime: 250,
                ..Default::default()
            },
        )
        .unwrap();

        assert!(reader.cpu(42).unwrap().percent > 0.0);
    }

    #[test]
    fn cpu_resets_on_pid_reuse() {
        let root = fake();
        root.spawn(42, &FakeProcess::default()).unwrap();
        let reader = root.reader().unwrap();

        reader.cpu(42).unwrap();
        thread::sleep(Duration::from_millis(10));
        root.spawn(
            42,
            &FakeProcess {
                utime: 10,
                stime: 5,
                ..Default::default()
            },
        )
        .unwrap();

        assert_eq!(reader.cpu(42).unwrap().percent, 0.0);
        assert_eq!(reader.cpu_accountant().get(42).unwrap().last_total_ms, 150);
    }

    #[test]
    fn forget_evicts_cpu_state() {
        let root = fake();
        root.spawn(42, &FakeProcess::default()).unwrap();
        let reader = root.reader().unwrap();

        reader.cpu(42).unwrap();
        reader.forget(42);
        assert!(reader.cpu_accountant().is_empty());
    }

    #[test]
    fn args_split_on_nul() {
        let root = fake();
        root.spawn(42, &FakeProcess::default()).unwrap();
        root.write_raw(43, "cmdline", "sleep\0").unwrap();
        root.write_raw(44, "cmdline", "").unwrap();
        let reader = root.reader().unwrap();

        assert_eq!(reader.args(42).unwrap(), ["ruby", "script.rb", "--verbose"]);
        assert_eq!(reader.args(43).unwrap(), ["sleep"]);
        assert_eq!(reader.args(44).unwrap(), [""]);
    }

    #[test]
    fn children_by_parent_pid() {
        let root = fake();
        root.spawn(100, &FakeProcess::child_of(1)).unwrap();
        root.spawn(200, &FakeProcess::child_of(42)).unwrap();
        root.spawn(300, &FakeProcess::child_of(42)).unwrap();
        root.spawn(400, &FakeProcess::child_of(99)).unwrap();
        let reader = root.reader().unwrap();

        assert_eq!(reader.children(42), [200, 300]);
        assert_eq!(reader.list("State.Ppid.eq=42"), [200, 300]);
        assert!(reader.children(99_999).is_empty());
        assert!(reader.list("").is_empty());
        assert!(reader.list("State.Name.eq=ruby").is_empty());
    }

    #[test]
    fn malformed_stat_is_skipped_by_listing_and_reported_by_cpu() {
        let root = fake();
        root.spawn(200, &FakeProcess::child_of(42)).unwrap();
        root.write_raw(300, "stat", "300 broken S 42").unwrap();
        let reader = root.reader().unwrap();

        assert_eq!(reader.children(42), [200]);
        assert!(matches!(reader.cpu(300), Err(Error::InvalidProcessRecord(_))));
    }

    #[test]
    fn odd_command_names_parse() {
        let root = fake();
        for (pid, comm) in [(42, "Web Content"), (43, "(sd-pam)"), (44, "kworker/0:1-events")] {
            root.spawn(
                pid,
                &FakeProcess {
                    comm: comm.into(),
                    ..Default::default()
                },
            )
            .unwrap();
        }
        let reader = root.reader().unwrap();

        for pid in [42, 43, 44] {
            assert_eq!(reader.cpu(pid).unwrap().total_ms, 7000);
        }
    }

    #[test]
    fn sample_gathers_everything() {
        let root = fake();
        root.spawn(42, &FakeProcess::default().with_resident_bytes(55 * 1024 * 1024))
            .unwrap();
        let reader = root.reader().unwrap();

        let sample = reader.sample(42).unwrap();
        assert_eq!(sample.pid, 42);
        assert_eq!(sample.resident_bytes, 55 * 1024 * 1024);
        assert_eq!(sample.cpu_total_ms, 7000);
        assert_eq!(sample.cpu_percent, 0.0);
        assert_eq!(sample.args[0], "ruby");
    }

    #[test]
    fn concurrent_cpu_reads() {
        let root = fake();
        root.spawn(42, &FakeProcess::default()).unwrap();
        let reader = root.reader().unwrap();

        thread::scope(|scope| {
            let handles: Vec<_> = (0..4).map(|_| scope.spawn(|| reader.cpu(42))).collect();
            for handle in handles {
                assert_eq!(handle.join().unwrap().unwrap().total_ms, 7000);
            }
        });
    }

    #[test]
    fn missing_root_is_not_a_source() {
        let err = MetricReader::with_proc_root("/definitely/not/proc", 100, 4096).unwrap_err();
        assert!(matches!(err, Error::NoProcessSource(_)));
    }

    #[test]
    fn procfs_probe_kind_requires_a_root() {
        let settings = config::Engine {
            probe: ProbeKind::Procfs,
            proc_root: "/definitely/not/proc".into(),
            ..Default::default()
        };
        assert!(matches!(
            MetricReader::new(&settings),
            Err(Error::NoProcessSource(_))
        ));
    }

    #[test]
    fn configured_root_is_used() {
        let root = fake();
        root.spawn(42, &FakeProcess::default()).unwrap();
        let settings = config::Engine {
            probe: ProbeKind::Auto,
            proc_root: root.path().to_owned(),
            ticks_per_second: Some(100),
            page_size: Some(4096),
            ..Default::default()
        };
        let reader = MetricReader::new(&settings).unwrap();
        assert!(reader.source_name().starts_with("procfs"));
        assert!(reader.is_alive(42));
    }
}
