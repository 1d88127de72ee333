/// CPU accounting for one process at one instant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CpuSample {
    /// Usage since the previous read of the same PID, as a fraction of one core.
    pub percent: f64,
    /// Process start, in milliseconds since the epoch.
    pub start_time_ms: u64,
    pub total_ms: u64,
    pub user_ms: u64,
    pub sys_ms: u64,
}

/// Result of one full probe read for one PID.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessSample {
    pub pid: u32,
    pub resident_bytes: u64,
    pub cpu_total_ms: u64,
    pub cpu_user_ms: u64,
    pub cpu_sys_ms: u64,
    pub cpu_start_time_ms: u64,
    pub cpu_percent: f64,
    /// Never empty: a process without arguments reports `[""]`.
    pub args: Vec<String>,
}

impl ProcessSample {
    pub(crate) fn new(pid: u32, resident_bytes: u64, cpu: CpuSample, args: Vec<String>) -> Self {
        Self {
            pid,
            resident_bytes,
            cpu_total_ms: cpu.total_ms,
            cpu_user_ms: cpu.user_ms,
            cpu_sys_ms: cpu.sys_ms,
            cpu_start_time_ms: cpu.start_time_ms,
            cpu_percent: cpu.percent,
            args,
        }
    }
}

/// Raw CPU times as reported by a source, before accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CpuTimes {
    pub user_ms: u64,
    pub sys_ms: u64,
    pub start_time_ms: u64,
}

impl CpuTimes {
    pub fn total_ms(&self) -> u64 {
        self.user_ms + self.sys_ms
    }
}

/// Normalize an argument vector so that it always has a first element.
pub(crate) fn non_empty_args(args: Vec<String>) -> Vec<String> {
    if args.is_empty() {
        vec![String::new()]
    } else {
        args
    }
}
