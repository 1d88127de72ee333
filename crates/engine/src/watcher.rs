#![forbid(unsafe_code)]

use crate::clock::Clock;
use crate::condition::{Condition, Metric};
use crate::reporter::{Breach, BreachReporter};
use educe::Educe;
use parking_lot::Mutex;
use probe::MetricReader;
use std::{collections::VecDeque, fmt, sync::Arc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherState {
    Idle,
    Running,
    Removed,
}

/// One evaluated sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    pub value: f64,
    pub breaching: bool,
}

/// Why a watcher stopped on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GoneReason {
    Exited,
    InvalidRecord,
    /// The PID now belongs to a process with a different start time.
    Reused,
}

impl fmt::Display for GoneReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            GoneReason::Exited => "process exited",
            GoneReason::InvalidRecord => "process record is malformed",
            GoneReason::Reused => "pid was reused",
        })
    }
}

/// Sent to the owner of a watcher when its process disappears.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Departure {
    pub pid: u32,
    /// Start time the watcher attached with, if it knew one.
    pub start_time_ms: Option<u64>,
    pub check: String,
    pub reason: GoneReason,
}

/// Result of feeding one sample to a watcher.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Passed,
    Breaching { streak: u32 },
    Fired(Breach),
    Gone(GoneReason),
    /// The sample failed for a reason other than the process going away.
    Skipped,
    /// The watcher was removed; the sample was dropped unseen.
    Discarded,
}

/// One running check against one process.
#[derive(Educe)]
#[educe(Debug)]
pub struct Watcher {
    pid: u32,
    condition: Condition,
    streak: u32,
    history: VecDeque<Reading>,
    identity: Option<u64>,
    state: Arc<Mutex<WatcherState>>,
    #[educe(Debug(ignore))]
    reader: Arc<MetricReader>,
    reporter: Arc<BreachReporter>,
    owner: Option<flume::Sender<Departure>>,
}

impl Watcher {
    pub fn new(
        pid: u32,
        condition: Condition,
        reader: Arc<MetricReader>,
        reporter: Arc<BreachReporter>,
    ) -> Self {
        Self {
            pid,
            condition,
            streak: 0,
            history: VecDeque::new(),
            identity: None,
            state: Arc::new(Mutex::new(WatcherState::Idle)),
            reader,
            reporter,
            owner: None,
        }
    }

    /// Report departures to `owner`.
    pub fn with_owner(mut self, owner: flume::Sender<Departure>) -> Self {
        self.owner = Some(owner);
        self
    }

    /// Start time the process had when it was attached. Without it, an
    /// identity watcher takes its first sample as the baseline.
    pub fn with_identity(mut self, start_time_ms: u64) -> Self {
        self.identity = Some(start_time_ms);
        self
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn condition(&self) -> &Condition {
        &self.condition
    }

    pub fn streak(&self) -> u32 {
        self.streak
    }

    pub fn state(&self) -> WatcherState {
        *self.state.lock()
    }

    pub fn history(&self) -> Vec<Reading> {
        self.history.iter().copied().collect()
    }

    /// Stop acting on samples. Idempotent.
    pub fn detach(&self) {
        *self.state.lock() = WatcherState::Removed;
    }

    /// Sample and evaluate once, on the calling thread.
    pub fn tick(&mut self) -> Outcome {
        let sample = read_metric(&self.reader, self.pid, self.condition.metric);
        self.observe(sample)
    }

    /// Evaluate a sample taken earlier. The state lock is held for the whole
    /// evaluation, so a concurrent detach either happens before (and the
    /// sample is discarded) or waits for any notification to go out.
    pub fn observe(&mut self, sample: Result<f64, probe::Error>) -> Outcome {
        let state = Arc::clone(&self.state);
        let mut state = state.lock();
        if *state == WatcherState::Removed {
            return Outcome::Discarded;
        }

        let value = match sample {
            Ok(value) => value,
            Err(probe::Error::NoSuchProcess(_)) => {
                return self.depart(&mut state, GoneReason::Exited);
            }
            Err(err @ probe::Error::InvalidProcessRecord(_)) => {
                warn!(pid = self.pid, check = %self.condition.name, %err, "unreadable process record");
                return self.depart(&mut state, GoneReason::InvalidRecord);
            }
            Err(err) => {
                warn!(pid = self.pid, check = %self.condition.name, %err, "sample failed");
                return Outcome::Skipped;
            }
        };

        if self.condition.metric == Metric::Identity {
            let start_time = value as u64;
            let known = self.identity;
            return match known {
                Some(known) if known != start_time => self.depart(&mut state, GoneReason::Reused),
                Some(_) => Outcome::Passed,
                None => {
                    self.identity = Some(start_time);
                    Outcome::Passed
                }
            };
        }

        let breaching = self.condition.breaches(value);
        if self.history.len() == self.condition.times as usize {
            self.history.pop_front();
        }
        self.history.push_back(Reading { value, breaching });

        if !breaching {
            self.streak = 0;
            return Outcome::Passed;
        }

        self.streak += 1;
        if self.streak < self.condition.times {
            debug!(pid = self.pid, check = %self.condition.name, streak = self.streak, "breaching");
            return Outcome::Breaching {
                streak: self.streak,
            };
        }

        self.streak = 0;
        let history: Vec<_> = self.history.iter().copied().collect();
        Outcome::Fired(self.reporter.report(self.pid, &self.condition, &history))
    }

    fn depart(&self, state: &mut WatcherState, reason: GoneReason) -> Outcome {
        *state = WatcherState::Removed;
        info!(pid = self.pid, check = %self.condition.name, %reason, "stopped watching");
        if let Some(owner) = &self.owner {
            let _ = owner.send(Departure {
                pid: self.pid,
                start_time_ms: self.identity,
                check: self.condition.name.clone(),
                reason,
            });
        }
        Outcome::Gone(reason)
    }

    /// Run the sampling loop on the runtime.
    pub fn spawn(self, clock: Arc<dyn Clock>) -> WatcherHandle {
        let cancel = CancellationToken::new();
        let name = self.condition.name.clone();
        let pid = self.pid;
        let state = Arc::clone(&self.state);
        let span = info_span!("watcher", pid, check = %name);
        let task = tokio::spawn(self.run(clock, cancel.clone()).instrument(span));
        WatcherHandle {
            name,
            pid,
            state,
            cancel,
            task: Some(task),
        }
    }

    async fn run(mut self, clock: Arc<dyn Clock>, cancel: CancellationToken) {
        {
            let mut state = self.state.lock();
            if *state == WatcherState::Removed {
                return;
            }
            *state = WatcherState::Running;
        }

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = clock.sleep(self.condition.every) => {}
            }

            let reader = Arc::clone(&self.reader);
            let (pid, metric) = (self.pid, self.condition.metric);
            let sample =
                match tokio::task::spawn_blocking(move || read_metric(&reader, pid, metric)).await
                {
                    Ok(sample) => sample,
                    Err(err) => {
                        warn!(%err, "probe task failed");
                        continue;
                    }
                };

            match self.observe(sample) {
                Outcome::Gone(_) | Outcome::Discarded => break,
                _ => {}
            }
        }
        debug!("watcher stopped");
    }
}

/// Read the value a metric is judged by. CPU is reported in percent of one
/// core; identity as the start time in milliseconds.
pub fn read_metric(reader: &MetricReader, pid: u32, metric: Metric) -> Result<f64, probe::Error> {
    match metric {
        Metric::Memory => reader.memory(pid).map(|bytes| bytes as f64),
        Metric::Cpu => reader.cpu(pid).map(|sample| sample.percent * 100.0),
        Metric::Alive => {
            if reader.is_alive(pid) {
                Ok(1.0)
            } else {
                Err(probe::Error::NoSuchProcess(pid))
            }
        }
        Metric::Identity => reader.start_time(pid).map(|ms| ms as f64),
    }
}

/// Owner's side of a spawned watcher. Dropping it detaches the watcher.
#[derive(Debug)]
pub struct WatcherHandle {
    name: String,
    pid: u32,
    state: Arc<Mutex<WatcherState>>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl WatcherHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn state(&self) -> WatcherState {
        *self.state.lock()
    }

    /// Mark the watcher removed and stop its loop. A sample in flight still
    /// completes, but its result is dropped. Idempotent.
    pub fn detach(&self) {
        *self.state.lock() = WatcherState::Removed;
        self.cancel.cancel();
    }

    /// Detach and wait for the loop to exit.
    pub async fn stop(mut self) {
        self.detach();
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                warn!(pid = self.pid, check = %self.name, %err, "watcher task failed");
            }
        }
    }
}

impl Drop for WatcherHandle {
    fn drop(&mut self) {
        self.detach();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reporter::{ChannelSink, EngineEvent};
    use config::{CheckConfig, Level};
    use pretty_assertions::assert_eq;
    use probe::testing::{FakeProcRoot, FakeProcess};

    const MB: f64 = 1024.0 * 1024.0;

    struct Fixture {
        root: FakeProcRoot,
        reader: Arc<MetricReader>,
        reporter: Arc<BreachReporter>,
        events: flume::Receiver<EngineEvent>,
    }

    fn fixture() -> Fixture {
        let root = FakeProcRoot::new().unwrap();
        let reader = Arc::new(root.reader().unwrap());
        let (sink, events) = ChannelSink::unbounded();
        let sink = Arc::new(sink);
        let contacts = [("ops".to_owned(), Level::Warn)].into_iter().collect();
        let reporter = Arc::new(BreachReporter::new(contacts, sink.clone(), sink));
        Fixture {
            root,
            reader,
            reporter,
            events,
        }
    }

    fn memory_below_50mb(times: u32) -> Condition {
        Condition::from_config(
            "memory",
            &CheckConfig {
                below: Some(50.0 * MB),
                times: Some(times),
                ..Default::default()
            },
        )
        .unwrap()
    }

    impl Fixture {
        fn watcher(&self, pid: u32, condition: Condition) -> Watcher {
            Watcher::new(
                pid,
                condition,
                Arc::clone(&self.reader),
                Arc::clone(&self.reporter),
            )
        }
    }

    #[test]
    fn fires_after_consecutive_breaches_only() {
        let fx = fixture();
        let mut watcher = fx.watcher(42, memory_below_50mb(2));

        assert_eq!(watcher.observe(Ok(55.0 * MB)), Outcome::Breaching { streak: 1 });
        assert_eq!(watcher.observe(Ok(40.0 * MB)), Outcome::Passed);
        assert_eq!(watcher.streak(), 0);
        assert_eq!(watcher.observe(Ok(55.0 * MB)), Outcome::Breaching { streak: 1 });
        assert!(fx.events.is_empty());

        let Outcome::Fired(breach) = watcher.observe(Ok(55.0 * MB)) else {
            panic!("expected the watcher to fire");
        };
        assert_eq!(
            breach.message,
            "Bounded memory(<50Mb): [*55Mb, *55Mb] send to [restart]"
        );
        assert_eq!(watcher.streak(), 0);
        assert_eq!(fx.events.len(), 2);
    }

    #[test]
    fn sustained_breach_refires_every_times_samples() {
        let fx = fixture();
        let mut watcher = fx.watcher(42, memory_below_50mb(2));
        let fired = (0..6)
            .map(|_| watcher.observe(Ok(60.0 * MB)))
            .filter(|outcome| matches!(outcome, Outcome::Fired(_)))
            .count();
        assert_eq!(fired, 3);
    }

    #[test]
    fn history_is_bounded_by_times() {
        let fx = fixture();
        let mut watcher = fx.watcher(42, memory_below_50mb(3));
        for mb in [10.0, 20.0, 30.0, 40.0] {
            watcher.observe(Ok(mb * MB));
        }
        let values: Vec<_> = watcher.history().iter().map(|r| r.value / MB).collect();
        assert_eq!(values, [20.0, 30.0, 40.0]);
    }

    #[test]
    fn huge_times_does_not_preallocate() {
        let fx = fixture();
        let mut watcher = fx.watcher(42, memory_below_50mb(u32::MAX));
        assert_eq!(watcher.observe(Ok(55.0 * MB)), Outcome::Breaching { streak: 1 });
        assert_eq!(watcher.history().len(), 1);
        assert!(fx.events.is_empty());
    }

    #[test]
    fn departure_carries_the_attached_start_time() {
        let fx = fixture();
        let (tx, rx) = flume::unbounded();
        let mut watcher = fx
            .watcher(42, memory_below_50mb(1))
            .with_owner(tx)
            .with_identity(123_000);

        assert_eq!(watcher.tick(), Outcome::Gone(GoneReason::Exited));
        assert_eq!(rx.try_recv().unwrap().start_time_ms, Some(123_000));
    }

    #[test]
    fn missing_process_removes_and_signals_owner() {
        let fx = fixture();
        let (tx, rx) = flume::unbounded();
        let mut watcher = fx.watcher(42, memory_below_50mb(1)).with_owner(tx);

        assert_eq!(watcher.tick(), Outcome::Gone(GoneReason::Exited));
        assert_eq!(watcher.state(), WatcherState::Removed);
        assert_eq!(
            rx.try_recv().unwrap(),
            Departure {
                pid: 42,
                start_time_ms: None,
                check: "memory".into(),
                reason: GoneReason::Exited,
            }
        );
        assert!(fx.events.is_empty());
    }

    #[test]
    fn malformed_record_counts_as_gone() {
        let fx = fixture();
        fx.root.write_raw(42, "stat", "42 no closing paren S 1").unwrap();
        let mut watcher = fx.watcher(42, Condition::builtin(Metric::Identity));
        assert_eq!(watcher.tick(), Outcome::Gone(GoneReason::InvalidRecord));
    }

    #[test]
    fn removed_watcher_discards_late_samples() {
        let fx = fixture();
        let mut watcher = fx.watcher(42, memory_below_50mb(1));
        watcher.detach();
        watcher.detach();
        assert_eq!(watcher.observe(Ok(99.0 * MB)), Outcome::Discarded);
        assert!(fx.events.is_empty());
    }

    #[test]
    fn identity_detects_reuse() {
        let fx = fixture();
        fx.root.spawn(42, &FakeProcess::default()).unwrap();
        let start = fx.reader.start_time(42).unwrap();
        let mut watcher = fx
            .watcher(42, Condition::builtin(Metric::Identity))
            .with_identity(start);

        assert_eq!(watcher.tick(), Outcome::Passed);

        fx.root
            .spawn(42, &FakeProcess::default().with_starttime(200_000))
            .unwrap();
        assert_eq!(watcher.tick(), Outcome::Gone(GoneReason::Reused));
    }

    #[test]
    fn alive_passes_while_running() {
        let fx = fixture();
        fx.root.spawn(42, &FakeProcess::default()).unwrap();
        let mut watcher = fx.watcher(42, Condition::builtin(Metric::Alive));
        assert_eq!(watcher.tick(), Outcome::Passed);
        fx.root.kill(42).unwrap();
        assert_eq!(watcher.tick(), Outcome::Gone(GoneReason::Exited));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn spawned_watcher_fires_then_detaches() {
        let fx = fixture();
        fx.root
            .spawn(42, &FakeProcess::default().with_resident_bytes(55 * 1024 * 1024))
            .unwrap();
        let condition = Condition {
            every: std::time::Duration::from_millis(10),
            ..memory_below_50mb(2)
        };
        let handle = fx
            .watcher(42, condition)
            .spawn(Arc::new(crate::clock::SystemClock));

        let first = fx.events.recv_async().await.unwrap();
        assert!(matches!(first, EngineEvent::Notify(_)));
        assert_eq!(handle.state(), WatcherState::Running);

        handle.detach();
        assert_eq!(handle.state(), WatcherState::Removed);
        handle.stop().await;
    }

    #[tokio::test]
    async fn detached_before_start_never_runs() {
        let fx = fixture();
        let watcher = fx.watcher(42, memory_below_50mb(1));
        watcher.detach();
        let handle = watcher.spawn(Arc::new(crate::clock::SystemClock));
        handle.stop().await;
        assert!(fx.events.is_empty());
    }
}
