#![forbid(unsafe_code)]

use crate::clock::Clock;
use crate::condition::build_conditions;
use crate::reporter::BreachReporter;
use crate::watcher::{Departure, Watcher, WatcherHandle, WatcherState};
use config::{Checks, ResolvedMonitorChildren};
use educe::Educe;
use parking_lot::Mutex;
use probe::MetricReader;
use std::{
    collections::BTreeMap,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, debug_span, info, warn};

/// One discovered child and the watchers attached to it.
#[derive(Debug)]
pub struct ChildHandle {
    pid: u32,
    start_time_ms: u64,
    watchers: Vec<WatcherHandle>,
}

impl ChildHandle {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn start_time_ms(&self) -> u64 {
        self.start_time_ms
    }

    fn detach(&self) {
        for watcher in &self.watchers {
            watcher.detach();
        }
    }

    fn snapshot(&self) -> ChildSnapshot {
        ChildSnapshot {
            pid: self.pid,
            start_time_ms: self.start_time_ms,
            watchers: self
                .watchers
                .iter()
                .map(|watcher| (watcher.name().to_owned(), watcher.state()))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChildSnapshot {
    pub pid: u32,
    pub start_time_ms: u64,
    pub watchers: Vec<(String, WatcherState)>,
}

#[derive(Debug, Default)]
struct Known {
    children: BTreeMap<u32, ChildHandle>,
    last_refresh: Option<Instant>,
}

/// Keeps the watchers of a parent's children in step with the children that
/// actually exist.
///
/// Checks are taken from the configuration once, when the set is built, and
/// applied unchanged to every child attached afterwards.
#[derive(Educe)]
#[educe(Debug)]
pub struct ChildSet {
    parent_pid: u32,
    checks: Checks,
    refresh_period: Duration,
    reader: Arc<MetricReader>,
    reporter: Arc<BreachReporter>,
    #[educe(Debug(ignore))]
    clock: Arc<dyn Clock>,
    known: Mutex<Known>,
    departures: (flume::Sender<Departure>, flume::Receiver<Departure>),
    wake: Notify,
}

impl ChildSet {
    pub fn new(
        parent_pid: u32,
        settings: &ResolvedMonitorChildren,
        reader: Arc<MetricReader>,
        reporter: Arc<BreachReporter>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            parent_pid,
            checks: settings.checks.clone(),
            refresh_period: settings.children_update_period,
            reader,
            reporter,
            clock,
            known: Mutex::default(),
            departures: flume::unbounded(),
            wake: Notify::new(),
        }
    }

    pub fn parent_pid(&self) -> u32 {
        self.parent_pid
    }

    pub fn refresh_period(&self) -> Duration {
        self.refresh_period
    }

    /// Known child PIDs, ascending.
    pub fn children(&self) -> Vec<u32> {
        self.known.lock().children.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.known.lock().children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.known.lock().children.is_empty()
    }

    pub fn contains(&self, pid: u32) -> bool {
        self.known.lock().children.contains_key(&pid)
    }

    pub fn watcher_names(&self, pid: u32) -> Option<Vec<String>> {
        self.known.lock().children.get(&pid).map(|child| {
            child
                .watchers
                .iter()
                .map(|watcher| watcher.name().to_owned())
                .collect()
        })
    }

    pub fn snapshot(&self) -> Vec<ChildSnapshot> {
        self.known
            .lock()
            .children
            .values()
            .map(ChildHandle::snapshot)
            .collect()
    }

    /// Make the next `refresh` scan regardless of when the last one ran, and
    /// wake the reconciliation loop.
    pub fn force_refresh(&self) {
        self.known.lock().last_refresh = None;
        self.wake.notify_one();
    }

    /// Reconcile against the children that exist now. Inside the refresh
    /// period this returns the known set without scanning.
    pub async fn refresh(&self) -> Vec<u32> {
        let now = self.clock.now();
        {
            let mut known = self.known.lock();
            if let Some(last) = known.last_refresh {
                if now.saturating_duration_since(last) < self.refresh_period {
                    return known.children.keys().copied().collect();
                }
            }
            known.last_refresh = Some(now);
        }

        let span = debug_span!("children_refresh", ppid = self.parent_pid);
        async {
            let reader = Arc::clone(&self.reader);
            let ppid = self.parent_pid;
            match tokio::task::spawn_blocking(move || scan(&reader, ppid)).await {
                Ok(observed) => self.reconcile(observed),
                Err(err) => {
                    warn!(%err, "children scan failed");
                    self.children()
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Apply one scan result: `observed` maps each live child to its start
    /// time.
    fn reconcile(&self, observed: BTreeMap<u32, u64>) -> Vec<u32> {
        let mut known = self.known.lock();

        let stale: Vec<u32> = known
            .children
            .iter()
            .filter(|(pid, child)| observed.get(pid) != Some(&child.start_time_ms))
            .map(|(pid, _)| *pid)
            .collect();
        for pid in stale {
            if let Some(child) = known.children.remove(&pid) {
                child.detach();
                self.reader.forget(pid);
                info!(pid, "child removed");
            }
        }

        for (&pid, &start_time_ms) in &observed {
            if known.children.contains_key(&pid) {
                continue;
            }
            match self.attach(pid, start_time_ms) {
                Ok(child) => {
                    info!(pid, watchers = child.watchers.len(), "child attached");
                    known.children.insert(pid, child);
                }
                Err(err) => warn!(pid, %err, "failed to attach child"),
            }
        }

        debug!(children = known.children.len(), "children reconciled");
        known.children.keys().copied().collect()
    }

    fn attach(&self, pid: u32, start_time_ms: u64) -> Result<ChildHandle, crate::Error> {
        let watchers = build_conditions(&self.checks)?
            .into_iter()
            .map(|condition| {
                Watcher::new(
                    pid,
                    condition,
                    Arc::clone(&self.reader),
                    Arc::clone(&self.reporter),
                )
                .with_owner(self.departures.0.clone())
                .with_identity(start_time_ms)
                .spawn(Arc::clone(&self.clock))
            })
            .collect();
        Ok(ChildHandle {
            pid,
            start_time_ms,
            watchers,
        })
    }

    /// Drop a child whose watcher saw it go away. A departure from an
    /// earlier process with the same PID leaves the current child alone.
    fn retire(&self, departure: &Departure) {
        let pid = departure.pid;
        let mut known = self.known.lock();
        let Some(child) = known.children.get(&pid) else {
            return;
        };
        if departure
            .start_time_ms
            .is_some_and(|start| start != child.start_time_ms)
        {
            debug!(pid, "ignoring departure of a previous process");
            return;
        }
        if let Some(child) = known.children.remove(&pid) {
            child.detach();
            self.reader.forget(pid);
            info!(pid, reason = %departure.reason, "child removed");
        }
    }

    /// Time left until the refresh period since the last scan runs out.
    fn until_next_refresh(&self) -> Duration {
        match self.known.lock().last_refresh {
            Some(last) => last
                .checked_add(self.refresh_period)
                .map_or(self.refresh_period, |next| {
                    next.saturating_duration_since(self.clock.now())
                }),
            None => Duration::ZERO,
        }
    }

    /// Detach every child. The set can be refreshed again afterwards.
    pub fn clear(&self) {
        let mut known = self.known.lock();
        for (pid, child) in std::mem::take(&mut known.children) {
            child.detach();
            self.reader.forget(pid);
        }
        known.last_refresh = None;
    }

    /// Reconcile every refresh period until cancelled, then detach all
    /// children.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        loop {
            self.refresh().await;
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.clock.sleep(self.until_next_refresh()) => {}
                _ = self.wake.notified() => debug!("forced refresh"),
                Ok(departure) = self.departures.1.recv_async() => self.retire(&departure),
            }
        }
        self.clear();
    }
}

fn scan(reader: &MetricReader, ppid: u32) -> BTreeMap<u32, u64> {
    reader
        .children(ppid)
        .into_iter()
        .filter_map(|pid| match reader.start_time(pid) {
            Ok(start_time_ms) => Some((pid, start_time_ms)),
            Err(err) => {
                debug!(pid, %err, "child vanished during scan");
                None
            }
        })
        .collect()
}
