#![forbid(unsafe_code)]

use crate::children::{ChildSet, ChildSnapshot};
use crate::clock::Clock;
use crate::error::Error;
use crate::reporter::{BreachReporter, Notifier, Scheduler};
use crate::supervisor::{Exit, Supervisor};
use config::{Config, PidSource, ResolvedProcess};
use educe::Educe;
use parking_lot::Mutex;
use probe::MetricReader;
use std::{collections::BTreeMap, path::Path, sync::Arc, time::Duration};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Delay before a process read from a pid file is attached again.
pub const REATTACH_DELAY: Duration = Duration::from_secs(5);

/// Children of one supervised process, for inspection.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessSnapshot {
    pub process: String,
    pub pid: u32,
    pub children: Vec<ChildSnapshot>,
}

#[derive(Educe)]
#[educe(Debug)]
struct Shared {
    reader: Arc<MetricReader>,
    #[educe(Debug(ignore))]
    notifier: Arc<dyn Notifier>,
    #[educe(Debug(ignore))]
    scheduler: Arc<dyn Scheduler>,
    #[educe(Debug(ignore))]
    clock: Arc<dyn Clock>,
    children: Mutex<BTreeMap<String, Arc<ChildSet>>>,
}

/// Supervises every process in a configuration.
#[derive(Debug)]
pub struct Engine {
    processes: Vec<ResolvedProcess>,
    shared: Arc<Shared>,
}

impl Engine {
    pub fn new(
        config: &Config,
        reader: Arc<MetricReader>,
        notifier: Arc<dyn Notifier>,
        scheduler: Arc<dyn Scheduler>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, Error> {
        Ok(Self {
            processes: config.resolve()?,
            shared: Arc::new(Shared {
                reader,
                notifier,
                scheduler,
                clock,
                children: Mutex::default(),
            }),
        })
    }

    pub fn processes(&self) -> &[ResolvedProcess] {
        &self.processes
    }

    pub fn reader(&self) -> &Arc<MetricReader> {
        &self.shared.reader
    }

    /// Current children of every supervised process that monitors them.
    pub fn snapshot(&self) -> Vec<ProcessSnapshot> {
        self.shared
            .children
            .lock()
            .iter()
            .map(|(process, set)| ProcessSnapshot {
                process: process.clone(),
                pid: set.parent_pid(),
                children: set.snapshot(),
            })
            .collect()
    }

    /// Rescan the children of every supervised process now.
    pub fn force_refresh(&self) {
        for set in self.shared.children.lock().values() {
            set.force_refresh();
        }
    }

    /// Supervise until `cancel` fires. A process that cannot be attached or
    /// that goes away is logged; it never stops the others.
    pub async fn run_until(&self, cancel: CancellationToken) -> Result<(), Error> {
        let mut tasks = JoinSet::new();
        for process in self.processes.iter().cloned() {
            tasks.spawn(supervise(
                Arc::clone(&self.shared),
                process,
                cancel.clone(),
            ));
        }
        info!(processes = self.processes.len(), "engine started");

        while let Some(result) = tasks.join_next().await {
            result?;
        }
        cancel.cancelled().await;
        info!("engine stopped");
        Ok(())
    }
}

async fn supervise(shared: Arc<Shared>, process: ResolvedProcess, cancel: CancellationToken) {
    let name = process.full_name();
    loop {
        match attach(&shared, &process).await {
            Ok(supervisor) => {
                if let Some(set) = supervisor.children() {
                    shared.children.lock().insert(name.clone(), Arc::clone(set));
                }
                let exit = supervisor.run(cancel.clone()).await;
                shared.children.lock().remove(&name);
                match exit {
                    Exit::Cancelled => return,
                    Exit::Gone(reason) => warn!(process = %name, %reason, "monitored process is gone"),
                }
            }
            Err(err) => warn!(process = %name, %err, "cannot attach"),
        }

        if matches!(process.pid, PidSource::Pid(_)) {
            debug!(process = %name, "fixed pid, not reattaching");
            return;
        }
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = shared.clock.sleep(REATTACH_DELAY) => {}
        }
    }
}

async fn attach(shared: &Shared, process: &ResolvedProcess) -> Result<Supervisor, Error> {
    let pid = match &process.pid {
        PidSource::Pid(pid) => *pid,
        PidSource::PidFile(path) => read_pid_file(path).await?,
    };
    let reporter = Arc::new(BreachReporter::new(
        process.notify.clone(),
        Arc::clone(&shared.notifier),
        Arc::clone(&shared.scheduler),
    ));
    Supervisor::attach(
        process,
        pid,
        Arc::clone(&shared.reader),
        reporter,
        Arc::clone(&shared.clock),
    )
}

pub async fn read_pid_file(path: &Path) -> Result<u32, Error> {
    tokio::fs::read_to_string(path)
        .await?
        .trim()
        .parse()
        .map_err(|_| Error::InvalidPidFile(path.to_owned()))
}
