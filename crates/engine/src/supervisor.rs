#![forbid(unsafe_code)]

use crate::children::ChildSet;
use crate::clock::Clock;
use crate::condition::{Condition, Metric, build_conditions};
use crate::error::Error;
use crate::reporter::BreachReporter;
use crate::watcher::{GoneReason, Watcher, WatcherHandle};
use config::ResolvedProcess;
use educe::Educe;
use probe::MetricReader;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, info, info_span, warn};

/// How a supervisor ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    Cancelled,
    Gone(GoneReason),
}

/// Watches one configured process: its liveness, its identity, its own
/// checks and, when configured, its children.
#[derive(Educe)]
#[educe(Debug)]
pub struct Supervisor {
    name: String,
    pid: u32,
    start_time_ms: u64,
    conditions: Vec<Condition>,
    children: Option<Arc<ChildSet>>,
    reader: Arc<MetricReader>,
    reporter: Arc<BreachReporter>,
    #[educe(Debug(ignore))]
    clock: Arc<dyn Clock>,
}

impl Supervisor {
    /// Attach to `pid`. Fails when the process cannot be observed or one of
    /// its checks is invalid.
    pub fn attach(
        process: &ResolvedProcess,
        pid: u32,
        reader: Arc<MetricReader>,
        reporter: Arc<BreachReporter>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, Error> {
        let start_time_ms = reader.start_time(pid)?;

        let mut conditions = Vec::new();
        for metric in [Metric::Alive, Metric::Identity] {
            if !process.checks.contains_key(&metric.to_string()) {
                conditions.push(Condition::builtin(metric));
            }
        }
        conditions.extend(build_conditions(&process.checks)?);

        let children = process.monitor_children.as_ref().map(|settings| {
            Arc::new(ChildSet::new(
                pid,
                settings,
                Arc::clone(&reader),
                Arc::clone(&reporter),
                Arc::clone(&clock),
            ))
        });

        Ok(Self {
            name: process.full_name(),
            pid,
            start_time_ms,
            conditions,
            children,
            reader,
            reporter,
            clock,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn watcher_names(&self) -> Vec<&str> {
        self.conditions.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn children(&self) -> Option<&Arc<ChildSet>> {
        self.children.as_ref()
    }

    /// Run until cancelled or until the process goes away. Everything
    /// attached is detached before returning.
    pub async fn run(self, cancel: CancellationToken) -> Exit {
        let span = info_span!("supervisor", process = %self.name, pid = self.pid);
        async move {
            let (departures_tx, departures_rx) = flume::unbounded();
            let watchers: Vec<WatcherHandle> = self
                .conditions
                .iter()
                .cloned()
                .map(|condition| {
                    Watcher::new(
                        self.pid,
                        condition,
                        Arc::clone(&self.reader),
                        Arc::clone(&self.reporter),
                    )
                    .with_owner(departures_tx.clone())
                    .with_identity(self.start_time_ms)
                    .spawn(Arc::clone(&self.clock))
                })
                .collect();
            drop(departures_tx);

            let children_cancel = cancel.child_token();
            let children_task = self
                .children
                .clone()
                .map(|set| tokio::spawn(set.run(children_cancel.clone())));
            info!(watchers = watchers.len(), "supervising");

            let exit = tokio::select! {
                _ = cancel.cancelled() => Exit::Cancelled,
                Ok(departure) = departures_rx.recv_async() => Exit::Gone(departure.reason),
            };

            for watcher in watchers {
                watcher.stop().await;
            }
            children_cancel.cancel();
            if let Some(task) = children_task {
                if let Err(err) = task.await {
                    warn!(%err, "children task failed");
                }
            }
            info!(?exit, "supervision ended");
            exit
        }
        .instrument(span)
        .await
    }
}
