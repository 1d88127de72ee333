#![forbid(unsafe_code)]

use crate::condition::Condition;
use crate::watcher::Reading;
use config::{Level, NotifyMap};
use educe::Educe;
use itertools::Itertools;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// A message for one contact, handed to the notification transport.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub contact: String,
    pub level: Level,
    pub message: String,
    pub pid: u32,
}

/// Fire-and-forget request for the process lifecycle collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleRequest {
    pub pid: u32,
    pub action: String,
    pub reason: String,
}

/// Delivers notifications. Delivery failures are the implementor's concern.
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Accepts lifecycle actions; the engine never waits for their outcome.
pub trait Scheduler: Send + Sync {
    fn schedule(&self, request: ScheduleRequest);
}

/// What one firing produced.
#[derive(Debug, Clone, PartialEq)]
pub struct Breach {
    pub pid: u32,
    pub level: Level,
    pub action: String,
    pub message: String,
}

/// Turns a fired condition into notifications and a schedule request.
#[derive(Educe, Clone)]
#[educe(Debug)]
pub struct BreachReporter {
    contacts: NotifyMap,
    #[educe(Debug(ignore))]
    notifier: Arc<dyn Notifier>,
    #[educe(Debug(ignore))]
    scheduler: Arc<dyn Scheduler>,
}

impl BreachReporter {
    pub fn new(
        contacts: NotifyMap,
        notifier: Arc<dyn Notifier>,
        scheduler: Arc<dyn Scheduler>,
    ) -> Self {
        Self {
            contacts,
            notifier,
            scheduler,
        }
    }

    pub fn contacts(&self) -> &NotifyMap {
        &self.contacts
    }

    /// `Bounded memory(<50Mb): [*55Mb, 49Mb] send to [restart]`
    pub fn message(condition: &Condition, history: &[Reading]) -> String {
        let values = history
            .iter()
            .map(|reading| {
                let value = condition.format_value(reading.value);
                if reading.breaching {
                    format!("*{value}")
                } else {
                    value
                }
            })
            .join(", ");
        format!(
            "Bounded {condition}: [{values}] send to [{}]",
            condition.action
        )
    }

    pub fn report(&self, pid: u32, condition: &Condition, history: &[Reading]) -> Breach {
        let message = Self::message(condition, history);
        let level = condition.level;
        log_at(level, pid, &condition.name, &message);

        for (contact, _) in self
            .contacts
            .iter()
            .filter(|(_, wanted)| **wanted <= level)
        {
            self.notifier.notify(Notification {
                contact: contact.clone(),
                level,
                message: message.clone(),
                pid,
            });
        }
        self.scheduler.schedule(ScheduleRequest {
            pid,
            action: condition.action.clone(),
            reason: message.clone(),
        });

        Breach {
            pid,
            level,
            action: condition.action.clone(),
            message,
        }
    }
}

fn log_at(level: Level, pid: u32, check: &str, message: &str) {
    match level {
        Level::Debug => debug!(pid, check, "{message}"),
        Level::Info => info!(pid, check, "{message}"),
        Level::Warn => warn!(pid, check, "{message}"),
        Level::Error | Level::Fatal => error!(pid, check, %level, "{message}"),
    }
}

/// Everything the engine hands to its collaborators, as one stream.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    Notify(Notification),
    Schedule(ScheduleRequest),
}

/// Forwards notifications and schedule requests over a channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: flume::Sender<EngineEvent>,
}

impl ChannelSink {
    pub fn new(tx: flume::Sender<EngineEvent>) -> Self {
        Self { tx }
    }

    pub fn unbounded() -> (Self, flume::Receiver<EngineEvent>) {
        let (tx, rx) = flume::unbounded();
        (Self::new(tx), rx)
    }

    fn send(&self, event: EngineEvent) {
        if self.tx.send(event).is_err() {
            debug!("event receiver dropped");
        }
    }
}

impl Notifier for ChannelSink {
    fn notify(&self, notification: Notification) {
        self.send(EngineEvent::Notify(notification));
    }
}

impl Scheduler for ChannelSink {
    fn schedule(&self, request: ScheduleRequest) {
        self.send(EngineEvent::Schedule(request));
    }
}

/// Logs instead of delivering. Used when nothing else is wired up.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl Notifier for TracingSink {
    fn notify(&self, notification: Notification) {
        info!(
            contact = %notification.contact,
            level = %notification.level,
            pid = notification.pid,
            "notify: {}",
            notification.message
        );
    }
}

impl Scheduler for TracingSink {
    fn schedule(&self, request: ScheduleRequest) {
        info!(pid = request.pid, action = %request.action, "schedule: {}", request.reason);
    }
}
