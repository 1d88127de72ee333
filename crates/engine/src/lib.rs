//! The check engine: watchers sampling processes, child reconciliation and
//! breach reporting.

mod children;
pub mod clock;
mod condition;
mod engine;
mod error;
mod reporter;
mod supervisor;
mod watcher;

pub use children::{ChildHandle, ChildSet, ChildSnapshot};
pub use condition::{
    Bound, Comparator, Condition, DEFAULT_ACTION, DEFAULT_EVERY, Metric, build_conditions,
};
pub use engine::{Engine, ProcessSnapshot, REATTACH_DELAY, read_pid_file};
pub use error::Error;
pub use reporter::{
    Breach, BreachReporter, ChannelSink, EngineEvent, Notification, Notifier, ScheduleRequest,
    Scheduler, TracingSink,
};
pub use supervisor::{Exit, Supervisor};
pub use watcher::{
    Departure, GoneReason, Outcome, Reading, Watcher, WatcherHandle, WatcherState, read_metric,
};
