mod cpu;
mod error;
mod query;
mod reader;
mod sample;
pub mod source;
mod stat;

pub use cpu::{CpuAccountant, CpuCacheEntry};
pub use error::Error;
pub use query::ProcessQuery;
pub use reader::{DEFAULT_PAGE_SIZE, DEFAULT_TICKS_PER_SECOND, MetricReader};
pub use sample::{CpuSample, ProcessSample};
pub use stat::StatLine;

#[cfg(any(test, feature = "testing"))]
pub mod testing;
