use parking_lot::{Mutex, RwLock};
use std::{collections::HashMap, sync::Arc};

/// Last observation of one PID's cumulative CPU time.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CpuCacheEntry {
    pub last_total_ms: u64,
    pub last_wall_ms: u64,
    pub last_percent: f64,
}

type Slot = Arc<Mutex<Option<CpuCacheEntry>>>;

/// Turns cumulative CPU time into a usage ratio between two calls.
///
/// Every PID gets its own slot behind its own lock: updates for one PID are
/// serialized, updates for different PIDs only meet on the map lock while a
/// slot is looked up or created.
#[derive(Debug, Default)]
pub struct CpuAccountant {
    slots: RwLock<HashMap<u32, Slot>>,
}

impl CpuAccountant {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `total_ms` of CPU time for `pid` observed at wall time `now_ms`
    /// and return the usage since the previous observation, as a fraction of
    /// one core (`0.5` is half a core).
    ///
    /// The first observation of a PID reports `0.0`. So does an observation
    /// whose total went backwards: the PID now belongs to another process and
    /// the old data is discarded. A zero-width (or backwards) wall window
    /// repeats the previous result.
    pub fn update(&self, pid: u32, total_ms: u64, now_ms: u64) -> f64 {
        let slot = self.slot(pid);
        let mut slot = slot.lock();

        let cached = match *slot {
            Some(cached) if total_ms >= cached.last_total_ms => cached,
            _ => {
                *slot = Some(CpuCacheEntry {
                    last_total_ms: total_ms,
                    last_wall_ms: now_ms,
                    last_percent: 0.0,
                });
                return 0.0;
            }
        };

        if now_ms <= cached.last_wall_ms {
            return cached.last_percent;
        }

        let wall_delta = now_ms - cached.last_wall_ms;
        let percent = (total_ms - cached.last_total_ms) as f64 / wall_delta as f64;
        *slot = Some(CpuCacheEntry {
            last_total_ms: total_ms,
            last_wall_ms: now_ms,
            last_percent: percent,
        });
        percent
    }

    pub fn get(&self, pid: u32) -> Option<CpuCacheEntry> {
        let slot = self.slots.read().get(&pid).cloned()?;
        let entry = *slot.lock();
        entry
    }

    /// Drop the cached state for `pid`.
    pub fn evict(&self, pid: u32) {
        self.slots.write().remove(&pid);
    }

    pub fn len(&self) -> usize {
        self.slots.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.read().is_empty()
    }

    fn slot(&self, pid: u32) -> Slot {
        if let Some(slot) = self.slots.read().get(&pid) {
            return Arc::clone(slot);
        }
        Arc::clone(self.slots.write().entry(pid).or_default())
    }
}
