//! Wall-clock sources

use crate::types::BlockTimestamp;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

pub trait Clock: Send + Sync {
    fn now(&self) -> BlockTimestamp;
}

/// Operating system time
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> BlockTimestamp {
        BlockTimestamp(chrono::Utc::now().timestamp().max(0) as u64)
    }
}

/// Settable clock shared between test nodes
#[derive(Debug, Default, Clone)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new(start: BlockTimestamp) -> Self {
        Self {
            now: Arc::new(AtomicU64::new(start.0)),
        }
    }

    pub fn set(&self, time: BlockTimestamp) {
        self.now.store(time.0, Ordering::SeqCst);
    }

    /// Move forward to `time`; never moves backwards
    pub fn advance_to(&self, time: BlockTimestamp) {
        self.now.fetch_max(time.0, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> BlockTimestamp {
        BlockTimestamp(self.now.load(Ordering::SeqCst))
    }
}
