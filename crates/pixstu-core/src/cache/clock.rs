//! Time source for entry timestamps.

use chrono::Utc;
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// Source of "now" in whole seconds since the Unix epoch.
pub trait Clock: Send + Sync + fmt::Debug {
    fn now_secs(&self) -> i64;
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_secs(&self) -> i64 {
        Utc::now().timestamp()
    }
}

/// Clock that only moves when told to.
///
/// Clones share the same time, so a test can keep one handle and give
/// another to the store.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicI64>,
}

impl ManualClock {
    pub fn new(start_secs: i64) -> Self {
        Self {
            now: Arc::new(AtomicI64::new(start_secs)),
        }
    }

    pub fn set(&self, secs: i64) {
        self.now.store(secs, Ordering::SeqCst);
    }

    pub fn advance(&self, secs: i64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_secs(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}
