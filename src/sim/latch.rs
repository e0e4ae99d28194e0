//! Counting barrier for one scheduler phase.

use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

/// Blocks the scheduler until every task of a phase has finished.
#[derive(Debug)]
pub struct CountdownLatch {
    remaining: Mutex<usize>,
    done: Condvar,
}

impl CountdownLatch {
    pub fn new(count: usize) -> Arc<Self> {
        Arc::new(Self {
            remaining: Mutex::new(count),
            done: Condvar::new(),
        })
    }

    pub fn count_down(&self) {
        let mut remaining = self.remaining.lock();
        *remaining = remaining.saturating_sub(1);
        if *remaining == 0 {
            self.done.notify_all();
        }
    }

    pub fn wait(&self) {
        let mut remaining = self.remaining.lock();
        while *remaining > 0 {
            self.done.wait(&mut remaining);
        }
    }

    /// Guard that counts down when dropped, also while unwinding.
    pub fn guard(self: &Arc<Self>) -> LatchGuard {
        LatchGuard {
            latch: Arc::clone(self),
        }
    }
}

pub struct LatchGuard {
    latch: Arc<CountdownLatch>,
}

impl Drop for LatchGuard {
    fn drop(&mut self) {
        self.latch.count_down();
    }
}
