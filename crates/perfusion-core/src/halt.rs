//! Cooperative halt signal for acquisition loops.
//!
//! The acquisition thread blocks only in [`HaltToken::wait_until`], which
//! returns as soon as the token is halted or the deadline passes. Halting
//! never interrupts work in progress: the loop observes it at its next wait.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

#[derive(Debug, Default)]
struct Inner {
    halted: Mutex<bool>,
    cond: Condvar,
}

/// Cloneable one-shot halt signal shared between a controller and its
/// acquisition thread.
#[derive(Debug, Clone, Default)]
pub struct HaltToken {
    inner: Arc<Inner>,
}

impl HaltToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal every waiter. Idempotent.
    pub fn halt(&self) {
        let mut halted = self.inner.halted.lock();
        *halted = true;
        self.inner.cond.notify_all();
    }

    /// Re-arm the token for a new acquisition run.
    pub fn reset(&self) {
        *self.inner.halted.lock() = false;
    }

    pub fn is_halted(&self) -> bool {
        *self.inner.halted.lock()
    }

    /// Block until halted or `deadline` passes. Returns `true` if halted.
    pub fn wait_until(&self, deadline: Instant) -> bool {
        let mut halted = self.inner.halted.lock();
        while !*halted {
            if self.inner.cond.wait_until(&mut halted, deadline).timed_out() {
                break;
            }
        }
        *halted
    }

    /// Block for at most `timeout`. Returns `true` if halted.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        self.wait_until(Instant::now() + timeout)
    }
}
