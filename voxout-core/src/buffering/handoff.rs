//! Binary, edge-triggered handoff between the producer and the device callback.
//!
//! The flag starts *set* ("ready"). [`wait`](HandoffSignal::wait) blocks until
//! it is set and then clears it; [`notify`](HandoffSignal::notify) sets it and
//! wakes one waiter. Every successful `wait` therefore pairs with exactly one
//! prior `notify` (or with the initial ready state).
//!
//! After [`close`](HandoffSignal::close) every current and future wait returns
//! `false` immediately.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

#[derive(Debug)]
struct State {
    ready: bool,
    closed: bool,
}

#[derive(Debug)]
pub struct HandoffSignal {
    state: Mutex<State>,
    cond: Condvar,
}

impl HandoffSignal {
    /// A signal in the ready state.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                ready: true,
                closed: false,
            }),
            cond: Condvar::new(),
        }
    }

    /// Block until ready, then consume the readiness.
    ///
    /// Returns `false` if the signal was closed instead.
    pub fn wait(&self) -> bool {
        let mut state = self.state.lock();
        while !state.ready && !state.closed {
            self.cond.wait(&mut state);
        }
        if state.closed {
            return false;
        }
        state.ready = false;
        true
    }

    /// Like [`wait`](Self::wait) but gives up after `timeout`.
    ///
    /// Returns `false` on timeout or close; the flag is left untouched then.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while !state.ready && !state.closed {
            if self.cond.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
        if state.closed || !state.ready {
            return false;
        }
        state.ready = false;
        true
    }

    /// Mark ready and wake one waiter.
    pub fn notify(&self) {
        let mut state = self.state.lock();
        state.ready = true;
        self.cond.notify_one();
    }

    /// Wake every waiter and refuse further waits.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        self.cond.notify_all();
    }

    /// Snapshot of the flag, for diagnostics and tests.
    pub fn is_ready(&self) -> bool {
        self.state.lock().ready
    }
}

impl Default for HandoffSignal {
    fn default() -> Self {
        Self::new()
    }
}
