//! `Signal`: a manually-reset boolean event for cross-thread handshakes.
//!
//! Worker threads (confirmation requesters, compactors, the terminal
//! animator) park on a `Condvar` until another thread flips the flag.
//! Unlike a channel, a `Signal` is level-triggered: `wait` returns
//! immediately when the flag is already set.

use std::sync::{Condvar, Mutex};
use std::time::Duration;

#[derive(Default)]
pub struct Signal {
    flag: Mutex<bool>,
    cond: Condvar,
}

impl Signal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the flag and wake all waiters.
    pub fn set(&self) {
        let mut flag = self.flag.lock().unwrap();
        *flag = true;
        self.cond.notify_all();
    }

    /// Clear the flag and wake all waiters (for `wait_cleared` parties).
    pub fn clear(&self) {
        let mut flag = self.flag.lock().unwrap();
        *flag = false;
        self.cond.notify_all();
    }

    pub fn is_set(&self) -> bool {
        *self.flag.lock().unwrap()
    }

    /// Block until the flag is set.
    pub fn wait(&self) {
        let mut flag = self.flag.lock().unwrap();
        while !*flag {
            flag = self.cond.wait(flag).unwrap();
        }
    }

    /// Block until the flag is set or `timeout` elapses.
    /// Returns `true` when the flag was observed set.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        let mut flag = self.flag.lock().unwrap();
        while !*flag {
            let remaining = match deadline.checked_duration_since(std::time::Instant::now()) {
                Some(d) => d,
                None => return false,
            };
            let (guard, result) = self.cond.wait_timeout(flag, remaining).unwrap();
            flag = guard;
            if result.timed_out() && !*flag {
                return false;
            }
        }
        true
    }

    /// Block until the flag is cleared or `timeout` elapses.
    /// Returns `true` when the flag was observed cleared.
    pub fn wait_cleared_timeout(&self, timeout: Duration) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        let mut flag = self.flag.lock().unwrap();
        while *flag {
            let remaining = match deadline.checked_duration_since(std::time::Instant::now()) {
                Some(d) => d,
                None => return false,
            };
            let (guard, result) = self.cond.wait_timeout(flag, remaining).unwrap();
            flag = guard;
            if result.timed_out() && *flag {
                return false;
            }
        }
        true
    }
}
