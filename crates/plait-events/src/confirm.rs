//! Blocking confirmation handshake between a worker thread and the UI.
//!
//! The worker emits a `confirm_request` event and parks on a condition
//! variable; whichever surface the user answers from calls
//! [`provide_confirmation`] and wakes it. At most one request can be
//! outstanding per session.
//!
//! [`provide_confirmation`]: ConfirmationGate::provide_confirmation

use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::bus::EventBus;
use crate::event::SessionEvent;

#[derive(Debug, Error)]
pub enum ConfirmationError {
    /// A second request arrived before the first resolved.
    #[error("A confirmation request is already outstanding")]
    Busy,

    /// The session was torn down while the request was pending.
    #[error("Confirmation cancelled by session teardown")]
    Cancelled,

    /// No decision arrived within the requested bound.
    #[error("Confirmation timed out after {0:?}")]
    Timeout(Duration),
}

#[derive(Default)]
struct GateState {
    outstanding: bool,
    decision: Option<bool>,
    cancelled: bool,
}

pub struct ConfirmationGate {
    bus: Arc<EventBus>,
    state: Mutex<GateState>,
    cond: Condvar,
}

impl ConfirmationGate {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            bus,
            state: Mutex::new(GateState::default()),
            cond: Condvar::new(),
        }
    }

    /// Ask the user to approve `code` and block until the decision arrives.
    ///
    /// `timeout` of `None` waits unboundedly (UI-present sessions);
    /// otherwise expiry yields [`ConfirmationError::Timeout`]. Called from
    /// a worker thread, never from the thread that answers.
    pub fn request_confirmation(
        &self,
        round_id: &str,
        post_id: &str,
        code: &str,
        timeout: Option<Duration>,
    ) -> Result<bool, ConfirmationError> {
        {
            let mut state = self.state.lock().unwrap();
            if state.outstanding {
                return Err(ConfirmationError::Busy);
            }
            state.outstanding = true;
            state.decision = None;
            state.cancelled = false;
        }

        // Emit outside the gate lock; handlers may call back into us.
        let _ = self.bus.emit(SessionEvent::ConfirmRequest {
            post_id: post_id.to_string(),
            round_id: round_id.to_string(),
            code: code.to_string(),
        });

        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.state.lock().unwrap();
        loop {
            if state.cancelled {
                state.outstanding = false;
                return Err(ConfirmationError::Cancelled);
            }
            if let Some(decision) = state.decision.take() {
                state.outstanding = false;
                return Ok(decision);
            }
            state = match deadline {
                Some(deadline) => {
                    let remaining = match deadline.checked_duration_since(Instant::now()) {
                        Some(d) => d,
                        None => {
                            state.outstanding = false;
                            return Err(ConfirmationError::Timeout(timeout.unwrap()));
                        }
                    };
                    self.cond.wait_timeout(state, remaining).unwrap().0
                }
                None => self.cond.wait(state).unwrap(),
            };
        }
    }

    /// Record the user's decision and wake the waiting worker.
    /// A decision with no outstanding request is ignored.
    pub fn provide_confirmation(&self, approved: bool) {
        let mut state = self.state.lock().unwrap();
        if !state.outstanding {
            return;
        }
        state.decision = Some(approved);
        self.cond.notify_all();
    }

    /// Resolve any outstanding request as cancelled (session teardown).
    pub fn cancel_all(&self) {
        let mut state = self.state.lock().unwrap();
        state.cancelled = true;
        self.cond.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate() -> Arc<ConfirmationGate> {
        Arc::new(ConfirmationGate::new(Arc::new(EventBus::new())))
    }

    #[test]
    fn decision_reaches_the_waiting_worker() {
        let gate = gate();
        let gate2 = Arc::clone(&gate);
        let worker = std::thread::spawn(move || {
            gate2.request_confirmation("r1", "p1", "print(1)", Some(Duration::from_secs(5)))
        });
        std::thread::sleep(Duration::from_millis(30));
        gate.provide_confirmation(true);
        assert!(worker.join().unwrap().unwrap());
    }

    #[test]
    fn denial_is_delivered_as_false() {
        let gate = gate();
        let gate2 = Arc::clone(&gate);
        let worker = std::thread::spawn(move || {
            gate2.request_confirmation("r1", "p1", "rm -rf /", Some(Duration::from_secs(5)))
        });
        std::thread::sleep(Duration::from_millis(30));
        gate.provide_confirmation(false);
        assert!(!worker.join().unwrap().unwrap());
    }

    #[test]
    fn second_request_is_busy() {
        let gate = gate();
        let gate2 = Arc::clone(&gate);
        let worker = std::thread::spawn(move || {
            gate2.request_confirmation("r1", "p1", "code", Some(Duration::from_secs(5)))
        });
        std::thread::sleep(Duration::from_millis(30));
        let err = gate.request_confirmation("r1", "p2", "other", Some(Duration::from_millis(1)));
        assert!(matches!(err, Err(ConfirmationError::Busy)));
        gate.provide_confirmation(true);
        worker.join().unwrap().unwrap();
    }

    #[test]
    fn teardown_cancels_the_wait() {
        let gate = gate();
        let gate2 = Arc::clone(&gate);
        let worker = std::thread::spawn(move || {
            gate2.request_confirmation("r1", "p1", "code", Some(Duration::from_secs(5)))
        });
        std::thread::sleep(Duration::from_millis(30));
        gate.cancel_all();
        assert!(matches!(
            worker.join().unwrap(),
            Err(ConfirmationError::Cancelled)
        ));
    }

    #[test]
    fn bounded_wait_times_out() {
        let gate = gate();
        let err = gate.request_confirmation("r1", "p1", "code", Some(Duration::from_millis(20)));
        assert!(matches!(err, Err(ConfirmationError::Timeout(_))));
        // the slot is free again afterwards
        let gate2 = Arc::clone(&gate);
        let worker = std::thread::spawn(move || {
            gate2.request_confirmation("r1", "p2", "code", Some(Duration::from_secs(5)))
        });
        std::thread::sleep(Duration::from_millis(30));
        gate.provide_confirmation(true);
        assert!(worker.join().unwrap().unwrap());
    }
}
