//! Pause/resume handshake for exclusive terminal access.
//!
//! Any consumer that owns an animation loop (spinners, progress bars)
//! checks the gate at the top of each rendering iteration. A requester
//! that needs exclusive stdout (e.g. an interactive confirmation prompt)
//! raises `pause`, waits for the animator to acknowledge with `paused`,
//! performs its I/O, then releases in the reverse order.
//!
//! Guarantees: the animator never writes after observing `pause`, and the
//! requester never proceeds before observing `paused`.

use std::time::Duration;

use plait_core::sync::Signal;

#[derive(Default)]
pub struct AnimationGate {
    pause: Signal,
    paused: Signal,
}

impl AnimationGate {
    pub fn new() -> Self {
        Self::default()
    }

    // ------------------------------------------------------------------
    // Requester side
    // ------------------------------------------------------------------

    /// Raise `pause` and wait for the animator's acknowledgement.
    ///
    /// Returns `false` when no acknowledgement arrived within `timeout`
    /// (e.g. no animator is running); the caller then proceeds without
    /// exclusivity.
    pub fn begin_exclusive(&self, timeout: Duration) -> bool {
        self.pause.set();
        self.paused.wait_timeout(timeout)
    }

    /// Release the animator: clear `paused`, then `pause`.
    pub fn end_exclusive(&self) {
        self.paused.clear();
        self.pause.clear();
    }

    // ------------------------------------------------------------------
    // Animator side
    // ------------------------------------------------------------------

    /// Whether a requester is asking for exclusivity. Checked at the top
    /// of every rendering iteration, before any write.
    pub fn pause_requested(&self) -> bool {
        self.pause.is_set()
    }

    /// Acknowledge the pause and sleep until the requester releases it.
    /// Returns `false` when `timeout` expired with `pause` still raised.
    pub fn enter_paused(&self, timeout: Duration) -> bool {
        self.paused.set();
        self.pause.wait_cleared_timeout(timeout)
    }

    /// Session teardown clears both sides so neither party stays parked.
    pub fn teardown(&self) {
        self.paused.clear();
        self.pause.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn requester_waits_for_acknowledgement() {
        let gate = Arc::new(AnimationGate::new());
        let writes_during_exclusive = Arc::new(AtomicUsize::new(0));
        let exclusive = Arc::new(AtomicBool::new(false));
        let stop = Arc::new(AtomicBool::new(false));

        // Animator: render until stopped, honoring the pause handshake.
        let a_gate = Arc::clone(&gate);
        let a_writes = Arc::clone(&writes_during_exclusive);
        let a_exclusive = Arc::clone(&exclusive);
        let a_stop = Arc::clone(&stop);
        let animator = std::thread::spawn(move || {
            while !a_stop.load(Ordering::SeqCst) {
                if a_gate.pause_requested() {
                    a_gate.enter_paused(Duration::from_secs(5));
                    continue;
                }
                // a "write": must never overlap the requester's window
                if a_exclusive.load(Ordering::SeqCst) {
                    a_writes.fetch_add(1, Ordering::SeqCst);
                }
                std::thread::sleep(Duration::from_millis(1));
            }
        });

        assert!(gate.begin_exclusive(Duration::from_secs(5)));
        exclusive.store(true, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(30));
        exclusive.store(false, Ordering::SeqCst);
        gate.end_exclusive();

        stop.store(true, Ordering::SeqCst);
        animator.join().unwrap();
        assert_eq!(writes_during_exclusive.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn absent_animator_times_out() {
        let gate = AnimationGate::new();
        assert!(!gate.begin_exclusive(Duration::from_millis(20)));
        gate.end_exclusive();
    }

    #[test]
    fn teardown_releases_a_parked_animator() {
        let gate = Arc::new(AnimationGate::new());
        gate.pause.set();
        let a_gate = Arc::clone(&gate);
        let animator =
            std::thread::spawn(move || a_gate.enter_paused(Duration::from_secs(5)));
        std::thread::sleep(Duration::from_millis(20));
        gate.teardown();
        assert!(animator.join().unwrap());
        assert!(!gate.pause_requested());
    }
}
