//! Background round compaction, one worker per (session, role).
//!
//! The compactor watches conversation growth through the store's
//! round-added callback and, once enough uncompacted rounds pile up,
//! summarizes everything but the most recent ones on its own thread.
//! The summary *replaces* the previous one; the raw history is never
//! mutated, so a role can splice the summary in front of the remaining
//! rounds on every prompt build.

use std::sync::{Arc, Mutex, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use plait_core::sync::Signal;

use crate::store::ConversationStore;
use crate::types::{CompactedMessage, Round};

#[derive(Debug, Error)]
pub enum SummaryError {
    #[error("Summarization failed: {0}")]
    Model(String),
}

/// Everything a summarizer needs for one cycle: the prior summary (if any)
/// and the rounds being folded into it, already filtered to the role's view.
pub struct SummaryInput {
    pub role: String,
    pub previous: Option<CompactedMessage>,
    pub rounds: Vec<Round>,
}

/// Produces the replacement summary text. Implementations typically render
/// a prompt template and call an LLM; they may block on network since they
/// run on the compactor thread, never on the orchestrator.
pub trait Summarizer: Send + Sync {
    fn summarize(&self, input: &SummaryInput) -> Result<String, SummaryError>;
}

struct State {
    compacted: Option<CompactedMessage>,
    compacting: bool,
}

struct Shared {
    role: String,
    threshold: usize,
    retain_recent: usize,
    store: Weak<ConversationStore>,
    summarizer: Arc<dyn Summarizer>,
    state: Mutex<State>,
    trigger: Signal,
    stop: Signal,
    done: Signal,
}

/// Per-role compaction worker. Owns the role's [`CompactedMessage`]
/// exclusively; everyone else reads it through [`get_compaction`].
///
/// [`get_compaction`]: RoundCompactor::get_compaction
pub struct RoundCompactor {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl RoundCompactor {
    /// Start a compactor for `role` and subscribe it to the store's
    /// round-added notifications. Also evaluates the trigger once at
    /// startup so pre-existing history is picked up.
    pub fn attach(
        role: impl Into<String>,
        threshold: usize,
        retain_recent: usize,
        store: &Arc<ConversationStore>,
        summarizer: Arc<dyn Summarizer>,
    ) -> Arc<Self> {
        let role = role.into();
        let shared = Arc::new(Shared {
            role: role.clone(),
            threshold,
            retain_recent,
            store: Arc::downgrade(store),
            summarizer,
            state: Mutex::new(State {
                compacted: None,
                compacting: false,
            }),
            trigger: Signal::new(),
            stop: Signal::new(),
            done: Signal::new(),
        });

        let worker_shared = Arc::clone(&shared);
        let worker = std::thread::Builder::new()
            .name(format!("compactor-{role}"))
            .spawn(move || worker_loop(worker_shared))
            .expect("spawning compactor thread");

        let cb_shared = Arc::clone(&shared);
        store.register_callback(Arc::new(move |total| cb_shared.on_round_added(total)));

        Arc::new(Self {
            shared,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Current summary, if a cycle has completed. Reads are idempotent:
    /// the summary is replaced, never appended to.
    pub fn get_compaction(&self) -> Option<CompactedMessage> {
        self.shared.state.lock().unwrap().compacted.clone()
    }

    pub fn role(&self) -> &str {
        &self.shared.role
    }

    /// Stop the worker, waiting up to `timeout` for it to finish an
    /// in-flight cycle. A worker that outlives the timeout is detached.
    pub fn shutdown(&self, timeout: Duration) {
        self.shared.stop.set();
        self.shared.trigger.set();
        let finished = self.shared.done.wait_timeout(timeout);
        let handle = self.worker.lock().unwrap().take();
        if let Some(handle) = handle {
            if finished {
                let _ = handle.join();
            } else {
                warn!(role = %self.shared.role, "compactor did not stop in time, detaching");
            }
        }
    }
}

impl Shared {
    fn on_round_added(&self, total: usize) {
        let state = self.state.lock().unwrap();
        let end = state.compacted.as_ref().map(|c| c.end_index).unwrap_or(0);
        if total.saturating_sub(end) > self.threshold && !state.compacting {
            drop(state);
            self.trigger.set();
        }
    }
}

fn worker_loop(shared: Arc<Shared>) {
    // Catch up with history that accumulated before this worker attached.
    run_cycle(&shared);

    loop {
        shared.trigger.wait();
        shared.trigger.clear();
        if shared.stop.is_set() {
            break;
        }
        shared.state.lock().unwrap().compacting = true;
        run_cycle(&shared);
        shared.state.lock().unwrap().compacting = false;
    }
    debug!(role = %shared.role, "compactor worker exiting");
    shared.done.set();
}

fn run_cycle(shared: &Shared) {
    let Some(store) = shared.store.upgrade() else {
        return;
    };

    let snapshot = store.rounds_snapshot();
    let total = snapshot.len();
    let prev = shared.state.lock().unwrap().compacted.clone();
    let prev_end = prev.as_ref().map(|c| c.end_index).unwrap_or(0);

    let new_end = total.saturating_sub(shared.retain_recent);
    if new_end <= prev_end {
        return;
    }

    // Rounds (prev_end, new_end], filtered to the role's view of each.
    let rounds: Vec<Round> = snapshot[prev_end..new_end]
        .iter()
        .map(|r| {
            let mut round = r.clone();
            round.posts = r.posts_for_role(&shared.role).cloned().collect();
            round
        })
        .collect();

    let input = SummaryInput {
        role: shared.role.clone(),
        previous: prev,
        rounds,
    };

    match shared.summarizer.summarize(&input) {
        Ok(summary) => {
            let mut state = shared.state.lock().unwrap();
            state.compacted = Some(CompactedMessage {
                start_index: 1,
                end_index: new_end,
                summary,
            });
            info!(
                role = %shared.role,
                end_index = new_end,
                total,
                "compaction cycle complete"
            );
        }
        Err(e) => {
            // Keep the previous summary; the next trigger retries.
            warn!(role = %shared.role, error = %e, "compaction cycle failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Post;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    struct CountingSummarizer {
        calls: AtomicUsize,
        fail_first: bool,
    }

    impl Summarizer for CountingSummarizer {
        fn summarize(&self, input: &SummaryInput) -> Result<String, SummaryError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_first && call == 0 {
                return Err(SummaryError::Model("backend offline".to_string()));
            }
            Ok(format!(
                "{} rounds through {}",
                input.rounds.len(),
                input.previous.as_ref().map(|p| p.end_index).unwrap_or(0) + input.rounds.len()
            ))
        }
    }

    fn seeded_store(rounds: usize) -> Arc<ConversationStore> {
        let store = Arc::new(ConversationStore::new());
        store.register_roles(["Planner"]);
        for i in 0..rounds {
            let round = store.create_round(format!("query {i}"));
            let mut post = Post::new("User");
            post.send_to = "Planner".to_string();
            post.message = format!("query {i}");
            store.append_post(&round.id, post).unwrap();
        }
        store
    }

    fn wait_for(mut cond: impl FnMut() -> bool, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        cond()
    }

    #[test]
    fn compacts_existing_history_on_attach() {
        let store = seeded_store(5);
        let summarizer = Arc::new(CountingSummarizer {
            calls: AtomicUsize::new(0),
            fail_first: false,
        });
        let compactor = RoundCompactor::attach("Planner", 3, 1, &store, summarizer);

        assert!(wait_for(
            || compactor.get_compaction().map(|c| c.end_index) == Some(4),
            Duration::from_secs(5),
        ));
        let compacted = compactor.get_compaction().unwrap();
        assert_eq!(compacted.start_index, 1);
        assert_eq!(compacted.end_index, 4);

        // consumer splice: only rounds past end_index remain uncompacted
        let tail = &store.rounds_snapshot()[compacted.end_index..];
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].user_query, "query 4");

        compactor.shutdown(Duration::from_secs(1));
    }

    #[test]
    fn end_index_is_monotonic_across_cycles() {
        let store = seeded_store(5);
        let summarizer = Arc::new(CountingSummarizer {
            calls: AtomicUsize::new(0),
            fail_first: false,
        });
        let compactor = RoundCompactor::attach("Planner", 3, 1, &store, summarizer);
        assert!(wait_for(
            || compactor.get_compaction().is_some(),
            Duration::from_secs(5),
        ));
        let first_end = compactor.get_compaction().unwrap().end_index;

        for i in 5..10 {
            store.create_round(format!("query {i}"));
        }
        assert!(wait_for(
            || compactor
                .get_compaction()
                .map(|c| c.end_index > first_end)
                .unwrap_or(false),
            Duration::from_secs(5),
        ));
        let second = compactor.get_compaction().unwrap();
        assert!(second.end_index <= store.total_rounds() - 1);

        compactor.shutdown(Duration::from_secs(1));
    }

    #[test]
    fn below_threshold_never_triggers() {
        let store = seeded_store(3);
        let summarizer = Arc::new(CountingSummarizer {
            calls: AtomicUsize::new(0),
            fail_first: false,
        });
        let compactor = RoundCompactor::attach("Planner", 3, 1, &store, summarizer);
        std::thread::sleep(Duration::from_millis(100));
        assert!(compactor.get_compaction().is_none());
        compactor.shutdown(Duration::from_secs(1));
    }

    #[test]
    fn failed_cycle_keeps_previous_and_retries() {
        let store = seeded_store(5);
        let summarizer = Arc::new(CountingSummarizer {
            calls: AtomicUsize::new(0),
            fail_first: true,
        });
        let compactor = RoundCompactor::attach("Planner", 3, 1, &store, Arc::clone(&summarizer) as _);

        // first cycle fails silently
        assert!(wait_for(
            || summarizer.calls.load(Ordering::SeqCst) >= 1,
            Duration::from_secs(5),
        ));
        assert!(compactor.get_compaction().is_none());

        // growth re-triggers and the retry succeeds
        for i in 5..10 {
            store.create_round(format!("query {i}"));
        }
        assert!(wait_for(
            || compactor.get_compaction().is_some(),
            Duration::from_secs(5),
        ));
        compactor.shutdown(Duration::from_secs(1));
    }
}
