use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::error::{MemoryError, Result};
use crate::types::{Post, Round, RoundState, SharedMemoryEntry, SharedScope};

/// Callback invoked after a round is appended, with the new round total.
pub type RoundAddedCallback = Arc<dyn Fn(usize) + Send + Sync>;

/// Thread-safe, append-only store of one session's conversation.
///
/// A single lock guards the interior; every read clones, so callers never
/// observe a torn round. Mutations are serialized by the same lock, which
/// keeps round indices contiguous and post order equal to emission order.
pub struct ConversationStore {
    inner: Mutex<Inner>,
    callbacks: Mutex<Vec<RoundAddedCallback>>,
}

struct Inner {
    rounds: Vec<Round>,
    roles: HashSet<String>,
    shared: Vec<SharedSlot>,
}

struct SharedSlot {
    entry: SharedMemoryEntry,
    /// Round the entry was written in; round-scoped entries die with it.
    round_id: String,
}

impl ConversationStore {
    pub fn new() -> Self {
        let mut roles = HashSet::new();
        // "User" and "Unknown" are implicit participants of every session.
        roles.insert("User".to_string());
        roles.insert("Unknown".to_string());
        Self {
            inner: Mutex::new(Inner {
                rounds: Vec::new(),
                roles,
                shared: Vec::new(),
            }),
            callbacks: Mutex::new(Vec::new()),
        }
    }

    /// Register the configured role aliases for this session.
    pub fn register_roles<I, S>(&self, aliases: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut inner = self.inner.lock().unwrap();
        for alias in aliases {
            inner.roles.insert(alias.into());
        }
    }

    pub fn is_registered_role(&self, alias: &str) -> bool {
        self.inner.lock().unwrap().roles.contains(alias)
    }

    /// Append a new round and notify round-added subscribers.
    ///
    /// Callbacks run outside the store lock, on the caller's thread.
    pub fn create_round(&self, user_query: impl Into<String>) -> Round {
        let round = Round::new(user_query);
        let total = {
            let mut inner = self.inner.lock().unwrap();
            inner.rounds.push(round.clone());
            inner.rounds.len()
        };
        debug!(round_id = %round.id, total, "round created");

        let callbacks = self.callbacks.lock().unwrap().clone();
        for cb in callbacks {
            cb(total);
        }
        round
    }

    /// Append a post to an existing round, preserving emission order.
    pub fn append_post(&self, round_id: &str, post: Post) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let round = find_round_mut(&mut inner.rounds, round_id)?;
        round.posts.push(post);
        Ok(())
    }

    /// Move a round to a terminal state. Transitions are monotonic;
    /// finishing also discards round-scoped shared memory.
    pub fn finish_round(&self, round_id: &str, state: RoundState) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let round = find_round_mut(&mut inner.rounds, round_id)?;
        if !round.state.can_transition_to(state) {
            return Err(MemoryError::InvalidTransition {
                round_id: round_id.to_string(),
                from: round.state,
                to: state,
            });
        }
        round.state = state;
        inner.shared.retain(|slot| {
            slot.entry.scope == SharedScope::Conversation || slot.round_id != round_id
        });
        Ok(())
    }

    /// Point-in-time snapshot of the full conversation.
    pub fn rounds_snapshot(&self) -> Vec<Round> {
        self.inner.lock().unwrap().rounds.clone()
    }

    pub fn total_rounds(&self) -> usize {
        self.inner.lock().unwrap().rounds.len()
    }

    pub fn round(&self, round_id: &str) -> Result<Round> {
        let inner = self.inner.lock().unwrap();
        inner
            .rounds
            .iter()
            .find(|r| r.id == round_id)
            .cloned()
            .ok_or_else(|| MemoryError::RoundNotFound(round_id.to_string()))
    }

    /// Rounds involving `role` as sender or receiver of at least one post.
    ///
    /// Failed rounds are excluded unless `include_failures` is set. The
    /// posts of each returned round are filtered to the role's view.
    pub fn role_rounds(&self, role: &str, include_failures: bool) -> Result<Vec<Round>> {
        let inner = self.inner.lock().unwrap();
        if !inner.roles.contains(role) {
            return Err(MemoryError::UnknownRole(role.to_string()));
        }
        let rounds = inner
            .rounds
            .iter()
            .filter(|r| include_failures || r.state != RoundState::Failed)
            .filter_map(|r| {
                let posts: Vec<Post> = r.posts_for_role(role).cloned().collect();
                if posts.is_empty() {
                    return None;
                }
                let mut round = r.clone();
                round.posts = posts;
                Some(round)
            })
            .collect();
        Ok(rounds)
    }

    pub fn register_callback(&self, cb: RoundAddedCallback) {
        self.callbacks.lock().unwrap().push(cb);
    }

    /// Write a shared-memory entry. Round-scoped entries bind to the most
    /// recent round and vanish when that round finishes.
    pub fn put_shared(&self, entry: SharedMemoryEntry) {
        let mut inner = self.inner.lock().unwrap();
        let round_id = inner
            .rounds
            .last()
            .map(|r| r.id.clone())
            .unwrap_or_default();
        inner.shared.push(SharedSlot { entry, round_id });
    }

    pub fn shared_entries(&self, entry_type: &str) -> Vec<SharedMemoryEntry> {
        let inner = self.inner.lock().unwrap();
        inner
            .shared
            .iter()
            .filter(|slot| slot.entry.entry_type == entry_type)
            .map(|slot| slot.entry.clone())
            .collect()
    }
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new()
    }
}

fn find_round_mut<'a>(rounds: &'a mut [Round], round_id: &str) -> Result<&'a mut Round> {
    rounds
        .iter_mut()
        .find(|r| r.id == round_id)
        .ok_or_else(|| MemoryError::RoundNotFound(round_id.to_string()))
}
