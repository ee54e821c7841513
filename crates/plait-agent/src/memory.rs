//! A role's window onto the conversation: raw recent rounds plus the
//! compacted summary of everything older.

use std::collections::HashMap;
use std::sync::Arc;

use plait_memory::{
    CompactedMessage, ConversationStore, MemoryError, Round, RoundCompactor, RoundState,
};

use crate::provider::{ChatMessage, ChatRole};

/// The store plus the per-role compactors that watch it.
pub struct Memory {
    store: Arc<ConversationStore>,
    compactors: HashMap<String, Arc<RoundCompactor>>,
}

/// What a role sees when assembling its prompt: the summary (if any)
/// spliced before the rounds it does not cover.
pub struct RoleView {
    pub compacted: Option<CompactedMessage>,
    pub rounds: Vec<Round>,
}

impl Memory {
    pub fn new(store: Arc<ConversationStore>) -> Self {
        Self {
            store,
            compactors: HashMap::new(),
        }
    }

    pub fn store(&self) -> &Arc<ConversationStore> {
        &self.store
    }

    pub fn add_compactor(&mut self, compactor: Arc<RoundCompactor>) {
        self.compactors
            .insert(compactor.role().to_string(), compactor);
    }

    pub fn compactors(&self) -> impl Iterator<Item = &Arc<RoundCompactor>> {
        self.compactors.values()
    }

    pub fn get_compaction(&self, role: &str) -> Option<CompactedMessage> {
        self.compactors.get(role)?.get_compaction()
    }

    /// Rounds involving `role`, restricted to those *after* the current
    /// summary's `end_index`; compaction replaces, so repeated reads are
    /// idempotent.
    pub fn role_view(&self, role: &str, include_failures: bool) -> Result<RoleView, MemoryError> {
        if !self.store.is_registered_role(role) {
            return Err(MemoryError::UnknownRole(role.to_string()));
        }
        let compacted = self.get_compaction(role);
        let skip = compacted.as_ref().map(|c| c.end_index).unwrap_or(0);

        let rounds = self
            .store
            .rounds_snapshot()
            .into_iter()
            .skip(skip)
            .filter(|r| include_failures || r.state != RoundState::Failed)
            .filter_map(|r| {
                let posts: Vec<_> = r.posts_for_role(role).cloned().collect();
                if posts.is_empty() {
                    return None;
                }
                let mut round = r;
                round.posts = posts;
                Some(round)
            })
            .collect();

        Ok(RoleView { compacted, rounds })
    }
}

impl RoleView {
    /// Render into chat messages from `self_role`'s perspective: own
    /// posts become assistant turns, everyone else's become user turns,
    /// and the summary leads as a system message.
    pub fn to_chat_messages(&self, self_role: &str) -> Vec<ChatMessage> {
        let mut messages = Vec::new();
        if let Some(compacted) = &self.compacted {
            messages.push(ChatMessage::system(format!(
                "Summary of rounds 1-{}:\n{}",
                compacted.end_index, compacted.summary
            )));
        }
        for round in &self.rounds {
            for post in &round.posts {
                let role = if post.send_from == self_role {
                    ChatRole::Assistant
                } else {
                    ChatRole::User
                };
                messages.push(ChatMessage {
                    role,
                    content: format!("[{} -> {}] {}", post.send_from, post.send_to, post.message),
                });
            }
        }
        messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plait_memory::{Post, SummaryError, SummaryInput, Summarizer};
    use std::time::{Duration, Instant};

    struct JoiningSummarizer;

    impl Summarizer for JoiningSummarizer {
        fn summarize(&self, input: &SummaryInput) -> Result<String, SummaryError> {
            let queries: Vec<&str> = input
                .rounds
                .iter()
                .map(|r| r.user_query.as_str())
                .collect();
            Ok(format!("covered: {}", queries.join(", ")))
        }
    }

    fn seed(store: &Arc<ConversationStore>, n: usize) {
        for i in 0..n {
            let round = store.create_round(format!("q{i}"));
            let mut post = Post::new("User");
            post.send_to = "Planner".to_string();
            post.message = format!("q{i}");
            store.append_post(&round.id, post).unwrap();
        }
    }

    #[test]
    fn role_view_splices_summary_before_recent_rounds() {
        let store = Arc::new(ConversationStore::new());
        store.register_roles(["Planner"]);
        seed(&store, 5);

        let mut memory = Memory::new(Arc::clone(&store));
        let compactor =
            RoundCompactor::attach("Planner", 3, 1, &store, Arc::new(JoiningSummarizer));
        memory.add_compactor(Arc::clone(&compactor));

        // wait for the catch-up cycle to land at end_index 4
        let deadline = Instant::now() + Duration::from_secs(5);
        while memory.get_compaction("Planner").map(|c| c.end_index) != Some(4) {
            assert!(Instant::now() < deadline, "compaction never completed");
            std::thread::sleep(Duration::from_millis(10));
        }

        let view = memory.role_view("Planner", false).unwrap();
        let compacted = view.compacted.as_ref().unwrap();
        assert_eq!(compacted.end_index, 4);
        assert_eq!(view.rounds.len(), 1);
        assert_eq!(view.rounds[0].user_query, "q4");

        let messages = view.to_chat_messages("Planner");
        assert!(messages[0].content.contains("Summary of rounds 1-4"));
        assert!(messages[0].content.contains("q0"));
        // only the last round remains as a raw turn
        assert!(messages[1].content.contains("q4"));
        assert_eq!(messages.len(), 2);

        compactor.shutdown(Duration::from_secs(1));
    }

    #[test]
    fn role_view_without_compactor_returns_everything() {
        let store = Arc::new(ConversationStore::new());
        store.register_roles(["Planner"]);
        seed(&store, 3);
        let memory = Memory::new(store);
        let view = memory.role_view("Planner", false).unwrap();
        assert!(view.compacted.is_none());
        assert_eq!(view.rounds.len(), 3);
    }

    #[test]
    fn unknown_role_is_rejected() {
        let memory = Memory::new(Arc::new(ConversationStore::new()));
        assert!(matches!(
            memory.role_view("Stranger", false),
            Err(MemoryError::UnknownRole(_))
        ));
    }
}
