use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tracing::warn;

use crate::event::{Event, SessionEvent};
use crate::proxy::PostProxy;

#[derive(Debug, Error)]
pub enum EventError {
    /// Emission for a post after its `post_end`, a programming error in
    /// the emitting role.
    #[error("Post already ended: {0}")]
    PostClosed(String),
}

/// Subscriber callback. Handlers run synchronously on the emitting thread;
/// they must not block and must queue internally if they need to. A
/// returned error is logged and swallowed so other handlers still run.
pub trait EventHandler: Send + Sync {
    fn on_event(&self, event: &Event) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlerId(u64);

struct Registered {
    id: HandlerId,
    handler: Arc<dyn EventHandler>,
}

/// Scoped, typed publish/subscribe pipeline for one session.
///
/// The handler list is copied on emit so no lock is held while user code
/// runs. Per post id, subscribers observe events in emission order because
/// dispatch happens inline on the emitter's thread.
pub struct EventBus {
    handlers: Mutex<Vec<Registered>>,
    next_handler: Mutex<u64>,
    open_posts: Mutex<HashSet<String>>,
    closed_posts: Mutex<HashSet<String>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            handlers: Mutex::new(Vec::new()),
            next_handler: Mutex::new(0),
            open_posts: Mutex::new(HashSet::new()),
            closed_posts: Mutex::new(HashSet::new()),
        }
    }

    pub fn subscribe(&self, handler: Arc<dyn EventHandler>) -> HandlerId {
        let mut next = self.next_handler.lock().unwrap();
        let id = HandlerId(*next);
        *next += 1;
        self.handlers.lock().unwrap().push(Registered { id, handler });
        id
    }

    pub fn unsubscribe(&self, id: HandlerId) {
        self.handlers.lock().unwrap().retain(|r| r.id != id);
    }

    /// Publish an event to all subscribers.
    ///
    /// Rejects post-scoped events for posts that already emitted
    /// `post_end`; everything else is delivered even when a handler fails.
    pub fn emit(&self, event: impl Into<Event>) -> Result<(), EventError> {
        let event = event.into();

        if let Some(post_id) = event.payload.post_id() {
            match &event.payload {
                SessionEvent::PostStart { .. } => {
                    self.open_posts.lock().unwrap().insert(post_id.to_string());
                }
                SessionEvent::PostEnd { .. } => {
                    if self.closed_posts.lock().unwrap().contains(post_id) {
                        return Err(EventError::PostClosed(post_id.to_string()));
                    }
                    self.open_posts.lock().unwrap().remove(post_id);
                    self.closed_posts.lock().unwrap().insert(post_id.to_string());
                }
                _ => {
                    if self.closed_posts.lock().unwrap().contains(post_id) {
                        return Err(EventError::PostClosed(post_id.to_string()));
                    }
                }
            }
        }

        // Copy-on-emit: never hold the registry lock across user code.
        let handlers: Vec<Arc<dyn EventHandler>> = self
            .handlers
            .lock()
            .unwrap()
            .iter()
            .map(|r| Arc::clone(&r.handler))
            .collect();

        for handler in handlers {
            if let Err(e) = handler.on_event(&event) {
                warn!(kind = event.payload.kind(), error = %e, "event handler failed");
            }
        }
        Ok(())
    }

    pub fn emit_round_start(&self, round_id: &str) {
        let _ = self.emit(SessionEvent::RoundStart {
            round_id: round_id.to_string(),
        });
    }

    pub fn emit_round_end(&self, round_id: &str) {
        let _ = self.emit(SessionEvent::RoundEnd {
            round_id: round_id.to_string(),
        });
    }

    pub fn emit_round_error(&self, round_id: &str, message: &str) {
        let _ = self.emit(SessionEvent::RoundError {
            round_id: round_id.to_string(),
            message: message.to_string(),
        });
    }

    /// Open a streaming proxy for a new post authored by `role`.
    /// Emits `post_start` before returning.
    pub fn create_post_proxy(self: &Arc<Self>, role: &str, round_id: &str) -> PostProxy {
        PostProxy::open(Arc::clone(self), role, round_id)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
