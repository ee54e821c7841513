use serde::Serialize;
use serde_json::{Map, Value};

use plait_memory::AttachmentKind;

/// Scope an event applies to. Ordering guarantees hold per target id
/// within a scope; across scopes only round-brackets-posts is promised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    Session,
    Round,
    Post,
}

/// Typed session event payload.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    RoundStart {
        round_id: String,
    },
    RoundEnd {
        round_id: String,
    },
    RoundError {
        round_id: String,
        message: String,
    },
    PostStart {
        post_id: String,
        round_id: String,
        role: String,
    },
    PostEnd {
        post_id: String,
        error: Option<String>,
    },
    MessageUpdate {
        post_id: String,
        text: String,
        is_end: bool,
    },
    AttachmentStart {
        post_id: String,
        attachment_id: String,
        kind: AttachmentKind,
    },
    AttachmentUpdate {
        post_id: String,
        attachment_id: String,
        content: String,
        is_end: bool,
    },
    SendToUpdate {
        post_id: String,
        send_to: String,
    },
    StatusUpdate {
        post_id: String,
        status: String,
    },
    ExecutionOutput {
        post_id: String,
        stream: String,
        text: String,
    },
    ConfirmRequest {
        post_id: String,
        round_id: String,
        code: String,
    },
}

impl SessionEvent {
    pub fn scope(&self) -> Scope {
        match self {
            SessionEvent::RoundStart { .. }
            | SessionEvent::RoundEnd { .. }
            | SessionEvent::RoundError { .. } => Scope::Round,
            _ => Scope::Post,
        }
    }

    /// Stable snake_case name used on external wires.
    pub fn kind(&self) -> &'static str {
        match self {
            SessionEvent::RoundStart { .. } => "round_start",
            SessionEvent::RoundEnd { .. } => "round_end",
            SessionEvent::RoundError { .. } => "round_error",
            SessionEvent::PostStart { .. } => "post_start",
            SessionEvent::PostEnd { .. } => "post_end",
            SessionEvent::MessageUpdate { .. } => "message_update",
            SessionEvent::AttachmentStart { .. } => "attachment_start",
            SessionEvent::AttachmentUpdate { .. } => "attachment_update",
            SessionEvent::SendToUpdate { .. } => "send_to_update",
            SessionEvent::StatusUpdate { .. } => "status_update",
            SessionEvent::ExecutionOutput { .. } => "execution_output",
            SessionEvent::ConfirmRequest { .. } => "confirm_request",
        }
    }

    /// Id of the entity this event targets (round id or post id).
    pub fn target_id(&self) -> &str {
        match self {
            SessionEvent::RoundStart { round_id }
            | SessionEvent::RoundEnd { round_id }
            | SessionEvent::RoundError { round_id, .. } => round_id,
            SessionEvent::PostStart { post_id, .. }
            | SessionEvent::PostEnd { post_id, .. }
            | SessionEvent::MessageUpdate { post_id, .. }
            | SessionEvent::AttachmentStart { post_id, .. }
            | SessionEvent::AttachmentUpdate { post_id, .. }
            | SessionEvent::SendToUpdate { post_id, .. }
            | SessionEvent::StatusUpdate { post_id, .. }
            | SessionEvent::ExecutionOutput { post_id, .. }
            | SessionEvent::ConfirmRequest { post_id, .. } => post_id,
        }
    }

    /// Post id the event belongs to, when post-scoped.
    pub fn post_id(&self) -> Option<&str> {
        match self.scope() {
            Scope::Post => Some(self.target_id()),
            _ => None,
        }
    }
}

/// A payload plus free-form extras carried to subscribers unchanged.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    #[serde(flatten)]
    pub payload: SessionEvent,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extras: Map<String, Value>,
}

impl Event {
    pub fn new(payload: SessionEvent) -> Self {
        Self {
            payload,
            extras: Map::new(),
        }
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extras.insert(key.into(), value);
        self
    }
}

impl From<SessionEvent> for Event {
    fn from(payload: SessionEvent) -> Self {
        Event::new(payload)
    }
}
