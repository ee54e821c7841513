use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Closed set of attachment kinds understood by this version of the core.
///
/// Unknown kinds deserialize to [`AttachmentKind::Unknown`]; loaders strip
/// those attachments so newer peers can add kinds without breaking us.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentKind {
    Plan,
    CurrentPlanStep,
    PlanReasoning,
    Stop,
    Thought,
    ReplyType,
    ReplyContent,
    Verification,
    CodeError,
    ExecutionStatus,
    ExecutionResult,
    ArtifactPaths,
    ReviseMessage,
    Function,
    SessionVariables,
    SharedMemoryEntry,
    InvalidResponse,
    Text,
    ImageUrl,
    #[serde(other)]
    Unknown,
}

impl AttachmentKind {
    /// Stable snake_case name used on external wires.
    pub fn as_str(self) -> &'static str {
        match self {
            AttachmentKind::Plan => "plan",
            AttachmentKind::CurrentPlanStep => "current_plan_step",
            AttachmentKind::PlanReasoning => "plan_reasoning",
            AttachmentKind::Stop => "stop",
            AttachmentKind::Thought => "thought",
            AttachmentKind::ReplyType => "reply_type",
            AttachmentKind::ReplyContent => "reply_content",
            AttachmentKind::Verification => "verification",
            AttachmentKind::CodeError => "code_error",
            AttachmentKind::ExecutionStatus => "execution_status",
            AttachmentKind::ExecutionResult => "execution_result",
            AttachmentKind::ArtifactPaths => "artifact_paths",
            AttachmentKind::ReviseMessage => "revise_message",
            AttachmentKind::Function => "function",
            AttachmentKind::SessionVariables => "session_variables",
            AttachmentKind::SharedMemoryEntry => "shared_memory_entry",
            AttachmentKind::InvalidResponse => "invalid_response",
            AttachmentKind::Text => "text",
            AttachmentKind::ImageUrl => "image_url",
            AttachmentKind::Unknown => "unknown",
        }
    }
}

/// A typed payload attached to a [`Post`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: AttachmentKind,
    pub content: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

impl Attachment {
    pub fn new(kind: AttachmentKind, content: impl Into<String>) -> Self {
        Self {
            id: format!("atta-{}", short_id()),
            kind,
            content: content.into(),
            extra: Map::new(),
        }
    }
}

/// A single directed message within a round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub send_from: String,
    #[serde(default = "unknown_role")]
    pub send_to: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

impl Post {
    pub fn new(send_from: impl Into<String>) -> Self {
        Self {
            id: format!("post-{}", short_id()),
            send_from: send_from.into(),
            send_to: unknown_role(),
            message: String::new(),
            attachments: Vec::new(),
        }
    }

    /// Load a post from its serialized form, silently dropping attachments
    /// whose kind this version does not understand.
    pub fn from_value(value: Value) -> serde_json::Result<Self> {
        let mut post: Post = serde_json::from_value(value)?;
        post.attachments
            .retain(|a| a.kind != AttachmentKind::Unknown);
        Ok(post)
    }

    /// First attachment of the given kind, if any.
    pub fn attachment(&self, kind: AttachmentKind) -> Option<&Attachment> {
        self.attachments.iter().find(|a| a.kind == kind)
    }

    pub fn has_attachment(&self, kind: AttachmentKind) -> bool {
        self.attachment(kind).is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundState {
    Created,
    Finished,
    Failed,
}

impl RoundState {
    /// Transitions are monotonic: created -> (finished | failed).
    pub fn can_transition_to(self, next: RoundState) -> bool {
        matches!(
            (self, next),
            (RoundState::Created, RoundState::Finished) | (RoundState::Created, RoundState::Failed)
        )
    }
}

/// One user query and all ensuing posts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Round {
    pub id: String,
    pub user_query: String,
    pub state: RoundState,
    #[serde(default)]
    pub posts: Vec<Post>,
    pub created_at: DateTime<Utc>,
}

impl Round {
    pub fn new(user_query: impl Into<String>) -> Self {
        Self {
            id: format!("round-{}", short_id()),
            user_query: user_query.into(),
            state: RoundState::Created,
            posts: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// Posts sent by or addressed to `role`, in emission order.
    pub fn posts_for_role<'a>(&'a self, role: &str) -> impl Iterator<Item = &'a Post> {
        let role = role.to_string();
        self.posts
            .iter()
            .filter(move |p| p.send_from == role || p.send_to == role)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SharedScope {
    Round,
    Conversation,
}

/// Cross-role scratch data. Round-scoped entries are discarded when the
/// round they were written in finishes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SharedMemoryEntry {
    #[serde(rename = "type")]
    pub entry_type: String,
    pub scope: SharedScope,
    pub content: String,
}

/// A single summarization artifact for one (session, role) pair.
///
/// `start_index` is always 1; updates replace the prior value atomically and
/// `end_index` never decreases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompactedMessage {
    pub start_index: usize,
    pub end_index: usize,
    pub summary: String,
}

fn unknown_role() -> String {
    "Unknown".to_string()
}

fn short_id() -> String {
    Uuid::new_v4().simple().to_string()[..12].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn post_round_trips_through_serde() {
        let mut post = Post::new("Planner");
        post.send_to = "CodeInterpreter".to_string();
        post.message = "run this".to_string();
        post.attachments
            .push(Attachment::new(AttachmentKind::ReplyContent, "print(1)"));

        let value = serde_json::to_value(&post).unwrap();
        let back = Post::from_value(value).unwrap();
        assert_eq!(post, back);
    }

    #[test]
    fn unknown_attachment_kinds_are_dropped_on_load() {
        let value = json!({
            "id": "post-1",
            "send_from": "Planner",
            "send_to": "User",
            "message": "hi",
            "attachments": [
                {"id": "atta-1", "type": "thought", "content": "t"},
                {"id": "atta-2", "type": "hologram_projection", "content": "x"},
            ]
        });
        let post = Post::from_value(value).unwrap();
        assert_eq!(post.attachments.len(), 1);
        assert_eq!(post.attachments[0].kind, AttachmentKind::Thought);
    }

    #[test]
    fn send_to_defaults_to_unknown() {
        let post: Post =
            serde_json::from_value(json!({"id": "p", "send_from": "Planner"})).unwrap();
        assert_eq!(post.send_to, "Unknown");
    }

    #[test]
    fn round_state_transitions_are_monotonic() {
        assert!(RoundState::Created.can_transition_to(RoundState::Finished));
        assert!(RoundState::Created.can_transition_to(RoundState::Failed));
        assert!(!RoundState::Finished.can_transition_to(RoundState::Failed));
        assert!(!RoundState::Failed.can_transition_to(RoundState::Created));
    }
}
