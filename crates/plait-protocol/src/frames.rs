use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A file carried alongside a user message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRef {
    pub filename: String,
    pub content_b64: String,
}

/// Client -> server frame.
/// Wire: `{ "type": "send_message", "message": "...", "files": [] }`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    SendMessage {
        message: String,
        #[serde(default)]
        files: Vec<FileRef>,
    },
    Confirm {
        approved: bool,
    },
    UploadFile {
        filename: String,
        content_b64: String,
    },
}

/// Server -> client frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Connected {
        session_id: String,
    },
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
        #[serde(default, skip_serializing_if = "Option::is_none")]
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
        attachment_type: String,
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
    MessageComplete {
        result: Value,
    },
    HistoryComplete {},
    Error {
        message: String,
    },
}
