//! Kernel wire protocol: newline-delimited JSON frames on the child's
//! stdin (requests) and stdout (messages).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Server -> kernel request.
/// Wire: `{ "op": "execute", "exec_id": "e1", "code": "..." }`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum KernelRequest {
    Execute {
        exec_id: String,
        code: String,
    },
    /// Inject plugin source over the privileged control channel.
    RegisterPlugin {
        name: String,
        source: String,
        #[serde(default)]
        config: Map<String, Value>,
    },
    UpdateVariables {
        variables: Map<String, Value>,
    },
    ListVariables,
    Interrupt,
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecState {
    Busy,
    Idle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamName {
    Stdout,
    Stderr,
}

impl StreamName {
    pub fn as_str(self) -> &'static str {
        match self {
            StreamName::Stdout => "stdout",
            StreamName::Stderr => "stderr",
        }
    }
}

/// One `(mime, content)` pair of a rich display payload. Image mimes carry
/// base64 content; text mimes carry the text itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MimeBundle {
    pub mime: String,
    pub content: String,
}

/// A kernel-side variable snapshot entry. `kind` distinguishes plain data
/// from modules, functions, and plugin instances so the session can keep
/// only user-facing state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableEntry {
    pub name: String,
    pub repr: String,
    pub kind: String,
}

/// Kernel -> server message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum KernelMessage {
    /// Sent exactly once when the kernel is ready to execute.
    Ready,
    Status {
        exec_id: String,
        state: ExecState,
    },
    Stream {
        exec_id: String,
        name: StreamName,
        text: String,
    },
    DisplayData {
        exec_id: String,
        data: Vec<MimeBundle>,
    },
    ExecuteResult {
        exec_id: String,
        data: Vec<MimeBundle>,
    },
    Error {
        exec_id: String,
        ename: String,
        evalue: String,
        #[serde(default)]
        traceback: Vec<String>,
    },
    Log {
        level: String,
        tag: String,
        message: String,
    },
    PluginReply {
        name: String,
        ok: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Variables {
        entries: Vec<VariableEntry>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_wire_shape() {
        let req = KernelRequest::Execute {
            exec_id: "e1".to_string(),
            code: "print('hello')".to_string(),
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains(r#""op":"execute""#));
        assert!(json.contains(r#""exec_id":"e1""#));
    }

    #[test]
    fn message_round_trip() {
        let json = r#"{"type":"stream","exec_id":"e1","name":"stdout","text":"hello\n"}"#;
        let msg: KernelMessage = serde_json::from_str(json).unwrap();
        match msg {
            KernelMessage::Stream {
                exec_id,
                name,
                text,
            } => {
                assert_eq!(exec_id, "e1");
                assert_eq!(name, StreamName::Stdout);
                assert_eq!(text, "hello\n");
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn status_idle_parses() {
        let json = r#"{"type":"status","exec_id":"e1","state":"idle"}"#;
        let msg: KernelMessage = serde_json::from_str(json).unwrap();
        assert!(matches!(
            msg,
            KernelMessage::Status {
                state: ExecState::Idle,
                ..
            }
        ));
    }
}
