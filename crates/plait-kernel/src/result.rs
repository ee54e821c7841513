use serde::{Deserialize, Serialize};

use crate::protocol::MimeBundle;

/// A file produced by an execution, with the metadata the HTTP surface
/// serves alongside the bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub name: String,
    #[serde(rename = "type")]
    pub artifact_type: String,
    pub mime_type: String,
    pub original_name: String,
    pub file_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_content: Option<String>,
    #[serde(default)]
    pub preview: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    pub level: String,
    pub tag: String,
    pub message: String,
}

/// Outcome of one code execution, kernel-level failures included:
/// a failed execution is still a result (`is_success = false`), not a
/// transport error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub execution_id: String,
    pub code: String,
    pub is_success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Rich output (mime, content) pairs from display/execute-result
    /// messages.
    #[serde(default)]
    pub output: Vec<MimeBundle>,
    /// Raw stdout chunks in kernel emission order, uncoalesced.
    #[serde(default)]
    pub stdout: Vec<String>,
    #[serde(default)]
    pub stderr: Vec<String>,
    #[serde(default)]
    pub log: Vec<LogRecord>,
    #[serde(default)]
    pub artifacts: Vec<Artifact>,
    /// `(name, short_repr)` pairs of user variables after the execution.
    #[serde(default)]
    pub variables: Vec<(String, String)>,
}

impl ExecutionResult {
    pub fn new(execution_id: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            execution_id: execution_id.into(),
            code: code.into(),
            is_success: true,
            error: None,
            output: Vec::new(),
            stdout: Vec::new(),
            stderr: Vec::new(),
            log: Vec::new(),
            artifacts: Vec::new(),
            variables: Vec::new(),
        }
    }

    /// Concatenated text output: rich text/plain parts, else stdout.
    pub fn text_output(&self) -> String {
        let rich: String = self
            .output
            .iter()
            .filter(|b| b.mime == "text/plain")
            .map(|b| b.content.as_str())
            .collect();
        if rich.is_empty() {
            self.stdout.concat()
        } else {
            rich
        }
    }
}
