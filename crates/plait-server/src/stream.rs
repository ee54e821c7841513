//! Per-execution fan-out for the SSE endpoint.
//!
//! Each streamed execution gets a broadcast channel; SSE subscribers join
//! at the current tail (no replay). Once the execution finishes, the
//! terminal `result` + `done` pair is kept so late or reconnecting
//! subscribers still observe the outcome.

use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use tokio::sync::broadcast;

use plait_kernel::ExecutionResult;

const STREAM_CAPACITY: usize = 256;

/// One server-sent frame of an execution stream.
#[derive(Debug, Clone)]
pub enum StreamFrame {
    Output { stream: String, text: String },
    Result(Box<ExecutionResult>),
    Done,
}

pub struct StreamEntry {
    tx: broadcast::Sender<StreamFrame>,
    finished: Mutex<Option<ExecutionResult>>,
}

impl StreamEntry {
    fn new() -> Self {
        let (tx, _) = broadcast::channel(STREAM_CAPACITY);
        Self {
            tx,
            finished: Mutex::new(None),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StreamFrame> {
        self.tx.subscribe()
    }

    /// Push a live frame; silently dropped with no subscribers.
    pub fn send(&self, frame: StreamFrame) {
        let _ = self.tx.send(frame);
    }

    /// Record the terminal result and emit `result` + `done` to anyone
    /// already attached.
    pub fn finish(&self, result: ExecutionResult) {
        *self.finished.lock().unwrap() = Some(result.clone());
        let _ = self.tx.send(StreamFrame::Result(Box::new(result)));
        let _ = self.tx.send(StreamFrame::Done);
    }

    /// Terminal result, when the execution already completed.
    pub fn finished_result(&self) -> Option<ExecutionResult> {
        self.finished.lock().unwrap().clone()
    }
}

/// Registry keyed by `(session_id, exec_id)`.
#[derive(Default)]
pub struct StreamRegistry {
    entries: DashMap<String, Arc<StreamEntry>>,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(session_id: &str, exec_id: &str) -> String {
        format!("{session_id}/{exec_id}")
    }

    pub fn open(&self, session_id: &str, exec_id: &str) -> Arc<StreamEntry> {
        let entry = Arc::new(StreamEntry::new());
        self.entries
            .insert(Self::key(session_id, exec_id), Arc::clone(&entry));
        entry
    }

    pub fn get(&self, session_id: &str, exec_id: &str) -> Option<Arc<StreamEntry>> {
        self.entries
            .get(&Self::key(session_id, exec_id))
            .map(|e| Arc::clone(&e))
    }

    /// Drop all streams of a session (session delete path).
    pub fn remove_session(&self, session_id: &str) {
        let prefix = format!("{session_id}/");
        self.entries.retain(|key, _| !key.starts_with(&prefix));
    }
}
