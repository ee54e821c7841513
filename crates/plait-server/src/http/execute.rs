use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    response::IntoResponse,
    Json,
};
use futures_util::Stream;
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info};
use uuid::Uuid;

use plait_kernel::{ExecutionResult, KernelError, ManagerError, OutputCallback};

use crate::app::AppState;
use crate::error::ApiError;
use crate::stream::{StreamEntry, StreamFrame};

#[derive(Debug, Deserialize)]
pub struct ExecuteBody {
    pub exec_id: Option<String>,
    pub code: String,
    #[serde(default)]
    pub stream: bool,
}

/// POST /api/v1/sessions/{id}/execute
///
/// `stream = false` blocks and returns the full `ExecutionResult`;
/// `stream = true` answers 202 with the SSE stream URL and runs the
/// execution on a spawned task. Kernel-level failures (including the soft
/// deadline) are 200 bodies with `is_success = false`.
pub async fn execute_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<ExecuteBody>,
) -> Result<axum::response::Response, ApiError> {
    let exec_id = body
        .exec_id
        .unwrap_or_else(|| format!("exec-{}", Uuid::new_v4().simple()));

    if !body.stream {
        let result = run_execution(&state, &id, &exec_id, &body.code, None).await?;
        return Ok(Json(result).into_response());
    }

    // Stream mode: validate the session before promising a stream.
    state.manager.get(&id)?;
    let entry = state.streams.open(&id, &exec_id);
    let stream_url = format!("/api/v1/sessions/{id}/execute/{exec_id}/stream");

    let task_state = Arc::clone(&state);
    let task_entry = Arc::clone(&entry);
    let session_id = id.clone();
    let task_exec_id = exec_id.clone();
    let code = body.code.clone();
    tokio::spawn(async move {
        let sink_entry = Arc::clone(&task_entry);
        let sink: OutputCallback = Arc::new(move |stream, text| {
            sink_entry.send(StreamFrame::Output {
                stream: stream.to_string(),
                text: text.to_string(),
            });
        });
        match run_execution(&task_state, &session_id, &task_exec_id, &code, Some(sink)).await {
            Ok(result) => task_entry.finish(result),
            Err(e) => {
                // Transport-level loss: still close the stream with a
                // failed result so `done` is always observed.
                error!(session_id, exec_id = %task_exec_id, error = %e, "streamed execution failed");
                let mut result = ExecutionResult::new(task_exec_id.clone(), code);
                result.is_success = false;
                result.error = Some(e.to_string());
                task_entry.finish(result);
            }
        }
    });

    info!(session_id = %id, exec_id, "execution accepted for streaming");
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "exec_id": exec_id, "stream_url": stream_url })),
    )
        .into_response())
}

/// Run one execution, folding the soft deadline into a failed result.
async fn run_execution(
    state: &AppState,
    session_id: &str,
    exec_id: &str,
    code: &str,
    sink: Option<OutputCallback>,
) -> Result<ExecutionResult, ApiError> {
    match state.manager.execute(session_id, exec_id, code, sink).await {
        Ok(result) => Ok(result),
        Err(ManagerError::Kernel(KernelError::Timeout { secs })) => {
            let mut result = ExecutionResult::new(exec_id, code);
            result.is_success = false;
            result.error = Some(format!("Execution timed out after {secs}s"));
            Ok(result)
        }
        Err(e) => Err(e.into()),
    }
}

/// GET /api/v1/sessions/{id}/execute/{exec_id}/stream
///
/// One logical stream per exec_id, events in kernel order, `done` always
/// sent. Late subscribers join at the current tail; a finished execution
/// replays only the terminal `result` + `done` pair.
pub async fn stream_handler(
    State(state): State<Arc<AppState>>,
    Path((id, exec_id)): Path<(String, String)>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let entry = state
        .streams
        .get(&id, &exec_id)
        .ok_or_else(|| ApiError::NotFound {
            code: "STREAM_NOT_FOUND",
            detail: format!("no stream for execution {exec_id}"),
        })?;

    let stream = sse_frames(entry);
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

fn sse_frames(entry: Arc<StreamEntry>) -> impl Stream<Item = Result<Event, Infallible>> {
    async_stream::stream! {
        // Subscribe before checking the finished slot so a finish racing
        // this attach cannot be missed entirely.
        let mut rx = entry.subscribe();
        if let Some(result) = entry.finished_result() {
            yield Ok(result_event(&result));
            yield Ok(Event::default().event("done").data("{}"));
            return;
        }
        loop {
            match rx.recv().await {
                Ok(StreamFrame::Output { stream, text }) => {
                    let data = json!({ "type": stream, "text": text }).to_string();
                    yield Ok(Event::default().event("output").data(data));
                }
                Ok(StreamFrame::Result(result)) => {
                    yield Ok(result_event(&result));
                }
                Ok(StreamFrame::Done) => {
                    yield Ok(Event::default().event("done").data("{}"));
                    break;
                }
                // lagged consumers resume at the tail, no replay
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}

fn result_event(result: &ExecutionResult) -> Event {
    let data = serde_json::to_string(result).unwrap_or_else(|_| "{}".to_string());
    Event::default().event("result").data(data)
}
