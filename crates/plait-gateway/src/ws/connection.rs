use axum::{
    extract::{ws::Message, ws::WebSocket, Path, State, WebSocketUpgrade},
    response::IntoResponse,
};
use base64::Engine;
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

use plait_agent::AgentSession;
use plait_core::config::MAX_PAYLOAD_BYTES;
use plait_protocol::{ClientFrame, FileRef, ServerFrame};

use crate::app::AppState;
use crate::ws::forward::{message_complete, ForwardHandler};
use crate::ws::replay::history_frames;

/// Axum handler — upgrades HTTP to WebSocket at GET /ws/{session_id}.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(session_id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, session_id, state))
}

/// Per-connection task — lives for the entire duplex session lifetime.
async fn handle_connection(socket: WebSocket, session_id: String, state: Arc<AppState>) {
    let (mut tx, mut rx) = socket.split();

    let session = match state.session(&session_id) {
        Ok(session) => session,
        Err(e) => {
            warn!(session_id, error = %e, "session build failed");
            let _ = send_frame(
                &mut tx,
                &ServerFrame::Error {
                    message: e.to_string(),
                },
            )
            .await;
            return;
        }
    };
    info!(session_id, "duplex connection opened");

    // connected, then full history replay, then live streaming
    let _ = send_frame(
        &mut tx,
        &ServerFrame::Connected {
            session_id: session_id.clone(),
        },
    )
    .await;
    for frame in history_frames(&session.memory().store().rounds_snapshot()) {
        if send_frame(&mut tx, &frame).await.is_err() {
            return;
        }
    }
    let _ = send_frame(&mut tx, &ServerFrame::HistoryComplete {}).await;

    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ServerFrame>();
    let handler_id = session.subscribe(Arc::new(ForwardHandler::new(out_tx.clone())));

    loop {
        tokio::select! {
            // client sent us something
            msg = rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let text_ref: &str = &text;
                        if text_ref.len() > MAX_PAYLOAD_BYTES {
                            warn!(session_id, size = text_ref.len(), "payload too large, dropping");
                            break;
                        }
                        handle_client_frame(text_ref, &session, &out_tx);
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = tx.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    _ => {}
                }
            }

            // bus event or turn outcome → forward to this client
            frame = out_rx.recv() => {
                match frame {
                    Some(frame) => {
                        if send_frame(&mut tx, &frame).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }

    session.unsubscribe(handler_id);
    info!(session_id, "duplex connection closed");
}

/// Dispatch one inbound frame. Turns run on the blocking pool; their
/// outcome frames travel through the same outbound queue as bus events.
fn handle_client_frame(
    text: &str,
    session: &Arc<AgentSession>,
    out_tx: &mpsc::UnboundedSender<ServerFrame>,
) {
    let frame: ClientFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            let _ = out_tx.send(ServerFrame::Error {
                message: format!("malformed frame: {e}"),
            });
            return;
        }
    };

    match frame {
        ClientFrame::SendMessage { message, files } => {
            if session.is_busy() {
                let _ = out_tx.send(ServerFrame::Error {
                    message: "a turn is already in flight".to_string(),
                });
                return;
            }

            // Uploads go through the blocking execution client, so the
            // whole turn (attachments included) runs on the blocking pool.
            let session = Arc::clone(session);
            let out_tx = out_tx.clone();
            tokio::task::spawn_blocking(move || {
                for FileRef {
                    filename,
                    content_b64,
                } in files
                {
                    if let Err(e) = upload(&session, &filename, &content_b64) {
                        let _ = out_tx.send(ServerFrame::Error { message: e });
                        return;
                    }
                }
                match session.send_message(&message) {
                    Ok(round) => {
                        let _ = out_tx.send(message_complete(&round));
                    }
                    Err(e) => {
                        // round_error/round_end already went out on the bus;
                        // this is the connection-level terminal error frame
                        let _ = out_tx.send(ServerFrame::Error {
                            message: e.to_string(),
                        });
                    }
                }
            });
        }

        // multiplexed confirmations are always accepted, mid-turn included
        ClientFrame::Confirm { approved } => {
            session.provide_confirmation(approved);
        }

        ClientFrame::UploadFile {
            filename,
            content_b64,
        } => {
            let session = Arc::clone(session);
            let out_tx = out_tx.clone();
            tokio::task::spawn_blocking(move || {
                if let Err(e) = upload(&session, &filename, &content_b64) {
                    let _ = out_tx.send(ServerFrame::Error { message: e });
                }
            });
        }
    }
}

fn upload(session: &AgentSession, filename: &str, content_b64: &str) -> Result<(), String> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(content_b64.trim())
        .map_err(|e| format!("invalid base64 for '{filename}': {e}"))?;
    session
        .upload_file(filename, &bytes)
        .map_err(|e| format!("upload of '{filename}' failed: {e}"))
}

/// Serialize and send a frame over the WS sink.
async fn send_frame(
    tx: &mut SplitSink<WebSocket, Message>,
    frame: &ServerFrame,
) -> Result<(), axum::Error> {
    let json = serde_json::to_string(frame).unwrap_or_default();
    tx.send(Message::Text(json.into()))
        .await
        .map_err(axum::Error::new)
}
