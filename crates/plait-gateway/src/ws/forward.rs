//! Bus event -> duplex frame projection.

use serde_json::json;
use tokio::sync::mpsc::UnboundedSender;

use plait_events::{Event, EventHandler, SessionEvent};
use plait_protocol::ServerFrame;

/// Map a live session event onto its stable wire frame.
pub fn to_server_frame(event: &SessionEvent) -> ServerFrame {
    match event.clone() {
        SessionEvent::RoundStart { round_id } => ServerFrame::RoundStart { round_id },
        SessionEvent::RoundEnd { round_id } => ServerFrame::RoundEnd { round_id },
        SessionEvent::RoundError { round_id, message } => {
            ServerFrame::RoundError { round_id, message }
        }
        SessionEvent::PostStart {
            post_id,
            round_id,
            role,
        } => ServerFrame::PostStart {
            post_id,
            round_id,
            role,
        },
        SessionEvent::PostEnd { post_id, error } => ServerFrame::PostEnd { post_id, error },
        SessionEvent::MessageUpdate {
            post_id,
            text,
            is_end,
        } => ServerFrame::MessageUpdate {
            post_id,
            text,
            is_end,
        },
        SessionEvent::AttachmentStart {
            post_id,
            attachment_id,
            kind,
        } => ServerFrame::AttachmentStart {
            post_id,
            attachment_id,
            attachment_type: kind.as_str().to_string(),
        },
        SessionEvent::AttachmentUpdate {
            post_id,
            attachment_id,
            content,
            is_end,
        } => ServerFrame::AttachmentUpdate {
            post_id,
            attachment_id,
            content,
            is_end,
        },
        SessionEvent::SendToUpdate { post_id, send_to } => {
            ServerFrame::SendToUpdate { post_id, send_to }
        }
        SessionEvent::StatusUpdate { post_id, status } => {
            ServerFrame::StatusUpdate { post_id, status }
        }
        SessionEvent::ExecutionOutput {
            post_id,
            stream,
            text,
        } => ServerFrame::ExecutionOutput {
            post_id,
            stream,
            text,
        },
        SessionEvent::ConfirmRequest {
            post_id,
            round_id,
            code,
        } => ServerFrame::ConfirmRequest {
            post_id,
            round_id,
            code,
        },
    }
}

/// Bus subscriber that forwards every event into a connection's outbound
/// queue. The queue is unbounded so the handler never blocks the
/// emitting (orchestrator) thread.
pub struct ForwardHandler {
    tx: UnboundedSender<ServerFrame>,
}

impl ForwardHandler {
    pub fn new(tx: UnboundedSender<ServerFrame>) -> Self {
        Self { tx }
    }
}

impl EventHandler for ForwardHandler {
    fn on_event(&self, event: &Event) -> anyhow::Result<()> {
        self.tx
            .send(to_server_frame(&event.payload))
            .map_err(|_| anyhow::anyhow!("connection closed"))
    }
}

/// Frame sent after a turn completes, summarizing the round outcome.
pub fn message_complete(round: &plait_memory::Round) -> ServerFrame {
    ServerFrame::MessageComplete {
        result: json!({
            "round_id": round.id,
            "state": round.state,
            "posts": round.posts.len(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plait_memory::AttachmentKind;

    #[test]
    fn attachment_kind_maps_to_wire_name() {
        let frame = to_server_frame(&SessionEvent::AttachmentStart {
            post_id: "p1".to_string(),
            attachment_id: "a1".to_string(),
            kind: AttachmentKind::ReplyContent,
        });
        match frame {
            ServerFrame::AttachmentStart {
                attachment_type, ..
            } => assert_eq!(attachment_type, "reply_content"),
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn execution_output_keeps_stream_and_text() {
        let frame = to_server_frame(&SessionEvent::ExecutionOutput {
            post_id: "p1".to_string(),
            stream: "stderr".to_string(),
            text: "warning\n".to_string(),
        });
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains(r#""type":"execution_output""#));
        assert!(json.contains(r#""stream":"stderr""#));
    }
}
