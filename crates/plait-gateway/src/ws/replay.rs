//! History replay: rebuild the frame stream a live subscriber would have
//! seen, from the store's snapshot, so a reconnecting client converges
//! on the same UI state.

use plait_memory::{Round, RoundState};
use plait_protocol::ServerFrame;

/// Synthetic frames for the whole conversation, in emission order:
/// round brackets, post lifecycles, completed attachments, terminal
/// message updates.
pub fn history_frames(rounds: &[Round]) -> Vec<ServerFrame> {
    let mut frames = Vec::new();
    for round in rounds {
        frames.push(ServerFrame::RoundStart {
            round_id: round.id.clone(),
        });
        for post in &round.posts {
            frames.push(ServerFrame::PostStart {
                post_id: post.id.clone(),
                round_id: round.id.clone(),
                role: post.send_from.clone(),
            });
            frames.push(ServerFrame::SendToUpdate {
                post_id: post.id.clone(),
                send_to: post.send_to.clone(),
            });
            for attachment in &post.attachments {
                frames.push(ServerFrame::AttachmentStart {
                    post_id: post.id.clone(),
                    attachment_id: attachment.id.clone(),
                    attachment_type: attachment.kind.as_str().to_string(),
                });
                frames.push(ServerFrame::AttachmentUpdate {
                    post_id: post.id.clone(),
                    attachment_id: attachment.id.clone(),
                    content: attachment.content.clone(),
                    is_end: true,
                });
            }
            frames.push(ServerFrame::MessageUpdate {
                post_id: post.id.clone(),
                text: post.message.clone(),
                is_end: true,
            });
            frames.push(ServerFrame::PostEnd {
                post_id: post.id.clone(),
                error: None,
            });
        }
        if round.state == RoundState::Failed {
            frames.push(ServerFrame::RoundError {
                round_id: round.id.clone(),
                message: "round failed".to_string(),
            });
        }
        frames.push(ServerFrame::RoundEnd {
            round_id: round.id.clone(),
        });
    }
    frames
}
