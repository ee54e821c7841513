use std::sync::{Arc, Mutex};

use plait_memory::{Attachment, AttachmentKind, Post};

use crate::bus::EventBus;
use crate::event::SessionEvent;

/// Streaming handle bound to a single post.
///
/// A role builds its post exclusively through the proxy so every mutation
/// reaches subscribers as an ordered delta. The proxy is consumed by
/// [`end`], which freezes and returns the finished [`Post`]; nothing can
/// be emitted for the post afterwards.
///
/// Message semantics: `append_message` accumulates deltas; a final
/// `finish_message` is the terminator and carries the authoritative full
/// text (consumers replace their buffer on `is_end`).
///
/// [`end`]: PostProxy::end
pub struct PostProxy {
    bus: Arc<EventBus>,
    round_id: String,
    draft: Mutex<Post>,
}

impl PostProxy {
    pub(crate) fn open(bus: Arc<EventBus>, role: &str, round_id: &str) -> Self {
        let draft = Post::new(role);
        let _ = bus.emit(SessionEvent::PostStart {
            post_id: draft.id.clone(),
            round_id: round_id.to_string(),
            role: role.to_string(),
        });
        Self {
            bus,
            round_id: round_id.to_string(),
            draft: Mutex::new(draft),
        }
    }

    pub fn post_id(&self) -> String {
        self.draft.lock().unwrap().id.clone()
    }

    pub fn round_id(&self) -> &str {
        &self.round_id
    }

    /// Append a streamed message delta.
    pub fn append_message(&self, delta: &str) {
        let post_id = {
            let mut draft = self.draft.lock().unwrap();
            draft.message.push_str(delta);
            draft.id.clone()
        };
        let _ = self.bus.emit(SessionEvent::MessageUpdate {
            post_id,
            text: delta.to_string(),
            is_end: false,
        });
    }

    /// Terminate the message stream with the definitive full text.
    pub fn finish_message(&self, text: &str) {
        let post_id = {
            let mut draft = self.draft.lock().unwrap();
            draft.message = text.to_string();
            draft.id.clone()
        };
        let _ = self.bus.emit(SessionEvent::MessageUpdate {
            post_id,
            text: text.to_string(),
            is_end: true,
        });
    }

    pub fn set_send_to(&self, send_to: &str) {
        let post_id = {
            let mut draft = self.draft.lock().unwrap();
            draft.send_to = send_to.to_string();
            draft.id.clone()
        };
        let _ = self.bus.emit(SessionEvent::SendToUpdate {
            post_id,
            send_to: send_to.to_string(),
        });
    }

    pub fn set_status(&self, status: &str) {
        let post_id = self.post_id();
        let _ = self.bus.emit(SessionEvent::StatusUpdate {
            post_id,
            status: status.to_string(),
        });
    }

    /// Add a complete attachment in one shot (start + terminal update).
    pub fn attachment(&self, kind: AttachmentKind, content: &str) -> String {
        let id = self.attachment_start(kind);
        self.attachment_update(&id, content, true);
        id
    }

    /// Open an incrementally-built attachment; returns its id.
    pub fn attachment_start(&self, kind: AttachmentKind) -> String {
        let (post_id, attachment_id) = {
            let mut draft = self.draft.lock().unwrap();
            let attachment = Attachment::new(kind, "");
            let id = attachment.id.clone();
            draft.attachments.push(attachment);
            (draft.id.clone(), id)
        };
        let _ = self.bus.emit(SessionEvent::AttachmentStart {
            post_id,
            attachment_id: attachment_id.clone(),
            kind,
        });
        attachment_id
    }

    /// Append content to an open attachment.
    pub fn attachment_update(&self, attachment_id: &str, content: &str, is_end: bool) {
        let post_id = {
            let mut draft = self.draft.lock().unwrap();
            if let Some(att) = draft.attachments.iter_mut().find(|a| a.id == attachment_id) {
                att.content.push_str(content);
            }
            draft.id.clone()
        };
        let _ = self.bus.emit(SessionEvent::AttachmentUpdate {
            post_id,
            attachment_id: attachment_id.to_string(),
            content: content.to_string(),
            is_end,
        });
    }

    /// Forward a live execution output chunk (stdout/stderr).
    pub fn execution_output(&self, stream: &str, text: &str) {
        let post_id = self.post_id();
        let _ = self.bus.emit(SessionEvent::ExecutionOutput {
            post_id,
            stream: stream.to_string(),
            text: text.to_string(),
        });
    }

    /// Emit `post_end` and hand back the frozen post.
    pub fn end(self, error: Option<String>) -> Post {
        let post = self.draft.into_inner().unwrap();
        let _ = self.bus.emit(SessionEvent::PostEnd {
            post_id: post.id.clone(),
            error,
        });
        post
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proxy_accumulates_the_draft() {
        let bus = Arc::new(EventBus::new());
        let proxy = bus.create_post_proxy("Planner", "round-1");
        proxy.append_message("partial ");
        proxy.finish_message("final text");
        proxy.set_send_to("CodeInterpreter");
        let att = proxy.attachment_start(AttachmentKind::ReplyContent);
        proxy.attachment_update(&att, "print(", false);
        proxy.attachment_update(&att, "1)", true);

        let post = proxy.end(None);
        assert_eq!(post.message, "final text");
        assert_eq!(post.send_to, "CodeInterpreter");
        assert_eq!(post.attachments.len(), 1);
        assert_eq!(post.attachments[0].content, "print(1)");
        assert_eq!(post.attachments[0].kind, AttachmentKind::ReplyContent);
    }

    #[test]
    fn one_shot_attachment_is_complete() {
        let bus = Arc::new(EventBus::new());
        let proxy = bus.create_post_proxy("CodeInterpreter", "round-1");
        proxy.attachment(AttachmentKind::ExecutionStatus, "SUCCESS");
        let post = proxy.end(None);
        assert_eq!(post.attachments[0].content, "SUCCESS");
    }
}
