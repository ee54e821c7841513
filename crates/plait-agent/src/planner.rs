//! The Planner: turns the conversation so far into a structured decision
//! `{thought, message, send_to}` and routes the round accordingly.

use std::sync::Arc;

use serde::Deserialize;
use tracing::debug;

use plait_memory::{AttachmentKind, Post};

use crate::error::RoleError;
use crate::provider::{ChatMessage, ChatModel, ChatRequest};
use crate::role::{Role, RoleInit, TurnContext};

#[derive(Debug, Deserialize)]
pub struct PlannerResponse {
    #[serde(default)]
    pub thought: String,
    pub message: String,
    pub send_to: String,
}

pub struct Planner {
    model: Arc<dyn ChatModel>,
    workers: Vec<String>,
}

impl Planner {
    pub fn build(init: &RoleInit<'_>) -> Box<dyn Role> {
        Box::new(Self {
            model: Arc::clone(&init.model),
            workers: init.workers.clone(),
        })
    }

    fn system_prompt(&self) -> String {
        format!(
            "You are the Planner of a code-first agent. Decompose the user's \
             request, delegate code work to a worker, and answer the user when \
             the work is done.\n\
             Available workers: {}.\n\
             Respond with exactly one JSON object: \
             {{\"thought\": \"...\", \"message\": \"...\", \"send_to\": \"...\"}} \
             where send_to is one of the workers or \"User\".",
            self.workers.join(", ")
        )
    }
}

impl Role for Planner {
    fn alias(&self) -> &str {
        "Planner"
    }

    fn reply(&mut self, ctx: &mut TurnContext<'_>) -> Result<Post, RoleError> {
        let view = ctx.memory.role_view(self.alias(), false)?;

        let mut messages = vec![ChatMessage::system(self.system_prompt())];
        messages.extend(view.to_chat_messages(self.alias()));
        let request = ChatRequest { messages };

        let proxy = ctx.bus.create_post_proxy(self.alias(), ctx.round_id);
        let raw = match self
            .model
            .reply(&request, &mut |delta| proxy.append_message(delta))
        {
            Ok(text) => text,
            Err(e) => {
                proxy.end(Some(e.to_string()));
                return Err(e.into());
            }
        };

        let parsed = match parse_planner_response(&raw) {
            Ok(parsed) => parsed,
            Err(reason) => {
                proxy.attachment(AttachmentKind::InvalidResponse, &raw);
                proxy.end(Some(reason.clone()));
                return Err(RoleError::InvalidResponse(reason));
            }
        };

        let valid_recipient =
            parsed.send_to == "User" || self.workers.iter().any(|w| w == &parsed.send_to);
        if !valid_recipient {
            let reason = format!("unknown recipient '{}'", parsed.send_to);
            proxy.attachment(AttachmentKind::InvalidResponse, &raw);
            proxy.end(Some(reason.clone()));
            return Err(RoleError::InvalidResponse(reason));
        }

        debug!(send_to = %parsed.send_to, "planner decision");
        if !parsed.thought.is_empty() {
            proxy.attachment(AttachmentKind::Thought, &parsed.thought);
        }
        proxy.set_send_to(&parsed.send_to);
        proxy.finish_message(&parsed.message);
        Ok(proxy.end(None))
    }
}

/// Extract the decision object from model text, tolerating code fences
/// and surrounding prose.
pub(crate) fn parse_planner_response(raw: &str) -> Result<PlannerResponse, String> {
    let trimmed = raw.trim();
    if let Ok(parsed) = serde_json::from_str::<PlannerResponse>(trimmed) {
        return Ok(parsed);
    }
    let start = trimmed.find('{');
    let end = trimmed.rfind('}');
    if let (Some(start), Some(end)) = (start, end) {
        if end > start {
            if let Ok(parsed) = serde_json::from_str::<PlannerResponse>(&trimmed[start..=end]) {
                return Ok(parsed);
            }
        }
    }
    Err("response is not a {thought, message, send_to} object".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_json_parses() {
        let parsed = parse_planner_response(
            r#"{"thought":"needs code","message":"write it","send_to":"CodeInterpreter"}"#,
        )
        .unwrap();
        assert_eq!(parsed.send_to, "CodeInterpreter");
        assert_eq!(parsed.thought, "needs code");
    }

    #[test]
    fn fenced_json_parses() {
        let raw = "Here is my plan:\n```json\n{\"message\":\"done\",\"send_to\":\"User\"}\n```";
        let parsed = parse_planner_response(raw).unwrap();
        assert_eq!(parsed.send_to, "User");
        assert_eq!(parsed.thought, "");
    }

    #[test]
    fn prose_without_json_is_rejected() {
        assert!(parse_planner_response("I think we should just chat.").is_err());
    }
}
