//! The CodeInterpreter worker: generate code, verify it, optionally wait
//! for user approval, execute it remotely, and retry recoverable
//! failures within the round's budget.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use plait_events::PostProxy;
use plait_memory::{AttachmentKind, Post};

use crate::error::RoleError;
use crate::memory::RoleView;
use crate::provider::{ChatMessage, ChatModel, ChatRequest};
use crate::role::{Executor, Role, RoleInit, TurnContext};
use crate::verification::CodeVerifier;

/// Bound on a confirmation wait when no interactive UI answers promptly.
const CONFIRM_TIMEOUT: Duration = Duration::from_secs(600);

pub struct CodeInterpreter {
    model: Arc<dyn ChatModel>,
    executor: Arc<dyn Executor>,
    verifier: CodeVerifier,
    require_confirmation: bool,
    max_retry_count: u32,
    /// Retry budget is per round: (round_id, attempts already spent).
    budget: Option<(String, u32)>,
}

impl CodeInterpreter {
    pub fn build(init: &RoleInit<'_>) -> Box<dyn Role> {
        let ci = &init.config.code_interpreter;
        Box::new(Self {
            model: Arc::clone(&init.model),
            executor: Arc::clone(&init.executor),
            verifier: CodeVerifier::from_config(ci),
            require_confirmation: ci.require_confirmation,
            max_retry_count: ci.max_retry_count.max(1),
            budget: None,
        })
    }

    fn system_prompt(&self) -> &'static str {
        "You are a code generation worker. Produce a single runnable code \
         block that accomplishes the task described by the conversation. \
         Reply with the code in a fenced block and nothing else."
    }

    /// Attempts still available for this round.
    fn remaining(&mut self, round_id: &str) -> u32 {
        match &self.budget {
            Some((round, spent)) if round == round_id => {
                self.max_retry_count.saturating_sub(*spent)
            }
            _ => {
                self.budget = Some((round_id.to_string(), 0));
                self.max_retry_count
            }
        }
    }

    fn spend(&mut self, round_id: &str) {
        match &mut self.budget {
            Some((round, spent)) if round == round_id => *spent += 1,
            _ => self.budget = Some((round_id.to_string(), 1)),
        }
    }

    /// One generate -> verify -> confirm -> execute cycle.
    ///
    /// A successful attempt fills the post (attachments, message,
    /// send_to) and returns `Ok`. Recoverable failures come back as
    /// `CodeVerificationFailed` / `KernelExecutionFailed` for the retry
    /// loop to consume; anything else is fatal to the turn.
    fn attempt(
        &self,
        ctx: &TurnContext<'_>,
        proxy: &PostProxy,
        view: &RoleView,
        revise: Option<&str>,
    ) -> Result<(), RoleError> {
        let mut messages = vec![ChatMessage::system(self.system_prompt())];
        messages.extend(view.to_chat_messages(self.alias()));
        if let Some(revise_message) = revise {
            proxy.attachment(AttachmentKind::ReviseMessage, revise_message);
            messages.push(ChatMessage::user(revise_message.to_string()));
        }
        let request = ChatRequest { messages };

        let raw = self.model.reply(&request, &mut |_| {})?;
        let code = extract_code_block(&raw);
        proxy.attachment(AttachmentKind::ReplyType, "code");
        proxy.attachment(AttachmentKind::ReplyContent, &code);

        if let Err(findings) = self.verifier.verify(&code) {
            warn!(round_id = %ctx.round_id, "code verification failed");
            proxy.attachment(AttachmentKind::Verification, "INCORRECT");
            proxy.attachment(AttachmentKind::CodeError, &findings);
            return Err(RoleError::CodeVerificationFailed(findings));
        }
        proxy.attachment(AttachmentKind::Verification, "CORRECT");

        if self.require_confirmation {
            proxy.set_status("awaiting confirmation");
            let approved = ctx.gate.request_confirmation(
                ctx.round_id,
                &proxy.post_id(),
                &code,
                Some(CONFIRM_TIMEOUT),
            )?;
            if !approved {
                info!(round_id = %ctx.round_id, "user rejected code execution");
                proxy.attachment(AttachmentKind::ExecutionStatus, "DENIED");
                return Err(RoleError::ConfirmationDenied);
            }
        }

        proxy.set_status("executing code");
        let exec_id = format!("exec-{}", Uuid::new_v4().simple());
        let mut forward = move |stream: &str, text: &str| proxy.execution_output(stream, text);
        let result = self.executor.execute(&exec_id, &code, &mut forward)?;

        if !result.is_success {
            let error = result
                .error
                .unwrap_or_else(|| "execution failed without detail".to_string());
            debug!(round_id = %ctx.round_id, error = %error, "kernel execution failed");
            proxy.attachment(AttachmentKind::ExecutionStatus, "FAILURE");
            proxy.attachment(AttachmentKind::CodeError, &error);
            return Err(RoleError::KernelExecutionFailed(error));
        }

        let output = result.text_output();
        proxy.attachment(AttachmentKind::ExecutionStatus, "SUCCESS");
        proxy.attachment(AttachmentKind::ExecutionResult, &output);
        if !result.artifacts.is_empty() {
            let paths: Vec<&str> = result
                .artifacts
                .iter()
                .map(|a| a.file_name.as_str())
                .collect();
            proxy.attachment(AttachmentKind::ArtifactPaths, &json!(paths).to_string());
        }
        if !result.variables.is_empty() {
            proxy.attachment(
                AttachmentKind::SessionVariables,
                &json!(result.variables).to_string(),
            );
        }
        proxy.set_send_to("Planner");
        proxy.finish_message(&format!(
            "The execution of the generated code succeeded.\nOutput:\n{output}"
        ));
        Ok(())
    }

    /// The follow-up instruction fed back into generation after a
    /// recoverable failure.
    fn revise_message(error: &RoleError) -> String {
        match error {
            RoleError::CodeVerificationFailed(findings) => format!(
                "The generated code violates the execution policy:\n{findings}\n\
                 Rewrite the code without the violations."
            ),
            RoleError::KernelExecutionFailed(error) => format!(
                "The code failed at runtime:\n{error}\nFix the code and try again."
            ),
            other => other.to_string(),
        }
    }
}

impl Role for CodeInterpreter {
    fn alias(&self) -> &str {
        "CodeInterpreter"
    }

    fn reply(&mut self, ctx: &mut TurnContext<'_>) -> Result<Post, RoleError> {
        let view = ctx.memory.role_view(self.alias(), false)?;
        let proxy = ctx.bus.create_post_proxy(self.alias(), ctx.round_id);
        proxy.set_status("generating code");

        let mut revise: Option<String> = None;
        let mut last_error: Option<RoleError> = None;

        while self.remaining(ctx.round_id) > 0 {
            self.spend(ctx.round_id);
            match self.attempt(ctx, &proxy, &view, revise.as_deref()) {
                Ok(()) => return Ok(proxy.end(None)),
                Err(e) if e.is_recoverable() => {
                    revise = Some(Self::revise_message(&e));
                    last_error = Some(e);
                }
                Err(e) => {
                    proxy.end(Some(e.to_string()));
                    return Err(e);
                }
            }
        }

        // Budget drained: surface a failed reply to the Planner rather
        // than failing the round.
        warn!(round_id = %ctx.round_id, "code interpreter retry budget exhausted");
        let last_failure = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no attempt was made".to_string());
        proxy.set_send_to("Planner");
        proxy.finish_message(&format!(
            "CodeInterpreter gave up after {} attempts. Last failure:\n{last_failure}",
            self.max_retry_count
        ));
        Ok(proxy.end(None))
    }
}

/// Pull the first fenced code block out of model text; fall back to the
/// whole reply when the model skipped the fence.
pub(crate) fn extract_code_block(raw: &str) -> String {
    let mut in_block = false;
    let mut code = String::new();
    for line in raw.lines() {
        if line.trim_start().starts_with("```") {
            if in_block {
                return code.trim_end().to_string();
            }
            in_block = true;
            continue;
        }
        if in_block {
            code.push_str(line);
            code.push('\n');
        }
    }
    if in_block {
        code.trim_end().to_string()
    } else {
        raw.trim().to_string()
    }
}
