//! Drives one conversation turn: Planner decides, workers act, control
//! returns to the Planner until a post addresses the user.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, warn};

use plait_events::{ConfirmationGate, EventBus};
use plait_memory::{AttachmentKind, Post, Round, RoundState};

use crate::error::OrchestratorError;
use crate::memory::Memory;
use crate::role::{Role, TurnContext};

pub struct Orchestrator {
    planner_alias: String,
    roles: HashMap<String, Box<dyn Role>>,
    max_internal_rounds: u32,
}

impl Orchestrator {
    pub fn new(
        planner_alias: impl Into<String>,
        roles: Vec<Box<dyn Role>>,
        max_internal_rounds: u32,
    ) -> Self {
        let roles = roles
            .into_iter()
            .map(|role| (role.alias().to_string(), role))
            .collect();
        Self {
            planner_alias: planner_alias.into(),
            roles,
            max_internal_rounds,
        }
    }

    /// Run one round for `user_query`, appending everything to the store
    /// and leaving the round `finished` or `failed`.
    pub fn send_message(
        &mut self,
        memory: &Memory,
        bus: &Arc<EventBus>,
        gate: &Arc<ConfirmationGate>,
        user_query: &str,
    ) -> Result<Round, OrchestratorError> {
        let store = Arc::clone(memory.store());
        let round = store.create_round(user_query);
        bus.emit_round_start(&round.id);

        let mut user_post = Post::new("User");
        user_post.send_to = self.planner_alias.clone();
        user_post.message = user_query.to_string();
        store.append_post(&round.id, user_post.clone())?;

        let mut current = user_post;
        for hop in 0..self.max_internal_rounds {
            let recipient = current.send_to.clone();
            let Some(role) = self.roles.get_mut(&recipient) else {
                let err = OrchestratorError::UnknownRecipient(recipient);
                fail_round(&store, bus, &round.id, &err.to_string());
                return Err(err);
            };

            let mut ctx = TurnContext {
                memory,
                bus,
                gate,
                round_id: &round.id,
                input: &current,
            };
            let reply = match role.reply(&mut ctx) {
                Ok(post) => post,
                Err(source) => {
                    let role = recipient.clone();
                    warn!(round_id = %round.id, role = %role, error = %source, "role failed");
                    fail_round(&store, bus, &round.id, &source.to_string());
                    return Err(OrchestratorError::RoleFailed { role, source });
                }
            };
            store.append_post(&round.id, reply.clone())?;

            let stop = reply.send_to == "User" || reply.has_attachment(AttachmentKind::Stop);
            if stop {
                store.finish_round(&round.id, RoundState::Finished)?;
                bus.emit_round_end(&round.id);
                info!(round_id = %round.id, hops = hop + 1, "round finished");
                return Ok(store.round(&round.id)?);
            }
            current = reply;
        }

        let err = OrchestratorError::HopBudgetExceeded(self.max_internal_rounds);
        fail_round(&store, bus, &round.id, &err.to_string());
        Err(err)
    }

    pub fn planner_alias(&self) -> &str {
        &self.planner_alias
    }

    pub fn role_aliases(&self) -> Vec<String> {
        self.roles.keys().cloned().collect()
    }
}

fn fail_round(
    store: &plait_memory::ConversationStore,
    bus: &Arc<EventBus>,
    round_id: &str,
    message: &str,
) {
    if let Err(e) = store.finish_round(round_id, RoundState::Failed) {
        warn!(round_id, error = %e, "could not mark round failed");
    }
    bus.emit_round_error(round_id, message);
    bus.emit_round_end(round_id);
}
