//! Wires one conversation session together: store, bus, gate,
//! compactors, roles, and the orchestrator.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::info;

use plait_core::config::PlaitConfig;
use plait_events::{AnimationGate, ConfirmationGate, EventBus, EventHandler, HandlerId};
use plait_memory::{ConversationStore, Round, RoundCompactor, Summarizer};

use crate::error::{OrchestratorError, RoleError};
use crate::memory::Memory;
use crate::orchestrator::Orchestrator;
use crate::provider::ChatModel;
use crate::role::{Executor, RoleInit, RoleRegistry};

const COMPACTOR_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

pub struct AgentSessionBuilder {
    config: PlaitConfig,
    model: Arc<dyn ChatModel>,
    executor: Arc<dyn Executor>,
    summarizer: Option<Arc<dyn Summarizer>>,
    registry: RoleRegistry,
}

impl AgentSessionBuilder {
    pub fn new(
        config: PlaitConfig,
        model: Arc<dyn ChatModel>,
        executor: Arc<dyn Executor>,
    ) -> Self {
        Self {
            config,
            model,
            executor,
            summarizer: None,
            registry: RoleRegistry::builtin(),
        }
    }

    /// Enable background compaction with this summarizer.
    pub fn summarizer(mut self, summarizer: Arc<dyn Summarizer>) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    /// Extend the role table before the session is assembled.
    pub fn registry(mut self, registry: RoleRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn build(self, session_id: impl Into<String>) -> Result<AgentSession, OrchestratorError> {
        let session_id = session_id.into();
        let aliases = self.config.session.roles.clone();
        let planner_alias = aliases
            .first()
            .cloned()
            .unwrap_or_else(|| "Planner".to_string());
        let workers: Vec<String> = aliases.iter().skip(1).cloned().collect();

        let store = Arc::new(ConversationStore::new());
        store.register_roles(aliases.iter().cloned());
        let bus = Arc::new(EventBus::new());
        let gate = Arc::new(ConfirmationGate::new(Arc::clone(&bus)));

        let mut memory = Memory::new(Arc::clone(&store));
        if self.config.compaction.enabled {
            if let Some(summarizer) = &self.summarizer {
                for alias in &aliases {
                    memory.add_compactor(RoundCompactor::attach(
                        alias.clone(),
                        self.config.compaction.threshold,
                        self.config.compaction.retain_recent,
                        &store,
                        Arc::clone(summarizer),
                    ));
                }
            }
        }

        let init = RoleInit {
            config: &self.config,
            model: Arc::clone(&self.model),
            executor: Arc::clone(&self.executor),
            workers,
        };
        let mut roles = Vec::new();
        for alias in &aliases {
            let role = self
                .registry
                .build(alias, &init)
                .ok_or_else(|| OrchestratorError::UnknownRecipient(alias.clone()))?;
            roles.push(role);
        }

        let orchestrator = Orchestrator::new(
            planner_alias,
            roles,
            self.config.session.max_internal_chat_round,
        );

        info!(session_id = %session_id, roles = ?aliases, "agent session assembled");
        Ok(AgentSession {
            session_id,
            memory,
            bus,
            gate,
            animation: AnimationGate::new(),
            executor: self.executor,
            orchestrator: Mutex::new(orchestrator),
            busy: AtomicBool::new(false),
        })
    }
}

/// One live conversation session.
///
/// `send_message` runs a full round synchronously on the calling thread;
/// hosts that must not block (the gateway) call it from a blocking task
/// and check `is_busy` first.
pub struct AgentSession {
    session_id: String,
    memory: Memory,
    bus: Arc<EventBus>,
    gate: Arc<ConfirmationGate>,
    animation: AnimationGate,
    executor: Arc<dyn Executor>,
    orchestrator: Mutex<Orchestrator>,
    busy: AtomicBool,
}

impl AgentSession {
    pub fn builder(
        config: PlaitConfig,
        model: Arc<dyn ChatModel>,
        executor: Arc<dyn Executor>,
    ) -> AgentSessionBuilder {
        AgentSessionBuilder::new(config, model, executor)
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn animation(&self) -> &AnimationGate {
        &self.animation
    }

    pub fn subscribe(&self, handler: Arc<dyn EventHandler>) -> HandlerId {
        self.bus.subscribe(handler)
    }

    pub fn unsubscribe(&self, id: HandlerId) {
        self.bus.unsubscribe(id);
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    /// Drive one round. A second call while a turn is in flight fails
    /// with `TurnInFlight` instead of queueing.
    pub fn send_message(&self, user_query: &str) -> Result<Round, OrchestratorError> {
        let Ok(mut orchestrator) = self.orchestrator.try_lock() else {
            return Err(OrchestratorError::TurnInFlight);
        };
        self.busy.store(true, Ordering::SeqCst);
        let result = orchestrator.send_message(&self.memory, &self.bus, &self.gate, user_query);
        self.busy.store(false, Ordering::SeqCst);
        result
    }

    /// Answer an outstanding confirmation request.
    pub fn provide_confirmation(&self, approved: bool) {
        self.gate.provide_confirmation(approved);
    }

    /// Forward a file into the execution session's working directory.
    pub fn upload_file(&self, filename: &str, bytes: &[u8]) -> Result<(), RoleError> {
        self.executor.upload_file(filename, bytes)
    }

    /// Tear the session down: cancel confirmations, release the
    /// animator, stop the compactors.
    pub fn shutdown(&self) {
        self.gate.cancel_all();
        self.animation.teardown();
        for compactor in self.memory.compactors() {
            compactor.shutdown(COMPACTOR_SHUTDOWN_TIMEOUT);
        }
        info!(session_id = %self.session_id, "agent session shut down");
    }
}
