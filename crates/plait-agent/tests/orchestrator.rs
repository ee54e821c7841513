//! Full-turn tests of the Planner/Worker loop with scripted models and
//! executors: no network, no kernels, real store/bus/gate wiring.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use plait_agent::{
    AgentSession, ChatModel, ChatRequest, Executor, ModelError, OrchestratorError, RoleError,
};
use plait_core::config::PlaitConfig;
use plait_events::{Event, EventHandler, SessionEvent};
use plait_kernel::ExecutionResult;
use plait_memory::{AttachmentKind, RoundState};

// ---------------------------------------------------------------------------
// Scripted collaborators
// ---------------------------------------------------------------------------

struct ScriptedModel {
    replies: Mutex<VecDeque<String>>,
}

impl ScriptedModel {
    fn new(replies: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.iter().map(|s| s.to_string()).collect()),
        })
    }
}

impl ChatModel for ScriptedModel {
    fn reply(
        &self,
        _request: &ChatRequest,
        on_delta: &mut dyn FnMut(&str),
    ) -> Result<String, ModelError> {
        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| ModelError::Provider("script exhausted".to_string()))?;
        on_delta(&reply);
        Ok(reply)
    }
}

enum ExecBehavior {
    Success { stdout: Vec<&'static str> },
    Failure { error: &'static str },
}

struct ScriptedExecutor {
    behaviors: Mutex<VecDeque<ExecBehavior>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedExecutor {
    fn new(behaviors: Vec<ExecBehavior>) -> Arc<Self> {
        Arc::new(Self {
            behaviors: Mutex::new(behaviors.into()),
            calls: Mutex::new(Vec::new()),
        })
    }

    fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl Executor for ScriptedExecutor {
    fn execute(
        &self,
        exec_id: &str,
        code: &str,
        on_output: &mut (dyn FnMut(&str, &str) + Send),
    ) -> Result<ExecutionResult, RoleError> {
        self.calls.lock().unwrap().push(code.to_string());
        let behavior = self
            .behaviors
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(ExecBehavior::Failure {
                error: "executor script exhausted",
            });
        let mut result = ExecutionResult::new(exec_id, code);
        match behavior {
            ExecBehavior::Success { stdout } => {
                for chunk in stdout {
                    on_output("stdout", chunk);
                    result.stdout.push(chunk.to_string());
                }
            }
            ExecBehavior::Failure { error } => {
                result.is_success = false;
                result.error = Some(error.to_string());
            }
        }
        Ok(result)
    }

    fn upload_file(&self, _filename: &str, _bytes: &[u8]) -> Result<(), RoleError> {
        Ok(())
    }
}

struct Recorder {
    events: Mutex<Vec<SessionEvent>>,
}

impl Recorder {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(Vec::new()),
        })
    }

    fn events(&self) -> Vec<SessionEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl EventHandler for Recorder {
    fn on_event(&self, event: &Event) -> anyhow::Result<()> {
        self.events.lock().unwrap().push(event.payload.clone());
        Ok(())
    }
}

fn planner_json(message: &str, send_to: &str) -> String {
    format!(r#"{{"thought":"t","message":"{message}","send_to":"{send_to}"}}"#)
}

fn session(
    config: PlaitConfig,
    model: Arc<ScriptedModel>,
    executor: Arc<ScriptedExecutor>,
) -> AgentSession {
    AgentSession::builder(config, model, executor)
        .build("test-session")
        .unwrap()
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[test]
fn planner_worker_loop_finishes_the_round() {
    let model = ScriptedModel::new(&[
        &planner_json("compute the answer", "CodeInterpreter"),
        "```python\nprint(42)\n```",
        &planner_json("The answer is 42", "User"),
    ]);
    let executor = ScriptedExecutor::new(vec![ExecBehavior::Success {
        stdout: vec!["42\n"],
    }]);
    let session = session(PlaitConfig::default(), model, Arc::clone(&executor));

    let round = session.send_message("what is the answer?").unwrap();

    assert_eq!(round.state, RoundState::Finished);
    assert_eq!(executor.call_count(), 1);

    let froms: Vec<&str> = round.posts.iter().map(|p| p.send_from.as_str()).collect();
    assert_eq!(froms, vec!["User", "Planner", "CodeInterpreter", "Planner"]);
    assert_eq!(round.posts.last().unwrap().send_to, "User");
    assert_eq!(round.posts.last().unwrap().message, "The answer is 42");

    let worker_post = &round.posts[2];
    assert_eq!(
        worker_post
            .attachment(AttachmentKind::ReplyContent)
            .unwrap()
            .content,
        "print(42)"
    );
    assert_eq!(
        worker_post
            .attachment(AttachmentKind::ExecutionStatus)
            .unwrap()
            .content,
        "SUCCESS"
    );
}

#[test]
fn event_stream_honours_post_and_round_bracketing() {
    let model = ScriptedModel::new(&[
        &planner_json("run it", "CodeInterpreter"),
        "```\nprint(1)\n```",
        &planner_json("done", "User"),
    ]);
    let executor = ScriptedExecutor::new(vec![ExecBehavior::Success { stdout: vec!["1\n"] }]);
    let session = session(PlaitConfig::default(), model, executor);
    let recorder = Recorder::new();
    session.subscribe(recorder.clone());

    session.send_message("go").unwrap();
    let events = recorder.events();

    // round_start strictly first, round_end strictly last
    assert!(matches!(events.first(), Some(SessionEvent::RoundStart { .. })));
    assert!(matches!(events.last(), Some(SessionEvent::RoundEnd { .. })));

    // per post: first event is post_start, last is post_end, none after
    use std::collections::HashMap;
    let mut per_post: HashMap<String, Vec<&SessionEvent>> = HashMap::new();
    for event in &events {
        if let Some(post_id) = event.post_id() {
            per_post.entry(post_id.to_string()).or_default().push(event);
        }
    }
    assert!(!per_post.is_empty());
    for (post_id, post_events) in per_post {
        assert!(
            matches!(post_events.first(), Some(SessionEvent::PostStart { .. })),
            "post {post_id} did not begin with post_start"
        );
        assert!(
            matches!(post_events.last(), Some(SessionEvent::PostEnd { .. })),
            "post {post_id} did not end with post_end"
        );
        let end_count = post_events
            .iter()
            .filter(|e| matches!(e, SessionEvent::PostEnd { .. }))
            .count();
        assert_eq!(end_count, 1, "post {post_id} ended more than once");
    }

    // execution output flowed through the worker's post
    assert!(events
        .iter()
        .any(|e| matches!(e, SessionEvent::ExecutionOutput { text, .. } if text == "1\n")));
}

#[test]
fn recoverable_failure_retries_and_succeeds() {
    let model = ScriptedModel::new(&[
        &planner_json("run it", "CodeInterpreter"),
        "```\nprint(undefined)\n```",
        "```\nprint('fixed')\n```",
        &planner_json("done", "User"),
    ]);
    let executor = ScriptedExecutor::new(vec![
        ExecBehavior::Failure {
            error: "NameError: undefined",
        },
        ExecBehavior::Success {
            stdout: vec!["fixed\n"],
        },
    ]);
    let session = session(PlaitConfig::default(), model, Arc::clone(&executor));

    let round = session.send_message("go").unwrap();
    assert_eq!(round.state, RoundState::Finished);
    assert_eq!(executor.call_count(), 2);

    let worker_post = &round.posts[2];
    assert!(worker_post
        .attachments
        .iter()
        .any(|a| a.kind == AttachmentKind::CodeError && a.content.contains("NameError")));
    assert!(worker_post
        .attachments
        .iter()
        .any(|a| a.kind == AttachmentKind::ReviseMessage));
}

#[test]
fn exhausted_budget_surfaces_to_planner_not_as_round_failure() {
    let mut config = PlaitConfig::default();
    config.code_interpreter.max_retry_count = 2;
    let model = ScriptedModel::new(&[
        &planner_json("run it", "CodeInterpreter"),
        "```\nboom()\n```",
        "```\nboom()\n```",
        &planner_json("I could not compute that", "User"),
    ]);
    let executor = ScriptedExecutor::new(vec![
        ExecBehavior::Failure { error: "boom 1" },
        ExecBehavior::Failure { error: "boom 2" },
    ]);
    let session = session(config, model, Arc::clone(&executor));

    let round = session.send_message("go").unwrap();
    assert_eq!(round.state, RoundState::Finished);
    assert_eq!(executor.call_count(), 2);

    let worker_post = &round.posts[2];
    assert_eq!(worker_post.send_to, "Planner");
    assert!(worker_post.message.contains("gave up after 2 attempts"));
}

#[test]
fn rejected_confirmation_fails_the_round_without_kernel_activity() {
    let mut config = PlaitConfig::default();
    config.code_interpreter.require_confirmation = true;
    let model = ScriptedModel::new(&[
        &planner_json("run it", "CodeInterpreter"),
        "```\nos.remove('everything')\n```",
    ]);
    let executor = ScriptedExecutor::new(vec![]);
    let session = Arc::new(session(config, model, Arc::clone(&executor)));

    // Answer the confirmation request with a denial as soon as it appears.
    struct AutoDeny {
        session: Mutex<Option<Arc<AgentSession>>>,
        requests: Mutex<Vec<String>>,
    }
    impl EventHandler for AutoDeny {
        fn on_event(&self, event: &Event) -> anyhow::Result<()> {
            if let SessionEvent::ConfirmRequest { code, .. } = &event.payload {
                self.requests.lock().unwrap().push(code.clone());
                if let Some(session) = self.session.lock().unwrap().as_ref() {
                    session.provide_confirmation(false);
                }
            }
            Ok(())
        }
    }
    let deny = Arc::new(AutoDeny {
        session: Mutex::new(Some(Arc::clone(&session))),
        requests: Mutex::new(Vec::new()),
    });
    session.subscribe(deny.clone());
    let recorder = Recorder::new();
    session.subscribe(recorder.clone());

    let err = session.send_message("delete everything").unwrap_err();
    assert!(matches!(
        err,
        OrchestratorError::RoleFailed {
            source: RoleError::ConfirmationDenied,
            ..
        }
    ));

    // exactly one confirm_request, no kernel activity
    assert_eq!(deny.requests.lock().unwrap().len(), 1);
    assert_eq!(executor.call_count(), 0);

    // the in-flight post ended with a non-empty error, round failed
    let events = recorder.events();
    assert!(events.iter().any(
        |e| matches!(e, SessionEvent::PostEnd { error: Some(msg), .. } if !msg.is_empty())
    ));
    assert!(events
        .iter()
        .any(|e| matches!(e, SessionEvent::RoundError { .. })));
    let round = session.memory().store().rounds_snapshot().pop().unwrap();
    assert_eq!(round.state, RoundState::Failed);
}

#[test]
fn planner_gibberish_fails_the_round() {
    let model = ScriptedModel::new(&["I refuse to emit JSON."]);
    let executor = ScriptedExecutor::new(vec![]);
    let session = session(PlaitConfig::default(), model, executor);

    let err = session.send_message("hello").unwrap_err();
    assert!(matches!(
        err,
        OrchestratorError::RoleFailed {
            source: RoleError::InvalidResponse(_),
            ..
        }
    ));
    let round = session.memory().store().rounds_snapshot().pop().unwrap();
    assert_eq!(round.state, RoundState::Failed);
}

#[test]
fn concurrent_turn_is_rejected_not_queued() {
    use std::sync::mpsc;

    /// Model that blocks its first reply until released.
    struct GatedModel {
        release: Mutex<Option<mpsc::Receiver<()>>>,
        inner: Arc<ScriptedModel>,
    }
    impl ChatModel for GatedModel {
        fn reply(
            &self,
            request: &ChatRequest,
            on_delta: &mut dyn FnMut(&str),
        ) -> Result<String, ModelError> {
            if let Some(rx) = self.release.lock().unwrap().take() {
                let _ = rx.recv();
            }
            self.inner.reply(request, on_delta)
        }
    }

    let (release_tx, release_rx) = mpsc::channel();
    let model = Arc::new(GatedModel {
        release: Mutex::new(Some(release_rx)),
        inner: ScriptedModel::new(&[&planner_json("hi", "User")]),
    });
    let executor = ScriptedExecutor::new(vec![]);
    let session = Arc::new(
        AgentSession::builder(PlaitConfig::default(), model, executor)
            .build("test-session")
            .unwrap(),
    );

    let bg_session = Arc::clone(&session);
    let turn = std::thread::spawn(move || bg_session.send_message("first"));

    // wait until the first turn is visibly in flight
    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
    while !session.is_busy() {
        assert!(std::time::Instant::now() < deadline);
        std::thread::yield_now();
    }
    let err = session.send_message("second").unwrap_err();
    assert!(matches!(err, OrchestratorError::TurnInFlight));

    release_tx.send(()).unwrap();
    turn.join().unwrap().unwrap();
}
