use std::path::PathBuf;
use std::sync::Arc;

use futures::StreamExt;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use forge_core::events::{ConnectionEvent, Phase};
use forge_core::ids::SessionId;
use forge_core::messages::{ToolCallRequest, ToolOutcome, Turn};
use forge_core::provider::{ModelProvider, ModelRequest};
use forge_core::tools::ToolContext;
use forge_store::SessionStore;

use crate::continuation::{Continuation, ContinuationController, DEFAULT_INCOMPLETE_RETRY_LIMIT};
use crate::error::EngineError;
use crate::executor::{ToolExecutor, ToolFailure};
use crate::prompt::DEFAULT_SYSTEM_PROMPT;
use crate::publish::PublishOutcome;
use crate::sink::EventSink;
use crate::tools::run_tests::TestReport;
use crate::tools::{PUBLISH, RUN_TESTS};
use crate::turn_buffer::{TurnBuffer, DEFAULT_MAX_TURN_CHARS};

/// Configuration for the step loop.
#[derive(Clone, Debug)]
pub struct RunnerConfig {
    pub max_steps: u32,
    pub incomplete_retry_limit: u32,
    pub max_turn_chars: usize,
    /// Forward accepted text fragments as `delta` events.
    pub emit_deltas: bool,
    pub system_prompt: String,
    pub project_root: PathBuf,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_steps: 10,
            incomplete_retry_limit: DEFAULT_INCOMPLETE_RETRY_LIMIT,
            max_turn_chars: DEFAULT_MAX_TURN_CHARS,
            emit_deltas: true,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            project_root: PathBuf::from("."),
        }
    }
}

/// How a step loop invocation ended.
#[derive(Clone, Debug, PartialEq)]
pub enum RunOutcome {
    /// A plain-text answer was produced.
    Completed { text: String },
    /// The step ceiling was reached; the connection may stay open.
    Halted { steps: u32 },
    /// Unrecoverable model error; a terminal `error` event was sent.
    Failed { message: String },
    /// The client went away; nothing further was sent.
    Disconnected,
}

impl RunOutcome {
    pub fn keeps_connection_open(&self) -> bool {
        matches!(self, Self::Halted { .. })
    }
}

/// Result of replaying a session's last failed tool call.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayOutcome {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ReplayOutcome {
    pub fn success(&self) -> bool {
        self.error.is_none()
    }
}

/// Drives one exchange: stream a turn, resume or run its tool call, repeat
/// until a final answer, a fatal error, or the step ceiling.
pub struct StepLoop {
    provider: Arc<dyn ModelProvider>,
    executor: Arc<ToolExecutor>,
    sessions: Arc<SessionStore>,
    config: RunnerConfig,
}

impl StepLoop {
    pub fn new(
        provider: Arc<dyn ModelProvider>,
        executor: Arc<ToolExecutor>,
        sessions: Arc<SessionStore>,
        config: RunnerConfig,
    ) -> Self {
        Self {
            provider,
            executor,
            sessions,
            config,
        }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    fn tool_context(&self, session: &SessionId) -> ToolContext {
        ToolContext {
            session_id: session.clone(),
            project_root: self.config.project_root.clone(),
        }
    }

    fn disconnected(sink: &dyn EventSink, cancel: &CancellationToken) -> bool {
        cancel.is_cancelled() || sink.is_closed()
    }

    #[instrument(skip(self, session, prompt, sink, cancel), fields(session_id = %session))]
    pub async fn run(
        &self,
        session: &SessionId,
        prompt: &str,
        sink: &dyn EventSink,
        cancel: &CancellationToken,
    ) -> RunOutcome {
        self.sessions.append(session, Turn::user_text(prompt));

        let ctx = self.tool_context(session);
        let tools = self.executor.definitions();
        let mut controller = ContinuationController::new(self.config.incomplete_retry_limit);
        let mut carried = String::new();

        for step in 0..self.config.max_steps {
            if Self::disconnected(sink, cancel) {
                return RunOutcome::Disconnected;
            }
            debug!(step, "opening model stream");

            let request = ModelRequest {
                system_prompt: self.config.system_prompt.clone(),
                history: self.sessions.history(session),
                tools: tools.clone(),
            };

            sink.enter_phase(Phase::Streaming);
            let mut stream = match self.provider.open_stream(&request).await {
                Ok(stream) => stream,
                Err(e) => {
                    sink.enter_phase(Phase::Idle);
                    if Self::disconnected(sink, cancel) {
                        return RunOutcome::Disconnected;
                    }
                    error!(step, error = %e, error_kind = e.error_kind(), "failed to open model stream");
                    let message = format!("model request failed: {e}");
                    sink.emit(ConnectionEvent::terminal_error(&message));
                    return RunOutcome::Failed { message };
                }
            };

            let mut buffer = TurnBuffer::new(self.config.max_turn_chars, self.config.emit_deltas);
            let mut fatal = None;
            while let Some(item) = stream.next().await {
                if Self::disconnected(sink, cancel) {
                    sink.enter_phase(Phase::Idle);
                    return RunOutcome::Disconnected;
                }
                match item {
                    Ok(chunk) => buffer.consume(chunk, sink),
                    Err(e) if e.is_retryable() => {
                        warn!(step, error = %e, "model stream interrupted; treating turn as truncated");
                        break;
                    }
                    Err(e) => {
                        fatal = Some(e);
                        break;
                    }
                }
            }
            drop(stream);
            sink.enter_phase(Phase::Idle);

            if let Some(e) = fatal {
                error!(step, error = %e, "model stream failed");
                let message = format!("model stream failed: {e}");
                sink.emit(ConnectionEvent::terminal_error(&message));
                return RunOutcome::Failed { message };
            }

            let turn = buffer.finalize();
            if let Continuation::Resume { prompt } = controller.decide(&turn, step == 0) {
                if !turn.text.is_empty() {
                    carried.push_str(&turn.text);
                    self.sessions.append(session, Turn::model_text(turn.text));
                }
                self.sessions.append(session, Turn::user_text(prompt));
                continue;
            }

            let mut calls = turn.tool_calls.into_iter();
            if let Some(call) = calls.next() {
                let ignored = calls.count();
                if ignored > 0 {
                    debug!(ignored, "acting on first tool call only");
                }
                if !turn.text.is_empty() {
                    self.sessions.append(session, Turn::model_text(turn.text));
                }
                carried.clear();

                let result = self.invoke_tool(session, &call, &ctx, sink).await;
                if Self::disconnected(sink, cancel) {
                    return RunOutcome::Disconnected;
                }
                if let Ok(output) = &result {
                    if call.name == RUN_TESTS {
                        self.publish_after_tests(session, &call, output, &ctx, sink).await;
                        if Self::disconnected(sink, cancel) {
                            return RunOutcome::Disconnected;
                        }
                    }
                }
                continue;
            }

            if !turn.text.is_empty() {
                self.sessions.append(session, Turn::model_text(turn.text.clone()));
            }
            carried.push_str(&turn.text);
            info!(step, chars = carried.len(), truncated = turn.truncated, "exchange complete");
            sink.emit(ConnectionEvent::FinalResponse {
                text: carried.clone(),
                truncated: turn.truncated,
                size_capped: turn.size_capped,
            });
            return RunOutcome::Completed { text: carried };
        }

        warn!(max_steps = self.config.max_steps, "step ceiling reached");
        sink.emit(ConnectionEvent::WorkflowHalt {
            reason: "step limit reached".into(),
            max_steps: self.config.max_steps,
        });
        RunOutcome::Halted {
            steps: self.config.max_steps,
        }
    }

    /// Record the call, run it, and feed the result back into history.
    async fn invoke_tool(
        &self,
        session: &SessionId,
        call: &ToolCallRequest,
        ctx: &ToolContext,
        sink: &dyn EventSink,
    ) -> Result<String, ToolFailure> {
        self.sessions.append(session, Turn::tool_call(call.clone()));
        sink.emit(ConnectionEvent::ToolCall {
            name: call.name.clone(),
            args: call.arguments.clone(),
        });

        sink.enter_phase(Phase::Tool);
        let result = self.executor.execute(call, ctx, sink).await;
        sink.enter_phase(Phase::Idle);

        match &result {
            Ok(output) => {
                sink.emit(ConnectionEvent::ToolResponse {
                    name: call.name.clone(),
                    response: output.clone(),
                });
                self.sessions
                    .append(session, Turn::tool_result(ToolOutcome::success(call, output.as_str())));
            }
            Err(failure) => {
                self.sessions.append(
                    session,
                    Turn::tool_result(ToolOutcome::failure(call, failure.message.as_str())),
                );
            }
        }
        result
    }

    async fn publish_after_tests(
        &self,
        session: &SessionId,
        call: &ToolCallRequest,
        output: &str,
        ctx: &ToolContext,
        sink: &dyn EventSink,
    ) {
        let Some(report) = TestReport::from_output(output) else {
            return;
        };
        if !report.status.is_publishable() {
            return;
        }
        let Some(name) = call.arguments.get("name").and_then(|v| v.as_str()) else {
            return;
        };

        info!(artifact = name, status = ?report.status, "tests passed; publishing");
        let publish = ToolCallRequest::new(PUBLISH, serde_json::json!({ "name": name }));
        let Ok(published) = self.invoke_tool(session, &publish, ctx, sink).await else {
            return;
        };

        match serde_json::from_str::<PublishOutcome>(&published) {
            Ok(PublishOutcome {
                final_path: Some(path),
                ..
            }) => sink.emit(ConnectionEvent::WorkflowComplete {
                artifact: name.to_string(),
                file_path: path.display().to_string(),
            }),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "unreadable publish outcome"),
        }
    }

    /// Re-execute the session's recorded failed tool call.
    #[instrument(skip(self, session, sink), fields(session_id = %session))]
    pub async fn replay_last_failed(
        &self,
        session: &SessionId,
        sink: &dyn EventSink,
    ) -> Result<ReplayOutcome, EngineError> {
        let failed = self
            .sessions
            .last_failed(session)
            .ok_or_else(|| EngineError::NothingToReplay(session.to_string()))?;

        let call = ToolCallRequest::new(failed.tool_name, failed.arguments);
        let ctx = self.tool_context(session);
        match self.invoke_tool(session, &call, &ctx, sink).await {
            Ok(output) => {
                info!(tool = %call.name, "replay succeeded");
                self.sessions.clear_last_failed(session);
                Ok(ReplayOutcome {
                    name: call.name,
                    output: Some(output),
                    error: None,
                })
            }
            Err(failure) => Ok(ReplayOutcome {
                name: call.name,
                output: None,
                error: Some(failure.message),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use forge_core::errors::GatewayError;
    use forge_core::messages::{Role, TurnPayload};
    use forge_core::stream::StreamChunk;
    use forge_llm::{MockProvider, MockResponse};
    use forge_store::{ArtifactLayout, ArtifactNaming, AuditLog, LastFailedTool};
    use serde_json::json;

    use crate::executor::RetryPolicy;
    use crate::publish::PublishWorkflow;
    use crate::sink::RecordingSink;
    use crate::tools::{create_default_registry, TestCommand};

    struct Harness {
        runner: StepLoop,
        provider: Arc<MockProvider>,
        sessions: Arc<SessionStore>,
        session: SessionId,
        layout: ArtifactLayout,
        root: PathBuf,
    }

    impl Drop for Harness {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.root);
        }
    }

    fn harness_with(responses: Vec<MockResponse>, config: RunnerConfig, test_script: &str) -> Harness {
        let root = std::env::temp_dir().join(format!("forge_runner_{}", uuid::Uuid::now_v7()));
        let project = root.join("project");
        std::fs::create_dir_all(&project).unwrap();
        let layout = ArtifactLayout::new(root.join("data"), ArtifactNaming::default());
        let audit = AuditLog::new(layout.clone());
        let workflow = Arc::new(PublishWorkflow::new(layout.clone(), audit.clone()));
        let registry = create_default_registry(
            layout.clone(),
            TestCommand {
                program: "sh".into(),
                args: vec!["-c".into(), test_script.into(), "sh".into()],
                timeout: Duration::from_secs(10),
            },
            workflow,
        );

        let sessions = Arc::new(SessionStore::new());
        let session = sessions.resolve(None).id;
        let executor = Arc::new(ToolExecutor::new(
            Arc::new(registry),
            sessions.clone(),
            audit,
            RetryPolicy::default(),
        ));
        let provider = Arc::new(MockProvider::new(responses));
        let runner = StepLoop::new(
            provider.clone(),
            executor,
            sessions.clone(),
            RunnerConfig {
                project_root: project,
                ..config
            },
        );
        Harness {
            runner,
            provider,
            sessions,
            session,
            layout,
            root,
        }
    }

    fn harness(responses: Vec<MockResponse>) -> Harness {
        harness_with(responses, RunnerConfig::default(), "exit 0")
    }

    async fn run(h: &Harness, prompt: &str) -> (RunOutcome, RecordingSink) {
        let sink = RecordingSink::new();
        let outcome = h
            .runner
            .run(&h.session, prompt, &sink, &CancellationToken::new())
            .await;
        (outcome, sink)
    }

    fn final_response(sink: &RecordingSink) -> (String, bool, bool) {
        sink.events()
            .into_iter()
            .find_map(|e| match e {
                ConnectionEvent::FinalResponse {
                    text,
                    truncated,
                    size_capped,
                } => Some((text, truncated, size_capped)),
                _ => None,
            })
            .expect("final_response event")
    }

    fn last_user_text(request: &ModelRequest) -> Option<String> {
        request
            .history
            .iter()
            .rev()
            .find(|t| t.role == Role::User)
            .and_then(|t| t.text().map(str::to_string))
    }

    #[tokio::test]
    async fn plain_answer_completes() {
        let h = harness(vec![MockResponse::fragments(&["Hel", "lo"])]);
        let (outcome, sink) = run(&h, "hi").await;

        assert_eq!(outcome, RunOutcome::Completed { text: "Hello".into() });
        assert_eq!(sink.kinds(), vec!["delta", "delta", "final_response"]);
        assert_eq!(final_response(&sink), ("Hello".into(), false, false));

        let history = h.sessions.history(&h.session);
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].text(), Some("hi"));
        assert_eq!(history[1].role, Role::Model);

        let request = &h.provider.requests()[0];
        assert!(!request.tools.is_empty());
        assert!(!request.system_prompt.is_empty());
    }

    #[tokio::test]
    async fn truncated_turn_is_resumed_and_carried_forward() {
        let h = harness(vec![
            MockResponse::truncated("The answer "),
            MockResponse::text("is 42."),
        ]);
        let (outcome, sink) = run(&h, "question").await;

        assert_eq!(outcome, RunOutcome::Completed { text: "The answer is 42.".into() });
        assert_eq!(final_response(&sink), ("The answer is 42.".into(), false, false));

        let requests = h.provider.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(last_user_text(&requests[1]).as_deref(), Some("CONTINUE"));
    }

    #[tokio::test]
    async fn continuation_is_bounded_per_connection() {
        let h = harness(vec![
            MockResponse::truncated("one "),
            MockResponse::truncated("two "),
            MockResponse::truncated("three"),
        ]);
        let (outcome, sink) = run(&h, "go").await;

        assert_eq!(h.provider.call_count(), 2);
        assert_eq!(outcome, RunOutcome::Completed { text: "one two ".into() });
        let (_, truncated, _) = final_response(&sink);
        assert!(truncated);
    }

    #[tokio::test]
    async fn empty_opening_turn_gets_tool_hint() {
        let h = harness(vec![MockResponse::empty(), MockResponse::text("ok")]);
        let (outcome, _) = run(&h, "build it").await;

        assert_eq!(outcome, RunOutcome::Completed { text: "ok".into() });
        let requests = h.provider.requests();
        let hint = last_user_text(&requests[1]).unwrap();
        assert!(hint.contains("tools"));
    }

    #[tokio::test]
    async fn size_cap_reported_on_final_response() {
        let config = RunnerConfig {
            max_turn_chars: 4,
            incomplete_retry_limit: 0,
            ..RunnerConfig::default()
        };
        let h = harness_with(vec![MockResponse::text("abcdefgh")], config, "exit 0");
        let (outcome, sink) = run(&h, "long").await;

        assert_eq!(outcome, RunOutcome::Completed { text: "abcd".into() });
        assert_eq!(final_response(&sink), ("abcd".into(), true, true));
        assert_eq!(sink.kinds().iter().filter(|k| **k == "warning").count(), 1);
    }

    #[tokio::test]
    async fn tool_call_result_feeds_next_turn() {
        let h = harness(vec![
            MockResponse::tool_call("write_source", json!({"name": "Orb", "content": "class Orb {}"})),
            MockResponse::text("Staged."),
        ]);
        let (outcome, sink) = run(&h, "make an orb").await;

        assert_eq!(outcome, RunOutcome::Completed { text: "Staged.".into() });
        assert_eq!(sink.kinds(), vec!["tool_call", "tool_response", "delta", "final_response"]);
        assert_eq!(sink.phases(), vec![Phase::Streaming, Phase::Idle, Phase::Tool, Phase::Idle, Phase::Streaming, Phase::Idle]);

        let second = &h.provider.requests()[1];
        let last = second.history.last().unwrap();
        assert_eq!(last.role, Role::ToolResult);
        match &last.payload {
            TurnPayload::ToolResult(outcome) => assert!(!outcome.is_error()),
            other => panic!("unexpected payload: {other:?}"),
        }

        let staged = h
            .layout
            .artifact_path(&h.session, forge_store::Area::Staging, forge_store::ArtifactKind::Source, "Orb")
            .unwrap();
        assert!(staged.exists());
    }

    #[tokio::test]
    async fn passing_tests_trigger_publish_and_workflow_complete() {
        let h = harness(vec![
            MockResponse::tool_call("write_source", json!({"name": "Orb", "content": "class Orb {}"})),
            MockResponse::tool_call("write_test", json!({"name": "Orb", "content": "test()"})),
            MockResponse::tool_call("run_tests", json!({"name": "Orb"})),
            MockResponse::text("Published Orb."),
        ]);
        let (outcome, sink) = run(&h, "orb please").await;
        assert!(matches!(outcome, RunOutcome::Completed { .. }));

        let events = sink.events();
        let publish_call = events
            .iter()
            .position(|e| matches!(e, ConnectionEvent::ToolCall { name, .. } if name == "publish"))
            .expect("publish tool_call");
        assert!(matches!(&events[publish_call + 1], ConnectionEvent::ToolResponse { name, .. } if name == "publish"));

        let final_src = h
            .layout
            .artifact_path(&h.session, forge_store::Area::Final, forge_store::ArtifactKind::Source, "Orb")
            .unwrap();
        match &events[publish_call + 2] {
            ConnectionEvent::WorkflowComplete { artifact, file_path } => {
                assert_eq!(artifact, "Orb");
                assert_eq!(file_path, &final_src.display().to_string());
            }
            other => panic!("expected workflow_complete, got {other:?}"),
        }
        assert!(final_src.exists());
        assert_eq!(h.provider.call_count(), 4);
    }

    #[tokio::test]
    async fn failing_tests_do_not_publish() {
        let h = harness_with(
            vec![
                MockResponse::tool_call("write_source", json!({"name": "Orb", "content": "x"})),
                MockResponse::tool_call("write_test", json!({"name": "Orb", "content": "t"})),
                MockResponse::tool_call("run_tests", json!({"name": "Orb"})),
                MockResponse::text("Tests fail."),
            ],
            RunnerConfig::default(),
            "echo boom >&2; exit 1",
        );
        let (_, sink) = run(&h, "orb").await;
        assert!(!sink.kinds().contains(&"workflow_complete"));
        assert!(!sink
            .events()
            .iter()
            .any(|e| matches!(e, ConnectionEvent::ToolCall { name, .. } if name == "publish")));
    }

    #[tokio::test]
    async fn non_transient_tool_error_feeds_back_and_records() {
        let h = harness(vec![
            MockResponse::tool_call("read_file", json!({"path": "/etc/passwd"})),
            MockResponse::text("Could not read it."),
        ]);
        let (outcome, sink) = run(&h, "read passwd").await;

        assert!(matches!(outcome, RunOutcome::Completed { .. }));
        assert_eq!(sink.kinds(), vec!["tool_call", "tool_error", "delta", "final_response"]);

        let history = h.sessions.history(&h.session);
        let result = history
            .iter()
            .find_map(|t| match &t.payload {
                TurnPayload::ToolResult(o) => Some(o.clone()),
                _ => None,
            })
            .unwrap();
        assert!(result.is_error());

        let failed = h.sessions.last_failed(&h.session).unwrap();
        assert_eq!(failed.tool_name, "read_file");
    }

    #[tokio::test]
    async fn path_like_session_cannot_widen_read_access() {
        let h = harness(vec![
            MockResponse::tool_call("read_file", json!({"path": "/etc/passwd"})),
            MockResponse::text("denied"),
            MockResponse::tool_call("read_file", json!({"path": "/etc/passwd"})),
            MockResponse::text("denied again"),
        ]);
        let resolved = h.sessions.resolve(Some(&SessionId::from_raw("/")));
        assert_ne!(resolved.id.as_str(), "/");

        let raw = SessionId::from_raw("/");
        for session in [&resolved.id, &raw] {
            let sink = RecordingSink::new();
            h.runner
                .run(session, "read passwd", &sink, &CancellationToken::new())
                .await;
            assert_eq!(sink.kinds()[..2], ["tool_call", "tool_error"]);
        }
        assert!(h.layout.audit_path(&resolved.id).exists());
    }

    #[tokio::test]
    async fn only_first_tool_call_is_executed() {
        let first = ToolCallRequest::new("write_source", json!({"name": "A", "content": "a"}));
        let second = ToolCallRequest::new("write_source", json!({"name": "B", "content": "b"}));
        let h = harness(vec![
            MockResponse::Stream(vec![Ok(StreamChunk {
                text: None,
                tool_calls: vec![first, second],
                finish_reason: Some("tool_calls".into()),
            })]),
            MockResponse::text("done"),
        ]);
        let (_, sink) = run(&h, "two files").await;

        assert_eq!(sink.kinds().iter().filter(|k| **k == "tool_call").count(), 1);
        let staged_b = h
            .layout
            .artifact_path(&h.session, forge_store::Area::Staging, forge_store::ArtifactKind::Source, "B")
            .unwrap();
        assert!(!staged_b.exists());
    }

    #[tokio::test]
    async fn step_ceiling_halts() {
        let config = RunnerConfig {
            max_steps: 2,
            ..RunnerConfig::default()
        };
        let h = harness_with(
            vec![
                MockResponse::tool_call("write_source", json!({"name": "A", "content": "1"})),
                MockResponse::tool_call("write_source", json!({"name": "A", "content": "2"})),
                MockResponse::text("never"),
            ],
            config,
            "exit 0",
        );
        let (outcome, sink) = run(&h, "loop").await;

        assert_eq!(outcome, RunOutcome::Halted { steps: 2 });
        assert!(outcome.keeps_connection_open());
        match sink.events().last().unwrap() {
            ConnectionEvent::WorkflowHalt { max_steps, .. } => assert_eq!(*max_steps, 2),
            other => panic!("expected workflow_halt, got {other:?}"),
        }
        assert_eq!(h.provider.call_count(), 2);
    }

    #[tokio::test]
    async fn fatal_open_error_is_terminal() {
        let h = harness(vec![MockResponse::Error(GatewayError::AuthenticationFailed("bad key".into()))]);
        let (outcome, sink) = run(&h, "hi").await;

        assert!(matches!(outcome, RunOutcome::Failed { .. }));
        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert!(events[0].is_terminal());
    }

    #[tokio::test]
    async fn fatal_mid_stream_error_is_terminal() {
        let h = harness(vec![MockResponse::interrupted(
            "partial",
            GatewayError::InvalidRequest("context too long".into()),
        )]);
        let (outcome, sink) = run(&h, "hi").await;

        assert!(matches!(outcome, RunOutcome::Failed { .. }));
        assert!(sink.events().last().unwrap().is_terminal());
    }

    #[tokio::test]
    async fn retryable_mid_stream_error_resumes() {
        let h = harness(vec![
            MockResponse::interrupted("Half ", GatewayError::StreamInterrupted("reset".into())),
            MockResponse::text("whole."),
        ]);
        let (outcome, _) = run(&h, "hi").await;
        assert_eq!(outcome, RunOutcome::Completed { text: "Half whole.".into() });
    }

    struct ClosedSink {
        inner: RecordingSink,
        closed: AtomicBool,
    }

    impl EventSink for ClosedSink {
        fn emit(&self, event: ConnectionEvent) {
            self.inner.emit(event);
            self.closed.store(true, Ordering::SeqCst);
        }

        fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }
    }

    #[tokio::test]
    async fn disconnect_stops_the_loop() {
        let h = harness(vec![
            MockResponse::tool_call("write_source", json!({"name": "A", "content": "1"})),
            MockResponse::text("unreached"),
        ]);
        let sink = ClosedSink {
            inner: RecordingSink::new(),
            closed: AtomicBool::new(false),
        };
        let outcome = h
            .runner
            .run(&h.session, "go", &sink, &CancellationToken::new())
            .await;

        assert_eq!(outcome, RunOutcome::Disconnected);
        assert_eq!(h.provider.call_count(), 1);
    }

    #[tokio::test]
    async fn cancelled_before_start_does_nothing() {
        let h = harness(vec![MockResponse::text("unused")]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let sink = RecordingSink::new();
        let outcome = h.runner.run(&h.session, "go", &sink, &cancel).await;
        assert_eq!(outcome, RunOutcome::Disconnected);
        assert_eq!(h.provider.call_count(), 0);
        assert!(sink.events().is_empty());
    }

    #[tokio::test]
    async fn replay_success_clears_record_and_appends_turns() {
        let h = harness(vec![]);
        h.sessions.set_last_failed(
            &h.session,
            LastFailedTool {
                tool_name: "write_source".into(),
                arguments: json!({"name": "Fixed", "content": "ok"}),
                error_message: "disk full".into(),
            },
        );

        let sink = RecordingSink::new();
        let outcome = h.runner.replay_last_failed(&h.session, &sink).await.unwrap();
        assert!(outcome.success());
        assert_eq!(outcome.name, "write_source");
        assert!(h.sessions.last_failed(&h.session).is_none());
        assert_eq!(sink.kinds(), vec!["tool_call", "tool_response"]);

        let history = h.sessions.history(&h.session);
        assert_eq!(history.len(), 2);
        assert!(matches!(history[0].payload, TurnPayload::ToolCall(_)));
        assert!(matches!(history[1].payload, TurnPayload::ToolResult(_)));
    }

    #[tokio::test]
    async fn replay_failure_keeps_a_record() {
        let h = harness(vec![]);
        h.sessions.set_last_failed(
            &h.session,
            LastFailedTool {
                tool_name: "read_file".into(),
                arguments: json!({"path": "/etc/shadow"}),
                error_message: "denied".into(),
            },
        );
        let sink = RecordingSink::new();
        let outcome = h.runner.replay_last_failed(&h.session, &sink).await.unwrap();
        assert!(!outcome.success());
        assert!(h.sessions.last_failed(&h.session).is_some());
    }

    #[tokio::test]
    async fn replay_without_record_errors() {
        let h = harness(vec![]);
        let err = h
            .runner
            .replay_last_failed(&h.session, &RecordingSink::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NothingToReplay(_)));
    }
}
