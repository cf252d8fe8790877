//! Orchestration loop: model -> policy -> tools -> model, until a terminal state.
//!
//! # Loop
//! 1. Ask the model gateway for the next batch of actions
//! 2. Validate each action with the policy engine
//! 3. Dispatch accepted actions through the tool registry
//! 4. Feed a summary of the outcomes back as a user message
//!
//! # Termination
//! - the terminal action succeeds -> `Completed`
//! - any policy rejection -> `Failed` immediately
//! - `max_consecutive_failures` failed dispatches or model calls in a row -> `Failed`
//! - `max_iterations` iterations without the terminal action -> `Failed`
//!
//! Exactly one `task_completed` or `task_failed` event is emitted per run.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::RwLock;

use super::conversation::ConversationWindow;
use super::events::{EventSink, TaskEvent};
use crate::config::{LoopLimits, ModelConfig};
use crate::llm::{AgentResponse, LlmError, ModelGateway, ProposedAction};
use crate::security::PolicyEngine;
use crate::task::{ActionOutcome, IterationRecord, TaskError, TaskId, TaskRecord, TaskStatus};
use crate::tools::{ToolError, ToolRegistry};
use crate::util::preview;

/// How one run ended, before it is written back to the record.
enum Termination {
    Completed(Value),
    Failed(String),
}

/// Per-iteration bookkeeping that ends up in the task history.
struct IterationState {
    index: usize,
    reasoning: Option<String>,
    actions: Vec<ProposedAction>,
    results: Vec<ActionOutcome>,
}

impl IterationState {
    fn into_record(self) -> IterationRecord {
        IterationRecord::new(self.index, self.reasoning, self.actions, self.results)
    }
}

/// Drives one task at a time. Cheap to clone; all collaborators are shared.
#[derive(Clone)]
pub struct Orchestrator {
    gateway: Arc<dyn ModelGateway>,
    tools: Arc<ToolRegistry>,
    policy: Arc<PolicyEngine>,
    limits: LoopLimits,
    model_timeout: Duration,
}

impl Orchestrator {
    pub fn new(
        gateway: Arc<dyn ModelGateway>,
        tools: Arc<ToolRegistry>,
        policy: Arc<PolicyEngine>,
        limits: LoopLimits,
    ) -> Self {
        Self {
            gateway,
            tools,
            policy,
            limits,
            model_timeout: ModelConfig::default().timeout,
        }
    }

    /// Bound each model call.
    pub fn with_model_timeout(mut self, timeout: Duration) -> Self {
        self.model_timeout = timeout;
        self
    }

    pub fn limits(&self) -> &LoopLimits {
        &self.limits
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Run `task` from `Pending` to a terminal state.
    ///
    /// The record lock is only taken for short reads and writes, never across a model
    /// call or a tool dispatch.
    ///
    /// # Errors
    /// Returns `TaskError::InvalidTransition` without emitting anything if the task is
    /// not pending.
    pub async fn run(
        &self,
        task: &RwLock<TaskRecord>,
        events: &EventSink,
    ) -> Result<TaskStatus, TaskError> {
        let (task_id, request, workspace) = {
            let mut record = task.write().await;
            record.start()?;
            (
                record.id().clone(),
                record.request().to_string(),
                record.workspace().to_path_buf(),
            )
        };

        tracing::info!(
            "[Task {}] Starting execution in {}: {}",
            task_id,
            workspace.display(),
            preview(&request, 100)
        );

        let mut conversation = ConversationWindow::new(self.limits.max_history);
        conversation.push_user(request);

        let termination = self
            .drive(&task_id, task, &workspace, &mut conversation, events)
            .await;

        self.finish(&task_id, task, termination, events).await
    }

    async fn drive(
        &self,
        task_id: &TaskId,
        task: &RwLock<TaskRecord>,
        workspace: &std::path::Path,
        conversation: &mut ConversationWindow,
        events: &EventSink,
    ) -> Termination {
        let max_failures = self.limits.max_consecutive_failures;
        let mut consecutive_failures = 0usize;

        for index in 1..=self.limits.max_iterations {
            tracing::info!(
                "[Task {}] Iteration {}/{}",
                task_id,
                index,
                self.limits.max_iterations
            );
            events.emit(TaskEvent::IterationStart {
                iteration: index,
                message: "Thinking...".to_string(),
            });

            let response = match self.ask_model(conversation, workspace).await {
                Ok(response) => response,
                Err(e) => {
                    tracing::error!("[Task {}] LLM request failed: {}", task_id, e);
                    events.emit(TaskEvent::Error {
                        message: format!("LLM request failed: {}", e),
                    });
                    consecutive_failures += 1;
                    if consecutive_failures >= max_failures {
                        return Termination::Failed(format!(
                            "Too many consecutive LLM failures ({})",
                            consecutive_failures
                        ));
                    }
                    continue;
                }
            };

            if let Some(reasoning) = &response.reasoning {
                tracing::info!("[Task {}] Reasoning: {}", task_id, preview(reasoning, 200));
                events.emit(TaskEvent::Reasoning {
                    content: reasoning.clone(),
                });
            }
            conversation.push_assistant(response.raw.clone());

            if response.actions.is_empty() {
                tracing::warn!("[Task {}] Model proposed no actions", task_id);
            }

            let mut iteration = IterationState {
                index,
                reasoning: response.reasoning,
                actions: response.actions.clone(),
                results: Vec::with_capacity(response.actions.len()),
            };

            for action in response.actions {
                let tool = action.tool.clone();
                tracing::info!("[Task {}] Executing tool: {}", task_id, tool);
                tracing::debug!("[Task {}] {} params: {}", task_id, tool, action.params);
                events.emit(TaskEvent::ActionStart {
                    tool: tool.clone(),
                    params: action.params.clone(),
                });

                if let Err(violation) =
                    self.policy
                        .validate_action(&tool, &action.params, workspace)
                {
                    tracing::error!("[Task {}] Security violation: {}", task_id, violation);
                    let cause = format!("Security violation: {}", violation);
                    iteration.results.push(ActionOutcome::failure(
                        tool.as_str(),
                        cause.clone(),
                        "SecurityError",
                    ));
                    events.emit(TaskEvent::SecurityViolation {
                        tool,
                        error: violation.to_string(),
                    });
                    record_iteration(task_id, task, iteration).await;
                    return Termination::Failed(cause);
                }

                match self.dispatch(&action, workspace).await {
                    Ok(result) => {
                        consecutive_failures = 0;
                        iteration
                            .results
                            .push(ActionOutcome::success(tool.as_str(), result.clone()));
                        events.emit(TaskEvent::ActionSuccess {
                            tool: tool.clone(),
                            result: result.clone(),
                        });

                        if self.tools.is_terminal(&tool) {
                            record_iteration(task_id, task, iteration).await;
                            return Termination::Completed(result);
                        }
                    }
                    Err(e) => {
                        tracing::error!("[Task {}] Tool execution failed: {}", task_id, e);
                        consecutive_failures += 1;
                        iteration.results.push(ActionOutcome::failure(
                            tool.as_str(),
                            e.to_string(),
                            e.kind(),
                        ));
                        events.emit(TaskEvent::ActionFailed {
                            tool,
                            error: e.to_string(),
                            error_type: e.kind().to_string(),
                        });

                        if consecutive_failures >= max_failures {
                            record_iteration(task_id, task, iteration).await;
                            return Termination::Failed(format!(
                                "Too many consecutive failures ({}). Aborting.",
                                consecutive_failures
                            ));
                        }
                    }
                }
            }

            conversation.push_user(format!(
                "Tool execution results:\n{}\n\n\
                 If all requested tasks are now complete, call the 'finish' tool with a summary message. \
                 If there are more steps needed, continue with the next action.",
                format_results(&iteration.results)
            ));
            record_iteration(task_id, task, iteration).await;
        }

        tracing::warn!(
            "[Task {}] Max iterations ({}) reached",
            task_id,
            self.limits.max_iterations
        );
        Termination::Failed(format!(
            "Max iterations ({}) reached without completion",
            self.limits.max_iterations
        ))
    }

    async fn ask_model(
        &self,
        conversation: &ConversationWindow,
        workspace: &std::path::Path,
    ) -> Result<AgentResponse, LlmError> {
        let messages = conversation.messages();
        match tokio::time::timeout(
            self.model_timeout,
            self.gateway.next_actions(&messages, workspace),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(LlmError::timeout(self.model_timeout)),
        }
    }

    /// Dispatch one accepted action. The terminal action runs without a timeout.
    async fn dispatch(
        &self,
        action: &ProposedAction,
        workspace: &std::path::Path,
    ) -> Result<Value, ToolError> {
        let call = self
            .tools
            .execute(&action.tool, action.params.clone(), workspace);

        if self.tools.is_terminal(&action.tool) {
            return call.await;
        }

        match tokio::time::timeout(self.limits.tool_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(ToolError::Timeout(self.limits.tool_timeout)),
        }
    }

    /// Write the outcome to the record and emit the single terminal event.
    async fn finish(
        &self,
        task_id: &TaskId,
        task: &RwLock<TaskRecord>,
        termination: Termination,
        events: &EventSink,
    ) -> Result<TaskStatus, TaskError> {
        let mut record = task.write().await;
        match termination {
            Termination::Completed(result) => {
                let success = result
                    .get("success")
                    .and_then(Value::as_bool)
                    .unwrap_or(true);
                let message = result
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("Task completed")
                    .to_string();

                record.complete(result.clone())?;
                tracing::info!("[Task {}] Completed: {}", task_id, message);
                events.emit(TaskEvent::TaskCompleted {
                    success,
                    message,
                    result,
                    summary: record.summary(),
                });
            }
            Termination::Failed(cause) => {
                record.fail(cause.clone())?;
                events.emit(TaskEvent::TaskFailed {
                    error: cause,
                    summary: record.summary(),
                });
            }
        }
        Ok(record.status())
    }
}

async fn record_iteration(task_id: &TaskId, task: &RwLock<TaskRecord>, iteration: IterationState) {
    if let Err(e) = task.write().await.add_iteration(iteration.into_record()) {
        tracing::warn!("[Task {}] Could not record iteration: {}", task_id, e);
    }
}

/// Render batch outcomes for the next model prompt.
pub fn format_results(results: &[ActionOutcome]) -> String {
    if results.is_empty() {
        return "No tools executed.".to_string();
    }

    results
        .iter()
        .map(|outcome| {
            if outcome.success {
                let text = match &outcome.result {
                    Some(Value::String(s)) => s.clone(),
                    Some(other) => other.to_string(),
                    None => String::new(),
                };
                format!("✅ {}: {}", outcome.tool, preview(&text, 200))
            } else {
                format!(
                    "❌ {}: {} - {}",
                    outcome.tool,
                    outcome.error_type.as_deref().unwrap_or("Error"),
                    outcome.error.as_deref().unwrap_or("Unknown error")
                )
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{parse_agent_response, ChatMessage, Role};
    use crate::security::PolicyConfig;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    /// Replays canned model outputs; `None` simulates a failed model call.
    struct ScriptedGateway {
        replies: Mutex<VecDeque<Option<String>>>,
        fallback: Option<String>,
        seen: Mutex<Vec<Vec<ChatMessage>>>,
    }

    impl ScriptedGateway {
        fn new(replies: Vec<Option<&str>>) -> Self {
            Self {
                replies: Mutex::new(replies.into_iter().map(|r| r.map(String::from)).collect()),
                fallback: None,
                seen: Mutex::new(Vec::new()),
            }
        }

        fn repeating(reply: &str) -> Self {
            Self {
                replies: Mutex::new(VecDeque::new()),
                fallback: Some(reply.to_string()),
                seen: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> usize {
            self.seen.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ModelGateway for ScriptedGateway {
        async fn next_actions(
            &self,
            messages: &[ChatMessage],
            _workspace: &Path,
        ) -> Result<AgentResponse, LlmError> {
            self.seen.lock().unwrap().push(messages.to_vec());
            let next = self.replies.lock().unwrap().pop_front();
            let reply = match next {
                Some(reply) => reply,
                None => self.fallback.clone(),
            };
            match reply {
                Some(raw) => parse_agent_response(&raw),
                None => Err(LlmError::network_error("connection refused".to_string())),
            }
        }
    }

    struct Fixture {
        _dir: TempDir,
        workspace: PathBuf,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let workspace = dir.path().join("ws");
        std::fs::create_dir_all(workspace.join("src")).unwrap();
        std::fs::write(workspace.join("src/a.py"), "print('hello')\n").unwrap();
        std::fs::write(dir.path().join("secrets.txt"), "hunter2").unwrap();
        Fixture { _dir: dir, workspace }
    }

    fn limits(max_iterations: usize, max_failures: usize) -> LoopLimits {
        LoopLimits {
            max_iterations,
            max_consecutive_failures: max_failures,
            ..LoopLimits::default()
        }
    }

    fn policy() -> Arc<PolicyEngine> {
        Arc::new(PolicyEngine::new(PolicyConfig {
            allowed_paths: vec!["src".to_string()],
            ..PolicyConfig::default()
        }))
    }

    async fn run(
        gateway: Arc<ScriptedGateway>,
        workspace: &Path,
        limits: LoopLimits,
    ) -> (TaskRecord, Vec<TaskEvent>) {
        let orchestrator = Orchestrator::new(
            gateway,
            Arc::new(ToolRegistry::with_defaults()),
            policy(),
            limits,
        );
        run_with(&orchestrator, workspace).await
    }

    async fn run_with(orchestrator: &Orchestrator, workspace: &Path) -> (TaskRecord, Vec<TaskEvent>) {
        let record = TaskRecord::new(
            TaskId::from("t-1"),
            "do the thing".to_string(),
            workspace.to_path_buf(),
        )
        .unwrap();
        let task = RwLock::new(record);
        let (tx, mut rx) = mpsc::channel(1024);
        let sink = EventSink::new(TaskId::from("t-1"), tx);

        orchestrator.run(&task, &sink).await.unwrap();
        drop(sink);

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        (task.into_inner(), events)
    }

    fn terminal_events(events: &[TaskEvent]) -> usize {
        events.iter().filter(|e| e.is_terminal()).count()
    }

    const FINISH: &str =
        r#"{"reasoning": "all done", "actions": [{"tool": "finish", "params": {"success": true, "message": "done"}}]}"#;
    const MISSING_READ: &str =
        r#"{"actions": [{"tool": "read_file", "params": {"path": "src/missing.py"}}]}"#;

    #[tokio::test]
    async fn test_immediate_finish_completes_in_one_iteration() {
        let fx = fixture();
        let gateway = Arc::new(ScriptedGateway::new(vec![Some(FINISH)]));
        let (record, events) = run(gateway, &fx.workspace, limits(5, 3)).await;

        assert_eq!(record.status(), TaskStatus::Completed);
        assert_eq!(record.result().unwrap()["message"], "done");
        assert_eq!(record.iteration_count(), 1);

        let names: Vec<&str> = events.iter().map(|e| e.event_name()).collect();
        assert_eq!(
            names,
            vec![
                "iteration_start",
                "reasoning",
                "action_start",
                "action_success",
                "task_completed"
            ]
        );
        match events.last().unwrap() {
            TaskEvent::TaskCompleted {
                success,
                message,
                summary,
                ..
            } => {
                assert!(success);
                assert_eq!(message, "done");
                assert_eq!(summary.status, TaskStatus::Completed);
                assert_eq!(summary.iterations, 1);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_read_inside_allow_list_then_finish() {
        let fx = fixture();
        let gateway = Arc::new(ScriptedGateway::new(vec![
            Some(r#"{"actions": [{"tool": "read_file", "params": {"path": "src/a.py"}}]}"#),
            Some(FINISH),
        ]));
        let (record, events) = run(gateway.clone(), &fx.workspace, limits(5, 3)).await;

        assert_eq!(record.status(), TaskStatus::Completed);
        let read = &record.history()[0].results[0];
        assert!(read.success);
        assert!(read.result.as_ref().unwrap().as_str().unwrap().contains("print('hello')"));

        // Second model call sees the request, the first reply and the results summary.
        let seen = gateway.seen.lock().unwrap();
        let second = &seen[1];
        assert_eq!(second.len(), 3);
        assert_eq!(second[1].role, Role::Assistant);
        assert!(second[2].content.starts_with("Tool execution results:\n✅ read_file:"));
        assert_eq!(terminal_events(&events), 1);
    }

    #[tokio::test]
    async fn test_traversal_fails_task_immediately() {
        let fx = fixture();
        let gateway = Arc::new(ScriptedGateway::new(vec![Some(
            r#"{"actions": [
                {"tool": "read_file", "params": {"path": "../secrets.txt"}},
                {"tool": "finish", "params": {"message": "never reached"}}
            ]}"#,
        )]));
        let (record, events) = run(gateway.clone(), &fx.workspace, limits(5, 3)).await;

        assert_eq!(record.status(), TaskStatus::Failed);
        assert!(record.error().unwrap().contains("Path traversal"));
        assert_eq!(gateway.calls(), 1);

        let names: Vec<&str> = events.iter().map(|e| e.event_name()).collect();
        assert_eq!(
            names,
            vec![
                "iteration_start",
                "action_start",
                "security_violation",
                "task_failed"
            ]
        );
        let outcome = &record.history()[0].results[0];
        assert_eq!(outcome.error_type.as_deref(), Some("SecurityError"));
    }

    #[tokio::test]
    async fn test_chained_command_is_security_violation() {
        let fx = fixture();
        let gateway = Arc::new(ScriptedGateway::new(vec![Some(
            r#"{"actions": [{"tool": "run_command", "params": {"command": "pytest && rm -rf /"}}]}"#,
        )]));
        let (record, events) = run(gateway, &fx.workspace, limits(5, 3)).await;

        assert_eq!(record.status(), TaskStatus::Failed);
        assert!(events
            .iter()
            .any(|e| matches!(e, TaskEvent::SecurityViolation { tool, .. } if tool == "run_command")));
    }

    #[tokio::test]
    async fn test_failure_cap_reached_exactly() {
        let fx = fixture();
        let gateway = Arc::new(ScriptedGateway::new(vec![
            Some(MISSING_READ),
            Some(MISSING_READ),
            Some(MISSING_READ),
            Some(FINISH),
        ]));
        let (record, events) = run(gateway.clone(), &fx.workspace, limits(10, 3)).await;

        assert_eq!(record.status(), TaskStatus::Failed);
        assert_eq!(
            record.error(),
            Some("Too many consecutive failures (3). Aborting.")
        );
        assert_eq!(gateway.calls(), 3);
        assert_eq!(record.iteration_count(), 3);
        assert_eq!(terminal_events(&events), 1);
    }

    #[tokio::test]
    async fn test_success_resets_failure_streak() {
        let fx = fixture();
        let gateway = Arc::new(ScriptedGateway::new(vec![
            Some(MISSING_READ),
            Some(MISSING_READ),
            Some(r#"{"actions": [{"tool": "list_files", "params": {"path": "src"}}]}"#),
            Some(MISSING_READ),
            Some(MISSING_READ),
            Some(FINISH),
        ]));
        let (record, _) = run(gateway, &fx.workspace, limits(10, 3)).await;

        assert_eq!(record.status(), TaskStatus::Completed);
        assert_eq!(record.iteration_count(), 6);
    }

    #[tokio::test]
    async fn test_failures_count_per_action_within_batch() {
        let fx = fixture();
        let gateway = Arc::new(ScriptedGateway::new(vec![Some(
            r#"{"actions": [
                {"tool": "list_files", "params": {"path": "src"}},
                {"tool": "read_file", "params": {"path": "src/missing.py"}},
                {"tool": "read_file", "params": {"path": "src/missing.py"}}
            ]}"#,
        ), Some(MISSING_READ)]));
        let (record, _) = run(gateway, &fx.workspace, limits(10, 3)).await;

        assert_eq!(record.status(), TaskStatus::Failed);
        assert_eq!(record.iteration_count(), 2);
    }

    #[tokio::test]
    async fn test_gateway_failures_share_the_streak() {
        let fx = fixture();
        let gateway = Arc::new(ScriptedGateway::new(vec![None, None, None]));
        let (record, events) = run(gateway, &fx.workspace, limits(10, 3)).await;

        assert_eq!(record.status(), TaskStatus::Failed);
        assert_eq!(
            record.error(),
            Some("Too many consecutive LLM failures (3)")
        );
        assert_eq!(
            events.iter().filter(|e| e.event_name() == "error").count(),
            3
        );
        assert_eq!(record.iteration_count(), 0);
    }

    #[tokio::test]
    async fn test_gateway_failure_then_recovery() {
        let fx = fixture();
        let gateway = Arc::new(ScriptedGateway::new(vec![None, None, Some(FINISH)]));
        let (record, _) = run(gateway, &fx.workspace, limits(10, 3)).await;

        assert_eq!(record.status(), TaskStatus::Completed);
    }

    #[tokio::test]
    async fn test_iteration_cap() {
        let fx = fixture();
        let gateway = Arc::new(ScriptedGateway::repeating(
            r#"{"reasoning": "looking around", "actions": [{"tool": "list_files", "params": {"path": "src"}}]}"#,
        ));
        let (record, events) = run(gateway.clone(), &fx.workspace, limits(4, 3)).await;

        assert_eq!(record.status(), TaskStatus::Failed);
        assert_eq!(
            record.error(),
            Some("Max iterations (4) reached without completion")
        );
        assert_eq!(gateway.calls(), 4);
        assert_eq!(record.iteration_count(), 4);
        assert_eq!(
            events
                .iter()
                .filter(|e| e.event_name() == "iteration_start")
                .count(),
            4
        );
    }

    #[tokio::test]
    async fn test_empty_batch_counts_as_iteration() {
        let fx = fixture();
        let gateway = Arc::new(ScriptedGateway::new(vec![
            Some("not json at all"),
            Some(r#"{"actions": []}"#),
        ]));
        let (record, _) = run(gateway, &fx.workspace, limits(2, 3)).await;

        assert_eq!(record.status(), TaskStatus::Failed);
        assert_eq!(record.iteration_count(), 1);
        assert!(record.history()[0].results.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_tool_is_recoverable() {
        let fx = fixture();
        let gateway = Arc::new(ScriptedGateway::new(vec![
            Some(r#"{"actions": [{"tool": "teleport", "params": {}}]}"#),
            Some(FINISH),
        ]));
        let (record, events) = run(gateway, &fx.workspace, limits(5, 3)).await;

        assert_eq!(record.status(), TaskStatus::Completed);
        assert!(events.iter().any(|e| matches!(
            e,
            TaskEvent::ActionFailed { tool, error, .. } if tool == "teleport" && error.contains("finish")
        )));
    }

    #[tokio::test]
    async fn test_run_rejects_non_pending_task() {
        let fx = fixture();
        let orchestrator = Orchestrator::new(
            Arc::new(ScriptedGateway::new(vec![])),
            Arc::new(ToolRegistry::with_defaults()),
            policy(),
            limits(1, 1),
        );
        let mut record =
            TaskRecord::new(TaskId::new(), "x".to_string(), fx.workspace.clone()).unwrap();
        record.start().unwrap();
        let task = RwLock::new(record);

        let err = orchestrator
            .run(&task, &EventSink::detached(TaskId::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::InvalidTransition { .. }));
    }

    /// Sleeps before every answer.
    struct SlowGateway {
        delay: Duration,
        reply: &'static str,
    }

    #[async_trait]
    impl ModelGateway for SlowGateway {
        async fn next_actions(
            &self,
            _messages: &[ChatMessage],
            _workspace: &Path,
        ) -> Result<AgentResponse, LlmError> {
            tokio::time::sleep(self.delay).await;
            parse_agent_response(self.reply)
        }
    }

    /// A tool that sleeps before returning, optionally ending the task.
    struct SleepyTool {
        name: &'static str,
        delay: Duration,
        terminal: bool,
    }

    #[async_trait]
    impl crate::tools::Tool for SleepyTool {
        fn name(&self) -> &str {
            self.name
        }

        fn description(&self) -> &str {
            "Sleep, then report back"
        }

        fn parameters_schema(&self) -> Value {
            json!({"type": "object", "properties": {}})
        }

        fn is_terminal(&self) -> bool {
            self.terminal
        }

        async fn execute(&self, _args: Value, _workspace: &Path) -> Result<Value, ToolError> {
            tokio::time::sleep(self.delay).await;
            Ok(json!({"slept_ms": self.delay.as_millis() as u64, "message": "slept"}))
        }
    }

    fn registry_with(tool: SleepyTool) -> Arc<ToolRegistry> {
        let mut registry = ToolRegistry::with_defaults();
        registry.register(Arc::new(tool));
        Arc::new(registry)
    }

    #[tokio::test]
    async fn test_model_timeout_counts_toward_streak() {
        let fx = fixture();
        let orchestrator = Orchestrator::new(
            Arc::new(SlowGateway {
                delay: Duration::from_millis(500),
                reply: FINISH,
            }),
            Arc::new(ToolRegistry::with_defaults()),
            policy(),
            limits(10, 2),
        )
        .with_model_timeout(Duration::from_millis(20));

        let (record, events) = run_with(&orchestrator, &fx.workspace).await;

        assert_eq!(record.status(), TaskStatus::Failed);
        assert_eq!(record.error(), Some("Too many consecutive LLM failures (2)"));
        let errors: Vec<&TaskEvent> = events.iter().filter(|e| e.event_name() == "error").collect();
        assert_eq!(errors.len(), 2);
        assert!(matches!(
            errors[0],
            TaskEvent::Error { message } if message.contains("no response after")
        ));
    }

    #[tokio::test]
    async fn test_slow_tool_times_out_and_is_recoverable() {
        let fx = fixture();
        let orchestrator = Orchestrator::new(
            Arc::new(ScriptedGateway::new(vec![
                Some(r#"{"actions": [{"tool": "nap", "params": {}}]}"#),
                Some(FINISH),
            ])),
            registry_with(SleepyTool {
                name: "nap",
                delay: Duration::from_millis(500),
                terminal: false,
            }),
            policy(),
            LoopLimits {
                tool_timeout: Duration::from_millis(20),
                ..limits(5, 3)
            },
        );

        let (record, events) = run_with(&orchestrator, &fx.workspace).await;

        assert_eq!(record.status(), TaskStatus::Completed);
        assert!(events.iter().any(|e| matches!(
            e,
            TaskEvent::ActionFailed { tool, error_type, .. } if tool == "nap" && error_type == "timeout"
        )));
        let outcome = &record.history()[0].results[0];
        assert!(!outcome.success);
        assert_eq!(outcome.error_type.as_deref(), Some("timeout"));
    }

    #[tokio::test]
    async fn test_terminal_action_has_no_timeout() {
        let fx = fixture();
        let orchestrator = Orchestrator::new(
            Arc::new(ScriptedGateway::new(vec![Some(
                r#"{"actions": [{"tool": "slow_finish", "params": {}}]}"#,
            )])),
            registry_with(SleepyTool {
                name: "slow_finish",
                delay: Duration::from_millis(100),
                terminal: true,
            }),
            policy(),
            LoopLimits {
                tool_timeout: Duration::from_millis(5),
                ..limits(1, 1)
            },
        );

        let (record, events) = run_with(&orchestrator, &fx.workspace).await;

        assert_eq!(record.status(), TaskStatus::Completed);
        assert_eq!(record.result().unwrap()["slept_ms"], 100);
        assert!(!events.iter().any(|e| e.event_name() == "action_failed"));
    }

    #[test]
    fn test_format_results() {
        assert_eq!(format_results(&[]), "No tools executed.");

        let text = format_results(&[
            ActionOutcome::success("list_files", json!({"count": 2})),
            ActionOutcome::failure("read_file", "File not found: x", "NotFound"),
        ]);
        assert_eq!(
            text,
            "✅ list_files: {\"count\":2}\n❌ read_file: NotFound - File not found: x"
        );
    }
}
