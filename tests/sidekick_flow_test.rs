//! Sidekick 端到端流程测试：脚本化模型 + 内存 / 文件存储

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::Value;
    use sidekick::config::AppConfig;
    use sidekick::core::{
        ModelError, Orchestrator, OrchestratorConfig, RunRequest, RunState, StopReason,
        TaskScheduler,
    };
    use sidekick::llm::ScriptedLlmClient;
    use sidekick::memory::{
        ConversationStore, FileConversationStore, MemoryConversationStore, Message, Role,
        VerdictKind,
    };
    use sidekick::react::{Evaluator, MarkerOracle, SidekickEvent, Worker};
    use sidekick::tools::{CalculatorTool, Tool, ToolExecutor, ToolRegistry};
    use sidekick::{Sidekick, SidekickBuilder};
    use tokio::sync::mpsc;

    /// 睡眠后返回的测试工具，用于制造耗时步骤
    struct SlowTool(Duration);

    #[async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }

        fn description(&self) -> &str {
            "Sleeps, then returns \"slept\"."
        }

        async fn execute(&self, _args: Value) -> Result<String, String> {
            tokio::time::sleep(self.0).await;
            Ok("slept".to_string())
        }
    }

    fn verdict_json(met: bool, feedback: &str) -> String {
        serde_json::json!({"feedback": feedback, "success_criteria_met": met}).to_string()
    }

    fn config(max_iterations: u32, max_run_secs: u64) -> AppConfig {
        let mut cfg = AppConfig::default();
        cfg.llm.provider = "mock".into();
        cfg.orchestrator.max_iterations = max_iterations;
        cfg.orchestrator.max_run_secs = max_run_secs;
        cfg.tools.search.api_key_env = "SIDEKICK_TEST_UNSET_SEARCH_KEY".into();
        cfg
    }

    fn sidekick(
        workspace: &Path,
        cfg: AppConfig,
        worker: &Arc<ScriptedLlmClient>,
        evaluator: &Arc<ScriptedLlmClient>,
        store: Arc<dyn ConversationStore>,
    ) -> Sidekick {
        SidekickBuilder::new(cfg, workspace.to_path_buf())
            .with_llms(worker.clone(), evaluator.clone())
            .with_store(store)
            .with_tool(SlowTool(Duration::from_millis(1500)))
            .build()
    }

    #[tokio::test]
    async fn test_haiku_satisfied_first_try() {
        let dir = tempfile::tempdir().unwrap();
        let worker = Arc::new(ScriptedLlmClient::replies([
            "An old silent pond\nA frog jumps into the pond\nSplash! Silence again",
        ]));
        let evaluator = Arc::new(ScriptedLlmClient::replies([verdict_json(true, "Three lines.")]));
        let store = Arc::new(MemoryConversationStore::new());
        let sk = sidekick(dir.path(), config(3, 60), &worker, &evaluator, store.clone());

        let history = sk.run("Write a haiku", "exactly 3 lines", Vec::new()).await;

        assert_eq!(history.len(), 3);
        assert_eq!(history[0].role, Role::User);
        assert_eq!(history[1].content.lines().count(), 3);
        assert_eq!(history[2].verdict, Some(VerdictKind::Satisfied));
        assert_eq!(sk.last_state(), Some(RunState::Done));
        assert_eq!(sk.status().stop_reason, Some(StopReason::Satisfied));
        assert_eq!((worker.call_count(), evaluator.call_count()), (1, 1));

        let session = sk.resume().await;
        assert_eq!(session.criteria, "exactly 3 lines");
        assert_eq!(session.messages, history);
    }

    #[tokio::test]
    async fn test_haiku_ending_in_question_mark_is_evaluated() {
        let dir = tempfile::tempdir().unwrap();
        let worker = Arc::new(ScriptedLlmClient::replies([
            "Autumn leaves drifting\nacross the quiet river\nwho will catch them now?",
        ]));
        let evaluator = Arc::new(ScriptedLlmClient::replies([verdict_json(true, "Three lines.")]));
        let sk = sidekick(
            dir.path(),
            config(3, 60),
            &worker,
            &evaluator,
            Arc::new(MemoryConversationStore::new()),
        );

        let history = sk.run("Write a haiku", "exactly 3 lines", Vec::new()).await;

        assert_eq!(sk.last_state(), Some(RunState::Done));
        assert_eq!(sk.status().stop_reason, Some(StopReason::Satisfied));
        assert_eq!(evaluator.call_count(), 1);
        assert_eq!(history.len(), 3);
        assert_eq!(history[2].verdict, Some(VerdictKind::Satisfied));
    }

    #[tokio::test]
    async fn test_orchestrator_adds_exactly_two_messages() {
        let worker_llm = Arc::new(ScriptedLlmClient::replies(["one\ntwo\nthree"]));
        let evaluator_llm = Arc::new(ScriptedLlmClient::replies([verdict_json(true, "ok")]));
        let oracle = Arc::new(MarkerOracle::new());
        let executor = Arc::new(ToolExecutor::new(Arc::new(ToolRegistry::new()), 5));
        let orch = Orchestrator::new(
            Arc::new(Worker::new(worker_llm, executor, oracle.clone())),
            Arc::new(Evaluator::new(evaluator_llm, oracle)),
            OrchestratorConfig::default(),
        );
        let initial = vec![Message::user("Write a haiku")];
        let outcome = orch
            .run(
                &MemoryConversationStore::new(),
                RunRequest::new("Write a haiku", "exactly 3 lines", initial.clone()),
            )
            .await
            .unwrap();
        assert_eq!(outcome.state, RunState::Done);
        assert_eq!(outcome.history.len(), initial.len() + 2);
        assert_eq!(outcome.history[0], initial[0]);
    }

    #[tokio::test]
    async fn test_worker_question_awaits_user() {
        let dir = tempfile::tempdir().unwrap();
        let worker = Arc::new(ScriptedLlmClient::replies([
            "Question: which city should the itinerary cover?",
        ]));
        let evaluator = Arc::new(ScriptedLlmClient::default());
        let sk = sidekick(
            dir.path(),
            config(3, 60),
            &worker,
            &evaluator,
            Arc::new(MemoryConversationStore::new()),
        );

        let history = sk.run("Plan a weekend trip", "a day-by-day plan", Vec::new()).await;

        assert_eq!(sk.last_state(), Some(RunState::AwaitingUser));
        assert_eq!(evaluator.call_count(), 0);
        let last = history.last().unwrap();
        assert_eq!(last.role, Role::Worker);
        assert!(last.content.starts_with("Question:"));

        // 用户回答后同一会话继续
        worker.push(Ok("Day 1: museums. Day 2: parks.".into()));
        evaluator.push(Ok(verdict_json(true, "Complete plan.")));
        let history = sk.run("Lisbon", "a day-by-day plan", history).await;
        assert_eq!(sk.last_state(), Some(RunState::Done));
        assert_eq!(history.len(), 5);
    }

    #[tokio::test]
    async fn test_unsatisfiable_criteria_hits_iteration_cap() {
        let dir = tempfile::tempdir().unwrap();
        let worker = Arc::new(ScriptedLlmClient::replies(["attempt 1", "attempt 2", "attempt 3"]));
        let evaluator = Arc::new(ScriptedLlmClient::replies([
            verdict_json(false, "Not a prime above a googol."),
            verdict_json(false, "Still not."),
            verdict_json(false, "Repeating the same mistake."),
        ]));
        let sk = sidekick(
            dir.path(),
            config(3, 60),
            &worker,
            &evaluator,
            Arc::new(MemoryConversationStore::new()),
        );

        let history = sk
            .run("Give me a prime", "a proven prime larger than 10^100 with a one-line proof", Vec::new())
            .await;

        assert_eq!((worker.call_count(), evaluator.call_count()), (3, 3));
        assert_eq!(history.len(), 1 + 3 * 2);
        assert_eq!(sk.last_state(), Some(RunState::Done));
        assert_eq!(sk.status().stop_reason, Some(StopReason::IterationCap));
        assert_eq!(history.last().unwrap().verdict, Some(VerdictKind::Unsatisfied));

        // 第二次尝试的系统提示带上了第一次的反馈
        let second_system = &worker.prompts()[1][0].content;
        assert!(second_system.contains("Not a prime above a googol."));
    }

    #[tokio::test]
    async fn test_empty_criteria_accepts_complete_answer() {
        let dir = tempfile::tempdir().unwrap();
        let worker = Arc::new(ScriptedLlmClient::replies(["Paris is the capital of France."]));
        let evaluator = Arc::new(ScriptedLlmClient::default());
        let sk = sidekick(
            dir.path(),
            config(3, 60),
            &worker,
            &evaluator,
            Arc::new(MemoryConversationStore::new()),
        );

        let history = sk.run("Capital of France?", "", Vec::new()).await;

        assert_eq!(history.len(), 3);
        assert_eq!(history[2].verdict, Some(VerdictKind::Satisfied));
        assert_eq!(worker.call_count(), 1);
        assert_eq!(evaluator.call_count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_capability_does_not_abort() {
        let dir = tempfile::tempdir().unwrap();
        let worker = Arc::new(ScriptedLlmClient::replies([
            r#"{"tool": "teleport", "args": {"to": "mars"}}"#,
            "I cannot teleport, but here is a summary of Mars.",
        ]));
        let evaluator = Arc::new(ScriptedLlmClient::default());
        let sk = sidekick(
            dir.path(),
            config(3, 60),
            &worker,
            &evaluator,
            Arc::new(MemoryConversationStore::new()),
        );

        let history = sk.run("Take me to Mars", "", Vec::new()).await;

        assert_eq!(sk.last_state(), Some(RunState::Done));
        let tool_msg = history.iter().find(|m| m.role == Role::Tool).unwrap();
        let result = tool_msg.tool_result.as_ref().unwrap();
        assert!(result.is_error);
        assert!(result.output.contains("Unknown capability: teleport"));
        assert!(!history.iter().any(|m| m.is_error));
    }

    #[tokio::test]
    async fn test_tool_round_then_answer() {
        let dir = tempfile::tempdir().unwrap();
        let worker = Arc::new(ScriptedLlmClient::replies([
            r#"{"tool": "calculator", "args": {"expression": "6 * 7"}}"#,
            "The answer is 42.",
        ]));
        let evaluator = Arc::new(ScriptedLlmClient::replies([verdict_json(true, "Correct.")]));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sk = SidekickBuilder::new(config(3, 60), dir.path().to_path_buf())
            .with_llms(worker.clone(), evaluator.clone())
            .with_store(Arc::new(MemoryConversationStore::new()))
            .with_tool(CalculatorTool)
            .with_event_tx(tx)
            .build();

        let history = sk.run("What is 6 times 7?", "the correct number", Vec::new()).await;

        assert_eq!(history[1].content, "[calculator] 42");
        assert_eq!(history[2].content, "The answer is 42.");

        let mut events = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            events.push(ev);
        }
        assert!(matches!(events.first(), Some(SidekickEvent::IterationStarted { iteration: 1, .. })));
        assert!(events
            .iter()
            .any(|e| matches!(e, SidekickEvent::ToolResult { tool, ok: true, .. } if tool == "calculator")));
        assert!(matches!(
            events.last(),
            Some(SidekickEvent::Finished { state: RunState::Done })
        ));
    }

    #[tokio::test]
    async fn test_model_error_becomes_error_message() {
        let dir = tempfile::tempdir().unwrap();
        let worker = Arc::new(ScriptedLlmClient::new(vec![Err(ModelError::ExhaustedRetries {
            attempts: 3,
            last_error: "connection refused".into(),
        })]));
        let evaluator = Arc::new(ScriptedLlmClient::default());
        let store = Arc::new(MemoryConversationStore::new());
        let sk = sidekick(dir.path(), config(3, 60), &worker, &evaluator, store.clone());

        let history = sk.run("Summarize the news", "", Vec::new()).await;

        assert_eq!(history.len(), 2);
        let last = history.last().unwrap();
        assert!(last.is_error);
        assert!(last.content.starts_with("Error:"));
        assert!(last.content.contains("connection refused"));
        assert!(sk.status().last_error.is_some());
        assert_eq!(store.load().await.messages, history);

        // 会话仍可继续，错误消息不会发给模型
        worker.push(Ok("Here is the summary.".into()));
        let history = sk.run("Try again", "", history).await;
        assert_eq!(sk.last_state(), Some(RunState::Done));
        assert!(worker.prompts()[1].iter().all(|p| !p.content.starts_with("Error:")));
        assert_eq!(history.len(), 5);
    }

    #[tokio::test]
    async fn test_time_budget_stops_run() {
        let dir = tempfile::tempdir().unwrap();
        let worker = Arc::new(ScriptedLlmClient::replies([
            r#"{"tool": "slow", "args": {}}"#,
            "done",
        ]));
        let evaluator = Arc::new(ScriptedLlmClient::default());
        let sk = sidekick(
            dir.path(),
            config(3, 1),
            &worker,
            &evaluator,
            Arc::new(MemoryConversationStore::new()),
        );

        let history = sk.run("Do something slow", "", Vec::new()).await;

        assert_eq!(sk.last_state(), Some(RunState::Done));
        assert_eq!(sk.status().stop_reason, Some(StopReason::TimeBudget));
        // 被截断的步骤整体丢弃，只留下用户消息和说明
        assert_eq!(history.len(), 2);
        assert!(history[1].content.contains("time limit"));
        assert_eq!(evaluator.call_count(), 0);
    }

    #[tokio::test]
    async fn test_time_budget_note_mentions_unrecorded_tool_work() {
        let dir = tempfile::tempdir().unwrap();
        let worker = Arc::new(ScriptedLlmClient::replies([
            r#"{"tool": "write_file", "args": {"file_path": "draft.md", "text": "partial"}}"#,
            r#"{"tool": "slow", "args": {}}"#,
            "done",
        ]));
        let evaluator = Arc::new(ScriptedLlmClient::default());
        let store = Arc::new(MemoryConversationStore::new());
        let sk = sidekick(dir.path(), config(3, 1), &worker, &evaluator, store.clone());

        let history = sk.run("Draft a report slowly", "", Vec::new()).await;

        assert_eq!(sk.status().stop_reason, Some(StopReason::TimeBudget));
        // 写文件已生效，但所在步骤被丢弃，历史中没有对应的工具消息
        assert_eq!(
            std::fs::read_to_string(dir.path().join("draft.md")).unwrap(),
            "partial"
        );
        assert!(history.iter().all(|m| m.role != Role::Tool));
        let note = &history.last().unwrap().content;
        assert!(note.contains("time limit"));
        assert!(note.contains("may have taken effect without being recorded"));
        assert_eq!(store.load().await.messages, history);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancel_between_steps() {
        let dir = tempfile::tempdir().unwrap();
        let worker = Arc::new(ScriptedLlmClient::replies([
            r#"{"tool": "slow", "args": {}}"#,
            "finished the slow work",
        ]));
        let evaluator = Arc::new(ScriptedLlmClient::default());
        let sk = Arc::new(sidekick(
            dir.path(),
            config(3, 60),
            &worker,
            &evaluator,
            Arc::new(MemoryConversationStore::new()),
        ));

        let runner = {
            let sk = sk.clone();
            tokio::spawn(async move { sk.run("Slow task", "", Vec::new()).await })
        };
        tokio::time::sleep(Duration::from_millis(300)).await;
        sk.cancel();
        let history = runner.await.unwrap();

        // 进行中的工具调用不被打断：Worker 步骤完整提交，Evaluator 不再运行
        assert_eq!(evaluator.call_count(), 0);
        let roles: Vec<Role> = history.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Tool, Role::Worker, Role::Worker]);
        assert!(history[3].is_error);
        assert!(history[3].content.contains("Cancelled"));
    }

    #[tokio::test]
    async fn test_file_store_survives_restart_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sidekick_memory.json");
        let worker = Arc::new(ScriptedLlmClient::replies(["Hello there!"]));
        let evaluator = Arc::new(ScriptedLlmClient::default());
        let sk = sidekick(
            dir.path(),
            config(3, 60),
            &worker,
            &evaluator,
            Arc::new(FileConversationStore::new(&path)),
        );
        let history = sk.run("Say hello", "", Vec::new()).await;
        assert_eq!(history.len(), 3);

        let reopened = FileConversationStore::new(&path);
        assert_eq!(reopened.load().await.messages, history);

        sk.reset();
        assert_eq!(sk.last_state(), None);
        assert_eq!(reopened.load().await.len(), 3);

        sk.clear_memory().await;
        assert!(reopened.load().await.is_empty());
        assert!(!path.exists());
        sk.free_resources().await;
    }

    #[tokio::test]
    async fn test_concurrent_runs_are_serialized() {
        let dir = tempfile::tempdir().unwrap();
        let worker = Arc::new(ScriptedLlmClient::replies(["first", "second"]));
        let evaluator = Arc::new(ScriptedLlmClient::default());
        let store = Arc::new(MemoryConversationStore::new());
        let sk = Arc::new(sidekick(dir.path(), config(3, 60), &worker, &evaluator, store.clone()));

        let a = {
            let sk = sk.clone();
            tokio::spawn(async move { sk.run("one", "", Vec::new()).await })
        };
        let b = {
            let sk = sk.clone();
            tokio::spawn(async move { sk.run("two", "", Vec::new()).await })
        };
        a.await.unwrap();
        b.await.unwrap();

        // 两个 run 的消息各自连续，不交错
        let messages = store.load().await.messages;
        assert_eq!(messages.len(), 6);
        for chunk in messages.chunks(3) {
            let roles: Vec<Role> = chunk.iter().map(|m| m.role).collect();
            assert_eq!(roles, vec![Role::User, Role::Worker, Role::Evaluator]);
        }
    }

    #[test]
    fn test_scheduler_default_width() {
        assert_eq!(TaskScheduler::default().max_concurrent_tools(), 3);
    }
}
