//! 工作流端到端场景：工具往返、评审修订循环、适配器重试、资料缺失、上限、恢复、取消与并发会话

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use course_designer::core::{
    FailureReason, Orchestrator, OrchestratorBuilder, SessionOutcome, WorkflowError,
    WorkflowLimits, WorkflowPhase, WorkflowState,
};
use course_designer::designer::{Critic, Planner, WorkflowEvent, DEFAULT_CRITIC_PROMPT};
use course_designer::llm::{
    LlmError, MockLlmClient, RetryConfig, RetryingLlmClient, ScriptedLlmClient,
};
use course_designer::materials::MaterialLibrary;
use course_designer::memory::{
    AssistantMessage, CheckpointError, CheckpointStore, InMemoryCheckpointStore, Message,
    ToolCall,
};
use course_designer::tools::{material_tools, ToolExecutor};
use serde_json::json;
use uuid::Uuid;

/// 可以模拟「存储宕机」的检查点存储
#[derive(Default)]
struct FlakyStore {
    inner: InMemoryCheckpointStore,
    saves: AtomicU32,
    /// 成功写入这么多次之后开始失败（0 表示不限制）
    fail_after: AtomicU32,
    down: AtomicBool,
}

impl FlakyStore {
    fn fail_after(n: u32) -> Self {
        let store = Self::default();
        store.fail_after.store(n, Ordering::SeqCst);
        store
    }

    fn recover(&self) {
        self.fail_after.store(0, Ordering::SeqCst);
        self.down.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl CheckpointStore for FlakyStore {
    async fn save(&self, session_id: &str, state: &WorkflowState) -> Result<(), CheckpointError> {
        let limit = self.fail_after.load(Ordering::SeqCst);
        if limit > 0 && self.saves.load(Ordering::SeqCst) >= limit {
            self.down.store(true, Ordering::SeqCst);
        }
        if self.down.load(Ordering::SeqCst) {
            return Err(CheckpointError::Database("disk unavailable".into()));
        }
        self.inner.save(session_id, state).await?;
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn load(&self, session_id: &str) -> Result<Option<WorkflowState>, CheckpointError> {
        self.inner.load(session_id).await
    }

    async fn list_sessions(&self) -> Result<Vec<String>, CheckpointError> {
        self.inner.list_sessions().await
    }
}

struct Harness {
    designer: Arc<ScriptedLlmClient>,
    critic: Arc<ScriptedLlmClient>,
    store: Arc<dyn CheckpointStore>,
    orchestrator: Arc<Orchestrator>,
    attachment_id: Uuid,
    library: Arc<MaterialLibrary>,
    events: tokio::sync::mpsc::UnboundedReceiver<WorkflowEvent>,
    dir: tempfile::TempDir,
}

impl Harness {
    /// 在资料目录写入并登记一个附件
    async fn attach(&self, name: &str, content: &[u8]) -> Uuid {
        let path = self.dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        self.library.register_file(&path).await.unwrap().id
    }
}

fn fast_retry() -> RetryConfig {
    RetryConfig {
        max_retries: 3,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(5),
        request_timeout: Duration::from_secs(5),
    }
}

async fn harness_with(
    designer: ScriptedLlmClient,
    store: Arc<dyn CheckpointStore>,
    limits: WorkflowLimits,
) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("Lecture 1.md");
    std::fs::write(&path, "# Search\nBFS, DFS and A* on grids").unwrap();
    let library = Arc::new(MaterialLibrary::new());
    let attachment_id = library.register_file(&path).await.unwrap().id;

    let designer = Arc::new(designer);
    let critic = Arc::new(ScriptedLlmClient::new());
    let executor = ToolExecutor::new(material_tools(library.clone(), None, 5), 5);
    let planner = Planner::new(
        Arc::new(RetryingLlmClient::new(designer.clone(), fast_retry())),
        executor.specs(),
    );
    let (tx, events) = tokio::sync::mpsc::unbounded_channel();
    let orchestrator = OrchestratorBuilder::new(
        Arc::new(planner),
        Arc::new(Critic::new(critic.clone(), DEFAULT_CRITIC_PROMPT)),
        executor,
        store.clone(),
    )
    .with_system_prompt("You design courses.")
    .with_limits(limits)
    .with_events(tx)
    .build();

    Harness {
        designer,
        critic,
        store,
        orchestrator: Arc::new(orchestrator),
        attachment_id,
        library,
        events,
        dir,
    }
}

async fn harness(limits: WorkflowLimits) -> Harness {
    harness_with(
        ScriptedLlmClient::new(),
        Arc::new(InMemoryCheckpointStore::new()),
        limits,
    )
    .await
}

fn verdict(action: &str, notes: &[&str]) -> String {
    json!({ "action": action, "critique": notes }).to_string()
}

fn accepted(outcome: SessionOutcome) -> (String, WorkflowState) {
    match outcome {
        SessionOutcome::Accepted { structure, state } => (structure, state),
        other => panic!("expected Accepted, got {other:?}"),
    }
}

fn failed(outcome: SessionOutcome) -> (FailureReason, WorkflowState) {
    match outcome {
        SessionOutcome::Failed { reason, state, .. } => (reason, state),
        other => panic!("expected Failed, got {other:?}"),
    }
}

#[tokio::test]
async fn scenario_a_two_tool_calls_then_accept() {
    let mut h = harness(WorkflowLimits::default()).await;
    let id = h.attachment_id;
    h.designer.push_reply(AssistantMessage::with_tool_calls(
        "",
        vec![
            ToolCall::new("c1", "get_materials_metadata", json!({ "attachment_ids": [id] })),
            ToolCall::new("c2", "read_attached_material", json!({ "attachment_id": id })),
        ],
    ));
    h.designer.push_text("# AI course\n1. Search\n2. Planning");
    h.critic.push_text(verdict("accept", &[]));

    let (structure, state) = accepted(h.orchestrator.launch("Design an AI course", "a").await.unwrap());
    assert_eq!(structure, "# AI course\n1. Search\n2. Planning");
    assert_eq!(state.llm_calls, 2);
    assert_eq!(state.messages.len(), 5);
    assert!(state.verify_transcript().is_ok());
    assert_eq!(state.messages[2].role(), course_designer::memory::Role::Tool);
    assert!(state.messages[2].content().contains("Lecture 1.md"));
    assert!(state.messages[3].content().starts_with("**Lecture 1.md:**"));

    // 第二次调用看到完整历史（system + 4 条）
    let requests = h.designer.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[1].len(), 5);
    assert_eq!(requests[1][0], Message::system("You design courses."));

    let stored = h.store.load("a").await.unwrap().unwrap();
    assert_eq!(stored, state);

    let mut saw_accept = false;
    while let Ok(event) = h.events.try_recv() {
        if matches!(event, WorkflowEvent::Accepted { .. }) {
            saw_accept = true;
        }
    }
    assert!(saw_accept);
}

#[tokio::test]
async fn scenario_b_improve_then_accept() {
    let h = harness(WorkflowLimits::default()).await;
    h.designer.push_text("# Draft 1");
    h.designer.push_text("# Draft 2 with labs");
    h.critic.push_text(verdict("improve", &["add more labs"]));
    h.critic.push_text(verdict("accept", &[]));

    let (structure, state) = accepted(h.orchestrator.launch("Design a course", "b").await.unwrap());
    assert_eq!(structure, "# Draft 2 with labs");
    assert_eq!(state.llm_calls, 2);
    assert_eq!(state.rounds, 2);
    // 被接受那一轮没有重新应用意见；保留的是上一轮的意见
    assert_eq!(state.critique, vec!["add more labs".to_string()]);

    let second = &h.designer.requests()[1];
    assert!(second.iter().any(|m| m.content().contains("add more labs")));

    // 第二次评审拿到上一轮意见和新方案
    let critic_prompt = h.critic.requests()[1][0].content().to_string();
    assert!(critic_prompt.contains("add more labs"));
    assert!(critic_prompt.contains("# Draft 2 with labs"));
}

#[tokio::test]
async fn scenario_c_transient_model_failures_are_absorbed() {
    let h = harness(WorkflowLimits::default()).await;
    h.designer.push_error(LlmError::RateLimited { retry_after_ms: 1 });
    h.designer.push_error(LlmError::Network("connection reset".into()));
    h.designer.push_text("# Course");
    h.critic.push_text(verdict("accept", &[]));

    let (_, state) = accepted(h.orchestrator.launch("Design a course", "c").await.unwrap());
    assert_eq!(state.llm_calls, 1);
    assert_eq!(h.designer.requests().len(), 3);
}

#[tokio::test]
async fn scenario_d_missing_material_is_data() {
    let h = harness(WorkflowLimits::default()).await;
    let missing = Uuid::new_v4();
    h.designer.push_reply(AssistantMessage::with_tool_calls(
        "",
        vec![ToolCall::new(
            "c1",
            "read_attached_material",
            json!({ "attachment_id": missing }),
        )],
    ));
    h.designer.push_text("# Course without materials");
    h.critic.push_text(verdict("accept", &[]));

    let (_, state) = accepted(h.orchestrator.launch("Design a course", "d").await.unwrap());
    assert_eq!(state.llm_calls, 2);
    assert_eq!(
        state.messages[2],
        Message::tool_result("c1", format!("Material {missing} not found"))
    );
}

async fn run_single_read(h: &Harness, id: Uuid, session: &str) -> WorkflowState {
    h.designer.push_reply(AssistantMessage::with_tool_calls(
        "",
        vec![ToolCall::new("c1", "read_attached_material", json!({ "attachment_id": id }))],
    ));
    h.designer.push_text("# Course from what was readable");
    h.critic.push_text(verdict("accept", &[]));
    let (_, state) = accepted(h.orchestrator.launch("Design a course", session).await.unwrap());
    state
}

#[tokio::test]
async fn deleted_material_file_is_data() {
    let h = harness(WorkflowLimits::default()).await;
    let id = h.attach("gone.md", b"# Gone").await;
    std::fs::remove_file(h.dir.path().join("gone.md")).unwrap();

    let state = run_single_read(&h, id, "gone").await;
    assert_eq!(state.llm_calls, 2);
    assert!(state.messages[2]
        .content()
        .starts_with("Material gone.md could not be read:"));
}

#[tokio::test]
async fn non_utf8_material_is_data() {
    let h = harness(WorkflowLimits::default()).await;
    let id = h.attach("latin1.md", &[0x43, 0x61, 0x66, 0xe9, 0xff]).await;

    let state = run_single_read(&h, id, "latin1").await;
    assert_eq!(state.llm_calls, 2);
    assert!(state.messages[2]
        .content()
        .starts_with("Material latin1.md could not be read:"));
}

#[tokio::test]
async fn empty_tool_call_ids_are_normalized() {
    let h = harness(WorkflowLimits::default()).await;
    let id = h.attachment_id;
    h.designer.push_reply(AssistantMessage::with_tool_calls(
        "",
        vec![
            ToolCall::new("", "get_materials_metadata", json!({ "attachment_ids": [id] })),
            ToolCall::new("", "read_attached_material", json!({ "attachment_id": id })),
        ],
    ));
    h.designer.push_text("# Course");
    h.critic.push_text(verdict("accept", &[]));

    let (_, state) = accepted(h.orchestrator.launch("prompt", "ids").await.unwrap());
    let ids: Vec<&str> = state.messages[1]
        .tool_calls()
        .iter()
        .map(|c| c.id.as_str())
        .collect();
    assert_eq!(ids, vec!["call_0", "call_1"]);
    assert!(matches!(&state.messages[2], Message::ToolResult { tool_call_id, .. } if tool_call_id == "call_0"));
    assert!(state.verify_transcript().is_ok());
}

#[tokio::test]
async fn accept_does_not_touch_critique_or_messages() {
    let h = harness(WorkflowLimits::default()).await;
    h.designer.push_text("# Course");
    h.critic.push_text(verdict("accept", &["ignored"]));

    let (_, state) = accepted(h.orchestrator.launch("prompt", "accept").await.unwrap());
    assert!(state.critique.is_empty());
    assert_eq!(state.messages.len(), 2);
    assert_eq!(state.phase, WorkflowPhase::Accepted);
}

#[tokio::test]
async fn empty_critique_still_produces_directive() {
    let h = harness(WorkflowLimits::default()).await;
    h.designer.push_text("# Draft 1");
    h.designer.push_text("# Draft 2");
    h.critic.push_text(verdict("reject", &[]));
    h.critic.push_text(verdict("accept", &[]));

    let (_, state) = accepted(h.orchestrator.launch("prompt", "empty").await.unwrap());
    match &state.messages[2] {
        Message::Human { content } => assert!(content.contains("without further detail")),
        other => panic!("expected directive, got {other:?}"),
    }
    assert!(state.critique.is_empty());
    assert_ne!(h.designer.requests()[0], h.designer.requests()[1]);
}

#[tokio::test]
async fn revision_loop_is_unbounded_without_cap() {
    let h = harness(WorkflowLimits::default()).await;
    for i in 0..11 {
        h.designer.push_text(format!("# Draft {i}"));
    }
    for i in 0..10 {
        h.critic.push_text(verdict("improve", &[&format!("note {i}")]));
    }
    h.critic.push_text(verdict("accept", &[]));

    let (structure, state) = accepted(h.orchestrator.launch("prompt", "loop").await.unwrap());
    assert_eq!(structure, "# Draft 10");
    assert_eq!(state.llm_calls, 11);
    assert_eq!(state.rounds, 11);
    assert_eq!(state.critique, vec!["note 9".to_string()]);
}

#[tokio::test]
async fn critique_round_cap_fails_with_exhaustion() {
    let h = harness(WorkflowLimits {
        max_critique_rounds: Some(2),
        max_llm_calls: None,
    })
    .await;
    for i in 0..3 {
        h.designer.push_text(format!("# Draft {i}"));
    }
    h.critic.push_text(verdict("improve", &["a"]));
    h.critic.push_text(verdict("improve", &["b"]));

    let (reason, state) = failed(h.orchestrator.launch("prompt", "cap").await.unwrap());
    assert_eq!(reason, FailureReason::RoundsExhausted);
    assert_eq!(state.phase, WorkflowPhase::Failed);
    assert_eq!(state.rounds, 2);
    assert_eq!(state.llm_calls, 2);
    assert_eq!(h.designer.remaining(), 1);
    let failure = state.failure.clone().unwrap();
    assert_eq!(failure.failed_in, WorkflowPhase::Invoking);

    // 已失败的会话再次启动直接返回终态
    let stored = h.store.load("cap").await.unwrap().unwrap();
    assert_eq!(stored.phase, WorkflowPhase::Failed);
    let (reason, _) = failed(h.orchestrator.launch("prompt", "cap").await.unwrap());
    assert_eq!(reason, FailureReason::RoundsExhausted);
    assert_eq!(h.designer.requests().len(), 2);
}

#[tokio::test]
async fn llm_call_cap_counts_every_invocation() {
    let h = harness(WorkflowLimits {
        max_critique_rounds: None,
        max_llm_calls: Some(2),
    })
    .await;
    for _ in 0..3 {
        h.designer.push_reply(AssistantMessage::with_tool_calls(
            "",
            vec![ToolCall::new("t", "get_materials_metadata", json!({ "attachment_ids": [] }))],
        ));
    }

    let (reason, state) = failed(h.orchestrator.launch("prompt", "calls").await.unwrap());
    assert_eq!(reason, FailureReason::LlmCallsExhausted);
    assert_eq!(state.llm_calls, 2);
    // 同名 id 在第二轮被改写，对应关系仍然成立
    assert!(state.verify_transcript().is_ok());
    assert_eq!(state.tool_call_ids().len(), 2);
}

#[tokio::test]
async fn malformed_critic_output_fails_session() {
    let h = harness(WorkflowLimits::default()).await;
    h.designer.push_text("# Course");
    h.critic.push_text("Looks great, ship it!");

    let (reason, state) = failed(h.orchestrator.launch("prompt", "malformed").await.unwrap());
    assert_eq!(reason, FailureReason::MalformedCritique);
    assert_eq!(state.failure.unwrap().failed_in, WorkflowPhase::Critiquing);
    assert_eq!(state.messages.len(), 2);
}

#[tokio::test]
async fn permanent_model_error_is_not_retried() {
    let h = harness(WorkflowLimits::default()).await;
    h.designer.push_error(LlmError::ApiError("401 unauthorized".into()));

    let (reason, state) = failed(h.orchestrator.launch("prompt", "model").await.unwrap());
    assert_eq!(reason, FailureReason::ModelUnavailable);
    assert_eq!(state.llm_calls, 0);
    assert_eq!(h.designer.requests().len(), 1);
}

#[tokio::test]
async fn resume_after_checkpoint_outage() {
    let store = Arc::new(FlakyStore::fail_after(2));
    let h = harness_with(
        ScriptedLlmClient::new(),
        store.clone(),
        WorkflowLimits::default(),
    )
    .await;
    h.designer.push_text("# Course");
    h.critic.push_text(verdict("improve", &["x"]));
    h.critic.push_text(verdict("accept", &[]));

    // Start 与 Invoking 已提交，Critiquing 的提交失败
    let outcome = h.orchestrator.launch("prompt", "outage").await.unwrap();
    let (reason, state) = failed(outcome);
    assert_eq!(reason, FailureReason::CheckpointFailed);
    assert_eq!(state.phase, WorkflowPhase::Critiquing);
    assert_eq!(state.version, 2);

    let stored = h.store.load("outage").await.unwrap().unwrap();
    assert_eq!(stored.phase, WorkflowPhase::Critiquing);
    assert_eq!(stored.critique, Vec::<String>::new());

    store.recover();
    let (_, state) = accepted(h.orchestrator.launch("prompt", "outage").await.unwrap());
    assert_eq!(state.llm_calls, 1);
    assert_eq!(h.designer.requests().len(), 1);
    assert_eq!(h.critic.requests().len(), 2);
}

#[tokio::test]
async fn cancelled_session_resumes_from_last_commit() {
    let h = harness_with(
        ScriptedLlmClient::new().with_delay(Duration::from_millis(300)),
        Arc::new(InMemoryCheckpointStore::new()),
        WorkflowLimits::default(),
    )
    .await;
    h.designer.push_text("# Course");
    h.critic.push_text(verdict("accept", &[]));

    let orchestrator = h.orchestrator.clone();
    let run = tokio::spawn(async move { orchestrator.launch("prompt", "cancel").await });
    while !h.orchestrator.supervisor().is_running("cancel") {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(h.orchestrator.cancel("cancel"));

    let state = match run.await.unwrap().unwrap() {
        SessionOutcome::Cancelled { state } => state,
        other => panic!("expected Cancelled, got {other:?}"),
    };
    assert_eq!(state.phase, WorkflowPhase::Invoking);
    assert_eq!(state.llm_calls, 0);
    assert_eq!(h.store.load("cancel").await.unwrap().unwrap(), state);

    let (_, state) = accepted(h.orchestrator.launch("prompt", "cancel").await.unwrap());
    assert_eq!(state.llm_calls, 1);
}

#[tokio::test]
async fn same_session_cannot_run_twice() {
    let h = harness_with(
        ScriptedLlmClient::new().with_delay(Duration::from_millis(200)),
        Arc::new(InMemoryCheckpointStore::new()),
        WorkflowLimits::default(),
    )
    .await;
    h.designer.push_text("# Course");
    h.critic.push_text(verdict("accept", &[]));

    let orchestrator = h.orchestrator.clone();
    let first = tokio::spawn(async move { orchestrator.launch("prompt", "busy").await });
    while !h.orchestrator.supervisor().is_running("busy") {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(matches!(
        h.orchestrator.launch("prompt", "busy").await,
        Err(WorkflowError::SessionBusy(_))
    ));
    assert!(first.await.unwrap().unwrap().is_accepted());
}

#[tokio::test]
async fn concurrent_sessions_are_independent() {
    let store = Arc::new(InMemoryCheckpointStore::new());
    let orchestrator = Arc::new(
        OrchestratorBuilder::new(
            Arc::new(Planner::new(Arc::new(MockLlmClient::designer()), vec![])),
            Arc::new(Critic::new(
                Arc::new(MockLlmClient::critic()),
                DEFAULT_CRITIC_PROMPT,
            )),
            ToolExecutor::new(Default::default(), 5),
            store.clone(),
        )
        .build(),
    );

    let runs = (0..6).map(|i| {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move {
            orchestrator
                .launch(&format!("Course {i}"), &format!("session-{i}"))
                .await
        })
    });
    for run in futures_util::future::join_all(runs).await {
        let (structure, state) = accepted(run.unwrap().unwrap());
        assert!(structure.contains(&format!("Course {}", &state.session_id[8..])));
        assert_eq!(state.llm_calls, 1);
    }
    assert_eq!(store.list_sessions().await.unwrap().len(), 6);
}

#[tokio::test]
async fn corrupt_checkpoint_is_refused() {
    let h = harness(WorkflowLimits::default()).await;
    let mut state = WorkflowState::new("corrupt", "prompt");
    state.phase = WorkflowPhase::Invoking;
    state.version = 1;
    state.messages.push(Message::human("prompt"));
    state.messages.push(Message::tool_result("ghost", "orphan"));
    h.store.save("corrupt", &state).await.unwrap();

    assert!(matches!(
        h.orchestrator.launch("prompt", "corrupt").await,
        Err(WorkflowError::Checkpoint(CheckpointError::Corrupt { .. }))
    ));
    assert!(h.designer.requests().is_empty());
}

#[tokio::test]
async fn invalid_session_id_is_rejected() {
    let h = harness(WorkflowLimits::default()).await;
    assert!(matches!(
        h.orchestrator.launch("prompt", "../etc").await,
        Err(WorkflowError::Checkpoint(CheckpointError::InvalidSessionId(_)))
    ));
}
