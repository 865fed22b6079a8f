//! 工作流编排器：课程设计状态机
//!
//! Start → Invoking → (ExecutingTools → Invoking)* → Critiquing → Accepted | Invoking …
//! 每个节点在已提交状态的副本上执行，节点完整结束后 version+1 并写入检查点，成功后副本才成为新的已提交状态；
//! 节点失败或被取消时已提交状态保持不变。失败时把已提交状态标记为 Failed 并持久化该标记。

use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use crate::core::router::{route, Route};
use crate::core::{
    FailureReason, FailureRecord, SessionSupervisor, TaskScheduler, WorkflowError, WorkflowPhase,
    WorkflowState,
};
use crate::designer::events::preview;
use crate::designer::{
    normalize_tool_call_ids, CourseCritic, ModelInvoker, TeacherInputs, WorkflowEvent,
};
use crate::memory::{validate_session_id, CheckpointError, CheckpointStore, Message};
use crate::tools::ToolExecutor;

/// 显式的循环上限；None 表示不限制
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WorkflowLimits {
    /// 允许的 Critic 评审次数；第 N 次评审仍未接受时会话以 rounds_exhausted 失败。
    /// 第一份方案总会被评审，Some(0) 与 Some(1) 等价；配置加载时拒绝 0
    pub max_critique_rounds: Option<u32>,
    /// 允许的模型调用次数；用尽后再次进入 Invoking 时以 llm_calls_exhausted 失败
    pub max_llm_calls: Option<u32>,
}

/// 会话结果
#[derive(Clone, Debug)]
pub enum SessionOutcome {
    Accepted {
        structure: String,
        state: WorkflowState,
    },
    Failed {
        reason: FailureReason,
        detail: String,
        state: WorkflowState,
    },
    /// 取消；state 为最后一次提交的状态，可以恢复
    Cancelled { state: WorkflowState },
}

impl SessionOutcome {
    pub fn state(&self) -> &WorkflowState {
        match self {
            Self::Accepted { state, .. } | Self::Failed { state, .. } | Self::Cancelled { state } => {
                state
            }
        }
    }

    pub fn into_state(self) -> WorkflowState {
        match self {
            Self::Accepted { state, .. } | Self::Failed { state, .. } | Self::Cancelled { state } => {
                state
            }
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }
}

/// 编排器：多个会话可并发运行，每个会话内部严格串行
pub struct Orchestrator {
    pub(super) invoker: Arc<dyn ModelInvoker>,
    pub(super) critic: Arc<dyn CourseCritic>,
    pub(super) tools: Arc<ToolExecutor>,
    pub(super) store: Arc<dyn CheckpointStore>,
    pub(super) system_prompt: String,
    pub(super) limits: WorkflowLimits,
    pub(super) supervisor: Arc<SessionSupervisor>,
    pub(super) scheduler: Arc<TaskScheduler>,
    pub(super) event_tx: Option<UnboundedSender<WorkflowEvent>>,
}

impl Orchestrator {
    pub fn supervisor(&self) -> &Arc<SessionSupervisor> {
        &self.supervisor
    }

    pub fn store(&self) -> &Arc<dyn CheckpointStore> {
        &self.store
    }

    pub fn limits(&self) -> WorkflowLimits {
        self.limits
    }

    /// 取消运行中的会话；会话未在运行时返回 false
    pub fn cancel(&self, session_id: &str) -> bool {
        self.supervisor.cancel(session_id)
    }

    /// 由教师表单启动
    pub async fn run_inputs(
        &self,
        inputs: &TeacherInputs,
        session_id: &str,
    ) -> Result<SessionOutcome, WorkflowError> {
        self.launch(&inputs.to_prompt(), session_id).await
    }

    /// 启动或恢复会话
    ///
    /// 检查点中已有该会话时从最后一次提交处继续（teacher_prompt 以检查点为准）；
    /// 已处于 Accepted / Failed 的会话直接返回终态结果。
    /// 只有会话无法开始（id 非法、已在运行、检查点读取失败或损坏）时返回 Err。
    pub async fn launch(
        &self,
        teacher_prompt: &str,
        session_id: &str,
    ) -> Result<SessionOutcome, WorkflowError> {
        validate_session_id(session_id)?;
        let guard = self.supervisor.begin(session_id)?;

        let committed = match self.store.load(session_id).await? {
            Some(state) => {
                check_resumable(session_id, &state)?;
                if state.teacher_prompt != teacher_prompt {
                    tracing::warn!(
                        session_id,
                        "Resumed session has a different teacher prompt, keeping the stored one"
                    );
                }
                tracing::info!(
                    session_id,
                    phase = %state.phase,
                    version = state.version,
                    llm_calls = state.llm_calls,
                    "Resuming session from checkpoint"
                );
                state
            }
            None => {
                tracing::info!(session_id, "Starting new session");
                WorkflowState::new(session_id, teacher_prompt)
            }
        };

        if let Some(outcome) = terminal_outcome(&committed) {
            return Ok(outcome);
        }

        let _permit = tokio::select! {
            permit = self.scheduler.acquire_session() => permit?,
            _ = guard.token().cancelled() => return Ok(self.cancelled(committed)),
        };

        self.drive(committed, guard.token()).await
    }

    async fn drive(
        &self,
        mut committed: WorkflowState,
        token: &CancellationToken,
    ) -> Result<SessionOutcome, WorkflowError> {
        loop {
            if let Some(outcome) = terminal_outcome(&committed) {
                if outcome.is_accepted() {
                    self.emit(WorkflowEvent::Accepted {
                        session_id: committed.session_id.clone(),
                    });
                }
                return Ok(outcome);
            }
            if token.is_cancelled() {
                return Ok(self.cancelled(committed));
            }

            self.emit(WorkflowEvent::NodeEntered {
                session_id: committed.session_id.clone(),
                phase: committed.phase,
            });

            let step = tokio::select! {
                biased;
                _ = token.cancelled() => None,
                result = self.step(&committed) => Some(result),
            };

            let mut next = match step {
                Some(Ok(next)) => next,
                Some(Err(err)) => return Ok(self.fail(committed, err).await),
                None => return Ok(self.cancelled(committed)),
            };

            next.bump_version();
            if let Err(err) = self.store.save(&next.session_id, &next).await {
                return Ok(self.fail(committed, err.into()).await);
            }
            tracing::debug!(
                session_id = %next.session_id,
                phase = %next.phase,
                version = next.version,
                "Checkpoint committed"
            );
            self.emit(WorkflowEvent::CheckpointCommitted {
                session_id: next.session_id.clone(),
                version: next.version,
            });
            committed = next;
        }
    }

    /// 在副本上执行当前 phase 对应的节点，返回节点完成后的状态
    async fn step(&self, committed: &WorkflowState) -> Result<WorkflowState, WorkflowError> {
        let mut state = committed.clone();
        match state.phase {
            WorkflowPhase::Start => {
                state.messages.push(Message::human(state.teacher_prompt.clone()));
                state.phase = WorkflowPhase::Invoking;
            }
            WorkflowPhase::Invoking => self.invoke_model(&mut state).await?,
            WorkflowPhase::ExecutingTools => self.execute_tools(&mut state).await?,
            WorkflowPhase::Critiquing => self.critique(&mut state).await?,
            WorkflowPhase::Accepted | WorkflowPhase::Failed => {}
        }
        Ok(state)
    }

    async fn invoke_model(&self, state: &mut WorkflowState) -> Result<(), WorkflowError> {
        if let Some(max) = self.limits.max_llm_calls {
            if state.llm_calls >= max {
                return Err(WorkflowError::LlmCallsExhausted(state.llm_calls));
            }
        }
        if let Some(max) = self.limits.max_critique_rounds {
            if state.rounds > 0 && state.rounds >= max {
                return Err(WorkflowError::RoundsExhausted(state.rounds));
            }
        }

        let mut reply = self
            .invoker
            .invoke(&self.system_prompt, &state.messages)
            .await
            .map_err(WorkflowError::ModelUnavailable)?;
        normalize_tool_call_ids(&mut reply, &state.messages);
        state.llm_calls += 1;

        let message = Message::from(reply);
        let tool_calls = message.tool_calls().len();
        state.phase = match route(&message) {
            Route::ToTools => WorkflowPhase::ExecutingTools,
            Route::ToCritic => WorkflowPhase::Critiquing,
        };
        state.messages.push(message);

        tracing::info!(
            session_id = %state.session_id,
            llm_calls = state.llm_calls,
            tool_calls,
            next = %state.phase,
            "Model invoked"
        );
        self.emit(WorkflowEvent::ModelInvoked {
            session_id: state.session_id.clone(),
            llm_calls: state.llm_calls,
            tool_calls,
        });
        Ok(())
    }

    async fn execute_tools(&self, state: &mut WorkflowState) -> Result<(), WorkflowError> {
        let calls = state.pending_tool_calls();
        let results = self.tools.execute_calls(&calls).await?;
        for result in results {
            if let Message::ToolResult {
                tool_call_id,
                content,
            } = &result
            {
                self.emit(WorkflowEvent::ToolExecuted {
                    session_id: state.session_id.clone(),
                    tool_call_id: tool_call_id.clone(),
                    preview: preview(content, 200),
                });
            }
            state.messages.push(result);
        }
        tracing::info!(
            session_id = %state.session_id,
            tool_calls = calls.len(),
            "Tool calls resolved"
        );
        state.phase = WorkflowPhase::Invoking;
        Ok(())
    }

    async fn critique(&self, state: &mut WorkflowState) -> Result<(), WorkflowError> {
        let proposal = state.latest_proposal().unwrap_or_default().to_string();
        let verdict = self
            .critic
            .evaluate(&state.teacher_prompt, &proposal, &state.critique)
            .await?;
        state.rounds += 1;

        tracing::info!(
            session_id = %state.session_id,
            round = state.rounds,
            action = %verdict.action,
            notes = verdict.critique.len(),
            "Critique received"
        );
        self.emit(WorkflowEvent::CritiqueReceived {
            session_id: state.session_id.clone(),
            action: verdict.action.to_string(),
            critique: verdict.critique.clone(),
        });

        if verdict.is_accept() {
            state.phase = WorkflowPhase::Accepted;
            return Ok(());
        }
        state
            .messages
            .push(Message::human(critique_directive(&verdict.critique)));
        state.critique = verdict.critique;
        state.phase = WorkflowPhase::Invoking;
        Ok(())
    }

    /// 把失败标记写到最后一次提交的状态上
    async fn fail(&self, committed: WorkflowState, err: WorkflowError) -> SessionOutcome {
        let Some(reason) = err.failure_reason() else {
            return self.cancelled(committed);
        };
        let detail = err.to_string();
        tracing::error!(
            session_id = %committed.session_id,
            phase = %committed.phase,
            llm_calls = committed.llm_calls,
            reason = %reason,
            "Session failed: {}",
            detail
        );

        let mut failed = committed.clone();
        failed.failure = Some(FailureRecord {
            reason,
            detail: detail.clone(),
            failed_in: committed.phase,
        });
        failed.phase = WorkflowPhase::Failed;
        failed.bump_version();

        let state = match self.store.save(&failed.session_id, &failed).await {
            Ok(()) => failed,
            Err(e) => {
                tracing::error!(
                    session_id = %committed.session_id,
                    "Failed to persist failure marker: {}",
                    e
                );
                committed
            }
        };
        self.emit(WorkflowEvent::Failed {
            session_id: state.session_id.clone(),
            reason,
            detail: detail.clone(),
        });
        SessionOutcome::Failed {
            reason,
            detail,
            state,
        }
    }

    fn cancelled(&self, committed: WorkflowState) -> SessionOutcome {
        tracing::info!(
            session_id = %committed.session_id,
            phase = %committed.phase,
            version = committed.version,
            "Session cancelled"
        );
        self.emit(WorkflowEvent::Cancelled {
            session_id: committed.session_id.clone(),
        });
        SessionOutcome::Cancelled { state: committed }
    }

    fn emit(&self, event: WorkflowEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(event);
        }
    }
}

/// Reject / Improve 后追加给模型的修改指令；意见为空时也必须给出非空指令
pub fn critique_directive(critique: &[String]) -> String {
    if critique.is_empty() {
        return "Critique of the previous proposal: no specific notes were given. \
                Revise the course structure without further detail and answer with the full revised structure."
            .to_string();
    }
    let notes: Vec<String> = critique.iter().map(|c| format!("- {c}")).collect();
    format!(
        "Critique of the previous proposal:\n{}\nRevise the course structure to address every point and answer with the full revised structure.",
        notes.join("\n")
    )
}

fn check_resumable(session_id: &str, state: &WorkflowState) -> Result<(), CheckpointError> {
    if state.session_id != session_id {
        return Err(CheckpointError::Corrupt {
            session_id: session_id.to_string(),
            detail: format!("checkpoint belongs to session `{}`", state.session_id),
        });
    }
    state
        .verify_transcript()
        .map_err(|detail| CheckpointError::Corrupt {
            session_id: session_id.to_string(),
            detail,
        })
}

fn terminal_outcome(state: &WorkflowState) -> Option<SessionOutcome> {
    match state.phase {
        WorkflowPhase::Accepted => Some(SessionOutcome::Accepted {
            structure: state.latest_proposal().unwrap_or_default().to_string(),
            state: state.clone(),
        }),
        WorkflowPhase::Failed => {
            let (reason, detail) = match &state.failure {
                Some(f) => (f.reason, f.detail.clone()),
                None => (
                    FailureReason::CheckpointFailed,
                    "failed session has no failure record".to_string(),
                ),
            };
            Some(SessionOutcome::Failed {
                reason,
                detail,
                state: state.clone(),
            })
        }
        _ => None,
    }
}
