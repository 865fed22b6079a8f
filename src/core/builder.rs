//! 编排器构建器：把模型调用、评审、工具执行器与检查点存储组装为 Orchestrator
//!
//! 运行时（runtime::build_orchestrator）和测试共用同一套组装逻辑。

use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;

use crate::core::{Orchestrator, SessionSupervisor, TaskScheduler, WorkflowLimits};
use crate::designer::{CourseCritic, ModelInvoker, WorkflowEvent, DEFAULT_SYSTEM_PROMPT};
use crate::memory::CheckpointStore;
use crate::tools::ToolExecutor;

pub struct OrchestratorBuilder {
    invoker: Arc<dyn ModelInvoker>,
    critic: Arc<dyn CourseCritic>,
    tools: ToolExecutor,
    store: Arc<dyn CheckpointStore>,
    system_prompt: String,
    limits: WorkflowLimits,
    supervisor: Option<Arc<SessionSupervisor>>,
    scheduler: Option<Arc<TaskScheduler>>,
    event_tx: Option<UnboundedSender<WorkflowEvent>>,
}

impl OrchestratorBuilder {
    pub fn new(
        invoker: Arc<dyn ModelInvoker>,
        critic: Arc<dyn CourseCritic>,
        tools: ToolExecutor,
        store: Arc<dyn CheckpointStore>,
    ) -> Self {
        Self {
            invoker,
            critic,
            tools,
            store,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            limits: WorkflowLimits::default(),
            supervisor: None,
            scheduler: None,
            event_tx: None,
        }
    }

    /// 设置系统提示词
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_limits(mut self, limits: WorkflowLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_supervisor(mut self, supervisor: Arc<SessionSupervisor>) -> Self {
        self.supervisor = Some(supervisor);
        self
    }

    pub fn with_scheduler(mut self, scheduler: Arc<TaskScheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// 过程事件流（前端展示用）
    pub fn with_events(mut self, tx: UnboundedSender<WorkflowEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn build(self) -> Orchestrator {
        let scheduler = self.scheduler.unwrap_or_default();
        let tools = self.tools.with_permits(scheduler.tool_permits());
        Orchestrator {
            invoker: self.invoker,
            critic: self.critic,
            tools: Arc::new(tools),
            store: self.store,
            system_prompt: self.system_prompt,
            limits: self.limits,
            supervisor: self.supervisor.unwrap_or_default(),
            scheduler,
            event_tx: self.event_tx,
        }
    }
}
