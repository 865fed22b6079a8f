//! 任务调度：会话并发与工具并发
//!
//! 会话与工具执行各用一个 Semaphore 限制并发；工具信号量跨会话共享，交给 ToolExecutor 使用。

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::core::WorkflowError;

/// 任务调度器
#[derive(Debug)]
pub struct TaskScheduler {
    session_semaphore: Arc<Semaphore>,
    /// 工具并发限制（默认 3）
    tool_semaphore: Arc<Semaphore>,
}

impl TaskScheduler {
    pub fn new(max_concurrent_sessions: usize, max_concurrent_tools: usize) -> Self {
        Self {
            session_semaphore: Arc::new(Semaphore::new(max_concurrent_sessions.max(1))),
            tool_semaphore: Arc::new(Semaphore::new(max_concurrent_tools.max(1))),
        }
    }

    /// 获取会话运行许可；超出并发上限的会话在此排队
    pub async fn acquire_session(&self) -> Result<OwnedSemaphorePermit, WorkflowError> {
        self.session_semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| WorkflowError::Cancelled)
    }

    /// 工具信号量（跨会话共享）
    pub fn tool_permits(&self) -> Arc<Semaphore> {
        Arc::clone(&self.tool_semaphore)
    }

    pub fn available_sessions(&self) -> usize {
        self.session_semaphore.available_permits()
    }
}

impl Default for TaskScheduler {
    fn default() -> Self {
        Self::new(4, 3)
    }
}
