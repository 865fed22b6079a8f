//! Mock / Scripted LLM 客户端（用于离线运行与测试，无需 API）
//!
//! - MockLlmClient：设计模式下返回固定课程大纲，评审模式下总是接受
//! - ScriptedLlmClient：按顺序返回预置的回复或错误，并记录每次请求

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::llm::{LlmClient, LlmError, ToolSpec};
use crate::memory::{AssistantMessage, Message};

/// Mock 的角色
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockMode {
    Designer,
    Critic,
}

/// Mock 客户端
#[derive(Debug)]
pub struct MockLlmClient {
    mode: MockMode,
}

impl MockLlmClient {
    pub fn designer() -> Self {
        Self {
            mode: MockMode::Designer,
        }
    }

    pub fn critic() -> Self {
        Self {
            mode: MockMode::Critic,
        }
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(
        &self,
        messages: &[Message],
        _tools: &[ToolSpec],
    ) -> Result<AssistantMessage, LlmError> {
        match self.mode {
            MockMode::Critic => Ok(AssistantMessage::text(
                r#"{"action": "accept", "critique": []}"#,
            )),
            MockMode::Designer => {
                let request = messages
                    .iter()
                    .find(|m| matches!(m, Message::Human { .. }))
                    .map(|m| m.content())
                    .unwrap_or("(no request)");
                let topic = request.lines().next().unwrap_or(request);
                Ok(AssistantMessage::text(format!(
                    "# Course outline (mock)\n\nRequest: {topic}\n\n\
                     1. Introduction and goals\n2. Core concepts\n3. Practical labs\n4. Final project"
                )))
            }
        }
    }
}

/// 脚本化客户端：依次弹出预置结果；脚本耗尽时返回 InvalidResponse
#[derive(Debug, Default)]
pub struct ScriptedLlmClient {
    script: Mutex<VecDeque<Result<AssistantMessage, LlmError>>>,
    requests: Mutex<Vec<Vec<Message>>>,
    delay: Option<Duration>,
}

impl ScriptedLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// 每次调用前等待（用于取消 / 超时测试）
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn push_reply(&self, reply: AssistantMessage) {
        self.lock_script().push_back(Ok(reply));
    }

    pub fn push_text(&self, text: impl Into<String>) {
        self.push_reply(AssistantMessage::text(text));
    }

    pub fn push_error(&self, err: LlmError) {
        self.lock_script().push_back(Err(err));
    }

    /// 已收到的请求（每次请求的完整消息序列）
    pub fn requests(&self) -> Vec<Vec<Message>> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn remaining(&self) -> usize {
        self.lock_script().len()
    }

    fn lock_script(&self) -> std::sync::MutexGuard<'_, VecDeque<Result<AssistantMessage, LlmError>>> {
        self.script.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(
        &self,
        messages: &[Message],
        _tools: &[ToolSpec],
    ) -> Result<AssistantMessage, LlmError> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(messages.to_vec());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.lock_script()
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::InvalidResponse("script exhausted".to_string())))
    }
}
