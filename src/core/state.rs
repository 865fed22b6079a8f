//! 工作流状态：单个会话唯一的可变聚合
//!
//! phase 表示「下一个要执行的节点」；每个节点在副本上执行，完成后 version+1 并写入检查点，
//! 因此检查点里永远是一个干净的转移边界。

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::FailureReason;
use crate::memory::Message;

/// 状态机阶段
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowPhase {
    Start,
    Invoking,
    ExecutingTools,
    Critiquing,
    Accepted,
    Failed,
}

impl WorkflowPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Accepted | Self::Failed)
    }
}

impl std::fmt::Display for WorkflowPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Start => "start",
            Self::Invoking => "invoking",
            Self::ExecutingTools => "executing_tools",
            Self::Critiquing => "critiquing",
            Self::Accepted => "accepted",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// 失败记录：原因码 + 描述 + 失败时所处阶段
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub reason: FailureReason,
    pub detail: String,
    pub failed_in: WorkflowPhase,
}

/// 单个会话的工作流状态
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    pub session_id: String,
    /// 原始请求，创建后不再修改
    pub teacher_prompt: String,
    /// 只追加；完整回放给模型
    pub messages: Vec<Message>,
    /// 仅保留最近一轮 Critic 的意见
    pub critique: Vec<String>,
    pub llm_calls: u32,
    /// 已完成的 Critic 评审次数
    pub rounds: u32,
    pub phase: WorkflowPhase,
    /// 提交计数，每次写检查点前 +1
    pub version: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureRecord>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowState {
    pub fn new(session_id: impl Into<String>, teacher_prompt: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            teacher_prompt: teacher_prompt.into(),
            messages: Vec::new(),
            critique: Vec::new(),
            llm_calls: 0,
            rounds: 0,
            phase: WorkflowPhase::Start,
            version: 0,
            failure: None,
            updated_at: Utc::now(),
        }
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// 最近一条没有工具调用的 Assistant 消息内容，即当前的课程结构提案
    pub fn latest_proposal(&self) -> Option<&str> {
        self.messages.iter().rev().find_map(|m| match m {
            Message::Assistant {
                content,
                tool_calls,
            } if tool_calls.is_empty() => Some(content.as_str()),
            _ => None,
        })
    }

    /// 最近一条 Assistant 消息中尚未被 ToolResult 回答的调用
    pub fn pending_tool_calls(&self) -> Vec<crate::memory::ToolCall> {
        let Some(idx) = self
            .messages
            .iter()
            .rposition(|m| matches!(m, Message::Assistant { .. }))
        else {
            return Vec::new();
        };
        let answered: HashSet<&str> = self.messages[idx + 1..]
            .iter()
            .filter_map(|m| match m {
                Message::ToolResult { tool_call_id, .. } => Some(tool_call_id.as_str()),
                _ => None,
            })
            .collect();
        self.messages[idx]
            .tool_calls()
            .iter()
            .filter(|c| !answered.contains(c.id.as_str()))
            .cloned()
            .collect()
    }

    /// 所有已出现过的工具调用 id
    pub fn tool_call_ids(&self) -> HashSet<String> {
        self.messages
            .iter()
            .flat_map(|m| m.tool_calls().iter().map(|c| c.id.clone()))
            .collect()
    }

    /// 提交前调用：版本号 +1 并刷新时间
    pub(crate) fn bump_version(&mut self) {
        self.version += 1;
        self.updated_at = Utc::now();
    }

    /// 校验 transcript 不变量：
    /// - messages 中没有 System 消息
    /// - 每条 ToolResult 回答的 id 恰好出现过一次，且属于紧邻的上一条 Assistant 消息
    /// - 同一 id 不会被回答两次
    pub fn verify_transcript(&self) -> Result<(), String> {
        let mut seen_ids: HashSet<&str> = HashSet::new();
        let mut open: Option<(usize, HashSet<&str>)> = None;

        for (i, msg) in self.messages.iter().enumerate() {
            match msg {
                Message::System { .. } => {
                    return Err(format!("message {i}: system message stored in transcript"));
                }
                Message::Assistant { tool_calls, .. } => {
                    if let Some((at, pending)) = &open {
                        if !pending.is_empty() {
                            return Err(format!(
                                "message {i}: assistant message {at} still has unresolved tool calls"
                            ));
                        }
                    }
                    let mut ids = HashSet::new();
                    for call in tool_calls {
                        if !seen_ids.insert(call.id.as_str()) {
                            return Err(format!("message {i}: duplicate tool call id `{}`", call.id));
                        }
                        ids.insert(call.id.as_str());
                    }
                    open = Some((i, ids));
                }
                Message::ToolResult { tool_call_id, .. } => {
                    let Some((_, pending)) = open.as_mut() else {
                        return Err(format!("message {i}: tool result without assistant message"));
                    };
                    if !pending.remove(tool_call_id.as_str()) {
                        return Err(format!(
                            "message {i}: tool result `{tool_call_id}` does not answer the preceding assistant message"
                        ));
                    }
                }
                Message::Human { .. } => {
                    if let Some((at, pending)) = &open {
                        if !pending.is_empty() {
                            return Err(format!(
                                "message {i}: assistant message {at} still has unresolved tool calls"
                            ));
                        }
                    }
                    open = None;
                }
            }
        }
        Ok(())
    }
}
