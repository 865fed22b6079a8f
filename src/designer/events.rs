//! 工作流过程事件：用于流式展示节点切换、模型调用、工具结果与评审意见

use serde::Serialize;

use crate::core::{FailureReason, WorkflowPhase};

/// 单步过程事件（可序列化为 JSON 供前端展示）
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    /// 进入节点
    NodeEntered {
        session_id: String,
        phase: WorkflowPhase,
    },
    /// 模型返回（tool call 数量）
    ModelInvoked {
        session_id: String,
        llm_calls: u32,
        tool_calls: usize,
    },
    /// 工具返回（预览，避免过长）
    ToolExecuted {
        session_id: String,
        tool_call_id: String,
        preview: String,
    },
    /// 评审结论
    CritiqueReceived {
        session_id: String,
        action: String,
        critique: Vec<String>,
    },
    /// 检查点已提交
    CheckpointCommitted { session_id: String, version: u64 },
    Accepted { session_id: String },
    Failed {
        session_id: String,
        reason: FailureReason,
        detail: String,
    },
    Cancelled { session_id: String },
}

/// 截取预览文本
pub fn preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() > max_chars {
        format!("{}...", text.chars().take(max_chars).collect::<String>())
    } else {
        text.to_string()
    }
}
