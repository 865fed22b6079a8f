//! 工作流错误类型与失败原因码
//!
//! 适配器内部的瞬时错误（限流、超时）已在各自的重试中吸收；到达这里的错误都会终止会话，
//! 并映射为一个对调用方可见的 FailureReason。

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::designer::CriticError;
use crate::llm::LlmError;
use crate::memory::CheckpointError;

/// 编排过程中可能出现的错误
#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error("Model invocation failed: {0}")]
    ModelUnavailable(#[source] LlmError),

    #[error("Tool `{tool}` unavailable: {detail}")]
    ToolUnavailable { tool: String, detail: String },

    #[error("Critic invocation failed: {0}")]
    CritiqueUnavailable(#[source] LlmError),

    #[error("Malformed critic output: {0}")]
    MalformedCritique(String),

    #[error("Critique rounds exhausted after {0} rounds without acceptance")]
    RoundsExhausted(u32),

    #[error("LLM call budget exhausted after {0} calls")]
    LlmCallsExhausted(u32),

    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("Session {0} is already running")]
    SessionBusy(String),

    #[error("Cancelled")]
    Cancelled,
}

impl From<CriticError> for WorkflowError {
    fn from(err: CriticError) -> Self {
        match err {
            CriticError::Llm(e) => Self::CritiqueUnavailable(e),
            CriticError::Malformed(raw) => Self::MalformedCritique(raw),
        }
    }
}

impl WorkflowError {
    /// 会话终止原因；SessionBusy / Cancelled 不终止会话，返回 None
    pub fn failure_reason(&self) -> Option<FailureReason> {
        match self {
            Self::ModelUnavailable(_) => Some(FailureReason::ModelUnavailable),
            Self::ToolUnavailable { .. } => Some(FailureReason::ToolUnavailable),
            Self::CritiqueUnavailable(_) => Some(FailureReason::CritiqueUnavailable),
            Self::MalformedCritique(_) => Some(FailureReason::MalformedCritique),
            Self::RoundsExhausted(_) => Some(FailureReason::RoundsExhausted),
            Self::LlmCallsExhausted(_) => Some(FailureReason::LlmCallsExhausted),
            Self::Checkpoint(_) => Some(FailureReason::CheckpointFailed),
            Self::SessionBusy(_) | Self::Cancelled => None,
        }
    }
}

/// 会话失败原因码（持久化在检查点中，也作为 CLI 退出信息）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    ModelUnavailable,
    ToolUnavailable,
    CritiqueUnavailable,
    MalformedCritique,
    RoundsExhausted,
    LlmCallsExhausted,
    CheckpointFailed,
}

impl FailureReason {
    pub fn code(&self) -> &'static str {
        match self {
            Self::ModelUnavailable => "model_unavailable",
            Self::ToolUnavailable => "tool_unavailable",
            Self::CritiqueUnavailable => "critique_unavailable",
            Self::MalformedCritique => "malformed_critique",
            Self::RoundsExhausted => "rounds_exhausted",
            Self::LlmCallsExhausted => "llm_calls_exhausted",
            Self::CheckpointFailed => "checkpoint_failed",
        }
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}
