//! Planner：课程结构设计模型调用
//!
//! 拼接 system + 完整历史调用 LLM，附带已注册工具的声明。
//! normalize_tool_call_ids 由编排器对任意 ModelInvoker 的回复调用，保证 id 非空且在整个对话中唯一
//! （ToolResult 与 ToolCall 的对应关系才能校验）。

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;

use crate::llm::{LlmClient, LlmError, ToolSpec};
use crate::memory::{AssistantMessage, Message};

/// 模型调用接口：(system 指令, 历史消息) → Assistant 消息
#[async_trait]
pub trait ModelInvoker: Send + Sync {
    async fn invoke(&self, system: &str, history: &[Message]) -> Result<AssistantMessage, LlmError>;
}

/// Planner：持有 LLM 与工具声明
pub struct Planner {
    llm: Arc<dyn LlmClient>,
    tools: Vec<ToolSpec>,
}

impl Planner {
    pub fn new(llm: Arc<dyn LlmClient>, tools: Vec<ToolSpec>) -> Self {
        Self { llm, tools }
    }

    /// 获取 LLM 累计 token 使用统计
    pub fn token_usage(&self) -> (u64, u64, u64) {
        self.llm.token_usage()
    }
}

#[async_trait]
impl ModelInvoker for Planner {
    async fn invoke(&self, system: &str, history: &[Message]) -> Result<AssistantMessage, LlmError> {
        let mut full_messages = Vec::with_capacity(history.len() + 1);
        full_messages.push(Message::system(system));
        full_messages.extend_from_slice(history);

        self.llm.complete(&full_messages, &self.tools).await
    }
}

/// 空 id 或与历史（及本条消息内）重复的 id 追加轮次后缀
pub fn normalize_tool_call_ids(reply: &mut AssistantMessage, history: &[Message]) {
    if reply.tool_calls.is_empty() {
        return;
    }
    let mut seen: HashSet<String> = history
        .iter()
        .flat_map(|m| m.tool_calls().iter().map(|c| c.id.clone()))
        .collect();
    let round = history
        .iter()
        .filter(|m| matches!(m, Message::Assistant { .. }))
        .count()
        + 1;

    for (i, call) in reply.tool_calls.iter_mut().enumerate() {
        let base = if call.id.trim().is_empty() {
            format!("call_{i}")
        } else {
            call.id.clone()
        };
        let mut id = base.clone();
        let mut n = 0;
        while seen.contains(&id) {
            n += 1;
            id = if n == 1 {
                format!("{base}_r{round}")
            } else {
                format!("{base}_r{round}_{n}")
            };
        }
        if id != call.id {
            tracing::debug!(original = %call.id, normalized = %id, "Normalized tool call id");
            call.id = id.clone();
        }
        seen.insert(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedLlmClient;
    use crate::memory::ToolCall;
    use serde_json::json;

    #[tokio::test]
    async fn test_invoke_prepends_system_and_passes_history() {
        let llm = Arc::new(ScriptedLlmClient::new());
        llm.push_text("# Course");
        let planner = Planner::new(llm.clone(), vec![]);

        let history = vec![Message::human("Design an AI course")];
        let reply = planner.invoke("You are a designer", &history).await.unwrap();
        assert_eq!(reply.content, "# Course");

        let requests = llm.requests();
        assert_eq!(requests[0][0], Message::system("You are a designer"));
        assert_eq!(requests[0][1], Message::human("Design an AI course"));
    }

    #[test]
    fn test_normalize_fills_empty_and_colliding_ids() {
        let history = vec![
            Message::human("prompt"),
            Message::Assistant {
                content: String::new(),
                tool_calls: vec![ToolCall::new("call_0", "read_attached_material", json!({}))],
            },
            Message::tool_result("call_0", "text"),
        ];
        let mut reply = AssistantMessage::with_tool_calls(
            "",
            vec![
                ToolCall::new("", "get_materials_metadata", json!({})),
                ToolCall::new("call_0", "read_attached_material", json!({})),
                ToolCall::new("x", "read_attached_material", json!({})),
                ToolCall::new("x", "read_attached_material", json!({})),
            ],
        );
        normalize_tool_call_ids(&mut reply, &history);
        let ids: Vec<&str> = reply.tool_calls.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["call_0_r2", "call_0_r2_2", "x", "x_r2"]);
    }
}
