//! Critic：课程结构评审
//!
//! 使用独立的 LLM（可配置与设计模型不同，避免自我认同）渲染评审 prompt，
//! 并把模型输出严格解码为 `{"action": "accept" | "reject" | "improve", "critique": [...]}`。
//! 无法解码的输出是 Malformed 错误，不做猜测。

use std::sync::Arc;

use async_trait::async_trait;
use schemars::{schema_for, JsonSchema};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::llm::{LlmClient, LlmError};
use crate::memory::Message;

/// 评审动作
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum CriticAction {
    Accept,
    Reject,
    Improve,
}

impl std::fmt::Display for CriticAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Accept => "accept",
            Self::Reject => "reject",
            Self::Improve => "improve",
        })
    }
}

/// 评审结论：accept 时 critique 为空
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CriticVerdict {
    /// 需要执行的动作
    pub action: CriticAction,
    /// 课程需要改进时的意见；接受时留空
    #[serde(default)]
    pub critique: Vec<String>,
}

impl CriticVerdict {
    pub fn accept() -> Self {
        Self {
            action: CriticAction::Accept,
            critique: Vec::new(),
        }
    }

    pub fn improve(critique: Vec<String>) -> Self {
        Self {
            action: CriticAction::Improve,
            critique,
        }
    }

    pub fn reject(critique: Vec<String>) -> Self {
        Self {
            action: CriticAction::Reject,
            critique,
        }
    }

    pub fn is_accept(&self) -> bool {
        self.action == CriticAction::Accept
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CriticError {
    #[error("critic model call failed: {0}")]
    Llm(#[from] LlmError),

    #[error("malformed critic output: {0}")]
    Malformed(String),
}

/// 评审接口：(原始请求, 当前方案, 上一轮意见) → 结论
#[async_trait]
pub trait CourseCritic: Send + Sync {
    async fn evaluate(
        &self,
        teacher_prompt: &str,
        proposed_course: &str,
        prior_critique: &[String],
    ) -> Result<CriticVerdict, CriticError>;
}

/// 基于 LLM 的评审
pub struct Critic {
    llm: Arc<dyn LlmClient>,
    prompt_template: String,
}

impl Critic {
    pub fn new(llm: Arc<dyn LlmClient>, prompt_template: impl Into<String>) -> Self {
        Self {
            llm,
            prompt_template: prompt_template.into(),
        }
    }

    fn render(&self, teacher_prompt: &str, proposed_course: &str, prior_critique: &[String]) -> String {
        let format = format_instructions();
        let old_critique = prior_critique.join("\n");
        render_template(
            &self.prompt_template,
            &[
                ("format_instructions", format.as_str()),
                ("old_critique", old_critique.as_str()),
                ("teacher_prompt", teacher_prompt),
                ("proposed_course", proposed_course),
            ],
        )
    }
}

/// 单遍替换 `{name}` 占位符；替换进来的文本不会再被当作占位符
fn render_template(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let tail = &rest[start + 1..];
        let hit = vars
            .iter()
            .find(|(name, _)| tail.starts_with(name) && tail[name.len()..].starts_with('}'));
        match hit {
            Some((name, value)) => {
                out.push_str(value);
                rest = &tail[name.len() + 1..];
            }
            None => {
                out.push('{');
                rest = tail;
            }
        }
    }
    out.push_str(rest);
    out
}

#[async_trait]
impl CourseCritic for Critic {
    async fn evaluate(
        &self,
        teacher_prompt: &str,
        proposed_course: &str,
        prior_critique: &[String],
    ) -> Result<CriticVerdict, CriticError> {
        let messages = vec![
            Message::system(self.render(teacher_prompt, proposed_course, prior_critique)),
            Message::human("Evaluate the proposed course structure."),
        ];
        let reply = self.llm.complete(&messages, &[]).await?;
        parse_verdict(&reply.content)
    }
}

/// 输出格式说明（由 CriticVerdict 的 JSON Schema 生成）
pub fn format_instructions() -> String {
    let schema = serde_json::to_string_pretty(&schema_for!(CriticVerdict)).unwrap_or_default();
    format!(
        "Respond with a single JSON object that conforms to the schema below, \
         wrapped in a ```json code block, and nothing else.\n```json\n{schema}\n```"
    )
}

/// 严格解码评审输出：```json 代码块或裸 JSON 对象
pub fn parse_verdict(output: &str) -> Result<CriticVerdict, CriticError> {
    let trimmed = output.trim();
    let json_str = if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        rest.find("```").map(|end| rest[..end].trim()).unwrap_or(rest.trim())
    } else if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if end < start {
            return Err(CriticError::Malformed(trimmed.to_string()));
        }
        &trimmed[start..=end]
    } else {
        return Err(CriticError::Malformed(trimmed.to_string()));
    };

    let mut verdict: CriticVerdict = serde_json::from_str(json_str)
        .map_err(|e| CriticError::Malformed(format!("{e}: {json_str}")))?;
    verdict.critique.retain(|c| !c.trim().is_empty());
    if verdict.is_accept() {
        verdict.critique.clear();
    }
    Ok(verdict)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedLlmClient;

    #[test]
    fn test_parse_fenced_and_bare() {
        let fenced = "Here you go:\n```json\n{\"action\": \"improve\", \"critique\": [\"add more labs\"]}\n```";
        assert_eq!(
            parse_verdict(fenced).unwrap(),
            CriticVerdict::improve(vec!["add more labs".into()])
        );
        let bare = r#"{"action": "reject"}"#;
        assert_eq!(parse_verdict(bare).unwrap(), CriticVerdict::reject(vec![]));
    }

    #[test]
    fn test_accept_drops_critique() {
        let v = parse_verdict(r#"{"action": "accept", "critique": ["minor nit"]}"#).unwrap();
        assert_eq!(v, CriticVerdict::accept());
    }

    #[test]
    fn test_malformed_outputs() {
        for raw in [
            "Looks good to me!",
            r#"{"action": "maybe", "critique": []}"#,
            r#"{"critique": ["no action"]}"#,
            "} {",
        ] {
            assert!(
                matches!(parse_verdict(raw), Err(CriticError::Malformed(_))),
                "accepted {raw}"
            );
        }
    }

    #[tokio::test]
    async fn test_critic_renders_template() {
        let llm = Arc::new(ScriptedLlmClient::new());
        llm.push_text(r#"{"action": "accept", "critique": []}"#);
        let critic = Critic::new(
            llm.clone(),
            "REQ={teacher_prompt}\nCOURSE={proposed_course}\nOLD={old_critique}\n{format_instructions}",
        );
        let verdict = critic
            .evaluate("AI course", "# Outline", &["a".into(), "b".into()])
            .await
            .unwrap();
        assert!(verdict.is_accept());

        let system = llm.requests()[0][0].content().to_string();
        assert!(system.contains("REQ=AI course"));
        assert!(system.contains("COURSE=# Outline"));
        assert!(system.contains("OLD=a\nb"));
        assert!(system.contains("\"action\""));
    }

    #[tokio::test]
    async fn test_critic_llm_error() {
        let llm = Arc::new(ScriptedLlmClient::new());
        llm.push_error(LlmError::ApiError("401".into()));
        let critic = Critic::new(llm, "{proposed_course}");
        let err = critic.evaluate("p", "c", &[]).await.unwrap_err();
        assert_eq!(err, CriticError::Llm(LlmError::ApiError("401".into())));
    }

    #[test]
    fn test_render_is_single_pass() {
        let out = render_template(
            "Request: {teacher_prompt}\nCourse: {proposed_course}\n{\"action\": {unknown}}",
            &[
                ("teacher_prompt", "write {proposed_course} literally"),
                ("proposed_course", "# Outline"),
            ],
        );
        assert_eq!(
            out,
            "Request: write {proposed_course} literally\nCourse: # Outline\n{\"action\": {unknown}}"
        );
    }
}
