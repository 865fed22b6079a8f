//! 设计与评审 prompt：默认内容编译进二进制，可由配置中的文件路径覆盖

use std::path::Path;

pub const DEFAULT_SYSTEM_PROMPT: &str =
    include_str!("../../config/prompts/course_structure_designer.md");

pub const DEFAULT_CRITIC_PROMPT: &str =
    include_str!("../../config/prompts/course_structure_critic.md");

/// 读取 prompt 文件；未配置或读取失败时使用默认内容
pub fn load_prompt(path: Option<&Path>, default: &str) -> String {
    let Some(path) = path else {
        return default.to_string();
    };
    match std::fs::read_to_string(path) {
        Ok(text) if !text.trim().is_empty() => text,
        Ok(_) => {
            tracing::warn!("Prompt file {} is empty, using built-in prompt", path.display());
            default.to_string()
        }
        Err(e) => {
            tracing::warn!(
                "Failed to read prompt file {}: {}, using built-in prompt",
                path.display(),
                e
            );
            default.to_string()
        }
    }
}
