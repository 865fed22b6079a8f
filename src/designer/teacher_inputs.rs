//! 教师填写的课程创建表单，渲染为工作流的初始请求

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 课程难度
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DifficultyLevel {
    #[default]
    Beginner,
    Intermediate,
    Advanced,
}

impl std::fmt::Display for DifficultyLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Beginner => "beginner",
            Self::Intermediate => "intermediate",
            Self::Advanced => "advanced",
        })
    }
}

impl std::str::FromStr for DifficultyLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "beginner" => Ok(Self::Beginner),
            "intermediate" => Ok(Self::Intermediate),
            "advanced" => Ok(Self::Advanced),
            other => Err(format!("unknown difficulty level: {other}")),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TeacherInputs {
    pub discipline: String,
    pub target_audience: String,
    #[serde(default)]
    pub difficulty_level: DifficultyLevel,
    #[serde(default)]
    pub estimated_duration_hours: Option<u32>,
    #[serde(default)]
    pub external_links: Vec<String>,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub attachment_ids: Vec<Uuid>,
}

impl TeacherInputs {
    /// 渲染初始请求；附件只列出 id，内容由模型通过工具读取
    pub fn to_prompt(&self) -> String {
        let mut lines = vec![
            "Design a course structure.".to_string(),
            format!("Discipline: {}", self.discipline),
            format!("Target audience: {}", self.target_audience),
            format!("Difficulty level: {}", self.difficulty_level),
        ];
        if let Some(hours) = self.estimated_duration_hours {
            lines.push(format!("Estimated duration: {hours} hours"));
        }
        if !self.external_links.is_empty() {
            lines.push(format!("External links: {}", self.external_links.join(", ")));
        }
        if !self.attachment_ids.is_empty() {
            let ids: Vec<String> = self.attachment_ids.iter().map(Uuid::to_string).collect();
            lines.push(format!("Attached materials (ids): {}", ids.join(", ")));
        }
        if let Some(comment) = self.comment.as_deref().filter(|c| !c.trim().is_empty()) {
            lines.push(format!("Teacher's comment: {comment}"));
        }
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_prompt_includes_filled_fields_only() {
        let id = Uuid::new_v4();
        let inputs = TeacherInputs {
            discipline: "Artificial intelligence".into(),
            target_audience: "2nd year CS students".into(),
            difficulty_level: DifficultyLevel::Intermediate,
            estimated_duration_hours: Some(36),
            attachment_ids: vec![id],
            comment: Some("  ".into()),
            ..Default::default()
        };
        let prompt = inputs.to_prompt();
        assert!(prompt.contains("Discipline: Artificial intelligence"));
        assert!(prompt.contains("Difficulty level: intermediate"));
        assert!(prompt.contains("36 hours"));
        assert!(prompt.contains(&id.to_string()));
        assert!(!prompt.contains("comment"));
        assert!(!prompt.contains("External links"));
    }

    #[test]
    fn test_difficulty_parse() {
        assert_eq!("Advanced".parse::<DifficultyLevel>(), Ok(DifficultyLevel::Advanced));
        assert!("expert".parse::<DifficultyLevel>().is_err());
    }
}
