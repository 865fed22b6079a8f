//! read_attached_material：读取单个附件的文本内容
//!
//! 附件不存在、文件丢失 / 不可读、或格式无法直接读取时返回说明文字，工作流继续；
//! 只有资料后端本身不可用才是工具错误。

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::schema::{parameters_schema, parse_args, ReadMaterialArgs};
use super::{material_error, Tool, ToolError};
use crate::materials::{MaterialError, MaterialStore};

pub struct ReadMaterialTool {
    store: Arc<dyn MaterialStore>,
    max_chars: usize,
}

impl ReadMaterialTool {
    pub fn new(store: Arc<dyn MaterialStore>, max_chars: usize) -> Self {
        Self { store, max_chars }
    }
}

#[async_trait]
impl Tool for ReadMaterialTool {
    fn name(&self) -> &str {
        "read_attached_material"
    }

    fn description(&self) -> &str {
        "Read the content of one attached material as Markdown text."
    }

    fn parameters_schema(&self) -> Value {
        parameters_schema::<ReadMaterialArgs>()
    }

    async fn execute(&self, args: Value) -> Result<String, ToolError> {
        let args: ReadMaterialArgs = parse_args(args)?;
        let Some(attachment) = self
            .store
            .get(args.attachment_id)
            .await
            .map_err(material_error)?
        else {
            return Ok(format!("Material {} not found", args.attachment_id));
        };

        let text = match self.store.read_text(&attachment).await {
            Ok(text) => text,
            Err(MaterialError::Unsupported(mime)) => {
                return Ok(format!(
                    "Material {} ({}) cannot be read as text; rely on its metadata instead",
                    attachment.original_filename, mime
                ))
            }
            Err(MaterialError::Io(e)) => {
                tracing::warn!(
                    attachment_id = %attachment.id,
                    "Material {} could not be read: {}",
                    attachment.original_filename,
                    e
                );
                return Ok(format!(
                    "Material {} could not be read: {}",
                    attachment.original_filename, e
                ));
            }
            Err(e) => return Err(material_error(e)),
        };

        let mut body: String = text.chars().take(self.max_chars).collect();
        if body.len() < text.len() {
            body.push_str("\n...[truncated]");
        }
        Ok(format!("**{}:**\n{}", attachment.original_filename, body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::materials::MaterialLibrary;
    use uuid::Uuid;

    async fn library_with(name: &str, content: &[u8]) -> (tempfile::TempDir, Arc<MaterialLibrary>, Uuid) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        let library = Arc::new(MaterialLibrary::new());
        let id = library.register_file(&path).await.unwrap().id;
        (dir, library, id)
    }

    #[tokio::test]
    async fn test_read_text_material() {
        let (_dir, library, id) = library_with("Lecture 1.md", b"Graph search basics").await;
        let tool = ReadMaterialTool::new(library, 10_000);
        let out = tool
            .execute(serde_json::json!({"attachment_id": id}))
            .await
            .unwrap();
        assert_eq!(out, "**Lecture 1.md:**\nGraph search basics");
    }

    #[tokio::test]
    async fn test_missing_and_unsupported_are_text() {
        let (_dir, library, id) = library_with("deck.pptx", &[0, 1, 2]).await;
        let tool = ReadMaterialTool::new(library, 10_000);

        let missing = Uuid::new_v4();
        let out = tool
            .execute(serde_json::json!({"attachment_id": missing}))
            .await
            .unwrap();
        assert_eq!(out, format!("Material {missing} not found"));

        let out = tool
            .execute(serde_json::json!({"attachment_id": id}))
            .await
            .unwrap();
        assert!(out.contains("cannot be read as text"));
    }

    #[tokio::test]
    async fn test_unreadable_file_is_text() {
        let (dir, library, id) = library_with("gone.md", b"soon deleted").await;
        std::fs::remove_file(dir.path().join("gone.md")).unwrap();
        let tool = ReadMaterialTool::new(library, 10_000);
        let out = tool
            .execute(serde_json::json!({"attachment_id": id}))
            .await
            .unwrap();
        assert!(out.starts_with("Material gone.md could not be read:"));

        let (_dir, library, id) = library_with("latin1.md", &[0x66, 0xff, 0xfe, 0x6f]).await;
        let tool = ReadMaterialTool::new(library, 10_000);
        let out = tool
            .execute(serde_json::json!({"attachment_id": id}))
            .await
            .unwrap();
        assert!(out.starts_with("Material latin1.md could not be read:"));
    }

    #[tokio::test]
    async fn test_long_material_is_truncated() {
        let (_dir, library, id) = library_with("long.txt", "x".repeat(50).as_bytes()).await;
        let tool = ReadMaterialTool::new(library, 10);
        let out = tool
            .execute(serde_json::json!({"attachment_id": id}))
            .await
            .unwrap();
        assert!(out.ends_with("xxxxxxxxxx\n...[truncated]"));
    }
}
