//! 教学资料：附件元数据、资料库与检索索引
//!
//! 文档转文本属于外部协作者；这里只直接读取纯文本类资料，其它格式返回「不支持」的说明文字。

pub mod index;
pub mod library;

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub use index::{MaterialHit, MaterialIndex};
pub use library::MaterialLibrary;

/// 资料访问错误
#[derive(Error, Debug)]
pub enum MaterialError {
    /// 存储暂不可用（可重试）
    #[error("Material storage unavailable: {0}")]
    Unavailable(String),

    #[error("Unsupported material format: {0}")]
    Unsupported(String),

    #[error("Material I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Material manifest error: {0}")]
    Manifest(#[from] serde_json::Error),
}

/// 已上传的附件
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub id: Uuid,
    pub original_filename: String,
    pub filepath: PathBuf,
    pub mime_type: String,
    pub size: u64,
    pub uploaded_at: DateTime<Utc>,
}

/// 交给模型看的元数据视图（不含存储路径）
#[derive(Clone, Debug, Serialize)]
pub struct AttachmentMetadata<'a> {
    pub id: Uuid,
    pub original_filename: &'a str,
    pub mime_type: &'a str,
    pub size: u64,
    pub uploaded_at: DateTime<Utc>,
}

impl Attachment {
    pub fn metadata(&self) -> AttachmentMetadata<'_> {
        AttachmentMetadata {
            id: self.id,
            original_filename: &self.original_filename,
            mime_type: &self.mime_type,
            size: self.size,
            uploaded_at: self.uploaded_at,
        }
    }

    /// 是否可以直接按 UTF-8 文本读取
    pub fn is_text(&self) -> bool {
        self.mime_type.starts_with("text/")
            || matches!(
                self.mime_type.as_str(),
                "application/json" | "application/x-yaml" | "application/toml"
            )
    }
}

/// 按扩展名推断 MIME 类型
pub fn guess_mime_type(path: &std::path::Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "md" | "markdown" => "text/markdown",
        "txt" => "text/plain",
        "csv" => "text/csv",
        "html" | "htm" => "text/html",
        "json" => "application/json",
        "yaml" | "yml" => "application/x-yaml",
        "toml" => "application/toml",
        "pdf" => "application/pdf",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "pptx" => "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        _ => "application/octet-stream",
    }
}

/// 资料存储接口
#[async_trait]
pub trait MaterialStore: Send + Sync {
    /// 按 id 查找附件；不存在返回 None
    async fn get(&self, id: Uuid) -> Result<Option<Attachment>, MaterialError>;

    /// 读取附件文本内容（Markdown / 纯文本）
    async fn read_text(&self, attachment: &Attachment) -> Result<String, MaterialError>;

    /// 所有附件
    async fn list(&self) -> Result<Vec<Attachment>, MaterialError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_guess_mime_type() {
        assert_eq!(guess_mime_type(Path::new("Lecture 1.MD")), "text/markdown");
        assert!(guess_mime_type(Path::new("slides.pptx")).contains("presentationml"));
        assert_eq!(guess_mime_type(Path::new("noext")), "application/octet-stream");
    }

    #[test]
    fn test_metadata_hides_filepath() {
        let att = Attachment {
            id: Uuid::new_v4(),
            original_filename: "Lecture 1.md".into(),
            filepath: PathBuf::from("/srv/uploads/secret/abc.md"),
            mime_type: "text/markdown".into(),
            size: 42,
            uploaded_at: Utc::now(),
        };
        let json = serde_json::to_string(&att.metadata()).unwrap();
        assert!(json.contains("Lecture 1.md"));
        assert!(!json.contains("/srv/uploads"));
        assert!(att.is_text());
    }
}
