//! 资料库：进程内附件目录
//!
//! 可从 JSON 清单（Attachment 数组）加载，也可直接登记本地文件（大小与 MIME 类型自动推断）。

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{guess_mime_type, Attachment, MaterialError, MaterialStore};

/// 内存资料库
#[derive(Debug, Default)]
pub struct MaterialLibrary {
    attachments: RwLock<HashMap<Uuid, Attachment>>,
}

impl MaterialLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// 从清单文件加载；清单中的相对路径相对清单所在目录解析
    pub async fn from_manifest(path: impl AsRef<Path>) -> Result<Self, MaterialError> {
        let path = path.as_ref();
        let data = tokio::fs::read_to_string(path).await?;
        let mut attachments: Vec<Attachment> = serde_json::from_str(&data)?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        for att in &mut attachments {
            if att.filepath.is_relative() {
                att.filepath = base.join(&att.filepath);
            }
        }
        tracing::info!(count = attachments.len(), "Loaded material manifest {}", path.display());
        let library = Self::new();
        for att in attachments {
            library.insert(att).await;
        }
        Ok(library)
    }

    pub async fn insert(&self, attachment: Attachment) {
        self.attachments
            .write()
            .await
            .insert(attachment.id, attachment);
    }

    /// 登记本地文件，返回新生成的附件
    pub async fn register_file(&self, path: impl AsRef<Path>) -> Result<Attachment, MaterialError> {
        let path = path.as_ref();
        let meta = tokio::fs::metadata(path).await?;
        let original_filename = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());
        let attachment = Attachment {
            id: Uuid::new_v4(),
            original_filename,
            filepath: path.to_path_buf(),
            mime_type: guess_mime_type(path).to_string(),
            size: meta.len(),
            uploaded_at: Utc::now(),
        };
        self.insert(attachment.clone()).await;
        Ok(attachment)
    }

    pub async fn len(&self) -> usize {
        self.attachments.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.attachments.read().await.is_empty()
    }
}

#[async_trait]
impl MaterialStore for MaterialLibrary {
    async fn get(&self, id: Uuid) -> Result<Option<Attachment>, MaterialError> {
        Ok(self.attachments.read().await.get(&id).cloned())
    }

    async fn read_text(&self, attachment: &Attachment) -> Result<String, MaterialError> {
        if !attachment.is_text() {
            return Err(MaterialError::Unsupported(attachment.mime_type.clone()));
        }
        Ok(tokio::fs::read_to_string(&attachment.filepath).await?)
    }

    async fn list(&self) -> Result<Vec<Attachment>, MaterialError> {
        let mut all: Vec<Attachment> = self.attachments.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.uploaded_at.cmp(&b.uploaded_at));
        Ok(all)
    }
}
