//! 资料检索索引
//!
//! 将资料文本按字符切块（chunk_size / chunk_overlap），按查询词与块内词集合的交集大小排序。
//! 只是为 search 工具提供一个可用的默认实现，向量检索等由外部服务替换。

use std::collections::HashSet;
use std::sync::RwLock;

use serde::Serialize;
use uuid::Uuid;

use super::{Attachment, MaterialError, MaterialStore};

/// 检索命中
#[derive(Clone, Debug, Serialize)]
pub struct MaterialHit {
    pub attachment_id: Uuid,
    pub original_filename: String,
    pub content: String,
    pub score: usize,
}

#[derive(Debug)]
struct Chunk {
    attachment_id: Uuid,
    original_filename: String,
    content: String,
    tokens: HashSet<String>,
}

/// 将文本切分为小写词集合
fn tokenize_lower(s: &str) -> HashSet<String> {
    s.split(|c: char| !c.is_alphanumeric())
        .map(|w| w.to_lowercase())
        .filter(|w| w.chars().count() > 1)
        .collect()
}

/// 按字符数切块，相邻块重叠 overlap 个字符
pub fn split_chunks(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    if chars.is_empty() {
        return Vec::new();
    }
    let chunk_size = chunk_size.max(1);
    let step = chunk_size.saturating_sub(overlap).max(1);
    let mut chunks = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        let end = (start + chunk_size).min(chars.len());
        chunks.push(chars[start..end].iter().collect());
        if end == chars.len() {
            break;
        }
        start += step;
    }
    chunks
}

/// 内存检索索引
#[derive(Debug)]
pub struct MaterialIndex {
    chunks: RwLock<Vec<Chunk>>,
    chunk_size: usize,
    chunk_overlap: usize,
}

impl Default for MaterialIndex {
    fn default() -> Self {
        Self::new(1200, 50)
    }
}

impl MaterialIndex {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self {
            chunks: RwLock::new(Vec::new()),
            chunk_size,
            chunk_overlap,
        }
    }

    /// 索引一份资料的文本，返回新增块数
    pub fn index_text(&self, attachment: &Attachment, text: &str) -> usize {
        let new_chunks: Vec<Chunk> = split_chunks(text, self.chunk_size, self.chunk_overlap)
            .into_iter()
            .map(|content| Chunk {
                attachment_id: attachment.id,
                original_filename: attachment.original_filename.clone(),
                tokens: tokenize_lower(&content),
                content,
            })
            .collect();
        let n = new_chunks.len();
        let mut chunks = self.chunks.write().unwrap_or_else(|e| e.into_inner());
        chunks.retain(|c| c.attachment_id != attachment.id);
        chunks.extend(new_chunks);
        n
    }

    /// 索引资料库中全部可读资料；不支持的格式、丢失或不可读的文件跳过
    pub async fn index_store(&self, store: &dyn MaterialStore) -> Result<usize, MaterialError> {
        let mut total = 0;
        for attachment in store.list().await? {
            match store.read_text(&attachment).await {
                Ok(text) => {
                    let n = self.index_text(&attachment, &text);
                    tracing::info!(
                        attachment_id = %attachment.id,
                        chunks = n,
                        "Indexed material {}",
                        attachment.original_filename
                    );
                    total += n;
                }
                Err(MaterialError::Unsupported(mime)) => {
                    tracing::warn!(
                        attachment_id = %attachment.id,
                        "Skip indexing {} ({})",
                        attachment.original_filename,
                        mime
                    );
                }
                Err(MaterialError::Unavailable(detail)) => {
                    return Err(MaterialError::Unavailable(detail));
                }
                Err(e) => {
                    tracing::warn!(
                        attachment_id = %attachment.id,
                        "Skip indexing {}: {}",
                        attachment.original_filename,
                        e
                    );
                }
            }
        }
        Ok(total)
    }

    /// 检索最相关的 k 个块；scope 非空时只在这些附件内检索
    pub fn search(&self, query: &str, k: usize, scope: Option<&HashSet<Uuid>>) -> Vec<MaterialHit> {
        let query_tokens = tokenize_lower(query);
        if query_tokens.is_empty() || k == 0 {
            return Vec::new();
        }
        let chunks = self.chunks.read().unwrap_or_else(|e| e.into_inner());
        let mut hits: Vec<MaterialHit> = chunks
            .iter()
            .filter(|c| scope.map_or(true, |s| s.contains(&c.attachment_id)))
            .filter_map(|c| {
                let score = query_tokens.intersection(&c.tokens).count();
                (score > 0).then(|| MaterialHit {
                    attachment_id: c.attachment_id,
                    original_filename: c.original_filename.clone(),
                    content: c.content.clone(),
                    score,
                })
            })
            .collect();
        hits.sort_by(|a, b| b.score.cmp(&a.score));
        hits.truncate(k);
        hits
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.read().unwrap_or_else(|e| e.into_inner()).len()
    }
}
