//! 检查点存储
//!
//! 按 session_id 持久化 WorkflowState，进程崩溃或重启后可从最后一次提交处继续。
//! 所有实现都拒绝 version 不比已存版本新的写入（StaleVersion），防止同一会话的两个执行者互相覆盖。

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};

use crate::core::WorkflowState;

/// 检查点错误
#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("Checkpoint I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Checkpoint serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Checkpoint database error: {0}")]
    Database(String),

    #[error("Invalid session id: {0:?}")]
    InvalidSessionId(String),

    #[error("Stale checkpoint for session {session_id}: version {attempted} is not newer than stored {stored}")]
    StaleVersion {
        session_id: String,
        attempted: u64,
        stored: u64,
    },

    #[error("Corrupt checkpoint for session {session_id}: {detail}")]
    Corrupt { session_id: String, detail: String },
}

/// 检查点存储接口
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// 保存会话状态；state.version 必须大于已存版本
    async fn save(&self, session_id: &str, state: &WorkflowState) -> Result<(), CheckpointError>;

    /// 读取会话状态；不存在返回 None
    async fn load(&self, session_id: &str) -> Result<Option<WorkflowState>, CheckpointError>;

    /// 所有已存会话 id（排序后）
    async fn list_sessions(&self) -> Result<Vec<String>, CheckpointError>;
}

/// session id 仅允许 [A-Za-z0-9_-]，长度 1..=128（文件名与主键都直接使用它）
pub fn validate_session_id(session_id: &str) -> Result<(), CheckpointError> {
    let ok = !session_id.is_empty()
        && session_id.len() <= 128
        && session_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if ok {
        Ok(())
    } else {
        Err(CheckpointError::InvalidSessionId(session_id.to_string()))
    }
}

fn check_version(
    session_id: &str,
    stored: Option<u64>,
    attempted: u64,
) -> Result<(), CheckpointError> {
    match stored {
        Some(stored) if attempted <= stored => Err(CheckpointError::StaleVersion {
            session_id: session_id.to_string(),
            attempted,
            stored,
        }),
        _ => Ok(()),
    }
}

/// 内存检查点：进程内有效，适合测试与单次运行
#[derive(Debug, Default)]
pub struct InMemoryCheckpointStore {
    states: RwLock<HashMap<String, WorkflowState>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn save(&self, session_id: &str, state: &WorkflowState) -> Result<(), CheckpointError> {
        validate_session_id(session_id)?;
        let mut states = self.states.write().await;
        check_version(
            session_id,
            states.get(session_id).map(|s| s.version),
            state.version,
        )?;
        states.insert(session_id.to_string(), state.clone());
        Ok(())
    }

    async fn load(&self, session_id: &str) -> Result<Option<WorkflowState>, CheckpointError> {
        validate_session_id(session_id)?;
        Ok(self.states.read().await.get(session_id).cloned())
    }

    async fn list_sessions(&self) -> Result<Vec<String>, CheckpointError> {
        let mut ids: Vec<String> = self.states.read().await.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}

/// 文件检查点：每个会话一个 JSON 文件（{dir}/{session_id}.json），先写临时文件再 rename
#[derive(Debug)]
pub struct FileCheckpointStore {
    dir: PathBuf,
    /// 按 session 串行化同一进程内的读-比较-写；不同会话互不等待
    session_locks: std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl FileCheckpointStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            session_locks: std::sync::Mutex::new(HashMap::new()),
        }
    }

    fn session_lock(&self, session_id: &str) -> Arc<Mutex<()>> {
        self.session_locks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(session_id.to_string())
            .or_default()
            .clone()
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, session_id: &str) -> PathBuf {
        self.dir.join(format!("{session_id}.json"))
    }

    async fn read(&self, session_id: &str) -> Result<Option<WorkflowState>, CheckpointError> {
        let path = self.path_for(session_id);
        let data = match tokio::fs::read_to_string(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let state: WorkflowState =
            serde_json::from_str(&data).map_err(|e| CheckpointError::Corrupt {
                session_id: session_id.to_string(),
                detail: e.to_string(),
            })?;
        Ok(Some(state))
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn save(&self, session_id: &str, state: &WorkflowState) -> Result<(), CheckpointError> {
        validate_session_id(session_id)?;
        let lock = self.session_lock(session_id);
        let _guard = lock.lock().await;
        tokio::fs::create_dir_all(&self.dir).await?;

        let stored = self.read(session_id).await?.map(|s| s.version);
        check_version(session_id, stored, state.version)?;

        let path = self.path_for(session_id);
        let tmp = self.dir.join(format!(".{session_id}.json.tmp"));
        let data = serde_json::to_vec_pretty(state)?;
        tokio::fs::write(&tmp, data).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn load(&self, session_id: &str) -> Result<Option<WorkflowState>, CheckpointError> {
        validate_session_id(session_id)?;
        self.read(session_id).await
    }

    async fn list_sessions(&self) -> Result<Vec<String>, CheckpointError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') {
                continue;
            }
            if let Some(id) = name.strip_suffix(".json") {
                ids.push(id.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::WorkflowPhase;
    use crate::memory::Message;
    use std::time::Duration;

    fn state(session_id: &str, version: u64) -> WorkflowState {
        let mut s = WorkflowState::new(session_id, "Design an AI course");
        s.messages.push(Message::human("Design an AI course"));
        s.phase = WorkflowPhase::Invoking;
        s.version = version;
        s
    }

    #[test]
    fn test_validate_session_id() {
        assert!(validate_session_id("course-42_a").is_ok());
        assert!(validate_session_id("").is_err());
        assert!(validate_session_id("../etc/passwd").is_err());
        assert!(validate_session_id("a b").is_err());
        assert!(validate_session_id(&"x".repeat(129)).is_err());
    }

    #[tokio::test]
    async fn test_memory_store_roundtrip() {
        let store = InMemoryCheckpointStore::new();
        assert!(store.load("s1").await.unwrap().is_none());
        store.save("s1", &state("s1", 1)).await.unwrap();
        let loaded = store.load("s1").await.unwrap().unwrap();
        assert_eq!(loaded.version, 1);
        assert_eq!(loaded.messages.len(), 1);
    }

    #[tokio::test]
    async fn test_memory_store_rejects_stale_version() {
        let store = InMemoryCheckpointStore::new();
        store.save("s1", &state("s1", 2)).await.unwrap();
        let err = store.save("s1", &state("s1", 2)).await.unwrap_err();
        assert!(matches!(err, CheckpointError::StaleVersion { stored: 2, .. }));
        store.save("s1", &state("s1", 3)).await.unwrap();
    }

    #[tokio::test]
    async fn test_memory_store_sessions_are_independent() {
        let store = Arc::new(InMemoryCheckpointStore::new());
        let mut handles = Vec::new();
        for i in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let id = format!("session-{i}");
                for v in 1..=5 {
                    store.save(&id, &state(&id, v)).await.unwrap();
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        let ids = store.list_sessions().await.unwrap();
        assert_eq!(ids.len(), 8);
        for id in ids {
            let s = store.load(&id).await.unwrap().unwrap();
            assert_eq!(s.version, 5);
            assert_eq!(s.session_id, id);
        }
    }

    #[tokio::test]
    async fn test_file_store_roundtrip_and_list() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path().join("checkpoints"));
        assert!(store.list_sessions().await.unwrap().is_empty());
        assert!(store.load("b").await.unwrap().is_none());

        store.save("b", &state("b", 1)).await.unwrap();
        store.save("a", &state("a", 1)).await.unwrap();
        store.save("b", &state("b", 2)).await.unwrap();

        assert_eq!(store.list_sessions().await.unwrap(), vec!["a", "b"]);
        assert_eq!(store.load("b").await.unwrap().unwrap().version, 2);
        assert!(matches!(
            store.save("b", &state("b", 1)).await,
            Err(CheckpointError::StaleVersion { .. })
        ));
    }

    #[tokio::test]
    async fn test_file_store_reports_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bad.json"), "{not json").unwrap();
        let store = FileCheckpointStore::new(dir.path());
        assert!(matches!(
            store.load("bad").await,
            Err(CheckpointError::Corrupt { .. })
        ));
    }

    #[tokio::test]
    async fn test_file_store_rejects_path_escape() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path());
        assert!(matches!(
            store.save("../x", &state("x", 1)).await,
            Err(CheckpointError::InvalidSessionId(_))
        ));
    }

    #[tokio::test]
    async fn test_file_store_locks_per_session() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path());
        let held = store.session_lock("a");
        let _guard = held.lock().await;

        // 会话 a 的写入被占用时，会话 b 照常写入
        tokio::time::timeout(Duration::from_secs(2), store.save("b", &state("b", 1)))
            .await
            .expect("save of another session must not wait")
            .unwrap();
        assert!(
            tokio::time::timeout(Duration::from_millis(50), store.save("a", &state("a", 1)))
                .await
                .is_err()
        );
    }
}
