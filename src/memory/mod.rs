//! 记忆层：对话记录类型与会话检查点持久化

pub mod checkpoint;
pub mod conversation;
#[cfg(feature = "async-sqlite")]
pub mod sqlite_checkpoint;

pub use checkpoint::{
    validate_session_id, CheckpointError, CheckpointStore, FileCheckpointStore,
    InMemoryCheckpointStore,
};
pub use conversation::{AssistantMessage, Message, Role, ToolCall};
#[cfg(feature = "async-sqlite")]
pub use sqlite_checkpoint::SqliteCheckpointStore;
