//! 会话监管：运行中会话的取消令牌
//!
//! 每个运行中的会话持有一个 CancellationToken（根令牌的子令牌）；同一进程内同一会话不能被并发运行两次。
//! SessionGuard 释放时自动注销。

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;

use crate::core::WorkflowError;

/// 会话级生命周期管理
#[derive(Debug, Default)]
pub struct SessionSupervisor {
    /// Ctrl+C 等全局取消时触发
    root: CancellationToken,
    running: Mutex<HashMap<String, CancellationToken>>,
}

impl SessionSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记一个会话开始运行；已在运行则返回 SessionBusy
    pub fn begin(self: &Arc<Self>, session_id: &str) -> Result<SessionGuard, WorkflowError> {
        let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        if running.contains_key(session_id) {
            return Err(WorkflowError::SessionBusy(session_id.to_string()));
        }
        let token = self.root.child_token();
        running.insert(session_id.to_string(), token.clone());
        Ok(SessionGuard {
            supervisor: Arc::clone(self),
            session_id: session_id.to_string(),
            token,
        })
    }

    /// 取消指定会话；会话未在运行时返回 false
    pub fn cancel(&self, session_id: &str) -> bool {
        let running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        match running.get(session_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// 取消所有会话
    pub fn cancel_all(&self) {
        self.root.cancel();
    }

    pub fn is_running(&self, session_id: &str) -> bool {
        self.running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(session_id)
    }

    pub fn running_sessions(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    fn release(&self, session_id: &str) {
        self.running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(session_id);
    }
}

/// 运行中会话的登记凭证
#[derive(Debug)]
pub struct SessionGuard {
    supervisor: Arc<SessionSupervisor>,
    session_id: String,
    token: CancellationToken,
}

impl SessionGuard {
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.supervisor.release(&self.session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_session_cannot_run_twice() {
        let supervisor = Arc::new(SessionSupervisor::new());
        let guard = supervisor.begin("s1").unwrap();
        assert!(matches!(
            supervisor.begin("s1"),
            Err(WorkflowError::SessionBusy(id)) if id == "s1"
        ));
        let _other = supervisor.begin("s2").unwrap();
        assert_eq!(supervisor.running_sessions(), vec!["s1", "s2"]);

        drop(guard);
        assert!(!supervisor.is_running("s1"));
        assert!(supervisor.begin("s1").is_ok());
    }

    #[test]
    fn test_cancel_is_per_session() {
        let supervisor = Arc::new(SessionSupervisor::new());
        let a = supervisor.begin("a").unwrap();
        let b = supervisor.begin("b").unwrap();
        assert!(supervisor.cancel("a"));
        assert!(a.is_cancelled());
        assert!(!b.is_cancelled());
        assert!(!supervisor.cancel("missing"));

        supervisor.cancel_all();
        assert!(b.is_cancelled());
    }
}
