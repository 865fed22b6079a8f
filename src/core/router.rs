//! 路由：纯函数，只看最新一条消息

use crate::memory::Message;

/// 路由决策
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Route {
    ToTools,
    ToCritic,
}

/// 最新消息是带工具调用的 Assistant 消息时去执行工具，否则交给 Critic
pub fn route(latest: &Message) -> Route {
    if latest.tool_calls().is_empty() {
        Route::ToCritic
    } else {
        Route::ToTools
    }
}
