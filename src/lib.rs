//! Course Designer - 课程结构设计工作流
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 工作流状态、路由、编排状态机、会话监管、任务调度
//! - **designer**: 模型调用（Planner）、评审（Critic）、prompt、教师表单、过程事件
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / Mock / Scripted）与重试
//! - **materials**: 教学资料元数据、资料库与检索索引
//! - **memory**: 对话消息类型与检查点存储（内存 / 文件 / SQLite）
//! - **tools**: 工具注册表、执行器与资料工具
//! - **runtime**: 由配置组装 Orchestrator

pub mod config;
pub mod core;
pub mod designer;
pub mod llm;
pub mod materials;
pub mod memory;
pub mod observability;
pub mod runtime;
pub mod tools;
