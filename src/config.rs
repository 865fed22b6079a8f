//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `COURSE_DESIGNER__*` 覆盖
//! （双下划线表示嵌套，如 `COURSE_DESIGNER__WORKFLOW__MAX_CRITIQUE_ROUNDS=5`）。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::core::WorkflowLimits;
use crate::llm::RetryConfig;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub critic: CriticSection,
    pub tools: ToolsSection,
    pub workflow: WorkflowSection,
    pub checkpoint: CheckpointSection,
}

/// [app] 段：应用名、数据目录
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: Option<String>,
    pub data_dir: PathBuf,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: None,
            data_dir: PathBuf::from("./data"),
        }
    }
}

/// [llm] 段：后端选择、模型、超时与重试
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// 后端：openai / mock；openai 但没有 API Key 时退回 mock
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    /// 存放 API Key 的环境变量名
    pub api_key_env: String,
    pub temperature: f32,
    pub timeouts: LlmTimeoutsSection,
    pub retry: LlmRetrySection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            base_url: None,
            api_key_env: "OPENAI_API_KEY".to_string(),
            temperature: 0.5,
            timeouts: LlmTimeoutsSection::default(),
            retry: LlmRetrySection::default(),
        }
    }
}

impl LlmSection {
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_retries: self.retry.max_retries,
            initial_backoff: Duration::from_millis(self.retry.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.retry.max_backoff_ms),
            request_timeout: Duration::from_secs(self.timeouts.request),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmTimeoutsSection {
    /// 单次请求超时（秒）
    pub request: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self { request: 60 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmRetrySection {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for LlmRetrySection {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 8000,
        }
    }
}

/// [critic] 段：评审可以使用与设计不同的模型（避免自我认同）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CriticSection {
    pub model: Option<String>,
    pub temperature: Option<f32>,
    /// 评审 prompt 模板文件，未设置时使用内置模板
    pub prompt_path: Option<PathBuf>,
}

/// [tools] 段：工具超时、重试、并发与资料检索
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    /// 单次工具调用超时（秒）
    pub tool_timeout_secs: u64,
    pub max_retries: u32,
    pub max_concurrent: usize,
    pub materials: MaterialsSection,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: 30,
            max_retries: 2,
            max_concurrent: 3,
            materials: MaterialsSection::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MaterialsSection {
    /// 附件清单（JSON 数组）
    pub manifest: Option<PathBuf>,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub top_k: usize,
}

impl Default for MaterialsSection {
    fn default() -> Self {
        Self {
            manifest: None,
            chunk_size: 1200,
            chunk_overlap: 50,
            top_k: 10,
        }
    }
}

/// [workflow] 段：循环上限与会话并发
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkflowSection {
    /// 未设置时不限制评审轮数；至少为 1（第一份方案总会被评审一次）
    pub max_critique_rounds: Option<u32>,
    pub max_llm_calls: Option<u32>,
    pub max_concurrent_sessions: usize,
    pub system_prompt_path: Option<PathBuf>,
}

impl Default for WorkflowSection {
    fn default() -> Self {
        Self {
            max_critique_rounds: None,
            max_llm_calls: None,
            max_concurrent_sessions: 4,
            system_prompt_path: None,
        }
    }
}

impl WorkflowSection {
    /// 拒绝无法表达的上限：max_critique_rounds = 0
    pub fn validate(&self) -> Result<(), config::ConfigError> {
        if self.max_critique_rounds == Some(0) {
            return Err(config::ConfigError::Message(
                "workflow.max_critique_rounds must be at least 1 (omit it for no limit)".to_string(),
            ));
        }
        Ok(())
    }

    pub fn limits(&self) -> WorkflowLimits {
        WorkflowLimits {
            max_critique_rounds: self.max_critique_rounds,
            max_llm_calls: self.max_llm_calls,
        }
    }
}

/// 检查点后端
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointBackend {
    Memory,
    #[default]
    File,
    Sqlite,
}

/// [checkpoint] 段
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CheckpointSection {
    pub backend: CheckpointBackend,
    /// file 后端目录，默认 {data_dir}/checkpoints
    pub dir: Option<PathBuf>,
    /// sqlite 后端文件，默认 {data_dir}/checkpoints.db
    pub db_path: Option<PathBuf>,
}

/// 从 config 目录加载配置，环境变量 COURSE_DESIGNER__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 COURSE_DESIGNER__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        } else {
            tracing::warn!("Config file {} not found, ignoring", path.display());
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("COURSE_DESIGNER")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    let cfg: AppConfig = c.try_deserialize()?;
    cfg.workflow.validate()?;
    Ok(cfg)
}
