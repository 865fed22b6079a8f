//! 运行时装配：配置 → LLM 客户端（设计 / 评审）→ 资料与工具 → 检查点后端 → Orchestrator

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;

use crate::config::{AppConfig, CheckpointBackend};
use crate::core::{Orchestrator, OrchestratorBuilder, TaskScheduler};
use crate::designer::{
    load_prompt, Critic, Planner, WorkflowEvent, DEFAULT_CRITIC_PROMPT, DEFAULT_SYSTEM_PROMPT,
};
use crate::llm::{LlmClient, MockLlmClient, MockMode, OpenAiClient, RetryingLlmClient};
use crate::materials::{MaterialError, MaterialIndex, MaterialLibrary};
use crate::memory::{CheckpointError, CheckpointStore, FileCheckpointStore, InMemoryCheckpointStore};
use crate::tools::{material_tools, ToolExecutor};

#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error(transparent)]
    Material(#[from] MaterialError),

    #[error("checkpoint backend `sqlite` requires the `async-sqlite` feature")]
    SqliteDisabled,
}

/// 根据配置与环境变量选择 LLM 后端（OpenAI 兼容 / Mock）
pub fn create_llm(
    cfg: &AppConfig,
    model: &str,
    temperature: f32,
    mock_mode: MockMode,
) -> Arc<dyn LlmClient> {
    let provider = cfg.llm.provider.to_lowercase();
    let mock = || -> Arc<dyn LlmClient> {
        match mock_mode {
            MockMode::Designer => Arc::new(MockLlmClient::designer()),
            MockMode::Critic => Arc::new(MockLlmClient::critic()),
        }
    };
    if provider == "mock" {
        tracing::info!("Using Mock LLM ({:?})", mock_mode);
        return mock();
    }
    let Some(api_key) = cfg.llm.api_key() else {
        tracing::warn!(
            "{} not set, using Mock LLM ({:?})",
            cfg.llm.api_key_env,
            mock_mode
        );
        return mock();
    };
    tracing::info!("Using OpenAI-compatible LLM ({}) for {:?}", model, mock_mode);
    let client = OpenAiClient::new(cfg.llm.base_url.as_deref(), model, Some(&api_key))
        .with_temperature(temperature);
    Arc::new(RetryingLlmClient::new(Arc::new(client), cfg.llm.retry_config()))
}

pub async fn create_checkpoint_store(
    cfg: &AppConfig,
) -> Result<Arc<dyn CheckpointStore>, RuntimeError> {
    match cfg.checkpoint.backend {
        CheckpointBackend::Memory => Ok(Arc::new(InMemoryCheckpointStore::new())),
        CheckpointBackend::File => {
            let dir = cfg
                .checkpoint
                .dir
                .clone()
                .unwrap_or_else(|| cfg.app.data_dir.join("checkpoints"));
            tracing::info!("Checkpoints stored in {}", dir.display());
            Ok(Arc::new(FileCheckpointStore::new(dir)))
        }
        #[cfg(feature = "async-sqlite")]
        CheckpointBackend::Sqlite => {
            let path = cfg
                .checkpoint
                .db_path
                .clone()
                .unwrap_or_else(|| cfg.app.data_dir.join("checkpoints.db"));
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(CheckpointError::from)?;
            }
            Ok(Arc::new(crate::memory::SqliteCheckpointStore::new(path).await?))
        }
        #[cfg(not(feature = "async-sqlite"))]
        CheckpointBackend::Sqlite => Err(RuntimeError::SqliteDisabled),
    }
}

/// 加载资料清单并登记额外的本地文件
pub async fn load_library(
    cfg: &AppConfig,
    attach: &[PathBuf],
) -> Result<Arc<MaterialLibrary>, MaterialError> {
    let library = match &cfg.tools.materials.manifest {
        Some(path) => MaterialLibrary::from_manifest(path).await?,
        None => MaterialLibrary::new(),
    };
    for path in attach {
        let attachment = library.register_file(path).await?;
        tracing::info!(
            attachment_id = %attachment.id,
            "Attached {}",
            attachment.original_filename
        );
    }
    Ok(Arc::new(library))
}

/// 为检索工具建立资料索引
pub async fn index_materials(
    cfg: &AppConfig,
    library: &MaterialLibrary,
) -> Result<Arc<MaterialIndex>, MaterialError> {
    let index = MaterialIndex::new(
        cfg.tools.materials.chunk_size,
        cfg.tools.materials.chunk_overlap,
    );
    let chunks = index.index_store(library).await?;
    tracing::info!(chunks, "Material index ready");
    Ok(Arc::new(index))
}

/// 按配置组装 Orchestrator
pub async fn build_orchestrator(
    cfg: &AppConfig,
    library: Arc<MaterialLibrary>,
    index: Arc<MaterialIndex>,
    events: Option<UnboundedSender<WorkflowEvent>>,
) -> Result<Orchestrator, RuntimeError> {
    let designer_llm = create_llm(cfg, &cfg.llm.model, cfg.llm.temperature, MockMode::Designer);
    let critic_model = cfg.critic.model.as_deref().unwrap_or(&cfg.llm.model);
    let critic_llm = create_llm(
        cfg,
        critic_model,
        cfg.critic.temperature.unwrap_or(cfg.llm.temperature),
        MockMode::Critic,
    );

    let registry = material_tools(library, Some(index), cfg.tools.materials.top_k);
    let executor = ToolExecutor::new(registry, cfg.tools.tool_timeout_secs).with_retries(
        cfg.tools.max_retries,
        std::time::Duration::from_millis(cfg.llm.retry.initial_backoff_ms),
    );

    let system_prompt = load_prompt(
        cfg.workflow.system_prompt_path.as_deref(),
        DEFAULT_SYSTEM_PROMPT,
    );
    let critic_prompt = load_prompt(cfg.critic.prompt_path.as_deref(), DEFAULT_CRITIC_PROMPT);

    let planner = Planner::new(designer_llm, executor.specs());
    let critic = Critic::new(critic_llm, critic_prompt);
    let store = create_checkpoint_store(cfg).await?;
    let scheduler = Arc::new(TaskScheduler::new(
        cfg.workflow.max_concurrent_sessions,
        cfg.tools.max_concurrent,
    ));

    let mut builder = OrchestratorBuilder::new(Arc::new(planner), Arc::new(critic), executor, store)
        .with_system_prompt(system_prompt)
        .with_limits(cfg.workflow.limits())
        .with_scheduler(scheduler);
    if let Some(tx) = events {
        builder = builder.with_events(tx);
    }
    Ok(builder.build())
}
