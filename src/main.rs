//! course-designer 命令行入口
//!
//! run：由教师表单或原始请求启动 / 恢复一个会话；show：打印会话检查点；sessions：列出已保存的会话。

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use course_designer::config::{load_config, AppConfig};
use course_designer::core::SessionOutcome;
use course_designer::designer::{DifficultyLevel, TeacherInputs, WorkflowEvent};
use course_designer::materials::MaterialStore;
use course_designer::{observability, runtime};
use uuid::Uuid;

/// 课程结构设计工作流
#[derive(Parser)]
#[command(name = "course-designer")]
#[command(about = "Design a course structure with an LLM designer, material tools and a critic")]
#[command(version)]
struct Cli {
    /// 配置文件（覆盖 config/default.toml）
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// 启动或恢复一个设计会话
    Run(RunArgs),
    /// 打印会话检查点（JSON）
    Show {
        session: String,
    },
    /// 列出已保存的会话
    Sessions,
}

#[derive(Args)]
struct RunArgs {
    /// 会话 id；未指定时生成新的 id
    #[arg(long)]
    session: Option<String>,

    /// 直接使用的请求文本（与表单字段二选一）
    #[arg(long, conflicts_with_all = ["discipline", "audience"])]
    prompt: Option<String>,

    #[arg(long)]
    discipline: Option<String>,

    #[arg(long)]
    audience: Option<String>,

    #[arg(long, default_value = "beginner")]
    difficulty: DifficultyLevel,

    #[arg(long)]
    hours: Option<u32>,

    #[arg(long = "link")]
    links: Vec<String>,

    #[arg(long)]
    comment: Option<String>,

    /// 附加的本地资料文件，可重复
    #[arg(long = "attach")]
    attach: Vec<PathBuf>,

    /// 资料清单（JSON），覆盖配置中的 tools.materials.manifest
    #[arg(long)]
    manifest: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    observability::init();
    let cli = Cli::parse();

    let mut cfg = load_config(cli.config.clone()).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });

    match cli.command {
        Command::Run(args) => run(&mut cfg, args).await,
        Command::Show { session } => {
            let store = runtime::create_checkpoint_store(&cfg).await?;
            let state = store
                .load(&session)
                .await
                .with_context(|| format!("Failed to load session {session}"))?;
            match state {
                Some(state) => {
                    println!("{}", serde_json::to_string_pretty(&state)?);
                    Ok(ExitCode::SUCCESS)
                }
                None => {
                    eprintln!("Session {session} not found");
                    Ok(ExitCode::FAILURE)
                }
            }
        }
        Command::Sessions => {
            let store = runtime::create_checkpoint_store(&cfg).await?;
            for id in store.list_sessions().await? {
                println!("{id}");
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn run(cfg: &mut AppConfig, args: RunArgs) -> anyhow::Result<ExitCode> {
    if let Some(manifest) = args.manifest.clone() {
        cfg.tools.materials.manifest = Some(manifest);
    }
    let library = runtime::load_library(cfg, &args.attach)
        .await
        .context("Failed to load materials")?;
    let index = runtime::index_materials(cfg, &library)
        .await
        .context("Failed to index materials")?;

    let prompt = match args.prompt {
        Some(prompt) => prompt,
        None => {
            let attachments = library.list().await?;
            TeacherInputs {
                discipline: args.discipline.unwrap_or_default(),
                target_audience: args.audience.unwrap_or_default(),
                difficulty_level: args.difficulty,
                estimated_duration_hours: args.hours,
                external_links: args.links,
                comment: args.comment,
                attachment_ids: attachments.iter().map(|a| a.id).collect(),
            }
            .to_prompt()
        }
    };

    let (event_tx, mut event_rx) = tokio::sync::mpsc::unbounded_channel::<WorkflowEvent>();
    let orchestrator = runtime::build_orchestrator(cfg, library, index, Some(event_tx))
        .await
        .context("Failed to build orchestrator")?;

    tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            if let Ok(json) = serde_json::to_string(&event) {
                tracing::debug!(event = %json, "workflow event");
            }
        }
    });

    let supervisor = orchestrator.supervisor().clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Ctrl+C received, cancelling sessions");
            supervisor.cancel_all();
        }
    });

    let session_id = args
        .session
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    tracing::info!(session_id = %session_id, "Launching session");

    match orchestrator.launch(&prompt, &session_id).await? {
        SessionOutcome::Accepted { structure, state } => {
            println!("{structure}");
            tracing::info!(
                session_id = %session_id,
                llm_calls = state.llm_calls,
                rounds = state.rounds,
                "Course structure accepted"
            );
            Ok(ExitCode::SUCCESS)
        }
        SessionOutcome::Failed { reason, detail, .. } => {
            eprintln!("Session {session_id} failed [{reason}]: {detail}");
            Ok(ExitCode::FAILURE)
        }
        SessionOutcome::Cancelled { state } => {
            eprintln!(
                "Session {session_id} cancelled at {} (version {}); run again with --session {session_id} to resume",
                state.phase, state.version
            );
            Ok(ExitCode::from(130))
        }
    }
}
