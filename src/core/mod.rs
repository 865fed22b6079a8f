//! 核心编排层：工作流状态、路由、错误与失败原因、会话监管、任务调度与状态机

pub mod builder;
pub mod error;
pub mod orchestrator;
pub mod router;
pub mod session_supervisor;
pub mod state;
pub mod task_scheduler;

pub use builder::OrchestratorBuilder;
pub use error::{FailureReason, WorkflowError};
pub use orchestrator::{critique_directive, Orchestrator, SessionOutcome, WorkflowLimits};
pub use router::{route, Route};
pub use session_supervisor::{SessionGuard, SessionSupervisor};
pub use state::{FailureRecord, WorkflowPhase, WorkflowState};
pub use task_scheduler::TaskScheduler;
