//! 课程设计层：模型调用（Planner）、评审（Critic）、prompt、教师表单与过程事件

pub mod critic;
pub mod events;
pub mod planner;
pub mod prompts;
pub mod teacher_inputs;

pub use critic::{
    format_instructions, parse_verdict, CourseCritic, Critic, CriticAction, CriticError,
    CriticVerdict,
};
pub use events::WorkflowEvent;
pub use planner::{normalize_tool_call_ids, ModelInvoker, Planner};
pub use prompts::{load_prompt, DEFAULT_CRITIC_PROMPT, DEFAULT_SYSTEM_PROMPT};
pub use teacher_inputs::{DifficultyLevel, TeacherInputs};
