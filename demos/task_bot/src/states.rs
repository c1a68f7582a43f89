//! Conversation states of the task flow.
//!
//! ```text
//! idle ──/newtask──▶ awaiting_task_text ──text──▶ awaiting_task_person ──text──▶ idle
//!   ▲                        │                            │
//!   └─────────/cancel────────┴────────────────────────────┘
//! ```

use taskbot::core::{FsmState, StateName};

/// Data field holding the task text between the two prompts.
pub const TASK_TEXT: &str = "task_text";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    AwaitingTaskText,
    AwaitingTaskPerson,
}

impl FsmState for TaskState {
    fn name(&self) -> &'static str {
        match self {
            Self::AwaitingTaskText => "awaiting_task_text",
            Self::AwaitingTaskPerson => "awaiting_task_person",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        match name {
            "awaiting_task_text" => Some(Self::AwaitingTaskText),
            "awaiting_task_person" => Some(Self::AwaitingTaskPerson),
            _ => None,
        }
    }
}

impl From<TaskState> for StateName {
    fn from(state: TaskState) -> Self {
        state.state_name()
    }
}
