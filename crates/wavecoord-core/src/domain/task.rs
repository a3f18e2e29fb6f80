//! Task runtime state and the legal transition table.
//!
//! The wire shape of a task ([`TaskRecord`]) comes from `frontier-state`;
//! this module owns what the coordinator layers on top: the execution
//! state machine.

use serde::{Deserialize, Serialize};

pub use frontier_state::TaskRecord;

/// Runtime execution state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Initial state; dependencies not yet satisfied.
    Waiting,
    /// Every dependency is `Completed`; eligible to start.
    Ready,
    InProgress,
    /// Terminal happy path.
    Completed,
    /// Cannot progress for an external reason.
    Blocked,
    /// Did not complete; may be retried.
    Failed,
}

impl TaskState {
    /// States reachable from `self` in one legal transition.
    pub fn allowed_transitions(self) -> &'static [TaskState] {
        use TaskState::*;
        match self {
            Waiting => &[Ready, Blocked],
            Ready => &[InProgress, Blocked],
            InProgress => &[Completed, Failed, Blocked],
            Blocked => &[Waiting, Ready],
            Failed => &[Waiting, Ready],
            Completed => &[],
        }
    }

    /// Whether `self → next` is in the legal transition table.
    pub fn can_transition_to(self, next: TaskState) -> bool {
        self.allowed_transitions().contains(&next)
    }

    /// `Completed` is the only terminal state.
    pub fn is_terminal(self) -> bool {
        self == TaskState::Completed
    }

    /// States that count toward a team's concurrent load.
    pub fn is_active(self) -> bool {
        self == TaskState::InProgress
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskState::Waiting => "waiting",
            TaskState::Ready => "ready",
            TaskState::InProgress => "in_progress",
            TaskState::Completed => "completed",
            TaskState::Blocked => "blocked",
            TaskState::Failed => "failed",
        };
        write!(f, "{s}")
    }
}
