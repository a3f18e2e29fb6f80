//! Error types for the wave coordination core.

use thiserror::Error;

use crate::domain::task::TaskState;

/// Stable machine-readable error codes, grouped by the handling policy the
/// caller should apply (invariant, transient, usage, competition, policy).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    DependencyViolation,
    CapacityOverflow,
    OptimizationConflict,
    Configuration,
    UnknownId,
    ConcurrentTransfer,
    TransferRejected,
    SkillMismatch,
    CoordinationFailure,
    Transient,
}

/// Errors produced by the coordination core.
#[derive(Debug, Error)]
pub enum CoordError {
    /// A task references a dependency that does not exist.
    #[error("task '{task}' depends on unknown task '{dependency}'")]
    DependencyViolation { task: String, dependency: String },

    /// A dependency cycle was detected; `path` is the full cycle, first
    /// node repeated at the end.
    #[error("dependency cycle detected: {path:?}")]
    DependencyCycle { path: Vec<String> },

    /// An edge runs from a later wave into an earlier one.
    #[error("task '{task}' (wave {task_wave}) depends on '{dependency}' (wave {dependency_wave})")]
    WaveOrderViolation {
        task: String,
        task_wave: u32,
        dependency: String,
        dependency_wave: u32,
    },

    /// A state transition outside the allowed table was requested.
    #[error("illegal transition for task '{task}': {from:?} -> {to:?}")]
    IllegalTransition {
        task: String,
        from: TaskState,
        to: TaskState,
    },

    /// A wave boundary would assign a team more tasks than it can run.
    #[error("capacity overflow for team '{team}': {assigned} tasks, {capacity} slots")]
    CapacityOverflow {
        team: String,
        assigned: usize,
        capacity: u32,
    },

    /// Two optimizations target the same task/wave and cannot both apply.
    #[error("conflicting optimizations target '{target}'")]
    OptimizationConflict { target: String },

    /// Invalid configuration detected at construction.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// A referenced task id is unknown.
    #[error("unknown task: {0}")]
    UnknownTask(String),

    /// A referenced team id is unknown.
    #[error("unknown team: {0}")]
    UnknownTeam(String),

    /// The task is locked by another in-flight transfer.
    #[error("task '{task}' is locked by a concurrent transfer")]
    ConcurrentTransfer { task: String },

    /// A transfer was rejected by policy or by the receiving team.
    #[error("transfer of '{task}' rejected: {reason}")]
    TransferRejected { task: String, reason: String },

    /// No candidate team clears the skill-match threshold.
    #[error("no viable skill match for task '{task}' toward team '{team}'")]
    SkillMismatch { task: String, team: String },

    /// The coordinator is in the wrong phase or an internal pass failed.
    #[error("coordination failure: {0}")]
    Coordination(String),

    /// Bubbled-up persistence/port error (transient, retriable).
    #[error("state error: {0}")]
    Storage(#[from] frontier_state::StateStoreError),
}

impl CoordError {
    /// Stable code for this error, independent of display formatting.
    pub fn code(&self) -> ErrorCode {
        match self {
            CoordError::DependencyViolation { .. }
            | CoordError::DependencyCycle { .. }
            | CoordError::WaveOrderViolation { .. }
            | CoordError::IllegalTransition { .. } => ErrorCode::DependencyViolation,
            CoordError::CapacityOverflow { .. } => ErrorCode::CapacityOverflow,
            CoordError::OptimizationConflict { .. } => ErrorCode::OptimizationConflict,
            CoordError::Configuration(_) => ErrorCode::Configuration,
            CoordError::UnknownTask(_) | CoordError::UnknownTeam(_) => ErrorCode::UnknownId,
            CoordError::ConcurrentTransfer { .. } => ErrorCode::ConcurrentTransfer,
            CoordError::TransferRejected { .. } => ErrorCode::TransferRejected,
            CoordError::SkillMismatch { .. } => ErrorCode::SkillMismatch,
            CoordError::Coordination(_) => ErrorCode::CoordinationFailure,
            CoordError::Storage(_) => ErrorCode::Transient,
        }
    }

    /// `true` when the caller may retry the operation as-is.
    pub fn is_transient(&self) -> bool {
        self.code() == ErrorCode::Transient
    }
}

/// Convenience result alias.
pub type Result<T> = std::result::Result<T, CoordError>;
