//! Error types for frontier-state

use thiserror::Error;

/// Errors for the coordination port abstractions (persistence, locking,
/// assignment, notification).
#[derive(Error, Debug)]
pub enum StateStoreError {
    /// No persisted frontier state exists yet
    #[error("no persisted state found")]
    NotFound,

    /// The persisted envelope belongs to a different plan
    #[error("persisted state belongs to plan '{found}', expected '{expected}'")]
    PlanMismatch { expected: String, found: String },

    /// The persisted envelope failed its integrity digest check
    #[error("state digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },

    /// A coordination lock is already held for the task
    #[error("coordination lock already held for task '{task_id}'")]
    LockHeld { task_id: String },

    /// A release was attempted with an unknown lock id
    #[error("unknown lock id: {lock_id}")]
    UnknownLock { lock_id: String },

    /// The referenced task is unknown to the backend
    #[error("task not found: {task_id}")]
    TaskNotFound { task_id: String },

    /// The referenced team is unknown to the backend
    #[error("team not found: {team_id}")]
    TeamNotFound { team_id: String },

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Backend I/O error
    #[error("state backend error: {0}")]
    Backend(String),
}

impl From<serde_json::Error> for StateStoreError {
    fn from(err: serde_json::Error) -> Self {
        StateStoreError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for StateStoreError {
    fn from(err: std::io::Error) -> Self {
        StateStoreError::Backend(err.to_string())
    }
}

/// Result type for port operations
pub type StateResult<T> = std::result::Result<T, StateStoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_held_error_displays_task_id() {
        let err = StateStoreError::LockHeld {
            task_id: "T042".to_string(),
        };
        assert!(err.to_string().contains("T042"));
    }

    #[test]
    fn test_plan_mismatch_error_displays_both_plans() {
        let err = StateStoreError::PlanMismatch {
            expected: "plan-a".to_string(),
            found: "plan-b".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("plan-a"));
        assert!(msg.contains("plan-b"));
    }
}
