//! Port trait definitions for the wave coordination core
//!
//! These traits define the seams between the coordinator and its
//! collaborators:
//! - `TaskSource`: enumerates the tasks of a plan
//! - `CapacitySource`: team capacity and skill lookup
//! - `AssignmentSink`: applies and rolls back task reassignments
//! - `CoordinationLock`: per-task exclusive critical sections
//! - `TransferApproval`: asks the receiving team to accept a transfer
//! - `StatePersistence`: saves/loads the frontier state envelope
//! - `Notifier`: delivers typed coordination events
//! - `CiSignalSource`: read-only CI/PR signals (metrics only)
//!
//! All traits are async and backend-agnostic. In-memory fakes are provided
//! for testing via the `fakes` module.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StateResult;
use crate::snapshot::StateEnvelope;

// ---------------------------------------------------------------------------
// Wire records
// ---------------------------------------------------------------------------

/// A task as enumerated by a [`TaskSource`].
///
/// This is the wire shape; runtime state (`Waiting`, `Ready`, ...) is owned
/// by the coordinator, not the source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    /// Stable task identifier, e.g. `"T017"`.
    pub id: String,
    /// Human-readable title.
    pub title: String,
    /// Wave the task is currently assigned to (≥ 1).
    pub wave: u32,
    /// Owning team identifier.
    pub team: String,
    /// Ids of tasks this task depends on, in declaration order.
    pub depends_on: Vec<String>,
    /// Acceptance-criterion strings.
    pub acceptance: Vec<String>,
    /// Whether the task sits on the plan's critical path by declaration.
    pub critical: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Concurrency budget and delivery profile for a team.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamCapacity {
    pub team_id: String,
    /// Maximum tasks the team works on concurrently.
    pub max_concurrent_tasks: u32,
    /// Tasks currently in flight (0 ≤ load ≤ max).
    pub current_load: u32,
    /// Historical throughput multiplier (> 0).
    pub velocity: f64,
    /// Fraction of nominal output actually delivered, in [0,1].
    pub efficiency: f64,
    /// Fraction of the team currently available, in [0,1].
    pub availability: f64,
    /// Free-form specialization tags, e.g. `"backend"`, `"infra"`.
    pub specializations: Vec<String>,
}

impl TeamCapacity {
    /// Current utilization as `load / max`, 0.0 for a zero-capacity team.
    pub fn utilization(&self) -> f64 {
        if self.max_concurrent_tasks == 0 {
            0.0
        } else {
            f64::from(self.current_load) / f64::from(self.max_concurrent_tasks)
        }
    }

    /// Remaining concurrent slots.
    pub fn available_slots(&self) -> u32 {
        self.max_concurrent_tasks.saturating_sub(self.current_load)
    }
}

/// A skill a team offers, with proficiency and availability in [0,1].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamSkill {
    pub skill_id: String,
    pub proficiency: f64,
    pub availability: f64,
}

/// A transfer proposal submitted to the receiving team for approval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferRequest {
    pub task_id: String,
    pub from_team: String,
    pub to_team: String,
    /// Why the engine wants this transfer (`"proactive"`, `"reactive"`,
    /// `"emergency"`).
    pub reason: String,
    pub expected_benefit: f64,
    pub transfer_cost: f64,
    pub dependency_risk: f64,
    pub requested_at: DateTime<Utc>,
}

/// Conclusion of the latest check run attached to a task's PR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckConclusion {
    Success,
    Failure,
    Neutral,
    Cancelled,
    TimedOut,
}

/// A typed coordination event as delivered through the [`Notifier`] port.
///
/// `kind` is the stable event name (e.g. `"frontier_initialized"`,
/// `"rollback_executed"`); `payload` carries event-specific data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub kind: String,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

/// Opaque handle for a held coordination lock.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LockId(pub String);

impl LockId {
    /// Generate a new random lock id.
    pub fn new() -> Self {
        LockId(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for LockId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for LockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// TaskSource
// ---------------------------------------------------------------------------

/// Enumerates the tasks of a plan.
///
/// Implementations typically wrap an issue tracker; the coordinator never
/// writes through this port.
#[async_trait]
pub trait TaskSource: Send + Sync {
    /// Fetch every task of the plan.
    async fn fetch_tasks(&self) -> StateResult<Vec<TaskRecord>>;
}

// ---------------------------------------------------------------------------
// CapacitySource
// ---------------------------------------------------------------------------

/// Team capacity and skill lookup.
#[async_trait]
pub trait CapacitySource: Send + Sync {
    /// Capacity profile for one team.
    /// Returns `StateStoreError::TeamNotFound` for unknown ids.
    async fn team_capacity(&self, team_id: &str) -> StateResult<TeamCapacity>;

    /// Skills offered by one team (empty when unknown skills).
    async fn team_skills(&self, team_id: &str) -> StateResult<Vec<TeamSkill>>;

    /// All known team ids.
    async fn all_teams(&self) -> StateResult<Vec<String>>;
}

// ---------------------------------------------------------------------------
// AssignmentSink
// ---------------------------------------------------------------------------

/// Applies task reassignments to the system of record.
#[async_trait]
pub trait AssignmentSink: Send + Sync {
    /// Persist a new owning team for `task_id`.
    async fn update_task_assignment(&self, task_id: &str, new_team: &str) -> StateResult<()>;

    /// Undo a transfer by restoring `original_team` as the owner.
    async fn rollback_transfer(&self, task_id: &str, original_team: &str) -> StateResult<()>;
}

// ---------------------------------------------------------------------------
// CoordinationLock
// ---------------------------------------------------------------------------

/// Exclusive per-task critical sections.
///
/// Guarantees:
/// - At most one lock per `task_id` is outstanding at any time.
/// - `acquire` on a held task fails fast with `StateStoreError::LockHeld`.
/// - `release` with a stale id fails with `StateStoreError::UnknownLock`.
#[async_trait]
pub trait CoordinationLock: Send + Sync {
    /// Acquire the exclusive lock for `task_id`.
    async fn acquire(&self, task_id: &str) -> StateResult<LockId>;

    /// Release a previously acquired lock.
    async fn release(&self, lock_id: &LockId) -> StateResult<()>;
}

// ---------------------------------------------------------------------------
// TransferApproval
// ---------------------------------------------------------------------------

/// Asks the receiving team whether it accepts a proposed transfer.
#[async_trait]
pub trait TransferApproval: Send + Sync {
    /// `true` when the receiving team approves the transfer.
    async fn notify_team_of_transfer(&self, request: &TransferRequest) -> StateResult<bool>;
}

// ---------------------------------------------------------------------------
// StatePersistence
// ---------------------------------------------------------------------------

/// Saves and restores the frontier state envelope.
#[async_trait]
pub trait StatePersistence: Send + Sync {
    /// Persist the envelope, replacing any previous one.
    async fn save_state(&self, envelope: &StateEnvelope) -> StateResult<()>;

    /// Load the last persisted envelope, `None` when nothing was saved yet.
    async fn load_state(&self) -> StateResult<Option<StateEnvelope>>;
}

// ---------------------------------------------------------------------------
// Notifier
// ---------------------------------------------------------------------------

/// Delivers typed coordination events to external subscribers.
///
/// Delivery is per-instance ordered; failures are transient and the caller
/// may retry.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: &EventRecord) -> StateResult<()>;
}

// ---------------------------------------------------------------------------
// CiSignalSource
// ---------------------------------------------------------------------------

/// Read-only CI/PR signals consumed by the metrics layer.
#[async_trait]
pub trait CiSignalSource: Send + Sync {
    /// Conclusion of the latest check run for the task, if any ran.
    async fn latest_conclusion(&self, task_id: &str) -> StateResult<Option<CheckConclusion>>;

    /// Total check runs recorded for the task.
    async fn check_run_count(&self, task_id: &str) -> StateResult<u32>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_utilization_is_load_over_max() {
        let team = TeamCapacity {
            team_id: "alpha".to_string(),
            max_concurrent_tasks: 4,
            current_load: 3,
            velocity: 1.0,
            efficiency: 1.0,
            availability: 1.0,
            specializations: vec![],
        };
        assert!((team.utilization() - 0.75).abs() < 1e-9);
        assert_eq!(team.available_slots(), 1);
    }

    #[test]
    fn test_zero_capacity_team_has_zero_utilization() {
        let team = TeamCapacity {
            team_id: "empty".to_string(),
            max_concurrent_tasks: 0,
            current_load: 0,
            velocity: 1.0,
            efficiency: 1.0,
            availability: 1.0,
            specializations: vec![],
        };
        assert_eq!(team.utilization(), 0.0);
        assert_eq!(team.available_slots(), 0);
    }

    #[test]
    fn test_lock_ids_are_unique() {
        let a = LockId::new();
        let b = LockId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn test_check_conclusion_serializes_snake_case() {
        let json = serde_json::to_string(&CheckConclusion::TimedOut).unwrap();
        assert_eq!(json, "\"timed_out\"");
    }
}
