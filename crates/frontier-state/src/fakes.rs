//! In-memory fakes for the coordination ports (testing only)
//!
//! Provides one fake per port trait so the coordination core can be
//! exercised without any external system. Fakes record the calls they
//! receive and can be armed to fail, which is how the rollback paths are
//! tested.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{StateResult, StateStoreError};
use crate::ports::*;
use crate::snapshot::StateEnvelope;

// ---------------------------------------------------------------------------
// StaticTaskSource
// ---------------------------------------------------------------------------

/// Task source backed by a fixed task list.
#[derive(Debug, Default)]
pub struct StaticTaskSource {
    tasks: Vec<TaskRecord>,
}

impl StaticTaskSource {
    pub fn new(tasks: Vec<TaskRecord>) -> Self {
        Self { tasks }
    }
}

#[async_trait]
impl TaskSource for StaticTaskSource {
    async fn fetch_tasks(&self) -> StateResult<Vec<TaskRecord>> {
        Ok(self.tasks.clone())
    }
}

// ---------------------------------------------------------------------------
// StaticCapacitySource
// ---------------------------------------------------------------------------

/// Capacity source backed by in-memory maps, mutable from tests.
#[derive(Debug, Default)]
pub struct StaticCapacitySource {
    capacities: Mutex<HashMap<String, TeamCapacity>>,
    skills: Mutex<HashMap<String, Vec<TeamSkill>>>,
}

impl StaticCapacitySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace a team's capacity profile.
    pub fn set_capacity(&self, capacity: TeamCapacity) {
        let mut caps = self.capacities.lock().unwrap();
        caps.insert(capacity.team_id.clone(), capacity);
    }

    /// Register or replace a team's skill list.
    pub fn set_skills(&self, team_id: &str, skills: Vec<TeamSkill>) {
        let mut map = self.skills.lock().unwrap();
        map.insert(team_id.to_string(), skills);
    }
}

#[async_trait]
impl CapacitySource for StaticCapacitySource {
    async fn team_capacity(&self, team_id: &str) -> StateResult<TeamCapacity> {
        let caps = self.capacities.lock().unwrap();
        caps.get(team_id)
            .cloned()
            .ok_or_else(|| StateStoreError::TeamNotFound {
                team_id: team_id.to_string(),
            })
    }

    async fn team_skills(&self, team_id: &str) -> StateResult<Vec<TeamSkill>> {
        let map = self.skills.lock().unwrap();
        Ok(map.get(team_id).cloned().unwrap_or_default())
    }

    async fn all_teams(&self) -> StateResult<Vec<String>> {
        let caps = self.capacities.lock().unwrap();
        let mut teams: Vec<String> = caps.keys().cloned().collect();
        teams.sort();
        Ok(teams)
    }
}

// ---------------------------------------------------------------------------
// MemoryAssignmentSink
// ---------------------------------------------------------------------------

/// Assignment sink that records every call and can be armed to fail.
#[derive(Debug, Default)]
pub struct MemoryAssignmentSink {
    assignments: Mutex<HashMap<String, String>>,
    updates: Mutex<Vec<(String, String)>>,
    rollbacks: Mutex<Vec<(String, String)>>,
    fail_updates: AtomicBool,
}

impl MemoryAssignmentSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `update_task_assignment` fail.
    pub fn arm_update_failure(&self) {
        self.fail_updates.store(true, Ordering::SeqCst);
    }

    /// Current owner recorded for a task, if any update was applied.
    pub fn assigned_team(&self, task_id: &str) -> Option<String> {
        self.assignments.lock().unwrap().get(task_id).cloned()
    }

    /// All `(task_id, new_team)` updates in call order.
    pub fn updates(&self) -> Vec<(String, String)> {
        self.updates.lock().unwrap().clone()
    }

    /// All `(task_id, original_team)` rollbacks in call order.
    pub fn rollbacks(&self) -> Vec<(String, String)> {
        self.rollbacks.lock().unwrap().clone()
    }
}

#[async_trait]
impl AssignmentSink for MemoryAssignmentSink {
    async fn update_task_assignment(&self, task_id: &str, new_team: &str) -> StateResult<()> {
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(StateStoreError::Backend(
                "assignment backend unavailable".to_string(),
            ));
        }
        self.updates
            .lock()
            .unwrap()
            .push((task_id.to_string(), new_team.to_string()));
        self.assignments
            .lock()
            .unwrap()
            .insert(task_id.to_string(), new_team.to_string());
        Ok(())
    }

    async fn rollback_transfer(&self, task_id: &str, original_team: &str) -> StateResult<()> {
        self.rollbacks
            .lock()
            .unwrap()
            .push((task_id.to_string(), original_team.to_string()));
        self.assignments
            .lock()
            .unwrap()
            .insert(task_id.to_string(), original_team.to_string());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemoryCoordinationLock
// ---------------------------------------------------------------------------

/// In-process lock table keyed by task id.
#[derive(Debug, Default)]
pub struct MemoryCoordinationLock {
    /// task_id → lock_id for held locks
    held: Mutex<HashMap<String, LockId>>,
    /// lock_id → task_id reverse index
    owners: Mutex<HashMap<String, String>>,
}

impl MemoryCoordinationLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a lock is currently held for the task.
    pub fn is_held(&self, task_id: &str) -> bool {
        self.held.lock().unwrap().contains_key(task_id)
    }
}

#[async_trait]
impl CoordinationLock for MemoryCoordinationLock {
    async fn acquire(&self, task_id: &str) -> StateResult<LockId> {
        let mut held = self.held.lock().unwrap();
        if held.contains_key(task_id) {
            return Err(StateStoreError::LockHeld {
                task_id: task_id.to_string(),
            });
        }
        let lock_id = LockId::new();
        held.insert(task_id.to_string(), lock_id.clone());
        self.owners
            .lock()
            .unwrap()
            .insert(lock_id.0.clone(), task_id.to_string());
        Ok(lock_id)
    }

    async fn release(&self, lock_id: &LockId) -> StateResult<()> {
        let task_id = self.owners.lock().unwrap().remove(&lock_id.0).ok_or_else(|| {
            StateStoreError::UnknownLock {
                lock_id: lock_id.0.clone(),
            }
        })?;
        self.held.lock().unwrap().remove(&task_id);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// AutoApproval
// ---------------------------------------------------------------------------

/// Approval port that always answers `approve`, optionally after a delay
/// (to exercise the caller's approval timeout).
#[derive(Debug)]
pub struct AutoApproval {
    approve: bool,
    delay: Option<Duration>,
    requests: Mutex<Vec<TransferRequest>>,
}

impl AutoApproval {
    pub fn new(approve: bool) -> Self {
        Self {
            approve,
            delay: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Answer after `delay`, letting tests trip the approval timeout.
    pub fn with_delay(approve: bool, delay: Duration) -> Self {
        Self {
            approve,
            delay: Some(delay),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Requests received so far.
    pub fn requests(&self) -> Vec<TransferRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl TransferApproval for AutoApproval {
    async fn notify_team_of_transfer(&self, request: &TransferRequest) -> StateResult<bool> {
        self.requests.lock().unwrap().push(request.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.approve)
    }
}

// ---------------------------------------------------------------------------
// MemoryStateStore
// ---------------------------------------------------------------------------

/// State persistence backed by a single in-memory slot.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    state: Mutex<Option<StateEnvelope>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-load an envelope, as if a previous run had saved it.
    pub fn preload(&self, envelope: StateEnvelope) {
        *self.state.lock().unwrap() = Some(envelope);
    }

    /// Number of times the slot currently holds a state.
    pub fn has_state(&self) -> bool {
        self.state.lock().unwrap().is_some()
    }
}

#[async_trait]
impl StatePersistence for MemoryStateStore {
    async fn save_state(&self, envelope: &StateEnvelope) -> StateResult<()> {
        *self.state.lock().unwrap() = Some(envelope.clone());
        Ok(())
    }

    async fn load_state(&self) -> StateResult<Option<StateEnvelope>> {
        Ok(self.state.lock().unwrap().clone())
    }
}

// ---------------------------------------------------------------------------
// RecordingNotifier
// ---------------------------------------------------------------------------

/// Notifier that appends every event to an in-memory log.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<EventRecord>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// All delivered events in order.
    pub fn events(&self) -> Vec<EventRecord> {
        self.events.lock().unwrap().clone()
    }

    /// Kinds of all delivered events in order.
    pub fn kinds(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.kind.clone())
            .collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, event: &EventRecord) -> StateResult<()> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// StaticCiSignals
// ---------------------------------------------------------------------------

/// CI signal source backed by fixed per-task conclusions and counts.
#[derive(Debug, Default)]
pub struct StaticCiSignals {
    conclusions: Mutex<HashMap<String, CheckConclusion>>,
    counts: Mutex<HashMap<String, u32>>,
}

impl StaticCiSignals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_signal(&self, task_id: &str, conclusion: CheckConclusion, runs: u32) {
        self.conclusions
            .lock()
            .unwrap()
            .insert(task_id.to_string(), conclusion);
        self.counts.lock().unwrap().insert(task_id.to_string(), runs);
    }
}

#[async_trait]
impl CiSignalSource for StaticCiSignals {
    async fn latest_conclusion(&self, task_id: &str) -> StateResult<Option<CheckConclusion>> {
        Ok(self.conclusions.lock().unwrap().get(task_id).copied())
    }

    async fn check_run_count(&self, task_id: &str) -> StateResult<u32> {
        Ok(self.counts.lock().unwrap().get(task_id).copied().unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn request(task: &str) -> TransferRequest {
        TransferRequest {
            task_id: task.to_string(),
            from_team: "alpha".to_string(),
            to_team: "beta".to_string(),
            reason: "reactive".to_string(),
            expected_benefit: 1.0,
            transfer_cost: 0.2,
            dependency_risk: 0.1,
            requested_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_lock_contention_fails_fast() {
        let lock = MemoryCoordinationLock::new();
        let held = lock.acquire("T001").await.unwrap();
        assert!(matches!(
            lock.acquire("T001").await,
            Err(StateStoreError::LockHeld { .. })
        ));
        lock.release(&held).await.unwrap();
        // Released, so a re-acquire succeeds.
        lock.acquire("T001").await.unwrap();
    }

    #[tokio::test]
    async fn test_release_with_stale_id_fails() {
        let lock = MemoryCoordinationLock::new();
        let stale = LockId::new();
        assert!(matches!(
            lock.release(&stale).await,
            Err(StateStoreError::UnknownLock { .. })
        ));
    }

    #[tokio::test]
    async fn test_armed_sink_fails_updates_but_still_rolls_back() {
        let sink = MemoryAssignmentSink::new();
        sink.update_task_assignment("T001", "beta").await.unwrap();
        sink.arm_update_failure();
        assert!(sink.update_task_assignment("T002", "beta").await.is_err());
        sink.rollback_transfer("T001", "alpha").await.unwrap();
        assert_eq!(sink.assigned_team("T001").as_deref(), Some("alpha"));
        assert_eq!(sink.rollbacks().len(), 1);
    }

    #[tokio::test]
    async fn test_auto_approval_records_requests() {
        let approval = AutoApproval::new(true);
        let ok = approval
            .notify_team_of_transfer(&request("T009"))
            .await
            .unwrap();
        assert!(ok);
        assert_eq!(approval.requests().len(), 1);
        assert_eq!(approval.requests()[0].task_id, "T009");
    }

    #[tokio::test]
    async fn test_memory_store_roundtrip() {
        let store = MemoryStateStore::new();
        assert!(store.load_state().await.unwrap().is_none());
        let env = StateEnvelope::seal("plan-1", 3, Utc::now(), serde_json::json!({"x": 1})).unwrap();
        store.save_state(&env).await.unwrap();
        let loaded = store.load_state().await.unwrap().unwrap();
        assert_eq!(loaded, env);
    }

    #[tokio::test]
    async fn test_capacity_source_unknown_team_errors() {
        let source = StaticCapacitySource::new();
        assert!(matches!(
            source.team_capacity("ghost").await,
            Err(StateStoreError::TeamNotFound { .. })
        ));
    }
}
