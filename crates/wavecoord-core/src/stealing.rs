//! Work-stealing engine: executes transfer recommendations under locking,
//! validation, approval, and rollback.
//!
//! One coordination pass runs at a time (`is_rebalancing` guard); inside a
//! pass every task transfer holds the exclusive coordination lock for that
//! task through validate → approve → apply → record. Any step failing after
//! the lock was taken invokes the rollback port for `(task, from_team)`;
//! the lock is always released.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use frontier_state::{
    AssignmentSink, CoordinationLock, StateStoreError, TransferApproval, TransferRequest,
};

use crate::balance::{LoadBalancer, StealReason, TransferRecommendation};
use crate::config::WorkStealingConfig;
use crate::domain::team::TeamCapacity;
use crate::error::{CoordError, Result};
use crate::graph::DependencyTracker;
use crate::matcher::TeamMatcher;

/// Transfers retained per task.
const HISTORY_CAP: usize = 10;
/// Transfers allowed per task within one hour.
const HOURLY_TRANSFER_LIMIT: usize = 3;
/// Coordination aborts past this failure rate, once enough attempts ran.
const ABORT_FAILURE_RATE: f64 = 0.5;
const ABORT_MIN_ATTEMPTS: usize = 3;

/// One completed (or rolled back) transfer of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferRecord {
    pub task_id: String,
    pub from_team: String,
    pub to_team: String,
    pub reason: StealReason,
    pub at: DateTime<Utc>,
}

/// Outcome of one `coordinate` pass. Failed transfers do not fail the pass
/// as a whole unless the failure-rate gate aborts it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaveCoordinationResult {
    pub wave: u32,
    pub success: bool,
    pub completed_transfers: usize,
    pub failed_transfers: usize,
    /// True when the failure-rate gate cut the pass short.
    pub aborted: bool,
    pub errors: Vec<String>,
    /// Every proposal the pass considered, in execution order.
    pub recommendations: Vec<TransferRecommendation>,
    /// Σ throughput gain over completed transfers.
    pub total_throughput_gain: f64,
}

impl WaveCoordinationResult {
    fn empty(wave: u32) -> Self {
        Self {
            wave,
            success: true,
            completed_transfers: 0,
            failed_transfers: 0,
            aborted: false,
            errors: Vec::new(),
            recommendations: Vec::new(),
            total_throughput_gain: 0.0,
        }
    }
}

/// Resets the rebalancing flag on every exit path.
struct PassGuard<'a>(&'a AtomicBool);

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Orchestrates proactive/reactive/emergency rebalancing.
pub struct WorkStealingEngine {
    config: WorkStealingConfig,
    balancer: LoadBalancer,
    sink: Arc<dyn AssignmentSink>,
    lock: Arc<dyn CoordinationLock>,
    approval: Arc<dyn TransferApproval>,
    history: Mutex<HashMap<String, VecDeque<TransferRecord>>>,
    is_rebalancing: AtomicBool,
}

impl WorkStealingEngine {
    pub fn new(
        config: WorkStealingConfig,
        sink: Arc<dyn AssignmentSink>,
        lock: Arc<dyn CoordinationLock>,
        approval: Arc<dyn TransferApproval>,
    ) -> Self {
        Self {
            balancer: LoadBalancer::new(config.clone()),
            config,
            sink,
            lock,
            approval,
            history: Mutex::new(HashMap::new()),
            is_rebalancing: AtomicBool::new(false),
        }
    }

    /// Transfer history of one task, oldest first (≤ 10 entries).
    pub fn history(&self, task_id: &str) -> Vec<TransferRecord> {
        self.history
            .lock()
            .unwrap()
            .get(task_id)
            .map(|h| h.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn transfers_within_last_hour(&self, task_id: &str, now: DateTime<Utc>) -> usize {
        self.history
            .lock()
            .unwrap()
            .get(task_id)
            .map(|h| {
                h.iter()
                    .filter(|r| now - r.at < chrono::Duration::hours(1))
                    .count()
            })
            .unwrap_or(0)
    }

    fn record_transfer(&self, record: TransferRecord) {
        let mut history = self.history.lock().unwrap();
        let entry = history.entry(record.task_id.clone()).or_default();
        if entry.len() == HISTORY_CAP {
            entry.pop_front();
        }
        entry.push_back(record);
    }

    /// Run one coordination pass over `wave`.
    ///
    /// Computes recommendations, executes them emergency-first then by
    /// descending throughput gain, and reports per-transfer failures in the
    /// result instead of raising. Re-entrant calls fail the pass.
    pub async fn coordinate(
        &self,
        wave: u32,
        tracker: &mut DependencyTracker,
        capacities: &mut std::collections::BTreeMap<String, TeamCapacity>,
        matcher: &TeamMatcher,
    ) -> WaveCoordinationResult {
        if self
            .is_rebalancing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            let mut result = WaveCoordinationResult::empty(wave);
            result.success = false;
            result.errors.push(
                CoordError::Coordination("a coordination pass is already in flight".to_string())
                    .to_string(),
            );
            return result;
        }
        let _guard = PassGuard(&self.is_rebalancing);

        let mut result = WaveCoordinationResult::empty(wave);
        if !self.config.enabled {
            return result;
        }

        // The balancer already orders emergency-first, then by gain, and
        // caps at max_transfers_per_wave.
        result.recommendations = self
            .balancer
            .recommendations(wave, tracker, capacities, matcher);

        let mut attempts = 0usize;
        for rec in result.recommendations.clone() {
            attempts += 1;
            match self.execute_transfer(&rec, tracker, capacities).await {
                Ok(()) => {
                    result.completed_transfers += 1;
                    result.total_throughput_gain += rec.throughput_gain;
                }
                Err(err) => {
                    result.failed_transfers += 1;
                    result.errors.push(err.to_string());
                }
            }
            let failure_rate = result.failed_transfers as f64 / attempts as f64;
            if attempts >= ABORT_MIN_ATTEMPTS && failure_rate > ABORT_FAILURE_RATE {
                warn!(
                    wave,
                    attempts, failure_rate, "aborting coordination pass, failure rate too high"
                );
                result.aborted = true;
                break;
            }
        }

        result.success = result.failed_transfers == 0 && !result.aborted;
        info!(
            wave,
            completed = result.completed_transfers,
            failed = result.failed_transfers,
            gain = result.total_throughput_gain,
            "coordination pass finished"
        );
        result
    }

    /// Execute one transfer under the task's coordination lock.
    pub async fn execute_transfer(
        &self,
        rec: &TransferRecommendation,
        tracker: &mut DependencyTracker,
        capacities: &mut std::collections::BTreeMap<String, TeamCapacity>,
    ) -> Result<()> {
        let task_id = rec.candidate.task_id.as_str();

        let lock_id = self.lock.acquire(task_id).await.map_err(|e| match e {
            StateStoreError::LockHeld { task_id } => CoordError::ConcurrentTransfer { task: task_id },
            other => CoordError::Storage(other),
        })?;

        let outcome = self.transfer_locked(rec, tracker, capacities).await;

        if outcome.is_err() {
            // Any post-lock failure restores the original owner.
            if let Err(rollback_err) = self
                .sink
                .rollback_transfer(task_id, &rec.candidate.from_team)
                .await
            {
                warn!(task = task_id, error = %rollback_err, "rollback port failed");
            } else {
                info!(
                    task = task_id,
                    from = %rec.candidate.from_team,
                    "transfer rolled back"
                );
            }
        }

        if let Err(release_err) = self.lock.release(&lock_id).await {
            warn!(task = task_id, error = %release_err, "lock release failed");
        }

        outcome
    }

    async fn transfer_locked(
        &self,
        rec: &TransferRecommendation,
        tracker: &mut DependencyTracker,
        capacities: &mut std::collections::BTreeMap<String, TeamCapacity>,
    ) -> Result<()> {
        let candidate = &rec.candidate;
        let task_id = candidate.task_id.as_str();
        let now = Utc::now();

        // Revalidate against current state; the recommendation may be stale.
        let node = tracker.node(task_id)?;
        if node.team != candidate.from_team {
            return Err(CoordError::TransferRejected {
                task: task_id.to_string(),
                reason: format!(
                    "task moved to '{}' since the recommendation was made",
                    node.team
                ),
            });
        }
        let target = capacities
            .get(&candidate.to_team)
            .ok_or_else(|| CoordError::UnknownTeam(candidate.to_team.clone()))?;
        if target.available_slots() == 0 {
            return Err(CoordError::CapacityOverflow {
                team: candidate.to_team.clone(),
                assigned: target.current_load as usize + 1,
                capacity: target.max_concurrent_tasks,
            });
        }
        if self.transfers_within_last_hour(task_id, now) >= HOURLY_TRANSFER_LIMIT {
            return Err(CoordError::TransferRejected {
                task: task_id.to_string(),
                reason: format!("more than {HOURLY_TRANSFER_LIMIT} transfers in the last hour"),
            });
        }

        // Approval gate; emergencies never wait for approval.
        let needs_approval = rec.reason != StealReason::Emergency
            && (candidate.dependency_risk > 0.7 || candidate.transfer_cost > 0.5);
        if needs_approval {
            let request = TransferRequest {
                task_id: task_id.to_string(),
                from_team: candidate.from_team.clone(),
                to_team: candidate.to_team.clone(),
                reason: rec.reason.to_string(),
                expected_benefit: candidate.expected_benefit,
                transfer_cost: candidate.transfer_cost,
                dependency_risk: candidate.dependency_risk,
                requested_at: now,
            };
            let timeout = Duration::from_millis(self.config.approval_timeout_ms);
            match tokio::time::timeout(timeout, self.approval.notify_team_of_transfer(&request))
                .await
            {
                Err(_) => {
                    return Err(CoordError::TransferRejected {
                        task: task_id.to_string(),
                        reason: "approval timed out".to_string(),
                    })
                }
                Ok(Err(e)) => return Err(CoordError::Storage(e)),
                Ok(Ok(false)) => {
                    return Err(CoordError::TransferRejected {
                        task: task_id.to_string(),
                        reason: format!("declined by team '{}'", candidate.to_team),
                    })
                }
                Ok(Ok(true)) => {}
            }
        }

        // Critical tasks stay with a team that owns one of their deps.
        let node = tracker.node(task_id)?;
        if node.critical && !node.depends_on.is_empty() {
            let target_owns_dep = node.depends_on.iter().any(|d| {
                tracker
                    .node(d)
                    .map(|n| n.team == candidate.to_team)
                    .unwrap_or(false)
            });
            if !target_owns_dep {
                return Err(CoordError::TransferRejected {
                    task: task_id.to_string(),
                    reason: format!(
                        "critical task: team '{}' owns none of its dependencies",
                        candidate.to_team
                    ),
                });
            }
        }

        // Apply through the system of record, then mirror locally.
        self.sink
            .update_task_assignment(task_id, &candidate.to_team)
            .await?;

        tracker.set_team(task_id, &candidate.to_team)?;
        if let Some(from) = capacities.get_mut(&candidate.from_team) {
            from.current_load = from.current_load.saturating_sub(1);
        }
        if let Some(to) = capacities.get_mut(&candidate.to_team) {
            to.current_load += 1;
        }

        self.record_transfer(TransferRecord {
            task_id: task_id.to_string(),
            from_team: candidate.from_team.clone(),
            to_team: candidate.to_team.clone(),
            reason: rec.reason,
            at: now,
        });
        info!(
            task = task_id,
            from = %candidate.from_team,
            to = %candidate.to_team,
            reason = %rec.reason,
            "task transferred"
        );
        Ok(())
    }

    /// Assign one task to `team` under the coordination lock.
    pub async fn claim(
        &self,
        task_id: &str,
        team: &str,
        tracker: &mut DependencyTracker,
        capacities: &mut std::collections::BTreeMap<String, TeamCapacity>,
    ) -> Result<()> {
        let lock_id = self.lock.acquire(task_id).await.map_err(|e| match e {
            StateStoreError::LockHeld { task_id } => CoordError::ConcurrentTransfer { task: task_id },
            other => CoordError::Storage(other),
        })?;

        let outcome = async {
            let from_team = tracker.node(task_id)?.team.clone();
            let target = capacities
                .get(team)
                .ok_or_else(|| CoordError::UnknownTeam(team.to_string()))?;
            if target.available_slots() == 0 {
                return Err(CoordError::CapacityOverflow {
                    team: team.to_string(),
                    assigned: target.current_load as usize + 1,
                    capacity: target.max_concurrent_tasks,
                });
            }
            self.sink.update_task_assignment(task_id, team).await?;
            tracker.set_team(task_id, team)?;
            if from_team != team {
                if let Some(from) = capacities.get_mut(&from_team) {
                    from.current_load = from.current_load.saturating_sub(1);
                }
            }
            if let Some(to) = capacities.get_mut(team) {
                to.current_load += 1;
            }
            debug!(task = task_id, team, "task claimed");
            Ok(())
        }
        .await;

        if let Err(release_err) = self.lock.release(&lock_id).await {
            warn!(task = task_id, error = %release_err, "lock release failed");
        }
        outcome
    }

    /// Release a claimed task, freeing one slot on `team`.
    pub async fn release(
        &self,
        task_id: &str,
        team: &str,
        tracker: &DependencyTracker,
        capacities: &mut std::collections::BTreeMap<String, TeamCapacity>,
    ) -> Result<()> {
        let lock_id = self.lock.acquire(task_id).await.map_err(|e| match e {
            StateStoreError::LockHeld { task_id } => CoordError::ConcurrentTransfer { task: task_id },
            other => CoordError::Storage(other),
        })?;

        let outcome = (|| {
            let node = tracker.node(task_id)?;
            if node.team != team {
                return Err(CoordError::TransferRejected {
                    task: task_id.to_string(),
                    reason: format!("task is owned by '{}', not '{team}'", node.team),
                });
            }
            let cap = capacities
                .get_mut(team)
                .ok_or_else(|| CoordError::UnknownTeam(team.to_string()))?;
            cap.current_load = cap.current_load.saturating_sub(1);
            debug!(task = task_id, team, "task released");
            Ok(())
        })();

        if let Err(release_err) = self.lock.release(&lock_id).await {
            warn!(task = task_id, error = %release_err, "lock release failed");
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::WorkStealingCandidate;
    use chrono::Utc;
    use frontier_state::fakes::{AutoApproval, MemoryAssignmentSink, MemoryCoordinationLock};
    use frontier_state::TaskRecord;
    use std::collections::BTreeMap;

    fn task(id: &str, team: &str, deps: &[&str], critical: bool) -> TaskRecord {
        TaskRecord {
            id: id.to_string(),
            title: id.to_string(),
            wave: 1,
            team: team.to_string(),
            depends_on: deps.iter().map(|d| d.to_string()).collect(),
            acceptance: vec![],
            critical,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn team(id: &str, max: u32, load: u32) -> TeamCapacity {
        TeamCapacity {
            team_id: id.to_string(),
            max_concurrent_tasks: max,
            current_load: load,
            velocity: 1.0,
            efficiency: 1.0,
            availability: 1.0,
            specializations: vec![],
        }
    }

    struct Rig {
        engine: WorkStealingEngine,
        sink: Arc<MemoryAssignmentSink>,
        tracker: DependencyTracker,
        capacities: BTreeMap<String, TeamCapacity>,
    }

    fn rig(tasks: &[TaskRecord], teams: Vec<TeamCapacity>, approve: bool) -> Rig {
        let sink = Arc::new(MemoryAssignmentSink::new());
        let engine = WorkStealingEngine::new(
            WorkStealingConfig::default(),
            Arc::clone(&sink) as Arc<dyn AssignmentSink>,
            Arc::new(MemoryCoordinationLock::new()),
            Arc::new(AutoApproval::new(approve)),
        );
        Rig {
            engine,
            sink,
            tracker: DependencyTracker::build(tasks).unwrap(),
            capacities: teams.into_iter().map(|t| (t.team_id.clone(), t)).collect(),
        }
    }

    fn recommendation(task: &str, from: &str, to: &str, reason: StealReason) -> TransferRecommendation {
        TransferRecommendation {
            candidate: WorkStealingCandidate {
                task_id: task.to_string(),
                from_team: from.to_string(),
                to_team: to.to_string(),
                skill_match: 1.0,
                transfer_cost: 0.1,
                expected_benefit: 1.5,
                dependency_risk: 0.1,
                composite_rank: 15.0,
            },
            reason,
            throughput_gain: 1.4,
        }
    }

    #[tokio::test]
    async fn test_benefit_gated_transfer_applies_and_updates_loads() {
        // From-team at 0.9, target at 0.3 : the scenario where benefit
        // clearly beats cost for a dependency-free non-critical task.
        let mut rig = rig(
            &[task("T001", "hot", &[], false)],
            vec![team("hot", 10, 9), team("cold", 10, 3)],
            true,
        );
        let result = rig
            .engine
            .coordinate(1, &mut rig.tracker, &mut rig.capacities, &TeamMatcher::new())
            .await;

        assert!(result.success, "errors: {:?}", result.errors);
        assert_eq!(result.completed_transfers, 1);
        assert_eq!(rig.tracker.node("T001").unwrap().team, "cold");
        assert_eq!(rig.capacities["hot"].current_load, 8);
        assert_eq!(rig.capacities["cold"].current_load, 4);
        assert_eq!(rig.engine.history("T001").len(), 1);
        assert_eq!(rig.sink.assigned_team("T001").as_deref(), Some("cold"));
    }

    #[tokio::test]
    async fn test_failed_apply_triggers_rollback_port() {
        let mut rig = rig(
            &[task("T001", "hot", &[], false)],
            vec![team("hot", 10, 9), team("cold", 10, 3)],
            true,
        );
        rig.sink.arm_update_failure();

        let result = rig
            .engine
            .coordinate(1, &mut rig.tracker, &mut rig.capacities, &TeamMatcher::new())
            .await;

        assert!(!result.success);
        assert!(result.failed_transfers >= 1);
        assert!(!result.errors.is_empty());
        // Rollback port was invoked with the original team.
        assert_eq!(
            rig.sink.rollbacks(),
            vec![("T001".to_string(), "hot".to_string())]
        );
        // Local state untouched.
        assert_eq!(rig.tracker.node("T001").unwrap().team, "hot");
        assert_eq!(rig.capacities["hot"].current_load, 9);
        assert!(rig.engine.history("T001").is_empty());
    }

    #[tokio::test]
    async fn test_held_lock_fails_with_concurrent_transfer() {
        let lock = Arc::new(MemoryCoordinationLock::new());
        let sink = Arc::new(MemoryAssignmentSink::new());
        let engine = WorkStealingEngine::new(
            WorkStealingConfig::default(),
            Arc::clone(&sink) as Arc<dyn AssignmentSink>,
            Arc::clone(&lock) as Arc<dyn CoordinationLock>,
            Arc::new(AutoApproval::new(true)),
        );
        let mut tracker = DependencyTracker::build(&[task("T001", "hot", &[], false)]).unwrap();
        let mut capacities: BTreeMap<String, TeamCapacity> =
            [team("hot", 4, 2), team("cold", 4, 0)]
                .into_iter()
                .map(|t| (t.team_id.clone(), t))
                .collect();

        let _held = lock.acquire("T001").await.unwrap();
        let err = engine
            .execute_transfer(
                &recommendation("T001", "hot", "cold", StealReason::Reactive),
                &mut tracker,
                &mut capacities,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CoordError::ConcurrentTransfer { .. }));
        // No rollback for a transfer that never got the lock.
        assert!(sink.rollbacks().is_empty());
    }

    #[tokio::test]
    async fn test_stale_ownership_is_revalidated() {
        let mut rig = rig(
            &[task("T001", "elsewhere", &[], false)],
            vec![team("hot", 4, 2), team("cold", 4, 0), team("elsewhere", 4, 1)],
            true,
        );
        let err = rig
            .engine
            .execute_transfer(
                &recommendation("T001", "hot", "cold", StealReason::Reactive),
                &mut rig.tracker,
                &mut rig.capacities,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CoordError::TransferRejected { .. }));
    }

    #[tokio::test]
    async fn test_full_target_is_a_capacity_overflow() {
        let mut rig = rig(
            &[task("T001", "hot", &[], false)],
            vec![team("hot", 4, 2), team("cold", 2, 2)],
            true,
        );
        let err = rig
            .engine
            .execute_transfer(
                &recommendation("T001", "hot", "cold", StealReason::Reactive),
                &mut rig.tracker,
                &mut rig.capacities,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CoordError::CapacityOverflow { .. }));
    }

    #[tokio::test]
    async fn test_risky_transfer_asks_for_approval_and_honors_decline() {
        let mut rig = rig(
            &[task("T001", "hot", &[], false)],
            vec![team("hot", 4, 2), team("cold", 4, 0)],
            false,
        );
        let mut rec = recommendation("T001", "hot", "cold", StealReason::Reactive);
        rec.candidate.dependency_risk = 0.8;
        let err = rig
            .engine
            .execute_transfer(&rec, &mut rig.tracker, &mut rig.capacities)
            .await
            .unwrap_err();
        assert!(matches!(err, CoordError::TransferRejected { .. }));
        assert_eq!(rig.sink.rollbacks().len(), 1);
    }

    #[tokio::test]
    async fn test_emergency_skips_approval() {
        let mut rig = rig(
            &[task("T001", "hot", &[], false)],
            vec![team("hot", 4, 2), team("cold", 4, 0)],
            false, // approver would decline; emergency never asks
        );
        let mut rec = recommendation("T001", "hot", "cold", StealReason::Emergency);
        rec.candidate.dependency_risk = 0.9;
        rig.engine
            .execute_transfer(&rec, &mut rig.tracker, &mut rig.capacities)
            .await
            .unwrap();
        assert_eq!(rig.tracker.node("T001").unwrap().team, "cold");
    }

    #[tokio::test]
    async fn test_approval_timeout_rejects_the_transfer() {
        let sink = Arc::new(MemoryAssignmentSink::new());
        let config = WorkStealingConfig {
            approval_timeout_ms: 20,
            ..WorkStealingConfig::default()
        };
        let engine = WorkStealingEngine::new(
            config,
            Arc::clone(&sink) as Arc<dyn AssignmentSink>,
            Arc::new(MemoryCoordinationLock::new()),
            Arc::new(AutoApproval::with_delay(true, Duration::from_secs(5))),
        );
        let mut tracker = DependencyTracker::build(&[task("T001", "hot", &[], false)]).unwrap();
        let mut capacities: BTreeMap<String, TeamCapacity> =
            [team("hot", 4, 2), team("cold", 4, 0)]
                .into_iter()
                .map(|t| (t.team_id.clone(), t))
                .collect();

        let mut rec = recommendation("T001", "hot", "cold", StealReason::Reactive);
        rec.candidate.transfer_cost = 0.6;
        let err = engine
            .execute_transfer(&rec, &mut tracker, &mut capacities)
            .await
            .unwrap_err();
        match err {
            CoordError::TransferRejected { reason, .. } => {
                assert!(reason.contains("timed out"));
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_critical_task_stays_with_dependency_owning_team() {
        let mut rig = rig(
            &[
                task("D1", "beta", &[], false),
                task("T001", "hot", &["D1"], true),
            ],
            vec![team("hot", 4, 3), team("beta", 4, 1), team("cold", 4, 0)],
            true,
        );
        // cold owns no dependency of T001, so the move is rejected.
        let err = rig
            .engine
            .execute_transfer(
                &recommendation("T001", "hot", "cold", StealReason::Reactive),
                &mut rig.tracker,
                &mut rig.capacities,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CoordError::TransferRejected { .. }));

        // beta owns D1, so the move is allowed.
        rig.engine
            .execute_transfer(
                &recommendation("T001", "hot", "beta", StealReason::Reactive),
                &mut rig.tracker,
                &mut rig.capacities,
            )
            .await
            .unwrap();
        assert_eq!(rig.tracker.node("T001").unwrap().team, "beta");
    }

    #[tokio::test]
    async fn test_churn_limit_blocks_fourth_transfer_within_the_hour() {
        let mut rig = rig(
            &[task("T001", "a", &[], false)],
            vec![team("a", 9, 3), team("b", 9, 0), team("c", 9, 0)],
            true,
        );
        let hops = [("a", "b"), ("b", "c"), ("c", "a")];
        for (from, to) in hops {
            rig.engine
                .execute_transfer(
                    &recommendation("T001", from, to, StealReason::Reactive),
                    &mut rig.tracker,
                    &mut rig.capacities,
                )
                .await
                .unwrap();
        }
        let err = rig
            .engine
            .execute_transfer(
                &recommendation("T001", "a", "b", StealReason::Reactive),
                &mut rig.tracker,
                &mut rig.capacities,
            )
            .await
            .unwrap_err();
        match err {
            CoordError::TransferRejected { reason, .. } => {
                assert!(reason.contains("last hour"));
            }
            other => panic!("expected churn rejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_history_is_capped_at_ten_entries() {
        let rig = rig(
            &[task("T001", "a", &[], false)],
            vec![team("a", 4, 0)],
            true,
        );
        for i in 0..15 {
            rig.engine.record_transfer(TransferRecord {
                task_id: "T001".to_string(),
                from_team: format!("f{i}"),
                to_team: format!("t{i}"),
                reason: StealReason::Reactive,
                at: Utc::now(),
            });
        }
        let history = rig.engine.history("T001");
        assert_eq!(history.len(), 10);
        assert_eq!(history[0].from_team, "f5");
    }

    #[tokio::test]
    async fn test_claim_and_release_manage_one_slot() {
        let mut rig = rig(
            &[task("T001", "a", &[], false)],
            vec![team("a", 4, 1), team("b", 4, 0)],
            true,
        );
        rig.engine
            .claim("T001", "b", &mut rig.tracker, &mut rig.capacities)
            .await
            .unwrap();
        assert_eq!(rig.tracker.node("T001").unwrap().team, "b");
        assert_eq!(rig.capacities["a"].current_load, 0);
        assert_eq!(rig.capacities["b"].current_load, 1);

        rig.engine
            .release("T001", "b", &rig.tracker, &mut rig.capacities)
            .await
            .unwrap();
        assert_eq!(rig.capacities["b"].current_load, 0);

        // Releasing on behalf of the wrong team is rejected.
        let err = rig
            .engine
            .release("T001", "a", &rig.tracker, &mut rig.capacities)
            .await
            .unwrap_err();
        assert!(matches!(err, CoordError::TransferRejected { .. }));
    }
}
