//! The rolling frontier manager: single owner of the frontier state.
//!
//! All mutations funnel through this type and are serialized behind one
//! lock; readers get deep copies. External effects go through the injected
//! ports. A bounded snapshot stack drives rollback: any caught error during
//! a mutation restores the exact pre-mutation state, emits
//! `rollback_executed`, and re-raises.
//!
//! The periodic tick runs on a background task while `adaptive_boundaries`
//! is on; `shutdown` stops the timer, waits for any in-flight pass, saves
//! state, and notifies.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use frontier_state::{
    AssignmentSink, CheckConclusion, CiSignalSource, CoordinationLock, EventRecord, Notifier,
    StatePersistence, TaskRecord, TeamCapacity, TeamSkill, TransferApproval,
};

use crate::balance::LoadBalancer;
use crate::config::CoordinatorConfig;
use crate::domain::boundary::{FrontierState, WaveBoundary};
use crate::domain::task::TaskState;
use crate::domain::team::TaskRequirement;
use crate::error::{CoordError, Result};
use crate::events::{CoordinationEvent, EventHistory};
use crate::frontier::calculator::FrontierCalculator;
use crate::frontier::optimizer::{self, Optimization, OptimizationAction};
use crate::graph::DependencyTracker;
use crate::matcher::TeamMatcher;
use crate::metrics::{self, FrontierMetrics};
use crate::stealing::{WaveCoordinationResult, WorkStealingEngine};

/// Maximum depth of the rollback snapshot stack.
const ROLLBACK_STACK_CAP: usize = 5;

/// Lifecycle phase of the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerPhase {
    Uninitialized,
    Ready,
    /// Re-entrant guard phase during an optimization pass.
    Optimizing,
    ShuttingDown,
    Stopped,
}

/// The ports a manager is wired to.
#[derive(Clone)]
pub struct ManagerPorts {
    pub persistence: Arc<dyn StatePersistence>,
    pub notifier: Arc<dyn Notifier>,
    pub assignment: Arc<dyn AssignmentSink>,
    pub lock: Arc<dyn CoordinationLock>,
    pub approval: Arc<dyn TransferApproval>,
    /// Optional read-only CI signals for the metrics layer.
    pub ci: Option<Arc<dyn CiSignalSource>>,
}

/// Mutable manager state, owned behind one lock.
struct Inner {
    phase: ManagerPhase,
    state: FrontierState,
    tracker: DependencyTracker,
    matcher: TeamMatcher,
    current_wave: u32,
    rollback_stack: Vec<FrontierState>,
    applied: BTreeSet<(OptimizationAction, String)>,
    events: EventHistory,
}

impl Inner {
    fn empty() -> Self {
        Self {
            phase: ManagerPhase::Uninitialized,
            state: FrontierState::new("", Utc::now()),
            tracker: DependencyTracker::default(),
            matcher: TeamMatcher::new(),
            current_wave: 1,
            rollback_stack: Vec::new(),
            applied: BTreeSet::new(),
            events: EventHistory::new(),
        }
    }
}

/// Everything the periodic tick needs without holding the manager itself.
#[derive(Clone)]
struct TickContext {
    inner: Arc<Mutex<Inner>>,
    is_optimizing: Arc<AtomicBool>,
    persistence: Arc<dyn StatePersistence>,
    notifier: Arc<dyn Notifier>,
    assignment: Arc<dyn AssignmentSink>,
    ci: Option<Arc<dyn CiSignalSource>>,
    calculator: FrontierCalculator,
    balancer: LoadBalancer,
    config: CoordinatorConfig,
}

/// Resets the optimizing flag on every exit path.
struct OptimizeGuard<'a>(&'a AtomicBool);

impl Drop for OptimizeGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// State machine over the rolling frontier.
pub struct RollingFrontierManager {
    config: CoordinatorConfig,
    calculator: FrontierCalculator,
    balancer: LoadBalancer,
    engine: WorkStealingEngine,
    persistence: Arc<dyn StatePersistence>,
    notifier: Arc<dyn Notifier>,
    assignment: Arc<dyn AssignmentSink>,
    ci: Option<Arc<dyn CiSignalSource>>,
    inner: Arc<Mutex<Inner>>,
    is_optimizing: Arc<AtomicBool>,
    shutdown_tx: watch::Sender<bool>,
    tick_task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for RollingFrontierManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RollingFrontierManager")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RollingFrontierManager {
    /// Construct a manager. Configuration is validated eagerly; a bad field
    /// raises `ConfigurationError` here, before anything runs.
    pub fn new(config: CoordinatorConfig, ports: ManagerPorts) -> Result<Self> {
        config.validate()?;
        let calculator = FrontierCalculator::new(
            config.boundary.clone(),
            config.weights.clone(),
            config.max_wave_lookahead,
        );
        let engine = WorkStealingEngine::new(
            config.work_stealing.clone(),
            Arc::clone(&ports.assignment),
            Arc::clone(&ports.lock),
            Arc::clone(&ports.approval),
        );
        let (shutdown_tx, _) = watch::channel(false);
        Ok(Self {
            balancer: LoadBalancer::new(config.work_stealing.clone()),
            calculator,
            engine,
            persistence: ports.persistence,
            notifier: ports.notifier,
            assignment: ports.assignment,
            ci: ports.ci,
            config,
            inner: Arc::new(Mutex::new(Inner::empty())),
            is_optimizing: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
            tick_task: std::sync::Mutex::new(None),
        })
    }

    /// Current lifecycle phase.
    pub async fn phase(&self) -> ManagerPhase {
        self.inner.lock().await.phase
    }

    /// Register a team's skills with the matcher.
    pub async fn set_team_skills(&self, team_id: &str, skills: Vec<TeamSkill>) {
        self.inner.lock().await.matcher.set_team_skills(team_id, skills);
    }

    /// Register a task's skill requirements with the matcher.
    pub async fn set_task_requirements(&self, task_id: &str, requirements: Vec<TaskRequirement>) {
        self.inner
            .lock()
            .await
            .matcher
            .set_task_requirements(task_id, requirements);
    }

    /// Initialize the frontier: build the DAG, restore compatible persisted
    /// state, compute the first boundaries, and start the periodic timer
    /// when `adaptive_boundaries` is enabled.
    ///
    /// Dependency violations and cycles are fatal and raise; nothing is
    /// retained on failure.
    pub async fn initialize(
        &self,
        plan_id: &str,
        tasks: Vec<TaskRecord>,
        capacities: Vec<TeamCapacity>,
    ) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.phase != ManagerPhase::Uninitialized {
            return Err(CoordError::Coordination(
                "coordinator is already initialized".to_string(),
            ));
        }

        let tracker = DependencyTracker::build(&tasks)?;
        let capacity_map: BTreeMap<String, TeamCapacity> = capacities
            .into_iter()
            .map(|c| (c.team_id.clone(), c))
            .collect();
        for node in tracker.nodes() {
            if !capacity_map.contains_key(&node.team) {
                return Err(CoordError::UnknownTeam(node.team.clone()));
            }
        }

        let now = Utc::now();
        let mut state = FrontierState::new(plan_id, now);
        state.capacities = capacity_map;
        inner.tracker = tracker;

        // Restore a compatible persisted frontier, if one exists.
        match self.persistence.load_state().await {
            Ok(Some(envelope)) if envelope.plan_id == plan_id => {
                let restored = envelope
                    .verify_digest()
                    .map_err(CoordError::from)
                    .and_then(|()| FrontierState::from_envelope(&envelope));
                match restored {
                    Ok(previous) => {
                        info!(
                            version = previous.coordination_version,
                            "restoring persisted frontier state"
                        );
                        state.coordination_version = previous.coordination_version;
                        state.pending_optimizations = previous.pending_optimizations;
                        inner.tracker.restore_states(&previous.graph);
                        if let Some(first) = previous.boundaries.first() {
                            inner.current_wave = first.wave;
                        }
                    }
                    Err(err) => {
                        warn!(error = %err, "ignoring incompatible persisted state");
                    }
                }
            }
            Ok(Some(envelope)) => {
                warn!(
                    found = %envelope.plan_id,
                    expected = plan_id,
                    "ignoring persisted state for a different plan"
                );
            }
            Ok(None) => {}
            Err(err) => warn!(error = %err, "could not load persisted state"),
        }

        inner.state = state;
        let current_wave = inner.current_wave;
        let boundaries = self.calculator.compute_boundaries(
            &inner.tracker,
            &inner.state.capacities,
            current_wave,
            now,
        )?;
        inner.state.boundaries = boundaries;
        let ci_rate = inner.state.metrics.ci_pass_rate;
        refresh_metrics(&mut inner, ci_rate);
        inner.state.coordination_version += 1;
        inner.state.graph = inner.tracker.snapshot();
        inner.state.last_update = now;
        persist(&inner.state, &self.persistence).await?;

        let event = CoordinationEvent::FrontierInitialized {
            plan_id: plan_id.to_string(),
            coordination_version: inner.state.coordination_version,
            boundary_count: inner.state.boundaries.len(),
        };
        emit_event(&mut inner, &self.notifier, event).await;
        inner.phase = ManagerPhase::Ready;
        info!(
            plan = plan_id,
            tasks = inner.tracker.len(),
            boundaries = inner.state.boundaries.len(),
            "frontier initialized"
        );
        drop(inner);

        if self.config.adaptive_boundaries {
            self.spawn_timer();
        }
        Ok(())
    }

    /// Ingest one task state transition.
    ///
    /// Returns the ids that became ready through a completion (promoted to
    /// `Ready` automatically when `real_time_promotions` is on). A call
    /// carrying the task's current state is an idempotent no-op: empty
    /// return, no version bump.
    pub async fn process_task_state_change(
        &self,
        task_id: &str,
        new_state: TaskState,
    ) -> Result<Vec<String>> {
        let mut inner = self.inner.lock().await;
        ensure_ready(&inner)?;
        let current = inner.tracker.node(task_id)?.state;
        if current == new_state {
            debug!(task = task_id, state = %new_state, "state unchanged, no-op");
            return Ok(Vec::new());
        }

        push_snapshot(&mut inner, &self.config);
        match self.mutate_task_state(&mut inner, task_id, new_state).await {
            Ok(newly_ready) => Ok(newly_ready),
            Err(err) => Err(rollback_once(&mut inner, &self.config, &self.notifier, err).await),
        }
    }

    async fn mutate_task_state(
        &self,
        inner: &mut Inner,
        task_id: &str,
        new_state: TaskState,
    ) -> Result<Vec<String>> {
        let now = Utc::now();
        let newly_ready = inner.tracker.apply_transition(task_id, new_state)?;

        // Completed work leaves the owning team's plate.
        if new_state == TaskState::Completed {
            let team = inner.tracker.node(task_id)?.team.clone();
            if let Some(capacity) = inner.state.capacities.get_mut(&team) {
                capacity.current_load = capacity.current_load.saturating_sub(1);
            }
        }

        // The wave barrier clears when every task of the leading boundary
        // has completed.
        if let Some(first) = inner.state.boundaries.first() {
            let barrier_clear = first.tasks.iter().all(|t| {
                inner
                    .tracker
                    .node(t)
                    .map(|n| n.state.is_terminal())
                    .unwrap_or(true)
            });
            if barrier_clear {
                inner.current_wave = first.wave + 1;
                info!(wave = first.wave, "wave barrier cleared");
            }
        }

        let mut promoted: Vec<(String, u32)> = Vec::new();
        if self.config.real_time_promotions {
            for id in &newly_ready {
                inner.tracker.apply_transition(id, TaskState::Ready)?;
                let wave = inner.tracker.node(id)?.wave;
                promoted.push((id.clone(), wave));
            }
        }

        let current_wave = inner.current_wave;
        let boundaries = self.calculator.compute_boundaries(
            &inner.tracker,
            &inner.state.capacities,
            current_wave,
            now,
        )?;
        inner.state.boundaries = boundaries;
        let ci_rate = inner.state.metrics.ci_pass_rate;
        refresh_metrics(inner, ci_rate);
        inner.state.coordination_version += 1;
        inner.state.graph = inner.tracker.snapshot();
        inner.state.last_update = now;
        persist(&inner.state, &self.persistence).await?;

        for (task, wave) in promoted {
            let event = CoordinationEvent::TaskPromoted {
                task_id: task,
                wave,
            };
            emit_event(inner, &self.notifier, event).await;
        }
        let event = CoordinationEvent::BoundaryAdjusted {
            coordination_version: inner.state.coordination_version,
            boundary_count: inner.state.boundaries.len(),
        };
        emit_event(inner, &self.notifier, event).await;

        Ok(newly_ready)
    }

    /// Recompute the boundary list from the current DAG and capacities.
    pub async fn recalculate_boundaries(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        ensure_ready(&inner)?;
        push_snapshot(&mut inner, &self.config);

        let outcome = async {
            let now = Utc::now();
            let current_wave = inner.current_wave;
            let boundaries = self.calculator.compute_boundaries(
                &inner.tracker,
                &inner.state.capacities,
                current_wave,
                now,
            )?;
            inner.state.boundaries = boundaries;
            let ci_rate = inner.state.metrics.ci_pass_rate;
            refresh_metrics(&mut inner, ci_rate);
            inner.state.coordination_version += 1;
            inner.state.graph = inner.tracker.snapshot();
            inner.state.last_update = now;
            persist(&inner.state, &self.persistence).await?;
            let event = CoordinationEvent::BoundaryAdjusted {
                coordination_version: inner.state.coordination_version,
                boundary_count: inner.state.boundaries.len(),
            };
            emit_event(&mut inner, &self.notifier, event).await;
            Ok(())
        }
        .await;

        match outcome {
            Ok(()) => Ok(()),
            Err(err) => Err(rollback_once(&mut inner, &self.config, &self.notifier, err).await),
        }
    }

    /// Run one work-stealing coordination pass over `wave`.
    ///
    /// Never raises: failures land in the result's `errors`, per-transfer
    /// problems are recorded by the engine, and a state-level failure rolls
    /// the frontier back.
    pub async fn coordinate_wave(&self, wave: u32) -> WaveCoordinationResult {
        let mut inner = self.inner.lock().await;
        if inner.phase != ManagerPhase::Ready {
            return WaveCoordinationResult {
                wave,
                success: false,
                completed_transfers: 0,
                failed_transfers: 0,
                aborted: false,
                errors: vec!["coordinator is not ready".to_string()],
                recommendations: Vec::new(),
                total_throughput_gain: 0.0,
            };
        }
        push_snapshot(&mut inner, &self.config);

        let inner_ref = &mut *inner;
        let mut result = self
            .engine
            .coordinate(
                wave,
                &mut inner_ref.tracker,
                &mut inner_ref.state.capacities,
                &inner_ref.matcher,
            )
            .await;

        if result.completed_transfers > 0 {
            let finish = async {
                let now = Utc::now();
                let current_wave = inner.current_wave;
                let boundaries = self.calculator.compute_boundaries(
                    &inner.tracker,
                    &inner.state.capacities,
                    current_wave,
                    now,
                )?;
                inner.state.boundaries = boundaries;
                let ci_rate = inner.state.metrics.ci_pass_rate;
                refresh_metrics(&mut inner, ci_rate);
                inner.state.coordination_version += 1;
                inner.state.graph = inner.tracker.snapshot();
                inner.state.last_update = now;
                persist(&inner.state, &self.persistence).await?;
                let event = CoordinationEvent::BoundaryAdjusted {
                    coordination_version: inner.state.coordination_version,
                    boundary_count: inner.state.boundaries.len(),
                };
                emit_event(&mut inner, &self.notifier, event).await;
                Ok(())
            }
            .await;
            if let Err(err) = finish {
                let err = rollback_once(&mut inner, &self.config, &self.notifier, err).await;
                result.success = false;
                result.errors.push(err.to_string());
            }
        } else if self.config.rollback_on_failure {
            // Nothing mutated; drop the unused snapshot.
            inner.rollback_stack.pop();
        }
        result
    }

    /// Apply one optimization.
    ///
    /// Returns `false` without touching state when the same (action,
    /// target) was applied before or when the action turns out to be a
    /// no-op; `true` after a successful mutation.
    pub async fn apply_optimization(&self, optimization: &Optimization) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        ensure_ready(&inner)?;
        if inner.applied.contains(&optimization.key()) {
            debug!(
                action = %optimization.action,
                target = %optimization.target,
                "optimization already applied, no-op"
            );
            return Ok(false);
        }
        push_snapshot(&mut inner, &self.config);

        let outcome = self
            .apply_optimization_locked(&mut inner, optimization)
            .await;
        match outcome {
            Ok(true) => Ok(true),
            Ok(false) => {
                if self.config.rollback_on_failure {
                    inner.rollback_stack.pop();
                }
                Ok(false)
            }
            Err(err) => Err(rollback_once(&mut inner, &self.config, &self.notifier, err).await),
        }
    }

    async fn apply_optimization_locked(
        &self,
        inner: &mut Inner,
        optimization: &Optimization,
    ) -> Result<bool> {
        let changed =
            apply_mechanics(inner, optimization, &self.config, &self.assignment).await?;
        if !changed {
            return Ok(false);
        }
        let now = Utc::now();
        inner.applied.insert(optimization.key());
        inner
            .state
            .pending_optimizations
            .retain(|p| p.key() != optimization.key());
        let ci_rate = inner.state.metrics.ci_pass_rate;
        refresh_metrics(inner, ci_rate);
        inner.state.coordination_version += 1;
        inner.state.graph = inner.tracker.snapshot();
        inner.state.last_update = now;
        persist(&inner.state, &self.persistence).await?;
        let event = CoordinationEvent::OptimizationApplied {
            action: optimization.action.to_string(),
            target: optimization.target.clone(),
        };
        emit_event(inner, &self.notifier, event).await;
        Ok(true)
    }

    /// Deep copy of the current frontier state.
    pub async fn get_state(&self) -> Result<FrontierState> {
        let inner = self.inner.lock().await;
        if inner.phase == ManagerPhase::Uninitialized {
            return Err(CoordError::Coordination(
                "coordinator is not initialized".to_string(),
            ));
        }
        Ok(inner.state.clone())
    }

    /// Delivered event records, oldest first (bounded history).
    pub async fn events(&self) -> Vec<EventRecord> {
        self.inner.lock().await.events.records()
    }

    /// Transfer history of one task (≤ 10 entries, oldest first).
    pub fn transfer_history(&self, task_id: &str) -> Vec<crate::stealing::TransferRecord> {
        self.engine.history(task_id)
    }

    /// Run one tick by hand (the timer calls this on its own when
    /// `adaptive_boundaries` is enabled). Skips silently when an
    /// optimization pass is already in flight.
    pub async fn tick(&self) -> Result<()> {
        tick_with(&self.tick_context()).await
    }

    /// Stop the timer, wait for any in-flight pass, save the final state,
    /// and notify shutdown.
    pub async fn shutdown(&self) -> Result<()> {
        {
            let mut inner = self.inner.lock().await;
            if inner.phase != ManagerPhase::Ready {
                return Err(CoordError::Coordination(
                    "coordinator is not running".to_string(),
                ));
            }
            inner.phase = ManagerPhase::ShuttingDown;
        }

        // Drain the timer without holding the state lock: an in-flight tick
        // may itself be waiting on it.
        let _ = self.shutdown_tx.send(true);
        let handle = self.tick_task.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }

        let mut inner = self.inner.lock().await;
        inner.state.graph = inner.tracker.snapshot();
        inner.state.last_update = Utc::now();
        persist(&inner.state, &self.persistence).await?;
        let event = CoordinationEvent::FrontierShutdown {
            coordination_version: inner.state.coordination_version,
        };
        emit_event(&mut inner, &self.notifier, event).await;
        inner.phase = ManagerPhase::Stopped;
        info!("frontier manager shut down");
        Ok(())
    }

    fn tick_context(&self) -> TickContext {
        TickContext {
            inner: Arc::clone(&self.inner),
            is_optimizing: Arc::clone(&self.is_optimizing),
            persistence: Arc::clone(&self.persistence),
            notifier: Arc::clone(&self.notifier),
            assignment: Arc::clone(&self.assignment),
            ci: self.ci.clone(),
            calculator: self.calculator.clone(),
            balancer: self.balancer.clone(),
            config: self.config.clone(),
        }
    }

    fn spawn_timer(&self) {
        let ctx = self.tick_context();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let interval = std::time::Duration::from_millis(self.config.update_interval_ms);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick of a tokio interval fires immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(err) = tick_with(&ctx).await {
                            warn!(error = %err, "periodic tick failed");
                        }
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }
            debug!("periodic timer drained");
        });
        *self.tick_task.lock().unwrap() = Some(handle);
    }
}

fn ensure_ready(inner: &Inner) -> Result<()> {
    if inner.phase != ManagerPhase::Ready {
        return Err(CoordError::Coordination(format!(
            "coordinator is not ready (phase {:?})",
            inner.phase
        )));
    }
    Ok(())
}

/// Capture a deep pre-mutation snapshot onto the bounded rollback stack.
fn push_snapshot(inner: &mut Inner, config: &CoordinatorConfig) {
    if !config.rollback_on_failure {
        return;
    }
    let mut snapshot = inner.state.clone();
    snapshot.graph = inner.tracker.snapshot();
    if inner.rollback_stack.len() == ROLLBACK_STACK_CAP {
        inner.rollback_stack.remove(0);
    }
    inner.rollback_stack.push(snapshot);
}

/// Restore the most recent snapshot after a caught error and emit
/// `rollback_executed`. Returns the error for re-raising.
async fn rollback_once(
    inner: &mut Inner,
    config: &CoordinatorConfig,
    notifier: &Arc<dyn Notifier>,
    err: CoordError,
) -> CoordError {
    if !config.rollback_on_failure {
        return err;
    }
    if let Some(snapshot) = inner.rollback_stack.pop() {
        let restored_version = snapshot.coordination_version;
        inner.tracker.restore(snapshot.graph.clone());
        inner.state = snapshot;
        warn!(
            restored_version,
            error = %err,
            "mutation failed, frontier state rolled back"
        );
        let event = CoordinationEvent::RollbackExecuted { restored_version };
        emit_event(inner, notifier, event).await;
    }
    err
}

/// Deliver an event through the notification port (best effort) and record
/// it in the bounded history.
async fn emit_event(inner: &mut Inner, notifier: &Arc<dyn Notifier>, event: CoordinationEvent) {
    let record = event.to_record(Utc::now());
    if let Err(err) = notifier.notify(&record).await {
        warn!(kind = %record.kind, error = %err, "event notification failed");
    }
    inner.events.push(record);
}

/// Persist the state through the persistence port.
async fn persist(state: &FrontierState, persistence: &Arc<dyn StatePersistence>) -> Result<()> {
    let envelope = state.to_envelope()?;
    persistence.save_state(&envelope).await?;
    Ok(())
}

/// Recompute the aggregate metrics from the tracker and capacities.
fn refresh_metrics(inner: &mut Inner, ci_pass_rate: f64) {
    let states = inner.tracker.states();
    let boundary_states: Vec<TaskState> = inner
        .state
        .boundaries
        .first()
        .map(|b| {
            b.tasks
                .iter()
                .filter_map(|t| inner.tracker.node(t).ok().map(|n| n.state))
                .collect()
        })
        .unwrap_or_default();
    let completed = states.iter().filter(|s| s.is_terminal()).count();
    inner.state.metrics = FrontierMetrics {
        occupancy: metrics::occupancy(&inner.state.capacities),
        barrier_stall: metrics::barrier_stall(&boundary_states),
        throughput: metrics::throughput(&states),
        ci_pass_rate,
        blocked_ratio: metrics::blocked_ratio(&states),
        total_tasks: states.len(),
        completed_tasks: completed,
    };
}

/// One periodic tick: refresh metrics, auto-promote fresh ready tasks,
/// recalculate boundaries when the frontier moved, and run the
/// optimization pass when a trigger fires.
async fn tick_with(ctx: &TickContext) -> Result<()> {
    if ctx
        .is_optimizing
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        debug!("tick skipped, optimization pass in flight");
        return Ok(());
    }
    let _guard = OptimizeGuard(&ctx.is_optimizing);

    let mut inner = ctx.inner.lock().await;
    if inner.phase != ManagerPhase::Ready {
        return Ok(());
    }
    let now = Utc::now();
    push_snapshot(&mut inner, &ctx.config);

    match tick_locked(ctx, &mut inner, now).await {
        Ok(true) => {
            inner.state.coordination_version += 1;
            inner.state.graph = inner.tracker.snapshot();
            inner.state.last_update = now;
            if let Err(err) = persist(&inner.state, &ctx.persistence).await {
                // Transient; the next tick will retry the save.
                warn!(error = %err, "tick persistence failed");
            }
            Ok(())
        }
        Ok(false) => {
            if ctx.config.rollback_on_failure {
                inner.rollback_stack.pop();
            }
            Ok(())
        }
        Err(err) => Err(rollback_once(&mut inner, &ctx.config, &ctx.notifier, err).await),
    }
}

/// Tick body under the state lock; returns whether anything mutated.
async fn tick_locked(
    ctx: &TickContext,
    inner: &mut Inner,
    now: chrono::DateTime<Utc>,
) -> Result<bool> {
    let mut mutated = false;

    // CI pass rate from the signal port, carried over when absent.
    let ci_rate = match &ctx.ci {
        Some(port) => {
            let ids: Vec<String> = inner.tracker.nodes().map(|n| n.task_id.clone()).collect();
            let mut successes = 0u32;
            let mut runs = 0u32;
            for id in &ids {
                if let Ok(count) = port.check_run_count(id).await {
                    runs += count;
                }
                if let Ok(Some(CheckConclusion::Success)) = port.latest_conclusion(id).await {
                    successes += 1;
                }
            }
            metrics::ci_pass_rate(successes.min(runs), runs)
        }
        None => inner.state.metrics.ci_pass_rate,
    };

    if ctx.config.real_time_promotions {
        let promotable = inner.tracker.promotable_set();
        for id in promotable {
            inner.tracker.apply_transition(&id, TaskState::Ready)?;
            let wave = inner.tracker.node(&id)?.wave;
            let event = CoordinationEvent::TaskPromoted { task_id: id, wave };
            emit_event(inner, &ctx.notifier, event).await;
            mutated = true;
        }
    }

    // Adaptive recalculation: promotions moved the frontier.
    if mutated {
        let current_wave = inner.current_wave;
        let boundaries = ctx.calculator.compute_boundaries(
            &inner.tracker,
            &inner.state.capacities,
            current_wave,
            now,
        )?;
        inner.state.boundaries = boundaries;
    }

    refresh_metrics(inner, ci_rate);

    let load = ctx
        .balancer
        .wave_metrics(inner.current_wave, &inner.state.capacities);
    let triggered = inner.state.metrics.throughput < ctx.config.optimization_threshold
        || !load.bottleneck_teams.is_empty()
        || inner.state.metrics.blocked_ratio > 0.3;

    if triggered {
        inner.phase = ManagerPhase::Optimizing;
        let proposals = optimizer::generate_optimizations(
            &inner.tracker,
            &inner.state.boundaries,
            &load,
            &ctx.config.boundary,
        );
        debug!(proposals = proposals.len(), "optimization pass triggered");
        for proposal in proposals {
            if inner.applied.contains(&proposal.key()) {
                continue;
            }
            if proposal.auto_applicable() {
                match apply_mechanics(inner, &proposal, &ctx.config, &ctx.assignment).await {
                    Ok(true) => {
                        inner.applied.insert(proposal.key());
                        let event = CoordinationEvent::OptimizationApplied {
                            action: proposal.action.to_string(),
                            target: proposal.target.clone(),
                        };
                        emit_event(inner, &ctx.notifier, event).await;
                        mutated = true;
                    }
                    Ok(false) => {}
                    Err(err) => {
                        warn!(
                            action = %proposal.action,
                            target = %proposal.target,
                            error = %err,
                            "auto-apply failed, skipping optimization"
                        );
                    }
                }
            } else if !inner
                .state
                .pending_optimizations
                .iter()
                .any(|p| p.key() == proposal.key())
            {
                inner.state.pending_optimizations.push(proposal);
                mutated = true;
            }
        }
        inner.phase = ManagerPhase::Ready;
    }

    Ok(mutated)
}

/// Apply the mechanics of one optimization action. Returns `false` when the
/// action turns out to be a no-op against current state.
async fn apply_mechanics(
    inner: &mut Inner,
    optimization: &Optimization,
    config: &CoordinatorConfig,
    assignment: &Arc<dyn AssignmentSink>,
) -> Result<bool> {
    match optimization.action {
        OptimizationAction::PromoteTask => promote_task(inner, &optimization.target, config),
        OptimizationAction::DelayTask => delay_task(inner, &optimization.target),
        OptimizationAction::ReassignTask => {
            reassign_task(inner, &optimization.target, config, assignment).await
        }
        OptimizationAction::SplitWave => split_wave(inner, &optimization.target),
        OptimizationAction::MergeWaves => merge_waves(inner, &optimization.target, config),
        OptimizationAction::AdjustCapacity => adjust_capacity(inner, &optimization.target),
    }
}

/// Promote a satisfied task to `Ready` and pull it into the earliest
/// boundary with room.
fn promote_task(inner: &mut Inner, task_id: &str, config: &CoordinatorConfig) -> Result<bool> {
    let node = inner.tracker.node(task_id)?;
    let mut changed = false;
    if node.state == TaskState::Waiting {
        inner.tracker.apply_transition(task_id, TaskState::Ready)?;
        changed = true;
    }

    let team = inner.tracker.node(task_id)?.team.clone();
    let team_cap = inner
        .state
        .capacities
        .get(&team)
        .map(|c| c.max_concurrent_tasks as usize)
        .unwrap_or(0);
    let current_idx = inner.state.boundary_of(task_id);
    let graph = inner.tracker.snapshot();

    let horizon = current_idx.unwrap_or(inner.state.boundaries.len());
    let target_idx = (0..horizon).find(|idx| {
        let boundary = &inner.state.boundaries[*idx];
        let used = boundary.team_counts(&graph).get(&team).copied().unwrap_or(0);
        boundary.tasks.len() < config.boundary.max_wave_size && used < team_cap
    });

    if let Some(target_idx) = target_idx {
        if let Some(current_idx) = current_idx {
            let boundary = &mut inner.state.boundaries[current_idx];
            boundary.tasks.retain(|t| t != task_id);
            let counts = inner.state.boundaries[current_idx].team_counts(&graph);
            inner.state.boundaries[current_idx].teams = counts.into_keys().collect();
        }
        let boundary = &mut inner.state.boundaries[target_idx];
        boundary.tasks.push(task_id.to_string());
        boundary.teams.insert(team);
        prune_empty_boundaries(inner);
        changed = true;
    }
    Ok(changed)
}

/// Push a task one boundary later, opening a trailing wave when needed.
fn delay_task(inner: &mut Inner, task_id: &str) -> Result<bool> {
    inner.tracker.node(task_id)?;
    let Some(idx) = inner.state.boundary_of(task_id) else {
        return Ok(false);
    };
    let team = inner.tracker.node(task_id)?.team.clone();

    inner.state.boundaries[idx].tasks.retain(|t| t != task_id);
    if idx + 1 == inner.state.boundaries.len() {
        let last = &inner.state.boundaries[idx];
        let start = last.estimated_end;
        let trailing = WaveBoundary {
            wave: last.wave + 1,
            start,
            estimated_end: start + chrono::Duration::hours(1),
            tasks: Vec::new(),
            teams: BTreeSet::new(),
            readiness_score: 0.0,
            critical_path_length: 0.0,
        };
        inner.state.boundaries.push(trailing);
    }
    let next = &mut inner.state.boundaries[idx + 1];
    next.tasks.push(task_id.to_string());
    next.teams.insert(team);
    prune_empty_boundaries(inner);
    Ok(true)
}

/// Reassign a task to its best-matching viable team through the sink.
async fn reassign_task(
    inner: &mut Inner,
    task_id: &str,
    config: &CoordinatorConfig,
    assignment: &Arc<dyn AssignmentSink>,
) -> Result<bool> {
    let node = inner.tracker.node(task_id)?.clone();
    let candidates = inner.matcher.find_best_matches(
        &node,
        &inner.state.capacities,
        None,
        3,
        config.work_stealing.skill_match_threshold,
    );
    let viable = candidates.into_iter().find(|candidate| {
        if !node.critical || node.depends_on.is_empty() {
            return true;
        }
        node.depends_on.iter().any(|d| {
            inner
                .tracker
                .node(d)
                .map(|n| n.team == candidate.to_team)
                .unwrap_or(false)
        })
    });
    let Some(candidate) = viable else {
        return Ok(false);
    };

    assignment
        .update_task_assignment(task_id, &candidate.to_team)
        .await?;
    inner.tracker.set_team(task_id, &candidate.to_team)?;
    if let Some(from) = inner.state.capacities.get_mut(&candidate.from_team) {
        from.current_load = from.current_load.saturating_sub(1);
    }
    if let Some(to) = inner.state.capacities.get_mut(&candidate.to_team) {
        to.current_load += 1;
    }
    if let Some(idx) = inner.state.boundary_of(task_id) {
        let graph = inner.tracker.snapshot();
        let boundary = &mut inner.state.boundaries[idx];
        boundary.teams = boundary.team_counts(&graph).into_keys().collect();
    }
    Ok(true)
}

/// Split a boundary at its task-list midpoint, renumbering later waves.
fn split_wave(inner: &mut Inner, target: &str) -> Result<bool> {
    let wave = parse_wave_target(target)?;
    let Some(idx) = inner.state.boundaries.iter().position(|b| b.wave == wave) else {
        return Ok(false);
    };
    if inner.state.boundaries[idx].tasks.len() < 2 {
        return Ok(false);
    }

    let graph = inner.tracker.snapshot();
    let boundary = inner.state.boundaries[idx].clone();
    let mid = boundary.tasks.len() / 2;
    let (first_tasks, second_tasks) = boundary.tasks.split_at(mid);

    let half = (boundary.estimated_end - boundary.start) / 2;
    let mut first = boundary.clone();
    first.tasks = first_tasks.to_vec();
    first.estimated_end = boundary.start + half;
    first.teams = first.team_counts(&graph).into_keys().collect();

    let mut second = boundary.clone();
    second.wave = boundary.wave + 1;
    second.tasks = second_tasks.to_vec();
    second.start = first.estimated_end;
    second.estimated_end = boundary.estimated_end;
    second.teams = second.team_counts(&graph).into_keys().collect();

    inner.state.boundaries[idx] = first;
    inner.state.boundaries.insert(idx + 1, second);
    for boundary in inner.state.boundaries.iter_mut().skip(idx + 2) {
        boundary.wave += 1;
    }
    Ok(true)
}

/// Merge two adjacent boundaries when the union stays within the wave size
/// and per-team capacity constraints.
fn merge_waves(inner: &mut Inner, target: &str, config: &CoordinatorConfig) -> Result<bool> {
    let (first_wave, second_wave) = parse_merge_target(target)?;
    let Some(idx) = inner
        .state
        .boundaries
        .iter()
        .position(|b| b.wave == first_wave)
    else {
        return Ok(false);
    };
    if inner
        .state
        .boundaries
        .get(idx + 1)
        .map(|b| b.wave != second_wave)
        .unwrap_or(true)
    {
        return Ok(false);
    }

    let combined_len =
        inner.state.boundaries[idx].tasks.len() + inner.state.boundaries[idx + 1].tasks.len();
    if combined_len > config.boundary.max_wave_size {
        return Ok(false);
    }
    let graph = inner.tracker.snapshot();
    let mut merged = inner.state.boundaries[idx].clone();
    let second = inner.state.boundaries[idx + 1].clone();
    merged.tasks.extend(second.tasks);
    merged.estimated_end = second.estimated_end;
    let counts = merged.team_counts(&graph);
    for (team, count) in &counts {
        let capacity = inner
            .state
            .capacities
            .get(team)
            .map(|c| c.max_concurrent_tasks as usize)
            .unwrap_or(0);
        if *count > capacity {
            return Ok(false);
        }
    }
    merged.teams = counts.into_keys().collect();

    inner.state.boundaries[idx] = merged;
    inner.state.boundaries.remove(idx + 1);
    for boundary in inner.state.boundaries.iter_mut().skip(idx + 1) {
        boundary.wave -= 1;
    }
    Ok(true)
}

/// Adjust a team's concurrent-task budget by the signed delta in the
/// target (`team:<id>:<delta>`). Never shrinks below the current load.
fn adjust_capacity(inner: &mut Inner, target: &str) -> Result<bool> {
    let (team_id, delta) = parse_capacity_target(target)?;
    let capacity = inner
        .state
        .capacities
        .get_mut(&team_id)
        .ok_or_else(|| CoordError::UnknownTeam(team_id.clone()))?;
    let floor = i64::from(capacity.current_load);
    let adjusted = (i64::from(capacity.max_concurrent_tasks) + delta).max(floor);
    let adjusted = u32::try_from(adjusted).unwrap_or(capacity.current_load);
    if adjusted == capacity.max_concurrent_tasks {
        return Ok(false);
    }
    capacity.max_concurrent_tasks = adjusted;
    Ok(true)
}

fn prune_empty_boundaries(inner: &mut Inner) {
    inner.state.boundaries.retain(|b| !b.tasks.is_empty());
}

fn parse_wave_target(target: &str) -> Result<u32> {
    target
        .strip_prefix("wave:")
        .and_then(|rest| rest.parse().ok())
        .ok_or_else(|| CoordError::Coordination(format!("malformed wave target '{target}'")))
}

fn parse_merge_target(target: &str) -> Result<(u32, u32)> {
    let rest = target
        .strip_prefix("wave:")
        .ok_or_else(|| CoordError::Coordination(format!("malformed merge target '{target}'")))?;
    let (a, b) = rest
        .split_once('+')
        .ok_or_else(|| CoordError::Coordination(format!("malformed merge target '{target}'")))?;
    match (a.parse(), b.parse()) {
        (Ok(a), Ok(b)) => Ok((a, b)),
        _ => Err(CoordError::Coordination(format!(
            "malformed merge target '{target}'"
        ))),
    }
}

fn parse_capacity_target(target: &str) -> Result<(String, i64)> {
    let rest = target
        .strip_prefix("team:")
        .ok_or_else(|| CoordError::Coordination(format!("malformed capacity target '{target}'")))?;
    let (team, delta) = rest
        .rsplit_once(':')
        .ok_or_else(|| CoordError::Coordination(format!("malformed capacity target '{target}'")))?;
    let delta: i64 = delta.parse().map_err(|_| {
        CoordError::Coordination(format!("malformed capacity target '{target}'"))
    })?;
    Ok((team.to_string(), delta))
}
