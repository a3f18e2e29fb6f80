//! Shared metric definitions.
//!
//! The formulas here are deliberately plain functions so callers can swap
//! their own in: the coordinator consumes the numbers, not the recipes.
//! Defaults:
//! - occupancy: Σ current load / Σ capacity across teams
//! - barrier stall: blocked-or-failed fraction of the current boundary's
//!   unfinished tasks
//! - throughput: completed tasks / total tasks
//! - CI pass rate: successful conclusions / total check runs (1.0 with no
//!   signals)

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::task::TaskState;
use crate::domain::team::TeamCapacity;

/// Aggregate metrics carried by the frontier state and serialized with it.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FrontierMetrics {
    /// Σ active / Σ capacity across all teams.
    pub occupancy: f64,
    /// Fraction of the current boundary stalled behind the barrier.
    pub barrier_stall: f64,
    /// Completed / total tasks.
    pub throughput: f64,
    /// CI pass rate over observed check runs.
    pub ci_pass_rate: f64,
    /// Blocked / total tasks (optimization trigger input).
    pub blocked_ratio: f64,
    pub total_tasks: usize,
    pub completed_tasks: usize,
}

/// Σ current load / Σ capacity. Zero total capacity yields 0.0.
pub fn occupancy(capacities: &BTreeMap<String, TeamCapacity>) -> f64 {
    let total: u32 = capacities.values().map(|c| c.max_concurrent_tasks).sum();
    if total == 0 {
        return 0.0;
    }
    let active: u32 = capacities.values().map(|c| c.current_load).sum();
    f64::from(active) / f64::from(total)
}

/// Fraction of `boundary_states` that are `Blocked` or `Failed` among the
/// not-yet-completed tasks of the current boundary. 0.0 when everything in
/// the boundary has completed.
pub fn barrier_stall(boundary_states: &[TaskState]) -> f64 {
    let unfinished: Vec<&TaskState> = boundary_states
        .iter()
        .filter(|s| !s.is_terminal())
        .collect();
    if unfinished.is_empty() {
        return 0.0;
    }
    let stalled = unfinished
        .iter()
        .filter(|s| matches!(s, TaskState::Blocked | TaskState::Failed))
        .count();
    stalled as f64 / unfinished.len() as f64
}

/// Completed / total over all plan tasks. Empty plan yields 0.0.
pub fn throughput(states: &[TaskState]) -> f64 {
    if states.is_empty() {
        return 0.0;
    }
    let completed = states.iter().filter(|s| s.is_terminal()).count();
    completed as f64 / states.len() as f64
}

/// Blocked / total over all plan tasks. Empty plan yields 0.0.
pub fn blocked_ratio(states: &[TaskState]) -> f64 {
    if states.is_empty() {
        return 0.0;
    }
    let blocked = states
        .iter()
        .filter(|s| matches!(s, TaskState::Blocked))
        .count();
    blocked as f64 / states.len() as f64
}

/// Successes / total check runs. No observed runs yields 1.0 (a silent CI
/// is not a failing CI).
pub fn ci_pass_rate(successes: u32, total_runs: u32) -> f64 {
    if total_runs == 0 {
        return 1.0;
    }
    f64::from(successes) / f64::from(total_runs)
}

/// Population variance of per-team utilization.
pub fn utilization_variance(utilizations: &[f64]) -> f64 {
    if utilizations.is_empty() {
        return 0.0;
    }
    let mean = utilizations.iter().sum::<f64>() / utilizations.len() as f64;
    utilizations
        .iter()
        .map(|u| (u - mean).powi(2))
        .sum::<f64>()
        / utilizations.len() as f64
}
