//! Multi-objective wave-boundary optimization.
//!
//! Four independent strategies propose candidate waves over the currently
//! runnable tasks; each candidate is scored against the configured
//! objective weights and the best disjoint set is selected greedily. A
//! completion pass packs whatever the selection left over, so every
//! runnable task lands in a wave while the horizon allows.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{BoundaryConstraints, ObjectiveWeights};
use crate::domain::boundary::WaveBoundary;
use crate::domain::task::TaskState;
use crate::domain::team::TeamCapacity;
use crate::error::{CoordError, Result};
use crate::graph::DependencyTracker;

/// Which generator produced a candidate wave.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateStrategy {
    CapacityFirst,
    DependencyFirst,
    Balanced,
    CriticalPathFirst,
}

/// A scored, not-yet-numbered candidate wave.
#[derive(Debug, Clone)]
pub struct BoundaryCandidate {
    pub strategy: CandidateStrategy,
    pub tasks: Vec<String>,
    pub score: f64,
}

/// Computes wave boundaries under capacity and DAG constraints.
#[derive(Debug, Clone)]
pub struct FrontierCalculator {
    constraints: BoundaryConstraints,
    weights: ObjectiveWeights,
    /// Planning horizon in waves.
    lookahead: usize,
}

impl FrontierCalculator {
    pub fn new(
        constraints: BoundaryConstraints,
        weights: ObjectiveWeights,
        lookahead: usize,
    ) -> Self {
        Self {
            constraints,
            weights,
            lookahead: lookahead.max(1),
        }
    }

    /// Compute the rolling frontier: up to `lookahead` boundaries numbered
    /// from `current_wave`, covering the currently runnable tasks.
    pub fn compute_boundaries(
        &self,
        tracker: &DependencyTracker,
        capacities: &BTreeMap<String, TeamCapacity>,
        current_wave: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<WaveBoundary>> {
        let available = tracker.available_set();
        if available.is_empty() {
            return Ok(Vec::new());
        }

        let candidates = self.generate_candidates(tracker, capacities, &available);
        let selected = self.select_candidates(candidates, &available, tracker, capacities);

        let mut boundaries = Vec::with_capacity(selected.len());
        let mut start = now;
        for (offset, tasks) in selected.into_iter().enumerate() {
            let boundary =
                self.make_boundary(current_wave + offset as u32, start, tasks, tracker, capacities)?;
            start = boundary.estimated_end;
            boundaries.push(boundary);
        }
        debug!(
            boundaries = boundaries.len(),
            runnable = available.len(),
            "frontier recomputed"
        );
        Ok(boundaries)
    }

    /// Run the four generators over the runnable set.
    fn generate_candidates(
        &self,
        tracker: &DependencyTracker,
        capacities: &BTreeMap<String, TeamCapacity>,
        available: &[String],
    ) -> Vec<BoundaryCandidate> {
        let mut candidates = Vec::new();

        // Capacity-first: most headroom on the owning team goes first.
        let mut by_capacity = available.to_vec();
        by_capacity.sort_by_key(|id| {
            let team = &tracker.node(id).expect("available ids exist").team;
            let slots = capacities.get(team).map(|c| c.available_slots()).unwrap_or(0);
            (std::cmp::Reverse(slots), id.clone())
        });
        for tasks in self.pack(&by_capacity, tracker, capacities) {
            candidates.push(self.candidate(CandidateStrategy::CapacityFirst, tasks, tracker));
        }

        // Dependency-first: contiguous runs of equal blocking factor.
        let mut by_blocking = available.to_vec();
        by_blocking.sort_by_key(|id| {
            let factor = tracker.node(id).expect("available ids exist").blocking_factor;
            (std::cmp::Reverse(factor), id.clone())
        });
        for run in runs_of_equal_blocking(&by_blocking, tracker) {
            for tasks in self.pack(&run, tracker, capacities) {
                candidates.push(self.candidate(CandidateStrategy::DependencyFirst, tasks, tracker));
            }
        }

        // Balanced: composite of blocking, capacity, and criticality.
        let max_blocking = available
            .iter()
            .map(|id| tracker.node(id).expect("available ids exist").blocking_factor)
            .max()
            .unwrap_or(0)
            .max(1) as f64;
        let max_slots = capacities
            .values()
            .map(|c| c.available_slots())
            .max()
            .unwrap_or(0)
            .max(1) as f64;
        let mut by_balance = available.to_vec();
        by_balance.sort_by(|a, b| {
            let score = |id: &String| {
                let node = tracker.node(id).expect("available ids exist");
                let slots = capacities
                    .get(&node.team)
                    .map(|c| c.available_slots())
                    .unwrap_or(0) as f64;
                let critical = if node.on_critical_path { 1.0 } else { 0.0 };
                0.4 * (node.blocking_factor as f64 / max_blocking)
                    + 0.3 * (slots / max_slots)
                    + 0.3 * critical
            };
            score(b)
                .partial_cmp(&score(a))
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.cmp(b))
        });
        for tasks in self.pack(&by_balance, tracker, capacities) {
            candidates.push(self.candidate(CandidateStrategy::Balanced, tasks, tracker));
        }

        // Critical-path-first: critical work now, the rest next.
        let (critical, rest): (Vec<String>, Vec<String>) = available
            .iter()
            .cloned()
            .partition(|id| tracker.node(id).expect("available ids exist").critical);
        for group in [critical, rest] {
            for tasks in self.pack(&group, tracker, capacities) {
                candidates.push(self.candidate(
                    CandidateStrategy::CriticalPathFirst,
                    tasks,
                    tracker,
                ));
            }
        }

        candidates
    }

    fn candidate(
        &self,
        strategy: CandidateStrategy,
        tasks: Vec<String>,
        tracker: &DependencyTracker,
    ) -> BoundaryCandidate {
        let score = self.score_tasks(&tasks, tracker);
        BoundaryCandidate {
            strategy,
            tasks,
            score,
        }
    }

    /// Greedily pack an ordered task list into waves respecting wave size
    /// and per-team capacity.
    fn pack(
        &self,
        ordered: &[String],
        tracker: &DependencyTracker,
        capacities: &BTreeMap<String, TeamCapacity>,
    ) -> Vec<Vec<String>> {
        let mut waves: Vec<Vec<String>> = Vec::new();
        let mut team_counts: Vec<BTreeMap<String, usize>> = Vec::new();

        'tasks: for id in ordered {
            let team = tracker.node(id).expect("packed ids exist").team.clone();
            let team_cap = capacities
                .get(&team)
                .map(|c| c.max_concurrent_tasks as usize)
                .unwrap_or(usize::MAX);
            for (wave, counts) in waves.iter_mut().zip(team_counts.iter_mut()) {
                let used = counts.get(&team).copied().unwrap_or(0);
                if wave.len() < self.constraints.max_wave_size && used < team_cap {
                    wave.push(id.clone());
                    *counts.entry(team).or_default() += 1;
                    continue 'tasks;
                }
            }
            if team_cap == 0 {
                // A zero-capacity team can never host the task this pass.
                continue;
            }
            waves.push(vec![id.clone()]);
            let mut counts = BTreeMap::new();
            counts.insert(team, 1usize);
            team_counts.push(counts);
        }
        waves
    }

    /// Greedy selection by descending score; no task lands in two chosen
    /// boundaries, and leftovers are packed capacity-first at the tail.
    fn select_candidates(
        &self,
        mut candidates: Vec<BoundaryCandidate>,
        available: &[String],
        tracker: &DependencyTracker,
        capacities: &BTreeMap<String, TeamCapacity>,
    ) -> Vec<Vec<String>> {
        candidates.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.tasks.cmp(&b.tasks))
        });

        let mut used: BTreeSet<String> = BTreeSet::new();
        let mut selected: Vec<Vec<String>> = Vec::new();
        for candidate in candidates {
            if selected.len() == self.lookahead {
                return selected;
            }
            if candidate.tasks.iter().any(|t| used.contains(t)) {
                continue;
            }
            used.extend(candidate.tasks.iter().cloned());
            selected.push(candidate.tasks);
        }

        // Completion pass for tasks no chosen candidate covered.
        let leftovers: Vec<String> = available
            .iter()
            .filter(|id| !used.contains(*id))
            .cloned()
            .collect();
        for tasks in self.pack(&leftovers, tracker, capacities) {
            if selected.len() == self.lookahead {
                break;
            }
            selected.push(tasks);
        }
        selected
    }

    /// Weighted multi-objective score of one candidate wave.
    pub fn score_tasks(&self, tasks: &[String], tracker: &DependencyTracker) -> f64 {
        if tasks.is_empty() {
            return 0.0;
        }
        let parallelism = tasks.len() as f64;
        let mut teams: BTreeMap<String, usize> = BTreeMap::new();
        let mut critical_count = 0usize;
        for id in tasks {
            if let Ok(node) = tracker.node(id) {
                *teams.entry(node.team.clone()).or_default() += 1;
                if node.critical {
                    critical_count += 1;
                }
            }
        }

        let throughput = (parallelism / 10.0).min(1.0);
        let coordination = (1.0 - 0.1 * teams.len() as f64).max(0.0);
        let risk = (1.0 - 0.2 * critical_count as f64).max(0.0);
        let counts: Vec<f64> = teams.values().map(|c| *c as f64).collect();
        let mean = counts.iter().sum::<f64>() / counts.len() as f64;
        let sigma = (counts.iter().map(|c| (c - mean).powi(2)).sum::<f64>()
            / counts.len() as f64)
            .sqrt();
        let balance = 1.0 - sigma / parallelism;

        self.weights.throughput * throughput
            + self.weights.coordination * coordination
            + self.weights.risk * risk
            + self.weights.balance * balance
    }

    /// Materialize one selected wave as a boundary, enforcing the hard
    /// constraints one last time.
    fn make_boundary(
        &self,
        wave: u32,
        start: DateTime<Utc>,
        tasks: Vec<String>,
        tracker: &DependencyTracker,
        capacities: &BTreeMap<String, TeamCapacity>,
    ) -> Result<WaveBoundary> {
        if tasks.len() > self.constraints.max_wave_size {
            return Err(CoordError::Coordination(format!(
                "wave {wave} exceeds max_wave_size ({} > {})",
                tasks.len(),
                self.constraints.max_wave_size
            )));
        }

        let mut teams: BTreeSet<String> = BTreeSet::new();
        let mut team_counts: BTreeMap<String, usize> = BTreeMap::new();
        let mut team_effort: BTreeMap<String, f64> = BTreeMap::new();
        let mut readiness_sum = 0.0;
        let mut wave_critical_effort: f64 = 0.0;

        for id in &tasks {
            let node = tracker.node(id)?;
            teams.insert(node.team.clone());
            *team_counts.entry(node.team.clone()).or_default() += 1;
            *team_effort.entry(node.team.clone()).or_default() += node.estimated_effort;
            wave_critical_effort = wave_critical_effort.max(node.estimated_effort);

            let deps = node.depends_on.len();
            readiness_sum += if deps == 0 {
                1.0
            } else {
                let done = node
                    .depends_on
                    .iter()
                    .filter(|d| {
                        tracker
                            .node(d)
                            .map(|n| n.state == TaskState::Completed)
                            .unwrap_or(false)
                    })
                    .count();
                done as f64 / deps as f64
            };
        }

        for (team, count) in &team_counts {
            let capacity = capacities
                .get(team)
                .map(|c| c.max_concurrent_tasks)
                .unwrap_or(0);
            if *count > capacity as usize {
                return Err(CoordError::CapacityOverflow {
                    team: team.clone(),
                    assigned: *count,
                    capacity,
                });
            }
        }

        // Base duration: the busiest team's workload at its velocity, in
        // hours, inflated by the configured critical-path buffer.
        let base_hours = team_effort
            .iter()
            .map(|(team, effort)| {
                let velocity = capacities.get(team).map(|c| c.velocity).unwrap_or(1.0);
                effort / velocity.max(f64::MIN_POSITIVE)
            })
            .fold(0.0f64, f64::max)
            .max(0.25);
        let hours =
            base_hours + self.constraints.critical_path_buffer * wave_critical_effort;
        let estimated_end = start + Duration::milliseconds((hours * 3_600_000.0) as i64);

        let readiness_score = readiness_sum / tasks.len() as f64;
        Ok(WaveBoundary {
            wave,
            start,
            estimated_end,
            tasks,
            teams,
            readiness_score,
            critical_path_length: wave_critical_effort,
        })
    }
}

/// Split a blocking-factor-sorted id list into contiguous equal-factor runs.
fn runs_of_equal_blocking(sorted: &[String], tracker: &DependencyTracker) -> Vec<Vec<String>> {
    let mut runs: Vec<Vec<String>> = Vec::new();
    let mut current_factor: Option<usize> = None;
    for id in sorted {
        let factor = tracker.node(id).expect("sorted ids exist").blocking_factor;
        if current_factor == Some(factor) {
            runs.last_mut().expect("run opened for current factor").push(id.clone());
        } else {
            runs.push(vec![id.clone()]);
            current_factor = Some(factor);
        }
    }
    runs
}
