//! Team load metrics and transfer recommendations.
//!
//! Three recommendation paths feed the work-stealing engine:
//! - reactive: drain current bottleneck teams toward healthy ones
//! - proactive: move work away from teams predicted to overload
//! - emergency: aggressive rebalancing for teams already saturated
//!
//! All three reuse the Team Matcher and respect the same hard DAG and
//! capacity constraints; they differ only in thresholds and ranking bias.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::WorkStealingConfig;
use crate::domain::task::TaskState;
use crate::domain::team::TeamCapacity;
use crate::graph::{DependencyNode, DependencyTracker};
use crate::matcher::{TeamMatcher, WorkStealingCandidate};
use crate::metrics::utilization_variance;

/// Why a transfer is being proposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StealReason {
    Proactive,
    Reactive,
    Emergency,
}

impl std::fmt::Display for StealReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StealReason::Proactive => "proactive",
            StealReason::Reactive => "reactive",
            StealReason::Emergency => "emergency",
        };
        write!(f, "{s}")
    }
}

/// A ranked transfer proposal, ready for the engine to execute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferRecommendation {
    pub candidate: WorkStealingCandidate,
    pub reason: StealReason,
    /// Overall throughput gain used for batch ordering.
    pub throughput_gain: f64,
}

/// Utilization picture of one wave across all teams.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaveLoadMetrics {
    pub wave: u32,
    /// Σ active / Σ capacity.
    pub total_utilization: f64,
    /// Population variance of per-team utilization.
    pub utilization_variance: f64,
    pub per_team_utilization: BTreeMap<String, f64>,
    /// Teams above the utilization threshold, busiest first.
    pub bottleneck_teams: Vec<String>,
    /// Teams with headroom well under the average.
    pub underutilized_teams: Vec<String>,
}

impl WaveLoadMetrics {
    pub fn is_bottleneck(&self, team_id: &str) -> bool {
        self.bottleneck_teams.iter().any(|t| t == team_id)
    }
}

/// Computes load metrics and turns imbalance into transfer proposals.
#[derive(Debug, Clone)]
pub struct LoadBalancer {
    config: WorkStealingConfig,
}

impl LoadBalancer {
    pub fn new(config: WorkStealingConfig) -> Self {
        Self { config }
    }

    /// Collect per-team utilization for `wave` and derive the aggregate
    /// picture: total, variance, bottlenecks, underutilized teams.
    pub fn wave_metrics(
        &self,
        wave: u32,
        capacities: &BTreeMap<String, TeamCapacity>,
    ) -> WaveLoadMetrics {
        let per_team: BTreeMap<String, f64> = capacities
            .values()
            .map(|c| (c.team_id.clone(), c.utilization()))
            .collect();

        let utilizations: Vec<f64> = per_team.values().copied().collect();
        let total_capacity: u32 = capacities.values().map(|c| c.max_concurrent_tasks).sum();
        let total_active: u32 = capacities.values().map(|c| c.current_load).sum();
        let total_utilization = if total_capacity == 0 {
            0.0
        } else {
            f64::from(total_active) / f64::from(total_capacity)
        };

        let mut bottlenecks: Vec<(String, f64)> = per_team
            .iter()
            .filter(|(_, util)| **util > self.config.utilization_threshold)
            .map(|(team, util)| (team.clone(), *util))
            .collect();
        bottlenecks.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });

        let average = if utilizations.is_empty() {
            0.0
        } else {
            utilizations.iter().sum::<f64>() / utilizations.len() as f64
        };
        let floor = (average - 0.2).min(0.6);
        let underutilized: Vec<String> = per_team
            .iter()
            .filter(|(team, util)| {
                **util < floor
                    && capacities
                        .get(*team)
                        .map(|c| c.available_slots() > 0)
                        .unwrap_or(false)
            })
            .map(|(team, _)| team.clone())
            .collect();

        WaveLoadMetrics {
            wave,
            total_utilization,
            utilization_variance: utilization_variance(&utilizations),
            per_team_utilization: per_team,
            bottleneck_teams: bottlenecks.into_iter().map(|(t, _)| t).collect(),
            underutilized_teams: underutilized,
        }
    }

    /// Predicted utilization per team from the complexity of its unfinished
    /// tasks in `wave`, normalized by capacity.
    pub fn predicted_utilization(
        &self,
        wave: u32,
        tracker: &DependencyTracker,
        capacities: &BTreeMap<String, TeamCapacity>,
    ) -> BTreeMap<String, f64> {
        let mut complexity: BTreeMap<String, f64> = BTreeMap::new();
        for node in tracker.nodes() {
            if node.wave != wave || node.state.is_terminal() {
                continue;
            }
            *complexity.entry(node.team.clone()).or_default() += task_complexity(node);
        }
        capacities
            .values()
            .map(|team| {
                let load = complexity.get(&team.team_id).copied().unwrap_or(0.0);
                let predicted = if team.max_concurrent_tasks == 0 {
                    0.0
                } else {
                    load / f64::from(team.max_concurrent_tasks)
                };
                (team.team_id.clone(), predicted)
            })
            .collect()
    }

    /// All transfer recommendations for one wave, emergency tier first,
    /// capped at `max_transfers_per_wave`. One recommendation per task.
    pub fn recommendations(
        &self,
        wave: u32,
        tracker: &DependencyTracker,
        capacities: &BTreeMap<String, TeamCapacity>,
        matcher: &TeamMatcher,
    ) -> Vec<TransferRecommendation> {
        if !self.config.enabled {
            return Vec::new();
        }
        let metrics = self.wave_metrics(wave, capacities);

        let mut all: Vec<TransferRecommendation> = Vec::new();
        if self.config.emergency_stealing_enabled {
            all.extend(self.emergency_recommendations(wave, tracker, capacities, &metrics, matcher));
        }
        all.extend(self.reactive_recommendations(wave, tracker, capacities, &metrics, matcher));
        if self.config.proactive_stealing_enabled {
            all.extend(self.proactive_recommendations(wave, tracker, capacities, &metrics, matcher));
        }

        // One proposal per task; the emergency tier was appended first and
        // wins dedup.
        let mut seen = std::collections::BTreeSet::new();
        all.retain(|rec| seen.insert(rec.candidate.task_id.clone()));

        all.sort_by(|a, b| {
            let tier = |r: &TransferRecommendation| u8::from(r.reason != StealReason::Emergency);
            tier(a).cmp(&tier(b)).then(
                b.throughput_gain
                    .partial_cmp(&a.throughput_gain)
                    .unwrap_or(std::cmp::Ordering::Equal),
            )
        });
        all.truncate(self.config.max_transfers_per_wave);
        debug!(
            wave,
            proposals = all.len(),
            bottlenecks = metrics.bottleneck_teams.len(),
            "transfer recommendations computed"
        );
        all
    }

    /// Drain bottleneck teams through the matcher; targets must not be
    /// bottlenecks themselves and must clear the benefit floor.
    fn reactive_recommendations(
        &self,
        wave: u32,
        tracker: &DependencyTracker,
        capacities: &BTreeMap<String, TeamCapacity>,
        metrics: &WaveLoadMetrics,
        matcher: &TeamMatcher,
    ) -> Vec<TransferRecommendation> {
        let mut recs = Vec::new();
        for team in &metrics.bottleneck_teams {
            for node in movable_tasks(tracker, team, wave) {
                let best = matcher
                    .find_best_matches(
                        node,
                        capacities,
                        None,
                        3,
                        self.config.skill_match_threshold,
                    )
                    .into_iter()
                    .filter(|c| !metrics.is_bottleneck(&c.to_team))
                    .find(|c| c.expected_benefit > self.config.minimum_transfer_benefit);
                if let Some(candidate) = best {
                    let throughput_gain = candidate.expected_benefit - candidate.transfer_cost;
                    recs.push(TransferRecommendation {
                        candidate,
                        reason: StealReason::Reactive,
                        throughput_gain,
                    });
                }
            }
        }
        recs
    }

    /// Move work away from teams whose predicted utilization overshoots the
    /// threshold. Only non-critical, low-dependency tasks qualify, and the
    /// benefit is discounted to 0.7 to reflect forecast uncertainty.
    fn proactive_recommendations(
        &self,
        wave: u32,
        tracker: &DependencyTracker,
        capacities: &BTreeMap<String, TeamCapacity>,
        metrics: &WaveLoadMetrics,
        matcher: &TeamMatcher,
    ) -> Vec<TransferRecommendation> {
        let predicted = self.predicted_utilization(wave, tracker, capacities);
        let mut recs = Vec::new();
        for (team, forecast) in predicted {
            if forecast <= self.config.utilization_threshold + 0.1 {
                continue;
            }
            for node in movable_tasks(tracker, &team, wave) {
                if node.critical || node.depends_on.len() > 2 {
                    continue;
                }
                let best = matcher
                    .find_best_matches(
                        node,
                        capacities,
                        None,
                        3,
                        self.config.skill_match_threshold,
                    )
                    .into_iter()
                    .find(|c| !metrics.is_bottleneck(&c.to_team));
                if let Some(mut candidate) = best {
                    candidate.expected_benefit *= 0.7;
                    candidate.composite_rank = TeamMatcher::composite_rank(
                        candidate.expected_benefit,
                        candidate.transfer_cost,
                        candidate.skill_match,
                        candidate.dependency_risk,
                    );
                    let throughput_gain = candidate.expected_benefit - candidate.transfer_cost;
                    recs.push(TransferRecommendation {
                        candidate,
                        reason: StealReason::Proactive,
                        throughput_gain,
                    });
                }
            }
        }
        recs
    }

    /// Saturated teams: utilization above 0.95, or above 0.85 while owning
    /// critical tasks. Skill floor drops to 0.3, benefit is amplified 1.5×
    /// and cost halved in the ranking.
    fn emergency_recommendations(
        &self,
        wave: u32,
        tracker: &DependencyTracker,
        capacities: &BTreeMap<String, TeamCapacity>,
        metrics: &WaveLoadMetrics,
        matcher: &TeamMatcher,
    ) -> Vec<TransferRecommendation> {
        let mut recs = Vec::new();
        for (team, util) in &metrics.per_team_utilization {
            let has_critical = tracker
                .nodes()
                .any(|n| n.team == *team && n.critical && !n.state.is_terminal());
            let saturated = *util > 0.95 || (*util > 0.85 && has_critical);
            if !saturated {
                continue;
            }
            debug!(team = %team, utilization = util, "emergency rebalancing engaged");
            for node in movable_tasks(tracker, team, wave) {
                let best = matcher
                    .find_best_matches(node, capacities, None, 3, 0.3)
                    .into_iter()
                    .max_by(|a, b| {
                        let rank = |c: &WorkStealingCandidate| {
                            TeamMatcher::composite_rank(
                                c.expected_benefit * 1.5,
                                c.transfer_cost * 0.5,
                                c.skill_match,
                                c.dependency_risk,
                            )
                        };
                        rank(a)
                            .partial_cmp(&rank(b))
                            .unwrap_or(std::cmp::Ordering::Equal)
                    });
                if let Some(candidate) = best {
                    let throughput_gain =
                        candidate.expected_benefit * 1.5 - candidate.transfer_cost * 0.5;
                    recs.push(TransferRecommendation {
                        candidate,
                        reason: StealReason::Emergency,
                        throughput_gain,
                    });
                }
            }
        }
        recs
    }
}

/// Complexity of one task: effort scaled by dependency fan-in and
/// criticality.
pub fn task_complexity(node: &DependencyNode) -> f64 {
    node.estimated_effort
        * (1.0 + 0.1 * node.depends_on.len() as f64)
        * if node.critical { 1.2 } else { 1.0 }
}

/// Tasks of `team` in `wave` that can move: not started, not finished.
fn movable_tasks<'a>(
    tracker: &'a DependencyTracker,
    team: &'a str,
    wave: u32,
) -> impl Iterator<Item = &'a DependencyNode> {
    tracker.nodes().filter(move |n| {
        n.team == team
            && n.wave == wave
            && matches!(n.state, TaskState::Waiting | TaskState::Ready)
    })
}
