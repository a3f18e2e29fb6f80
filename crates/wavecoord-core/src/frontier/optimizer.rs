//! Frontier optimization actions: generation and conflict resolution.
//!
//! The calculator owns boundary *shape*; this module proposes discrete
//! adjustments to it. Each proposal carries an impact estimate, a
//! confidence, and an urgency; the manager auto-applies only proposals
//! with confidence above 0.8 at High urgency or better, and parks the
//! rest for external review.

use serde::{Deserialize, Serialize};

use crate::balance::WaveLoadMetrics;
use crate::config::BoundaryConstraints;
use crate::domain::boundary::WaveBoundary;
use crate::domain::task::TaskState;
use crate::graph::DependencyTracker;

/// The discrete adjustments the coordinator knows how to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationAction {
    PromoteTask,
    DelayTask,
    ReassignTask,
    SplitWave,
    MergeWaves,
    AdjustCapacity,
}

impl std::fmt::Display for OptimizationAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OptimizationAction::PromoteTask => "promote_task",
            OptimizationAction::DelayTask => "delay_task",
            OptimizationAction::ReassignTask => "reassign_task",
            OptimizationAction::SplitWave => "split_wave",
            OptimizationAction::MergeWaves => "merge_waves",
            OptimizationAction::AdjustCapacity => "adjust_capacity",
        };
        write!(f, "{s}")
    }
}

/// Ordinal urgency; ordering follows declaration (Low < ... < Critical).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    Low,
    Medium,
    High,
    Critical,
}

/// Estimated effect of applying one optimization.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct OptimizationImpact {
    pub throughput_change: f64,
    pub delay_reduction: f64,
    pub resource_efficiency: f64,
    pub risk_level: f64,
}

/// One proposed frontier adjustment.
///
/// `target` encodes what the action applies to: a task id for task
/// actions, `wave:<n>` for splits, `wave:<a>+<b>` for merges, and
/// `team:<id>:<signed delta>` for capacity adjustments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Optimization {
    pub action: OptimizationAction,
    pub target: String,
    pub reason: String,
    pub impact: OptimizationImpact,
    /// Confidence the impact estimate holds, in [0,1].
    pub confidence: f64,
    pub urgency: Urgency,
}

impl Optimization {
    /// Auto-apply policy: confident and at least High urgency.
    pub fn auto_applicable(&self) -> bool {
        self.confidence > 0.8 && self.urgency >= Urgency::High
    }

    /// Dedup/no-op key: the same action on the same target.
    pub fn key(&self) -> (OptimizationAction, String) {
        (self.action, self.target.clone())
    }
}

/// Resolve conflicts among proposals targeting the same task/wave: higher
/// urgency wins, ties go to higher confidence. Output keeps the surviving
/// proposals in descending (urgency, confidence) order.
pub fn resolve_conflicts(mut proposals: Vec<Optimization>) -> Vec<Optimization> {
    proposals.sort_by(|a, b| {
        b.urgency
            .cmp(&a.urgency)
            .then_with(|| {
                b.confidence
                    .partial_cmp(&a.confidence)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .then_with(|| a.target.cmp(&b.target))
    });
    let mut seen_targets = std::collections::BTreeSet::new();
    proposals.retain(|p| seen_targets.insert(p.target.clone()));
    proposals
}

/// Generate the optimization list for the current frontier.
pub fn generate_optimizations(
    tracker: &DependencyTracker,
    boundaries: &[WaveBoundary],
    load: &WaveLoadMetrics,
    constraints: &BoundaryConstraints,
) -> Vec<Optimization> {
    let mut proposals = Vec::new();

    // Freshly satisfied tasks move toward the front of the frontier.
    for task_id in tracker.promotable_set() {
        let node = tracker.node(&task_id).expect("promotable ids exist");
        let (confidence, urgency) = if node.critical {
            (0.9, Urgency::High)
        } else {
            (0.75, Urgency::Medium)
        };
        proposals.push(Optimization {
            action: OptimizationAction::PromoteTask,
            target: task_id,
            reason: "all dependencies completed".to_string(),
            impact: OptimizationImpact {
                throughput_change: 0.1,
                delay_reduction: node.estimated_effort,
                resource_efficiency: 0.05,
                risk_level: 0.1,
            },
            confidence,
            urgency,
        });
    }

    // Blocked tasks sitting inside a planned wave stall the barrier.
    for boundary in boundaries {
        for task_id in &boundary.tasks {
            let Ok(node) = tracker.node(task_id) else {
                continue;
            };
            if node.state == TaskState::Blocked {
                proposals.push(Optimization {
                    action: OptimizationAction::DelayTask,
                    target: task_id.clone(),
                    reason: format!("blocked inside wave {}", boundary.wave),
                    impact: OptimizationImpact {
                        throughput_change: 0.05,
                        delay_reduction: 0.0,
                        resource_efficiency: 0.1,
                        risk_level: 0.2,
                    },
                    confidence: 0.8,
                    urgency: Urgency::Medium,
                });
            }
        }
    }

    // Bottleneck teams: shed their lightest movable task, and consider a
    // capacity bump when nobody has slack to steal into.
    for team in &load.bottleneck_teams {
        let lightest = tracker
            .nodes()
            .filter(|n| {
                n.team == *team
                    && !n.critical
                    && matches!(n.state, TaskState::Waiting | TaskState::Ready)
            })
            .min_by(|a, b| {
                a.depends_on
                    .len()
                    .cmp(&b.depends_on.len())
                    .then_with(|| a.task_id.cmp(&b.task_id))
            });
        if let Some(node) = lightest {
            proposals.push(Optimization {
                action: OptimizationAction::ReassignTask,
                target: node.task_id.clone(),
                reason: format!("team '{team}' is a bottleneck"),
                impact: OptimizationImpact {
                    throughput_change: 0.15,
                    delay_reduction: node.estimated_effort,
                    resource_efficiency: 0.2,
                    risk_level: 0.3,
                },
                confidence: 0.7,
                urgency: Urgency::High,
            });
        }
        if load.underutilized_teams.is_empty() {
            proposals.push(Optimization {
                action: OptimizationAction::AdjustCapacity,
                target: format!("team:{team}:+1"),
                reason: format!("'{team}' saturated with no slack elsewhere"),
                impact: OptimizationImpact {
                    throughput_change: 0.1,
                    delay_reduction: 0.0,
                    resource_efficiency: -0.1,
                    risk_level: 0.2,
                },
                confidence: 0.6,
                urgency: Urgency::Medium,
            });
        }
    }

    // Oversized waves split; adjacent small waves merge.
    for boundary in boundaries {
        if boundary.parallelism() > constraints.parallelism_threshold {
            let over_hard_cap = boundary.parallelism() > constraints.max_wave_size;
            proposals.push(Optimization {
                action: OptimizationAction::SplitWave,
                target: format!("wave:{}", boundary.wave),
                reason: format!("{} tasks exceed the parallelism threshold", boundary.parallelism()),
                impact: OptimizationImpact {
                    throughput_change: -0.05,
                    delay_reduction: 0.0,
                    resource_efficiency: 0.15,
                    risk_level: 0.1,
                },
                confidence: 0.9,
                urgency: if over_hard_cap { Urgency::Critical } else { Urgency::High },
            });
        }
    }
    for pair in boundaries.windows(2) {
        let combined = pair[0].parallelism() + pair[1].parallelism();
        if combined <= constraints.max_wave_size / 2 {
            proposals.push(Optimization {
                action: OptimizationAction::MergeWaves,
                target: format!("wave:{}+{}", pair[0].wave, pair[1].wave),
                reason: "two adjacent waves under half capacity".to_string(),
                impact: OptimizationImpact {
                    throughput_change: 0.1,
                    delay_reduction: 1.0,
                    resource_efficiency: 0.1,
                    risk_level: 0.15,
                },
                confidence: 0.7,
                urgency: Urgency::Low,
            });
        }
    }

    resolve_conflicts(proposals)
}
