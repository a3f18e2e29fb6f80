//! Team↔task fit scoring for work stealing.
//!
//! Produces ranked transfer candidates from the required skills of a task
//! against the skills, availability, and headroom of the other teams. All
//! scores live in fixed ranges so the engine can threshold them; the
//! composite rank trades expected benefit against transfer cost and
//! dependency risk.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::team::{TaskRequirement, TeamCapacity, TeamSkill};
use crate::graph::DependencyNode;

/// A scored proposal to move `task_id` from `from_team` to `to_team`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkStealingCandidate {
    pub task_id: String,
    pub from_team: String,
    pub to_team: String,
    /// Importance-weighted skill fit, in [0,1].
    pub skill_match: f64,
    /// Friction of moving the task, in [0,1].
    pub transfer_cost: f64,
    /// Estimated throughput upside (unbounded above 0).
    pub expected_benefit: f64,
    /// Risk from dependencies and target load, in [0,1].
    pub dependency_risk: f64,
    /// Benefit/cost with skill and risk adjustments; higher is better.
    pub composite_rank: f64,
}

/// Scores and ranks candidate teams for a task.
#[derive(Debug, Clone, Default)]
pub struct TeamMatcher {
    /// team id → offered skills
    skills: BTreeMap<String, Vec<TeamSkill>>,
    /// task id → required skills
    requirements: BTreeMap<String, Vec<TaskRequirement>>,
}

impl TeamMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace a team's skill list.
    pub fn set_team_skills(&mut self, team_id: impl Into<String>, skills: Vec<TeamSkill>) {
        self.skills.insert(team_id.into(), skills);
    }

    /// Register or replace a task's requirements.
    pub fn set_task_requirements(
        &mut self,
        task_id: impl Into<String>,
        requirements: Vec<TaskRequirement>,
    ) {
        self.requirements.insert(task_id.into(), requirements);
    }

    /// Importance-weighted skill fit of `team_id` for `task_id`.
    ///
    /// A missing required skill hard-blocks the whole score to 0. A task
    /// without requirements fits every team perfectly (1.0).
    pub fn skill_match(&self, task_id: &str, team_id: &str) -> f64 {
        let requirements = match self.requirements.get(task_id) {
            Some(reqs) if !reqs.is_empty() => reqs,
            _ => return 1.0,
        };
        let team_skills = self.skills.get(team_id);

        let mut contribution_sum = 0.0;
        let mut importance_sum = 0.0;
        for req in requirements {
            importance_sum += req.importance;
            let skill = team_skills
                .and_then(|skills| skills.iter().find(|s| s.skill_id == req.skill_id));
            let Some(skill) = skill else {
                return 0.0;
            };
            contribution_sum += (skill.proficiency - req.minimum_proficiency).max(0.0)
                * skill.availability
                * req.importance;
        }
        if importance_sum <= 0.0 {
            return 1.0;
        }
        contribution_sum / importance_sum
    }

    /// Score a single `task → target` proposal.
    pub fn score_candidate(
        &self,
        node: &DependencyNode,
        target: &TeamCapacity,
    ) -> WorkStealingCandidate {
        let utilization = target.utilization();
        let deps = node.depends_on.len() as f64;
        let critical = node.critical;

        let skill_match = self.skill_match(&node.task_id, &target.team_id);

        let transfer_cost = (0.1
            + (utilization - 0.8).max(0.0) * 0.5
            + if critical { 0.2 } else { 0.0 }
            + 0.05 * deps)
            .clamp(0.0, 1.0);

        let expected_benefit = (0.8 - utilization).max(0.0) * 2.0
            + if critical { 0.3 } else { 0.1 }
            + 0.1 * f64::from(target.available_slots());

        let dependency_risk = (0.1 * deps
            + 0.05 * f64::from(target.current_load)
            + if critical { 0.2 } else { 0.1 })
        .clamp(0.0, 1.0);

        let composite_rank = Self::composite_rank(
            expected_benefit,
            transfer_cost,
            skill_match,
            dependency_risk,
        );

        WorkStealingCandidate {
            task_id: node.task_id.clone(),
            from_team: node.team.clone(),
            to_team: target.team_id.clone(),
            skill_match,
            transfer_cost,
            expected_benefit,
            dependency_risk,
            composite_rank,
        }
    }

    /// `benefit/cost` (plain benefit when cost is 0) plus skill, minus risk.
    pub fn composite_rank(benefit: f64, cost: f64, skill: f64, risk: f64) -> f64 {
        let value = if cost > 0.0 { benefit / cost } else { benefit };
        value + 0.5 * skill - 0.3 * risk
    }

    /// Ranked candidates for moving `node` off its current team.
    ///
    /// Targets at or over capacity and candidates under `min_skill_match`
    /// are discarded before ranking; at most `max_candidates` survive.
    pub fn find_best_matches(
        &self,
        node: &DependencyNode,
        capacities: &BTreeMap<String, TeamCapacity>,
        exclude_team: Option<&str>,
        max_candidates: usize,
        min_skill_match: f64,
    ) -> Vec<WorkStealingCandidate> {
        let mut candidates: Vec<WorkStealingCandidate> = capacities
            .values()
            .filter(|team| team.team_id != node.team)
            .filter(|team| exclude_team != Some(team.team_id.as_str()))
            .filter(|team| team.available_slots() > 0)
            .map(|team| self.score_candidate(node, team))
            .filter(|c| c.skill_match >= min_skill_match)
            .collect();

        candidates.sort_by(|a, b| {
            b.composite_rank
                .partial_cmp(&a.composite_rank)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.to_team.cmp(&b.to_team))
        });
        candidates.truncate(max_candidates);
        candidates
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::task::TaskState;

    fn node(id: &str, team: &str, deps: usize, critical: bool) -> DependencyNode {
        DependencyNode {
            task_id: id.to_string(),
            depends_on: (0..deps).map(|i| format!("D{i}")).collect(),
            depended_by: vec![],
            state: TaskState::Ready,
            wave: 1,
            team: team.to_string(),
            estimated_effort: 1.0,
            critical,
            on_critical_path: critical,
            blocking_factor: 0,
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

    fn skill(id: &str, proficiency: f64, availability: f64) -> TeamSkill {
        TeamSkill {
            skill_id: id.to_string(),
            proficiency,
            availability,
        }
    }

    #[test]
    fn test_requirement_free_task_matches_perfectly() {
        let matcher = TeamMatcher::new();
        assert_eq!(matcher.skill_match("T001", "anyone"), 1.0);
    }

    #[test]
    fn test_missing_skill_hard_blocks_the_score() {
        let mut matcher = TeamMatcher::new();
        matcher.set_team_skills("beta", vec![skill("rust", 0.9, 1.0)]);
        matcher.set_task_requirements(
            "T001",
            vec![
                TaskRequirement::new("rust", 0.5, 0.5),
                TaskRequirement::new("terraform", 0.3, 0.5),
            ],
        );
        assert_eq!(matcher.skill_match("T001", "beta"), 0.0);
    }

    #[test]
    fn test_skill_match_is_importance_weighted() {
        let mut matcher = TeamMatcher::new();
        matcher.set_team_skills(
            "beta",
            vec![skill("rust", 0.9, 1.0), skill("sql", 0.4, 0.5)],
        );
        matcher.set_task_requirements(
            "T001",
            vec![
                TaskRequirement::new("rust", 0.5, 0.8),
                TaskRequirement::new("sql", 0.2, 0.2),
            ],
        );
        // rust: (0.9-0.5)*1.0*0.8 = 0.32; sql: (0.4-0.2)*0.5*0.2 = 0.02
        // total = 0.34 / 1.0
        let score = matcher.skill_match("T001", "beta");
        assert!((score - 0.34).abs() < 1e-9);
    }

    #[test]
    fn test_idle_target_beats_busy_target() {
        let matcher = TeamMatcher::new();
        let task = node("T001", "alpha", 0, false);
        let mut capacities = BTreeMap::new();
        capacities.insert("busy".to_string(), team("busy", 4, 3));
        capacities.insert("idle".to_string(), team("idle", 4, 0));
        let ranked = matcher.find_best_matches(&task, &capacities, None, 10, 0.5);
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].to_team, "idle");
        assert!(ranked[0].composite_rank > ranked[1].composite_rank);
    }

    #[test]
    fn test_benefit_and_cost_formulas_at_known_points() {
        let matcher = TeamMatcher::new();
        // Target at 0.3 utilization with 10 slots, 3 used.
        let candidate = matcher.score_candidate(&node("T", "alpha", 0, false), &team("t", 10, 3));
        // cost = 0.1; benefit = 0.5*2 + 0.1 + 0.7 = 1.8; risk = 0.15 + 0.1
        assert!((candidate.transfer_cost - 0.1).abs() < 1e-9);
        assert!((candidate.expected_benefit - 1.8).abs() < 1e-9);
        assert!((candidate.dependency_risk - 0.25).abs() < 1e-9);
        let expected_rank = 1.8 / 0.1 + 0.5 * 1.0 - 0.3 * 0.25;
        assert!((candidate.composite_rank - expected_rank).abs() < 1e-9);
    }

    #[test]
    fn test_criticality_raises_cost_benefit_and_risk() {
        let matcher = TeamMatcher::new();
        let target = team("t", 10, 3);
        let plain = matcher.score_candidate(&node("T", "alpha", 2, false), &target);
        let crit = matcher.score_candidate(&node("T", "alpha", 2, true), &target);
        assert!(crit.transfer_cost > plain.transfer_cost);
        assert!(crit.expected_benefit > plain.expected_benefit);
        assert!(crit.dependency_risk > plain.dependency_risk);
    }

    #[test]
    fn test_full_teams_and_low_skill_are_discarded() {
        let mut matcher = TeamMatcher::new();
        matcher.set_task_requirements("T001", vec![TaskRequirement::new("go", 0.5, 1.0)]);
        matcher.set_team_skills("weak", vec![skill("go", 0.55, 0.5)]);
        matcher.set_team_skills("full", vec![skill("go", 1.0, 1.0)]);
        let task = node("T001", "alpha", 0, false);
        let mut capacities = BTreeMap::new();
        capacities.insert("weak".to_string(), team("weak", 4, 0));
        capacities.insert("full".to_string(), team("full", 2, 2));
        // weak: (0.55-0.5)*0.5 = 0.025 < 0.5 threshold; full: no slots.
        let ranked = matcher.find_best_matches(&task, &capacities, None, 10, 0.5);
        assert!(ranked.is_empty());
        // Lowering the floor (emergency) readmits the weak fit.
        let ranked = matcher.find_best_matches(&task, &capacities, None, 10, 0.0);
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].to_team, "weak");
    }

    #[test]
    fn test_exclude_team_is_honored() {
        let matcher = TeamMatcher::new();
        let task = node("T001", "alpha", 0, false);
        let mut capacities = BTreeMap::new();
        capacities.insert("beta".to_string(), team("beta", 4, 0));
        let ranked = matcher.find_best_matches(&task, &capacities, Some("beta"), 10, 0.5);
        assert!(ranked.is_empty());
    }
}
