//! Coordinator configuration.
//!
//! All knobs recognized by the coordination core, grouped by subsystem.
//! `CoordinatorConfig::validate` is called eagerly at manager construction;
//! a bad field fails with `CoordError::Configuration` naming the field.

use serde::{Deserialize, Serialize};

use crate::error::{CoordError, Result};

/// Work-stealing knobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkStealingConfig {
    /// Master switch for the whole engine.
    pub enabled: bool,
    /// Utilization above which a team counts as a bottleneck.
    pub utilization_threshold: f64,
    /// Utilization spread that triggers rebalancing.
    pub imbalance_threshold: f64,
    /// Floor on `expected_benefit` for reactive transfers.
    pub minimum_transfer_benefit: f64,
    /// Hard cap on transfers per coordination pass.
    pub max_transfers_per_wave: usize,
    /// Candidates below this skill match are discarded (emergency lowers
    /// the floor to 0.3).
    pub skill_match_threshold: f64,
    /// Weight of coordination overhead in composite ranking.
    pub coordination_overhead_weight: f64,
    pub proactive_stealing_enabled: bool,
    pub emergency_stealing_enabled: bool,
    /// Approval wait budget; expiry rejects the transfer.
    pub approval_timeout_ms: u64,
}

impl Default for WorkStealingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            utilization_threshold: 0.8,
            imbalance_threshold: 0.3,
            minimum_transfer_benefit: 0.2,
            max_transfers_per_wave: 5,
            skill_match_threshold: 0.5,
            coordination_overhead_weight: 0.3,
            proactive_stealing_enabled: true,
            emergency_stealing_enabled: true,
            approval_timeout_ms: 30_000,
        }
    }
}

/// Wave boundary shape constraints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundaryConstraints {
    /// Maximum tasks in one wave.
    pub max_wave_size: usize,
    /// Floor on per-team utilization before a wave counts as wasteful.
    pub min_team_utilization: f64,
    /// Ceiling on the coordination sub-score cost of a wave.
    pub max_coordination_overhead: f64,
    /// Fraction of critical-path length added to estimated end times.
    pub critical_path_buffer: f64,
    /// Parallelism above which a split is considered.
    pub parallelism_threshold: usize,
}

impl Default for BoundaryConstraints {
    fn default() -> Self {
        Self {
            max_wave_size: 10,
            min_team_utilization: 0.3,
            max_coordination_overhead: 0.7,
            critical_path_buffer: 0.2,
            parallelism_threshold: 8,
        }
    }
}

/// Boundary-scoring objective weights. They need not sum to 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectiveWeights {
    pub throughput: f64,
    pub coordination: f64,
    pub risk: f64,
    pub balance: f64,
}

impl Default for ObjectiveWeights {
    fn default() -> Self {
        Self {
            throughput: 0.4,
            coordination: 0.3,
            risk: 0.2,
            balance: 0.1,
        }
    }
}

/// Top-level coordinator configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Periodic tick cadence in milliseconds (≥ 1000).
    pub update_interval_ms: u64,
    /// Throughput floor below which the optimization pass triggers.
    pub optimization_threshold: f64,
    /// Planning horizon in waves (≥ 1).
    pub max_wave_lookahead: usize,
    /// Enable periodic boundary recalculation.
    pub adaptive_boundaries: bool,
    /// Auto-promote freshly ready tasks toward earlier waves.
    pub real_time_promotions: bool,
    /// Enable the bounded rollback stack.
    pub rollback_on_failure: bool,
    pub work_stealing: WorkStealingConfig,
    pub boundary: BoundaryConstraints,
    pub weights: ObjectiveWeights,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            update_interval_ms: 30_000,
            optimization_threshold: 0.5,
            max_wave_lookahead: 3,
            adaptive_boundaries: true,
            real_time_promotions: true,
            rollback_on_failure: true,
            work_stealing: WorkStealingConfig::default(),
            boundary: BoundaryConstraints::default(),
            weights: ObjectiveWeights::default(),
        }
    }
}

fn unit_interval(name: &str, value: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&value) || value.is_nan() {
        return Err(CoordError::Configuration(format!(
            "{name} must be in [0, 1], got {value}"
        )));
    }
    Ok(())
}

impl CoordinatorConfig {
    /// Validate every field, naming the first offender.
    pub fn validate(&self) -> Result<()> {
        if self.update_interval_ms < 1000 {
            return Err(CoordError::Configuration(format!(
                "update_interval_ms must be >= 1000, got {}",
                self.update_interval_ms
            )));
        }
        unit_interval("optimization_threshold", self.optimization_threshold)?;
        if self.max_wave_lookahead == 0 {
            return Err(CoordError::Configuration(
                "max_wave_lookahead must be >= 1".to_string(),
            ));
        }

        let ws = &self.work_stealing;
        unit_interval("utilization_threshold", ws.utilization_threshold)?;
        unit_interval("imbalance_threshold", ws.imbalance_threshold)?;
        unit_interval("skill_match_threshold", ws.skill_match_threshold)?;
        unit_interval(
            "coordination_overhead_weight",
            ws.coordination_overhead_weight,
        )?;
        if ws.minimum_transfer_benefit < 0.0 || ws.minimum_transfer_benefit.is_nan() {
            return Err(CoordError::Configuration(format!(
                "minimum_transfer_benefit must be >= 0, got {}",
                ws.minimum_transfer_benefit
            )));
        }
        if ws.max_transfers_per_wave == 0 {
            return Err(CoordError::Configuration(
                "max_transfers_per_wave must be >= 1".to_string(),
            ));
        }
        if ws.approval_timeout_ms == 0 {
            return Err(CoordError::Configuration(
                "approval_timeout_ms must be > 0".to_string(),
            ));
        }

        let b = &self.boundary;
        if b.max_wave_size == 0 {
            return Err(CoordError::Configuration(
                "max_wave_size must be >= 1".to_string(),
            ));
        }
        unit_interval("min_team_utilization", b.min_team_utilization)?;
        unit_interval("max_coordination_overhead", b.max_coordination_overhead)?;
        if b.critical_path_buffer < 0.0 || b.critical_path_buffer.is_nan() {
            return Err(CoordError::Configuration(format!(
                "critical_path_buffer must be >= 0, got {}",
                b.critical_path_buffer
            )));
        }

        let w = &self.weights;
        unit_interval("weights.throughput", w.throughput)?;
        unit_interval("weights.coordination", w.coordination)?;
        unit_interval("weights.risk", w.risk)?;
        unit_interval("weights.balance", w.balance)?;

        Ok(())
    }
}
