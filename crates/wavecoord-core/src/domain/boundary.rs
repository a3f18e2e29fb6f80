//! Wave boundaries and the owned frontier state record.
//!
//! Boundaries are derived objects: the calculator replaces them atomically.
//! `FrontierState` is owned exclusively by the Rolling Frontier Manager;
//! every external observer gets a deep copy.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use frontier_state::{StateEnvelope, TeamCapacity};

use crate::error::Result;
use crate::frontier::optimizer::Optimization;
use crate::graph::GraphSnapshot;
use crate::metrics::FrontierMetrics;

/// One planned wave: which tasks run, which teams advance together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaveBoundary {
    /// Wave number (≥ 1).
    pub wave: u32,
    pub start: DateTime<Utc>,
    /// Always after `start`.
    pub estimated_end: DateTime<Utc>,
    /// Ordered set of task ids; a task appears in at most one boundary.
    pub tasks: Vec<String>,
    /// Union of the owning teams of `tasks`.
    pub teams: BTreeSet<String>,
    /// How ready the wave is to start, in [0,1].
    pub readiness_score: f64,
    /// Critical-path effort through the wave's tasks.
    pub critical_path_length: f64,
}

impl WaveBoundary {
    /// Parallelism is the task count.
    pub fn parallelism(&self) -> usize {
        self.tasks.len()
    }

    /// Tasks per owning team.
    pub fn team_counts(&self, graph: &GraphSnapshot) -> BTreeMap<String, usize> {
        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        for task in &self.tasks {
            if let Some(node) = graph.nodes.get(task) {
                *counts.entry(node.team.clone()).or_default() += 1;
            }
        }
        counts
    }
}

/// The complete coordinator-owned state: current boundaries, aggregate
/// metrics, parked optimizations, DAG snapshot, and team capacities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrontierState {
    pub plan_id: String,
    pub boundaries: Vec<WaveBoundary>,
    pub metrics: FrontierMetrics,
    pub pending_optimizations: Vec<Optimization>,
    pub graph: GraphSnapshot,
    pub capacities: BTreeMap<String, TeamCapacity>,
    pub last_update: DateTime<Utc>,
    /// Strictly increases across successful mutations.
    pub coordination_version: u64,
}

impl FrontierState {
    /// Fresh state at version 0 (the first mutation bumps to 1).
    pub fn new(plan_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            plan_id: plan_id.into(),
            boundaries: Vec::new(),
            metrics: FrontierMetrics::default(),
            pending_optimizations: Vec::new(),
            graph: GraphSnapshot::default(),
            capacities: BTreeMap::new(),
            last_update: now,
            coordination_version: 0,
        }
    }

    /// Index of the boundary containing `task_id`, if planned.
    pub fn boundary_of(&self, task_id: &str) -> Option<usize> {
        self.boundaries
            .iter()
            .position(|b| b.tasks.iter().any(|t| t == task_id))
    }

    /// Serialize into the self-describing persistence envelope.
    pub fn to_envelope(&self) -> Result<StateEnvelope> {
        let payload = serde_json::to_value(self)
            .map_err(|e| frontier_state::StateStoreError::Serialization(e.to_string()))?;
        let envelope = StateEnvelope::seal(
            self.plan_id.clone(),
            self.coordination_version,
            self.last_update,
            payload,
        )?;
        Ok(envelope)
    }

    /// Deserialize from a persisted envelope payload. Fields added by newer
    /// writers are ignored.
    pub fn from_envelope(envelope: &StateEnvelope) -> Result<Self> {
        let state: FrontierState = serde_json::from_value(envelope.payload.clone())
            .map_err(|e| frontier_state::StateStoreError::Serialization(e.to_string()))?;
        Ok(state)
    }
}
