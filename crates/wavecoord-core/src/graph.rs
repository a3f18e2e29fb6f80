//! Task dependency tracking and DAG analysis.
//!
//! Owns the task DAG as an arena of nodes indexed by id; forward and
//! reverse adjacency are plain id lists, so there are no owning cycles.
//! Construction validates referential integrity and acyclicity; afterwards
//! the only mutations are state transitions, team reassignment, and the
//! derived analysis (critical path, blocking factors).

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::task::{TaskRecord, TaskState};
use crate::error::{CoordError, Result};

/// Default effort model: one unit plus half a unit per acceptance
/// criterion. Swap in your own via [`DependencyTracker::build_with_effort`].
pub fn default_effort(task: &TaskRecord) -> f64 {
    1.0 + 0.5 * task.acceptance.len() as f64
}

/// One task inside the DAG.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyNode {
    pub task_id: String,
    /// Ids this node depends on (reverse edges).
    pub depends_on: Vec<String>,
    /// Ids depending on this node (forward edges).
    pub depended_by: Vec<String>,
    pub state: TaskState,
    pub wave: u32,
    pub team: String,
    /// Positive effort estimate used as path weight.
    pub estimated_effort: f64,
    /// Declared criticality flag from the task record.
    pub critical: bool,
    /// Whether the node sits on the computed critical path.
    pub on_critical_path: bool,
    /// Number of tasks transitively blocked if this node never completes.
    pub blocking_factor: usize,
}

/// Serializable deep copy of the DAG (nodes + edges + states).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub nodes: BTreeMap<String, DependencyNode>,
}

/// The dependency tracker: DAG queries, analysis, and state transitions.
#[derive(Debug, Clone, Default)]
pub struct DependencyTracker {
    nodes: BTreeMap<String, DependencyNode>,
    critical_path: Vec<String>,
    critical_path_length: f64,
}

impl DependencyTracker {
    /// Build the DAG from a task list using the default effort model.
    pub fn build(tasks: &[TaskRecord]) -> Result<Self> {
        Self::build_with_effort(tasks, default_effort)
    }

    /// Build the DAG, deriving each node's effort from `effort`.
    ///
    /// Fails with `DependencyViolation` when a task references an unknown
    /// dependency, `WaveOrderViolation` when an edge runs backwards across
    /// waves, and `DependencyCycle` (with the full cycle path) when the
    /// graph is not acyclic. Nothing is retained on failure.
    pub fn build_with_effort(
        tasks: &[TaskRecord],
        effort: impl Fn(&TaskRecord) -> f64,
    ) -> Result<Self> {
        let ids: BTreeSet<&str> = tasks.iter().map(|t| t.id.as_str()).collect();

        let mut nodes: BTreeMap<String, DependencyNode> = BTreeMap::new();
        for task in tasks {
            for dep in &task.depends_on {
                if !ids.contains(dep.as_str()) {
                    return Err(CoordError::DependencyViolation {
                        task: task.id.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
            nodes.insert(
                task.id.clone(),
                DependencyNode {
                    task_id: task.id.clone(),
                    depends_on: task.depends_on.clone(),
                    depended_by: Vec::new(),
                    state: TaskState::Waiting,
                    wave: task.wave,
                    team: task.team.clone(),
                    estimated_effort: effort(task).max(f64::MIN_POSITIVE),
                    critical: task.critical,
                    on_critical_path: false,
                    blocking_factor: 0,
                },
            );
        }

        // Reverse edges, then wave monotonicity along each edge.
        let edges: Vec<(String, String)> = nodes
            .values()
            .flat_map(|n| {
                n.depends_on
                    .iter()
                    .map(|d| (d.clone(), n.task_id.clone()))
                    .collect::<Vec<_>>()
            })
            .collect();
        for (dep, dependent) in &edges {
            let dep_wave = nodes[dep].wave;
            let node_wave = nodes[dependent].wave;
            if dep_wave > node_wave {
                return Err(CoordError::WaveOrderViolation {
                    task: dependent.clone(),
                    task_wave: node_wave,
                    dependency: dep.clone(),
                    dependency_wave: dep_wave,
                });
            }
            nodes
                .get_mut(dep)
                .expect("edge source validated above")
                .depended_by
                .push(dependent.clone());
        }
        for node in nodes.values_mut() {
            node.depended_by.sort();
            node.depended_by.dedup();
        }

        let mut tracker = Self {
            nodes,
            critical_path: Vec::new(),
            critical_path_length: 0.0,
        };
        if let Some(cycle) = tracker.find_cycle() {
            return Err(CoordError::DependencyCycle { path: cycle });
        }
        tracker.recompute_analysis();
        debug!(
            tasks = tracker.nodes.len(),
            critical_path_length = tracker.critical_path_length,
            "dependency graph built"
        );
        Ok(tracker)
    }

    // -- queries ------------------------------------------------------------

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, task_id: &str) -> bool {
        self.nodes.contains_key(task_id)
    }

    pub fn node(&self, task_id: &str) -> Result<&DependencyNode> {
        self.nodes
            .get(task_id)
            .ok_or_else(|| CoordError::UnknownTask(task_id.to_string()))
    }

    /// All nodes in id order.
    pub fn nodes(&self) -> impl Iterator<Item = &DependencyNode> {
        self.nodes.values()
    }

    /// Current state of every task, in id order.
    pub fn states(&self) -> Vec<TaskState> {
        self.nodes.values().map(|n| n.state).collect()
    }

    /// Ids currently in `Ready`, sorted.
    pub fn ready_set(&self) -> Vec<String> {
        self.nodes
            .values()
            .filter(|n| n.state == TaskState::Ready)
            .map(|n| n.task_id.clone())
            .collect()
    }

    /// Ids that could run now: `Ready`, or still `Waiting` with every
    /// dependency `Completed`. Sorted. This is the planning frontier the
    /// boundary calculator packs from.
    pub fn available_set(&self) -> Vec<String> {
        self.nodes
            .values()
            .filter(|n| match n.state {
                TaskState::Ready => true,
                TaskState::Waiting => self.deps_satisfied(n),
                _ => false,
            })
            .map(|n| n.task_id.clone())
            .collect()
    }

    /// `Waiting` ids whose dependencies are all `Completed` (promotion
    /// candidates), sorted.
    pub fn promotable_set(&self) -> Vec<String> {
        self.nodes
            .values()
            .filter(|n| n.state == TaskState::Waiting && self.deps_satisfied(n))
            .map(|n| n.task_id.clone())
            .collect()
    }

    fn deps_satisfied(&self, node: &DependencyNode) -> bool {
        node.depends_on
            .iter()
            .all(|d| matches!(self.nodes.get(d).map(|n| n.state), Some(TaskState::Completed)))
    }

    /// Deep copy of nodes, edges, and states.
    pub fn snapshot(&self) -> GraphSnapshot {
        GraphSnapshot {
            nodes: self.nodes.clone(),
        }
    }

    /// Replace the graph with a snapshot and recompute the analysis.
    pub fn restore(&mut self, snapshot: GraphSnapshot) {
        self.nodes = snapshot.nodes;
        self.recompute_analysis();
    }

    /// Copy states (and team assignments) from a snapshot for ids present
    /// in both graphs. Used to rehydrate a freshly built graph from
    /// persisted state; ids only one side knows are left alone.
    pub fn restore_states(&mut self, snapshot: &GraphSnapshot) {
        for (id, persisted) in &snapshot.nodes {
            if let Some(node) = self.nodes.get_mut(id) {
                node.state = persisted.state;
                node.team = persisted.team.clone();
            }
        }
    }

    /// Critical path ids (dependency order) and its total effort.
    pub fn critical_path(&self) -> (&[String], f64) {
        (&self.critical_path, self.critical_path_length)
    }

    // -- mutations ----------------------------------------------------------

    /// Apply a state transition.
    ///
    /// Returns the ids of forward neighbors that became eligible through
    /// this completion: still-`Waiting` tasks whose dependencies are now
    /// all `Completed`, each exactly once, sorted. Empty for non-completing
    /// transitions. The caller decides whether to promote them to `Ready`.
    pub fn apply_transition(&mut self, task_id: &str, to: TaskState) -> Result<Vec<String>> {
        let node = self
            .nodes
            .get(task_id)
            .ok_or_else(|| CoordError::UnknownTask(task_id.to_string()))?;
        let from = node.state;
        if !from.can_transition_to(to) {
            return Err(CoordError::IllegalTransition {
                task: task_id.to_string(),
                from,
                to,
            });
        }
        // Ready requires every dependency completed, from any source state.
        if to == TaskState::Ready && !self.deps_satisfied(node) {
            let unmet = node
                .depends_on
                .iter()
                .find(|d| {
                    !matches!(
                        self.nodes.get(d.as_str()).map(|n| n.state),
                        Some(TaskState::Completed)
                    )
                })
                .cloned()
                .unwrap_or_default();
            return Err(CoordError::DependencyViolation {
                task: task_id.to_string(),
                dependency: unmet,
            });
        }

        self.nodes
            .get_mut(task_id)
            .expect("node presence checked above")
            .state = to;
        debug!(task = task_id, %from, %to, "task transition");

        if to != TaskState::Completed {
            return Ok(Vec::new());
        }

        let forward = self.nodes[task_id].depended_by.clone();
        let mut newly_ready: Vec<String> = forward
            .into_iter()
            .filter(|id| {
                let n = &self.nodes[id];
                n.state == TaskState::Waiting && self.deps_satisfied(n)
            })
            .collect();
        newly_ready.sort();
        newly_ready.dedup();
        Ok(newly_ready)
    }

    /// Reassign the owning team of a task.
    pub fn set_team(&mut self, task_id: &str, team: &str) -> Result<()> {
        let node = self
            .nodes
            .get_mut(task_id)
            .ok_or_else(|| CoordError::UnknownTask(task_id.to_string()))?;
        node.team = team.to_string();
        Ok(())
    }

    /// Move a task to another wave, keeping edge wave-monotonicity.
    pub fn set_wave(&mut self, task_id: &str, wave: u32) -> Result<()> {
        let node = self
            .nodes
            .get(task_id)
            .ok_or_else(|| CoordError::UnknownTask(task_id.to_string()))?;
        for dep in &node.depends_on {
            let dep_wave = self.nodes[dep].wave;
            if dep_wave > wave {
                return Err(CoordError::WaveOrderViolation {
                    task: task_id.to_string(),
                    task_wave: wave,
                    dependency: dep.clone(),
                    dependency_wave: dep_wave,
                });
            }
        }
        for dependent in &node.depended_by.clone() {
            let dependent_wave = self.nodes[dependent].wave;
            if wave > dependent_wave {
                return Err(CoordError::WaveOrderViolation {
                    task: dependent.clone(),
                    task_wave: dependent_wave,
                    dependency: task_id.to_string(),
                    dependency_wave: wave,
                });
            }
        }
        self.nodes
            .get_mut(task_id)
            .expect("node presence checked above")
            .wave = wave;
        Ok(())
    }

    // -- analysis -----------------------------------------------------------

    /// Level of each node: 1 for roots, `1 + max(level of deps)` otherwise.
    /// Nodes on the same level can run concurrently, capacity permitting.
    pub fn parallel_levels(&self) -> BTreeMap<String, u32> {
        let order = self.topo_order();
        let mut levels: BTreeMap<String, u32> = BTreeMap::new();
        for id in &order {
            let node = &self.nodes[id];
            let level = node
                .depends_on
                .iter()
                .filter_map(|d| levels.get(d))
                .max()
                .copied()
                .unwrap_or(0)
                + 1;
            levels.insert(id.clone(), level);
        }
        levels
    }

    /// Recompute blocking factors and the critical path. Called at build
    /// and after `restore`; transitions do not change either.
    pub fn recompute_analysis(&mut self) {
        self.compute_blocking_factors();
        self.compute_critical_path();
    }

    /// Blocking factor of each node: the size of its transitive forward
    /// closure. Memoized over shared sets so diamonds are counted once.
    fn compute_blocking_factors(&mut self) {
        let mut memo: HashMap<String, BTreeSet<String>> = HashMap::new();
        let ids: Vec<String> = self.nodes.keys().cloned().collect();
        for id in &ids {
            let mut visiting = BTreeSet::new();
            self.forward_closure(id, &mut memo, &mut visiting);
        }
        for id in ids {
            let factor = memo.get(&id).map(|s| s.len()).unwrap_or(0);
            self.nodes
                .get_mut(&id)
                .expect("iterating existing ids")
                .blocking_factor = factor;
        }
    }

    fn forward_closure(
        &self,
        id: &str,
        memo: &mut HashMap<String, BTreeSet<String>>,
        visiting: &mut BTreeSet<String>,
    ) -> BTreeSet<String> {
        if let Some(cached) = memo.get(id) {
            return cached.clone();
        }
        // Post-validation the graph is acyclic; short-circuit anyway.
        if !visiting.insert(id.to_string()) {
            return BTreeSet::new();
        }
        let mut closure = BTreeSet::new();
        for dependent in &self.nodes[id].depended_by {
            closure.insert(dependent.clone());
            closure.extend(self.forward_closure(dependent, memo, visiting));
        }
        visiting.remove(id);
        memo.insert(id.to_string(), closure.clone());
        closure
    }

    /// Longest path through the DAG over Kahn's topological order, node
    /// weight = `estimated_effort`. Ties break toward the lexicographically
    /// lower id so results are deterministic. Flags `on_critical_path`.
    fn compute_critical_path(&mut self) {
        for node in self.nodes.values_mut() {
            node.on_critical_path = false;
        }
        self.critical_path.clear();
        self.critical_path_length = 0.0;
        if self.nodes.is_empty() {
            return;
        }

        let order = self.topo_order();
        let mut dist: BTreeMap<&str, f64> = BTreeMap::new();
        let mut pred: BTreeMap<&str, Option<&str>> = BTreeMap::new();

        for id in &order {
            let node = &self.nodes[id];
            let mut best: f64 = 0.0;
            let mut best_pred: Option<&str> = None;
            for dep in &node.depends_on {
                let d = dist[dep.as_str()];
                let better = d > best
                    || (d == best
                        && best_pred.map_or(true, |current| dep.as_str() < current));
                if best_pred.is_none() || better {
                    best = d;
                    best_pred = Some(dep.as_str());
                }
            }
            dist.insert(id.as_str(), best + node.estimated_effort);
            pred.insert(id.as_str(), best_pred);
        }

        let mut end: Option<&str> = None;
        for id in &order {
            let d = dist[id.as_str()];
            match end {
                None => end = Some(id.as_str()),
                Some(current) => {
                    if d > dist[current] || (d == dist[current] && id.as_str() < current) {
                        end = Some(id.as_str());
                    }
                }
            }
        }

        let mut path: Vec<String> = Vec::new();
        let mut cursor = end;
        while let Some(id) = cursor {
            path.push(id.to_string());
            cursor = pred[id];
        }
        path.reverse();

        self.critical_path_length = end.map(|id| dist[id]).unwrap_or(0.0);
        for id in &path {
            self.nodes
                .get_mut(id)
                .expect("path ids come from the graph")
                .on_critical_path = true;
        }
        self.critical_path = path;
    }

    /// Deterministic Kahn topological order (ready queue kept sorted).
    fn topo_order(&self) -> Vec<String> {
        let mut in_degree: BTreeMap<&str, usize> = self
            .nodes
            .values()
            .map(|n| (n.task_id.as_str(), n.depends_on.len()))
            .collect();
        let mut queue: VecDeque<&str> = in_degree
            .iter()
            .filter(|(_, deg)| **deg == 0)
            .map(|(id, _)| *id)
            .collect();

        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(id) = queue.pop_front() {
            order.push(id.to_string());
            let mut next: Vec<&str> = Vec::new();
            for dependent in &self.nodes[id].depended_by {
                let deg = in_degree
                    .get_mut(dependent.as_str())
                    .expect("dependent is a known node");
                *deg -= 1;
                if *deg == 0 {
                    next.push(dependent.as_str());
                }
            }
            next.sort_unstable();
            queue.extend(next);
        }
        order
    }

    /// DFS with white/gray/black coloring; returns the full cycle path
    /// (first node repeated at the end) when one exists.
    fn find_cycle(&self) -> Option<Vec<String>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Color {
            White,
            Gray,
            Black,
        }

        let mut colors: BTreeMap<&str, Color> = self
            .nodes
            .keys()
            .map(|id| (id.as_str(), Color::White))
            .collect();

        fn visit<'a>(
            nodes: &'a BTreeMap<String, DependencyNode>,
            id: &'a str,
            colors: &mut BTreeMap<&'a str, Color>,
            stack: &mut Vec<&'a str>,
        ) -> Option<Vec<String>> {
            colors.insert(id, Color::Gray);
            stack.push(id);
            for dependent in &nodes[id].depended_by {
                match colors[dependent.as_str()] {
                    Color::Gray => {
                        let start = stack
                            .iter()
                            .position(|s| *s == dependent.as_str())
                            .expect("gray node is on the stack");
                        let mut cycle: Vec<String> =
                            stack[start..].iter().map(|s| s.to_string()).collect();
                        cycle.push(dependent.clone());
                        return Some(cycle);
                    }
                    Color::White => {
                        if let Some(cycle) = visit(nodes, dependent, colors, stack) {
                            return Some(cycle);
                        }
                    }
                    Color::Black => {}
                }
            }
            stack.pop();
            colors.insert(id, Color::Black);
            None
        }

        let ids: Vec<&str> = self.nodes.keys().map(|s| s.as_str()).collect();
        for id in ids {
            if colors[id] == Color::White {
                let mut stack = Vec::new();
                if let Some(cycle) = visit(&self.nodes, id, &mut colors, &mut stack) {
                    return Some(cycle);
                }
            }
        }
        None
    }
}
