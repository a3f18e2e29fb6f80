//! WaveCoord Core Library
//!
//! Coordination core for barrier-synchronized multi-team waves: a typed
//! dependency DAG, a continuously recomputed rolling frontier of wave
//! boundaries, constraint-preserving work stealing, and the metrics that
//! drive both.

pub mod balance;
pub mod config;
pub mod domain;
pub mod error;
pub mod events;
pub mod frontier;
pub mod graph;
pub mod matcher;
pub mod metrics;
pub mod stealing;

pub use balance::{LoadBalancer, StealReason, TransferRecommendation, WaveLoadMetrics};
pub use config::{BoundaryConstraints, CoordinatorConfig, ObjectiveWeights, WorkStealingConfig};
pub use domain::{
    FrontierState, TaskRecord, TaskRequirement, TaskState, TeamCapacity, TeamSkill, WaveBoundary,
};
pub use error::{CoordError, ErrorCode, Result};
pub use events::{CoordinationEvent, EventHistory, EVENT_HISTORY_CAP};
pub use frontier::manager::ManagerPhase;
pub use frontier::{
    FrontierCalculator, ManagerPorts, Optimization, OptimizationAction, OptimizationImpact,
    RollingFrontierManager, Urgency,
};
pub use graph::{DependencyNode, DependencyTracker, GraphSnapshot};
pub use matcher::{TeamMatcher, WorkStealingCandidate};
pub use metrics::FrontierMetrics;
pub use stealing::{TransferRecord, WaveCoordinationResult, WorkStealingEngine};

pub use frontier_state::{
    fakes, AssignmentSink, CapacitySource, CheckConclusion, CiSignalSource, CoordinationLock,
    EventRecord, JsonFileStateStore, LockId, Notifier, StateEnvelope, StatePersistence,
    StateStoreError, TaskSource, TransferApproval, TransferRequest,
};

/// WaveCoord version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
