//! Domain model of the coordination core: tasks and their state machine,
//! team capacity, wave boundaries, and the frontier state record.

pub mod boundary;
pub mod task;
pub mod team;

pub use boundary::{FrontierState, WaveBoundary};
pub use task::{TaskRecord, TaskState};
pub use team::{TaskRequirement, TeamCapacity, TeamSkill};
