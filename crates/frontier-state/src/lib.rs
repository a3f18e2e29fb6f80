//! frontier-state
//!
//! Port traits and persisted state for the WaveCoord coordination core:
//! - `ports`: the async seams to external collaborators (task source,
//!   capacity source, assignment sink, lock, approval, persistence,
//!   notification, CI signals)
//! - `snapshot`: the self-describing persisted state envelope
//! - `fakes`: in-memory implementations for testing
//! - `fs_store`: a JSON-file persistence adapter

pub mod error;
pub mod fakes;
pub mod fs_store;
pub mod ports;
pub mod snapshot;

pub use error::{StateResult, StateStoreError};
pub use fs_store::JsonFileStateStore;
pub use ports::{
    AssignmentSink, CapacitySource, CheckConclusion, CiSignalSource, CoordinationLock, EventRecord,
    LockId, Notifier, StatePersistence, TaskRecord, TaskSource, TeamCapacity, TeamSkill,
    TransferApproval, TransferRequest,
};
pub use snapshot::{restore_envelope, StateDigest, StateEnvelope, ENVELOPE_SCHEMA_VERSION};
