//! Typed coordination events and the bounded in-memory history.
//!
//! Every observable transition of the coordinator emits one of these.
//! Events convert into the wire-level [`EventRecord`] for the `Notifier`
//! port; the manager also keeps the last [`EVENT_HISTORY_CAP`] records
//! in memory for introspection.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use frontier_state::EventRecord;

/// Maximum events retained in the in-memory history.
pub const EVENT_HISTORY_CAP: usize = 100;

/// Observable coordinator transitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CoordinationEvent {
    FrontierInitialized {
        plan_id: String,
        coordination_version: u64,
        boundary_count: usize,
    },
    BoundaryAdjusted {
        coordination_version: u64,
        boundary_count: usize,
    },
    TaskPromoted {
        task_id: String,
        wave: u32,
    },
    OptimizationApplied {
        action: String,
        target: String,
    },
    RollbackExecuted {
        restored_version: u64,
    },
    FrontierShutdown {
        coordination_version: u64,
    },
}

impl CoordinationEvent {
    /// Stable event name, matching the serialized `kind` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            CoordinationEvent::FrontierInitialized { .. } => "frontier_initialized",
            CoordinationEvent::BoundaryAdjusted { .. } => "boundary_adjusted",
            CoordinationEvent::TaskPromoted { .. } => "task_promoted",
            CoordinationEvent::OptimizationApplied { .. } => "optimization_applied",
            CoordinationEvent::RollbackExecuted { .. } => "rollback_executed",
            CoordinationEvent::FrontierShutdown { .. } => "frontier_shutdown",
        }
    }

    /// Convert to the wire record delivered through the notification port.
    pub fn to_record(&self, timestamp: DateTime<Utc>) -> EventRecord {
        let payload = serde_json::to_value(self).unwrap_or(serde_json::Value::Null);
        EventRecord {
            kind: self.kind().to_string(),
            payload,
            timestamp,
        }
    }
}

/// Bounded FIFO of delivered event records.
#[derive(Debug, Default)]
pub struct EventHistory {
    records: VecDeque<EventRecord>,
}

impl EventHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record, evicting the oldest past the cap.
    pub fn push(&mut self, record: EventRecord) {
        if self.records.len() == EVENT_HISTORY_CAP {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    /// All retained records, oldest first.
    pub fn records(&self) -> Vec<EventRecord> {
        self.records.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_matches_serialized_tag() {
        let event = CoordinationEvent::TaskPromoted {
            task_id: "T001".to_string(),
            wave: 2,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["kind"], "task_promoted");
        assert_eq!(event.kind(), "task_promoted");
    }

    #[test]
    fn test_to_record_carries_payload_fields() {
        let event = CoordinationEvent::RollbackExecuted {
            restored_version: 9,
        };
        let record = event.to_record(Utc::now());
        assert_eq!(record.kind, "rollback_executed");
        assert_eq!(record.payload["restored_version"], 9);
    }

    #[test]
    fn test_history_is_capped() {
        let mut history = EventHistory::new();
        for i in 0..(EVENT_HISTORY_CAP + 20) {
            let event = CoordinationEvent::TaskPromoted {
                task_id: format!("T{i:03}"),
                wave: 1,
            };
            history.push(event.to_record(Utc::now()));
        }
        assert_eq!(history.len(), EVENT_HISTORY_CAP);
        // Oldest 20 were evicted.
        let first = &history.records()[0];
        assert_eq!(first.payload["task_id"], "T020");
    }
}
