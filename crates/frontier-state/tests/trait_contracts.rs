//! Contract tests for the port traits, run against the in-memory fakes
//! and the filesystem store through trait objects; any future backend
//! must pass the same assertions.

use std::sync::Arc;

use chrono::Utc;

use frontier_state::fakes::*;
use frontier_state::{
    AssignmentSink, CapacitySource, CheckConclusion, CiSignalSource, CoordinationLock,
    EventRecord, Notifier, StateEnvelope, StatePersistence, StateStoreError, TaskRecord,
    TaskSource, TeamCapacity, TeamSkill,
};

fn envelope(plan: &str, version: u64) -> StateEnvelope {
    StateEnvelope::seal(
        plan,
        version,
        Utc::now(),
        serde_json::json!({"boundaries": [], "version": version}),
    )
    .unwrap()
}

#[tokio::test]
async fn test_task_source_returns_the_seeded_plan() {
    let record = TaskRecord {
        id: "T001".to_string(),
        title: "Seed".to_string(),
        wave: 1,
        team: "alpha".to_string(),
        depends_on: vec![],
        acceptance: vec![],
        critical: false,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    };
    let source: Arc<dyn TaskSource> = Arc::new(StaticTaskSource::new(vec![record.clone()]));
    let tasks = source.fetch_tasks().await.unwrap();
    assert_eq!(tasks, vec![record]);
}

#[tokio::test]
async fn test_capacity_source_contract() {
    let fake = StaticCapacitySource::new();
    fake.set_capacity(TeamCapacity {
        team_id: "alpha".to_string(),
        max_concurrent_tasks: 4,
        current_load: 1,
        velocity: 1.2,
        efficiency: 0.9,
        availability: 1.0,
        specializations: vec!["backend".to_string()],
    });
    fake.set_skills(
        "alpha",
        vec![TeamSkill {
            skill_id: "rust".to_string(),
            proficiency: 0.8,
            availability: 1.0,
        }],
    );
    let source: Arc<dyn CapacitySource> = Arc::new(fake);

    assert_eq!(source.all_teams().await.unwrap(), vec!["alpha".to_string()]);
    let capacity = source.team_capacity("alpha").await.unwrap();
    assert_eq!(capacity.available_slots(), 3);
    assert_eq!(source.team_skills("alpha").await.unwrap().len(), 1);
    // Unknown skills are empty, unknown teams are errors.
    assert!(source.team_skills("beta").await.unwrap().is_empty());
    assert!(matches!(
        source.team_capacity("beta").await,
        Err(StateStoreError::TeamNotFound { .. })
    ));
}

#[tokio::test]
async fn test_lock_contract_mutual_exclusion_and_reuse() {
    let lock: Arc<dyn CoordinationLock> = Arc::new(MemoryCoordinationLock::new());
    let held = lock.acquire("T001").await.unwrap();

    // Second acquire fails fast; unrelated tasks are unaffected.
    assert!(matches!(
        lock.acquire("T001").await,
        Err(StateStoreError::LockHeld { .. })
    ));
    let other = lock.acquire("T002").await.unwrap();

    lock.release(&held).await.unwrap();
    lock.acquire("T001").await.unwrap();

    // Double release of the same id is an error.
    lock.release(&other).await.unwrap();
    assert!(matches!(
        lock.release(&other).await,
        Err(StateStoreError::UnknownLock { .. })
    ));
}

#[tokio::test]
async fn test_assignment_sink_contract_records_and_rolls_back() {
    let sink = Arc::new(MemoryAssignmentSink::new());
    let port: Arc<dyn AssignmentSink> = Arc::clone(&sink) as Arc<dyn AssignmentSink>;
    port.update_task_assignment("T001", "beta").await.unwrap();
    assert_eq!(sink.assigned_team("T001").as_deref(), Some("beta"));
    port.rollback_transfer("T001", "alpha").await.unwrap();
    assert_eq!(sink.assigned_team("T001").as_deref(), Some("alpha"));
    assert_eq!(sink.updates().len(), 1);
    assert_eq!(sink.rollbacks().len(), 1);
}

#[tokio::test]
async fn test_notifier_preserves_delivery_order() {
    let recorder = Arc::new(RecordingNotifier::new());
    let port: Arc<dyn Notifier> = Arc::clone(&recorder) as Arc<dyn Notifier>;
    for kind in ["frontier_initialized", "task_promoted", "frontier_shutdown"] {
        port.notify(&EventRecord {
            kind: kind.to_string(),
            payload: serde_json::json!({}),
            timestamp: Utc::now(),
        })
        .await
        .unwrap();
    }
    assert_eq!(
        recorder.kinds(),
        vec![
            "frontier_initialized".to_string(),
            "task_promoted".to_string(),
            "frontier_shutdown".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_ci_signal_source_contract() {
    let fake = StaticCiSignals::new();
    fake.set_signal("T001", CheckConclusion::Success, 4);
    let port: Arc<dyn CiSignalSource> = Arc::new(fake);
    assert_eq!(
        port.latest_conclusion("T001").await.unwrap(),
        Some(CheckConclusion::Success)
    );
    assert_eq!(port.check_run_count("T001").await.unwrap(), 4);
    assert_eq!(port.latest_conclusion("ghost").await.unwrap(), None);
    assert_eq!(port.check_run_count("ghost").await.unwrap(), 0);
}

#[tokio::test]
async fn test_persistence_contract_holds_for_memory_and_file_backends() {
    let dir = tempfile::tempdir().unwrap();
    let backends: Vec<Arc<dyn StatePersistence>> = vec![
        Arc::new(MemoryStateStore::new()),
        Arc::new(frontier_state::JsonFileStateStore::new(dir.path().join("state.json")).unwrap()),
    ];

    for backend in backends {
        assert!(backend.load_state().await.unwrap().is_none());
        backend.save_state(&envelope("plan-c", 1)).await.unwrap();
        backend.save_state(&envelope("plan-c", 2)).await.unwrap();
        let loaded = backend.load_state().await.unwrap().unwrap();
        assert_eq!(loaded.coordination_version, 2);
        loaded.verify_digest().unwrap();
        loaded.check_plan("plan-c").unwrap();
    }
}
