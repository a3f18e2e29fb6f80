//! Work-stealing end-to-end through the manager: the benefit/cost gate,
//! rollback on a failing assignment backend, and the emergency path.

use std::sync::Arc;

use chrono::Utc;

use wavecoord_core::fakes::{
    AutoApproval, MemoryAssignmentSink, MemoryCoordinationLock, MemoryStateStore,
    RecordingNotifier,
};
use wavecoord_core::{
    AssignmentSink, CoordinatorConfig, ManagerPorts, Notifier, RollingFrontierManager,
    StatePersistence, StealReason, TaskRecord, TaskRequirement, TeamCapacity, TeamSkill,
};

fn task(id: &str, team: &str, deps: &[&str], critical: bool) -> TaskRecord {
    TaskRecord {
        id: id.to_string(),
        title: format!("Task {id}"),
        wave: 1,
        team: team.to_string(),
        depends_on: deps.iter().map(|d| d.to_string()).collect(),
        acceptance: vec![],
        critical,
        created_at: Utc::now(),
        updated_at: Utc::now(),
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

struct Rig {
    manager: RollingFrontierManager,
    sink: Arc<MemoryAssignmentSink>,
}

fn rig(config: CoordinatorConfig) -> Rig {
    let sink = Arc::new(MemoryAssignmentSink::new());
    let ports = ManagerPorts {
        persistence: Arc::new(MemoryStateStore::new()) as Arc<dyn StatePersistence>,
        notifier: Arc::new(RecordingNotifier::new()) as Arc<dyn Notifier>,
        assignment: Arc::clone(&sink) as Arc<dyn AssignmentSink>,
        lock: Arc::new(MemoryCoordinationLock::new()),
        approval: Arc::new(AutoApproval::new(true)),
        ci: None,
    };
    Rig {
        manager: RollingFrontierManager::new(config, ports).unwrap(),
        sink,
    }
}

fn quiet_config() -> CoordinatorConfig {
    CoordinatorConfig {
        adaptive_boundaries: false,
        ..CoordinatorConfig::default()
    }
}

#[tokio::test]
async fn test_benefit_over_cost_transfer_is_proposed_and_applied() {
    // From-team at 0.9 utilization, target at 0.3, dependency-free
    // non-critical task: benefit clearly beats cost.
    let rig = rig(quiet_config());
    rig.manager
        .initialize(
            "plan-steal",
            vec![task("T001", "hot", &[], false)],
            vec![team("hot", 10, 9), team("cold", 10, 3)],
        )
        .await
        .unwrap();
    let version_before = rig.manager.get_state().await.unwrap().coordination_version;

    let result = rig.manager.coordinate_wave(1).await;
    assert!(result.success, "errors: {:?}", result.errors);
    assert_eq!(result.completed_transfers, 1);
    assert!(!result.recommendations.is_empty());
    let candidate = &result.recommendations[0].candidate;
    assert!(candidate.expected_benefit > candidate.transfer_cost);

    let state = rig.manager.get_state().await.unwrap();
    assert_eq!(state.capacities["hot"].current_load, 8);
    assert_eq!(state.capacities["cold"].current_load, 4);
    assert_eq!(state.graph.nodes["T001"].team, "cold");
    assert_eq!(rig.manager.transfer_history("T001").len(), 1);
    assert_eq!(rig.sink.assigned_team("T001").as_deref(), Some("cold"));
    assert!(state.coordination_version > version_before);
}

#[tokio::test]
async fn test_failing_assignment_backend_rolls_back_and_reports() {
    let rig = rig(quiet_config());
    rig.manager
        .initialize(
            "plan-steal-fail",
            vec![task("T001", "hot", &[], false)],
            vec![team("hot", 10, 9), team("cold", 10, 3)],
        )
        .await
        .unwrap();
    let version_before = rig.manager.get_state().await.unwrap().coordination_version;
    rig.sink.arm_update_failure();

    let result = rig.manager.coordinate_wave(1).await;
    assert!(!result.success);
    assert!(result.failed_transfers >= 1);
    assert!(!result.errors.is_empty());

    // The rollback port was invoked with the original team, local state
    // reverted, and the coordination version was never bumped.
    assert_eq!(
        rig.sink.rollbacks(),
        vec![("T001".to_string(), "hot".to_string())]
    );
    let state = rig.manager.get_state().await.unwrap();
    assert_eq!(state.coordination_version, version_before);
    assert_eq!(state.graph.nodes["T001"].team, "hot");
    assert_eq!(state.capacities["hot"].current_load, 9);
    assert!(rig.manager.transfer_history("T001").is_empty());
}

#[tokio::test]
async fn test_emergency_saturation_lowers_the_skill_floor() {
    // hot sits at 0.96 utilization with a critical task: the emergency
    // path engages, accepting a 0.4 skill match the reactive path would
    // have discarded.
    let rig = rig(quiet_config());
    rig.manager
        .initialize(
            "plan-emergency",
            vec![
                task("T001", "hot", &[], true),
                task("T002", "hot", &[], false),
                task("T003", "hot", &[], false),
            ],
            vec![team("hot", 25, 24), team("cold", 10, 2)],
        )
        .await
        .unwrap();
    rig.manager
        .set_task_requirements("T002", vec![TaskRequirement::new("infra", 0.4, 1.0)])
        .await;
    rig.manager
        .set_team_skills(
            "cold",
            vec![TeamSkill {
                skill_id: "infra".to_string(),
                proficiency: 0.8,
                availability: 1.0,
            }],
        )
        .await;

    let result = rig.manager.coordinate_wave(1).await;
    assert!(result.success, "errors: {:?}", result.errors);
    assert!(result
        .recommendations
        .iter()
        .all(|r| r.reason == StealReason::Emergency));
    assert!(result.completed_transfers <= 5, "respects the per-wave cap");
    // The weak-but-acceptable 0.4 skill match moved too.
    assert!(result
        .recommendations
        .iter()
        .any(|r| r.candidate.task_id == "T002"));

    let state = rig.manager.get_state().await.unwrap();
    assert_eq!(state.graph.nodes["T002"].team, "cold");
    assert_eq!(
        state.capacities["hot"].current_load,
        24 - result.completed_transfers as u32
    );
}

#[tokio::test]
async fn test_transfers_are_capped_per_wave() {
    let mut config = quiet_config();
    config.work_stealing.max_transfers_per_wave = 2;
    let rig = rig(config);
    rig.manager
        .initialize(
            "plan-cap",
            vec![
                task("T001", "hot", &[], false),
                task("T002", "hot", &[], false),
                task("T003", "hot", &[], false),
                task("T004", "hot", &[], false),
            ],
            vec![team("hot", 10, 9), team("cold", 10, 0)],
        )
        .await
        .unwrap();

    let result = rig.manager.coordinate_wave(1).await;
    assert!(result.recommendations.len() <= 2);
    assert!(result.completed_transfers <= 2);
}

#[tokio::test]
async fn test_disabled_stealing_moves_nothing() {
    let mut config = quiet_config();
    config.work_stealing.enabled = false;
    let rig = rig(config);
    rig.manager
        .initialize(
            "plan-off",
            vec![task("T001", "hot", &[], false)],
            vec![team("hot", 10, 9), team("cold", 10, 0)],
        )
        .await
        .unwrap();

    let result = rig.manager.coordinate_wave(1).await;
    assert!(result.success);
    assert_eq!(result.completed_transfers, 0);
    assert!(result.recommendations.is_empty());
    assert!(rig.sink.updates().is_empty());
}
