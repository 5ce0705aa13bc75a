//! End-to-end scenarios for the state engine: scale-up, surplus handling,
//! failure accounting, flex-down, teardown and restart replay.

use std::collections::BTreeMap;
use std::sync::Arc;

use flock_app_master::clock::ManualClock;
use flock_app_master::providers::ProviderRole;
use flock_app_master::state::{AppState, HistoryStore, RmOperation, RoleInstance, StateError};
use flock_model::{priority, Container, ContainerId, ContainerStatus, DefaultRecordFactory, NodeId, Resource};
use flock_spec::{keys, ClusterSpec, InstanceState};
use tempfile::TempDir;

const T0: i64 = 100_000;

fn build_engine(
    roles: &[(&str, u32, u32)],
    options: &[(&str, &str)],
    live_containers: Vec<Container>,
) -> (AppState, Arc<ManualClock>, TempDir) {
    let clock = Arc::new(ManualClock::new(T0));
    let mut state = AppState::new(Arc::new(DefaultRecordFactory), clock.clone());
    state.set_container_limits(8192, 32);

    let mut spec = ClusterSpec::new("test-cluster");
    for (key, value) in options {
        spec.options.insert(key.to_string(), value.to_string());
    }
    let mut provider_roles = Vec::new();
    for (name, id, desired) in roles {
        spec.set_role_opt(*name, keys::ROLE_INSTANCES, desired);
        provider_roles.push(ProviderRole::new(*name, *id, 0));
    }

    let dir = tempfile::tempdir().unwrap();
    let store = HistoryStore::new(dir.path());
    state
        .build_instance(spec, BTreeMap::new(), provider_roles, &store, live_containers)
        .unwrap();
    (state, clock, dir)
}

fn container(id: &str, host: &str, role_id: u32) -> Container {
    Container {
        id: ContainerId::parse(id).unwrap(),
        node: NodeId::new(host, 45454),
        http_address: None,
        resource: Resource::new(256, 1),
        priority: priority::encode(role_id, false).unwrap(),
    }
}

/// Allocates one container, submits its start, and confirms it with the
/// node manager. Panics unless the allocation produced exactly one
/// assignment.
fn assign_and_start(state: &mut AppState, c: Container) -> ContainerId {
    let id = c.id.clone();
    let (assignments, releases) = state.on_containers_allocated(vec![c]);
    assert_eq!(assignments.len(), 1, "expected a single assignment");
    assert!(releases.is_empty(), "unexpected release");

    let assignment = assignments.into_iter().next().unwrap();
    let instance = RoleInstance::new(
        assignment.container,
        assignment.role_name,
        assignment.role_id,
    );
    state.container_start_submitted(instance);
    state.on_node_manager_container_started(&id).unwrap();
    id
}

fn completion(id: &ContainerId, exit_status: i32) -> ContainerStatus {
    ContainerStatus::new(id.clone(), exit_status, "")
}

/// The quantified invariants that must hold after every event handler.
fn assert_invariants(state: &AppState, role_ids: &[u32]) {
    let active = state.clone_active_list();
    for &role_id in role_ids {
        let role = state.lookup_role_status(role_id).unwrap();
        let active_count = active.iter().filter(|i| i.role_id == role_id).count() as i64;
        assert_eq!(role.actual(), active_count, "actual for role {role_id}");
        let releasing_count = active
            .iter()
            .filter(|i| i.role_id == role_id && i.released)
            .count() as i64;
        assert_eq!(role.releasing(), releasing_count, "releasing for role {role_id}");
        assert!(role.releasing() <= role.actual());
    }
    for live in state.live_nodes_in_role("") {
        if live.role != keys::ROLE_AM {
            assert!(
                state.active_container(live.container_id()).is_some(),
                "live container {} missing from active set",
                live.container_id()
            );
        }
    }
}

fn request_role(op: &RmOperation) -> u32 {
    match op {
        RmOperation::ContainerRequest(req) => priority::extract(req.priority),
        RmOperation::ContainerRelease(id) => panic!("expected request, got release of {id}"),
    }
}

// ---------------------------------------------------------------------------
// Scenario 1: steady-state scale-up, then review idempotence
// ---------------------------------------------------------------------------

#[test]
fn steady_state_scale_up_then_idempotent_review() {
    let (mut state, _clock, _dir) = build_engine(&[("a", 1, 2), ("b", 2, 1)], &[], Vec::new());

    let ops = state.review_request_and_release_nodes().unwrap();
    assert_eq!(ops.len(), 3);
    assert_eq!(request_role(&ops[0]), 1);
    assert_eq!(request_role(&ops[1]), 1);
    assert_eq!(request_role(&ops[2]), 2);

    // nothing external happened: the second pass is empty
    let again = state.review_request_and_release_nodes().unwrap();
    assert!(again.is_empty());

    assert_eq!(state.lookup_role_status(1).unwrap().requested(), 2);
    assert_eq!(state.lookup_role_status(2).unwrap().requested(), 1);
    assert_invariants(&state, &[1, 2]);
}

#[test]
fn progress_tracks_actual_over_desired() {
    let (mut state, _clock, _dir) = build_engine(&[("a", 1, 2)], &[], Vec::new());
    assert_eq!(state.application_progress_percentage(), 0.0);

    state.review_request_and_release_nodes().unwrap();
    assign_and_start(&mut state, container("c1", "host-a", 1));
    assert_eq!(state.application_progress_percentage(), 0.5);

    assign_and_start(&mut state, container("c2", "host-b", 1));
    assert_eq!(state.application_progress_percentage(), 1.0);
    assert_invariants(&state, &[1]);
}

// ---------------------------------------------------------------------------
// Scenario 2: surplus discard
// ---------------------------------------------------------------------------

#[test]
fn surplus_allocation_is_released_and_counted() {
    let (mut state, _clock, _dir) = build_engine(&[("a", 1, 1)], &[], Vec::new());

    let ops = state.review_request_and_release_nodes().unwrap();
    assert_eq!(ops.len(), 1);

    let batch = vec![
        container("c1", "host-a", 1),
        container("c2", "host-b", 1),
    ];
    let (assignments, releases) = state.on_containers_allocated(batch);
    assert_eq!(assignments.len(), 1);
    assert_eq!(releases.len(), 1);
    assert_eq!(state.lookup_role_status(1).unwrap().actual(), 1);
    assert_eq!(state.surplus_count(), 1);

    let surplus_id = match &releases[0] {
        RmOperation::ContainerRelease(id) => id.clone(),
        other => panic!("expected release, got {other:?}"),
    };

    // the surplus container's completion is expected noise
    let result = state.on_completed_node(completion(&surplus_id, 0));
    assert!(result.surplus);
    assert!(!result.failed);
    assert_eq!(state.lookup_role_status(1).unwrap().failed(), 0);
    assert_invariants(&state, &[1]);
}

// ---------------------------------------------------------------------------
// Scenario 3: short-lived vs long-lived crashes
// ---------------------------------------------------------------------------

#[test]
fn short_lived_crash_counts_as_start_failure_and_blacklists_node() {
    let (mut state, clock, _dir) = build_engine(&[("a", 1, 1)], &[], Vec::new());

    let id = assign_and_start(&mut state, container("c1", "host-a", 1));
    clock.advance(5_000); // well inside the 60s short-life threshold

    let result = state.on_completed_node(completion(&id, 137));
    assert!(result.failed);
    let role = state.lookup_role_status(1).unwrap();
    assert_eq!(role.failed(), 1);
    assert_eq!(role.start_failed(), 1);
    assert_eq!(role.actual(), 0);
    assert_eq!(state.failed_count(), 1);

    // host-a is disabled for the role in placement memory
    let entry = state
        .role_history()
        .node("host-a")
        .unwrap()
        .entry(1)
        .unwrap()
        .clone();
    assert_eq!(entry.active, 0);
    assert!(!entry.available);

    // the replacement request is therefore unlocated
    let ops = state.review_request_and_release_nodes().unwrap();
    match &ops[0] {
        RmOperation::ContainerRequest(req) => assert!(req.nodes.is_empty()),
        other => panic!("expected request, got {other:?}"),
    }
    assert_invariants(&state, &[1]);
}

#[test]
fn long_lived_crash_is_not_a_start_failure() {
    let (mut state, clock, _dir) = build_engine(&[("a", 1, 1)], &[], Vec::new());

    let id = assign_and_start(&mut state, container("c1", "host-a", 1));
    clock.advance(70_000); // past the 60s threshold

    let result = state.on_completed_node(completion(&id, 1));
    assert!(result.failed);
    let role = state.lookup_role_status(1).unwrap();
    assert_eq!(role.failed(), 1);
    assert_eq!(role.start_failed(), 0);

    // the node stays usable for the role
    let entry = state
        .role_history()
        .node("host-a")
        .unwrap()
        .entry(1)
        .unwrap()
        .clone();
    assert!(entry.available);
    assert_invariants(&state, &[1]);
}

// ---------------------------------------------------------------------------
// Scenario 4: expected release on flex-down
// ---------------------------------------------------------------------------

#[test]
fn flex_down_releases_most_recent_node_and_completion_is_not_a_failure() {
    let (mut state, clock, _dir) = build_engine(&[("a", 1, 2)], &[], Vec::new());
    state.review_request_and_release_nodes().unwrap();

    let _c1 = assign_and_start(&mut state, container("c1", "host-a", 1));
    clock.advance(1_000);
    let c2 = assign_and_start(&mut state, container("c2", "host-b", 1));

    // flex a from 2 to 1
    let mut spec = state.cluster_spec().clone();
    spec.set_role_opt("a", keys::ROLE_INSTANCES, 1);
    state.update_cluster_spec(spec).unwrap();

    let ops = state.review_request_and_release_nodes().unwrap();
    assert_eq!(ops.len(), 1);
    match &ops[0] {
        // host-b was assigned most recently, so it is the victim
        RmOperation::ContainerRelease(id) => assert_eq!(id, &c2),
        other => panic!("expected release, got {other:?}"),
    }
    assert_eq!(state.lookup_role_status(1).unwrap().releasing(), 1);
    assert_invariants(&state, &[1]);

    // a queued release is acted on once, not once per pass
    assert!(state.review_request_and_release_nodes().unwrap().is_empty());

    let result = state.on_completed_node(completion(&c2, 0));
    assert!(!result.failed);
    assert!(!result.surplus);
    let role = state.lookup_role_status(1).unwrap();
    assert_eq!(role.releasing(), 0);
    assert_eq!(role.actual(), 1);
    assert_eq!(role.completed(), 1);
    assert_eq!(role.failed(), 0);
    assert_eq!(state.completed_count(), 1);
    assert_invariants(&state, &[1]);
}

// ---------------------------------------------------------------------------
// Scenario 5: failure threshold
// ---------------------------------------------------------------------------

#[test]
fn failures_at_threshold_are_tolerated_one_more_triggers_teardown() {
    let (mut state, _clock, _dir) = build_engine(
        &[("a", 1, 1)],
        &[(keys::OPT_CONTAINER_FAILURE_THRESHOLD, "3")],
        Vec::new(),
    );

    for i in 0..3 {
        let id = assign_and_start(&mut state, container(&format!("c{i}"), "host-a", 1));
        state.on_completed_node(completion(&id, 1));
    }
    assert_eq!(state.lookup_role_status(1).unwrap().failed(), 3);

    // exactly at the threshold: review still works
    assert!(state.review_request_and_release_nodes().is_ok());

    let id = assign_and_start(&mut state, container("c3", "host-a", 1));
    state.on_completed_node(completion(&id, 1));
    assert_eq!(state.lookup_role_status(1).unwrap().failed(), 4);

    let err = state.review_request_and_release_nodes().unwrap_err();
    match err {
        StateError::TriggerTeardown {
            role,
            failed,
            threshold,
            ..
        } => {
            assert_eq!(role, "a");
            assert_eq!(failed, 4);
            assert_eq!(threshold, 3);
        }
        other => panic!("expected teardown, got {other}"),
    }
}

// ---------------------------------------------------------------------------
// Scenario 6: AM restart replay
// ---------------------------------------------------------------------------

#[test]
fn restart_replay_rebuilds_live_model_and_history() {
    let live = vec![
        container("c1", "host-a", 1),
        container("c2", "host-b", 2),
    ];
    let (mut state, _clock, _dir) =
        build_engine(&[("a", 1, 1), ("b", 2, 1)], &[], live);

    assert_eq!(state.lookup_role_status(1).unwrap().actual(), 1);
    assert_eq!(state.lookup_role_status(2).unwrap().actual(), 1);

    let live_list = state.clone_live_list();
    assert_eq!(live_list.len(), 2);
    assert!(live_list.iter().all(|i| i.state == InstanceState::Live));

    assert_eq!(state.role_history().node("host-a").unwrap().active_for(1), 1);
    assert_eq!(state.role_history().node("host-b").unwrap().active_for(2), 1);

    // the model is already converged: no operations
    assert!(state.review_request_and_release_nodes().unwrap().is_empty());
    assert_eq!(
        state.cluster_description().info.get(keys::INFO_AM_RESTART_COUNT),
        Some(&"2".to_string())
    );
    assert_invariants(&state, &[1, 2]);
}

// ---------------------------------------------------------------------------
// Error taxonomy and edge behaviours
// ---------------------------------------------------------------------------

#[test]
fn double_release_is_an_internal_state_error() {
    let (mut state, _clock, _dir) = build_engine(&[("a", 1, 1)], &[], Vec::new());
    let id = assign_and_start(&mut state, container("c1", "host-a", 1));

    state.container_release_submitted(&id).unwrap();
    let err = state.container_release_submitted(&id).unwrap_err();
    assert!(matches!(err, StateError::AlreadyReleased(_)));
    assert_eq!(state.lookup_role_status(1).unwrap().releasing(), 1);
    assert_invariants(&state, &[1]);
}

#[test]
fn releasing_an_unknown_container_is_refused() {
    let (mut state, _clock, _dir) = build_engine(&[("a", 1, 1)], &[], Vec::new());
    let id = ContainerId::parse("ghost").unwrap();
    let err = state.container_release_submitted(&id).unwrap_err();
    assert!(matches!(err, StateError::NoActiveContainer(_)));
}

#[test]
fn start_callback_for_unknown_container_is_refused() {
    let (mut state, _clock, _dir) = build_engine(&[("a", 1, 1)], &[], Vec::new());
    let id = ContainerId::parse("ghost").unwrap();
    let err = state.on_node_manager_container_started(&id).unwrap_err();
    assert!(matches!(err, StateError::NoActiveContainer(_)));
}

#[test]
fn second_start_announcement_is_refused_without_mutation() {
    let (mut state, _clock, _dir) = build_engine(&[("a", 1, 1)], &[], Vec::new());
    let id = assign_and_start(&mut state, container("c1", "host-a", 1));

    let err = state.on_node_manager_container_started(&id).unwrap_err();
    assert!(matches!(err, StateError::NotStarting(_)));
    assert_eq!(state.lookup_role_status(1).unwrap().started(), 1);
    assert_invariants(&state, &[1]);
}

#[test]
fn unknown_completion_is_counted_not_raised() {
    let (mut state, _clock, _dir) = build_engine(&[("a", 1, 1)], &[], Vec::new());
    let result = state.on_completed_node(completion(&ContainerId::parse("ghost").unwrap(), 1));
    assert!(!result.failed);
    assert!(!result.surplus);
    assert!(result.instance.is_none());
    assert_eq!(state.unknown_completion_count(), 1);
}

#[test]
fn start_failed_then_completion_does_not_double_count() {
    let (mut state, _clock, _dir) = build_engine(&[("a", 1, 1)], &[], Vec::new());

    let c = container("c1", "host-a", 1);
    let id = c.id.clone();
    let (assignments, _) = state.on_containers_allocated(vec![c]);
    let assignment = assignments.into_iter().next().unwrap();
    state.container_start_submitted(RoleInstance::new(
        assignment.container,
        assignment.role_name,
        assignment.role_id,
    ));

    state.on_node_manager_container_start_failed(&id, "no such image");
    {
        let role = state.lookup_role_status(1).unwrap();
        assert_eq!(role.failed(), 1);
        assert_eq!(role.start_failed(), 1);
        assert_eq!(role.actual(), 0);
    }
    assert_invariants(&state, &[1]);

    // the RM still reports the completion; counters stay put
    let result = state.on_completed_node(completion(&id, 1));
    assert!(result.failed);
    let role = state.lookup_role_status(1).unwrap();
    assert_eq!(role.failed(), 1);
    assert_eq!(role.actual(), 0);
    assert_invariants(&state, &[1]);
}

#[test]
fn release_all_queues_everything_once() {
    let (mut state, _clock, _dir) = build_engine(&[("a", 1, 2)], &[], Vec::new());
    let c1 = assign_and_start(&mut state, container("c1", "host-a", 1));
    let c2 = assign_and_start(&mut state, container("c2", "host-b", 1));

    // one container is already queued for release
    state.container_release_submitted(&c1).unwrap();

    let ops = state.release_all_containers();
    assert_eq!(ops.len(), 1);
    assert_eq!(ops[0], RmOperation::ContainerRelease(c2));
    assert_eq!(state.lookup_role_status(1).unwrap().releasing(), 2);
    assert_invariants(&state, &[1]);
}

#[test]
fn dynamic_role_from_spec_update_is_flexed() {
    let (mut state, _clock, _dir) = build_engine(&[("a", 1, 1)], &[], Vec::new());

    let mut spec = state.cluster_spec().clone();
    spec.set_role_opt("cache", keys::ROLE_PRIORITY, 2);
    spec.set_role_opt("cache", keys::ROLE_INSTANCES, 2);
    state.update_cluster_spec(spec).unwrap();

    let ops = state.review_request_and_release_nodes().unwrap();
    // one request for role a, two for the new cache role
    assert_eq!(ops.len(), 3);
    assert_eq!(request_role(&ops[0]), 1);
    assert_eq!(request_role(&ops[1]), 2);
    assert_eq!(request_role(&ops[2]), 2);
}

#[test]
fn max_literal_resolves_to_container_limits() {
    let (mut state, _clock, _dir) = build_engine(&[("a", 1, 1)], &[], Vec::new());

    let mut spec = state.cluster_spec().clone();
    spec.set_role_opt("a", keys::ROLE_YARN_MEMORY, "max");
    spec.set_role_opt("a", keys::ROLE_YARN_CORES, "max");
    state.update_cluster_spec(spec).unwrap();

    let capability = state.build_resource_requirements("a").unwrap();
    assert_eq!(capability.memory_mb, 8192);
    assert_eq!(capability.virtual_cores, 32);
}

#[test]
fn refreshed_status_carries_counters_and_live_maps() {
    let (mut state, _clock, _dir) = build_engine(&[("a", 1, 2)], &[], Vec::new());
    state.review_request_and_release_nodes().unwrap();
    assign_and_start(&mut state, container("c1", "host-a", 1));

    let description = state.refresh_cluster_status(None);
    assert_eq!(description.instances["a"], vec!["c1".to_string()]);
    assert_eq!(description.live["a"]["c1"].host, "host-a");

    let role_stats = &description.statistics["a"];
    assert_eq!(role_stats[keys::STAT_DESIRED], 2);
    assert_eq!(role_stats[keys::STAT_ACTUAL], 1);
    assert_eq!(role_stats[keys::STAT_REQUESTED], 1);

    let am_stats = &description.statistics[keys::ROLE_AM];
    assert_eq!(am_stats[keys::STAT_CONTAINERS_LIVE], 1);
    assert_eq!(am_stats[keys::STAT_CONTAINERS_STARTED], 1);
    assert_eq!(am_stats[keys::STAT_CONTAINERS_SURPLUS], 0);

    let by_node = state.containers_by_node();
    assert_eq!(
        by_node["host-a"],
        vec![ContainerId::parse("c1").unwrap()]
    );
}

#[test]
fn scale_up_prefers_previously_used_node() {
    let (mut state, _clock, _dir) = build_engine(&[("a", 1, 1)], &[], Vec::new());

    // run one instance on host-a, then release it cleanly
    let id = assign_and_start(&mut state, container("c1", "host-a", 1));
    state.container_release_submitted(&id).unwrap();
    state.on_completed_node(completion(&id, 0));

    // next request is hinted back at host-a
    let ops = state.review_request_and_release_nodes().unwrap();
    match &ops[0] {
        RmOperation::ContainerRequest(req) => {
            assert_eq!(req.nodes, vec!["host-a".to_string()]);
        }
        other => panic!("expected request, got {other:?}"),
    }
}
