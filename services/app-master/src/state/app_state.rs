//! The model of all ongoing application state.
//!
//! One object owns every map and counter: role statuses, the active
//! container set, the starting/releasing/surplus id sets, the live-node
//! set, the completed and failed maps, and the placement memory. Methods
//! whose names begin with `build` belong to the single-threaded build
//! phase; everything else is an event handler or query invoked under the
//! driver's engine-wide lock.
//!
//! Between entry points these invariants hold (they may break transiently
//! inside one):
//!
//! - per role, `actual` equals the number of active instances of the role
//! - per role, `releasing` equals the release-queued subset and never
//!   exceeds `actual`
//! - the live set is a subset of the active set
//! - a container id is in at most one of active / completed / failed

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use flock_model::{
    priority, Container, ContainerId, ContainerStatus, NodeId, Priority, RecordFactory, Resource,
};
use flock_spec::{keys, ClusterDescription, ClusterSpec, ClusterState, ConfigError, InstanceState};
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::providers::ProviderRole;

use super::error::StateError;
use super::history_store::{HistorySnapshot, HistoryStore};
use super::operations::{CompletionResult, ContainerAssignment, RmOperation};
use super::role_history::RoleHistory;
use super::role_instance::RoleInstance;
use super::role_status::RoleStatus;

pub struct AppState {
    record_factory: Arc<dyn RecordFactory>,
    clock: Arc<dyn Clock>,

    cluster_spec: ClusterSpec,
    cluster_description: ClusterDescription,

    /// Role name -> role record.
    roles: BTreeMap<String, ProviderRole>,

    /// Role id -> counters. BTreeMap so review passes walk roles in id
    /// order and emit deterministic operation batches.
    role_status: BTreeMap<u32, RoleStatus>,

    /// The AM's own instance; in the live view, never in flex accounting.
    app_master_node: Option<RoleInstance>,

    /// Containers we hold: allocated and not yet completed. Superset of
    /// the live set. Sole owner of the instances.
    active: HashMap<ContainerId, RoleInstance>,

    /// Submitted to the node manager, start not yet confirmed.
    starting: HashSet<ContainerId>,

    /// Release submitted, completion not yet arrived. Any completion of
    /// these is a successful outcome.
    releasing: HashSet<ContainerId>,

    /// Allocated above desired and immediately handed back; their
    /// completions are expected noise.
    surplus: HashSet<ContainerId>,

    /// Confirmed running by the node manager.
    live: HashSet<ContainerId>,

    completed: HashMap<ContainerId, RoleInstance>,
    failed: HashMap<ContainerId, RoleInstance>,

    completed_count: i64,
    failed_count: i64,
    started_count: i64,
    start_failed_count: i64,
    surplus_count: i64,
    unknown_completions: i64,
    completions_without_live_node: i64,

    container_max_memory: u32,
    container_max_cores: u32,

    role_history: RoleHistory,
    short_life_threshold_ms: i64,
    failure_threshold: i64,
    log_server_url: Option<String>,
}

impl AppState {
    pub fn new(record_factory: Arc<dyn RecordFactory>, clock: Arc<dyn Clock>) -> Self {
        let role_history = RoleHistory::new(&[], clock.clone());
        Self {
            record_factory,
            clock,
            cluster_spec: ClusterSpec::default(),
            cluster_description: ClusterDescription::default(),
            roles: BTreeMap::new(),
            role_status: BTreeMap::new(),
            app_master_node: None,
            active: HashMap::new(),
            starting: HashSet::new(),
            releasing: HashSet::new(),
            surplus: HashSet::new(),
            live: HashSet::new(),
            completed: HashMap::new(),
            failed: HashMap::new(),
            completed_count: 0,
            failed_count: 0,
            started_count: 0,
            start_failed_count: 0,
            surplus_count: 0,
            unknown_completions: 0,
            completions_without_live_node: 0,
            container_max_memory: u32::MAX,
            container_max_cores: u32::MAX,
            role_history,
            short_life_threshold_ms: keys::DEF_CONTAINER_FAILURE_SHORT_LIFE_SECS as i64 * 1000,
            failure_threshold: keys::DEF_CONTAINER_FAILURE_THRESHOLD as i64,
            log_server_url: None,
        }
    }

    /// Sets the cluster-reported container maximums, used when a role asks
    /// for `"max"` and to sanity-check outgoing requests.
    pub fn set_container_limits(&mut self, max_memory: u32, max_cores: u32) {
        self.container_max_memory = max_memory;
        self.container_max_cores = max_cores;
    }

    // -----------------------------------------------------------------
    // Build phase. Not concurrent-safe; runs before events are served.
    // -----------------------------------------------------------------

    /// Builds up the application state from the cluster specification.
    ///
    /// Registers provider roles and any spec-only (dynamic) roles, seeds
    /// the desired counts, reloads placement memory from `history_store`,
    /// and replays `live_containers` handed over across an AM restart.
    pub fn build_instance(
        &mut self,
        spec: ClusterSpec,
        provider_info: BTreeMap<String, String>,
        provider_roles: Vec<ProviderRole>,
        history_store: &HistoryStore,
        live_containers: Vec<Container>,
    ) -> Result<(), StateError> {
        self.cluster_spec = spec;

        for role in &provider_roles {
            self.build_role(role.clone())?;
        }
        self.build_role_requirements()?;

        let mut description = ClusterDescription::from_spec(&self.cluster_spec);
        for (key, value) in provider_info {
            description.info.insert(key, value);
        }

        let short_life_secs = self.cluster_spec.option_u64(
            keys::OPT_CONTAINER_FAILURE_SHORT_LIFE,
            keys::DEF_CONTAINER_FAILURE_SHORT_LIFE_SECS,
        )?;
        self.short_life_threshold_ms = short_life_secs as i64 * 1000;
        self.failure_threshold = self.cluster_spec.option_u64(
            keys::OPT_CONTAINER_FAILURE_THRESHOLD,
            keys::DEF_CONTAINER_FAILURE_THRESHOLD as u64,
        )? as i64;
        self.log_server_url = self
            .cluster_spec
            .option(keys::OPT_LOG_SERVER_URL)
            .map(|s| s.to_string());

        let now = self.clock.now_millis();
        description.state = ClusterState::Created;
        description.set_info(keys::INFO_LIVE_TIME_MILLIS, now);
        description.set_info(keys::INFO_LIVE_TIME, human_time(now));
        if description.create_time == 0 {
            description.create_time = now;
            description.set_info(keys::INFO_CREATE_TIME_MILLIS, now);
            description.set_info(keys::INFO_CREATE_TIME, human_time(now));
        }
        description.state = ClusterState::Live;
        self.cluster_description = description;

        let all_roles: Vec<ProviderRole> = self.roles.values().cloned().collect();
        self.role_history = RoleHistory::new(&all_roles, self.clock.clone());
        if let Some(snapshot) = history_store
            .load()
            .map_err(|e| StateError::History(e.to_string()))?
        {
            self.role_history.restore(snapshot);
        }

        let restart_count = live_containers.len();
        for container in live_containers {
            self.add_restarted_container(container)?;
        }
        if restart_count > 0 {
            self.cluster_description
                .set_info(keys::INFO_AM_RESTART_COUNT, restart_count);
        }
        Ok(())
    }

    /// Adds knowledge of a role. Duplicate ids are a configuration error:
    /// the id doubles as the request priority and must route uniquely.
    pub fn build_role(&mut self, role: ProviderRole) -> Result<(), ConfigError> {
        if role.id == 0 || role.id > priority::MAX_ROLE_ID {
            return Err(ConfigError::RoleIdOutOfRange {
                role: role.name,
                id: role.id,
                max: priority::MAX_ROLE_ID,
            });
        }
        if let Some(existing) = self.role_status.get(&role.id) {
            return Err(ConfigError::DuplicateRoleId {
                id: role.id,
                existing: existing.name().to_string(),
                incoming: role.name,
            });
        }
        self.role_status.insert(role.id, RoleStatus::new(&role));
        self.roles.insert(role.name.clone(), role);
        Ok(())
    }

    /// Builds the special AM self-instance. It joins the live view under
    /// the reserved role name and is excluded from flex accounting; it
    /// never registers with role history.
    pub fn build_app_master_node(
        &mut self,
        container_id: ContainerId,
        host: impl Into<String>,
        am_port: u16,
        http_address: Option<String>,
    ) {
        let container = Container {
            id: container_id,
            node: NodeId::new(host, am_port),
            http_address,
            resource: Resource::default(),
            priority: Priority(0),
        };
        let mut am = RoleInstance::new(container, keys::ROLE_AM, 0);
        am.create_time = self.clock.now_millis();
        am.state = InstanceState::Submitted;
        self.app_master_node = Some(am);
    }

    /// The AM process has been launched; it is in the live view but not
    /// yet considered live.
    pub fn note_am_launched(&mut self) {
        if let Some(am) = &mut self.app_master_node {
            am.state = InstanceState::Submitted;
        }
    }

    /// The AM's spawned process is confirmed up.
    pub fn note_am_live(&mut self) {
        if let Some(am) = &mut self.app_master_node {
            am.state = InstanceState::Live;
        }
    }

    pub fn app_master_node(&self) -> Option<&RoleInstance> {
        self.app_master_node.as_ref()
    }

    /// Derives every role's desired count from the current spec and
    /// registers dynamic roles that appear only there.
    fn build_role_requirements(&mut self) -> Result<(), ConfigError> {
        for role_status in self.role_status.values_mut() {
            let name = role_status.name().to_string();
            let desired = self.cluster_spec.desired_instances(&name, 0)? as i64;
            if role_status.desired() != desired {
                info!(
                    role = %name,
                    from = role_status.desired(),
                    to = desired,
                    "Role flexed"
                );
                role_status.set_desired(desired);
            }
        }

        for name in self.cluster_spec.role_names() {
            if self.roles.contains_key(&name) {
                continue;
            }
            info!(role = %name, "Adding new role from spec");
            let dynamic = self.create_dynamic_role(&name)?;
            self.build_role(dynamic.clone())?;
            self.role_history.add_new_provider_role(&dynamic);
            let desired = self.cluster_spec.desired_instances(&name, 0)? as i64;
            if let Some(role_status) = self.role_status.get_mut(&dynamic.id) {
                role_status.set_desired(desired);
            }
        }
        Ok(())
    }

    /// A role that exists only in the spec: priority is mandatory,
    /// placement policy optional.
    fn create_dynamic_role(&self, name: &str) -> Result<ProviderRole, ConfigError> {
        let raw = self
            .cluster_spec
            .mandatory_role_opt(name, keys::ROLE_PRIORITY)?;
        let id = raw
            .trim()
            .parse::<u32>()
            .map_err(|_| ConfigError::InvalidRoleOption {
                role: name.to_string(),
                key: keys::ROLE_PRIORITY.to_string(),
                value: raw.to_string(),
            })?;
        let placement = self
            .cluster_spec
            .role_opt_u32(name, keys::ROLE_PLACEMENT_POLICY, 0)?;
        Ok(ProviderRole::new(name, id, placement))
    }

    /// Replays one container handed over across an AM restart: walks it
    /// through assignment and start so every map and counter agrees it is
    /// live.
    fn add_restarted_container(&mut self, container: Container) -> Result<(), StateError> {
        let role_id = priority::extract_role(&container);
        let Some(role) = self.role_status.get_mut(&role_id) else {
            return Err(StateError::UnknownRoleId(role_id));
        };
        role.inc_actual();
        role.inc_started();
        let role_name = role.name().to_string();
        self.started_count += 1;

        info!(
            container = %container.id,
            role = %role_name,
            host = %container.node.host,
            "Rebuilding container from restart"
        );

        let now = self.clock.now_millis();
        let mut instance = RoleInstance::new(container.clone(), role_name, role_id);
        instance.create_time = now;
        instance.start_time = now;
        instance.state = InstanceState::Live;
        self.live.insert(container.id.clone());
        self.active.insert(container.id.clone(), instance);

        self.role_history.on_container_assigned(&container);
        self.role_history.on_container_started(&container);
        Ok(())
    }

    // -----------------------------------------------------------------
    // Runtime spec changes
    // -----------------------------------------------------------------

    /// Adopts an updated cluster specification while serving: re-derives
    /// desired counts and registers any new dynamic roles. The next review
    /// pass acts on the new deltas.
    pub fn update_cluster_spec(&mut self, spec: ClusterSpec) -> Result<(), StateError> {
        self.cluster_spec = spec;
        self.cluster_description.roles = self.cluster_spec.roles.clone();
        self.cluster_description.update_time = self.clock.now_millis();
        self.build_role_requirements()?;
        Ok(())
    }

    pub fn cluster_spec(&self) -> &ClusterSpec {
        &self.cluster_spec
    }

    // -----------------------------------------------------------------
    // Role lookup
    // -----------------------------------------------------------------

    pub fn lookup_role_status(&self, role_id: u32) -> Result<&RoleStatus, StateError> {
        self.role_status
            .get(&role_id)
            .ok_or(StateError::UnknownRoleId(role_id))
    }

    pub fn lookup_role_status_by_name(&self, name: &str) -> Result<&RoleStatus, StateError> {
        let role = self
            .roles
            .get(name)
            .ok_or_else(|| StateError::UnknownRoleName(name.to_string()))?;
        self.lookup_role_status(role.id)
    }

    pub fn lookup_role_status_for_container(
        &self,
        container: &Container,
    ) -> Result<&RoleStatus, StateError> {
        self.lookup_role_status(priority::extract_role(container))
    }

    pub fn set_exclude_from_flexing(&mut self, role_id: u32, exclude: bool) -> Result<(), StateError> {
        let role = self
            .role_status
            .get_mut(&role_id)
            .ok_or(StateError::UnknownRoleId(role_id))?;
        role.set_exclude_from_flexing(exclude);
        Ok(())
    }

    // -----------------------------------------------------------------
    // Event handlers. Concurrent-safe under the driver's engine lock.
    // -----------------------------------------------------------------

    /// Routes a batch of allocations: binds each container to the role its
    /// priority names, or hands it straight back when the role is already
    /// at its desired count (a surplus) or the priority is unknown.
    pub fn on_containers_allocated(
        &mut self,
        allocated: Vec<Container>,
    ) -> (Vec<ContainerAssignment>, Vec<RmOperation>) {
        let mut assignments = Vec::new();
        let mut releases = Vec::new();

        let ordered = self.role_history.prepare_allocation_list(allocated);
        for container in ordered {
            let role_id = priority::extract_role(&container);
            let Some(role) = self.role_status.get_mut(&role_id) else {
                warn!(
                    container = %container.id,
                    role_id,
                    "Allocation carries unknown role priority, releasing"
                );
                self.surplus.insert(container.id.clone());
                self.surplus_count += 1;
                releases.push(RmOperation::ContainerRelease(container.id));
                continue;
            };

            role.dec_requested();
            let allocated_count = role.inc_actual();
            let desired = role.desired();

            if allocated_count > desired {
                info!(
                    container = %container.id,
                    host = %container.node.host,
                    role = %role.name(),
                    "Discarding surplus container"
                );
                role.dec_actual();
                self.surplus.insert(container.id.clone());
                self.surplus_count += 1;
                releases.push(RmOperation::ContainerRelease(container.id));
            } else {
                let role_name = role.name().to_string();
                info!(
                    container = %container.id,
                    host = %container.node.host,
                    role = %role_name,
                    "Assigning role to container"
                );
                self.role_history.on_container_assigned(&container);
                assignments.push(ContainerAssignment {
                    container,
                    role_name,
                    role_id,
                });
            }
        }
        (assignments, releases)
    }

    /// A start request is about to go to the node manager: the engine
    /// takes ownership of the instance and tracks it as active + starting.
    pub fn container_start_submitted(&mut self, mut instance: RoleInstance) {
        instance.state = InstanceState::Submitted;
        instance.create_time = self.clock.now_millis();
        let container = instance.container.clone();
        let id = container.id.clone();
        self.starting.insert(id.clone());
        self.active.insert(id, instance);
        self.role_history.on_container_start_submitted(&container);
    }

    /// Node-manager callback: the container is up. Promotes it from
    /// starting to live.
    pub fn on_node_manager_container_started(
        &mut self,
        container_id: &ContainerId,
    ) -> Result<RoleInstance, StateError> {
        let role_id = match self.active.get(container_id) {
            Some(instance) => instance.role_id,
            None => return Err(StateError::NoActiveContainer(container_id.clone())),
        };
        if !self.role_status.contains_key(&role_id) {
            return Err(StateError::UnknownRoleId(role_id));
        }
        if !self.starting.remove(container_id) {
            // second announcement, or a start that was never submitted
            return Err(StateError::NotStarting(container_id.clone()));
        }

        let now = self.clock.now_millis();
        let Some(instance) = self.active.get_mut(container_id) else {
            return Err(StateError::NoActiveContainer(container_id.clone()));
        };
        instance.start_time = now;
        instance.state = InstanceState::Live;
        let container = instance.container.clone();
        let snapshot = instance.clone();

        if let Some(role) = self.role_status.get_mut(&role_id) {
            role.inc_started();
        }
        self.started_count += 1;
        self.live.insert(container_id.clone());
        self.role_history.on_container_started(&container);
        info!(container = %container_id, role_id, "Container started");
        Ok(snapshot)
    }

    /// Node-manager callback: the container never came up. Strongest
    /// signal the node is bad for the role, so history gets a short-lived
    /// negative mark.
    pub fn on_node_manager_container_start_failed(
        &mut self,
        container_id: &ContainerId,
        cause: &str,
    ) {
        self.starting.remove(container_id);
        let Some(mut instance) = self.active.remove(container_id) else {
            warn!(
                container = %container_id,
                "Start-failed callback for container not on the active list"
            );
            self.unknown_completions += 1;
            return;
        };

        self.failed_count += 1;
        self.start_failed_count += 1;
        instance.state = InstanceState::Destroyed;
        instance.diagnostics = Some(cause.to_string());

        let message = format!(
            "Container {} failed to start on host {}: {}",
            container_id, instance.container.node.host, cause
        );
        error!(
            container = %container_id,
            role = %instance.role,
            host = %instance.container.node.host,
            cause = %cause,
            "Container failed to start"
        );
        if let Some(role) = self.role_status.get_mut(&instance.role_id) {
            role.dec_actual();
            role.note_failed(Some(message));
            role.inc_start_failed();
        }
        self.role_history
            .on_node_manager_container_start_failed(&instance.container);
        self.failed.insert(container_id.clone(), instance);
    }

    /// Queues an active container for release. The instance stays on the
    /// active list, flagged, until its completion arrives.
    pub fn container_release_submitted(
        &mut self,
        container_id: &ContainerId,
    ) -> Result<(), StateError> {
        if self.releasing.contains(container_id) {
            return Err(StateError::AlreadyReleased(container_id.clone()));
        }
        let Some(instance) = self.active.get_mut(container_id) else {
            return Err(StateError::NoActiveContainer(container_id.clone()));
        };
        if instance.released {
            return Err(StateError::AlreadyReleased(container_id.clone()));
        }
        instance.released = true;
        let role_id = instance.role_id;
        let container = instance.container.clone();

        self.releasing.insert(container_id.clone());
        if let Some(role) = self.role_status.get_mut(&role_id) {
            role.inc_releasing();
        }
        self.role_history.on_container_release_submitted(&container);
        debug!(container = %container_id, role_id, "Release submitted");
        Ok(())
    }

    /// Handles a completed container: an acknowledged release, a surplus
    /// purge, a crash, or (when no map knows the id) a counted unknown.
    pub fn on_completed_node(&mut self, status: ContainerStatus) -> CompletionResult {
        let container_id = status.container_id.clone();
        let mut result = CompletionResult::default();

        if self.releasing.remove(&container_id) {
            // a release we asked for; any exit status is a success
            if let Some(mut instance) = self.active.remove(&container_id) {
                info!(
                    container = %container_id,
                    role = %instance.role,
                    "Released container completed"
                );
                if let Some(role) = self.role_status.get_mut(&instance.role_id) {
                    role.dec_releasing();
                    role.dec_actual();
                    role.inc_completed();
                }
                self.completed_count += 1;
                self.role_history.on_release_completed(&instance.container);
                self.live.remove(&container_id);
                stamp_destroyed(&mut instance, &status);
                result.instance = Some(instance.clone());
                self.completed.insert(container_id, instance);
            } else {
                error!(
                    container = %container_id,
                    "Release acknowledged for container not on the active list"
                );
                self.unknown_completions += 1;
            }
            return result;
        }

        if self.surplus.remove(&container_id) {
            debug!(container = %container_id, "Surplus container purged");
            result.surplus = true;
            return result;
        }

        if let Some(mut instance) = self.active.remove(&container_id) {
            // an unrequested completion: a crash
            result.failed = true;
            self.starting.remove(&container_id);
            self.failed_count += 1;

            let short_lived = self.is_short_lived(&instance);
            let message = self.failure_message(&instance);
            warn!(
                container = %container_id,
                role = %instance.role,
                host = %instance.container.node.host,
                exit_status = status.exit_status,
                short_lived,
                "Container failed"
            );
            if let Some(role) = self.role_status.get_mut(&instance.role_id) {
                role.dec_actual();
                role.note_failed(Some(message));
                if short_lived {
                    role.inc_start_failed();
                }
            }
            self.role_history
                .on_failed_container(&instance.container, short_lived);

            if !self.live.remove(&container_id) {
                self.completions_without_live_node += 1;
            }
            stamp_destroyed(&mut instance, &status);
            result.instance = Some(instance.clone());
            self.failed.insert(container_id, instance);
        } else if let Some(instance) = self.failed.get_mut(&container_id) {
            // already in the failed map (a start failure); the completion
            // just fills in the exit details
            result.failed = true;
            self.live.remove(&container_id);
            stamp_destroyed(instance, &status);
            result.instance = Some(instance.clone());
        } else {
            error!(
                container = %container_id,
                "Completion for container not in any map"
            );
            self.unknown_completions += 1;
        }
        result
    }

    /// A container is short-lived when it crashed within the configured
    /// threshold of its start; one that never started counts as
    /// short-lived.
    fn is_short_lived(&self, instance: &RoleInstance) -> bool {
        if instance.start_time <= 0 {
            return true;
        }
        self.clock.now_millis() - instance.start_time < self.short_life_threshold_ms
    }

    fn failure_message(&self, instance: &RoleInstance) -> String {
        let container = &instance.container;
        match &self.log_server_url {
            Some(url) => format!(
                "Failure {} on host {}, see {}/{}/{}",
                container.id,
                container.node.host,
                url.trim_end_matches('/'),
                container.node,
                container.id
            ),
            None => format!("Failure {} on host {}", container.id, container.node.host),
        }
    }

    // -----------------------------------------------------------------
    // Review pass
    // -----------------------------------------------------------------

    /// Inspects every flexable role and returns the operations that close
    /// the gap between desired and observed state. With no intervening
    /// events a second call returns nothing.
    pub fn review_request_and_release_nodes(&mut self) -> Result<Vec<RmOperation>, StateError> {
        debug!("Reviewing request and release state");
        let mut operations = Vec::new();
        let role_ids: Vec<u32> = self.role_status.keys().copied().collect();
        for role_id in role_ids {
            let excluded = self
                .role_status
                .get(&role_id)
                .map(|r| r.exclude_from_flexing())
                .unwrap_or(true);
            if excluded {
                continue;
            }
            operations.extend(self.review_one_role(role_id)?);
        }
        Ok(operations)
    }

    /// Raises teardown when a role has failed more times than the
    /// configured threshold. Exactly at the threshold is still tolerated.
    pub fn check_failure_threshold(&self, role_id: u32) -> Result<(), StateError> {
        let role = self.lookup_role_status(role_id)?;
        if role.failed() > self.failure_threshold {
            return Err(StateError::TriggerTeardown {
                role: role.name().to_string(),
                failed: role.failed(),
                start_failed: role.start_failed(),
                threshold: self.failure_threshold,
                last_message: role.failure_message().map(|s| s.to_string()),
            });
        }
        Ok(())
    }

    fn review_one_role(&mut self, role_id: u32) -> Result<Vec<RmOperation>, StateError> {
        let role = self.lookup_role_status(role_id)?;
        let delta = role.delta();
        let desired = role.desired();
        let name = role.name().to_string();
        debug!(status = %role, "Reviewing role");

        self.check_failure_threshold(role_id)?;

        let mut operations = Vec::new();
        if delta > 0 {
            info!(role = %name, delta, desired, "Requesting additional containers");
            let capability = self.build_resource_requirements(&name)?;
            let request_priority = encode_role_priority(&name, role_id)?;
            for _ in 0..delta {
                let request = self.role_history.request_node(
                    role_id,
                    request_priority,
                    capability,
                    self.record_factory.as_ref(),
                );
                if request.capability.memory_mb > self.container_max_memory {
                    warn!(
                        role = %name,
                        requested_mb = request.capability.memory_mb,
                        max_mb = self.container_max_memory,
                        "Memory requested exceeds container maximum"
                    );
                }
                if let Some(role) = self.role_status.get_mut(&role_id) {
                    role.inc_requested();
                }
                operations.push(RmOperation::ContainerRequest(request));
            }
        } else if delta < 0 {
            let excess = (-delta) as usize;
            info!(role = %name, excess, desired, "Releasing containers");
            let victims = self.role_history.find_nodes_for_release(role_id, excess);
            for node in victims {
                let Some(candidate) = self.find_releasable_on_host(&node.hostname, role_id) else {
                    return Err(StateError::NoReleasableInstance {
                        role_id,
                        host: node.hostname,
                    });
                };
                self.container_release_submitted(&candidate)?;
                operations.push(RmOperation::ContainerRelease(candidate));
            }
        }
        Ok(operations)
    }

    /// The active instance of a role on a host that is not already queued
    /// for release; smallest container id when several qualify.
    fn find_releasable_on_host(&self, hostname: &str, role_id: u32) -> Option<ContainerId> {
        self.active
            .values()
            .filter(|instance| {
                instance.role_id == role_id
                    && instance.hostname() == hostname
                    && !instance.released
            })
            .map(|instance| instance.container_id().clone())
            .min()
    }

    /// Reads a role's resource requirements from the spec, substituting
    /// the cluster maximum for the literal `"max"`.
    pub fn build_resource_requirements(&self, role_name: &str) -> Result<Resource, StateError> {
        let mut capability = self.record_factory.new_resource();
        capability.virtual_cores = self.cluster_spec.resource_requirement(
            role_name,
            keys::ROLE_YARN_CORES,
            keys::DEF_YARN_CORES,
            self.container_max_cores,
        )?;
        capability.memory_mb = self.cluster_spec.resource_requirement(
            role_name,
            keys::ROLE_YARN_MEMORY,
            keys::DEF_YARN_MEMORY,
            self.container_max_memory,
        )?;
        Ok(capability)
    }

    /// Queues every active, not-yet-released container for release. Used
    /// on the teardown path; internal-state refusals are logged, not
    /// raised, so one bad record cannot stall shutdown.
    pub fn release_all_containers(&mut self) -> Vec<RmOperation> {
        let mut ids: Vec<ContainerId> = self
            .active
            .values()
            .filter(|instance| !instance.released)
            .map(|instance| instance.container_id().clone())
            .collect();
        ids.sort();
        info!(count = ids.len(), "Releasing all containers");

        let mut operations = Vec::with_capacity(ids.len());
        for id in ids {
            match self.container_release_submitted(&id) {
                Ok(()) => operations.push(RmOperation::ContainerRelease(id)),
                Err(e) => warn!(container = %id, error = %e, "Release refused"),
            }
        }
        operations
    }

    // -----------------------------------------------------------------
    // Published status
    // -----------------------------------------------------------------

    /// Rebuilds the published description from current state and returns
    /// an owned snapshot for readers.
    pub fn refresh_cluster_status(
        &mut self,
        provider_info: Option<&BTreeMap<String, String>>,
    ) -> ClusterDescription {
        let now = self.clock.now_millis();
        let live_nodes = self.live_node_views();

        let cd = &mut self.cluster_description;
        cd.status_time = now;
        cd.set_info(keys::INFO_STATUS_TIME_MILLIS, now);
        cd.set_info(keys::INFO_STATUS_TIME, human_time(now));
        if let Some(info) = provider_info {
            for (key, value) in info {
                cd.set_info(key.clone(), value);
            }
        }
        cd.set_info(keys::INFO_CONTAINER_MAX_MEMORY, self.container_max_memory);
        cd.set_info(keys::INFO_CONTAINER_MAX_CORES, self.container_max_cores);

        cd.instances.clear();
        cd.live.clear();
        for node in live_nodes {
            cd.instances
                .entry(node.role.clone())
                .or_default()
                .push(node.container_id.clone());
            cd.live
                .entry(node.role.clone())
                .or_default()
                .insert(node.container_id.clone(), node);
        }
        for ids in cd.instances.values_mut() {
            ids.sort();
        }

        cd.statistics.clear();
        for role in self.role_status.values() {
            let name = role.name().to_string();
            cd.set_role_opt(&name, keys::ROLE_INSTANCES, role.desired());
            cd.set_role_opt(&name, keys::ROLE_ACTUAL_INSTANCES, role.actual());
            cd.set_role_opt(&name, keys::ROLE_REQUESTED_INSTANCES, role.requested());
            cd.set_role_opt(&name, keys::ROLE_RELEASING_INSTANCES, role.releasing());
            cd.set_role_opt(&name, keys::ROLE_FAILED_INSTANCES, role.failed());
            cd.set_role_opt(
                &name,
                keys::ROLE_FAILED_STARTING_INSTANCES,
                role.start_failed(),
            );
            cd.statistics.insert(name, role.build_statistics());
        }

        let live_total = self.live.len() as i64
            + if self.app_master_node.is_some() { 1 } else { 0 };
        let mut am_stats = BTreeMap::new();
        am_stats.insert(
            keys::STAT_CONTAINERS_COMPLETED.to_string(),
            self.completed_count,
        );
        am_stats.insert(keys::STAT_CONTAINERS_FAILED.to_string(), self.failed_count);
        am_stats.insert(keys::STAT_CONTAINERS_LIVE.to_string(), live_total);
        am_stats.insert(
            keys::STAT_CONTAINERS_STARTED.to_string(),
            self.started_count,
        );
        am_stats.insert(
            keys::STAT_CONTAINERS_START_FAILED.to_string(),
            self.start_failed_count,
        );
        am_stats.insert(
            keys::STAT_CONTAINERS_SURPLUS.to_string(),
            self.surplus_count,
        );
        am_stats.insert(
            keys::STAT_CONTAINERS_UNKNOWN_COMPLETED.to_string(),
            self.unknown_completions,
        );
        cd.statistics.insert(keys::ROLE_AM.to_string(), am_stats);

        cd.clone()
    }

    /// The fraction of desired instances currently held, or 100 when
    /// nothing is desired.
    pub fn application_progress_percentage(&self) -> f32 {
        let mut desired = 0i64;
        let mut actual = 0i64;
        for role in self.role_status.values() {
            desired += role.desired();
            actual += role.actual();
        }
        if desired == 0 {
            100.0
        } else {
            actual as f32 / desired as f32
        }
    }

    // -----------------------------------------------------------------
    // Queries for status readers. All return owned snapshots.
    // -----------------------------------------------------------------

    pub fn clone_active_list(&self) -> Vec<RoleInstance> {
        let mut instances: Vec<RoleInstance> = self.active.values().cloned().collect();
        instances.sort_by(|a, b| a.container_id().cmp(b.container_id()));
        instances
    }

    pub fn active_container_count(&self) -> usize {
        self.active.len()
    }

    pub fn active_container(&self, container_id: &ContainerId) -> Option<&RoleInstance> {
        self.active.get(container_id)
    }

    pub fn clone_live_list(&self) -> Vec<RoleInstance> {
        let mut instances: Vec<RoleInstance> = self
            .live
            .iter()
            .filter_map(|id| self.active.get(id))
            .cloned()
            .collect();
        if let Some(am) = &self.app_master_node {
            instances.push(am.clone());
        }
        instances.sort_by(|a, b| a.container_id().cmp(b.container_id()));
        instances
    }

    /// A live instance by container id; the AM's own instance counts.
    pub fn live_instance(&self, container_id: &ContainerId) -> Result<RoleInstance, StateError> {
        if let Some(am) = &self.app_master_node {
            if am.container_id() == container_id {
                return Ok(am.clone());
            }
        }
        self.live
            .get(container_id)
            .and_then(|id| self.active.get(id))
            .cloned()
            .ok_or_else(|| StateError::NoSuchInstance(container_id.clone()))
    }

    /// Bulk lookup; unknown ids are skipped, order unspecified.
    pub fn live_instances(&self, container_ids: &[ContainerId]) -> Vec<RoleInstance> {
        container_ids
            .iter()
            .filter_map(|id| self.live_instance(id).ok())
            .collect()
    }

    /// Live instances of one role; an empty name means every role.
    pub fn live_nodes_in_role(&self, role: &str) -> Vec<RoleInstance> {
        self.clone_live_list()
            .into_iter()
            .filter(|instance| role.is_empty() || instance.role == role)
            .collect()
    }

    /// Hostname -> live container ids, the AM's own included.
    pub fn containers_by_node(&self) -> BTreeMap<String, Vec<ContainerId>> {
        let mut by_node: BTreeMap<String, Vec<ContainerId>> = BTreeMap::new();
        for instance in self.clone_live_list() {
            by_node
                .entry(instance.hostname().to_string())
                .or_default()
                .push(instance.container_id().clone());
        }
        by_node
    }

    /// A multi-line rendering of every role's counters, for logs and
    /// teardown reports.
    pub fn container_diagnostics(&self) -> String {
        let mut out = String::new();
        for role in self.role_status.values() {
            out.push_str(&role.to_string());
            out.push('\n');
        }
        out
    }

    fn live_node_views(&self) -> Vec<flock_spec::ClusterNode> {
        let mut views: Vec<flock_spec::ClusterNode> = self
            .live
            .iter()
            .filter_map(|id| self.active.get(id))
            .map(|instance| instance.to_cluster_node())
            .collect();
        if let Some(am) = &self.app_master_node {
            views.push(am.to_cluster_node());
        }
        views
    }

    pub fn cluster_description(&self) -> &ClusterDescription {
        &self.cluster_description
    }

    // -----------------------------------------------------------------
    // Counters and history access
    // -----------------------------------------------------------------

    pub fn completed_count(&self) -> i64 {
        self.completed_count
    }

    pub fn failed_count(&self) -> i64 {
        self.failed_count
    }

    pub fn started_count(&self) -> i64 {
        self.started_count
    }

    pub fn start_failed_count(&self) -> i64 {
        self.start_failed_count
    }

    pub fn surplus_count(&self) -> i64 {
        self.surplus_count
    }

    pub fn unknown_completion_count(&self) -> i64 {
        self.unknown_completions
    }

    pub fn role_history(&self) -> &RoleHistory {
        &self.role_history
    }

    pub fn history_snapshot(&self) -> HistorySnapshot {
        self.role_history.snapshot()
    }

    /// A history snapshot when anything changed since the last one; the
    /// driver persists it outside the engine lock.
    pub fn take_history_snapshot_if_dirty(&mut self) -> Option<HistorySnapshot> {
        self.role_history.take_snapshot_if_dirty()
    }
}

fn stamp_destroyed(instance: &mut RoleInstance, status: &ContainerStatus) {
    instance.state = InstanceState::Destroyed;
    instance.exit_code = Some(status.exit_status);
    if !status.diagnostics.is_empty() {
        instance.diagnostics = Some(status.diagnostics.clone());
    }
}

fn encode_role_priority(role_name: &str, role_id: u32) -> Result<Priority, StateError> {
    priority::encode(role_id, false).map_err(|_| {
        StateError::Config(ConfigError::RoleIdOutOfRange {
            role: role_name.to_string(),
            id: role_id,
            max: priority::MAX_ROLE_ID,
        })
    })
}

fn human_time(millis: i64) -> String {
    chrono::DateTime::from_timestamp_millis(millis)
        .map(|t| t.to_rfc3339())
        .unwrap_or_default()
}
