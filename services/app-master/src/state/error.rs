use flock_model::ContainerId;
use flock_spec::ConfigError;
use thiserror::Error;

/// Errors surfaced by the state engine.
///
/// `Config` is fatal at build time. The internal-state variants are fatal to
/// the current request only: the engine has refused to mutate and the caller
/// decides whether to log and continue. `TriggerTeardown` is fatal to the
/// whole cluster.
#[derive(Debug, Error)]
pub enum StateError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// No role is registered under this id.
    #[error("unknown role id {0}")]
    UnknownRoleId(u32),

    /// No role is registered under this name.
    #[error("unknown role {0:?}")]
    UnknownRoleName(String),

    /// Release requested for a container that is not on the active list.
    #[error("no active container {0}")]
    NoActiveContainer(ContainerId),

    /// Release requested for a container already queued for release.
    #[error("container {0} already queued for release")]
    AlreadyReleased(ContainerId),

    /// Start callback for a container that was never submitted, or that
    /// was already announced live.
    #[error("container {0} is not awaiting start")]
    NotStarting(ContainerId),

    /// No live instance with this container id.
    #[error("no live instance {0}")]
    NoSuchInstance(ContainerId),

    /// Release pass could not find a releasable instance on a host the
    /// placement memory nominated.
    #[error("no releasable instance of role {role_id} on host {host:?}")]
    NoReleasableInstance { role_id: u32, host: String },

    /// Role history could not be reloaded at build time.
    #[error("role history: {0}")]
    History(String),

    /// A role's failure count went over the configured threshold; the
    /// cluster is unstable and must be torn down.
    #[error(
        "role {role} failed {failed} times ({start_failed} in startup); \
         threshold is {threshold} - last failure: {last_message:?}"
    )]
    TriggerTeardown {
        role: String,
        failed: i64,
        start_failed: i64,
        threshold: i64,
        last_message: Option<String>,
    },
}

impl StateError {
    /// True for the variants that should end the application.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            StateError::Config(_) | StateError::TriggerTeardown { .. }
        )
    }
}
