//! flock Application Master
//!
//! The application master runs one long-lived control loop per cluster: it
//! owns the state engine that reconciles the population of running
//! containers against the cluster specification, requests containers when a
//! role is short, releases them when a role is in surplus, and publishes a
//! live description of the cluster.
//!
//! ## Architecture
//!
//! ```text
//! RM callbacks ─┐
//! NM callbacks ─┼─> AppState (one mutex, synchronous entry points)
//! review timer ─┤        │
//! status timer ─┘        └─> RmOperation batch ─> driver ─> resource manager
//! ```
//!
//! The engine ([`state::AppState`]) is a plain synchronous object; every
//! entry point is CPU-bound and does no I/O. The driver layer owns it behind
//! `Arc<tokio::sync::Mutex<_>>`, dispatches the operations it emits, and
//! persists role-history snapshots outside the lock.
//!
//! ## Modules
//!
//! - `state`: the engine: role status, role instances, role history,
//!   resource-manager operations, the reconciler itself
//! - `providers`: the role-catalogue interface workload providers implement
//! - `driver`: async loops and the operation-dispatch seam
//! - `clock`: injectable time source

pub mod clock;
pub mod config;
pub mod driver;
pub mod providers;
pub mod state;

pub use clock::{Clock, ManualClock, SystemClock};
pub use providers::{LaunchContext, Provider, ProviderRole, WorkerPoolProvider};
pub use state::{AppState, CompletionResult, ContainerAssignment, RmOperation, StateError};
