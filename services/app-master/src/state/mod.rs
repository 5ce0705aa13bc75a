//! The application state engine.
//!
//! Everything in here is synchronous and CPU-bound: the driver layer owns
//! the engine behind one mutex and applies the operations it emits. See the
//! crate docs for the concurrency contract.

mod app_state;
mod error;
mod history_store;
mod node_instance;
mod operations;
mod role_history;
mod role_instance;
mod role_status;

pub use app_state::AppState;
pub use error::StateError;
pub use history_store::{HistorySnapshot, HistoryStore};
pub use node_instance::{NodeEntry, NodeInstance};
pub use operations::{CompletionResult, ContainerAssignment, RmOperation};
pub use role_history::RoleHistory;
pub use role_instance::RoleInstance;
pub use role_status::{RoleStatus, RoleStatusSnapshot};
