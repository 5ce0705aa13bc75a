//! # flock-spec
//!
//! The two mapping-valued documents at the heart of the control plane:
//!
//! - [`ClusterSpec`]: desired state authored by the user. Role options are
//!   string-keyed maps so dynamic roles and pass-through options need no
//!   schema changes; the typed accessors here do all parsing and raise
//!   [`ConfigError`] on bad values.
//! - [`ClusterDescription`]: observed state published to readers, a spec
//!   copy plus per-role counters, instance maps, statistics and timestamps.
//!
//! The spec document is authoritative; the description is derived from it
//! by the state engine and only ever handed out as an owned snapshot.

mod document;
mod error;
pub mod keys;

pub use document::{ClusterDescription, ClusterNode, ClusterSpec, ClusterState, InstanceState};
pub use error::ConfigError;
