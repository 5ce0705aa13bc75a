use thiserror::Error;

/// Configuration errors, fatal at engine build time.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A dynamic role is missing a mandatory option.
    #[error("role {role}: missing mandatory option {key:?}")]
    MissingRoleOption { role: String, key: String },

    /// A role option failed to parse as the expected type.
    #[error("role {role}: option {key:?} has unparsable value {value:?}")]
    InvalidRoleOption {
        role: String,
        key: String,
        value: String,
    },

    /// A cluster-level option failed to parse.
    #[error("option {key:?} has unparsable value {value:?}")]
    InvalidOption { key: String, value: String },

    /// Two roles share one id; ids double as request priorities and must
    /// be unique.
    #[error("duplicate role id {id}: {existing} and {incoming}")]
    DuplicateRoleId {
        id: u32,
        existing: String,
        incoming: String,
    },

    /// A role id does not fit the priority encoding.
    #[error("role {role}: id {id} out of range 1..={max}")]
    RoleIdOutOfRange { role: String, id: u32, max: u32 },
}
