use thiserror::Error;

/// Errors from parsing identifiers or packing priorities.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModelError {
    /// The identifier string was empty.
    #[error("identifier is empty")]
    EmptyId,

    /// The identifier contained whitespace or control characters.
    #[error("invalid identifier: {0:?}")]
    InvalidId(String),

    /// A node address was not in `host:port` form.
    #[error("invalid node address: {0:?}")]
    InvalidNodeAddress(String),

    /// A role id does not fit the priority encoding.
    #[error("role id {id} out of range 1..={max}")]
    RoleIdOutOfRange { id: u32, max: u32 },
}
