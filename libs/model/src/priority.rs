//! Role id <-> request priority codec.
//!
//! The resource manager echoes the priority of the originating request on
//! every allocated container. We pack the role id into the low bits of that
//! integer so an allocation can be routed back to its role without any
//! side-channel state. Bit 24 distinguishes "unique" requests, which some
//! schedulers require to stop requests with identical priorities from being
//! coalesced.
//!
//! Round-trip guarantee: for any role id in range,
//! `extract(encode(id, unique)) == id` for either value of `unique`.

use crate::error::ModelError;
use crate::records::{Container, Priority};

/// Number of low bits that carry the role id.
pub const ROLE_ID_BITS: u32 = 24;

/// Highest encodable role id.
pub const MAX_ROLE_ID: u32 = (1 << ROLE_ID_BITS) - 1;

const UNIQUE_FLAG: u32 = 1 << ROLE_ID_BITS;

/// Packs a role id into a request priority.
///
/// Role ids must be in `1..=MAX_ROLE_ID`; anything else is a configuration
/// error surfaced at engine build time.
pub fn encode(role_id: u32, unique: bool) -> Result<Priority, ModelError> {
    if role_id == 0 || role_id > MAX_ROLE_ID {
        return Err(ModelError::RoleIdOutOfRange {
            id: role_id,
            max: MAX_ROLE_ID,
        });
    }
    let mut raw = role_id;
    if unique {
        raw |= UNIQUE_FLAG;
    }
    Ok(Priority(raw))
}

/// Unpacks the role id from a priority.
pub fn extract(priority: Priority) -> u32 {
    priority.raw() & MAX_ROLE_ID
}

/// Unpacks the role id carried by an allocated container.
pub fn extract_role(container: &Container) -> u32 {
    extract(container.priority)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_plain_and_unique() {
        for id in [1, 2, 7, 255, MAX_ROLE_ID] {
            assert_eq!(extract(encode(id, false).unwrap()), id);
            assert_eq!(extract(encode(id, true).unwrap()), id);
        }
    }

    #[test]
    fn test_unique_flag_does_not_collide_with_role() {
        let plain = encode(5, false).unwrap();
        let unique = encode(5, true).unwrap();
        assert_ne!(plain, unique);
        assert_eq!(extract(plain), extract(unique));
    }

    #[test]
    fn test_out_of_range_rejected() {
        assert!(encode(0, false).is_err());
        assert!(encode(MAX_ROLE_ID + 1, false).is_err());
    }
}
