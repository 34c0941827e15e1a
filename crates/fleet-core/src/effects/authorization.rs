//! Authorization oracle
//!
//! Rule content lives outside the core. Handlers consult the oracle before
//! allocating or deleting anything.

use crate::identifiers::{Principal, ResourceId};

/// Permission model consulted inside a transaction
pub trait AuthorizationEffects: Send + Sync {
    /// Whether `principal` holds the named permission
    fn has_permission(&self, principal: &Principal, permission: &str) -> bool;

    /// Whether `principal` may act on `resource`
    fn can_access(&self, principal: &Principal, resource: ResourceId) -> bool;
}
