//! Unified error system for the fleet control plane
//!
//! One error type covers allocation, deletion, storage, remote dispatch and
//! configuration so handlers can propagate with `?` across every layer.

use serde::{Deserialize, Serialize};

use crate::identifiers::{HostId, Namespace, Principal, ResourceId};
use crate::range::IdRange;

/// Result alias used across the workspace
pub type FleetResult<T> = Result<T, FleetError>;

/// Unified error type for all control-plane operations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum FleetError {
    /// Explicitly requested identifier fails the host's allocation policy
    #[error("Policy violation in {namespace}: '{name}' may not use {requested}: {reason}")]
    PolicyViolation {
        /// Namespace the request targeted
        namespace: Namespace,
        /// Name the identifier was requested for
        name: String,
        /// Requested identifier value
        requested: u32,
        /// Why the policy rejected it
        reason: String,
    },

    /// Identifier already bound to a live resource
    #[error("Collision in {namespace}: {value} is already in use")]
    Collision {
        /// Namespace holding the binding
        namespace: Namespace,
        /// Contended value
        value: u32,
    },

    /// No free identifier left in the allocatable range
    #[error("Namespace exhausted: {namespace} has no free value in {range}")]
    NamespaceExhausted {
        /// Exhausted namespace
        namespace: Namespace,
        /// Range that was scanned
        range: IdRange,
    },

    /// A dependency rule found a resource still relying on the target
    #[error("Dependency exists: rule '{rule}' blocked by {blocker}")]
    DependencyExists {
        /// Name of the rule that fired
        rule: String,
        /// First blocking resource found
        blocker: ResourceId,
    },

    /// Resource is reserved and can never be removed
    #[error("Permanently protected: {resource} ({reason})")]
    PermanentlyProtected {
        /// Protected resource
        resource: ResourceId,
        /// Why it is protected
        reason: String,
    },

    /// Principal lacks a permission or access to a resource
    #[error("Permission denied for {principal}: {message}")]
    PermissionDenied {
        /// Principal that was refused
        principal: Principal,
        /// What was refused
        message: String,
    },

    /// Referenced entity does not exist
    #[error("Not found: {message}")]
    NotFound {
        /// Description of what was not found
        message: String,
    },

    /// Remote agent call failed after commit
    #[error("Remote agent unavailable on {host}: {reason}")]
    RemoteAgentUnavailable {
        /// Host whose agent failed
        host: HostId,
        /// Failure description
        reason: String,
    },

    /// Transaction deadline expired
    #[error("Timed out: {operation}")]
    Timeout {
        /// Operation that hit the deadline
        operation: String,
    },

    /// Configuration or policy table rejected
    #[error("Configuration error: {message}")]
    Config {
        /// Error message describing the configuration issue
        message: String,
    },

    /// Persisted-state operation failed
    #[error("Storage error: {message}")]
    Storage {
        /// Error message describing the storage failure
        message: String,
    },

    /// Invalid input
    #[error("Invalid: {message}")]
    Invalid {
        /// Error message describing the invalid input
        message: String,
    },

    /// Internal system error
    #[error("Internal error: {message}")]
    Internal {
        /// Error message describing the internal error
        message: String,
    },
}

impl FleetError {
    /// Create a policy violation error
    pub fn policy_violation(
        namespace: Namespace,
        name: impl Into<String>,
        requested: u32,
        reason: impl Into<String>,
    ) -> Self {
        Self::PolicyViolation {
            namespace,
            name: name.into(),
            requested,
            reason: reason.into(),
        }
    }

    /// Create a collision error
    pub fn collision(namespace: Namespace, value: u32) -> Self {
        Self::Collision { namespace, value }
    }

    /// Create a namespace exhausted error
    pub fn namespace_exhausted(namespace: Namespace, range: IdRange) -> Self {
        Self::NamespaceExhausted { namespace, range }
    }

    /// Create a dependency exists error
    pub fn dependency_exists(rule: impl Into<String>, blocker: ResourceId) -> Self {
        Self::DependencyExists {
            rule: rule.into(),
            blocker,
        }
    }

    /// Create a permanently protected error
    pub fn permanently_protected(resource: ResourceId, reason: impl Into<String>) -> Self {
        Self::PermanentlyProtected {
            resource,
            reason: reason.into(),
        }
    }

    /// Create a permission denied error
    pub fn permission_denied(principal: Principal, message: impl Into<String>) -> Self {
        Self::PermissionDenied {
            principal,
            message: message.into(),
        }
    }

    /// Create a not found error
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    /// Create a remote agent unavailable error
    pub fn remote_unavailable(host: HostId, reason: impl Into<String>) -> Self {
        Self::RemoteAgentUnavailable {
            host,
            reason: reason.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a storage error
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Create an invalid input error
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether the error should be shown to the requesting user as-is
    pub fn is_user_visible(&self) -> bool {
        matches!(
            self,
            Self::PolicyViolation { .. }
                | Self::Collision { .. }
                | Self::NamespaceExhausted { .. }
                | Self::DependencyExists { .. }
                | Self::PermanentlyProtected { .. }
                | Self::PermissionDenied { .. }
                | Self::NotFound { .. }
                | Self::Invalid { .. }
        )
    }

    /// Whether the user can succeed by switching to auto-allocation
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::PolicyViolation { .. } | Self::Collision { .. })
    }

    /// Whether re-running the whole transaction (with a fresh scan) may succeed
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Collision { .. })
    }
}

impl From<std::io::Error> for FleetError {
    fn from(err: std::io::Error) -> Self {
        Self::internal(format!("I/O error: {err}"))
    }
}

impl From<toml::de::Error> for FleetError {
    fn from(err: toml::de::Error) -> Self {
        Self::config(format!("Invalid TOML: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifiers::IdentifierKind;

    fn ns() -> Namespace {
        Namespace::new(HostId::new(1), IdentifierKind::Uid)
    }

    #[test]
    fn retry_classification_matches_taxonomy() {
        assert!(FleetError::collision(ns(), 500).is_retryable());
        assert!(FleetError::policy_violation(ns(), "svc", 500, "unknown name").is_retryable());
        assert!(!FleetError::permanently_protected(ResourceId::new(1), "root").is_retryable());
        assert!(!FleetError::namespace_exhausted(ns(), IdRange::new(500, 600)).is_retryable());
    }

    #[test]
    fn remote_failures_are_not_user_visible() {
        assert!(!FleetError::remote_unavailable(HostId::new(3), "refused").is_user_visible());
        assert!(FleetError::dependency_exists("child-account-canceled", ResourceId::new(9))
            .is_user_visible());
    }

    #[test]
    fn dependency_message_names_rule_and_blocker() {
        let err = FleetError::dependency_exists("child-account-canceled", ResourceId::new(42));
        let rendered = err.to_string();
        assert!(rendered.contains("child-account-canceled"));
        assert!(rendered.contains("resource-42"));
    }
}
