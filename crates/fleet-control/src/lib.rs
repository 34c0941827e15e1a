//! # Fleet Control - Orchestration
//!
//! **Purpose**: The shared substrate beneath every resource-management
//! operation of the fleet control plane.
//!
//! - Policy-driven allocation of host-unique uids, gids and ports
//! - Dependency-safe deletion through ordered, composable rules
//! - Transactional invalidation fan-out to in-process fact caches and client
//!   sessions
//! - A transaction context that fixes the order authorize, validate, write,
//!   record, commit, fan out, and only then call remote agents
//!
//! # Architecture Constraints
//!
//! **Depends on `fleet-core` only.**
//! - YES allocation, deletion and invalidation logic
//! - YES post-commit remote dispatch with host cooldown
//! - YES thin handlers composing the mechanisms above
//! - NO storage engine (use `fleet-store` or another `TransactionalStore`)
//! - NO transport to agents or clients (implemented behind effect traits)

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Identifier allocation against policy and live bindings
pub mod allocator;

/// Remote host cooldown tracking
pub mod availability;

/// Memoized facts and the process cache registry
pub mod cache;

/// Operation orchestration
pub mod control_plane;

/// Transaction deadlines
pub mod deadline;

/// Dependency-safe deletion
pub mod deletion;

/// Post-commit invalidation fan-out
pub mod invalidation;

/// Resource handlers
pub mod operations;

/// Per-OS allocation policy tables
pub mod policy;

/// Per-operation transaction context
pub mod transaction;

pub use allocator::IdentifierAllocator;
pub use availability::{HostAvailability, HostStatus};
pub use cache::{CacheRegistry, CacheStats, LocalFactCache};
pub use control_plane::{
    AgentReading, Committed, ControlPlane, ControlPlaneBuilder, Outcome, RemoteFailure,
    ACCOUNT_DISABLED_CACHE,
};
pub use deadline::Deadline;
pub use deletion::{
    standard_policies, DeleteMode, DeletionPolicy, DependencyRule, Removal, SafeDeleter,
};
pub use invalidation::{
    FanoutReport, InvalidationBus, InvalidationSubscriber, NotificationPump,
    PendingInvalidations, PumpStats, SessionRegistry,
};
pub use operations::{NewUnixUser, Provisioned};
pub use policy::{Classification, KindPolicy, OsPolicy, PolicyRegistry};
pub use transaction::{Services, TransactionContext};
