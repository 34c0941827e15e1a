//! # Fleet Core - Foundation
//!
//! **Purpose**: Shared vocabulary for the fleet control plane.
//!
//! # Architecture Constraints
//!
//! **Depends on no other workspace crate.**
//! - YES identifier newtypes, scopes and invalidation records
//! - YES the unified error type
//! - YES effect traits for remote agents, client sessions and authorization
//! - YES the persisted-state contract
//! - YES configuration loading and validation
//! - NO allocation, deletion or fan-out logic (that's `fleet-control`)
//! - NO storage engine (that's `fleet-store`)

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Startup configuration
pub mod config;

/// External collaborator traits
pub mod effects;

/// Unified error type
pub mod errors;

/// Identifier newtypes
pub mod identifiers;

/// Invalidation records and notifications
pub mod invalidation;

/// Inclusive identifier ranges
pub mod range;

/// Account, host and table scopes
pub mod scope;

/// Persisted-state contract
pub mod store;

pub use config::FleetConfig;
pub use errors::{FleetError, FleetResult};
pub use identifiers::{
    AccountId, HostId, IdentifierKind, Namespace, OsVersionId, Principal, ResourceId,
    ResourceKind, SessionId, TableId,
};
pub use invalidation::{InvalidationRecord, Notification};
pub use range::IdRange;
pub use scope::{AccountScope, HostScope, Scope, TableScope};
pub use store::{
    BindingView, DeleteReport, Host, IdentifierBinding, ResourceDraft, ResourceFilter,
    ResourceLink, ResourceRecord, ResourceStatus, ResourceView, StoreTransaction,
    TransactionalStore,
};
