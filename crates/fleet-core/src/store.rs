//! Persisted-state contract
//!
//! The relational store is authoritative for hosts, resources, identifier
//! bindings and join rows. Control-plane logic only reads and writes through
//! a [`StoreTransaction`], so every check and write of one operation happens
//! under the same transaction. The store owns the `(host, kind, value)`
//! uniqueness constraint that backstops allocator races.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::errors::FleetResult;
use crate::identifiers::{
    AccountId, HostId, Namespace, OsVersionId, ResourceId, ResourceKind, TableId,
};
use crate::range::IdRange;

// ─────────────────────────────────────────────────────────────────────────────
// Rows
// ─────────────────────────────────────────────────────────────────────────────

/// A managed machine; immutable once provisioned
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Host {
    /// Host identifier
    pub id: HostId,
    /// OS version selecting the allocation policy
    pub os_version: OsVersionId,
    /// Fully qualified host name
    pub hostname: String,
}

impl Host {
    /// Create a host row
    pub fn new(id: HostId, os_version: impl Into<OsVersionId>, hostname: impl Into<String>) -> Self {
        Self {
            id,
            os_version: os_version.into(),
            hostname: hostname.into(),
        }
    }
}

/// Lifecycle status of a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceStatus {
    /// In service
    Active,
    /// Temporarily disabled
    Disabled,
    /// Canceled, awaiting removal
    Canceled,
}

/// A resource row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRecord {
    /// Primary key
    pub id: ResourceId,
    /// Resource kind
    pub kind: ResourceKind,
    /// Kind-specific unique name (account name, username, domain, ...)
    pub name: String,
    /// Owning account
    pub account: Option<AccountId>,
    /// Host the resource lives on, if host-bound
    pub host: Option<HostId>,
    /// Owning parent resource
    pub parent: Option<ResourceId>,
    /// Other resources this one depends on
    pub references: BTreeSet<ResourceId>,
    /// Lifecycle status
    pub status: ResourceStatus,
}

/// A resource row before the store assigns its primary key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceDraft {
    /// Resource kind
    pub kind: ResourceKind,
    /// Kind-specific unique name
    pub name: String,
    /// Owning account
    pub account: Option<AccountId>,
    /// Host the resource lives on
    pub host: Option<HostId>,
    /// Owning parent resource
    pub parent: Option<ResourceId>,
    /// Resources this one depends on
    pub references: BTreeSet<ResourceId>,
    /// Initial status
    pub status: ResourceStatus,
}

impl ResourceDraft {
    /// Start a draft for an active resource
    pub fn new(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            account: None,
            host: None,
            parent: None,
            references: BTreeSet::new(),
            status: ResourceStatus::Active,
        }
    }

    /// Set the owning account
    pub fn owned_by(mut self, account: AccountId) -> Self {
        self.account = Some(account);
        self
    }

    /// Place the resource on a host
    pub fn on_host(mut self, host: HostId) -> Self {
        self.host = Some(host);
        self
    }

    /// Set the owning parent resource
    pub fn with_parent(mut self, parent: ResourceId) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Add a dependency on another resource
    pub fn referencing(mut self, target: ResourceId) -> Self {
        self.references.insert(target);
        self
    }

    /// Override the initial status
    pub fn with_status(mut self, status: ResourceStatus) -> Self {
        self.status = status;
        self
    }

    /// Materialize with an assigned key
    pub fn into_record(self, id: ResourceId) -> ResourceRecord {
        ResourceRecord {
            id,
            kind: self.kind,
            name: self.name,
            account: self.account,
            host: self.host,
            parent: self.parent,
            references: self.references,
            status: self.status,
        }
    }
}

/// A live identifier binding in a host namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdentifierBinding {
    /// Namespace the value lives in
    pub namespace: Namespace,
    /// Bound value
    pub value: u32,
    /// Resource holding the value
    pub resource: ResourceId,
}

/// Join row between two resources, removed together with either end
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceLink {
    /// Table holding the join row
    pub table: TableId,
    /// Owning side
    pub from: ResourceId,
    /// Referenced side
    pub to: ResourceId,
}

/// Predicate over resource rows
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceFilter {
    /// Restrict to one kind
    pub kind: Option<ResourceKind>,
    /// Restrict to one owning account
    pub account: Option<AccountId>,
    /// Restrict to one host
    pub host: Option<HostId>,
    /// Restrict to children of one parent
    pub parent: Option<ResourceId>,
    /// Restrict to resources referencing a target
    pub references: Option<ResourceId>,
}

impl ResourceFilter {
    /// Filter on kind
    pub fn kind(kind: ResourceKind) -> Self {
        Self {
            kind: Some(kind),
            ..Self::default()
        }
    }

    /// Add an account restriction
    pub fn account(mut self, account: AccountId) -> Self {
        self.account = Some(account);
        self
    }

    /// Add a host restriction
    pub fn host(mut self, host: HostId) -> Self {
        self.host = Some(host);
        self
    }

    /// Add a parent restriction
    pub fn parent(mut self, parent: ResourceId) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Add a reference restriction
    pub fn references(mut self, target: ResourceId) -> Self {
        self.references = Some(target);
        self
    }

    /// Whether a record satisfies every restriction
    pub fn matches(&self, record: &ResourceRecord) -> bool {
        self.kind.as_ref().map_or(true, |k| &record.kind == k)
            && self
                .account
                .as_ref()
                .map_or(true, |a| record.account.as_ref() == Some(a))
            && self.host.map_or(true, |h| record.host == Some(h))
            && self.parent.map_or(true, |p| record.parent == Some(p))
            && self
                .references
                .map_or(true, |t| record.references.contains(&t))
    }
}

/// Everything a delete removed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteReport {
    /// The removed row
    pub record: ResourceRecord,
    /// Identifier bindings released with it
    pub released: Vec<IdentifierBinding>,
    /// Join rows removed with it
    pub links_removed: Vec<ResourceLink>,
    /// Canceled rows that pointed at it, as left after the pointer was cleared
    pub detached: Vec<ResourceRecord>,
}

impl DeleteReport {
    /// Tables structurally changed by the delete, beyond the resource's own table
    pub fn affected_tables(&self) -> BTreeSet<TableId> {
        let mut tables: BTreeSet<TableId> =
            self.links_removed.iter().map(|l| l.table.clone()).collect();
        if !self.released.is_empty() {
            tables.insert(TableId::IDENTIFIER_BINDINGS);
        }
        tables
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Store traits
// ─────────────────────────────────────────────────────────────────────────────

/// Read access to hosts, resources and join rows
pub trait ResourceView {
    /// Look up a host
    fn host(&self, id: HostId) -> FleetResult<Option<Host>>;

    /// Look up a resource
    fn resource(&self, id: ResourceId) -> FleetResult<Option<ResourceRecord>>;

    /// All resources matching a filter, ordered by id
    fn find(&self, filter: &ResourceFilter) -> FleetResult<Vec<ResourceRecord>>;

    /// Join rows mentioning a resource on either side
    fn links_of(&self, id: ResourceId) -> FleetResult<Vec<ResourceLink>>;
}

/// Read access to identifier bindings
pub trait BindingView {
    /// Resource bound at `(namespace, value)`, if any
    fn binding(&self, namespace: Namespace, value: u32) -> FleetResult<Option<ResourceId>>;

    /// Every bound value of `namespace` inside `range`
    fn bound_values(&self, namespace: Namespace, range: IdRange) -> FleetResult<BTreeSet<u32>>;

    /// Bindings held by a resource
    fn bindings_of(&self, resource: ResourceId) -> FleetResult<Vec<IdentifierBinding>>;
}

/// One open transaction against the persisted store
pub trait StoreTransaction: ResourceView + BindingView + Send {
    /// Provision a host row
    fn insert_host(&mut self, host: Host) -> FleetResult<()>;

    /// Insert a resource and return its assigned key
    ///
    /// `NotFound` if the parent or a referenced resource does not exist.
    fn insert(&mut self, draft: ResourceDraft) -> FleetResult<ResourceId>;

    /// Replace an existing resource row
    fn update(&mut self, record: ResourceRecord) -> FleetResult<()>;

    /// Remove a resource with its bindings and join rows
    ///
    /// `DependencyExists` while a row that is not canceled names the resource
    /// as its parent or in its references. Canceled rows are detached.
    fn delete(&mut self, id: ResourceId) -> FleetResult<DeleteReport>;

    /// Bind an identifier; `Collision` if the value is already taken
    fn bind(&mut self, binding: IdentifierBinding) -> FleetResult<()>;

    /// Release a binding, returning whether one existed
    fn unbind(&mut self, namespace: Namespace, value: u32) -> FleetResult<bool>;

    /// Add a join row
    fn link(&mut self, link: ResourceLink) -> FleetResult<()>;

    /// Make every write durable, re-checking constraints against committed state
    fn commit(self) -> FleetResult<()>
    where
        Self: Sized;

    /// Discard every write
    fn rollback(self)
    where
        Self: Sized;
}

/// Factory for transactions
pub trait TransactionalStore: Send + Sync {
    /// Transaction type handed to operations
    type Txn: StoreTransaction;

    /// Open a transaction
    fn begin(&self) -> FleetResult<Self::Txn>;
}
