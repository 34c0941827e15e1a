//! In-memory transactional store
//!
//! Transactions read from a snapshot taken at `begin`, log their writes, and
//! at commit replay the log against the latest committed tables under the
//! write lock. Any constraint failure during replay aborts the commit with
//! nothing applied. Binding checks additionally consult committed state at
//! write time, so a value committed by a concurrent transaction is seen as
//! taken even though it postdates the snapshot. A committed binding this
//! transaction has already released, by deleting or unbinding its holder, is
//! free to rebind.

use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use fleet_core::{
    BindingView, DeleteReport, FleetError, FleetResult, Host, HostId, IdRange, IdentifierBinding,
    Namespace, ResourceDraft, ResourceFilter, ResourceId, ResourceLink, ResourceRecord,
    ResourceView, StoreTransaction, TransactionalStore,
};

use crate::tables::{Tables, WriteOp};

#[derive(Debug)]
struct Shared {
    committed: RwLock<Tables>,
    next_id: AtomicU64,
    commits: AtomicU64,
}

/// Shared handle to an in-memory store
#[derive(Debug, Clone)]
pub struct MemoryStore {
    shared: Arc<Shared>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                committed: RwLock::new(Tables::default()),
                next_id: AtomicU64::new(1),
                commits: AtomicU64::new(0),
            }),
        }
    }

    /// Read-only copy of the committed state
    pub fn snapshot(&self) -> MemorySnapshot {
        MemorySnapshot {
            tables: self.shared.committed.read().clone(),
        }
    }

    /// Number of successful commits so far
    pub fn commit_count(&self) -> u64 {
        self.shared.commits.load(Ordering::SeqCst)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionalStore for MemoryStore {
    type Txn = MemoryTransaction;

    fn begin(&self) -> FleetResult<MemoryTransaction> {
        Ok(MemoryTransaction {
            shared: Arc::clone(&self.shared),
            working: self.shared.committed.read().clone(),
            log: Vec::new(),
            released: BTreeSet::new(),
        })
    }
}

/// Committed state frozen at one instant
#[derive(Debug, Clone)]
pub struct MemorySnapshot {
    tables: Tables,
}

impl MemorySnapshot {
    /// Number of resource rows
    pub fn resource_count(&self) -> usize {
        self.tables.resources.len()
    }

    /// Number of identifier bindings
    pub fn binding_count(&self) -> usize {
        self.tables.bindings.len()
    }
}

impl ResourceView for MemorySnapshot {
    fn host(&self, id: HostId) -> FleetResult<Option<Host>> {
        self.tables.host(id)
    }

    fn resource(&self, id: ResourceId) -> FleetResult<Option<ResourceRecord>> {
        self.tables.resource(id)
    }

    fn find(&self, filter: &ResourceFilter) -> FleetResult<Vec<ResourceRecord>> {
        self.tables.find(filter)
    }

    fn links_of(&self, id: ResourceId) -> FleetResult<Vec<ResourceLink>> {
        self.tables.links_of(id)
    }
}

impl BindingView for MemorySnapshot {
    fn binding(&self, namespace: Namespace, value: u32) -> FleetResult<Option<ResourceId>> {
        self.tables.binding(namespace, value)
    }

    fn bound_values(&self, namespace: Namespace, range: IdRange) -> FleetResult<BTreeSet<u32>> {
        self.tables.bound_values(namespace, range)
    }

    fn bindings_of(&self, resource: ResourceId) -> FleetResult<Vec<IdentifierBinding>> {
        self.tables.bindings_of(resource)
    }
}

/// Open transaction against a [`MemoryStore`]
#[derive(Debug)]
pub struct MemoryTransaction {
    shared: Arc<Shared>,
    working: Tables,
    log: Vec<WriteOp>,
    released: BTreeSet<(Namespace, u32, ResourceId)>,
}

impl MemoryTransaction {
    fn record(&mut self, op: WriteOp) -> FleetResult<()> {
        self.working.apply(&op)?;
        self.log.push(op);
        Ok(())
    }

    /// Whether a committed holder of `(namespace, value)` still counts
    fn holds(&self, namespace: Namespace, value: u32, holder: ResourceId) -> bool {
        !self.released.contains(&(namespace, value, holder))
    }

    /// Number of logged writes
    pub fn pending_writes(&self) -> usize {
        self.log.len()
    }
}

impl ResourceView for MemoryTransaction {
    fn host(&self, id: HostId) -> FleetResult<Option<Host>> {
        self.working.host(id)
    }

    fn resource(&self, id: ResourceId) -> FleetResult<Option<ResourceRecord>> {
        self.working.resource(id)
    }

    fn find(&self, filter: &ResourceFilter) -> FleetResult<Vec<ResourceRecord>> {
        self.working.find(filter)
    }

    fn links_of(&self, id: ResourceId) -> FleetResult<Vec<ResourceLink>> {
        self.working.links_of(id)
    }
}

impl BindingView for MemoryTransaction {
    fn binding(&self, namespace: Namespace, value: u32) -> FleetResult<Option<ResourceId>> {
        if let Some(holder) = self.working.binding(namespace, value)? {
            return Ok(Some(holder));
        }
        let committed = self.shared.committed.read().binding(namespace, value)?;
        Ok(committed.filter(|holder| self.holds(namespace, value, *holder)))
    }

    fn bound_values(&self, namespace: Namespace, range: IdRange) -> FleetResult<BTreeSet<u32>> {
        let mut values = self.working.bound_values(namespace, range)?;
        let committed = self.shared.committed.read().holders_in(namespace, range);
        values.extend(
            committed
                .into_iter()
                .filter(|(value, holder)| self.holds(namespace, *value, *holder))
                .map(|(value, _)| value),
        );
        Ok(values)
    }

    fn bindings_of(&self, resource: ResourceId) -> FleetResult<Vec<IdentifierBinding>> {
        self.working.bindings_of(resource)
    }
}

impl StoreTransaction for MemoryTransaction {
    fn insert_host(&mut self, host: Host) -> FleetResult<()> {
        self.record(WriteOp::InsertHost(host))
    }

    fn insert(&mut self, draft: ResourceDraft) -> FleetResult<ResourceId> {
        let id = ResourceId::new(self.shared.next_id.fetch_add(1, Ordering::SeqCst));
        self.record(WriteOp::Insert(draft.into_record(id)))?;
        Ok(id)
    }

    fn update(&mut self, record: ResourceRecord) -> FleetResult<()> {
        self.record(WriteOp::Update(record))
    }

    fn delete(&mut self, id: ResourceId) -> FleetResult<DeleteReport> {
        let report = self.working.delete(id)?;
        self.log.push(WriteOp::Delete(id));
        self.released.extend(
            report
                .released
                .iter()
                .map(|binding| (binding.namespace, binding.value, binding.resource)),
        );
        Ok(report)
    }

    fn bind(&mut self, binding: IdentifierBinding) -> FleetResult<()> {
        let committed_holder = self
            .shared
            .committed
            .read()
            .binding(binding.namespace, binding.value)?;
        let taken = committed_holder.is_some_and(|holder| {
            holder != binding.resource && self.holds(binding.namespace, binding.value, holder)
        });
        if taken {
            return Err(FleetError::collision(binding.namespace, binding.value));
        }
        self.record(WriteOp::Bind(binding))
    }

    fn unbind(&mut self, namespace: Namespace, value: u32) -> FleetResult<bool> {
        let Some(holder) = self.working.binding(namespace, value)? else {
            return Ok(false);
        };
        self.record(WriteOp::Unbind(IdentifierBinding {
            namespace,
            value,
            resource: holder,
        }))?;
        self.released.insert((namespace, value, holder));
        Ok(true)
    }

    fn link(&mut self, link: ResourceLink) -> FleetResult<()> {
        self.record(WriteOp::Link(link))
    }

    fn commit(self) -> FleetResult<()> {
        if self.log.is_empty() {
            return Ok(());
        }
        let mut committed = self.shared.committed.write();
        let mut staged = committed.clone();
        for op in &self.log {
            staged.apply(op)?;
        }
        *committed = staged;
        self.shared.commits.fetch_add(1, Ordering::SeqCst);
        tracing::trace!(writes = self.log.len(), "memory store commit");
        Ok(())
    }

    fn rollback(self) {
        tracing::trace!(writes = self.log.len(), "memory store rollback");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use fleet_core::{IdentifierKind, ResourceKind, TableId};

    fn seeded() -> (MemoryStore, HostId) {
        let store = MemoryStore::new();
        let host = HostId::new(1);
        let mut txn = store.begin().unwrap();
        txn.insert_host(Host::new(host, "rocky-9", "www1.example.com"))
            .unwrap();
        txn.commit().unwrap();
        (store, host)
    }

    #[test]
    fn rollback_leaves_committed_state_untouched() {
        let (store, host) = seeded();
        let mut txn = store.begin().unwrap();
        let id = txn
            .insert(ResourceDraft::new(ResourceKind::UNIX_USER, "alice").on_host(host))
            .unwrap();
        txn.bind(IdentifierBinding {
            namespace: Namespace::new(host, IdentifierKind::Uid),
            value: 1000,
            resource: id,
        })
        .unwrap();
        txn.rollback();

        let snapshot = store.snapshot();
        assert_eq!(snapshot.resource_count(), 0);
        assert_eq!(snapshot.binding_count(), 0);
    }

    #[test]
    fn delete_releases_bindings_and_join_rows() {
        let (store, host) = seeded();
        let ns = Namespace::new(host, IdentifierKind::Uid);
        let mut txn = store.begin().unwrap();
        let user = txn
            .insert(ResourceDraft::new(ResourceKind::UNIX_USER, "alice").on_host(host))
            .unwrap();
        let group = txn
            .insert(ResourceDraft::new(ResourceKind::UNIX_GROUP, "staff").on_host(host))
            .unwrap();
        txn.bind(IdentifierBinding {
            namespace: ns,
            value: 1000,
            resource: user,
        })
        .unwrap();
        txn.link(ResourceLink {
            table: TableId::UNIX_GROUP_MEMBERS,
            from: user,
            to: group,
        })
        .unwrap();
        txn.commit().unwrap();

        let mut txn = store.begin().unwrap();
        let report = txn.delete(user).unwrap();
        assert_eq!(report.released.len(), 1);
        assert_eq!(report.links_removed.len(), 1);
        txn.commit().unwrap();

        let snapshot = store.snapshot();
        assert_eq!(snapshot.binding(ns, 1000).unwrap(), None);
        assert!(snapshot.links_of(group).unwrap().is_empty());
    }

    #[test]
    fn duplicate_name_on_same_host_is_rejected() {
        let (store, host) = seeded();
        let mut txn = store.begin().unwrap();
        txn.insert(ResourceDraft::new(ResourceKind::UNIX_USER, "alice").on_host(host))
            .unwrap();
        let err = txn
            .insert(ResourceDraft::new(ResourceKind::UNIX_USER, "alice").on_host(host))
            .unwrap_err();
        assert_matches!(err, FleetError::Invalid { .. });
    }
}
