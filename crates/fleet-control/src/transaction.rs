//! Per-operation transaction context
//!
//! Handlers receive a [`TransactionContext`] from
//! [`ControlPlane`](crate::ControlPlane) and do all of their work through it:
//! authorization, allocation, dependency-checked deletion, writes and
//! invalidation records. Remote-agent calls can only be queued here; the
//! control plane sends them once the store has committed, so no agent call
//! ever runs while the transaction is open.

use std::sync::Arc;

use fleet_core::effects::{AuthorizationEffects, RemoteCall};
use fleet_core::{
    AccountId, AccountScope, FleetError, FleetResult, Host, HostId, HostScope, IdentifierBinding,
    IdentifierKind, Namespace, Principal, ResourceDraft, ResourceId, ResourceRecord, Scope,
    StoreTransaction, TableId,
};

use crate::allocator::IdentifierAllocator;
use crate::deadline::Deadline;
use crate::deletion::{DeleteMode, Removal, SafeDeleter};
use crate::invalidation::PendingInvalidations;
use crate::policy::PolicyRegistry;

/// Shared collaborators handed to every transaction
#[derive(Clone)]
pub struct Services {
    /// Allocation policy tables
    pub policies: Arc<PolicyRegistry>,
    /// Deletion rule engine
    pub deleter: Arc<SafeDeleter>,
    /// Authorization oracle
    pub authorization: Arc<dyn AuthorizationEffects>,
}

impl std::fmt::Debug for Services {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Services")
            .field("policies", &self.policies.len())
            .field("deleter", &self.deleter)
            .finish_non_exhaustive()
    }
}

/// Everything one operation does before commit
pub struct TransactionContext<'a, T: StoreTransaction> {
    txn: T,
    principal: &'a Principal,
    services: &'a Services,
    deadline: Deadline,
    pending: PendingInvalidations,
    remote_calls: Vec<RemoteCall>,
}

impl<'a, T: StoreTransaction> TransactionContext<'a, T> {
    pub(crate) fn new(
        txn: T,
        principal: &'a Principal,
        services: &'a Services,
        deadline: Deadline,
    ) -> Self {
        Self {
            txn,
            principal,
            services,
            deadline,
            pending: PendingInvalidations::new(),
            remote_calls: Vec::new(),
        }
    }

    /// Principal the operation runs for
    pub fn principal(&self) -> &Principal {
        self.principal
    }

    /// Read access to the open transaction
    pub fn store(&self) -> &T {
        &self.txn
    }

    /// Write access to the open transaction
    ///
    /// Raw writes must be paired with [`record`](Self::record) for every
    /// table whose cached facts they change.
    pub fn store_mut(&mut self) -> &mut T {
        &mut self.txn
    }

    /// Deadline inherited from the transaction timeout
    pub fn deadline(&self) -> &Deadline {
        &self.deadline
    }

    /// Fail with `Timeout` once the transaction deadline has passed
    pub fn check_deadline(&self, operation: &str) -> FleetResult<()> {
        self.deadline.check(operation)
    }

    // ── Authorization ───────────────────────────────────────────────────────

    /// Require a named permission
    pub fn authorize(&self, permission: &str) -> FleetResult<()> {
        if self
            .services
            .authorization
            .has_permission(self.principal, permission)
        {
            Ok(())
        } else {
            tracing::debug!(principal = %self.principal, permission, "permission denied");
            Err(FleetError::permission_denied(
                self.principal.clone(),
                format!("missing permission {permission}"),
            ))
        }
    }

    /// Require access to one resource
    pub fn require_access(&self, resource: ResourceId) -> FleetResult<()> {
        if self
            .services
            .authorization
            .can_access(self.principal, resource)
        {
            Ok(())
        } else {
            Err(FleetError::permission_denied(
                self.principal.clone(),
                format!("no access to {resource}"),
            ))
        }
    }

    // ── Reads ───────────────────────────────────────────────────────────────

    /// Host row; `NotFound` if not provisioned
    pub fn host(&self, id: HostId) -> FleetResult<Host> {
        self.txn
            .host(id)?
            .ok_or_else(|| FleetError::not_found(format!("{id}")))
    }

    /// Resource row; `NotFound` if absent
    pub fn resource(&self, id: ResourceId) -> FleetResult<ResourceRecord> {
        self.txn
            .resource(id)?
            .ok_or_else(|| FleetError::not_found(format!("{id}")))
    }

    // ── Allocation ──────────────────────────────────────────────────────────

    /// Validate an explicit identifier or pick the lowest free one
    pub fn allocate(
        &self,
        host: HostId,
        kind: IdentifierKind,
        requested: Option<u32>,
        name: &str,
    ) -> FleetResult<u32> {
        let host = self.host(host)?;
        IdentifierAllocator::new(&self.services.policies).allocate(
            &self.txn,
            &host,
            kind,
            requested,
            name,
            &self.deadline,
        )
    }

    /// Allocate an identifier and bind it to `resource`
    ///
    /// For auto-allocation a bind-time collision, caused by a concurrent
    /// commit after the scan, triggers a rescan. Each rescan sees at least
    /// one more bound value, so the loop ends by the time the range is
    /// exhausted. Explicit requests are never retried.
    pub fn allocate_and_bind(
        &mut self,
        host: HostId,
        kind: IdentifierKind,
        requested: Option<u32>,
        name: &str,
        resource: ResourceId,
    ) -> FleetResult<u32> {
        let host_row = self.host(host)?;
        let namespace = Namespace::new(host, kind);
        let services = self.services;
        let allocator = IdentifierAllocator::new(&services.policies);
        let mut previous = None;

        loop {
            let value =
                allocator.allocate(&self.txn, &host_row, kind, requested, name, &self.deadline)?;
            if previous == Some(value) {
                return Err(FleetError::collision(namespace, value));
            }
            let binding = IdentifierBinding {
                namespace,
                value,
                resource,
            };
            match self.txn.bind(binding) {
                Ok(()) => {
                    let accounts = self.account_scope_of(resource)?;
                    self.record(
                        TableId::IDENTIFIER_BINDINGS,
                        accounts,
                        Scope::one(host),
                        true,
                    );
                    tracing::debug!(%namespace, value, %resource, "identifier bound");
                    return Ok(value);
                }
                Err(err) if err.is_conflict() && requested.is_none() => {
                    tracing::debug!(%namespace, value, "bind collided; rescanning");
                    previous = Some(value);
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn account_scope_of(&self, resource: ResourceId) -> FleetResult<AccountScope> {
        Ok(account_scope(self.resource(resource)?.account))
    }

    // ── Writes ──────────────────────────────────────────────────────────────

    /// Insert a resource and record a structural change to `table`
    pub fn insert(&mut self, table: TableId, draft: ResourceDraft) -> FleetResult<ResourceId> {
        let accounts = account_scope(draft.account.clone());
        let hosts = host_scope(draft.host);
        let id = self.txn.insert(draft)?;
        self.record(table, accounts, hosts, true);
        Ok(id)
    }

    /// Replace a resource row and record an in-place change to `table`
    pub fn update(&mut self, table: TableId, record: ResourceRecord) -> FleetResult<()> {
        let accounts = account_scope(record.account.clone());
        let hosts = host_scope(record.host);
        self.txn.update(record)?;
        self.record(table, accounts, hosts, false);
        Ok(())
    }

    /// Dependency-checked delete on behalf of the principal
    pub fn delete(&mut self, id: ResourceId) -> FleetResult<Vec<Removal>> {
        let deleter = Arc::clone(&self.services.deleter);
        let authorization = Arc::clone(&self.services.authorization);
        let mode = DeleteMode::Authorized {
            oracle: authorization.as_ref(),
            principal: self.principal,
        };
        self.delete_with(&deleter, id, mode)
    }

    /// Dependency-checked delete without authorization checks
    ///
    /// For internal cascades only; every dependency rule still runs.
    pub fn delete_trusted(&mut self, id: ResourceId) -> FleetResult<Vec<Removal>> {
        let deleter = Arc::clone(&self.services.deleter);
        self.delete_with(&deleter, id, DeleteMode::Trusted)
    }

    fn delete_with(
        &mut self,
        deleter: &SafeDeleter,
        id: ResourceId,
        mode: DeleteMode<'_>,
    ) -> FleetResult<Vec<Removal>> {
        let removals = deleter.delete(&mut self.txn, id, mode, &self.deadline)?;
        for removal in &removals {
            let accounts = account_scope(removal.report.record.account.clone());
            let hosts = host_scope(removal.report.record.host);
            for table in &removal.tables {
                self.record(table.clone(), accounts.clone(), hosts.clone(), true);
            }
        }
        Ok(removals)
    }

    // ── Invalidation and post-commit work ───────────────────────────────────

    /// Note that cached facts derived from `table` may be stale after commit
    pub fn record(
        &mut self,
        table: TableId,
        accounts: AccountScope,
        hosts: HostScope,
        structural: bool,
    ) {
        self.pending.record_parts(table, accounts, hosts, structural);
    }

    /// Records gathered so far
    pub fn pending(&self) -> &PendingInvalidations {
        &self.pending
    }

    /// Queue a remote-agent call to run after a successful commit
    pub fn after_commit(&mut self, call: RemoteCall) {
        self.remote_calls.push(call);
    }

    pub(crate) fn into_parts(self) -> (T, PendingInvalidations, Vec<RemoteCall>) {
        (self.txn, self.pending, self.remote_calls)
    }
}

fn account_scope(account: Option<AccountId>) -> AccountScope {
    account.map_or(Scope::All, Scope::one)
}

fn host_scope(host: Option<HostId>) -> HostScope {
    host.map_or(Scope::All, Scope::one)
}
