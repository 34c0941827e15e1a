//! Dependency-safe deletion
//!
//! Every resource kind registers a [`DeletionPolicy`]: the permission the
//! caller needs, an optional permanent-protection check, an ordered list of
//! [`DependencyRule`]s and an optional cascade into owned children. The
//! [`SafeDeleter`] plans the whole cascade against the open transaction
//! before writing anything, so a refused delete leaves the transaction
//! untouched.

mod catalog;
mod rules;

pub use catalog::standard_policies;
pub use rules::{DependencyRule, RulePredicate};

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use fleet_core::effects::AuthorizationEffects;
use fleet_core::{
    DeleteReport, FleetError, FleetResult, Principal, ResourceId, ResourceKind, ResourceRecord,
    ResourceView, StoreTransaction, TableId,
};

use crate::deadline::Deadline;

/// Returns a reason when the resource may never be removed
pub type ProtectedCheck =
    dyn Fn(&dyn ResourceView, &ResourceRecord) -> FleetResult<Option<String>> + Send + Sync;

/// Returns the owned children removed together with a resource
pub type CascadeSelector =
    dyn Fn(&dyn ResourceView, &ResourceRecord) -> FleetResult<Vec<ResourceId>> + Send + Sync;

// ─────────────────────────────────────────────────────────────────────────────
// Policies
// ─────────────────────────────────────────────────────────────────────────────

/// How one resource kind is deleted
#[derive(Clone)]
pub struct DeletionPolicy {
    kind: ResourceKind,
    table: TableId,
    permission: String,
    rules: Vec<DependencyRule>,
    protected: Option<Arc<ProtectedCheck>>,
    cascade: Option<Arc<CascadeSelector>>,
    extra_tables: BTreeSet<TableId>,
}

impl DeletionPolicy {
    /// Policy for `kind`, stored in `table`, gated by `permission`
    pub fn new(kind: ResourceKind, table: TableId, permission: impl Into<String>) -> Self {
        Self {
            kind,
            table,
            permission: permission.into(),
            rules: Vec::new(),
            protected: None,
            cascade: None,
            extra_tables: BTreeSet::new(),
        }
    }

    /// Append a rule; rules run in the order added
    pub fn rule(mut self, rule: DependencyRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Install the permanent-protection check
    pub fn protected_when<F>(mut self, check: F) -> Self
    where
        F: Fn(&dyn ResourceView, &ResourceRecord) -> FleetResult<Option<String>>
            + Send
            + Sync
            + 'static,
    {
        self.protected = Some(Arc::new(check));
        self
    }

    /// Remove the selected children before the resource itself
    pub fn cascade_to<F>(mut self, selector: F) -> Self
    where
        F: Fn(&dyn ResourceView, &ResourceRecord) -> FleetResult<Vec<ResourceId>>
            + Send
            + Sync
            + 'static,
    {
        self.cascade = Some(Arc::new(selector));
        self
    }

    /// Another table whose cached facts depend on this kind
    pub fn invalidates(mut self, table: TableId) -> Self {
        self.extra_tables.insert(table);
        self
    }

    /// Kind this policy governs
    pub fn kind(&self) -> &ResourceKind {
        &self.kind
    }

    /// Table holding resources of this kind
    pub fn table(&self) -> &TableId {
        &self.table
    }

    /// Permission required for an authorized delete
    pub fn permission(&self) -> &str {
        &self.permission
    }

    /// Rules in evaluation order
    pub fn rules(&self) -> &[DependencyRule] {
        &self.rules
    }
}

impl fmt::Debug for DeletionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeletionPolicy")
            .field("kind", &self.kind)
            .field("table", &self.table)
            .field("permission", &self.permission)
            .field("rules", &self.rules)
            .field("protected", &self.protected.is_some())
            .field("cascade", &self.cascade.is_some())
            .field("extra_tables", &self.extra_tables)
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Deleter
// ─────────────────────────────────────────────────────────────────────────────

/// Who is asking for the delete
#[derive(Clone, Copy)]
pub enum DeleteMode<'a> {
    /// Caller-initiated; permission and access are checked
    Authorized {
        /// Authorization oracle
        oracle: &'a dyn AuthorizationEffects,
        /// Requesting principal
        principal: &'a Principal,
    },
    /// Internal cascade; authorization is skipped, rules still run
    Trusted,
}

impl fmt::Debug for DeleteMode<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Authorized { principal, .. } => {
                f.debug_struct("Authorized").field("principal", principal).finish()
            }
            Self::Trusted => f.write_str("Trusted"),
        }
    }
}

/// One resource removed by a delete
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Removal {
    /// What the store removed
    pub report: DeleteReport,
    /// Tables to invalidate for this removal
    pub tables: BTreeSet<TableId>,
}

/// Rule engine gating every resource removal
#[derive(Debug, Clone, Default)]
pub struct SafeDeleter {
    policies: HashMap<ResourceKind, DeletionPolicy>,
}

impl SafeDeleter {
    /// Deleter with no registered kinds
    pub fn new() -> Self {
        Self::default()
    }

    /// Deleter over a set of policies
    pub fn with_policies(policies: impl IntoIterator<Item = DeletionPolicy>) -> Self {
        let mut deleter = Self::new();
        for policy in policies {
            deleter.register(policy);
        }
        deleter
    }

    /// Register or replace the policy for a kind
    pub fn register(&mut self, policy: DeletionPolicy) -> Option<DeletionPolicy> {
        self.policies.insert(policy.kind.clone(), policy)
    }

    /// Policy for a kind
    pub fn policy(&self, kind: &ResourceKind) -> FleetResult<&DeletionPolicy> {
        self.policies
            .get(kind)
            .ok_or_else(|| FleetError::invalid(format!("no deletion policy for {kind}")))
    }

    /// Run every check a delete would run without writing anything
    ///
    /// Returns the resources that would be removed, children first.
    pub fn check(
        &self,
        view: &dyn ResourceView,
        id: ResourceId,
        mode: DeleteMode<'_>,
        deadline: &Deadline,
    ) -> FleetResult<Vec<ResourceRecord>> {
        let mut plan = Vec::new();
        let mut visited = BTreeSet::new();
        self.plan(view, id, mode, deadline, &mut visited, &mut plan)?;
        Ok(plan)
    }

    /// Delete a resource and its owned children inside `txn`
    ///
    /// The resource and every cascaded child pass their protection check and
    /// rules before the first write; any refusal returns with no write made.
    pub fn delete<T>(
        &self,
        txn: &mut T,
        id: ResourceId,
        mode: DeleteMode<'_>,
        deadline: &Deadline,
    ) -> FleetResult<Vec<Removal>>
    where
        T: StoreTransaction,
    {
        let plan = self.check(&*txn, id, mode, deadline)?;

        let mut removals = Vec::with_capacity(plan.len());
        for record in plan {
            let policy = self.policy(&record.kind)?;
            let report = txn.delete(record.id)?;
            let mut tables = report.affected_tables();
            tables.insert(policy.table.clone());
            tables.extend(policy.extra_tables.iter().cloned());
            for row in &report.detached {
                if let Some(detached_policy) = self.policies.get(&row.kind) {
                    tables.insert(detached_policy.table.clone());
                }
            }
            tracing::info!(
                resource = %record.id,
                kind = %record.kind,
                name = %record.name,
                released = report.released.len(),
                links = report.links_removed.len(),
                "resource deleted"
            );
            removals.push(Removal { report, tables });
        }
        Ok(removals)
    }

    fn plan(
        &self,
        view: &dyn ResourceView,
        id: ResourceId,
        mode: DeleteMode<'_>,
        deadline: &Deadline,
        visited: &mut BTreeSet<ResourceId>,
        plan: &mut Vec<ResourceRecord>,
    ) -> FleetResult<()> {
        if !visited.insert(id) {
            return Ok(());
        }
        deadline.check("dependency check")?;

        let record = view
            .resource(id)?
            .ok_or_else(|| FleetError::not_found(format!("{id}")))?;
        let policy = self.policy(&record.kind)?;

        if let DeleteMode::Authorized { oracle, principal } = mode {
            if !oracle.has_permission(principal, &policy.permission) {
                return Err(FleetError::permission_denied(
                    principal.clone(),
                    format!("missing permission {}", policy.permission),
                ));
            }
            if !oracle.can_access(principal, id) {
                return Err(FleetError::permission_denied(
                    principal.clone(),
                    format!("no access to {id}"),
                ));
            }
        }

        if let Some(protected) = &policy.protected {
            if let Some(reason) = protected(view, &record)? {
                tracing::debug!(resource = %id, kind = %record.kind, %reason, "delete refused: protected");
                return Err(FleetError::permanently_protected(id, reason));
            }
        }

        for rule in &policy.rules {
            deadline.check("dependency check")?;
            if let Some(blocker) = rule.evaluate(view, &record)? {
                tracing::debug!(
                    resource = %id,
                    rule = rule.name(),
                    %blocker,
                    "delete refused: dependency exists"
                );
                return Err(FleetError::dependency_exists(rule.name(), blocker));
            }
        }

        if let Some(cascade) = &policy.cascade {
            for child in cascade(view, &record)? {
                self.plan(view, child, DeleteMode::Trusted, deadline, visited, plan)?;
            }
        }

        plan.push(record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use fleet_core::{
        AccountId, Host, HostId, ResourceDraft, ResourceFilter, ResourceStatus, TransactionalStore,
    };
    use fleet_store::MemoryStore;
    use std::time::Duration;

    struct DenyAll;

    impl AuthorizationEffects for DenyAll {
        fn has_permission(&self, _principal: &Principal, _permission: &str) -> bool {
            false
        }

        fn can_access(&self, _principal: &Principal, _resource: ResourceId) -> bool {
            false
        }
    }

    fn site_deleter() -> SafeDeleter {
        SafeDeleter::with_policies([
            DeletionPolicy::new(ResourceKind::SITE, TableId::SITES, "site.delete").cascade_to(
                |view, site| {
                    Ok(view
                        .find(&ResourceFilter::kind(ResourceKind::NET_BIND).parent(site.id))?
                        .into_iter()
                        .map(|bind| bind.id)
                        .collect())
                },
            ),
            DeletionPolicy::new(ResourceKind::NET_BIND, TableId::NET_BINDS, "net-bind.delete")
                .rule(DependencyRule::new("bind-pinned", |_, bind| {
                    Ok((bind.name == "pinned").then_some(bind.id))
                })),
        ])
    }

    fn seeded_site(binds: &[&str]) -> (MemoryStore, ResourceId) {
        let store = MemoryStore::new();
        let mut txn = store.begin().unwrap();
        let host = HostId::new(1);
        txn.insert_host(Host::new(host, "rocky-9", "www1")).unwrap();
        let site = txn
            .insert(
                ResourceDraft::new(ResourceKind::SITE, "acme.example")
                    .owned_by(AccountId::new("ACME"))
                    .on_host(host),
            )
            .unwrap();
        for name in binds {
            txn.insert(
                ResourceDraft::new(ResourceKind::NET_BIND, *name)
                    .on_host(host)
                    .with_parent(site),
            )
            .unwrap();
        }
        txn.commit().unwrap();
        (store, site)
    }

    #[test]
    fn cascade_removes_children_before_parent() {
        let (store, site) = seeded_site(&["http", "https"]);
        let deleter = site_deleter();
        let mut txn = store.begin().unwrap();
        let removals = deleter
            .delete(&mut txn, site, DeleteMode::Trusted, &Deadline::unbounded())
            .unwrap();

        assert_eq!(removals.len(), 3);
        assert_eq!(removals.last().unwrap().report.record.id, site);
        assert!(removals[0].tables.contains(&TableId::NET_BINDS));
        assert!(removals[2].tables.contains(&TableId::SITES));
    }

    #[test]
    fn blocked_child_leaves_transaction_untouched() {
        let (store, site) = seeded_site(&["http", "pinned"]);
        let deleter = site_deleter();
        let mut txn = store.begin().unwrap();
        let err = deleter
            .delete(&mut txn, site, DeleteMode::Trusted, &Deadline::unbounded())
            .unwrap_err();

        assert_matches!(err, FleetError::DependencyExists { ref rule, .. } if rule == "bind-pinned");
        assert_eq!(txn.pending_writes(), 0);
    }

    #[test]
    fn authorized_delete_consults_oracle() {
        let (store, site) = seeded_site(&[]);
        let deleter = site_deleter();
        let principal = Principal::new("mallory");
        let mut txn = store.begin().unwrap();
        let err = deleter
            .delete(
                &mut txn,
                site,
                DeleteMode::Authorized {
                    oracle: &DenyAll,
                    principal: &principal,
                },
                &Deadline::unbounded(),
            )
            .unwrap_err();
        assert_matches!(err, FleetError::PermissionDenied { .. });
    }

    #[test]
    fn unknown_kind_and_missing_resource_are_rejected() {
        let (store, site) = seeded_site(&[]);
        let txn = store.begin().unwrap();
        let empty = SafeDeleter::new();
        assert_matches!(
            empty.check(&txn, site, DeleteMode::Trusted, &Deadline::unbounded()),
            Err(FleetError::Invalid { .. })
        );
        assert_matches!(
            site_deleter().check(
                &txn,
                ResourceId::new(999),
                DeleteMode::Trusted,
                &Deadline::unbounded()
            ),
            Err(FleetError::NotFound { .. })
        );
    }

    #[test]
    fn expired_deadline_stops_rule_evaluation() {
        let (store, site) = seeded_site(&["http"]);
        let txn = store.begin().unwrap();
        assert_matches!(
            site_deleter().check(
                &txn,
                site,
                DeleteMode::Trusted,
                &Deadline::after(Duration::ZERO)
            ),
            Err(FleetError::Timeout { .. })
        );
    }

    #[test]
    fn protected_check_runs_before_rules() {
        let store = MemoryStore::new();
        let mut txn = store.begin().unwrap();
        let root = txn
            .insert(ResourceDraft::new(ResourceKind::ACCOUNT, "root").with_status(ResourceStatus::Active))
            .unwrap();
        let deleter = SafeDeleter::with_policies([DeletionPolicy::new(
            ResourceKind::ACCOUNT,
            TableId::ACCOUNTS,
            "account.delete",
        )
        .protected_when(|_, record| Ok((record.name == "root").then(|| "reserved".to_string())))
        .rule(DependencyRule::new("always", |_, record| Ok(Some(record.id))))]);

        assert_matches!(
            deleter.delete(&mut txn, root, DeleteMode::Trusted, &Deadline::unbounded()),
            Err(FleetError::PermanentlyProtected { .. })
        );
    }
}
