//! Dependency rules
//!
//! A rule looks at the resource about to be removed and reports the first
//! other resource still depending on it. Rules are plain values, so each one
//! can be unit-tested against a fixture store on its own and composed into
//! per-kind lists.

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use fleet_core::{
    FleetResult, ResourceFilter, ResourceId, ResourceKind, ResourceRecord, ResourceStatus,
    ResourceView, TableId,
};

/// Predicate returning the first blocking resource, if any
pub type RulePredicate =
    dyn Fn(&dyn ResourceView, &ResourceRecord) -> FleetResult<Option<ResourceId>> + Send + Sync;

/// Named existence check gating a delete
#[derive(Clone)]
pub struct DependencyRule {
    name: Cow<'static, str>,
    predicate: Arc<RulePredicate>,
}

impl DependencyRule {
    /// Rule from an arbitrary predicate
    pub fn new<F>(name: impl Into<Cow<'static, str>>, predicate: F) -> Self
    where
        F: Fn(&dyn ResourceView, &ResourceRecord) -> FleetResult<Option<ResourceId>>
            + Send
            + Sync
            + 'static,
    {
        Self {
            name: name.into(),
            predicate: Arc::new(predicate),
        }
    }

    /// Name reported in `DependencyExists`
    pub fn name(&self) -> &str {
        &self.name
    }

    /// First resource blocking removal of `target`
    pub fn evaluate(
        &self,
        view: &dyn ResourceView,
        target: &ResourceRecord,
    ) -> FleetResult<Option<ResourceId>> {
        (self.predicate)(view, target)
    }

    /// Blocks while a child of `kind` is not in `status`
    ///
    /// "child-account-canceled": every sub-account must be canceled before
    /// its parent account can go.
    pub fn children_in_status(
        name: impl Into<Cow<'static, str>>,
        kind: ResourceKind,
        status: ResourceStatus,
    ) -> Self {
        Self::new(name, move |view, target| {
            let children = view.find(&ResourceFilter::kind(kind.clone()).parent(target.id))?;
            Ok(children
                .into_iter()
                .find(|child| child.status != status)
                .map(|child| child.id))
        })
    }

    /// Blocks while the target's account still owns a resource of `kind`
    pub fn owned_by_account(name: impl Into<Cow<'static, str>>, kind: ResourceKind) -> Self {
        Self::new(name, move |view, target| {
            let Some(account) = target.account.clone() else {
                return Ok(None);
            };
            let owned = view.find(&ResourceFilter::kind(kind.clone()).account(account))?;
            Ok(owned
                .into_iter()
                .find(|record| record.id != target.id)
                .map(|record| record.id))
        })
    }

    /// Blocks while a resource of `kind` lists the target in its references
    pub fn referenced_by(name: impl Into<Cow<'static, str>>, kind: ResourceKind) -> Self {
        Self::new(name, move |view, target| {
            let referencing = view.find(&ResourceFilter::kind(kind.clone()).references(target.id))?;
            Ok(referencing.first().map(|record| record.id))
        })
    }

    /// Blocks while a join row in `table` points at the target
    ///
    /// Only use this for join rows that must be removed explicitly; other
    /// join rows go away with the resource.
    pub fn linked_from(name: impl Into<Cow<'static, str>>, table: TableId) -> Self {
        Self::new(name, move |view, target| {
            let links = view.links_of(target.id)?;
            Ok(links
                .into_iter()
                .find(|link| link.table == table && link.to == target.id)
                .map(|link| link.from))
        })
    }
}

impl fmt::Debug for DependencyRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DependencyRule")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_core::{
        AccountId, Host, HostId, ResourceDraft, ResourceLink, StoreTransaction, TransactionalStore,
    };
    use fleet_store::MemoryStore;

    fn account(
        txn: &mut impl StoreTransaction,
        name: &str,
        parent: Option<ResourceId>,
        status: ResourceStatus,
    ) -> ResourceId {
        let mut draft = ResourceDraft::new(ResourceKind::ACCOUNT, name)
            .owned_by(AccountId::new(name))
            .with_status(status);
        if let Some(parent) = parent {
            draft = draft.with_parent(parent);
        }
        txn.insert(draft).unwrap()
    }

    #[test]
    fn children_in_status_reports_first_live_child() {
        let store = MemoryStore::new();
        let mut txn = store.begin().unwrap();
        let parent = account(&mut txn, "ACME", None, ResourceStatus::Active);
        account(&mut txn, "ACME-OLD", Some(parent), ResourceStatus::Canceled);
        let live = account(&mut txn, "ACME-WEB", Some(parent), ResourceStatus::Disabled);

        let rule = DependencyRule::children_in_status(
            "child-account-canceled",
            ResourceKind::ACCOUNT,
            ResourceStatus::Canceled,
        );
        let target = txn.resource(parent).unwrap().unwrap();
        assert_eq!(rule.evaluate(&txn, &target).unwrap(), Some(live));
    }

    #[test]
    fn referenced_by_and_linked_from_find_blockers() {
        let store = MemoryStore::new();
        let mut txn = store.begin().unwrap();
        let host = HostId::new(1);
        txn.insert_host(Host::new(host, "rocky-9", "h1")).unwrap();
        let group = txn
            .insert(ResourceDraft::new(ResourceKind::UNIX_GROUP, "web").on_host(host))
            .unwrap();
        let user = txn
            .insert(
                ResourceDraft::new(ResourceKind::UNIX_USER, "alice")
                    .on_host(host)
                    .referencing(group),
            )
            .unwrap();
        txn.link(ResourceLink {
            table: TableId::UNIX_GROUP_MEMBERS,
            from: user,
            to: group,
        })
        .unwrap();

        let target = txn.resource(group).unwrap().unwrap();
        let primary = DependencyRule::referenced_by("group-is-primary", ResourceKind::UNIX_USER);
        let member =
            DependencyRule::linked_from("group-has-members", TableId::UNIX_GROUP_MEMBERS);
        assert_eq!(primary.evaluate(&txn, &target).unwrap(), Some(user));
        assert_eq!(member.evaluate(&txn, &target).unwrap(), Some(user));

        let unrelated = DependencyRule::referenced_by("site-uses-group", ResourceKind::SITE);
        assert_eq!(unrelated.evaluate(&txn, &target).unwrap(), None);
    }

    #[test]
    fn owned_by_account_ignores_the_target_itself() {
        let store = MemoryStore::new();
        let mut txn = store.begin().unwrap();
        let acme = account(&mut txn, "ACME", None, ResourceStatus::Active);
        let target = txn.resource(acme).unwrap().unwrap();

        let rule = DependencyRule::owned_by_account("account-owns-accounts", ResourceKind::ACCOUNT);
        assert_eq!(rule.evaluate(&txn, &target).unwrap(), None);

        let domain = txn
            .insert(
                ResourceDraft::new(ResourceKind::MAIL_DOMAIN, "acme.example")
                    .owned_by(AccountId::new("ACME")),
            )
            .unwrap();
        let rule = DependencyRule::owned_by_account("account-owns-domains", ResourceKind::MAIL_DOMAIN);
        assert_eq!(rule.evaluate(&txn, &target).unwrap(), Some(domain));
    }
}
