//! Deletion policies for the standard resource kinds

use std::collections::BTreeSet;
use std::sync::Arc;

use fleet_core::config::DeletionConfig;
use fleet_core::{
    FleetResult, IdentifierKind, ResourceFilter, ResourceKind, ResourceRecord, ResourceStatus,
    ResourceView, TableId,
};

use super::{DeletionPolicy, DependencyRule};
use crate::policy::PolicyRegistry;

/// Policies for accounts, Unix users and groups, network binds, sites and
/// mail domains
pub fn standard_policies(
    config: &DeletionConfig,
    policies: Arc<PolicyRegistry>,
) -> Vec<DeletionPolicy> {
    let protected_accounts: BTreeSet<String> = config.protected_accounts.iter().cloned().collect();
    let user_policies = Arc::clone(&policies);
    let group_policies = Arc::clone(&policies);
    let port_policies = policies;

    vec![
        DeletionPolicy::new(ResourceKind::ACCOUNT, TableId::ACCOUNTS, "account.delete")
            .protected_when(move |_, account| {
                Ok(protected_accounts
                    .contains(&account.name)
                    .then(|| format!("account '{}' is reserved", account.name)))
            })
            .rule(DependencyRule::children_in_status(
                "child-account-canceled",
                ResourceKind::ACCOUNT,
                ResourceStatus::Canceled,
            ))
            .rule(DependencyRule::owned_by_account(
                "account-has-unix-users",
                ResourceKind::UNIX_USER,
            ))
            .rule(DependencyRule::owned_by_account(
                "account-has-unix-groups",
                ResourceKind::UNIX_GROUP,
            ))
            .rule(DependencyRule::owned_by_account(
                "account-has-sites",
                ResourceKind::SITE,
            ))
            .rule(DependencyRule::owned_by_account(
                "account-has-mail-domains",
                ResourceKind::MAIL_DOMAIN,
            )),
        DeletionPolicy::new(ResourceKind::UNIX_USER, TableId::UNIX_USERS, "unix-user.delete")
            .protected_when(move |view, user| {
                reserved_on_host(view, &user_policies, user, IdentifierKind::Uid)
            })
            .rule(DependencyRule::referenced_by(
                "user-referenced-by-site",
                ResourceKind::SITE,
            )),
        DeletionPolicy::new(ResourceKind::UNIX_GROUP, TableId::UNIX_GROUPS, "unix-group.delete")
            .protected_when(move |view, group| {
                reserved_on_host(view, &group_policies, group, IdentifierKind::Gid)
            })
            .rule(DependencyRule::referenced_by(
                "group-is-primary",
                ResourceKind::UNIX_USER,
            ))
            .rule(DependencyRule::referenced_by(
                "group-referenced-by-site",
                ResourceKind::SITE,
            )),
        DeletionPolicy::new(ResourceKind::NET_BIND, TableId::NET_BINDS, "net-bind.delete")
            .protected_when(move |view, bind| {
                reserved_on_host(view, &port_policies, bind, IdentifierKind::Port)
            })
            .rule(DependencyRule::referenced_by(
                "bind-used-by-site",
                ResourceKind::SITE,
            )),
        DeletionPolicy::new(ResourceKind::SITE, TableId::SITES, "site.delete").cascade_to(
            |view, site| {
                Ok(view
                    .find(&ResourceFilter::kind(ResourceKind::NET_BIND).parent(site.id))?
                    .into_iter()
                    .map(|bind| bind.id)
                    .collect())
            },
        ),
        DeletionPolicy::new(
            ResourceKind::MAIL_DOMAIN,
            TableId::MAIL_DOMAINS,
            "mail-domain.delete",
        )
        .rule(DependencyRule::referenced_by(
            "domain-used-by-site",
            ResourceKind::SITE,
        )),
    ]
}

/// Names the OS itself owns may never be removed from a host
fn reserved_on_host(
    view: &dyn ResourceView,
    policies: &PolicyRegistry,
    record: &ResourceRecord,
    kind: IdentifierKind,
) -> FleetResult<Option<String>> {
    let Some(host_id) = record.host else {
        return Ok(None);
    };
    let Some(host) = view.host(host_id)? else {
        return Ok(None);
    };
    // hosts on an unconfigured OS have no reserved names
    let Ok(os_policy) = policies.get(&host.os_version) else {
        return Ok(None);
    };
    Ok(os_policy
        .kind(kind)
        .filter(|policy| policy.is_reserved(&record.name))
        .map(|_| format!("'{}' is a system {kind} name on {}", record.name, host.os_version)))
}
