//! Resource handlers
//!
//! Each handler is a thin body for [`ControlPlane::commit`](crate::ControlPlane::commit):
//! authorize, allocate or check dependencies, write, record, and queue the
//! agent call that applies the change on the host.

use serde_json::json;

use fleet_core::effects::RemoteCall;
use fleet_core::{
    AccountId, FleetError, FleetResult, HostId, IdentifierKind, ResourceDraft, ResourceId,
    ResourceKind, ResourceStatus, StoreTransaction, TableId,
};

use crate::deletion::Removal;
use crate::transaction::TransactionContext;

/// A provisioned host-level resource and the identifier bound to it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Provisioned {
    /// New resource
    pub resource: ResourceId,
    /// Bound uid, gid or port
    pub value: u32,
}

/// Unix user creation request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUnixUser {
    /// Host to create the user on
    pub host: HostId,
    /// Owning account
    pub account: AccountId,
    /// Login name
    pub name: String,
    /// Explicit uid, or `None` to allocate
    pub uid: Option<u32>,
    /// Primary group, which must live on the same host
    pub primary_group: ResourceId,
}

/// Create an account, optionally as a sub-account of `parent`
pub fn create_account<T: StoreTransaction>(
    ctx: &mut TransactionContext<'_, T>,
    name: &str,
    parent: Option<ResourceId>,
) -> FleetResult<ResourceId> {
    ctx.authorize("account.create")?;
    let mut draft = ResourceDraft::new(ResourceKind::ACCOUNT, name).owned_by(AccountId::new(name));
    if let Some(parent) = parent {
        let parent_row = ctx.resource(parent)?;
        if parent_row.kind != ResourceKind::ACCOUNT {
            return Err(FleetError::invalid(format!("{parent} is not an account")));
        }
        ctx.require_access(parent)?;
        draft = draft.with_parent(parent);
    }
    ctx.insert(TableId::ACCOUNTS, draft)
}

/// Change an account's lifecycle status
pub fn set_account_status<T: StoreTransaction>(
    ctx: &mut TransactionContext<'_, T>,
    account: ResourceId,
    status: ResourceStatus,
) -> FleetResult<()> {
    ctx.authorize("account.update")?;
    ctx.require_access(account)?;
    let mut row = ctx.resource(account)?;
    if row.kind != ResourceKind::ACCOUNT {
        return Err(FleetError::invalid(format!("{account} is not an account")));
    }
    if row.status == status {
        return Ok(());
    }
    row.status = status;
    ctx.update(TableId::ACCOUNTS, row)
}

/// Create a Unix group on a host
pub fn add_unix_group<T: StoreTransaction>(
    ctx: &mut TransactionContext<'_, T>,
    host: HostId,
    account: AccountId,
    name: &str,
    gid: Option<u32>,
) -> FleetResult<Provisioned> {
    ctx.authorize("unix-group.create")?;
    let resource = ctx.insert(
        TableId::UNIX_GROUPS,
        ResourceDraft::new(ResourceKind::UNIX_GROUP, name)
            .owned_by(account)
            .on_host(host),
    )?;
    let value = ctx.allocate_and_bind(host, IdentifierKind::Gid, gid, name, resource)?;
    ctx.after_commit(RemoteCall::new(
        host,
        "group.add",
        json!({ "name": name, "gid": value }),
    ));
    Ok(Provisioned { resource, value })
}

/// Create a Unix user on a host
pub fn add_unix_user<T: StoreTransaction>(
    ctx: &mut TransactionContext<'_, T>,
    request: NewUnixUser,
) -> FleetResult<Provisioned> {
    ctx.authorize("unix-user.create")?;
    let group = ctx.resource(request.primary_group)?;
    if group.kind != ResourceKind::UNIX_GROUP || group.host != Some(request.host) {
        return Err(FleetError::invalid(format!(
            "{} is not a group on {}",
            request.primary_group, request.host
        )));
    }
    let resource = ctx.insert(
        TableId::UNIX_USERS,
        ResourceDraft::new(ResourceKind::UNIX_USER, request.name.as_str())
            .owned_by(request.account)
            .on_host(request.host)
            .referencing(request.primary_group),
    )?;
    let value = ctx.allocate_and_bind(
        request.host,
        IdentifierKind::Uid,
        request.uid,
        &request.name,
        resource,
    )?;
    ctx.after_commit(RemoteCall::new(
        request.host,
        "user.add",
        json!({ "name": request.name, "uid": value, "group": group.name }),
    ));
    Ok(Provisioned { resource, value })
}

/// Bind a network port on a host, optionally owned by a site
pub fn add_net_bind<T: StoreTransaction>(
    ctx: &mut TransactionContext<'_, T>,
    host: HostId,
    account: AccountId,
    name: &str,
    port: Option<u32>,
    site: Option<ResourceId>,
) -> FleetResult<Provisioned> {
    ctx.authorize("net-bind.create")?;
    let mut draft = ResourceDraft::new(ResourceKind::NET_BIND, name)
        .owned_by(account)
        .on_host(host);
    if let Some(site) = site {
        ctx.require_access(site)?;
        draft = draft.with_parent(site);
    }
    let resource = ctx.insert(TableId::NET_BINDS, draft)?;
    let value = ctx.allocate_and_bind(host, IdentifierKind::Port, port, name, resource)?;
    ctx.after_commit(RemoteCall::new(
        host,
        "bind.add",
        json!({ "name": name, "port": value }),
    ));
    Ok(Provisioned { resource, value })
}

/// Remove a resource and its owned children, then tell their hosts
pub fn remove_resource<T: StoreTransaction>(
    ctx: &mut TransactionContext<'_, T>,
    resource: ResourceId,
) -> FleetResult<Vec<Removal>> {
    let removals = ctx.delete(resource)?;
    for removal in &removals {
        let record = &removal.report.record;
        if let Some(host) = record.host {
            ctx.after_commit(RemoteCall::new(
                host,
                format!("{}.remove", record.kind),
                json!({ "name": record.name }),
            ));
        }
    }
    Ok(removals)
}
