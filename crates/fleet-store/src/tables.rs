//! Table state and constraint-checked writes
//!
//! Both the committed state and every transaction's working copy are a
//! [`Tables`] value; commit replays the transaction's write log against the
//! latest committed tables so constraints are checked twice.

use std::collections::{BTreeMap, BTreeSet};

use fleet_core::{
    BindingView, DeleteReport, FleetError, FleetResult, Host, HostId, IdRange, IdentifierBinding,
    Namespace, ResourceFilter, ResourceId, ResourceLink, ResourceRecord, ResourceStatus,
    ResourceView,
};

/// Rule name reported when a row still points at a resource being removed
const REFERENCE_CONSTRAINT: &str = "resource-reference";

/// One logged write, replayed at commit
#[derive(Debug, Clone)]
pub(crate) enum WriteOp {
    InsertHost(Host),
    Insert(ResourceRecord),
    Update(ResourceRecord),
    Delete(ResourceId),
    Bind(IdentifierBinding),
    Unbind(IdentifierBinding),
    Link(ResourceLink),
}

#[derive(Debug, Clone, Default)]
pub(crate) struct Tables {
    pub(crate) hosts: BTreeMap<HostId, Host>,
    pub(crate) resources: BTreeMap<ResourceId, ResourceRecord>,
    pub(crate) bindings: BTreeMap<(Namespace, u32), ResourceId>,
    pub(crate) links: BTreeSet<ResourceLink>,
}

impl Tables {
    pub(crate) fn apply(&mut self, op: &WriteOp) -> FleetResult<()> {
        match op {
            WriteOp::InsertHost(host) => self.insert_host(host.clone()),
            WriteOp::Insert(record) => self.insert(record.clone()),
            WriteOp::Update(record) => self.update(record.clone()),
            // a concurrent delete of the same row already achieved the effect
            WriteOp::Delete(id) => {
                if self.resources.contains_key(id) {
                    self.delete(*id)?;
                }
                Ok(())
            }
            WriteOp::Bind(binding) => self.bind(*binding),
            // leaves a binding alone that a concurrent transaction now holds
            WriteOp::Unbind(binding) => {
                let key = (binding.namespace, binding.value);
                if self.bindings.get(&key) == Some(&binding.resource) {
                    self.bindings.remove(&key);
                }
                Ok(())
            }
            WriteOp::Link(link) => self.link(link.clone()),
        }
    }

    pub(crate) fn insert_host(&mut self, host: Host) -> FleetResult<()> {
        if self.hosts.contains_key(&host.id) {
            return Err(FleetError::invalid(format!("{} already provisioned", host.id)));
        }
        self.hosts.insert(host.id, host);
        Ok(())
    }

    pub(crate) fn insert(&mut self, record: ResourceRecord) -> FleetResult<()> {
        if self.resources.contains_key(&record.id) {
            return Err(FleetError::storage(format!("duplicate key {}", record.id)));
        }
        if let Some(host) = record.host {
            if !self.hosts.contains_key(&host) {
                return Err(FleetError::not_found(format!("{host}")));
            }
        }
        let duplicate = self.resources.values().any(|existing| {
            existing.kind == record.kind
                && existing.host == record.host
                && existing.name == record.name
        });
        if duplicate {
            return Err(FleetError::invalid(format!(
                "{} '{}' already exists",
                record.kind, record.name
            )));
        }
        self.check_targets(&record)?;
        self.resources.insert(record.id, record);
        Ok(())
    }

    pub(crate) fn update(&mut self, record: ResourceRecord) -> FleetResult<()> {
        if !self.resources.contains_key(&record.id) {
            return Err(FleetError::not_found(format!("{}", record.id)));
        }
        self.check_targets(&record)?;
        self.resources.insert(record.id, record);
        Ok(())
    }

    /// Foreign keys: the parent and every referenced resource must exist
    fn check_targets(&self, record: &ResourceRecord) -> FleetResult<()> {
        for target in record.parent.iter().chain(&record.references) {
            if *target == record.id || !self.resources.contains_key(target) {
                return Err(FleetError::not_found(format!(
                    "{target} referenced by {} '{}'",
                    record.kind, record.name
                )));
            }
        }
        Ok(())
    }

    /// Rows naming `id` as parent or reference; canceled rows are detached,
    /// any other row blocks the delete
    fn detach_dependents(&mut self, id: ResourceId) -> FleetResult<Vec<ResourceRecord>> {
        let dependents: Vec<ResourceId> = self
            .resources
            .values()
            .filter(|row| row.id != id && (row.parent == Some(id) || row.references.contains(&id)))
            .map(|row| row.id)
            .collect();
        if let Some(blocker) = dependents.iter().find(|dependent| {
            self.resources
                .get(*dependent)
                .is_some_and(|row| row.status != ResourceStatus::Canceled)
        }) {
            return Err(FleetError::dependency_exists(REFERENCE_CONSTRAINT, *blocker));
        }

        let mut detached = Vec::with_capacity(dependents.len());
        for dependent in dependents {
            if let Some(row) = self.resources.get_mut(&dependent) {
                if row.parent == Some(id) {
                    row.parent = None;
                }
                row.references.remove(&id);
                detached.push(row.clone());
            }
        }
        Ok(detached)
    }

    pub(crate) fn delete(&mut self, id: ResourceId) -> FleetResult<DeleteReport> {
        if !self.resources.contains_key(&id) {
            return Err(FleetError::not_found(format!("{id}")));
        }
        let detached = self.detach_dependents(id)?;
        let record = self
            .resources
            .remove(&id)
            .ok_or_else(|| FleetError::not_found(format!("{id}")))?;

        let released: Vec<IdentifierBinding> = self
            .bindings
            .iter()
            .filter(|(_, holder)| **holder == id)
            .map(|((namespace, value), holder)| IdentifierBinding {
                namespace: *namespace,
                value: *value,
                resource: *holder,
            })
            .collect();
        for binding in &released {
            self.bindings.remove(&(binding.namespace, binding.value));
        }

        let links_removed: Vec<ResourceLink> = self
            .links
            .iter()
            .filter(|link| link.from == id || link.to == id)
            .cloned()
            .collect();
        for link in &links_removed {
            self.links.remove(link);
        }

        Ok(DeleteReport {
            record,
            released,
            links_removed,
            detached,
        })
    }

    /// Unique constraint on `(host, kind, value)`
    pub(crate) fn bind(&mut self, binding: IdentifierBinding) -> FleetResult<()> {
        let key = (binding.namespace, binding.value);
        match self.bindings.get(&key) {
            Some(holder) if *holder == binding.resource => Ok(()),
            Some(_) => Err(FleetError::collision(binding.namespace, binding.value)),
            None => {
                if !self.resources.contains_key(&binding.resource) {
                    return Err(FleetError::not_found(format!("{}", binding.resource)));
                }
                self.bindings.insert(key, binding.resource);
                Ok(())
            }
        }
    }

    /// Bound values of `namespace` inside `range` with their holders
    pub(crate) fn holders_in(&self, namespace: Namespace, range: IdRange) -> Vec<(u32, ResourceId)> {
        if range.is_empty() {
            return Vec::new();
        }
        self.bindings
            .range((namespace, range.low)..=(namespace, range.high))
            .map(|((_, value), holder)| (*value, *holder))
            .collect()
    }

    pub(crate) fn link(&mut self, link: ResourceLink) -> FleetResult<()> {
        for end in [link.from, link.to] {
            if !self.resources.contains_key(&end) {
                return Err(FleetError::not_found(format!("{end}")));
            }
        }
        self.links.insert(link);
        Ok(())
    }
}

impl ResourceView for Tables {
    fn host(&self, id: HostId) -> FleetResult<Option<Host>> {
        Ok(self.hosts.get(&id).cloned())
    }

    fn resource(&self, id: ResourceId) -> FleetResult<Option<ResourceRecord>> {
        Ok(self.resources.get(&id).cloned())
    }

    fn find(&self, filter: &ResourceFilter) -> FleetResult<Vec<ResourceRecord>> {
        Ok(self
            .resources
            .values()
            .filter(|record| filter.matches(record))
            .cloned()
            .collect())
    }

    fn links_of(&self, id: ResourceId) -> FleetResult<Vec<ResourceLink>> {
        Ok(self
            .links
            .iter()
            .filter(|link| link.from == id || link.to == id)
            .cloned()
            .collect())
    }
}

impl BindingView for Tables {
    fn binding(&self, namespace: Namespace, value: u32) -> FleetResult<Option<ResourceId>> {
        Ok(self.bindings.get(&(namespace, value)).copied())
    }

    fn bound_values(&self, namespace: Namespace, range: IdRange) -> FleetResult<BTreeSet<u32>> {
        Ok(self
            .holders_in(namespace, range)
            .into_iter()
            .map(|(value, _)| value)
            .collect())
    }

    fn bindings_of(&self, resource: ResourceId) -> FleetResult<Vec<IdentifierBinding>> {
        Ok(self
            .bindings
            .iter()
            .filter(|(_, holder)| **holder == resource)
            .map(|((namespace, value), holder)| IdentifierBinding {
                namespace: *namespace,
                value: *value,
                resource: *holder,
            })
            .collect())
    }
}
