//! Identifier allocation
//!
//! Allocates or validates uid, gid and port values for a host against its OS
//! policy and the live bindings visible in the current transaction. The
//! allocator never writes: the caller binds the returned value inside the
//! same transaction, and the store's uniqueness constraint catches any race
//! that slipped past the scan.

use fleet_core::{
    BindingView, FleetError, FleetResult, Host, IdRange, IdentifierKind, Namespace,
};

use crate::deadline::Deadline;
use crate::policy::{Classification, KindPolicy, PolicyRegistry};

/// Deadline is re-checked after this many scanned values
const SCAN_CHECK_INTERVAL: u32 = 1024;

/// Policy-driven identifier allocator
#[derive(Debug, Clone, Copy)]
pub struct IdentifierAllocator<'a> {
    policies: &'a PolicyRegistry,
}

impl<'a> IdentifierAllocator<'a> {
    /// Allocator over a policy registry
    pub fn new(policies: &'a PolicyRegistry) -> Self {
        Self { policies }
    }

    fn kind_policy(&self, host: &Host, kind: IdentifierKind) -> FleetResult<Option<&'a KindPolicy>> {
        Ok(self.policies.get(&host.os_version)?.kind(kind))
    }

    /// Classify `name` under the host's policy for `kind`
    pub fn classify(
        &self,
        host: &Host,
        kind: IdentifierKind,
        name: &str,
    ) -> FleetResult<Classification> {
        Ok(self
            .kind_policy(host, kind)?
            .map_or(Classification::Unknown, |policy| policy.classify(name)))
    }

    /// Validate an explicit value or pick the lowest free one
    ///
    /// With `requested`, the `(name, value)` pair must pass classification
    /// and the value must be unbound. Without it, the customer range is
    /// scanned upward from its low bound.
    pub fn allocate<V>(
        &self,
        view: &V,
        host: &Host,
        kind: IdentifierKind,
        requested: Option<u32>,
        name: &str,
        deadline: &Deadline,
    ) -> FleetResult<u32>
    where
        V: BindingView + ?Sized,
    {
        let namespace = Namespace::new(host.id, kind);
        match requested {
            Some(value) => self.validate_explicit(view, host, namespace, value, name),
            None => {
                let policy = self.kind_policy(host, kind)?.ok_or_else(|| {
                    FleetError::config(format!(
                        "OS version {} has no {kind} policy",
                        host.os_version
                    ))
                })?;
                scan_lowest_free(view, namespace, policy.regular_range(), deadline)
            }
        }
    }

    fn validate_explicit<V>(
        &self,
        view: &V,
        host: &Host,
        namespace: Namespace,
        value: u32,
        name: &str,
    ) -> FleetResult<u32>
    where
        V: BindingView + ?Sized,
    {
        let classification = self.classify(host, namespace.kind, name)?;
        let violation = |reason: String| {
            tracing::debug!(%namespace, name, value, %reason, "explicit identifier rejected");
            FleetError::policy_violation(namespace, name, value, reason)
        };

        match classification {
            Classification::Unknown => {
                return Err(violation(format!(
                    "'{name}' has no {} policy entry on {}",
                    namespace.kind, host.os_version
                )))
            }
            Classification::Fixed(expected) if expected != value => {
                return Err(violation(format!("'{name}' is fixed to {expected}")));
            }
            Classification::DynamicSystem(range) | Classification::RegularUser(range)
                if !range.contains(value) =>
            {
                return Err(violation(format!(
                    "{} names must lie in {range}",
                    classification.label()
                )));
            }
            _ => {}
        }

        if let Some(holder) = view.binding(namespace, value)? {
            tracing::debug!(%namespace, value, %holder, "explicit identifier already bound");
            return Err(FleetError::collision(namespace, value));
        }
        Ok(value)
    }
}

fn scan_lowest_free<V>(
    view: &V,
    namespace: Namespace,
    range: IdRange,
    deadline: &Deadline,
) -> FleetResult<u32>
where
    V: BindingView + ?Sized,
{
    deadline.check("identifier scan")?;
    let used = view.bound_values(namespace, range)?;
    for (scanned, value) in range.iter().enumerate() {
        if scanned as u32 % SCAN_CHECK_INTERVAL == 0 {
            deadline.check("identifier scan")?;
        }
        if !used.contains(&value) {
            tracing::debug!(%namespace, value, "allocated identifier");
            return Ok(value);
        }
    }
    tracing::warn!(%namespace, %range, "identifier namespace exhausted");
    Err(FleetError::namespace_exhausted(namespace, range))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use fleet_core::{HostId, IdentifierBinding, ResourceId};
    use proptest::prelude::*;
    use std::collections::{BTreeMap, BTreeSet};
    use std::time::Duration;

    const POLICY: &str = r#"
        [[os]]
        id = "test-os"

        [os.uid]
        system_low = 100
        min = 500
        max = 60000
        fixed = { root = 0 }
        dynamic_system = ["ntp"]
        regular_user = ["backup"]

        [[os]]
        id = "small-os"

        [os.uid]
        system_low = 100
        min = 500
        max = 600
    "#;

    #[derive(Default)]
    struct Bindings(BTreeMap<(Namespace, u32), ResourceId>);

    impl Bindings {
        fn with(namespace: Namespace, values: impl IntoIterator<Item = u32>) -> Self {
            Self(
                values
                    .into_iter()
                    .map(|v| ((namespace, v), ResourceId::new(u64::from(v))))
                    .collect(),
            )
        }
    }

    impl BindingView for Bindings {
        fn binding(&self, namespace: Namespace, value: u32) -> FleetResult<Option<ResourceId>> {
            Ok(self.0.get(&(namespace, value)).copied())
        }

        fn bound_values(&self, namespace: Namespace, range: IdRange) -> FleetResult<BTreeSet<u32>> {
            Ok(self
                .0
                .keys()
                .filter(|(ns, v)| *ns == namespace && range.contains(*v))
                .map(|(_, v)| *v)
                .collect())
        }

        fn bindings_of(&self, _resource: ResourceId) -> FleetResult<Vec<IdentifierBinding>> {
            Ok(Vec::new())
        }
    }

    fn registry() -> PolicyRegistry {
        PolicyRegistry::from_toml_str(POLICY).unwrap()
    }

    fn host(os: &str) -> Host {
        Host::new(HostId::new(1), os, "h1.example.com")
    }

    fn uid_ns() -> Namespace {
        Namespace::new(HostId::new(1), IdentifierKind::Uid)
    }

    #[test]
    fn unknown_name_in_valid_range_is_a_policy_violation() {
        let registry = registry();
        let allocator = IdentifierAllocator::new(&registry);
        let err = allocator
            .allocate(
                &Bindings::default(),
                &host("test-os"),
                IdentifierKind::Uid,
                Some(500),
                "svc1",
                &Deadline::unbounded(),
            )
            .unwrap_err();
        assert_matches!(err, FleetError::PolicyViolation { requested: 500, .. });
    }

    #[test]
    fn fixed_name_requires_exact_value() {
        let registry = registry();
        let allocator = IdentifierAllocator::new(&registry);
        let view = Bindings::default();
        let deadline = Deadline::unbounded();
        let h = host("test-os");

        assert_eq!(
            allocator
                .allocate(&view, &h, IdentifierKind::Uid, Some(0), "root", &deadline)
                .unwrap(),
            0
        );
        assert_matches!(
            allocator.allocate(&view, &h, IdentifierKind::Uid, Some(1), "root", &deadline),
            Err(FleetError::PolicyViolation { .. })
        );
    }

    #[test]
    fn class_ranges_are_enforced() {
        let registry = registry();
        let allocator = IdentifierAllocator::new(&registry);
        let view = Bindings::default();
        let deadline = Deadline::unbounded();
        let h = host("test-os");

        assert!(allocator
            .allocate(&view, &h, IdentifierKind::Uid, Some(150), "ntp", &deadline)
            .is_ok());
        assert_matches!(
            allocator.allocate(&view, &h, IdentifierKind::Uid, Some(500), "ntp", &deadline),
            Err(FleetError::PolicyViolation { .. })
        );
        assert_matches!(
            allocator.allocate(&view, &h, IdentifierKind::Uid, Some(499), "backup", &deadline),
            Err(FleetError::PolicyViolation { .. })
        );
    }

    #[test]
    fn bound_explicit_value_collides() {
        let registry = registry();
        let allocator = IdentifierAllocator::new(&registry);
        let view = Bindings::with(uid_ns(), [700]);
        assert_matches!(
            allocator.allocate(
                &view,
                &host("test-os"),
                IdentifierKind::Uid,
                Some(700),
                "backup",
                &Deadline::unbounded()
            ),
            Err(FleetError::Collision { value: 700, .. })
        );
    }

    #[test]
    fn auto_allocation_fills_lowest_gap() {
        let registry = registry();
        let allocator = IdentifierAllocator::new(&registry);
        let view = Bindings::with(uid_ns(), [500, 501, 503]);
        let value = allocator
            .allocate(
                &view,
                &host("test-os"),
                IdentifierKind::Uid,
                None,
                "svc2",
                &Deadline::unbounded(),
            )
            .unwrap();
        assert_eq!(value, 502);
    }

    #[test]
    fn consumed_range_is_exhausted() {
        let registry = registry();
        let allocator = IdentifierAllocator::new(&registry);
        let view = Bindings::with(uid_ns(), 500..=600);
        assert_matches!(
            allocator.allocate(
                &view,
                &host("small-os"),
                IdentifierKind::Uid,
                None,
                "svc3",
                &Deadline::unbounded()
            ),
            Err(FleetError::NamespaceExhausted { .. })
        );
    }

    #[test]
    fn missing_kind_policy_rejects_explicit_and_auto() {
        let registry = registry();
        let allocator = IdentifierAllocator::new(&registry);
        let view = Bindings::default();
        let deadline = Deadline::unbounded();
        let h = host("test-os");

        assert_matches!(
            allocator.allocate(&view, &h, IdentifierKind::Port, Some(80), "http", &deadline),
            Err(FleetError::PolicyViolation { .. })
        );
        assert_matches!(
            allocator.allocate(&view, &h, IdentifierKind::Port, None, "http", &deadline),
            Err(FleetError::Config { .. })
        );
    }

    #[test]
    fn expired_deadline_aborts_scan() {
        let registry = registry();
        let allocator = IdentifierAllocator::new(&registry);
        assert_matches!(
            allocator.allocate(
                &Bindings::default(),
                &host("test-os"),
                IdentifierKind::Uid,
                None,
                "svc",
                &Deadline::after(Duration::ZERO)
            ),
            Err(FleetError::Timeout { .. })
        );
    }

    proptest! {
        /// Auto allocation returns the least unbound value of the range, or
        /// reports exhaustion exactly when every value is bound.
        #[test]
        fn auto_allocation_is_least_free(used in proptest::collection::btree_set(500u32..=600, 0..101)) {
            let registry = registry();
            let allocator = IdentifierAllocator::new(&registry);
            let view = Bindings::with(uid_ns(), used.iter().copied());
            let result = allocator.allocate(
                &view,
                &host("small-os"),
                IdentifierKind::Uid,
                None,
                "svc",
                &Deadline::unbounded(),
            );
            match (500u32..=600).find(|v| !used.contains(v)) {
                Some(expected) => prop_assert_eq!(result.ok(), Some(expected)),
                None => {
                    let exhausted = matches!(result, Err(FleetError::NamespaceExhausted { .. }));
                    prop_assert!(exhausted);
                }
            }
        }

        /// Names absent from every class never receive an explicit value.
        #[test]
        fn unlisted_names_never_pass(value in 0u32..70000, suffix in 0u32..100_000) {
            let registry = registry();
            let allocator = IdentifierAllocator::new(&registry);
            let name = format!("x-{suffix}");
            let result = allocator.allocate(
                &Bindings::default(),
                &host("test-os"),
                IdentifierKind::Uid,
                Some(value),
                &name,
                &Deadline::unbounded(),
            );
            let rejected = matches!(result, Err(FleetError::PolicyViolation { .. }));
            prop_assert!(rejected);
        }
    }
}
