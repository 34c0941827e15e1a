//! Uniqueness of identifier bindings across concurrent transactions.

use assert_matches::assert_matches;
use fleet_core::{
    BindingView, FleetError, Host, HostId, IdentifierBinding, IdentifierKind, Namespace,
    ResourceDraft, ResourceKind, StoreTransaction, TransactionalStore,
};
use fleet_store::MemoryStore;

fn provision(store: &MemoryStore, host: HostId) {
    let mut txn = store.begin().unwrap();
    txn.insert_host(Host::new(host, "rocky-9", "www1.example.com"))
        .unwrap();
    txn.commit().unwrap();
}

#[test]
fn second_commit_of_same_value_collides() {
    let store = MemoryStore::new();
    let host = HostId::new(1);
    provision(&store, host);
    let ns = Namespace::new(host, IdentifierKind::Uid);

    let mut first = store.begin().unwrap();
    let mut second = store.begin().unwrap();

    let a = first
        .insert(ResourceDraft::new(ResourceKind::UNIX_USER, "svc-a").on_host(host))
        .unwrap();
    let b = second
        .insert(ResourceDraft::new(ResourceKind::UNIX_USER, "svc-b").on_host(host))
        .unwrap();

    // both pass the bind-time check: neither is committed yet
    first
        .bind(IdentifierBinding { namespace: ns, value: 502, resource: a })
        .unwrap();
    second
        .bind(IdentifierBinding { namespace: ns, value: 502, resource: b })
        .unwrap();

    first.commit().unwrap();
    let err = second.commit().unwrap_err();
    assert_matches!(err, FleetError::Collision { value: 502, .. });

    let snapshot = store.snapshot();
    assert_eq!(snapshot.binding(ns, 502).unwrap(), Some(a));
    assert_eq!(snapshot.resource_count(), 1, "failed commit applies nothing");
}

#[test]
fn bind_sees_values_committed_after_snapshot() {
    let store = MemoryStore::new();
    let host = HostId::new(2);
    provision(&store, host);
    let ns = Namespace::new(host, IdentifierKind::Gid);

    let mut late = store.begin().unwrap();

    let mut early = store.begin().unwrap();
    let g = early
        .insert(ResourceDraft::new(ResourceKind::UNIX_GROUP, "web").on_host(host))
        .unwrap();
    early
        .bind(IdentifierBinding { namespace: ns, value: 600, resource: g })
        .unwrap();
    early.commit().unwrap();

    assert!(late
        .bound_values(ns, fleet_core::IdRange::new(500, 700))
        .unwrap()
        .contains(&600));
    let other = late
        .insert(ResourceDraft::new(ResourceKind::UNIX_GROUP, "mail").on_host(host))
        .unwrap();
    let err = late
        .bind(IdentifierBinding { namespace: ns, value: 600, resource: other })
        .unwrap_err();
    assert_matches!(err, FleetError::Collision { .. });
}

#[test]
fn value_released_in_the_same_transaction_can_be_rebound() {
    let store = MemoryStore::new();
    let host = HostId::new(3);
    provision(&store, host);
    let ns = Namespace::new(host, IdentifierKind::Gid);
    let range = fleet_core::IdRange::new(1000, 1002);

    let mut seed = store.begin().unwrap();
    let old = seed
        .insert(ResourceDraft::new(ResourceKind::UNIX_GROUP, "www-shared").on_host(host))
        .unwrap();
    let kept = seed
        .insert(ResourceDraft::new(ResourceKind::UNIX_GROUP, "mail").on_host(host))
        .unwrap();
    seed.bind(IdentifierBinding { namespace: ns, value: 1000, resource: old })
        .unwrap();
    seed.bind(IdentifierBinding { namespace: ns, value: 1001, resource: kept })
        .unwrap();
    seed.commit().unwrap();

    let mut txn = store.begin().unwrap();
    txn.delete(old).unwrap();
    assert_eq!(txn.binding(ns, 1000).unwrap(), None);
    assert_eq!(txn.bound_values(ns, range).unwrap().into_iter().collect::<Vec<_>>(), vec![1001]);

    let new = txn
        .insert(ResourceDraft::new(ResourceKind::UNIX_GROUP, "www-shared").on_host(host))
        .unwrap();
    txn.bind(IdentifierBinding { namespace: ns, value: 1000, resource: new })
        .unwrap();
    txn.commit().unwrap();

    assert_eq!(store.snapshot().binding(ns, 1000).unwrap(), Some(new));
}

#[test]
fn unbind_frees_the_value_for_the_rest_of_the_transaction() {
    let store = MemoryStore::new();
    let host = HostId::new(4);
    provision(&store, host);
    let ns = Namespace::new(host, IdentifierKind::Port);

    let mut seed = store.begin().unwrap();
    let first = seed
        .insert(ResourceDraft::new(ResourceKind::NET_BIND, "app-http").on_host(host))
        .unwrap();
    seed.bind(IdentifierBinding { namespace: ns, value: 8080, resource: first })
        .unwrap();
    seed.commit().unwrap();

    let mut txn = store.begin().unwrap();
    let second = txn
        .insert(ResourceDraft::new(ResourceKind::NET_BIND, "app-metrics").on_host(host))
        .unwrap();
    assert_matches!(
        txn.bind(IdentifierBinding { namespace: ns, value: 8080, resource: second }),
        Err(FleetError::Collision { value: 8080, .. })
    );
    assert!(txn.unbind(ns, 8080).unwrap());
    txn.bind(IdentifierBinding { namespace: ns, value: 8080, resource: second })
        .unwrap();
    txn.commit().unwrap();

    assert_eq!(store.snapshot().binding(ns, 8080).unwrap(), Some(second));
}

#[test]
fn unbind_replay_leaves_a_concurrent_holder_alone() {
    let store = MemoryStore::new();
    let host = HostId::new(5);
    provision(&store, host);
    let ns = Namespace::new(host, IdentifierKind::Uid);

    let mut seed = store.begin().unwrap();
    let a = seed
        .insert(ResourceDraft::new(ResourceKind::UNIX_USER, "svc-a").on_host(host))
        .unwrap();
    seed.bind(IdentifierBinding { namespace: ns, value: 700, resource: a })
        .unwrap();
    seed.commit().unwrap();

    let mut releaser = store.begin().unwrap();
    assert!(releaser.unbind(ns, 700).unwrap());

    let mut mover = store.begin().unwrap();
    let b = mover
        .insert(ResourceDraft::new(ResourceKind::UNIX_USER, "svc-b").on_host(host))
        .unwrap();
    mover.delete(a).unwrap();
    mover
        .bind(IdentifierBinding { namespace: ns, value: 700, resource: b })
        .unwrap();
    mover.commit().unwrap();

    releaser.commit().unwrap();
    assert_eq!(store.snapshot().binding(ns, 700).unwrap(), Some(b));
}
