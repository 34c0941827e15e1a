//! Shared setup for control-plane integration tests

#![allow(dead_code)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

use std::sync::Arc;

use fleet_control::{ControlPlane, NotificationPump, PolicyRegistry};
use fleet_core::{
    AccountId, FleetConfig, HostId, IdentifierBinding, IdentifierKind, Namespace, Principal,
    ResourceDraft, ResourceKind, StoreTransaction, TransactionalStore,
};
use fleet_store::MemoryStore;
use fleet_testkit::{fixtures, RecordingRemoteAgent, StaticAuthorization};

/// A control plane over the fixture store with its collaborators exposed
pub struct Harness {
    pub plane: ControlPlane<MemoryStore>,
    pub pump: NotificationPump,
    pub agent: Arc<RecordingRemoteAgent>,
}

pub fn harness() -> Harness {
    harness_with(FleetConfig::default(), StaticAuthorization::allow_all())
}

pub fn harness_with(config: FleetConfig, authorization: StaticAuthorization) -> Harness {
    let agent = RecordingRemoteAgent::new();
    let (plane, pump) = ControlPlane::builder(fixtures::seeded_store())
        .config(config)
        .policies(PolicyRegistry::from_toml_str(fixtures::POLICY_TOML).unwrap())
        .authorization(Arc::new(authorization))
        .agents(agent.clone())
        .build()
        .unwrap();
    Harness { plane, pump, agent }
}

pub fn operator() -> Principal {
    Principal::new("operator")
}

/// Occupy `values` in a host namespace directly through the store
pub fn occupy(store: &MemoryStore, host: HostId, kind: IdentifierKind, values: &[u32]) {
    let mut txn = store.begin().unwrap();
    for &value in values {
        let resource = txn
            .insert(
                ResourceDraft::new(ResourceKind::UNIX_USER, format!("seed{value}"))
                    .owned_by(AccountId::new("SEED"))
                    .on_host(host),
            )
            .unwrap();
        txn.bind(IdentifierBinding {
            namespace: Namespace::new(host, kind),
            value,
            resource,
        })
        .unwrap();
    }
    txn.commit().unwrap();
}
