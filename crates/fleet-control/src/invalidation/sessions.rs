//! Registry of connected client sessions and their subscriptions

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use fleet_core::effects::{ClientSessionEffects, SessionSubscription};
use fleet_core::{InvalidationRecord, SessionId};

#[derive(Clone)]
struct SessionEntry {
    handle: Arc<dyn ClientSessionEffects>,
    subscription: SessionSubscription,
}

/// Connected sessions keyed by id
#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<SessionId, SessionEntry>>>,
}

impl SessionRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session, replacing any previous subscription it held
    pub fn subscribe(
        &self,
        handle: Arc<dyn ClientSessionEffects>,
        subscription: SessionSubscription,
    ) -> SessionId {
        let id = handle.id();
        tracing::debug!(session = %id, "client session subscribed");
        self.sessions.write().insert(
            id,
            SessionEntry {
                handle,
                subscription,
            },
        );
        id
    }

    /// Remove a session; returns whether it was registered
    pub fn unsubscribe(&self, id: SessionId) -> bool {
        let removed = self.sessions.write().remove(&id).is_some();
        if removed {
            tracing::debug!(session = %id, "client session unsubscribed");
        }
        removed
    }

    /// Subscription of a registered session
    pub fn subscription(&self, id: SessionId) -> Option<SessionSubscription> {
        self.sessions
            .read()
            .get(&id)
            .map(|entry| entry.subscription.clone())
    }

    /// Sessions interested in a record
    pub fn matching(&self, record: &InvalidationRecord) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = self
            .sessions
            .read()
            .iter()
            .filter(|(_, entry)| entry.subscription.matches(record))
            .map(|(id, _)| *id)
            .collect();
        ids.sort();
        ids
    }

    /// For each session, the records it should hear about
    ///
    /// Sessions with no matching record are left out.
    pub(crate) fn route(
        &self,
        records: &[InvalidationRecord],
    ) -> Vec<(Arc<dyn ClientSessionEffects>, Vec<InvalidationRecord>)> {
        self.sessions
            .read()
            .values()
            .filter_map(|entry| {
                let relevant: Vec<InvalidationRecord> = records
                    .iter()
                    .filter(|record| entry.subscription.matches(record))
                    .cloned()
                    .collect();
                (!relevant.is_empty()).then(|| (Arc::clone(&entry.handle), relevant))
            })
            .collect()
    }

    /// Number of registered sessions
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    /// Whether no session is registered
    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("sessions", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_core::{AccountId, HostId, Scope, TableId};
    use fleet_testkit::RecordingSession;

    #[test]
    fn routing_follows_account_and_host_overlap() {
        let registry = SessionRegistry::new();
        let acme = RecordingSession::new();
        let beta = RecordingSession::new();
        let acme_id = registry.subscribe(
            acme.clone(),
            SessionSubscription::new(Scope::one(AccountId::new("ACME")), Scope::All),
        );
        registry.subscribe(
            beta,
            SessionSubscription::new(Scope::one(AccountId::new("BETA")), Scope::one(HostId::new(2))),
        );

        let record = InvalidationRecord::new(
            TableId::UNIX_USERS,
            Scope::one(AccountId::new("ACME")),
            Scope::one(HostId::new(1)),
            true,
        );
        assert_eq!(registry.matching(&record), vec![acme_id]);

        let routed = registry.route(std::slice::from_ref(&record));
        assert_eq!(routed.len(), 1);
        assert_eq!(routed[0].0.id(), acme_id);

        assert!(registry.unsubscribe(acme_id));
        assert!(registry.matching(&record).is_empty());
        assert!(!registry.unsubscribe(acme_id));
    }
}
