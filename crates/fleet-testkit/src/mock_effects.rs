//! Recording mocks for the control plane's effect traits
//!
//! Each mock records what it was asked to do and can be scripted to fail,
//! so tests assert on both the control plane's result and the calls it made.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use fleet_core::effects::{
    AgentError, AuthorizationEffects, ClientSessionEffects, DeliveryError, RemoteAgentEffects,
    RemoteCall,
};
use fleet_core::{HostId, Notification, Principal, ResourceId, SessionId};

// ─────────────────────────────────────────────────────────────────────────────
// Remote agent
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct AgentState {
    calls: Vec<RemoteCall>,
    failing: HashSet<HostId>,
    delays: HashMap<HostId, Duration>,
    rejected: HashSet<String>,
    responses: HashMap<String, Value>,
}

/// Remote agent transport that records every call
#[derive(Debug, Default)]
pub struct RecordingRemoteAgent {
    state: Mutex<AgentState>,
}

impl RecordingRemoteAgent {
    /// Agent on which every call succeeds
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Calls to `host` fail with an I/O error
    pub fn fail_host(&self, host: HostId) {
        self.state.lock().failing.insert(host);
    }

    /// Calls to `host` succeed again
    pub fn heal_host(&self, host: HostId) {
        self.state.lock().failing.remove(&host);
    }

    /// Calls to `host` take `delay` before answering
    pub fn delay_host(&self, host: HostId, delay: Duration) {
        self.state.lock().delays.insert(host, delay);
    }

    /// Calls to `operation` are rejected by the agent
    pub fn reject_operation(&self, operation: impl Into<String>) {
        self.state.lock().rejected.insert(operation.into());
    }

    /// Answer `operation` with `value` instead of `{"ok": true}`
    pub fn respond(&self, operation: impl Into<String>, value: Value) {
        self.state.lock().responses.insert(operation.into(), value);
    }

    /// Every call received, in order
    pub fn calls(&self) -> Vec<RemoteCall> {
        self.state.lock().calls.clone()
    }

    /// Number of calls received for `host`
    pub fn calls_to(&self, host: HostId) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|call| call.host == host)
            .count()
    }
}

#[async_trait]
impl RemoteAgentEffects for RecordingRemoteAgent {
    async fn invoke(
        &self,
        host: HostId,
        operation: &str,
        args: Value,
    ) -> Result<Value, AgentError> {
        let (delay, failing, rejected, response) = {
            let mut state = self.state.lock();
            state.calls.push(RemoteCall::new(host, operation, args));
            (
                state.delays.get(&host).copied(),
                state.failing.contains(&host),
                state.rejected.contains(operation),
                state.responses.get(operation).cloned(),
            )
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if failing {
            return Err(AgentError::io(format!("connection to {host} refused")));
        }
        if rejected {
            return Err(AgentError::rejected(format!("{operation} not permitted")));
        }
        Ok(response.unwrap_or_else(|| json!({ "ok": true })))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Client session
// ─────────────────────────────────────────────────────────────────────────────

/// Client session that records delivered notifications
#[derive(Debug)]
pub struct RecordingSession {
    id: SessionId,
    failures_left: AtomicUsize,
    attempts: AtomicUsize,
    received: Mutex<Vec<Notification>>,
}

impl RecordingSession {
    /// Session that accepts every delivery
    pub fn new() -> Arc<Self> {
        Self::failing(0)
    }

    /// Session that fails its first `failures` deliveries
    pub fn failing(failures: usize) -> Arc<Self> {
        Arc::new(Self {
            id: SessionId::new(),
            failures_left: AtomicUsize::new(failures),
            attempts: AtomicUsize::new(0),
            received: Mutex::new(Vec::new()),
        })
    }

    /// Notifications accepted so far
    pub fn received(&self) -> Vec<Notification> {
        self.received.lock().clone()
    }

    /// Sequence numbers accepted so far
    pub fn sequences(&self) -> Vec<u64> {
        self.received.lock().iter().map(|n| n.sequence).collect()
    }

    /// Delivery attempts, failed ones included
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClientSessionEffects for RecordingSession {
    fn id(&self) -> SessionId {
        self.id
    }

    async fn deliver(&self, notification: &Notification) -> Result<(), DeliveryError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let failed = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failed {
            return Err(DeliveryError::new(self.id, "client unreachable"));
        }
        self.received.lock().push(notification.clone());
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Authorization
// ─────────────────────────────────────────────────────────────────────────────

/// Authorization oracle with a fixed answer plus deny lists
#[derive(Debug, Clone, Default)]
pub struct StaticAuthorization {
    allow: bool,
    denied_permissions: HashSet<String>,
    denied_principals: HashSet<Principal>,
    denied_resources: HashSet<ResourceId>,
}

impl StaticAuthorization {
    /// Everything is permitted unless denied below
    pub fn allow_all() -> Self {
        Self {
            allow: true,
            ..Self::default()
        }
    }

    /// Nothing is permitted
    pub fn deny_all() -> Self {
        Self::default()
    }

    /// Refuse one permission to everybody
    pub fn deny_permission(mut self, permission: impl Into<String>) -> Self {
        self.denied_permissions.insert(permission.into());
        self
    }

    /// Refuse everything to one principal
    pub fn deny_principal(mut self, principal: Principal) -> Self {
        self.denied_principals.insert(principal);
        self
    }

    /// Refuse access to one resource
    pub fn deny_resource(mut self, resource: ResourceId) -> Self {
        self.denied_resources.insert(resource);
        self
    }
}

impl AuthorizationEffects for StaticAuthorization {
    fn has_permission(&self, principal: &Principal, permission: &str) -> bool {
        self.allow
            && !self.denied_principals.contains(principal)
            && !self.denied_permissions.contains(permission)
    }

    fn can_access(&self, principal: &Principal, resource: ResourceId) -> bool {
        self.allow
            && !self.denied_principals.contains(principal)
            && !self.denied_resources.contains(&resource)
    }
}
