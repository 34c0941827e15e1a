//! Control-plane orchestrator
//!
//! [`ControlPlane`] owns the store and every shared collaborator and runs each
//! operation in a fixed order:
//!
//! 1. open a transaction and hand the handler a [`TransactionContext`]
//! 2. the handler authorizes, allocates or dependency-checks, writes and
//!    records invalidations
//! 3. commit; on any failure roll back with no fan-out
//! 4. publish the merged invalidations (local caches first, then sessions)
//! 5. only now dispatch the queued remote-agent calls
//!
//! A failed agent call after commit is a soft failure: it is reported in the
//! [`Outcome`], its host cools down, and the committed state stands.

use std::sync::Arc;

use fleet_core::effects::{AgentError, AuthorizationEffects, RemoteAgentEffects, RemoteCall};
use fleet_core::{
    AccountId, FleetConfig, FleetError, FleetResult, HostId, Principal, ResourceFilter,
    ResourceKind, ResourceStatus, ResourceView, StoreTransaction, TableId, TransactionalStore,
};

use crate::availability::{HostAvailability, HostStatus};
use crate::cache::{CacheRegistry, LocalFactCache};
use crate::deadline::Deadline;
use crate::deletion::{standard_policies, SafeDeleter};
use crate::invalidation::{FanoutReport, InvalidationBus, NotificationPump};
use crate::policy::PolicyRegistry;
use crate::transaction::{Services, TransactionContext};

/// Name of the built-in account status cache
pub const ACCOUNT_DISABLED_CACHE: &str = "account-disabled";

// ─────────────────────────────────────────────────────────────────────────────
// Results
// ─────────────────────────────────────────────────────────────────────────────

/// A committed transaction whose remote calls have not run yet
#[derive(Debug)]
pub struct Committed<T> {
    /// Handler result
    pub value: T,
    /// Calls queued by the handler
    pub remote_calls: Vec<RemoteCall>,
    /// What the invalidation fan-out did
    pub fanout: FanoutReport,
}

/// Remote call that did not complete after commit
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteFailure {
    /// The call
    pub call: RemoteCall,
    /// Why it failed
    pub error: FleetError,
}

/// Final result of an operation
#[derive(Debug)]
pub struct Outcome<T> {
    /// Handler result
    pub value: T,
    /// What the invalidation fan-out did
    pub fanout: FanoutReport,
    /// Remote calls that succeeded
    pub remote_succeeded: usize,
    /// Remote calls that failed or were skipped
    pub remote_failures: Vec<RemoteFailure>,
}

impl<T> Outcome<T> {
    /// Database change committed but some agent work is outstanding
    pub fn is_partial(&self) -> bool {
        !self.remote_failures.is_empty()
    }
}

/// Answer from an agent query
#[derive(Debug, Clone, PartialEq)]
pub enum AgentReading {
    /// Agent answered
    Ready(serde_json::Value),
    /// Host unavailable; the caller should show stale or unknown state
    Degraded {
        /// Why no answer is available
        reason: String,
    },
}

impl AgentReading {
    /// Whether the reading is the degraded sentinel
    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Degraded { .. })
    }
}

enum Aborted {
    Body(FleetError),
    Commit(FleetError),
}

impl Aborted {
    fn into_error(self) -> FleetError {
        match self {
            Self::Body(err) | Self::Commit(err) => err,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Builder
// ─────────────────────────────────────────────────────────────────────────────

/// Assembles a [`ControlPlane`]
pub struct ControlPlaneBuilder<S> {
    store: S,
    config: FleetConfig,
    policies: Option<Arc<PolicyRegistry>>,
    deleter: Option<SafeDeleter>,
    authorization: Option<Arc<dyn AuthorizationEffects>>,
    agents: Option<Arc<dyn RemoteAgentEffects>>,
}

impl<S: TransactionalStore> ControlPlaneBuilder<S> {
    /// Use this configuration instead of the defaults
    pub fn config(mut self, config: FleetConfig) -> Self {
        self.config = config;
        self
    }

    /// Use these policy tables instead of loading `policy_file`
    pub fn policies(mut self, policies: PolicyRegistry) -> Self {
        self.policies = Some(Arc::new(policies));
        self
    }

    /// Use this deleter instead of the standard policies
    pub fn deleter(mut self, deleter: SafeDeleter) -> Self {
        self.deleter = Some(deleter);
        self
    }

    /// Authorization oracle
    pub fn authorization(mut self, authorization: Arc<dyn AuthorizationEffects>) -> Self {
        self.authorization = Some(authorization);
        self
    }

    /// Remote agent transport
    pub fn agents(mut self, agents: Arc<dyn RemoteAgentEffects>) -> Self {
        self.agents = Some(agents);
        self
    }

    /// Validate and build; the pump must be spawned to deliver session
    /// notifications
    pub fn build(self) -> FleetResult<(ControlPlane<S>, NotificationPump)> {
        self.config.validate()?;

        let policies = match (self.policies, &self.config.policy_file) {
            (Some(policies), _) => policies,
            (None, Some(path)) => Arc::new(PolicyRegistry::load_from_file(path)?),
            (None, None) => {
                return Err(FleetError::config(
                    "no allocation policy: set policy_file or supply policies",
                ))
            }
        };
        let deleter = self.deleter.unwrap_or_else(|| {
            SafeDeleter::with_policies(standard_policies(
                &self.config.deletion,
                Arc::clone(&policies),
            ))
        });
        let authorization = self
            .authorization
            .ok_or_else(|| FleetError::config("no authorization oracle configured"))?;
        let agents = self
            .agents
            .ok_or_else(|| FleetError::config("no remote agent transport configured"))?;

        let (bus, pump) = InvalidationBus::new(&self.config.notify);
        let bus = Arc::new(bus);
        let caches = CacheRegistry::new(Arc::clone(&bus));
        let account_disabled = caches.register(ACCOUNT_DISABLED_CACHE, TableId::ACCOUNTS)?;

        tracing::info!(
            os_versions = policies.len(),
            transaction_timeout_ms = self.config.transaction.timeout_ms,
            remote_timeout_ms = self.config.remote.timeout_ms,
            "control plane ready"
        );

        let plane = ControlPlane {
            availability: HostAvailability::new(self.config.host_cooldown()),
            store: self.store,
            config: self.config,
            services: Services {
                policies,
                deleter: Arc::new(deleter),
                authorization,
            },
            agents,
            bus,
            caches,
            account_disabled,
        };
        Ok((plane, pump))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Control plane
// ─────────────────────────────────────────────────────────────────────────────

/// Runs every operation in the fixed authorize, write, commit, fan-out,
/// remote order
pub struct ControlPlane<S: TransactionalStore> {
    store: S,
    config: FleetConfig,
    services: Services,
    agents: Arc<dyn RemoteAgentEffects>,
    bus: Arc<InvalidationBus>,
    caches: CacheRegistry,
    availability: HostAvailability,
    account_disabled: Arc<LocalFactCache<AccountId, bool>>,
}

impl<S: TransactionalStore> ControlPlane<S> {
    /// Start building a control plane over `store`
    pub fn builder(store: S) -> ControlPlaneBuilder<S> {
        ControlPlaneBuilder {
            store,
            config: FleetConfig::default(),
            policies: None,
            deleter: None,
            authorization: None,
            agents: None,
        }
    }

    /// Underlying store
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Active configuration
    pub fn config(&self) -> &FleetConfig {
        &self.config
    }

    /// Allocation policy tables
    pub fn policies(&self) -> &PolicyRegistry {
        &self.services.policies
    }

    /// Deletion rule engine
    pub fn deleter(&self) -> &SafeDeleter {
        &self.services.deleter
    }

    /// Invalidation bus
    pub fn bus(&self) -> &Arc<InvalidationBus> {
        &self.bus
    }

    /// Fact caches of this process
    pub fn caches(&self) -> &CacheRegistry {
        &self.caches
    }

    /// Host cooldown tracker
    pub fn availability(&self) -> &HostAvailability {
        &self.availability
    }

    // ── Transactions ────────────────────────────────────────────────────────

    /// Run `body` in one transaction and publish its invalidations
    ///
    /// Any error from the body or from the commit rolls everything back and
    /// publishes nothing. Queued remote calls are returned, not run.
    pub fn commit<T, F>(&self, principal: &Principal, body: F) -> FleetResult<Committed<T>>
    where
        F: FnOnce(&mut TransactionContext<'_, S::Txn>) -> FleetResult<T>,
    {
        self.attempt(principal, body).map_err(Aborted::into_error)
    }

    /// Like [`commit`](Self::commit), re-running the whole body when the
    /// commit itself reports a conflict
    pub fn commit_with_retry<T, F>(&self, principal: &Principal, mut body: F) -> FleetResult<Committed<T>>
    where
        F: FnMut(&mut TransactionContext<'_, S::Txn>) -> FleetResult<T>,
    {
        let retries = self.config.transaction.conflict_retries;
        let mut attempt = 0;
        loop {
            match self.attempt(principal, &mut body) {
                Ok(committed) => return Ok(committed),
                Err(Aborted::Commit(err)) if err.is_conflict() && attempt < retries => {
                    attempt += 1;
                    tracing::warn!(attempt, retries, error = %err, "commit conflict; retrying transaction");
                }
                Err(aborted) => return Err(aborted.into_error()),
            }
        }
    }

    fn attempt<T, F>(&self, principal: &Principal, body: F) -> Result<Committed<T>, Aborted>
    where
        F: FnOnce(&mut TransactionContext<'_, S::Txn>) -> FleetResult<T>,
    {
        let txn = self.store.begin().map_err(Aborted::Body)?;
        let deadline = Deadline::after(self.config.transaction_timeout());
        let mut ctx = TransactionContext::new(txn, principal, &self.services, deadline);

        let result = body(&mut ctx).and_then(|value| {
            ctx.check_deadline("commit")?;
            Ok(value)
        });
        let (txn, pending, remote_calls) = ctx.into_parts();

        let value = match result {
            Ok(value) => value,
            Err(err) => {
                txn.rollback();
                tracing::debug!(
                    %principal,
                    error = %err,
                    discarded_tables = pending.len(),
                    discarded_calls = remote_calls.len(),
                    "transaction rolled back"
                );
                return Err(Aborted::Body(err));
            }
        };

        if let Err(err) = txn.commit() {
            tracing::warn!(%principal, error = %err, "commit failed");
            return Err(Aborted::Commit(err));
        }

        let fanout = self.bus.publish(pending);
        Ok(Committed {
            value,
            remote_calls,
            fanout,
        })
    }

    // ── Remote dispatch ─────────────────────────────────────────────────────

    /// Send the calls queued by a committed transaction
    ///
    /// Calls run in the order they were queued. Hosts in cooldown are
    /// skipped and reported.
    pub async fn dispatch<T>(&self, committed: Committed<T>) -> Outcome<T> {
        let mut remote_succeeded = 0;
        let mut remote_failures = Vec::new();
        for call in committed.remote_calls {
            if let HostStatus::CoolingDown { reason, .. } = self.availability.status(call.host) {
                tracing::debug!(host = %call.host, operation = %call.operation, "skipping call to host in cooldown");
                remote_failures.push(RemoteFailure {
                    error: FleetError::remote_unavailable(call.host, format!("in cooldown: {reason}")),
                    call,
                });
                continue;
            }
            match self.invoke(call.host, &call.operation, call.args.clone()).await {
                Ok(_) => remote_succeeded += 1,
                Err(error) => remote_failures.push(RemoteFailure { call, error }),
            }
        }
        if !remote_failures.is_empty() {
            tracing::warn!(
                failed = remote_failures.len(),
                succeeded = remote_succeeded,
                "committed with outstanding remote work"
            );
        }
        Outcome {
            value: committed.value,
            fanout: committed.fanout,
            remote_succeeded,
            remote_failures,
        }
    }

    /// Commit, then dispatch
    pub async fn execute<T, F>(&self, principal: &Principal, body: F) -> FleetResult<Outcome<T>>
    where
        F: FnOnce(&mut TransactionContext<'_, S::Txn>) -> FleetResult<T>,
    {
        let committed = self.commit(principal, body)?;
        Ok(self.dispatch(committed).await)
    }

    /// Commit with conflict retries, then dispatch
    pub async fn execute_with_retry<T, F>(
        &self,
        principal: &Principal,
        body: F,
    ) -> FleetResult<Outcome<T>>
    where
        F: FnMut(&mut TransactionContext<'_, S::Txn>) -> FleetResult<T>,
    {
        let committed = self.commit_with_retry(principal, body)?;
        Ok(self.dispatch(committed).await)
    }

    /// Ask a host's agent for live state, degrading instead of failing
    pub async fn query_agent(
        &self,
        host: HostId,
        operation: &str,
        args: serde_json::Value,
    ) -> AgentReading {
        if let HostStatus::CoolingDown { reason, .. } = self.availability.status(host) {
            return AgentReading::Degraded { reason };
        }
        match self.invoke(host, operation, args).await {
            Ok(value) => AgentReading::Ready(value),
            Err(err) => AgentReading::Degraded {
                reason: err.to_string(),
            },
        }
    }

    async fn invoke(
        &self,
        host: HostId,
        operation: &str,
        args: serde_json::Value,
    ) -> FleetResult<serde_json::Value> {
        let call = self.agents.invoke(host, operation, args);
        match tokio::time::timeout(self.config.remote_timeout(), call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(AgentError::Rejected { message })) => {
                tracing::warn!(%host, operation, %message, "agent rejected call");
                Err(FleetError::remote_unavailable(
                    host,
                    format!("{operation} rejected: {message}"),
                ))
            }
            Ok(Err(err)) => {
                let reason = err.to_string();
                self.availability.mark_down(host, reason.clone());
                Err(FleetError::remote_unavailable(host, reason))
            }
            Err(_) => {
                let reason = format!("{operation} timed out after {}ms", self.config.remote.timeout_ms);
                self.availability.mark_down(host, reason.clone());
                Err(FleetError::remote_unavailable(host, reason))
            }
        }
    }

    // ── Cached facts ────────────────────────────────────────────────────────

    /// Whether an account is disabled or canceled, memoized until the
    /// accounts table changes
    pub fn is_account_disabled(&self, account: &AccountId) -> FleetResult<bool> {
        self.account_disabled.get_or_try(account, |account| {
            let txn = self.store.begin()?;
            let rows =
                txn.find(&ResourceFilter::kind(ResourceKind::ACCOUNT).account(account.clone()))?;
            txn.rollback();
            Ok(rows
                .iter()
                .any(|row| row.name == account.as_str() && row.status != ResourceStatus::Active))
        })
    }
}

impl<S: TransactionalStore> std::fmt::Debug for ControlPlane<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlPlane")
            .field("config", &self.config)
            .field("services", &self.services)
            .field("bus", &self.bus)
            .field("caches", &self.caches)
            .finish_non_exhaustive()
    }
}
