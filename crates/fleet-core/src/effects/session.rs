//! Client session effects
//!
//! Connected clients keep their own caches of table contents and are told
//! which tables to reload after a commit. Delivery is best-effort; the core
//! expects no acknowledgement.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::identifiers::SessionId;
use crate::invalidation::{InvalidationRecord, Notification};
use crate::scope::{AccountScope, HostScope, TableScope};

/// Error delivering to a client session
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[error("Delivery to {session} failed: {message}")]
pub struct DeliveryError {
    /// Session that could not be reached
    pub session: SessionId,
    /// Failure description
    pub message: String,
}

impl DeliveryError {
    /// Create a delivery error
    pub fn new(session: SessionId, message: impl Into<String>) -> Self {
        Self {
            session,
            message: message.into(),
        }
    }
}

/// What a session wants to hear about
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SessionSubscription {
    /// Tables of interest
    pub tables: TableScope,
    /// Accounts visible to the session
    pub accounts: AccountScope,
    /// Hosts visible to the session
    pub hosts: HostScope,
}

impl SessionSubscription {
    /// Subscription to the given account and host scopes on every table
    pub fn new(accounts: AccountScope, hosts: HostScope) -> Self {
        Self {
            tables: TableScope::All,
            accounts,
            hosts,
        }
    }

    /// Narrow to a set of tables
    pub fn with_tables(mut self, tables: TableScope) -> Self {
        self.tables = tables;
        self
    }

    /// Whether a record concerns this subscription
    pub fn matches(&self, record: &InvalidationRecord) -> bool {
        self.tables.contains(&record.table)
            && self.accounts.intersects(&record.accounts)
            && self.hosts.intersects(&record.hosts)
    }
}

/// A connected client
#[async_trait]
pub trait ClientSessionEffects: Send + Sync {
    /// Stable identifier of the session
    fn id(&self) -> SessionId;

    /// Push a notification to the client
    async fn deliver(&self, notification: &Notification) -> Result<(), DeliveryError>;
}
