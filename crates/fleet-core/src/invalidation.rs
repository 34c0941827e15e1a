//! Invalidation records and the notifications built from them
//!
//! A record names a table whose derived facts may be stale, narrowed by the
//! accounts and hosts the change touched. Records only live for one
//! transaction; repeated records for the same table merge before fan-out.

use serde::{Deserialize, Serialize};

use crate::identifiers::TableId;
use crate::scope::{AccountScope, HostScope};

/// Signal that cached facts derived from `table` may be stale
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidationRecord {
    /// Table that changed
    pub table: TableId,
    /// Accounts whose view of the table changed
    pub accounts: AccountScope,
    /// Hosts whose view of the table changed
    pub hosts: HostScope,
    /// Rows were added or removed, not just updated in place
    pub structural: bool,
}

impl InvalidationRecord {
    /// Create a record
    pub fn new(table: TableId, accounts: AccountScope, hosts: HostScope, structural: bool) -> Self {
        Self {
            table,
            accounts,
            hosts,
            structural,
        }
    }

    /// Record touching every account and host
    pub fn everything(table: TableId, structural: bool) -> Self {
        Self::new(table, AccountScope::All, HostScope::All, structural)
    }

    /// Fold another record for the same table into this one
    ///
    /// Scopes union (with `All` absorbing) and the structural flags OR.
    pub fn merge(&mut self, other: &InvalidationRecord) {
        debug_assert_eq!(self.table, other.table);
        self.accounts.merge(&other.accounts);
        self.hosts.merge(&other.hosts);
        self.structural |= other.structural;
    }
}

/// Batch of invalidation records pushed to one client session after a commit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// Monotonic per-process sequence; redelivery repeats the same value
    pub sequence: u64,
    /// Records matching the session's subscription
    pub records: Vec<InvalidationRecord>,
}
