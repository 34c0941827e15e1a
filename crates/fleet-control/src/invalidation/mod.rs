//! Transactional invalidation fan-out
//!
//! Writes record what they changed into a per-transaction
//! [`PendingInvalidations`]. Only after the store commits does the
//! [`InvalidationBus`] see those records: it runs every in-process subscriber
//! for each touched table synchronously, then queues notifications for the
//! client sessions whose scopes overlap. A rolled-back transaction simply
//! drops its pending records.

mod pump;
mod sessions;

pub use pump::{NotificationPump, PumpStats};
pub use sessions::SessionRegistry;

use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use fleet_core::config::NotifyConfig;
use fleet_core::{AccountScope, HostScope, InvalidationRecord, Notification, TableId};

use pump::Envelope;

/// In-process consumer of invalidations for one table
pub trait InvalidationSubscriber: Send + Sync {
    /// Called synchronously after a commit that touched the subscribed table
    fn on_invalidate(&self, record: &InvalidationRecord);
}

// ─────────────────────────────────────────────────────────────────────────────
// Pending records
// ─────────────────────────────────────────────────────────────────────────────

/// Records accumulated by one transaction, merged per table
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingInvalidations {
    records: BTreeMap<TableId, InvalidationRecord>,
}

impl PendingInvalidations {
    /// Nothing recorded yet
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a change, merging with earlier records for the same table
    pub fn record(&mut self, record: InvalidationRecord) {
        match self.records.get_mut(&record.table) {
            Some(existing) => existing.merge(&record),
            None => {
                self.records.insert(record.table.clone(), record);
            }
        }
    }

    /// Record a change from its parts
    pub fn record_parts(
        &mut self,
        table: TableId,
        accounts: AccountScope,
        hosts: HostScope,
        structural: bool,
    ) {
        self.record(InvalidationRecord::new(table, accounts, hosts, structural));
    }

    /// Merged record for a table
    pub fn get(&self, table: &TableId) -> Option<&InvalidationRecord> {
        self.records.get(table)
    }

    /// Number of distinct tables recorded
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether nothing was recorded
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Merged records in table order
    pub fn into_records(self) -> Vec<InvalidationRecord> {
        self.records.into_values().collect()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Bus
// ─────────────────────────────────────────────────────────────────────────────

/// What one publish did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FanoutReport {
    /// Sequence assigned to the batch; `None` when nothing was published
    pub sequence: Option<u64>,
    /// Tables invalidated
    pub tables: Vec<TableId>,
    /// In-process subscriber calls made
    pub local_subscribers: usize,
    /// Sessions a notification was queued for
    pub sessions_notified: usize,
}

/// Post-commit fan-out to local subscribers and client sessions
pub struct InvalidationBus {
    subscribers: RwLock<HashMap<TableId, Vec<Arc<dyn InvalidationSubscriber>>>>,
    sessions: SessionRegistry,
    outbox: mpsc::UnboundedSender<Envelope>,
    backlog: Arc<AtomicUsize>,
    backlog_warning: usize,
    notify_sessions: bool,
    sequence: AtomicU64,
}

impl InvalidationBus {
    /// Create a bus and the pump that delivers its session notifications
    pub fn new(config: &NotifyConfig) -> (Self, NotificationPump) {
        let (outbox, receiver) = mpsc::unbounded_channel();
        let backlog = Arc::new(AtomicUsize::new(0));
        let bus = Self {
            subscribers: RwLock::new(HashMap::new()),
            sessions: SessionRegistry::new(),
            outbox,
            backlog: Arc::clone(&backlog),
            backlog_warning: config.backlog_warning.max(1),
            notify_sessions: config.enabled,
            sequence: AtomicU64::new(0),
        };
        (bus, NotificationPump::new(receiver, backlog, config))
    }

    /// Run `subscriber` after every commit touching `table`
    pub fn subscribe(&self, table: TableId, subscriber: Arc<dyn InvalidationSubscriber>) {
        tracing::debug!(%table, "local invalidation subscriber registered");
        self.subscribers
            .write()
            .entry(table)
            .or_default()
            .push(subscriber);
    }

    /// Number of local subscribers for a table
    pub fn subscriber_count(&self, table: &TableId) -> usize {
        self.subscribers.read().get(table).map_or(0, Vec::len)
    }

    /// Connected client sessions
    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    /// Notifications queued for sessions and not yet taken by the pump
    pub fn backlog(&self) -> usize {
        self.backlog.load(Ordering::SeqCst)
    }

    /// Last sequence number handed out
    pub fn last_sequence(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }

    /// Fan out a committed transaction's records
    ///
    /// Local subscribers have all run when this returns; session delivery
    /// happens later on the pump.
    pub fn publish(&self, pending: PendingInvalidations) -> FanoutReport {
        if pending.is_empty() {
            return FanoutReport::default();
        }
        let records = pending.into_records();
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;

        let mut local_subscribers = 0;
        for record in &records {
            let subscribers = self
                .subscribers
                .read()
                .get(&record.table)
                .cloned()
                .unwrap_or_default();
            for subscriber in subscribers {
                subscriber.on_invalidate(record);
                local_subscribers += 1;
            }
        }

        let mut sessions_notified = 0;
        if self.notify_sessions {
            for (session, relevant) in self.sessions.route(&records) {
                let envelope = Envelope {
                    session,
                    notification: Notification {
                        sequence,
                        records: relevant,
                    },
                };
                let backlog = self.backlog.fetch_add(1, Ordering::SeqCst) + 1;
                if self.outbox.send(envelope).is_err() {
                    self.backlog.fetch_sub(1, Ordering::SeqCst);
                    tracing::warn!(sequence, "notification pump is gone; session notifications dropped");
                    break;
                }
                sessions_notified += 1;
                if backlog % self.backlog_warning == 0 {
                    tracing::warn!(
                        backlog,
                        sequence,
                        "session notifications are backing up; is the notification pump running?"
                    );
                }
            }
        }

        let tables: Vec<TableId> = records.into_iter().map(|record| record.table).collect();
        tracing::info!(
            sequence,
            tables = ?tables,
            local_subscribers,
            sessions_notified,
            "invalidation fan-out"
        );
        FanoutReport {
            sequence: Some(sequence),
            tables,
            local_subscribers,
            sessions_notified,
        }
    }

    /// Operator-initiated invalidation outside any transaction
    pub fn invalidate(&self, record: InvalidationRecord) -> FanoutReport {
        let mut pending = PendingInvalidations::new();
        pending.record(record);
        self.publish(pending)
    }
}

impl std::fmt::Debug for InvalidationBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvalidationBus")
            .field("tables", &self.subscribers.read().len())
            .field("sessions", &self.sessions)
            .field("notify_sessions", &self.notify_sessions)
            .field("backlog", &self.backlog())
            .field("sequence", &self.last_sequence())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_core::effects::SessionSubscription;
    use fleet_core::{AccountId, HostId, Scope};
    use fleet_testkit::RecordingSession;

    #[derive(Default)]
    struct Counter(AtomicUsize);

    impl InvalidationSubscriber for Counter {
        fn on_invalidate(&self, _record: &InvalidationRecord) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn fast_notify() -> NotifyConfig {
        NotifyConfig {
            enabled: true,
            max_attempts: 3,
            retry_backoff_ms: 1,
            backlog_warning: 2,
        }
    }

    #[test]
    fn pending_merges_per_table() {
        let mut pending = PendingInvalidations::new();
        pending.record_parts(
            TableId::UNIX_USERS,
            Scope::one(AccountId::new("ACME")),
            Scope::one(HostId::new(1)),
            false,
        );
        pending.record_parts(TableId::UNIX_USERS, Scope::All, Scope::one(HostId::new(2)), true);
        pending.record_parts(TableId::SITES, Scope::none(), Scope::none(), false);

        assert_eq!(pending.len(), 2);
        let users = pending.get(&TableId::UNIX_USERS).unwrap();
        assert!(users.accounts.is_all());
        assert!(users.structural);
        assert!(users.hosts.contains(&HostId::new(2)));
    }

    #[test]
    fn only_subscribers_of_touched_tables_run() {
        let (bus, _pump) = InvalidationBus::new(&fast_notify());
        let users = Arc::new(Counter::default());
        let sites = Arc::new(Counter::default());
        bus.subscribe(TableId::UNIX_USERS, users.clone());
        bus.subscribe(TableId::SITES, sites.clone());

        let report = bus.invalidate(InvalidationRecord::everything(TableId::UNIX_USERS, false));
        assert_eq!(report.local_subscribers, 1);
        assert_eq!(report.sequence, Some(1));
        assert_eq!(users.0.load(Ordering::SeqCst), 1);
        assert_eq!(sites.0.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn empty_publish_assigns_no_sequence() {
        let (bus, _pump) = InvalidationBus::new(&fast_notify());
        assert_eq!(bus.publish(PendingInvalidations::new()), FanoutReport::default());
        assert_eq!(bus.last_sequence(), 0);
    }

    #[tokio::test]
    async fn sessions_receive_only_overlapping_records() {
        let (bus, mut pump) = InvalidationBus::new(&fast_notify());
        let acme = RecordingSession::new();
        let other = RecordingSession::new();
        bus.sessions().subscribe(
            acme.clone(),
            SessionSubscription::new(Scope::one(AccountId::new("ACME")), Scope::All),
        );
        bus.sessions().subscribe(
            other.clone(),
            SessionSubscription::new(Scope::one(AccountId::new("OTHER")), Scope::All),
        );

        let mut pending = PendingInvalidations::new();
        pending.record_parts(
            TableId::UNIX_USERS,
            Scope::one(AccountId::new("ACME")),
            Scope::one(HostId::new(1)),
            true,
        );
        let report = bus.publish(pending);
        assert_eq!(report.sessions_notified, 1);

        let stats = pump.drain().await;
        assert_eq!(stats.delivered, 1);
        assert_eq!(acme.received().len(), 1);
        assert_eq!(acme.received()[0].sequence, 1);
        assert!(other.received().is_empty());
    }

    #[tokio::test]
    async fn flaky_session_is_retried_then_dropped() {
        let (bus, mut pump) = InvalidationBus::new(&fast_notify());
        let flaky = RecordingSession::failing(2);
        let dead = RecordingSession::failing(10);
        bus.sessions().subscribe(flaky.clone(), SessionSubscription::default());
        bus.sessions().subscribe(dead.clone(), SessionSubscription::default());

        bus.invalidate(InvalidationRecord::everything(TableId::ACCOUNTS, false));
        let stats = pump.drain().await;

        assert_eq!(stats, PumpStats { delivered: 1, dropped: 1 });
        assert_eq!(flaky.attempts(), 3);
        assert_eq!(flaky.received().len(), 1);
        assert_eq!(dead.attempts(), 3);
        assert!(dead.received().is_empty());
    }

    #[tokio::test]
    async fn backlog_counts_notifications_the_pump_has_not_taken() {
        let (bus, mut pump) = InvalidationBus::new(&fast_notify());
        let session = RecordingSession::new();
        bus.sessions().subscribe(session.clone(), SessionSubscription::default());

        for _ in 0..3 {
            bus.invalidate(InvalidationRecord::everything(TableId::SITES, false));
        }
        assert_eq!(bus.backlog(), 3);

        assert_eq!(pump.drain().await.delivered, 3);
        assert_eq!(bus.backlog(), 0);
        assert_eq!(session.sequences(), vec![1, 2, 3]);
    }

    #[test]
    fn disabled_notifications_skip_sessions() {
        let config = NotifyConfig {
            enabled: false,
            ..fast_notify()
        };
        let (bus, _pump) = InvalidationBus::new(&config);
        bus.sessions()
            .subscribe(RecordingSession::new(), SessionSubscription::default());
        let report = bus.invalidate(InvalidationRecord::everything(TableId::ACCOUNTS, true));
        assert_eq!(report.sessions_notified, 0);
    }
}
