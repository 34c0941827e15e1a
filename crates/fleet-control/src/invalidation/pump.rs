//! Best-effort delivery of invalidation notifications to client sessions
//!
//! The bus enqueues one envelope per interested session after each commit.
//! The pump delivers them off the commit path, retrying a bounded number of
//! times with a linear backoff. A notification that still fails is logged and
//! dropped; clients recover by reloading, and the sequence number lets them
//! discard a redelivered batch.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use fleet_core::config::NotifyConfig;
use fleet_core::effects::ClientSessionEffects;
use fleet_core::Notification;

/// One notification bound for one session
pub(crate) struct Envelope {
    pub(crate) session: Arc<dyn ClientSessionEffects>,
    pub(crate) notification: Notification,
}

/// Delivery counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PumpStats {
    /// Notifications accepted by their session
    pub delivered: usize,
    /// Notifications dropped after the last attempt
    pub dropped: usize,
}

/// Consumer side of the bus's notification queue
pub struct NotificationPump {
    receiver: mpsc::UnboundedReceiver<Envelope>,
    backlog: Arc<AtomicUsize>,
    max_attempts: u32,
    backoff: Duration,
}

impl NotificationPump {
    pub(crate) fn new(
        receiver: mpsc::UnboundedReceiver<Envelope>,
        backlog: Arc<AtomicUsize>,
        config: &NotifyConfig,
    ) -> Self {
        Self {
            receiver,
            backlog,
            max_attempts: config.max_attempts.max(1),
            backoff: Duration::from_millis(config.retry_backoff_ms),
        }
    }

    /// The bus counts an envelope before sending it
    fn taken(&self) {
        self.backlog.fetch_sub(1, Ordering::SeqCst);
    }

    /// Deliver until the bus is dropped
    pub async fn run(mut self) -> PumpStats {
        let mut stats = PumpStats::default();
        while let Some(envelope) = self.receiver.recv().await {
            self.taken();
            deliver(envelope, self.max_attempts, self.backoff, &mut stats).await;
        }
        tracing::debug!(
            delivered = stats.delivered,
            dropped = stats.dropped,
            "notification pump stopped"
        );
        stats
    }

    /// Deliver everything queued right now, then return
    pub async fn drain(&mut self) -> PumpStats {
        let mut stats = PumpStats::default();
        while let Ok(envelope) = self.receiver.try_recv() {
            self.taken();
            deliver(envelope, self.max_attempts, self.backoff, &mut stats).await;
        }
        stats
    }
}

async fn deliver(envelope: Envelope, max_attempts: u32, backoff: Duration, stats: &mut PumpStats) {
    let session = envelope.session.id();
    let sequence = envelope.notification.sequence;
    for attempt in 1..=max_attempts {
        match envelope.session.deliver(&envelope.notification).await {
            Ok(()) => {
                tracing::trace!(%session, sequence, attempt, "notification delivered");
                stats.delivered += 1;
                return;
            }
            Err(err) => {
                tracing::debug!(%session, sequence, attempt, error = %err, "notification delivery failed");
                if attempt < max_attempts {
                    tokio::time::sleep(backoff.saturating_mul(attempt)).await;
                }
            }
        }
    }
    tracing::warn!(
        %session,
        sequence,
        attempts = max_attempts,
        "dropping notification after final attempt"
    );
    stats.dropped += 1;
}

impl std::fmt::Debug for NotificationPump {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationPump")
            .field("max_attempts", &self.max_attempts)
            .field("backoff", &self.backoff)
            .finish_non_exhaustive()
    }
}
