//! Remote host availability
//!
//! A failed or timed-out agent call marks its host down for a cooldown
//! window. While down, calls to the host are skipped and agent queries
//! answer with a degraded reading instead of blocking on the network.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

use fleet_core::HostId;

#[derive(Debug, Clone)]
struct DownState {
    until: Instant,
    reason: String,
}

/// Availability of one host
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostStatus {
    /// Calls go through
    Available,
    /// In cooldown after a failure
    CoolingDown {
        /// Time left before calls resume
        remaining: Duration,
        /// Failure that triggered the cooldown
        reason: String,
    },
}

/// Cooldown tracker shared by every dispatch
#[derive(Debug)]
pub struct HostAvailability {
    cooldown: Duration,
    down: Mutex<HashMap<HostId, DownState>>,
}

impl HostAvailability {
    /// Tracker with the given cooldown window
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            down: Mutex::new(HashMap::new()),
        }
    }

    /// Mark a host down from now
    pub fn mark_down(&self, host: HostId, reason: impl Into<String>) {
        self.mark_down_at(host, reason, Instant::now());
    }

    /// Mark a host down from `now`
    pub fn mark_down_at(&self, host: HostId, reason: impl Into<String>, now: Instant) {
        let reason = reason.into();
        tracing::warn!(
            %host,
            cooldown_secs = self.cooldown.as_secs(),
            %reason,
            "host marked unavailable"
        );
        self.down.lock().insert(
            host,
            DownState {
                until: now + self.cooldown,
                reason,
            },
        );
    }

    /// Clear a host's cooldown early
    pub fn mark_up(&self, host: HostId) {
        if self.down.lock().remove(&host).is_some() {
            tracing::info!(%host, "host marked available");
        }
    }

    /// Whether calls to `host` go through now
    pub fn is_available(&self, host: HostId) -> bool {
        self.is_available_at(host, Instant::now())
    }

    /// Whether calls to `host` go through at `now`
    pub fn is_available_at(&self, host: HostId, now: Instant) -> bool {
        matches!(self.status_at(host, now), HostStatus::Available)
    }

    /// Availability of `host` now
    pub fn status(&self, host: HostId) -> HostStatus {
        self.status_at(host, Instant::now())
    }

    /// Availability of `host` at `now`; expired cooldowns are forgotten
    pub fn status_at(&self, host: HostId, now: Instant) -> HostStatus {
        let mut down = self.down.lock();
        let Some(state) = down.get(&host) else {
            return HostStatus::Available;
        };
        if state.until > now {
            return HostStatus::CoolingDown {
                remaining: state.until - now,
                reason: state.reason.clone(),
            };
        }
        down.remove(&host);
        HostStatus::Available
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn cooldown_expires() {
        let availability = HostAvailability::new(Duration::from_secs(60));
        let host = HostId::new(3);
        let start = Instant::now();

        availability.mark_down_at(host, "connection refused", start);
        assert!(!availability.is_available_at(host, start + Duration::from_secs(59)));
        assert_matches!(
            availability.status_at(host, start + Duration::from_secs(30)),
            HostStatus::CoolingDown { ref reason, .. } if reason == "connection refused"
        );
        assert!(availability.is_available_at(host, start + Duration::from_secs(61)));
    }

    #[test]
    fn hosts_are_tracked_independently() {
        let availability = HostAvailability::new(Duration::from_secs(60));
        availability.mark_down(HostId::new(1), "timeout");
        assert!(!availability.is_available(HostId::new(1)));
        assert!(availability.is_available(HostId::new(2)));
        availability.mark_up(HostId::new(1));
        assert!(availability.is_available(HostId::new(1)));
    }
}
