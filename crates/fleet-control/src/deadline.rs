//! Transaction deadlines
//!
//! Allocation scans and dependency evaluation run inside a transaction and
//! inherit its deadline; on expiry they abort with `Timeout` and the whole
//! transaction rolls back.

use std::time::{Duration, Instant};

use fleet_core::{FleetError, FleetResult};

/// Point in time after which transactional work must stop
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    expires_at: Option<Instant>,
}

impl Deadline {
    /// Deadline `budget` from now
    pub fn after(budget: Duration) -> Self {
        Self {
            expires_at: Instant::now().checked_add(budget),
        }
    }

    /// Deadline that never expires
    pub fn unbounded() -> Self {
        Self { expires_at: None }
    }

    /// Whether the deadline has passed
    pub fn is_expired(&self) -> bool {
        self.expires_at
            .map_or(false, |expires_at| Instant::now() >= expires_at)
    }

    /// Time left, `None` when unbounded
    pub fn remaining(&self) -> Option<Duration> {
        self.expires_at
            .map(|expires_at| expires_at.saturating_duration_since(Instant::now()))
    }

    /// Fail with `Timeout` naming `operation` once expired
    pub fn check(&self, operation: &str) -> FleetResult<()> {
        if self.is_expired() {
            tracing::warn!(operation, "transaction deadline expired");
            return Err(FleetError::timeout(operation));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_budget_expires_immediately() {
        let deadline = Deadline::after(Duration::ZERO);
        assert!(deadline.is_expired());
        assert!(matches!(
            deadline.check("scan"),
            Err(FleetError::Timeout { .. })
        ));
    }

    #[test]
    fn unbounded_never_expires() {
        let deadline = Deadline::unbounded();
        assert!(deadline.check("scan").is_ok());
        assert_eq!(deadline.remaining(), None);
    }
}
