/// Statistics tracking for the bus
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time bus statistics for monitoring and tests.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusStats {
    /// Publishes that passed the cascade guard
    pub events_published: u64,
    /// Handler invocations, counting only subscriptions whose filter accepted the event
    pub handlers_invoked: u64,
    /// Handlers that returned an error or requested one through a deferred action
    pub handler_failures: u64,
    /// Publishes rejected for exceeding the maximum cascade depth
    pub cascades_rejected: u64,
    /// Subscriptions currently registered
    pub active_subscriptions: usize,
}

#[derive(Debug, Default)]
pub(super) struct StatsCounters {
    events_published: AtomicU64,
    handlers_invoked: AtomicU64,
    handler_failures: AtomicU64,
    cascades_rejected: AtomicU64,
}

impl StatsCounters {
    pub(super) fn record_publish(&self) {
        self.events_published.fetch_add(1, Ordering::Relaxed);
    }

    pub(super) fn record_invocation(&self) {
        self.handlers_invoked.fetch_add(1, Ordering::Relaxed);
    }

    pub(super) fn record_failure(&self) {
        self.handler_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(super) fn record_rejected_cascade(&self) {
        self.cascades_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub(super) fn snapshot(&self, active_subscriptions: usize) -> BusStats {
        BusStats {
            events_published: self.events_published.load(Ordering::Relaxed),
            handlers_invoked: self.handlers_invoked.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
            cascades_rejected: self.cascades_rejected.load(Ordering::Relaxed),
            active_subscriptions,
        }
    }
}
