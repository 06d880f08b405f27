/// Core Bus implementation
use super::depth;
use super::handlers::{EventFilter, Handler};
use super::stats::{BusStats, StatsCounters};
use crate::config::{normalize_max_depth, BusConfig};
use crate::refs::Ref;
use compact_str::CompactString;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_BUS_ID: AtomicU64 = AtomicU64::new(1);

/// Handle for one subscription, unique within its bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    /// Rebuilds an id from its numeric form.
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

pub(super) type SubscriptionList = SmallVec<[Arc<SubscriptionEntry>; 4]>;

/// A registered handler and the options it was subscribed with.
pub(super) struct SubscriptionEntry {
    pub(super) id: SubscriptionId,
    pub(super) topic: Ref,
    pub(super) priority: i32,
    pub(super) handler: Handler,
    pub(super) filter: Option<EventFilter>,
    /// Cleared on unsubscribe so an in-flight snapshot skips the entry.
    pub(super) active: AtomicBool,
}

impl SubscriptionEntry {
    pub(super) fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

#[derive(Default)]
pub(super) struct Registry {
    /// Per-topic subscriptions, kept sorted by (priority, id)
    pub(super) by_topic: HashMap<CompactString, SubscriptionList>,
    pub(super) topic_of: HashMap<SubscriptionId, CompactString>,
}

pub(super) struct BusInner {
    pub(super) registry: RwLock<Registry>,
    pub(super) next_id: AtomicU64,
    pub(super) bus_id: u64,
    pub(super) max_depth: u32,
    pub(super) stats: StatsCounters,
}

/// Synchronous in-process event bus.
///
/// Handlers are registered per topic and invoked on the publishing thread in
/// ascending priority order. The registry lock is held only to mutate the
/// subscription table or to copy a topic's subscription list, never while a
/// handler runs, so handlers may subscribe, unsubscribe and publish freely.
///
/// Cloning a `Bus` yields another handle to the same subscriptions.
#[derive(Clone)]
pub struct Bus {
    pub(super) inner: Arc<BusInner>,
}

impl fmt::Debug for Bus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bus")
            .field("bus_id", &self.inner.bus_id)
            .field("max_depth", &self.inner.max_depth)
            .field("subscriptions", &self.subscription_count())
            .finish()
    }
}

impl Bus {
    /// Creates a bus with the default maximum cascade depth.
    pub fn new() -> Self {
        Self::from_config(&BusConfig::default())
    }

    /// Creates a bus with a custom cascade limit. Zero or negative selects the default.
    pub fn with_max_depth(max_depth: i64) -> Self {
        Self::build(normalize_max_depth(max_depth))
    }

    pub fn from_config(config: &BusConfig) -> Self {
        Self::build(config.effective_max_depth())
    }

    fn build(max_depth: u32) -> Self {
        Self {
            inner: Arc::new(BusInner {
                registry: RwLock::new(Registry::default()),
                next_id: AtomicU64::new(1),
                bus_id: NEXT_BUS_ID.fetch_add(1, Ordering::Relaxed),
                max_depth,
                stats: StatsCounters::default(),
            }),
        }
    }

    /// Publish frames currently open on the calling thread for this bus.
    ///
    /// Zero outside of dispatch; one inside a handler of an outermost publish.
    pub fn depth(&self) -> u32 {
        depth::current_depth(self.inner.bus_id)
    }

    pub fn max_depth(&self) -> u32 {
        self.inner.max_depth
    }

    /// Total number of registered subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.inner.registry.read().topic_of.len()
    }

    /// Whether any subscription exists for `topic`.
    pub fn has_subscribers(&self, topic: &str) -> bool {
        self.inner
            .registry
            .read()
            .by_topic
            .get(topic)
            .is_some_and(|list| !list.is_empty())
    }

    /// Gets the current bus statistics
    pub fn stats(&self) -> BusStats {
        self.inner.stats.snapshot(self.subscription_count())
    }

    pub(super) fn next_subscription_id(&self) -> SubscriptionId {
        SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for Bus {
    fn default() -> Self {
        Self::new()
    }
}
