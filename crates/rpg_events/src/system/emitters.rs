/// Event publishing methods
use super::core::{Bus, SubscriptionId, SubscriptionList};
use super::depth::DepthGuard;
use crate::context::Context;
use crate::deferred::DeferredAction;
use crate::error::BusError;
use crate::events::Event;
use compact_str::CompactString;
use tracing::{debug, trace};

impl Bus {
    /// Delivers `event` to every matching subscription, then applies the
    /// handlers' deferred actions.
    ///
    /// Blocks until all handlers and any follow-on publishes have finished.
    /// The first handler error stops dispatch and is returned wrapped with the
    /// failing subscription's id; deferred actions gathered before it are
    /// dropped. A publish nested deeper than [`max_depth`](Self::max_depth)
    /// fails with [`BusError::CascadeDepthExceeded`].
    pub fn publish(&self, ctx: &Context, event: &mut dyn Event) -> Result<(), BusError> {
        let topic = event.event_ref().compact_key().clone();
        let _guard = DepthGuard::enter(self.inner.bus_id, self.inner.max_depth, &topic)
            .inspect_err(|_| self.inner.stats.record_rejected_cascade())?;
        self.inner.stats.record_publish();

        let snapshot = self.snapshot(&topic);
        if snapshot.is_empty() {
            trace!("No subscribers for {}", topic);
            return Ok(());
        }

        let mut deferred = DeferredAction::none();
        let mut failed_by: Option<SubscriptionId> = None;

        for entry in snapshot.iter() {
            if !entry.is_active() {
                continue;
            }
            entry.topic.verify(event.event_ref())?;
            if let Some(filter) = &entry.filter {
                if !filter(&*event) {
                    continue;
                }
            }

            trace!("Dispatching {} to {}", topic, entry.id);
            self.inner.stats.record_invocation();
            match entry.handler.call(ctx, &mut *event) {
                Ok(action) => {
                    if action.error.is_some() && failed_by.is_none() {
                        self.inner.stats.record_failure();
                        failed_by = Some(entry.id);
                    }
                    deferred.absorb(action);
                }
                Err(source) => {
                    self.inner.stats.record_failure();
                    return Err(BusError::HandlerFailed {
                        subscription: entry.id,
                        topic,
                        source,
                    });
                }
            }

            if event.is_cancelled() {
                debug!("Event {} cancelled by {}", topic, entry.id);
                break;
            }
        }

        if deferred.is_empty() {
            return Ok(());
        }
        self.apply_deferred(ctx, &topic, deferred, failed_by)
    }

    fn snapshot(&self, topic: &CompactString) -> SubscriptionList {
        self.inner
            .registry
            .read()
            .by_topic
            .get(topic)
            .cloned()
            .unwrap_or_default()
    }

    /// Applies merged deferred actions: unsubscribes, then a requested error,
    /// then queued publishes, which nest one level below this publish.
    fn apply_deferred(
        &self,
        ctx: &Context,
        topic: &CompactString,
        deferred: DeferredAction,
        failed_by: Option<SubscriptionId>,
    ) -> Result<(), BusError> {
        let DeferredAction {
            unsubscribes,
            error,
            publishes,
        } = deferred;

        for id in unsubscribes {
            match self.unsubscribe(id) {
                Ok(()) => {}
                Err(BusError::SubscriptionNotFound(_)) => {
                    debug!("Deferred unsubscribe of {} ignored: already removed", id);
                }
                Err(e) => return Err(e),
            }
        }

        if let Some(source) = error {
            return Err(BusError::HandlerFailed {
                subscription: failed_by.unwrap_or(SubscriptionId::from_raw(0)),
                topic: topic.clone(),
                source,
            });
        }

        for mut follow_on in publishes {
            self.publish(ctx, follow_on.as_mut())?;
        }

        Ok(())
    }
}
