//! Side effects a handler requests for after dispatch.
//!
//! Handlers never touch the bus registry while the bus is walking a
//! subscription snapshot. Instead they return a [`DeferredAction`] and the
//! dispatcher applies the queued commands once every handler for the current
//! publish has returned.

use crate::error::HandlerError;
use crate::events::Event;
use crate::system::SubscriptionId;
use smallvec::SmallVec;

/// Follow-up work returned from a handler.
///
/// The empty action is the common case and allocates nothing.
#[derive(Debug, Default)]
pub struct DeferredAction {
    pub(crate) unsubscribes: SmallVec<[SubscriptionId; 2]>,
    pub(crate) error: Option<HandlerError>,
    pub(crate) publishes: Vec<Box<dyn Event>>,
}

impl DeferredAction {
    /// No side effects.
    pub fn none() -> Self {
        Self::default()
    }

    /// Queues removal of a subscription; often the handler's own id.
    pub fn unsubscribe(mut self, id: SubscriptionId) -> Self {
        self.unsubscribes.push(id);
        self
    }

    /// Queues an event to publish after dispatch.
    pub fn publish(mut self, event: Box<dyn Event>) -> Self {
        self.publishes.push(event);
        self
    }

    /// Fails the publish after queued unsubscribes are applied.
    ///
    /// Only the first requested error is kept.
    pub fn fail(mut self, error: impl Into<HandlerError>) -> Self {
        if self.error.is_none() {
            self.error = Some(error.into());
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.unsubscribes.is_empty() && self.error.is_none() && self.publishes.is_empty()
    }

    pub(crate) fn absorb(&mut self, other: DeferredAction) {
        self.unsubscribes.extend(other.unsubscribes);
        if self.error.is_none() {
            self.error = other.error;
        }
        self.publishes.extend(other.publishes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::refs::Ref;

    #[derive(Debug)]
    struct Ping {
        topic: Ref,
    }
    crate::impl_event!(Ping);

    #[test]
    fn test_none_is_empty() {
        assert!(DeferredAction::none().is_empty());
        assert!(!DeferredAction::none()
            .unsubscribe(SubscriptionId::from_raw(1))
            .is_empty());
    }

    #[test]
    fn test_absorb_keeps_first_error() {
        let mut merged = DeferredAction::none()
            .unsubscribe(SubscriptionId::from_raw(1))
            .fail(anyhow::anyhow!("first"));
        merged.absorb(
            DeferredAction::none()
                .unsubscribe(SubscriptionId::from_raw(2))
                .fail(anyhow::anyhow!("second"))
                .publish(Box::new(Ping {
                    topic: Ref::new("test.ping"),
                })),
        );

        assert_eq!(merged.unsubscribes.len(), 2);
        assert_eq!(merged.publishes.len(), 1);
        assert_eq!(merged.error.map(|e| e.to_string()).as_deref(), Some("first"));
    }
}
