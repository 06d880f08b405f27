/// Handler registration methods
use super::core::{Bus, SubscriptionEntry, SubscriptionId};
use crate::context::Context;
use crate::deferred::DeferredAction;
use crate::error::{BusError, HandlerError};
use crate::events::Event;
use crate::refs::Ref;
use std::any::{type_name, Any};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// What every bus handler returns: follow-up work, or a failure that aborts the publish.
pub type HandlerResult = Result<DeferredAction, HandlerError>;

/// Handler that only needs the event.
pub type EventHandlerFn = dyn Fn(&mut dyn Event) -> HandlerResult + Send + Sync;

/// Handler that also receives the publisher's [`Context`].
pub type ContextHandlerFn = dyn Fn(&Context, &mut dyn Event) -> HandlerResult + Send + Sync;

/// Predicate deciding whether a subscription sees an event.
pub type EventFilter = Arc<dyn Fn(&dyn Event) -> bool + Send + Sync>;

/// A type-erased bus handler in one of the two accepted shapes.
#[derive(Clone)]
pub enum Handler {
    Event(Arc<EventHandlerFn>),
    WithContext(Arc<ContextHandlerFn>),
}

impl Handler {
    pub fn event<F>(handler: F) -> Self
    where
        F: Fn(&mut dyn Event) -> HandlerResult + Send + Sync + 'static,
    {
        Handler::Event(Arc::new(handler))
    }

    pub fn with_context<F>(handler: F) -> Self
    where
        F: Fn(&Context, &mut dyn Event) -> HandlerResult + Send + Sync + 'static,
    {
        Handler::WithContext(Arc::new(handler))
    }

    /// Resolves an arbitrary value into a handler, if it is one of the
    /// erased handler forms.
    ///
    /// Closures have unnameable types, so only the erased forms are
    /// recognised: `Handler`, `Arc`/`Box` of either handler trait object, and
    /// plain `fn` pointers of either shape.
    fn from_any<H: Any + Send + Sync>(handler: H) -> Option<Self> {
        let boxed: Box<dyn Any> = Box::new(handler);
        let boxed = match boxed.downcast::<Handler>() {
            Ok(handler) => return Some(*handler),
            Err(other) => other,
        };
        let boxed = match boxed.downcast::<Arc<EventHandlerFn>>() {
            Ok(handler) => return Some(Handler::Event(*handler)),
            Err(other) => other,
        };
        let boxed = match boxed.downcast::<Arc<ContextHandlerFn>>() {
            Ok(handler) => return Some(Handler::WithContext(*handler)),
            Err(other) => other,
        };
        let boxed = match boxed.downcast::<Box<EventHandlerFn>>() {
            Ok(handler) => return Some(Handler::Event(Arc::from(*handler))),
            Err(other) => other,
        };
        let boxed = match boxed.downcast::<Box<ContextHandlerFn>>() {
            Ok(handler) => return Some(Handler::WithContext(Arc::from(*handler))),
            Err(other) => other,
        };
        let boxed = match boxed.downcast::<fn(&mut dyn Event) -> HandlerResult>() {
            Ok(handler) => return Some(Handler::event(*handler)),
            Err(other) => other,
        };
        match boxed.downcast::<fn(&Context, &mut dyn Event) -> HandlerResult>() {
            Ok(handler) => Some(Handler::with_context(*handler)),
            Err(_) => None,
        }
    }

    pub(super) fn call(&self, ctx: &Context, event: &mut dyn Event) -> HandlerResult {
        match self {
            Handler::Event(handler) => handler(event),
            Handler::WithContext(handler) => handler(ctx, event),
        }
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Handler::Event(_) => f.write_str("Handler::Event"),
            Handler::WithContext(_) => f.write_str("Handler::WithContext"),
        }
    }
}

/// Per-subscription options.
#[derive(Clone, Default)]
pub struct SubscribeOptions {
    /// Lower runs first; equal priorities run in subscription order.
    pub priority: i32,
    pub filter: Option<EventFilter>,
}

impl SubscribeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Only deliver events the predicate accepts.
    pub fn filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&dyn Event) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Arc::new(filter));
        self
    }
}

impl fmt::Debug for SubscribeOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscribeOptions")
            .field("priority", &self.priority)
            .field("filter", &self.filter.is_some())
            .finish()
    }
}

impl Bus {
    /// Registers `handler` for events routed under `topic`.
    ///
    /// Fails with [`BusError::RegistrationCancelled`] if `ctx` is already cancelled.
    pub fn subscribe(
        &self,
        ctx: &Context,
        topic: impl Into<Ref>,
        handler: Handler,
        options: SubscribeOptions,
    ) -> Result<SubscriptionId, BusError> {
        let topic = topic.into();
        if ctx.is_cancelled() {
            return Err(BusError::RegistrationCancelled {
                topic: topic.compact_key().clone(),
            });
        }

        let key = topic.compact_key().clone();
        let priority = options.priority;

        let id = {
            let mut registry = self.inner.registry.write();
            // allocated under the write lock so id order matches insertion order
            let id = self.next_subscription_id();
            let entry = Arc::new(SubscriptionEntry {
                id,
                topic,
                priority,
                handler,
                filter: options.filter,
                active: AtomicBool::new(true),
            });
            let list = registry.by_topic.entry(key.clone()).or_default();
            // upper bound keeps equal priorities in id order
            let position = list.partition_point(|existing| existing.priority <= priority);
            list.insert(position, entry);
            registry.topic_of.insert(id, key.clone());
            id
        };

        debug!("Subscribed {} to {} with priority {}", id, key, priority);
        Ok(id)
    }

    /// Registers a handler whose concrete type is only known at runtime.
    ///
    /// The value is inspected once, here, and must be one of the erased
    /// handler forms accepted by [`Handler`]; anything else fails with
    /// [`BusError::InvalidHandler`] before any publish happens.
    pub fn subscribe_dyn<H>(
        &self,
        ctx: &Context,
        topic: impl Into<Ref>,
        handler: H,
        options: SubscribeOptions,
    ) -> Result<SubscriptionId, BusError>
    where
        H: Any + Send + Sync,
    {
        let topic = topic.into();
        match Handler::from_any(handler) {
            Some(handler) => self.subscribe(ctx, topic, handler, options),
            None => Err(BusError::InvalidHandler {
                topic: topic.compact_key().clone(),
                found: type_name::<H>(),
            }),
        }
    }

    /// Removes a subscription. It is skipped immediately, even by a publish
    /// already in progress.
    pub fn unsubscribe(&self, id: SubscriptionId) -> Result<(), BusError> {
        let mut registry = self.inner.registry.write();
        let topic = registry
            .topic_of
            .remove(&id)
            .ok_or(BusError::SubscriptionNotFound(id))?;

        if let Some(list) = registry.by_topic.get_mut(&topic) {
            if let Some(position) = list.iter().position(|entry| entry.id == id) {
                let entry = list.remove(position);
                entry.active.store(false, Ordering::Release);
            }
            if list.is_empty() {
                registry.by_topic.remove(&topic);
            }
        }
        drop(registry);

        debug!("Unsubscribed {} from {}", id, topic);
        Ok(())
    }

    /// Removes every subscription.
    pub fn clear(&self) {
        let mut registry = self.inner.registry.write();
        let removed = registry.topic_of.len();
        for entry in registry.by_topic.values().flatten() {
            entry.active.store(false, Ordering::Release);
        }
        registry.by_topic.clear();
        registry.topic_of.clear();
        drop(registry);

        debug!("Cleared {} subscriptions", removed);
    }
}
