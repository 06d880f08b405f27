//! Compile-time typed publish/subscribe over the untyped [`Bus`].
//!
//! A domain declares each topic once as a [`TopicDef<T>`], then connects it to
//! a bus with [`TopicDef::on`] to get a [`TypedTopic<T>`] handle. Handlers
//! receive `&T` directly; the envelope plumbing stays inside this module.

use crate::context::Context;
use crate::deferred::DeferredAction;
use crate::error::{BusError, HandlerError};
use crate::events::{Event, EventContext};
use crate::refs::{Ref, TopicRegistry};
use crate::system::{Bus, Handler, HandlerResult, SubscribeOptions, SubscriptionId};
use std::any::Any;
use std::fmt::{self, Debug};
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::trace;

/// Bounds every topic payload must meet.
pub trait Payload: Debug + Send + Sync + 'static {}

impl<T: Debug + Send + Sync + 'static> Payload for T {}

/// A topic declaration binding a key to payload type `T`.
pub struct TopicDef<T> {
    topic: Ref,
    _payload: PhantomData<fn() -> T>,
}

impl<T> Clone for TopicDef<T> {
    fn clone(&self) -> Self {
        Self {
            topic: self.topic.clone(),
            _payload: PhantomData,
        }
    }
}

impl<T> Debug for TopicDef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TopicDef<{}>({:?})", std::any::type_name::<T>(), self.topic)
    }
}

impl<T: Payload> TopicDef<T> {
    /// Declares `key` in the process-wide registry.
    pub fn define(key: &str) -> Result<Self, BusError> {
        Self::define_in(TopicRegistry::global(), key)
    }

    /// Declares `key` in `registry`.
    pub fn define_in(registry: &TopicRegistry, key: &str) -> Result<Self, BusError> {
        Ok(Self {
            topic: registry.register::<T>(key)?,
            _payload: PhantomData,
        })
    }

    pub fn topic(&self) -> &Ref {
        &self.topic
    }

    /// Connects this declaration to `bus`.
    pub fn on(&self, bus: &Bus) -> TypedTopic<T> {
        TypedTopic {
            topic: self.topic.clone(),
            bus: bus.clone(),
            _payload: PhantomData,
        }
    }

    /// Wraps `payload` as a bus event, e.g. for [`DeferredAction::publish`].
    pub fn event(&self, payload: T) -> Box<dyn Event> {
        Box::new(self.envelope(payload))
    }

    /// Wraps `payload` without boxing, for callers that want the event context back.
    pub fn envelope(&self, payload: T) -> TopicEnvelope<T> {
        TopicEnvelope {
            topic: self.topic.clone(),
            context: EventContext::new(),
            payload,
        }
    }
}

/// Bus event carrying a typed topic payload.
#[derive(Debug)]
pub struct TopicEnvelope<T> {
    topic: Ref,
    context: EventContext,
    pub payload: T,
}

impl<T: Payload> Event for TopicEnvelope<T> {
    fn event_ref(&self) -> &Ref {
        &self.topic
    }

    fn context(&self) -> Option<&EventContext> {
        Some(&self.context)
    }

    fn context_mut(&mut self) -> Option<&mut EventContext> {
        Some(&mut self.context)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// A typed topic connected to a bus.
///
/// Handles for the same declaration and bus are interchangeable.
pub struct TypedTopic<T> {
    topic: Ref,
    bus: Bus,
    _payload: PhantomData<fn() -> T>,
}

impl<T> Clone for TypedTopic<T> {
    fn clone(&self) -> Self {
        Self {
            topic: self.topic.clone(),
            bus: self.bus.clone(),
            _payload: PhantomData,
        }
    }
}

impl<T> Debug for TypedTopic<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypedTopic")
            .field("topic", &self.topic)
            .field("payload", &std::any::type_name::<T>())
            .finish()
    }
}

impl<T: Payload> TypedTopic<T> {
    pub fn topic(&self) -> &Ref {
        &self.topic
    }

    /// Subscribes a handler at default priority.
    pub fn subscribe<F>(&self, ctx: &Context, handler: F) -> Result<SubscriptionId, BusError>
    where
        F: Fn(&Context, &T) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.subscribe_with(ctx, SubscribeOptions::new(), handler)
    }

    /// Subscribes a handler with explicit priority and filter.
    pub fn subscribe_with<F>(
        &self,
        ctx: &Context,
        options: SubscribeOptions,
        handler: F,
    ) -> Result<SubscriptionId, BusError>
    where
        F: Fn(&Context, &T) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.subscribe_deferred(ctx, options, move |ctx, payload| {
            handler(ctx, payload).map(|()| DeferredAction::none())
        })
    }

    /// Subscribes a handler that may return follow-up work.
    pub fn subscribe_deferred<F>(
        &self,
        ctx: &Context,
        options: SubscribeOptions,
        handler: F,
    ) -> Result<SubscriptionId, BusError>
    where
        F: Fn(&Context, &T) -> HandlerResult + Send + Sync + 'static,
    {
        let handler = Arc::new(handler);
        let adapter = Handler::with_context(move |ctx, event| {
            match event.downcast_ref::<TopicEnvelope<T>>() {
                Some(envelope) => handler(ctx, &envelope.payload),
                None => {
                    trace!(
                        "Ignoring {} event that does not carry {}",
                        event.event_ref(),
                        std::any::type_name::<T>()
                    );
                    Ok(DeferredAction::none())
                }
            }
        });
        self.bus.subscribe(ctx, self.topic.clone(), adapter, options)
    }

    /// Publishes `payload` to every subscriber of this topic.
    pub fn publish(&self, ctx: &Context, payload: T) -> Result<(), BusError> {
        let mut envelope = TopicEnvelope {
            topic: self.topic.clone(),
            context: EventContext::new(),
            payload,
        };
        self.bus.publish(ctx, &mut envelope)
    }

    /// Publishes a prepared envelope, leaving its context for the caller to inspect.
    pub fn publish_envelope(
        &self,
        ctx: &Context,
        envelope: &mut TopicEnvelope<T>,
    ) -> Result<(), BusError> {
        self.bus.publish(ctx, envelope)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> Result<(), BusError> {
        self.bus.unsubscribe(id)
    }
}

impl<T> TopicEnvelope<T> {
    /// Modifiers and flags recorded by handlers during publish.
    pub fn event_context(&self) -> &EventContext {
        &self.context
    }

    pub fn event_context_mut(&mut self) -> &mut EventContext {
        &mut self.context
    }
}
