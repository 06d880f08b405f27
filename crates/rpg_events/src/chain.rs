//! # Staged Modifier Chains
//!
//! Accumulate-then-execute modifier collection for values that many
//! independent rule sources adjust, such as attack bonuses or damage totals.
//!
//! A domain declares its stages once, in execution order:
//!
//! ```text
//! base -> features -> conditions -> equipment -> final
//! ```
//!
//! Publishing an event through a [`ChainedTopic`] hands each chain subscriber
//! the immutable event plus a fresh [`StagedChain`]. Subscribers register named
//! modifier functions into stages; nothing is applied yet. The caller then runs
//! [`StagedChain::execute`], which folds the value through every stage in
//! declared order regardless of the order modifiers were added in.
//!
//! ## Example
//!
//! ```rust
//! use rpg_events::{Bus, ChainedTopicDef, Context, Stage, TopicRegistry};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = TopicRegistry::new();
//! let damage = ChainedTopicDef::<i32>::define_in(
//!     &registry,
//!     "combat.damage",
//!     [Stage::new("base"), Stage::new("features"), Stage::new("final")],
//! )?;
//! let bus = Bus::new();
//! let ctx = Context::new();
//!
//! damage.on(&bus).subscribe_with_chain(&ctx, |_ctx, _event, chain| {
//!     chain.add("features", "rage", |_ctx, value| Ok(value + 2))?;
//!     Ok(())
//! })?;
//!
//! let chain = damage.on(&bus).publish_with_chain(&ctx, &10, damage.new_chain())?;
//! assert_eq!(chain.execute(&ctx, 10)?, 12);
//! # Ok(())
//! # }
//! ```

use crate::context::Context;
use crate::deferred::DeferredAction;
use crate::error::{BusError, HandlerError};
use crate::events::{Event, EventContext};
use crate::refs::{Ref, TopicRegistry};
use crate::system::{Bus, Handler, SubscribeOptions, SubscriptionId};
use crate::topic::Payload;
use compact_str::CompactString;
use smallvec::SmallVec;
use std::any::Any;
use std::collections::HashMap;
use std::fmt::{self, Debug};
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{debug, trace};

// ============================================================================
// Stages
// ============================================================================

/// An ordering bucket within a chain.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Stage(CompactString);

impl Stage {
    pub fn new(name: &str) -> Self {
        Self(CompactString::new(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Stage {
    fn from(name: &str) -> Self {
        Stage::new(name)
    }
}

impl AsRef<str> for Stage {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// Staged Chain
// ============================================================================

/// A modifier function: takes the running value and returns the adjusted one.
pub type ModifierFn<T> = dyn Fn(&Context, T) -> Result<T, HandlerError> + Send + Sync;

struct StagedModifier<T> {
    id: CompactString,
    apply: Box<ModifierFn<T>>,
}

/// Per-occurrence container of staged modifiers.
///
/// Modifier ids are unique across the whole chain, not per stage.
pub struct StagedChain<T> {
    stages: Arc<[Stage]>,
    buckets: Vec<SmallVec<[StagedModifier<T>; 2]>>,
    /// modifier id -> index into `stages`
    index: HashMap<CompactString, usize>,
}

impl<T> StagedChain<T> {
    /// Creates an empty chain over `stages`, in execution order.
    pub fn new(stages: impl IntoIterator<Item = Stage>) -> Self {
        Self::with_stages(stages.into_iter().collect())
    }

    fn with_stages(stages: Arc<[Stage]>) -> Self {
        let buckets = stages.iter().map(|_| SmallVec::new()).collect();
        Self {
            stages,
            buckets,
            index: HashMap::new(),
        }
    }

    /// Stages this chain executes, in order.
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Number of modifiers across all stages.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Adds a modifier to `stage`.
    ///
    /// Fails without touching the chain if `id` is already present anywhere in
    /// the chain, or if `stage` is not one of the chain's stages.
    pub fn add<F>(&mut self, stage: impl AsRef<str>, id: &str, modifier: F) -> Result<(), BusError>
    where
        F: Fn(&Context, T) -> Result<T, HandlerError> + Send + Sync + 'static,
    {
        let stage = stage.as_ref();
        if let Some(&existing) = self.index.get(id) {
            return Err(BusError::DuplicateModifier {
                id: CompactString::new(id),
                existing_stage: self.stages[existing].0.clone(),
                requested_stage: CompactString::new(stage),
            });
        }
        let position = self
            .stages
            .iter()
            .position(|s| s.as_str() == stage)
            .ok_or_else(|| BusError::UnknownStage {
                stage: CompactString::new(stage),
                modifier: CompactString::new(id),
            })?;

        let id = CompactString::new(id);
        self.buckets[position].push(StagedModifier {
            id: id.clone(),
            apply: Box::new(modifier),
        });
        self.index.insert(id, position);
        Ok(())
    }

    /// Removes the modifier registered under `id`.
    pub fn remove(&mut self, id: &str) -> Result<(), BusError> {
        let position = self
            .index
            .remove(id)
            .ok_or_else(|| BusError::ModifierNotFound(CompactString::new(id)))?;
        self.buckets[position].retain(|modifier| modifier.id.as_str() != id);
        Ok(())
    }

    /// Folds `value` through every modifier, stage by stage in declared order
    /// and within a stage in the order added.
    ///
    /// The first failing modifier aborts the run; its error is returned
    /// wrapped with the stage and modifier id.
    pub fn execute(&self, ctx: &Context, value: T) -> Result<T, BusError> {
        let mut value = value;
        for (stage, bucket) in self.stages.iter().zip(&self.buckets) {
            for modifier in bucket {
                trace!("Applying modifier {} in stage {}", modifier.id, stage);
                value = (modifier.apply)(ctx, value).map_err(|source| BusError::ModifierFailed {
                    stage: stage.0.clone(),
                    modifier: modifier.id.clone(),
                    source,
                })?;
            }
        }
        Ok(value)
    }
}

impl<T> Debug for StagedChain<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (stage, bucket) in self.stages.iter().zip(&self.buckets) {
            let ids: Vec<&str> = bucket.iter().map(|m| m.id.as_str()).collect();
            map.entry(&stage.as_str(), &ids);
        }
        map.finish()
    }
}

// ============================================================================
// Chained Topics
// ============================================================================

/// A chained topic declaration: a key, payload type `T` and ordered stages.
pub struct ChainedTopicDef<T> {
    topic: Ref,
    stages: Arc<[Stage]>,
    _payload: PhantomData<fn() -> T>,
}

impl<T> Clone for ChainedTopicDef<T> {
    fn clone(&self) -> Self {
        Self {
            topic: self.topic.clone(),
            stages: Arc::clone(&self.stages),
            _payload: PhantomData,
        }
    }
}

impl<T> Debug for ChainedTopicDef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainedTopicDef")
            .field("topic", &self.topic)
            .field("stages", &self.stages)
            .finish()
    }
}

impl<T: Payload + Clone> ChainedTopicDef<T> {
    /// Declares `key` in the process-wide registry.
    pub fn define(key: &str, stages: impl IntoIterator<Item = Stage>) -> Result<Self, BusError> {
        Self::define_in(TopicRegistry::global(), key, stages)
    }

    /// Declares `key` in `registry`. Redeclaring the key must repeat the same
    /// stages, or it fails with [`BusError::ConflictingStages`].
    pub fn define_in(
        registry: &TopicRegistry,
        key: &str,
        stages: impl IntoIterator<Item = Stage>,
    ) -> Result<Self, BusError> {
        let topic = registry.register::<T>(key)?;
        let stages = registry.register_stages(key, stages.into_iter().collect())?;
        Ok(Self {
            topic,
            stages,
            _payload: PhantomData,
        })
    }

    pub fn topic(&self) -> &Ref {
        &self.topic
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// A fresh, empty chain over the declared stages.
    pub fn new_chain(&self) -> StagedChain<T> {
        StagedChain::with_stages(Arc::clone(&self.stages))
    }

    pub fn on(&self, bus: &Bus) -> ChainedTopic<T> {
        ChainedTopic {
            def: self.clone(),
            bus: bus.clone(),
        }
    }
}

/// Bus event carrying a payload and the chain subscribers add to.
struct ChainEnvelope<T> {
    topic: Ref,
    context: EventContext,
    payload: T,
    chain: StagedChain<T>,
}

impl<T: Debug> Debug for ChainEnvelope<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainEnvelope")
            .field("topic", &self.topic)
            .field("payload", &self.payload)
            .field("chain", &self.chain)
            .finish()
    }
}

impl<T: Payload> Event for ChainEnvelope<T> {
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

/// A chained topic connected to a bus.
pub struct ChainedTopic<T> {
    def: ChainedTopicDef<T>,
    bus: Bus,
}

impl<T> Clone for ChainedTopic<T> {
    fn clone(&self) -> Self {
        Self {
            def: self.def.clone(),
            bus: self.bus.clone(),
        }
    }
}

impl<T> Debug for ChainedTopic<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainedTopic").field("def", &self.def).finish()
    }
}

impl<T: Payload + Clone> ChainedTopic<T> {
    pub fn new_chain(&self) -> StagedChain<T> {
        self.def.new_chain()
    }

    /// Subscribes a chain contributor at default priority.
    pub fn subscribe_with_chain<F>(&self, ctx: &Context, handler: F) -> Result<SubscriptionId, BusError>
    where
        F: Fn(&Context, &T, &mut StagedChain<T>) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.subscribe_with_chain_options(ctx, SubscribeOptions::new(), handler)
    }

    /// Subscribes a chain contributor with explicit priority and filter.
    pub fn subscribe_with_chain_options<F>(
        &self,
        ctx: &Context,
        options: SubscribeOptions,
        handler: F,
    ) -> Result<SubscriptionId, BusError>
    where
        F: Fn(&Context, &T, &mut StagedChain<T>) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        let adapter = Handler::with_context(move |ctx, event| {
            if let Some(envelope) = event.downcast_mut::<ChainEnvelope<T>>() {
                handler(ctx, &envelope.payload, &mut envelope.chain)?;
            }
            Ok(DeferredAction::none())
        });
        self.bus.subscribe(ctx, self.def.topic.clone(), adapter, options)
    }

    /// Runs every chain subscriber against `event` and returns the chain they
    /// filled. The event itself is never modified.
    pub fn publish_with_chain(
        &self,
        ctx: &Context,
        event: &T,
        chain: StagedChain<T>,
    ) -> Result<StagedChain<T>, BusError> {
        let mut envelope = ChainEnvelope {
            topic: self.def.topic.clone(),
            context: EventContext::new(),
            payload: event.clone(),
            chain,
        };
        self.bus.publish(ctx, &mut envelope)?;
        debug!(
            "Collected {} modifiers for {}",
            envelope.chain.len(),
            self.def.topic
        );
        Ok(envelope.chain)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> Result<(), BusError> {
        self.bus.unsubscribe(id)
    }
}
