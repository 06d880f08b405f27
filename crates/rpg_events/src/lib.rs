//! # RPG Events
//!
//! A synchronous, in-process event bus and staged modifier chain system for
//! rule engines. Independently authored rule components (conditions, class
//! features, equipment effects) observe and contribute to shared occurrences
//! such as attacks, damage rolls and saves without referencing each other.
//!
//! ## Key Features
//!
//! - **Typed topics**: declare a topic once per payload type and get
//!   compile-time checked subscribe/publish handles
//! - **Deterministic ordering**: handlers run by ascending priority, ties in
//!   subscription order
//! - **Deferred actions**: handlers request unsubscribes, follow-up publishes
//!   or failures that the bus applies after dispatch
//! - **Bounded cascades**: nested publishing is capped per call stack
//! - **Modifier lifetimes**: modifiers carry optional conditions, durations
//!   and source details
//! - **Staged chains**: contributors register named modifiers into declared
//!   stages, which execute in stage order regardless of registration order
//!
//! ## Architecture
//!
//! - **Bus**: subscription registry and dispatch loop
//! - **TopicDef / TypedTopic**: typed pub/sub over the bus
//! - **ChainedTopicDef / StagedChain**: accumulate-then-execute modifiers
//! - **TopicRegistry**: one payload type per topic string
//!
//! ## Usage Examples
//!
//! ### Typed Topics
//!
//! ```rust
//! use rpg_events::{Bus, Context, TopicDef, TopicRegistry};
//!
//! #[derive(Debug, Clone)]
//! struct AttackEvent {
//!     attacker: String,
//!     roll: i32,
//! }
//!
//! # fn main() -> rpg_events::Result<()> {
//! let registry = TopicRegistry::new();
//! let attacks = TopicDef::<AttackEvent>::define_in(&registry, "combat.attack")?;
//! let bus = Bus::new();
//! let ctx = Context::new();
//!
//! attacks.on(&bus).subscribe(&ctx, |_ctx, event| {
//!     println!("{} rolled {}", event.attacker, event.roll);
//!     Ok(())
//! })?;
//!
//! attacks.on(&bus).publish(&ctx, AttackEvent { attacker: "fighter".into(), roll: 17 })?;
//! # Ok(())
//! # }
//! ```
//!
//! ### Untyped Handlers and Deferred Actions
//!
//! ```rust
//! use rpg_events::{impl_event, Bus, Context, DeferredAction, Handler, Ref, SubscribeOptions};
//!
//! #[derive(Debug)]
//! struct TurnEnded {
//!     topic: Ref,
//! }
//! impl_event!(TurnEnded);
//!
//! # fn main() -> rpg_events::Result<()> {
//! let bus = Bus::new();
//! let ctx = Context::new();
//!
//! bus.subscribe(
//!     &ctx,
//!     "turn.ended",
//!     Handler::event(|_event| Ok(DeferredAction::none())),
//!     SubscribeOptions::new().priority(10),
//! )?;
//!
//! bus.publish(&ctx, &mut TurnEnded { topic: Ref::new("turn.ended") })?;
//! # Ok(())
//! # }
//! ```

pub mod chain;
pub mod config;
pub mod context;
pub mod deferred;
pub mod duration;
pub mod error;
pub mod events;
pub mod macros;
pub mod refs;
pub mod system;
pub mod topic;

#[cfg(test)]
mod scenarios;

// Re-exports for convenience
pub use chain::{ChainedTopic, ChainedTopicDef, ModifierFn, StagedChain, Stage};
pub use config::{BusConfig, DEFAULT_MAX_DEPTH};
pub use context::Context;
pub use deferred::DeferredAction;
pub use duration::{Duration, DurationType};
pub use error::{BusError, ErrorKind, HandlerError};
pub use events::{
    keys, Event, EventContext, Modifier, ModifierCondition, ModifierKind, ModifierSource,
    ModifierValue, TypedKey,
};
pub use refs::{Ref, TopicRegistry};
pub use system::{
    Bus, BusStats, ContextHandlerFn, EventFilter, EventHandlerFn, Handler, HandlerResult,
    SubscribeOptions, SubscriptionId,
};
pub use topic::{Payload, TopicDef, TopicEnvelope, TypedTopic};

/// Crate version
pub const RPG_EVENTS_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Result type used throughout the crate
pub type Result<T> = std::result::Result<T, BusError>;
