//! # Event Traits and Event Context
//!
//! This module defines the [`Event`] trait that every payload routed through a
//! [`Bus`](crate::Bus) implements, and the per-event [`EventContext`] that
//! handlers use to contribute modifiers, share typed data, and cancel
//! further dispatch.
//!
//! ## Design Principles
//!
//! - **Cheap routing**: an event names its topic with a [`Ref`]; the bus
//!   matches on the key alone
//! - **Opt-in context**: events without modifiers or cancellation simply
//!   return `None` from [`Event::context`]
//! - **Typed data**: [`TypedKey`] keeps context values type-safe without
//!   callers downcasting by hand

use crate::duration::Duration;
use crate::refs::Ref;
use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::HashMap;
use std::fmt::{self, Debug};
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration as Elapsed;

// ============================================================================
// Event Trait
// ============================================================================

/// Core trait that all events must implement.
///
/// Events are published by mutable reference so handlers can record modifiers
/// or cancel through the event's [`EventContext`]. The payload itself is
/// opaque to the bus.
///
/// Most implementations are one line with [`impl_event!`](crate::impl_event).
pub trait Event: Any + Send + Sync + Debug {
    /// The topic this event is routed under.
    fn event_ref(&self) -> &Ref;

    /// The event's mutable context, if it carries one.
    fn context(&self) -> Option<&EventContext> {
        None
    }

    /// Mutable access to the event's context, if it carries one.
    fn context_mut(&mut self) -> Option<&mut EventContext> {
        None
    }

    /// Returns this event as `&dyn Any` for downcasting.
    fn as_any(&self) -> &dyn Any;

    /// Returns this event as `&mut dyn Any` for downcasting.
    fn as_any_mut(&mut self) -> &mut dyn Any;

    /// Whether a handler has cancelled this event.
    fn is_cancelled(&self) -> bool {
        self.context().is_some_and(EventContext::is_cancelled)
    }
}

impl<'a> dyn Event + 'a {
    /// Downcasts to a concrete event type.
    pub fn downcast_ref<E: Event>(&self) -> Option<&E> {
        self.as_any().downcast_ref::<E>()
    }

    /// Downcasts to a concrete event type, mutably.
    pub fn downcast_mut<E: Event>(&mut self) -> Option<&mut E> {
        self.as_any_mut().downcast_mut::<E>()
    }
}

// ============================================================================
// Typed Context Keys
// ============================================================================

/// A named, typed slot in an [`EventContext`].
///
/// Two keys with the same name but different types do not see each other's
/// values.
pub struct TypedKey<T> {
    name: CompactString,
    _phantom: PhantomData<fn() -> T>,
}

impl<T> TypedKey<T> {
    pub fn new(name: &str) -> Self {
        Self {
            name: CompactString::new(name),
            _phantom: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<T> Clone for TypedKey<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            _phantom: PhantomData,
        }
    }
}

impl<T> Debug for TypedKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypedKey<{}>({})", std::any::type_name::<T>(), self.name)
    }
}

/// Well-known context key names shared across rule modules.
pub mod keys {
    pub const ATTACKER: &str = "attacker";
    pub const TARGET: &str = "target";
    pub const WEAPON: &str = "weapon";
    pub const SPELL: &str = "spell";
    pub const DAMAGE: &str = "damage";
    pub const DAMAGE_TYPE: &str = "damage_type";
    pub const ROLL: &str = "roll";
    pub const ROLL_TOTAL: &str = "roll_total";
    pub const ADVANTAGE: &str = "advantage";
    pub const DISADVANTAGE: &str = "disadvantage";
    pub const CRITICAL: &str = "critical";
    pub const ABILITY: &str = "ability";
    pub const DC: &str = "dc";
    pub const SOURCE: &str = "source";
    pub const ROUND: &str = "round";
    pub const REASON: &str = "reason";
}

// ============================================================================
// Modifiers
// ============================================================================

/// How a modifier combines with the value it targets.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModifierKind {
    Additive,
    Multiplicative,
    Flag,
    Override,
    Custom(CompactString),
}

/// The payload of a modifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ModifierValue {
    /// A flat bonus or penalty with the name of what granted it.
    Raw { value: i32, source: CompactString },
    Int(i32),
    Multiplier(f64),
    Flag(bool),
}

impl ModifierValue {
    /// Integer view of the value, where one exists.
    pub fn as_int(&self) -> Option<i32> {
        match self {
            ModifierValue::Raw { value, .. } | ModifierValue::Int(value) => Some(*value),
            ModifierValue::Flag(flag) => Some(i32::from(*flag)),
            ModifierValue::Multiplier(_) => None,
        }
    }

    /// Human-readable form, e.g. `+3 (strength)`.
    pub fn description(&self) -> String {
        match self {
            ModifierValue::Raw { value, source } => format!("{:+} ({})", value, source),
            ModifierValue::Int(value) => format!("{:+}", value),
            ModifierValue::Multiplier(factor) => format!("x{}", factor),
            ModifierValue::Flag(flag) => flag.to_string(),
        }
    }
}

/// Where a modifier came from, for display and rules lookups.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModifierSource {
    /// Category such as `spell`, `feature` or `item`.
    pub kind: CompactString,
    pub name: CompactString,
    pub description: CompactString,
    /// Id of the entity that granted the modifier, if any.
    pub entity: Option<CompactString>,
}

impl ModifierSource {
    pub fn new(kind: &str, name: &str) -> Self {
        Self {
            kind: CompactString::new(kind),
            name: CompactString::new(name),
            ..Self::default()
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = CompactString::new(description);
        self
    }

    pub fn with_entity(mut self, entity: &str) -> Self {
        self.entity = Some(CompactString::new(entity));
        self
    }
}

/// Predicate deciding whether a modifier applies to a given event.
///
/// Compares by identity: two conditions are equal only when they share the
/// same closure.
#[derive(Clone)]
pub struct ModifierCondition(Arc<dyn Fn(&dyn Event) -> bool + Send + Sync>);

impl ModifierCondition {
    pub fn new<F>(predicate: F) -> Self
    where
        F: Fn(&dyn Event) -> bool + Send + Sync + 'static,
    {
        Self(Arc::new(predicate))
    }

    pub fn check(&self, event: &dyn Event) -> bool {
        (self.0)(event)
    }
}

impl PartialEq for ModifierCondition {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Debug for ModifierCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ModifierCondition(..)")
    }
}

/// A typed contribution recorded on an [`EventContext`].
///
/// The optional settings are attached with the `with_*` builders:
///
/// ```rust
/// use rpg_events::{keys, Duration, Modifier, ModifierSource};
///
/// let bless = Modifier::additive("bless", "attack_roll", 100, 4)
///     .with_duration(Duration::rounds(10, 1))
///     .with_source_details(ModifierSource::new("spell", "Bless"))
///     .with_condition(|event| {
///         event
///             .context()
///             .and_then(|ctx| ctx.get_bool(keys::ADVANTAGE))
///             .unwrap_or(false)
///     });
/// assert!(!bless.is_expired(10, std::time::Duration::ZERO));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Modifier {
    pub source: CompactString,
    pub kind: ModifierKind,
    pub target: CompactString,
    /// Application order, ascending.
    pub priority: i32,
    pub value: ModifierValue,
    #[serde(skip)]
    pub condition: Option<ModifierCondition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<Duration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_details: Option<ModifierSource>,
}

impl Modifier {
    pub fn new(
        source: &str,
        kind: ModifierKind,
        target: &str,
        priority: i32,
        value: ModifierValue,
    ) -> Self {
        Self {
            source: CompactString::new(source),
            kind,
            target: CompactString::new(target),
            priority,
            value,
            condition: None,
            duration: None,
            source_details: None,
        }
    }

    /// An additive integer modifier; the value's source is the modifier's source.
    pub fn additive(source: &str, target: &str, priority: i32, value: i32) -> Self {
        Self::new(
            source,
            ModifierKind::Additive,
            target,
            priority,
            ModifierValue::Raw {
                value,
                source: CompactString::new(source),
            },
        )
    }

    pub fn with_condition<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&dyn Event) -> bool + Send + Sync + 'static,
    {
        self.condition = Some(ModifierCondition::new(predicate));
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn with_source_details(mut self, details: ModifierSource) -> Self {
        self.source_details = Some(details);
        self
    }

    /// Whether the modifier applies to `event`. Unconditional modifiers always do.
    pub fn applies_to(&self, event: &dyn Event) -> bool {
        self.condition
            .as_ref()
            .map_or(true, |condition| condition.check(event))
    }

    /// Whether the modifier's duration has run out. Modifiers without one never expire.
    pub fn is_expired(&self, current_round: u32, elapsed: Elapsed) -> bool {
        self.duration
            .as_ref()
            .is_some_and(|duration| duration.is_expired(current_round, elapsed))
    }
}

// ============================================================================
// Event Context
// ============================================================================

/// Mutable per-event data: typed values, modifiers and a cancellation flag.
#[derive(Default)]
pub struct EventContext {
    data: HashMap<CompactString, Box<dyn Any + Send + Sync>>,
    modifiers: Vec<Modifier>,
    cancelled: bool,
}

impl EventContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `value` under `key`, replacing any previous value of that name.
    pub fn set<T: Send + Sync + 'static>(&mut self, key: &TypedKey<T>, value: T) {
        self.data.insert(key.name.clone(), Box::new(value));
    }

    /// Reads the value under `key`; `None` if absent or stored with another type.
    pub fn get<T: 'static>(&self, key: &TypedKey<T>) -> Option<&T> {
        self.data.get(key.name.as_str())?.downcast_ref::<T>()
    }

    pub fn has<T: 'static>(&self, key: &TypedKey<T>) -> bool {
        self.get(key).is_some()
    }

    /// Removes and returns the value under `key` if it has the key's type.
    pub fn remove<T: 'static>(&mut self, key: &TypedKey<T>) -> Option<T> {
        if !self.has(key) {
            return None;
        }
        let boxed = self.data.remove(key.name.as_str())?;
        boxed.downcast::<T>().ok().map(|value| *value)
    }

    /// Stores an untyped value by name.
    pub fn insert<T: Send + Sync + 'static>(&mut self, name: &str, value: T) {
        self.data.insert(CompactString::new(name), Box::new(value));
    }

    pub fn get_int(&self, name: &str) -> Option<i32> {
        self.data.get(name)?.downcast_ref::<i32>().copied()
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        let value = self.data.get(name)?;
        value
            .downcast_ref::<String>()
            .map(String::as_str)
            .or_else(|| value.downcast_ref::<&'static str>().copied())
    }

    pub fn get_bool(&self, name: &str) -> Option<bool> {
        self.data.get(name)?.downcast_ref::<bool>().copied()
    }

    pub fn add_modifier(&mut self, modifier: Modifier) {
        self.modifiers.push(modifier);
    }

    /// All modifiers in the order they were added.
    pub fn modifiers(&self) -> &[Modifier] {
        &self.modifiers
    }

    /// Modifiers aimed at `target`, ascending by priority; ties keep add order.
    pub fn modifiers_for(&self, target: &str) -> Vec<&Modifier> {
        let mut selected: Vec<&Modifier> = self
            .modifiers
            .iter()
            .filter(|m| m.target.as_str() == target)
            .collect();
        selected.sort_by_key(|m| m.priority);
        selected
    }

    /// Drops modifiers whose duration has run out, returning how many were removed.
    pub fn expire_modifiers(&mut self, current_round: u32, elapsed: Elapsed) -> usize {
        let before = self.modifiers.len();
        self.modifiers.retain(|m| !m.is_expired(current_round, elapsed));
        before - self.modifiers.len()
    }

    /// Stops the bus from calling any further handlers for this publish.
    pub fn cancel(&mut self) {
        self.cancelled = true;
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }
}

impl Debug for EventContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventContext")
            .field("keys", &self.data.keys().collect::<Vec<_>>())
            .field("modifiers", &self.modifiers)
            .field("cancelled", &self.cancelled)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct AttackRoll {
        topic: Ref,
        ctx: EventContext,
    }
    crate::impl_event!(AttackRoll, topic, ctx);

    fn attack_roll(advantage: bool) -> AttackRoll {
        let mut ctx = EventContext::new();
        ctx.insert(keys::ADVANTAGE, advantage);
        AttackRoll {
            topic: Ref::new("combat.attack_roll"),
            ctx,
        }
    }

    #[test]
    fn test_typed_key_set_and_get() {
        let mut ctx = EventContext::new();
        let int_key = TypedKey::<i32>::new("testInt");
        let string_key = TypedKey::<String>::new("testString");

        ctx.set(&int_key, 42);
        ctx.set(&string_key, "hello".to_string());

        assert_eq!(ctx.get(&int_key), Some(&42));
        assert_eq!(ctx.get(&string_key).map(String::as_str), Some("hello"));
        assert!(ctx.get(&TypedKey::<bool>::new("missing")).is_none());
    }

    #[test]
    fn test_typed_key_type_safety() {
        let mut ctx = EventContext::new();
        ctx.set(&TypedKey::<String>::new("myKey"), "value".to_string());

        let int_key = TypedKey::<i32>::new("myKey");
        assert!(ctx.get(&int_key).is_none());
        assert!(!ctx.has(&int_key));
        assert_eq!(ctx.remove(&int_key), None);
        assert!(ctx.has(&TypedKey::<String>::new("myKey")));
    }

    #[test]
    fn test_remove() {
        let mut ctx = EventContext::new();
        let key = TypedKey::<i32>::new("test");
        ctx.set(&key, 42);

        assert_eq!(ctx.remove(&key), Some(42));
        assert!(!ctx.has(&key));
    }

    #[test]
    fn test_untyped_accessors() {
        let mut ctx = EventContext::new();
        ctx.insert(keys::DAMAGE, 10);
        ctx.insert(keys::WEAPON, "longsword".to_string());
        ctx.insert(keys::CRITICAL, true);

        assert_eq!(ctx.get_int(keys::DAMAGE), Some(10));
        assert_eq!(ctx.get_str(keys::WEAPON), Some("longsword"));
        assert_eq!(ctx.get_bool(keys::CRITICAL), Some(true));
        assert_eq!(ctx.get_int(keys::WEAPON), None);
    }

    #[test]
    fn test_modifiers_for_sorts_by_priority() {
        let mut ctx = EventContext::new();
        ctx.add_modifier(Modifier::additive("rage", "damage", 10, 2));
        ctx.add_modifier(Modifier::new(
            "resistance",
            ModifierKind::Multiplicative,
            "damage",
            20,
            ModifierValue::Multiplier(0.5),
        ));
        ctx.add_modifier(Modifier::new(
            "bless",
            ModifierKind::Flag,
            "advantage",
            5,
            ModifierValue::Flag(true),
        ));
        ctx.add_modifier(Modifier::additive("magic_weapon", "damage", 10, 1));

        let damage: Vec<&str> = ctx
            .modifiers_for("damage")
            .iter()
            .map(|m| m.source.as_str())
            .collect();
        assert_eq!(damage, vec!["rage", "magic_weapon", "resistance"]);
        assert_eq!(ctx.modifiers().len(), 4);
    }

    #[test]
    fn test_modifier_value_description() {
        let raw = ModifierValue::Raw {
            value: 3,
            source: "strength".into(),
        };
        assert_eq!(raw.description(), "+3 (strength)");
        assert_eq!(raw.as_int(), Some(3));

        let penalty = ModifierValue::Raw {
            value: -2,
            source: "weakness".into(),
        };
        assert_eq!(penalty.description(), "-2 (weakness)");
        assert_eq!(ModifierValue::Int(0).description(), "+0");
        assert_eq!(ModifierValue::Multiplier(0.5).as_int(), None);
    }

    #[test]
    fn test_cancel() {
        let mut ctx = EventContext::new();
        assert!(!ctx.is_cancelled());
        ctx.cancel();
        assert!(ctx.is_cancelled());
    }

    #[test]
    fn test_modifier_with_condition() {
        let bless = Modifier::additive("bless", "attack_roll", 100, 4).with_condition(|event| {
            event
                .context()
                .and_then(|ctx| ctx.get_bool(keys::ADVANTAGE))
                .unwrap_or(false)
        });

        assert!(bless.applies_to(&attack_roll(true)));
        assert!(!bless.applies_to(&attack_roll(false)));

        let unconditional = Modifier::additive("rage", "damage", 0, 2);
        assert!(unconditional.applies_to(&attack_roll(false)));
    }

    #[test]
    fn test_modifier_with_duration_and_source_details() {
        let details = ModifierSource::new("spell", "Bless")
            .with_description("You bless up to three creatures of your choice within range")
            .with_entity("cleric");
        let bless = Modifier::additive("bless", "attack_roll", 100, 4)
            .with_duration(Duration::rounds(10, 1))
            .with_source_details(details.clone());

        assert_eq!(bless.duration, Some(Duration::rounds(10, 1)));
        assert_eq!(bless.source_details.as_ref(), Some(&details));
        assert_eq!(details.kind.as_str(), "spell");
        assert_eq!(details.name.as_str(), "Bless");
        assert_eq!(details.entity.as_deref(), Some("cleric"));

        assert!(!bless.is_expired(10, Elapsed::ZERO));
        assert!(bless.is_expired(11, Elapsed::ZERO));
        assert!(!Modifier::additive("rage", "damage", 0, 2).is_expired(1000, Elapsed::MAX));
    }

    #[test]
    fn test_conditions_compare_by_identity() {
        let shared = Modifier::additive("bless", "attack_roll", 0, 4).with_condition(|_| true);
        assert_eq!(shared.clone(), shared);

        let other = Modifier::additive("bless", "attack_roll", 0, 4).with_condition(|_| true);
        assert_ne!(shared, other);
    }

    #[test]
    fn test_expire_modifiers() {
        let mut ctx = EventContext::new();
        ctx.add_modifier(
            Modifier::additive("bless", "attack_roll", 0, 4).with_duration(Duration::rounds(1, 1)),
        );
        ctx.add_modifier(
            Modifier::additive("haste", "armor_class", 0, 2)
                .with_duration(Duration::Concentration { broken: false }),
        );
        ctx.add_modifier(Modifier::additive("proficiency", "attack_roll", 0, 2));

        assert_eq!(ctx.expire_modifiers(1, Elapsed::ZERO), 0);
        assert_eq!(ctx.expire_modifiers(2, Elapsed::ZERO), 1);
        let left: Vec<&str> = ctx.modifiers().iter().map(|m| m.source.as_str()).collect();
        assert_eq!(left, ["haste", "proficiency"]);
    }

    #[test]
    fn test_serialized_modifier_keeps_duration_but_not_condition() {
        let bless = Modifier::additive("bless", "attack_roll", 100, 4)
            .with_duration(Duration::rounds(10, 1))
            .with_condition(|_| true);
        let text = toml::to_string(&bless).unwrap();
        let restored: Modifier = toml::from_str(&text).unwrap();

        assert_eq!(restored.duration, Some(Duration::rounds(10, 1)));
        assert!(restored.condition.is_none());
    }
}
