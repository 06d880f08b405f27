//! Macros for declaring events and registering handlers

/// Implements [`Event`](crate::Event) for a struct that stores its topic in a
/// [`Ref`](crate::Ref) field.
///
/// The field defaults to `topic`. Name a second field to expose an
/// [`EventContext`](crate::EventContext), which lets handlers add modifiers
/// and cancel dispatch.
///
/// # Usage
///
/// ```rust
/// use rpg_events::{impl_event, EventContext, Ref};
///
/// #[derive(Debug)]
/// struct TurnStarted {
///     topic: Ref,
///     round: u32,
/// }
/// impl_event!(TurnStarted);
///
/// #[derive(Debug)]
/// struct AttackRoll {
///     kind: Ref,
///     ctx: EventContext,
/// }
/// impl_event!(AttackRoll, kind, ctx);
/// ```
#[macro_export]
macro_rules! impl_event {
    ($event_type:ty) => {
        $crate::impl_event!($event_type, topic);
    };

    ($event_type:ty, $ref_field:ident) => {
        impl $crate::Event for $event_type {
            fn event_ref(&self) -> &$crate::Ref {
                &self.$ref_field
            }

            fn as_any(&self) -> &dyn ::std::any::Any {
                self
            }

            fn as_any_mut(&mut self) -> &mut dyn ::std::any::Any {
                self
            }
        }
    };

    ($event_type:ty, $ref_field:ident, $context_field:ident) => {
        impl $crate::Event for $event_type {
            fn event_ref(&self) -> &$crate::Ref {
                &self.$ref_field
            }

            fn context(&self) -> ::std::option::Option<&$crate::EventContext> {
                ::std::option::Option::Some(&self.$context_field)
            }

            fn context_mut(&mut self) -> ::std::option::Option<&mut $crate::EventContext> {
                ::std::option::Option::Some(&mut self.$context_field)
            }

            fn as_any(&self) -> &dyn ::std::any::Any {
                self
            }

            fn as_any_mut(&mut self) -> &mut dyn ::std::any::Any {
                self
            }
        }
    };
}

/// Subscribes several typed handlers under one context, returning their ids.
///
/// Stops at the first registration error.
///
/// ```rust
/// use rpg_events::{subscribe_all, Bus, Context, TopicDef, TopicRegistry};
///
/// # fn main() -> rpg_events::Result<()> {
/// let registry = TopicRegistry::new();
/// let started = TopicDef::<u32>::define_in(&registry, "turn.started")?;
/// let ended = TopicDef::<u32>::define_in(&registry, "turn.ended")?;
/// let bus = Bus::new();
///
/// let ids = subscribe_all!(bus, &Context::new();
///     started => |_ctx, round| { println!("round {round}"); Ok(()) },
///     ended => |_ctx, _round| Ok(()),
/// )?;
/// assert_eq!(ids.len(), 2);
/// # Ok(())
/// # }
/// ```
#[macro_export]
macro_rules! subscribe_all {
    ($bus:expr, $ctx:expr; $($topic:expr => $handler:expr),* $(,)?) => {{
        (|| -> $crate::Result<::std::vec::Vec<$crate::SubscriptionId>> {
            let mut ids = ::std::vec::Vec::new();
            $(
                ids.push($topic.on(&$bus).subscribe($ctx, $handler)?);
            )*
            Ok(ids)
        })()
    }};
}
