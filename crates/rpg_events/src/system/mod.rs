/// Event bus - broken down into registration, dispatch and bookkeeping
mod core;
mod depth;
mod emitters;
mod handlers;
mod stats;

pub use core::{Bus, SubscriptionId};
pub use handlers::{
    ContextHandlerFn, EventFilter, EventHandlerFn, Handler, HandlerResult, SubscribeOptions,
};
pub use stats::BusStats;
