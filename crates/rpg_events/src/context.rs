//! Cancellation-aware dispatch context.
//!
//! A [`Context`] is handed to every handler and modifier. Cancellation is
//! cooperative: the bus refuses new registrations under a cancelled context,
//! but it never interrupts a running handler. Handlers that perform long work
//! are expected to check [`Context::is_cancelled`].
//!
//! This is distinct from event-level cancellation
//! ([`EventContext::cancel`](crate::EventContext::cancel)), which tells the
//! dispatch loop to stop calling further handlers for one publish.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Shared cancellation state passed through subscribe, publish and chain execution.
#[derive(Debug, Clone)]
pub struct Context {
    cancelled: Arc<AtomicBool>,
}

impl Context {
    /// Creates a fresh, uncancelled context.
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A fresh context for callers with nothing to cancel.
    pub fn background() -> Self {
        Self::new()
    }

    /// Returns a handle sharing this context's cancellation flag.
    pub fn child(&self) -> Self {
        Self {
            cancelled: Arc::clone(&self.cancelled),
        }
    }

    /// Marks the context cancelled for every clone and child.
    pub fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::AcqRel) {
            debug!("Context cancelled");
        }
    }

    /// Returns true once [`cancel`](Self::cancel) has been called on any handle.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}
