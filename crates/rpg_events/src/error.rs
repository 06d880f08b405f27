//! Error types for the event bus and modifier chains

use crate::system::SubscriptionId;
use compact_str::CompactString;

/// Error returned by rule code: event handlers, chain subscribers and modifiers.
///
/// The bus wraps it with the identity of the failing subscription or modifier.
pub type HandlerError = anyhow::Error;

/// Broad failure category, for callers that want to branch without matching
/// every [`BusError`] variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The subscription or declaration was rejected before any dispatch.
    Registration,
    /// A handler or modifier failed while the bus was running it.
    Dispatch,
    /// An id or topic name is already taken.
    DuplicateId,
    /// An id does not exist.
    NotFound,
    /// A publish cascade nested deeper than the configured maximum.
    CascadeDepthExceeded,
    /// An event's identity disagrees with the identity it was subscribed under.
    RefMismatch,
}

/// Errors produced by the bus, typed topics and staged chains.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// The handler passed to an untyped subscribe is not one of the accepted shapes
    #[error("invalid handler for topic {topic}: {found} is not fn(&mut dyn Event) or fn(&Context, &mut dyn Event) returning HandlerResult")]
    InvalidHandler {
        topic: CompactString,
        found: &'static str,
    },

    /// Subscribe was called with a context that is already cancelled
    #[error("registration for topic {topic} cancelled")]
    RegistrationCancelled { topic: CompactString },

    /// A modifier was added to a stage the chain was not declared with
    #[error("modifier {modifier} targets unknown stage {stage}")]
    UnknownStage {
        stage: CompactString,
        modifier: CompactString,
    },

    /// A handler returned an error, or requested one through a deferred action
    #[error("handler {subscription} on topic {topic} failed: {source}")]
    HandlerFailed {
        subscription: SubscriptionId,
        topic: CompactString,
        #[source]
        source: HandlerError,
    },

    /// A staged modifier failed during chain execution
    #[error("modifier {modifier} in stage {stage} failed: {source}")]
    ModifierFailed {
        stage: CompactString,
        modifier: CompactString,
        #[source]
        source: HandlerError,
    },

    /// A chain already holds a modifier with this id
    #[error("duplicate modifier id {id}: already in stage {existing_stage}, rejected for stage {requested_stage}")]
    DuplicateModifier {
        id: CompactString,
        existing_stage: CompactString,
        requested_stage: CompactString,
    },

    /// A topic string was declared with a second, different payload type
    #[error("topic {topic} already registered with type {existing}, cannot register {conflicting}")]
    DuplicateTopicType {
        topic: CompactString,
        existing: &'static str,
        conflicting: &'static str,
    },

    /// A chained topic was declared again with a different stage order
    #[error("chained topic {topic} already declared with stages [{existing}], cannot redeclare with [{conflicting}]")]
    ConflictingStages {
        topic: CompactString,
        existing: String,
        conflicting: String,
    },

    /// Unsubscribe on an id this bus does not know
    #[error("subscription {0} not found")]
    SubscriptionNotFound(SubscriptionId),

    /// Chain removal of an id that was never added
    #[error("modifier {0} not found in chain")]
    ModifierNotFound(CompactString),

    /// Nested publishing went past the configured limit
    #[error("event cascade depth exceeded: current={depth}, max={max}, event={topic}")]
    CascadeDepthExceeded {
        depth: u32,
        max: u32,
        topic: CompactString,
    },

    /// Same topic string, different declared instance
    #[error("ref mismatch on topic {topic}: subscribed under instance {expected}, event carries instance {actual}")]
    RefMismatch {
        topic: CompactString,
        expected: u64,
        actual: u64,
    },
}

impl BusError {
    /// Returns the broad category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            BusError::InvalidHandler { .. }
            | BusError::RegistrationCancelled { .. }
            | BusError::UnknownStage { .. } => ErrorKind::Registration,
            BusError::HandlerFailed { .. } | BusError::ModifierFailed { .. } => ErrorKind::Dispatch,
            BusError::DuplicateModifier { .. }
            | BusError::DuplicateTopicType { .. }
            | BusError::ConflictingStages { .. } => ErrorKind::DuplicateId,
            BusError::SubscriptionNotFound(_) | BusError::ModifierNotFound(_) => ErrorKind::NotFound,
            BusError::CascadeDepthExceeded { .. } => ErrorKind::CascadeDepthExceeded,
            BusError::RefMismatch { .. } => ErrorKind::RefMismatch,
        }
    }

    /// Follows handler failures whose cause is itself a `BusError` down to the
    /// innermost one.
    ///
    /// A handler that publishes directly and propagates the result with `?`
    /// wraps the nested failure once per frame; this recovers the original.
    pub fn root_cause(&self) -> &BusError {
        let mut current = self;
        while let BusError::HandlerFailed { source, .. } = current {
            match source.downcast_ref::<BusError>() {
                Some(inner) => current = inner,
                None => break,
            }
        }
        current
    }
}
