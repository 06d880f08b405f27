//! Topic identity and duplicate-type detection
//!
//! Every event kind is named by a [`Ref`]. Routing only ever compares the
//! string key; the optional instance id minted by a [`TopicRegistry`] is a
//! defensive check that catches two independently declared topics sharing a
//! string.

use crate::chain::Stage;
use crate::error::BusError;
use compact_str::CompactString;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use std::any::{type_name, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

static NEXT_INSTANCE: AtomicU64 = AtomicU64::new(1);

static GLOBAL_REGISTRY: Lazy<TopicRegistry> = Lazy::new(TopicRegistry::new);

/// Stable identity of an event kind.
///
/// Equality and hashing use the key alone.
#[derive(Clone)]
pub struct Ref {
    key: CompactString,
    instance: Option<u64>,
}

impl Ref {
    /// Creates a ref with no registry instance; it matches any ref with the same key.
    pub fn new(key: impl AsRef<str>) -> Self {
        Self {
            key: CompactString::new(key.as_ref()),
            instance: None,
        }
    }

    /// Creates a three-part `module:kind:value` ref.
    pub fn from_parts(module: &str, kind: &str, value: &str) -> Self {
        Self::new(format!("{}:{}:{}", module, kind, value))
    }

    /// The routing key.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub(crate) fn compact_key(&self) -> &CompactString {
        &self.key
    }

    /// Registry instance id, if this ref was minted by a [`TopicRegistry`].
    pub fn instance(&self) -> Option<u64> {
        self.instance
    }

    /// Checks that `other` names the same declaration as `self`.
    ///
    /// Refs with different keys never reach this check. When both sides carry
    /// an instance id the ids must agree.
    pub fn verify(&self, other: &Ref) -> Result<(), BusError> {
        match (self.instance, other.instance) {
            (Some(expected), Some(actual)) if expected != actual => Err(BusError::RefMismatch {
                topic: self.key.clone(),
                expected,
                actual,
            }),
            _ => Ok(()),
        }
    }
}

impl PartialEq for Ref {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for Ref {}

impl Hash for Ref {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl fmt::Display for Ref {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}

impl fmt::Debug for Ref {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.instance {
            Some(instance) => write!(f, "Ref({}#{})", self.key, instance),
            None => write!(f, "Ref({})", self.key),
        }
    }
}

impl From<&str> for Ref {
    fn from(key: &str) -> Self {
        Ref::new(key)
    }
}

#[derive(Debug, Clone, Copy)]
struct TopicEntry {
    type_id: TypeId,
    type_name: &'static str,
    instance: u64,
}

/// Records which payload type owns each topic string.
///
/// Declarations go through [`TopicRegistry::global`] unless a test builds its
/// own isolated instance.
#[derive(Debug, Default)]
pub struct TopicRegistry {
    entries: DashMap<CompactString, TopicEntry>,
    /// declared stage order of chained topics
    stages: DashMap<CompactString, Arc<[Stage]>>,
}

impl TopicRegistry {
    /// Creates an empty, isolated registry.
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            stages: DashMap::new(),
        }
    }

    /// The process-wide registry.
    pub fn global() -> &'static TopicRegistry {
        &GLOBAL_REGISTRY
    }

    /// Registers `T` as the payload type of `key` and returns its ref.
    ///
    /// Registering the same type again returns an equal ref with the same
    /// instance id. A different type fails with [`BusError::DuplicateTopicType`].
    pub fn register<T: 'static>(&self, key: &str) -> Result<Ref, BusError> {
        let type_id = TypeId::of::<T>();
        let conflicting = type_name::<T>();

        let entry = match self.entries.entry(CompactString::new(key)) {
            Entry::Occupied(occupied) => *occupied.get(),
            Entry::Vacant(vacant) => {
                let entry = TopicEntry {
                    type_id,
                    type_name: conflicting,
                    instance: NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed),
                };
                vacant.insert(entry);
                debug!("Registered topic {} for {}", key, conflicting);
                entry
            }
        };

        if entry.type_id != type_id {
            return Err(BusError::DuplicateTopicType {
                topic: CompactString::new(key),
                existing: entry.type_name,
                conflicting,
            });
        }

        Ok(Ref {
            key: CompactString::new(key),
            instance: Some(entry.instance),
        })
    }

    /// Records the stage order of the chained topic `key`.
    ///
    /// Redeclaring identical stages returns the stored list. Any other list
    /// fails with [`BusError::ConflictingStages`].
    pub fn register_stages(
        &self,
        key: &str,
        stages: Arc<[Stage]>,
    ) -> Result<Arc<[Stage]>, BusError> {
        match self.stages.entry(CompactString::new(key)) {
            Entry::Occupied(occupied) if *occupied.get() == stages => {
                Ok(Arc::clone(occupied.get()))
            }
            Entry::Occupied(occupied) => Err(BusError::ConflictingStages {
                topic: CompactString::new(key),
                existing: join_stages(occupied.get()),
                conflicting: join_stages(&stages),
            }),
            Entry::Vacant(vacant) => {
                debug!("Declared stages [{}] for {}", join_stages(&stages), key);
                vacant.insert(Arc::clone(&stages));
                Ok(stages)
            }
        }
    }

    /// Stage order declared for the chained topic `key`, if any.
    pub fn stages_of(&self, key: &str) -> Option<Arc<[Stage]>> {
        self.stages.get(key).map(|stages| Arc::clone(&stages))
    }

    /// Name of the type registered under `key`, if any.
    pub fn type_name_of(&self, key: &str) -> Option<&'static str> {
        self.entries.get(key).map(|entry| entry.type_name)
    }

    /// Number of registered topics.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn join_stages(stages: &[Stage]) -> String {
    stages
        .iter()
        .map(Stage::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}
