//! Bus configuration.
//!
//! A host embeds these settings in its own TOML document, either as top-level
//! keys or under an `[events]` table. Reading files is the host's job.

use serde::{Deserialize, Serialize};

/// Cascade limit used when none is configured, or when the configured value is
/// not positive.
pub const DEFAULT_MAX_DEPTH: u32 = 10;

fn default_max_depth() -> i64 {
    i64::from(DEFAULT_MAX_DEPTH)
}

/// Settings for a [`Bus`](crate::Bus).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusConfig {
    /// Maximum nested publish depth. Zero or negative selects the default.
    #[serde(default = "default_max_depth")]
    pub max_depth: i64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
        }
    }
}

impl BusConfig {
    pub fn with_max_depth(max_depth: i64) -> Self {
        Self { max_depth }
    }

    /// Parses a TOML snippet, preferring an `[events]` table when present.
    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        let mut document: toml::Table = content.parse()?;
        let section = match document.remove("events") {
            Some(toml::Value::Table(events)) => events,
            Some(other) => {
                document.insert("events".to_string(), other);
                document
            }
            None => document,
        };
        toml::Value::Table(section).try_into()
    }

    /// The limit the bus enforces.
    pub fn effective_max_depth(&self) -> u32 {
        normalize_max_depth(self.max_depth)
    }
}

pub(crate) fn normalize_max_depth(max_depth: i64) -> u32 {
    if max_depth <= 0 {
        DEFAULT_MAX_DEPTH
    } else {
        u32::try_from(max_depth).unwrap_or(u32::MAX)
    }
}
