use serde::{Deserialize, Serialize};

/// Configuration for an in-memory store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Total bytes available for object contents.
    pub capacity: usize,
    /// Reject all mutating calls with `WriteProtected`.
    pub read_only: bool,
    /// Behave as ROM: read-only and cannot be unlocked.
    pub rom: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            capacity: 4 * 1024 * 1024, // 4 MiB
            read_only: false,
            rom: false,
        }
    }
}

impl StoreConfig {
    /// A configuration with the given capacity and defaults otherwise.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            ..Default::default()
        }
    }
}
