use pss_compander::LZ_COMPANDER;
use pss_store::cached::DEFAULT_CACHE_LIMIT;
use pss_types::SUB_PAGE_SIZE;
use serde::{Deserialize, Serialize};

/// Configuration for a [`LargeObjectStore`](crate::LargeObjectStore).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LargeObjectConfig {
    /// Chunk granularity in bytes.
    pub block_size: usize,
    /// Compander used when a caller does not name one.
    pub default_compander: String,
    /// Lease codecs from the shared pool instead of building private ones.
    pub shared_companders: bool,
    /// Progress interval in bytes for callbacks that do not pick their own.
    pub progress_frequency: usize,
    /// Upper bound on bytes cached when reading root and table objects.
    pub cache_limit: usize,
}

impl Default for LargeObjectConfig {
    fn default() -> Self {
        Self {
            block_size: SUB_PAGE_SIZE,
            default_compander: LZ_COMPANDER.to_string(),
            shared_companders: false,
            progress_frequency: 16 * 1024,
            cache_limit: DEFAULT_CACHE_LIMIT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let c = LargeObjectConfig::default();
        assert_eq!(c.block_size, 1024);
        assert_eq!(c.default_compander, "CLZStoreCompander");
        assert!(!c.shared_companders);
        assert_eq!(c.progress_frequency, 16 * 1024);
        assert_eq!(c.cache_limit, 64 * 1024);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let c: LargeObjectConfig = toml::from_str(
            r#"
            default_compander = "CSimpleStoreCompander"
            shared_companders = true
            "#,
        )
        .unwrap();
        assert_eq!(c.default_compander, "CSimpleStoreCompander");
        assert!(c.shared_companders);
        assert_eq!(c.block_size, 1024);
    }
}
