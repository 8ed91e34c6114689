use std::collections::BTreeMap;
use std::sync::Arc;

use pss_types::SUB_PAGE_SIZE;
use tracing::debug;

use crate::chunked::ChunkTableCompander;
use crate::codec::CodecSpec;
use crate::error::{CompanderError, CompanderResult};
use crate::pixel::PixelMapCompander;
use crate::pool::CodecPool;
use crate::traits::StoreCompander;

/// Chunk-table compander over fast zstd.
pub const SIMPLE_COMPANDER: &str = "CSimpleStoreCompander";
/// Chunk-table compander over default-level zstd.
pub const LZ_COMPANDER: &str = "CLZStoreCompander";
/// Pixel-delta compander.
pub const PIXEL_MAP_COMPANDER: &str = PixelMapCompander::NAME;

/// What a factory gets to build a compander with.
#[derive(Clone, Debug)]
pub struct CompanderEnv {
    pub pool: Arc<CodecPool>,
    pub block_size: usize,
}

pub type CompanderFactory = Arc<dyn Fn(&CompanderEnv) -> Box<dyn StoreCompander> + Send + Sync>;

/// String-keyed table of compander factories.
///
/// Objects persist the name of the compander that wrote them; the registry
/// turns that name back into an unbound compander when the object is opened.
#[derive(Clone)]
pub struct CompanderRegistry {
    env: CompanderEnv,
    factories: BTreeMap<String, CompanderFactory>,
}

impl CompanderRegistry {
    /// An empty registry.
    pub fn new(block_size: usize) -> Self {
        Self {
            env: CompanderEnv {
                pool: Arc::new(CodecPool::new()),
                block_size,
            },
            factories: BTreeMap::new(),
        }
    }

    /// A registry holding the built-in companders.
    pub fn with_defaults(block_size: usize) -> Self {
        let mut registry = Self::new(block_size);
        registry.register(SIMPLE_COMPANDER, |env| {
            Box::new(ChunkTableCompander::new(
                SIMPLE_COMPANDER,
                CodecSpec::FAST,
                env.pool.clone(),
                env.block_size,
            ))
        });
        registry.register(LZ_COMPANDER, |env| {
            Box::new(ChunkTableCompander::new(
                LZ_COMPANDER,
                CodecSpec::DEFAULT,
                env.pool.clone(),
                env.block_size,
            ))
        });
        registry.register(PIXEL_MAP_COMPANDER, |env| {
            Box::new(PixelMapCompander::new(
                CodecSpec::DEFAULT,
                env.pool.clone(),
                env.block_size,
            ))
        });
        registry
    }

    /// Register (or replace) the factory for `name`.
    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&CompanderEnv) -> Box<dyn StoreCompander> + Send + Sync + 'static,
    {
        debug!(name, "compander registered");
        self.factories.insert(name.to_string(), Arc::new(factory));
    }

    /// Build an unbound compander for `name`.
    pub fn make(&self, name: &str) -> CompanderResult<Box<dyn StoreCompander>> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| CompanderError::UnknownCompander(name.to_string()))?;
        Ok(factory(&self.env))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    pub fn block_size(&self) -> usize {
        self.env.block_size
    }

    /// The codec pool shared companders lease from.
    pub fn pool(&self) -> &Arc<CodecPool> {
        &self.env.pool
    }
}

impl Default for CompanderRegistry {
    fn default() -> Self {
        Self::with_defaults(SUB_PAGE_SIZE)
    }
}

impl std::fmt::Debug for CompanderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompanderRegistry")
            .field("block_size", &self.env.block_size)
            .field("names", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_registered() {
        let registry = CompanderRegistry::default();
        let names: Vec<&str> = registry.names().collect();
        assert_eq!(names, vec![LZ_COMPANDER, PIXEL_MAP_COMPANDER, SIMPLE_COMPANDER]);
        assert_eq!(registry.block_size(), 1024);
    }

    #[test]
    fn make_builds_named_compander() {
        let registry = CompanderRegistry::default();
        for name in [SIMPLE_COMPANDER, LZ_COMPANDER, PIXEL_MAP_COMPANDER] {
            let c = registry.make(name).unwrap();
            assert_eq!(c.name(), name);
            assert_eq!(c.block_size(), 1024);
        }
    }

    #[test]
    fn unknown_name_fails() {
        let registry = CompanderRegistry::default();
        let err = registry.make("CNoSuchCompander").err().unwrap();
        assert!(matches!(err, CompanderError::UnknownCompander(n) if n == "CNoSuchCompander"));
    }

    #[test]
    fn register_adds_custom_factory() {
        let mut registry = CompanderRegistry::new(512);
        assert!(!registry.contains("Custom"));
        registry.register("Custom", |env| {
            Box::new(ChunkTableCompander::new(
                "Custom",
                CodecSpec::Zstd { level: 9 },
                env.pool.clone(),
                env.block_size,
            ))
        });
        let c = registry.make("Custom").unwrap();
        assert_eq!(c.name(), "Custom");
        assert_eq!(c.block_size(), 512);
    }

    #[test]
    fn clones_share_one_pool() {
        let registry = CompanderRegistry::default();
        let copy = registry.clone();
        assert!(Arc::ptr_eq(registry.pool(), copy.pool()));
    }
}
