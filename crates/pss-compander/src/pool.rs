use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::trace;

use crate::codec::{CodecSet, CodecSpec};
use crate::error::CompanderResult;

type PoolKey = (CodecSpec, usize);

/// Process-wide pool of codec sets, shared through an `Arc`.
///
/// Shared companders lease a set for the duration of one chunk operation and
/// hand it back on drop, so many objects can be open with only as many codec
/// contexts as there are concurrent chunk operations.
#[derive(Default)]
pub struct CodecPool {
    idle: Mutex<HashMap<PoolKey, Vec<CodecSet>>>,
    created: AtomicUsize,
}

impl CodecPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take an idle set for `spec`/`block_size`, building one if none is idle.
    pub fn lease(self: &Arc<Self>, spec: CodecSpec, block_size: usize) -> CompanderResult<PooledCodec> {
        let key = (spec, block_size);
        let reused = self
            .idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(&key)
            .and_then(Vec::pop);
        let set = match reused {
            Some(set) => set,
            None => {
                self.created.fetch_add(1, Ordering::Relaxed);
                trace!(%spec, block_size, "building pooled codec set");
                CodecSet::new(spec, block_size)?
            }
        };
        Ok(PooledCodec {
            set: Some(set),
            key,
            pool: Arc::clone(self),
        })
    }

    /// Number of sets ever built by this pool.
    pub fn created(&self) -> usize {
        self.created.load(Ordering::Relaxed)
    }

    /// Number of sets currently idle in the pool.
    pub fn idle_count(&self) -> usize {
        self.idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(Vec::len)
            .sum()
    }

    fn give_back(&self, key: PoolKey, set: CodecSet) {
        self.idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key)
            .or_default()
            .push(set);
    }
}

impl std::fmt::Debug for CodecPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodecPool")
            .field("created", &self.created())
            .field("idle", &self.idle_count())
            .finish()
    }
}

/// A codec set on loan from a [`CodecPool`]; returned to the pool on drop.
pub struct PooledCodec {
    set: Option<CodecSet>,
    key: PoolKey,
    pool: Arc<CodecPool>,
}

impl Deref for PooledCodec {
    type Target = CodecSet;

    fn deref(&self) -> &CodecSet {
        self.set.as_ref().expect("codec set present until drop")
    }
}

impl DerefMut for PooledCodec {
    fn deref_mut(&mut self) -> &mut CodecSet {
        self.set.as_mut().expect("codec set present until drop")
    }
}

impl Drop for PooledCodec {
    fn drop(&mut self) {
        if let Some(set) = self.set.take() {
            self.pool.give_back(self.key, set);
        }
    }
}

/// Where a compander gets its codec from.
pub enum CompanderSource {
    /// Lease from a shared pool per operation.
    Pooled { pool: Arc<CodecPool>, spec: CodecSpec, block_size: usize },
    /// A private set owned by one compander and freed with it.
    Owned(Box<CodecSet>),
}

impl CompanderSource {
    /// Pick a source: pooled when `shared`, otherwise a freshly built set.
    pub fn new(
        shared: bool,
        pool: &Arc<CodecPool>,
        spec: CodecSpec,
        block_size: usize,
    ) -> CompanderResult<Self> {
        if shared {
            Ok(Self::Pooled {
                pool: Arc::clone(pool),
                spec,
                block_size,
            })
        } else {
            Ok(Self::Owned(Box::new(CodecSet::new(spec, block_size)?)))
        }
    }

    pub fn is_shared(&self) -> bool {
        matches!(self, Self::Pooled { .. })
    }

    /// Run `f` with a codec set from this source.
    pub fn with_codec<T>(
        &mut self,
        f: impl FnOnce(&mut CodecSet) -> CompanderResult<T>,
    ) -> CompanderResult<T> {
        match self {
            Self::Pooled { pool, spec, block_size } => {
                let mut leased = pool.lease(*spec, *block_size)?;
                f(&mut leased)
            }
            Self::Owned(set) => f(set),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lease_returns_set_on_drop() {
        let pool = Arc::new(CodecPool::new());
        {
            let leased = pool.lease(CodecSpec::DEFAULT, 1024).unwrap();
            assert_eq!(leased.scratch_len(), 1032);
            assert_eq!(pool.idle_count(), 0);
        }
        assert_eq!(pool.idle_count(), 1);
        assert_eq!(pool.created(), 1);

        let _again = pool.lease(CodecSpec::DEFAULT, 1024).unwrap();
        assert_eq!(pool.created(), 1);
    }

    #[test]
    fn concurrent_leases_build_distinct_sets() {
        let pool = Arc::new(CodecPool::new());
        let a = pool.lease(CodecSpec::FAST, 1024).unwrap();
        let b = pool.lease(CodecSpec::FAST, 1024).unwrap();
        assert_eq!(pool.created(), 2);
        drop(a);
        drop(b);
        assert_eq!(pool.idle_count(), 2);
    }

    #[test]
    fn sets_are_keyed_by_spec_and_block_size() {
        let pool = Arc::new(CodecPool::new());
        drop(pool.lease(CodecSpec::FAST, 1024).unwrap());
        drop(pool.lease(CodecSpec::DEFAULT, 1024).unwrap());
        drop(pool.lease(CodecSpec::DEFAULT, 512).unwrap());
        assert_eq!(pool.created(), 3);
        assert_eq!(pool.idle_count(), 3);
    }

    #[test]
    fn pooled_source_leases_per_call() {
        let pool = Arc::new(CodecPool::new());
        let mut source = CompanderSource::new(true, &pool, CodecSpec::DEFAULT, 1024).unwrap();
        assert!(source.is_shared());
        source.with_codec(|_| Ok(())).unwrap();
        source.with_codec(|_| Ok(())).unwrap();
        assert_eq!(pool.created(), 1);
        assert_eq!(pool.idle_count(), 1);
    }

    #[test]
    fn owned_source_bypasses_pool() {
        let pool = Arc::new(CodecPool::new());
        let mut source = CompanderSource::new(false, &pool, CodecSpec::DEFAULT, 1024).unwrap();
        assert!(!source.is_shared());
        let len = source.with_codec(|set| Ok(set.scratch_len())).unwrap();
        assert_eq!(len, 1032);
        assert_eq!(pool.created(), 0);
    }
}
