use pss_types::PssId;

use crate::error::{StoreError, StoreResult};
use crate::traits::Store;

/// Objects below this size are cached in an inline buffer.
pub const INLINE_CACHE_SIZE: usize = 1024;

/// Default upper bound on the bytes held in the cache.
pub const DEFAULT_CACHE_LIMIT: usize = 64 * 1024;

enum CacheBuffer {
    Inline { bytes: [u8; INLINE_CACHE_SIZE], len: usize },
    Heap(Vec<u8>),
}

impl CacheBuffer {
    fn as_slice(&self) -> &[u8] {
        match self {
            Self::Inline { bytes, len } => &bytes[..*len],
            Self::Heap(v) => v,
        }
    }
}

/// Read-through cache over a single store object.
///
/// The first access loads the object (up to the cache limit) in one read;
/// later reads inside that window are served from memory. Reads beyond the
/// window go straight to the store through a scratch buffer that is reused
/// and grown geometrically.
pub struct CachedReadStore<'a> {
    store: &'a dyn Store,
    id: PssId,
    size: usize,
    limit: usize,
    cache: Option<CacheBuffer>,
    scratch: Vec<u8>,
    store_reads: usize,
}

impl<'a> CachedReadStore<'a> {
    /// Cache object `id` of known `size`.
    pub fn new(store: &'a dyn Store, id: PssId, size: usize) -> Self {
        Self::with_limit(store, id, size, DEFAULT_CACHE_LIMIT)
    }

    /// Cache at most `limit` leading bytes of the object.
    pub fn with_limit(store: &'a dyn Store, id: PssId, size: usize, limit: usize) -> Self {
        Self {
            store,
            id,
            size,
            limit,
            cache: None,
            scratch: Vec::new(),
            store_reads: 0,
        }
    }

    /// Cache object `id`, asking the store for its size.
    pub fn open(store: &'a dyn Store, id: PssId) -> StoreResult<Self> {
        let size = store.object_size(id)?;
        Ok(Self::new(store, id, size))
    }

    /// Known size of the cached object.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of reads issued to the underlying store so far.
    pub fn store_reads(&self) -> usize {
        self.store_reads
    }

    /// Borrow `len` bytes of the object starting at `offset`.
    pub fn get_data(&mut self, offset: usize, len: usize) -> StoreResult<&[u8]> {
        let end = offset
            .checked_add(len)
            .filter(|end| *end <= self.size)
            .ok_or(StoreError::ObjectOverRun {
                offset,
                len,
                size: self.size,
            })?;

        self.load()?;
        let window = self.cached_len();
        if end <= window {
            if let Some(cache) = &self.cache {
                return Ok(&cache.as_slice()[offset..end]);
            }
        }

        if self.scratch.len() < len {
            let grown = len.max(self.scratch.len() * 2);
            self.scratch.resize(grown, 0);
        }
        self.store
            .read(self.id, offset, &mut self.scratch[..len])?;
        self.store_reads += 1;
        Ok(&self.scratch[..len])
    }

    /// Read a big-endian `u32` at `offset`.
    pub fn get_u32(&mut self, offset: usize) -> StoreResult<u32> {
        let bytes = self.get_data(offset, 4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn cached_len(&self) -> usize {
        self.cache.as_ref().map_or(0, |c| c.as_slice().len())
    }

    fn load(&mut self) -> StoreResult<()> {
        if self.cache.is_some() {
            return Ok(());
        }
        let len = self.size.min(self.limit);
        let cache = if len < INLINE_CACHE_SIZE {
            let mut bytes = [0u8; INLINE_CACHE_SIZE];
            self.store.read(self.id, 0, &mut bytes[..len])?;
            CacheBuffer::Inline { bytes, len }
        } else {
            let mut bytes = vec![0u8; len];
            self.store.read(self.id, 0, &mut bytes)?;
            CacheBuffer::Heap(bytes)
        };
        self.store_reads += 1;
        self.cache = Some(cache);
        Ok(())
    }
}
