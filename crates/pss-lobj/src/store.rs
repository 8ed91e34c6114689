use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use pss_compander::{CompanderRegistry, StoreCompander, PIXEL_MAP_COMPANDER};
use pss_store::{CachedReadStore, Store, StoreError};
use pss_types::{chunk_count, long_align, PssId, NO_PSS_ID, PSS_ID_SIZE};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::allocator::{ChunkTableAllocator, LargeObjectAllocator, PixelMapAllocator};
use crate::config::LargeObjectConfig;
use crate::error::{LargeObjectError, LargeObjectResult};
use crate::handle::{HandleState, LargeObject};
use crate::pipe::Pipe;
use crate::progress::{ProgressCallback, ProgressTracker};
use crate::root::{LargeObjectRoot, RootFlags, LARGE_OBJECT_ROOT_SIZE};
use crate::saga::Saga;

/// Size of the `(flags, size)` header at the front of a backup stream.
pub const STREAM_HEADER_SIZE: usize = 8;

/// What to create.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CreateOptions {
    /// Logical size in bytes. Ignored by `create_from_compressed`, which
    /// takes the size from the stream header.
    pub size: usize,
    pub read_only: bool,
    /// Compander name; the configured default when `None`.
    pub compander: Option<String>,
    /// Compander parameter blob, stored alongside the object.
    pub parameters: Option<Vec<u8>>,
    /// Name passed to progress callbacks.
    pub name: Option<String>,
}

impl CreateOptions {
    pub fn new(size: usize) -> Self {
        Self {
            size,
            ..Default::default()
        }
    }

    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub fn compander(mut self, name: impl Into<String>) -> Self {
        self.compander = Some(name.into());
        self
    }

    pub fn parameters(mut self, parms: impl Into<Vec<u8>>) -> Self {
        self.parameters = Some(parms.into());
        self
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Summary of one large object.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LargeObjectInfo {
    pub id: PssId,
    pub size: usize,
    pub chunks: usize,
    /// Chunks with a non-empty stored form.
    pub stored_chunks: usize,
    pub compander: String,
    pub read_only: bool,
    pub storage_size: usize,
}

/// Everything a root points at, read back from the store.
struct Parts {
    root: LargeObjectRoot,
    name: String,
    parms: Option<Vec<u8>>,
    table: Vec<PssId>,
}

struct LiveHandle {
    store: u32,
    id: PssId,
    state: Weak<Mutex<HandleState>>,
}

/// The chunked large-object engine.
///
/// A large object is a root record, a compander name object, an optional
/// compander parameter object, a chunk table, and one object per chunk.
/// Construction is all-or-nothing: every object is allocated inside a
/// transaction and undone individually if any step fails.
///
/// The engine never picks a codec itself. The compander name stored with
/// each object is resolved through the [`CompanderRegistry`], optionally via
/// a [`LargeObjectAllocator`] registered for that name.
pub struct LargeObjectStore {
    config: LargeObjectConfig,
    registry: CompanderRegistry,
    allocators: BTreeMap<String, Arc<dyn LargeObjectAllocator>>,
    fallback: Arc<dyn LargeObjectAllocator>,
    live: Mutex<Vec<LiveHandle>>,
}

impl LargeObjectStore {
    /// An engine with the built-in companders and allocators.
    pub fn new(config: LargeObjectConfig) -> Self {
        let registry = CompanderRegistry::with_defaults(config.block_size);
        Self::with_registry(config, registry)
    }

    /// An engine resolving compander names through `registry`.
    pub fn with_registry(config: LargeObjectConfig, registry: CompanderRegistry) -> Self {
        let mut allocators: BTreeMap<String, Arc<dyn LargeObjectAllocator>> = BTreeMap::new();
        allocators.insert(PIXEL_MAP_COMPANDER.to_string(), Arc::new(PixelMapAllocator));
        Self {
            config,
            registry,
            allocators,
            fallback: Arc::new(ChunkTableAllocator),
            live: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &LargeObjectConfig {
        &self.config
    }

    pub fn registry(&self) -> &CompanderRegistry {
        &self.registry
    }

    pub fn block_size(&self) -> usize {
        self.registry.block_size()
    }

    /// Use `allocator` for objects whose compander is `name`.
    pub fn register_allocator(&mut self, name: &str, allocator: impl LargeObjectAllocator + 'static) {
        self.allocators.insert(name.to_string(), Arc::new(allocator));
    }

    fn allocator(&self, name: &str) -> &dyn LargeObjectAllocator {
        self.allocators
            .get(name)
            .map_or(self.fallback.as_ref(), |a| a.as_ref())
    }

    fn chunk_len(&self, size: usize, index: usize) -> usize {
        self.block_size().min(size - index * self.block_size())
    }

    // -----------------------------------------------------------------------
    // Creation
    // -----------------------------------------------------------------------

    /// Create a large object of `opts.size` bytes.
    ///
    /// With a `pipe`, exactly `opts.size` bytes are streamed from it and
    /// compressed chunk by chunk; without one every chunk starts empty and
    /// reads as zeros. On failure nothing allocated by this call survives.
    pub fn create(
        &self,
        store: &Arc<dyn Store>,
        pipe: Option<&mut dyn Pipe>,
        opts: &CreateOptions,
        progress: Option<&mut dyn ProgressCallback>,
    ) -> LargeObjectResult<PssId> {
        let name = opts
            .compander
            .as_deref()
            .unwrap_or(&self.config.default_compander);
        let size = opts.size;
        if u32::try_from(size).is_err() {
            return Err(LargeObjectError::TooLarge(size));
        }
        let allocator = self.allocator(name);
        allocator.check_parameters(opts.parameters.as_deref())?;
        let mut compander = allocator.compander(&self.registry, name)?;

        let mut saga = Saga::begin(store.as_ref());
        let (root_id, mut root) = self.construct(
            &mut saga,
            name,
            opts.parameters.as_deref(),
            opts.read_only,
            size,
            |_| Ok(Vec::new()),
        )?;

        if let Some(pipe) = pipe {
            self.bind(compander.as_mut(), store, &root, false)?;
            let chunks = chunk_count(size, self.block_size());
            let mut tracker = ProgressTracker::new(
                progress,
                self.config.progress_frequency,
                size,
                chunks,
                opts.name.clone(),
            );
            let mut buf = vec![0u8; self.block_size()];
            for index in 0..chunks {
                let chunk = &mut buf[..self.chunk_len(size, index)];
                pipe.read_chunk(chunk)?;
                compander.write(index * self.block_size(), chunk)?;
                tracker.advance(index, chunk.len());
            }
            tracker.finish();
        }

        self.sign(store.as_ref(), root_id, &mut root)?;
        saga.commit()?;
        info!(id = %root_id, size, compander = name, "large object created");
        Ok(root_id)
    }

    /// Create a large object from a compressed backup stream.
    ///
    /// The stream's chunks are copied verbatim, so `opts.compander` and
    /// `opts.parameters` must match those of the object the stream was
    /// taken from. The object is read-only if the stream or `opts` says so.
    pub fn create_from_compressed(
        &self,
        store: &Arc<dyn Store>,
        pipe: &mut dyn Pipe,
        opts: &CreateOptions,
        progress: Option<&mut dyn ProgressCallback>,
    ) -> LargeObjectResult<PssId> {
        let flags = RootFlags::from_bits(pipe.read_u32()?);
        let size = pipe.read_size()?;
        if !flags.is_well_formed() {
            return Err(LargeObjectError::BadStream(format!(
                "header flags {:#06x} are not a large object",
                flags.bits()
            )));
        }
        let name = opts
            .compander
            .as_deref()
            .unwrap_or(&self.config.default_compander);
        let allocator = self.allocator(name);
        allocator.check_parameters(opts.parameters.as_deref())?;
        allocator.compander(&self.registry, name)?;

        let chunks = chunk_count(size, self.block_size());
        let mut tracker = ProgressTracker::new(
            progress,
            self.config.progress_frequency,
            size,
            chunks,
            opts.name.clone(),
        );
        let mut saga = Saga::begin(store.as_ref());
        let (root_id, mut root) = self.construct(
            &mut saga,
            name,
            opts.parameters.as_deref(),
            opts.read_only || flags.is_read_only(),
            size,
            |index| {
                let logical = self.chunk_len(size, index);
                let stored = pipe.read_size()?;
                if stored > logical {
                    return Err(LargeObjectError::BadStream(format!(
                        "chunk {index} holds {stored} bytes, more than its {logical} logical bytes"
                    )));
                }
                let mut bytes = vec![0u8; stored];
                pipe.read_chunk(&mut bytes)?;
                let mut pad = [0u8; PSS_ID_SIZE];
                pipe.read_chunk(&mut pad[..long_align(stored) - stored])?;
                tracker.advance(index, logical);
                Ok(bytes)
            },
        )?;
        tracker.finish();

        self.sign(store.as_ref(), root_id, &mut root)?;
        saga.commit()?;
        info!(id = %root_id, size, compander = name, "large object restored");
        Ok(root_id)
    }

    /// Allocate root, compander name, parameters, chunk table and chunks,
    /// then write the root unsigned. `chunk` supplies each chunk's stored
    /// bytes.
    fn construct(
        &self,
        saga: &mut Saga<'_>,
        name: &str,
        parms: Option<&[u8]>,
        read_only: bool,
        size: usize,
        mut chunk: impl FnMut(usize) -> LargeObjectResult<Vec<u8>>,
    ) -> LargeObjectResult<(PssId, LargeObjectRoot)> {
        let chunks = chunk_count(size, self.block_size());
        let root_id = saga.new_object(LARGE_OBJECT_ROOT_SIZE)?;
        let name_id = saga.new_object_with(name.as_bytes())?;
        let parms_id = match parms {
            Some(parms) => saga.new_object_with(parms)?,
            None => NO_PSS_ID,
        };
        let table_id = saga.new_object(chunks * PSS_ID_SIZE)?;

        let mut ids = Vec::with_capacity(chunks);
        for index in 0..chunks {
            let bytes = chunk(index)?;
            ids.push(saga.new_object_with(&bytes)?);
        }
        if !ids.is_empty() {
            saga.store().write(table_id, 0, &PssId::encode_table(&ids))?;
        }

        let root = LargeObjectRoot::new(table_id, name_id, parms_id, read_only, size);
        saga.store().write(root_id, 0, &root.to_bytes()?)?;
        debug!(id = %root_id, table = %table_id, chunks, "large object skeleton written");
        Ok((root_id, root))
    }

    fn sign(&self, store: &dyn Store, root_id: PssId, root: &mut LargeObjectRoot) -> LargeObjectResult<()> {
        root.sign();
        store.write(root_id, 0, &root.to_bytes()?)?;
        Ok(())
    }

    fn bind(
        &self,
        compander: &mut dyn StoreCompander,
        store: &Arc<dyn Store>,
        root: &LargeObjectRoot,
        read_only: bool,
    ) -> LargeObjectResult<()> {
        compander.init(
            Arc::clone(store),
            root.package.data_id,
            root.package.compander_parms_id,
            self.config.shared_companders,
            read_only,
        )?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Reading the object graph
    // -----------------------------------------------------------------------

    fn read_table(&self, store: &dyn Store, root: &LargeObjectRoot) -> LargeObjectResult<Vec<PssId>> {
        let table_id = root.package.data_id;
        let size = store.object_size(table_id)?;
        let expected = chunk_count(root.actual_size, self.block_size()) * PSS_ID_SIZE;
        if size != expected {
            return Err(StoreError::BadPackage(format!(
                "chunk table {table_id} is {size} bytes, expected {expected}"
            ))
            .into());
        }
        let mut cache = CachedReadStore::with_limit(store, table_id, size, self.config.cache_limit);
        let bytes = cache.get_data(0, size)?;
        PssId::decode_table(bytes)
            .map_err(|e| StoreError::BadPackage(format!("chunk table {table_id}: {e}")).into())
    }

    fn read_parts(&self, store: &dyn Store, id: PssId) -> LargeObjectResult<Parts> {
        let root = LargeObjectRoot::load_valid(store, id)?;
        let name = String::from_utf8(store.read_object(root.package.compander_name_id)?)
            .map_err(|_| StoreError::BadPackage(format!("compander name of {id} is not UTF-8")))?;
        let parms = match root.package.compander_parms_id {
            parms_id if parms_id.is_some() => Some(store.read_object(parms_id)?),
            _ => None,
        };
        let table = self.read_table(store, &root)?;
        Ok(Parts {
            root,
            name,
            parms,
            table,
        })
    }

    /// A root-shaped object, signed or not, whose chunk table checks out.
    fn probe_root(&self, store: &dyn Store, id: PssId) -> Option<LargeObjectRoot> {
        if store.object_size(id).ok()? != LARGE_OBJECT_ROOT_SIZE {
            return None;
        }
        let root = LargeObjectRoot::load(store, id).ok()?;
        let plausible = root.package.flags.is_well_formed()
            && root.reserved1 == 0
            && root.reserved2 == 0
            && (root.package.signature == 0 || root.is_signed())
            && store.owns_object(root.package.compander_name_id)
            && self.read_table(store, &root).is_ok();
        plausible.then_some(root)
    }

    fn roots(&self, store: &dyn Store) -> LargeObjectResult<Vec<(PssId, LargeObjectRoot)>> {
        let mut found = Vec::new();
        let mut id = store.next_object(NO_PSS_ID)?;
        while id.is_some() {
            if let Some(root) = self.probe_root(store, id) {
                found.push((id, root));
            }
            id = store.next_object(id)?;
        }
        Ok(found)
    }

    // -----------------------------------------------------------------------
    // Open handles
    // -----------------------------------------------------------------------

    /// Open the large object rooted at `id`.
    pub fn open(&self, store: &Arc<dyn Store>, id: PssId) -> LargeObjectResult<LargeObject> {
        let parts = self.read_parts(store.as_ref(), id)?;
        let read_only = parts.root.is_read_only() || store.is_read_only();
        let mut compander = self
            .allocator(&parts.name)
            .compander(&self.registry, &parts.name)?;
        self.bind(compander.as_mut(), store, &parts.root, read_only)?;

        let handle = LargeObject::new(id, HandleState::new(compander, parts.root.actual_size));
        let mut live = self.live.lock().unwrap_or_else(PoisonError::into_inner);
        live.retain(|h| h.state.strong_count() > 0);
        live.push(LiveHandle {
            store: store.signature(),
            id,
            state: Arc::downgrade(handle.shared_state()),
        });
        debug!(id = %id, size = parts.root.actual_size, compander = %parts.name, read_only, "large object opened");
        Ok(handle)
    }

    /// Push staged writes of every open handle on `id` through to the store.
    fn flush_live(&self, store: &dyn Store, id: PssId) -> LargeObjectResult<()> {
        let signature = store.signature();
        let states: Vec<_> = {
            let mut live = self.live.lock().unwrap_or_else(PoisonError::into_inner);
            live.retain(|h| h.state.strong_count() > 0);
            live.iter()
                .filter(|h| h.store == signature && h.id == id)
                .filter_map(|h| h.state.upgrade())
                .collect()
        };
        for state in states {
            state.lock().unwrap_or_else(PoisonError::into_inner).flush()?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Deletion
    // -----------------------------------------------------------------------

    /// Delete the object rooted at `id` and everything it references.
    ///
    /// Not transactional: a failure part-way leaves the rest in place.
    pub fn delete(&self, store: &dyn Store, id: PssId) -> LargeObjectResult<()> {
        self.flush_live(store, id)?;
        let root = LargeObjectRoot::load_valid(store, id)?;
        let chunks = self.remove_objects(store, id, &root, false)?;
        info!(id = %id, chunks, "large object deleted");
        Ok(())
    }

    fn remove_objects(
        &self,
        store: &dyn Store,
        id: PssId,
        root: &LargeObjectRoot,
        lenient: bool,
    ) -> LargeObjectResult<usize> {
        let remove = |target: PssId| -> LargeObjectResult<()> {
            match store.delete_object(target) {
                Err(e) if lenient && e.is_not_found() => Ok(()),
                other => Ok(other?),
            }
        };
        let table = match self.read_table(store, root) {
            Ok(table) => table,
            Err(e) if lenient => {
                warn!(id = %id, error = %e, "unreadable chunk table, chunks left behind");
                Vec::new()
            }
            Err(e) => return Err(e),
        };
        let mut removed = 0;
        for &chunk in table.iter().filter(|c| c.is_some()) {
            remove(chunk)?;
            removed += 1;
        }
        for target in root.referenced_ids().collect::<Vec<_>>().into_iter().rev() {
            remove(target)?;
        }
        remove(id)?;
        Ok(removed)
    }

    /// Delete every root left unsigned by an interrupted construction,
    /// together with its objects. Returns how many were removed.
    ///
    /// Roots with a pending undo record belong to a construction still in
    /// progress and are skipped.
    pub fn collect_garbage(&self, store: &dyn Store) -> LargeObjectResult<usize> {
        let mut removed = 0;
        for (id, root) in self.roots(store)? {
            if root.is_signed() || store.in_separate_transaction(id) {
                continue;
            }
            warn!(id = %id, "removing interrupted large object");
            self.remove_objects(store, id, &root, true)?;
            removed += 1;
        }
        if removed > 0 {
            info!(removed, "garbage collected");
        }
        Ok(removed)
    }

    // -----------------------------------------------------------------------
    // Copies and streams
    // -----------------------------------------------------------------------

    /// Deep-copy the object rooted at `id` into `into`, which may be the
    /// same store. On failure `into` is left as it was.
    pub fn duplicate(&self, store: &dyn Store, id: PssId, into: &dyn Store) -> LargeObjectResult<PssId> {
        self.flush_live(store, id)?;
        let parts = self.read_parts(store, id)?;
        let size = parts.root.actual_size;

        let mut saga = Saga::begin(into);
        let (copy_id, mut root) = self.construct(
            &mut saga,
            &parts.name,
            parts.parms.as_deref(),
            parts.root.is_read_only(),
            size,
            |index| match parts.table[index] {
                chunk if chunk.is_some() => Ok(store.read_object(chunk)?),
                _ => Ok(Vec::new()),
            },
        )?;
        self.sign(into, copy_id, &mut root)?;
        saga.commit()?;
        info!(id = %id, copy = %copy_id, size, "large object duplicated");
        Ok(copy_id)
    }

    /// Large objects cannot be resized in place.
    pub fn resize(&self, store: &dyn Store, id: PssId, _size: usize) -> LargeObjectResult<()> {
        LargeObjectRoot::load_valid(store, id)?;
        Err(StoreError::WriteProtected.into())
    }

    /// Bytes the object occupies in the store: root, compander objects,
    /// chunk table, and every chunk's stored form.
    pub fn storage_size(&self, store: &dyn Store, id: PssId) -> LargeObjectResult<usize> {
        let root = LargeObjectRoot::load_valid(store, id)?;
        let mut total = store.object_size(id)?;
        for part in root.referenced_ids() {
            total += store.object_size(part)?;
        }
        for chunk in self.read_table(store, &root)? {
            if chunk.is_some() {
                total += store.object_size(chunk)?;
            }
        }
        Ok(total)
    }

    /// Length of the backup stream for `id`.
    ///
    /// Compressed records are a four-byte length and the stored bytes,
    /// padded to four bytes.
    pub fn size_of_stream(&self, store: &dyn Store, id: PssId, compressed: bool) -> LargeObjectResult<usize> {
        let root = LargeObjectRoot::load_valid(store, id)?;
        if !compressed {
            return Ok(STREAM_HEADER_SIZE + root.actual_size);
        }
        let mut total = STREAM_HEADER_SIZE;
        for chunk in self.read_table(store, &root)? {
            let stored = if chunk.is_some() {
                store.object_size(chunk)?
            } else {
                0
            };
            total += long_align(PSS_ID_SIZE + stored);
        }
        Ok(total)
    }

    /// Write the object rooted at `id` to `pipe`: a `(flags, size)` header,
    /// then each chunk's stored form framed by its length and padded to four
    /// bytes (`compressed`), or the decompressed content as one run. Returns
    /// the bytes written.
    pub fn backup(
        &self,
        pipe: &mut dyn Pipe,
        store: &Arc<dyn Store>,
        id: PssId,
        compressed: bool,
        progress: Option<&mut dyn ProgressCallback>,
    ) -> LargeObjectResult<usize> {
        self.flush_live(store.as_ref(), id)?;
        let parts = self.read_parts(store.as_ref(), id)?;
        let size = parts.root.actual_size;
        let mut tracker = ProgressTracker::new(
            progress,
            self.config.progress_frequency,
            size,
            parts.table.len(),
            None,
        );

        pipe.write_u32(parts.root.package.flags.bits())?;
        pipe.write_size(size)?;
        let mut written = STREAM_HEADER_SIZE;

        if compressed {
            for (index, &chunk) in parts.table.iter().enumerate() {
                let bytes = if chunk.is_some() {
                    store.read_object(chunk)?
                } else {
                    Vec::new()
                };
                let padded = long_align(bytes.len());
                pipe.write_size(bytes.len())?;
                pipe.write_chunk(&bytes)?;
                pipe.write_chunk(&[0u8; PSS_ID_SIZE][..padded - bytes.len()])?;
                written += PSS_ID_SIZE + padded;
                tracker.advance(index, self.chunk_len(size, index));
            }
        } else {
            let mut compander = self
                .allocator(&parts.name)
                .compander(&self.registry, &parts.name)?;
            self.bind(compander.as_mut(), store, &parts.root, true)?;
            let mut buf = vec![0u8; self.block_size()];
            for index in 0..parts.table.len() {
                let chunk = &mut buf[..self.chunk_len(size, index)];
                compander.read(index * self.block_size(), chunk)?;
                pipe.write_chunk(chunk)?;
                written += chunk.len();
                tracker.advance(index, chunk.len());
            }
        }
        pipe.flush()?;
        tracker.finish();
        info!(id = %id, compressed, bytes = written, "large object backed up");
        Ok(written)
    }

    // -----------------------------------------------------------------------
    // Inspection
    // -----------------------------------------------------------------------

    /// Summarise the object rooted at `id`.
    pub fn info(&self, store: &dyn Store, id: PssId) -> LargeObjectResult<LargeObjectInfo> {
        let parts = self.read_parts(store, id)?;
        let mut stored_chunks = 0;
        for &chunk in &parts.table {
            if chunk.is_some() && store.object_size(chunk)? > 0 {
                stored_chunks += 1;
            }
        }
        Ok(LargeObjectInfo {
            id,
            size: parts.root.actual_size,
            chunks: parts.table.len(),
            stored_chunks,
            compander: parts.name,
            read_only: parts.root.is_read_only(),
            storage_size: self.storage_size(store, id)?,
        })
    }

    /// Root ids of every valid large object in `store`, ascending.
    pub fn list(&self, store: &dyn Store) -> LargeObjectResult<Vec<PssId>> {
        Ok(self
            .roots(store)?
            .into_iter()
            .filter(|(_, root)| root.is_signed())
            .map(|(id, _)| id)
            .collect())
    }
}

impl Default for LargeObjectStore {
    fn default() -> Self {
        Self::new(LargeObjectConfig::default())
    }
}

impl std::fmt::Debug for LargeObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LargeObjectStore")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .field("allocators", &self.allocators.keys().collect::<Vec<_>>())
            .finish()
    }
}
