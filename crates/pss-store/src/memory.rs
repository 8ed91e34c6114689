use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use pss_types::{PssId, NO_PSS_ID};
use tracing::{debug, warn};

use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::image::StoreImage;
use crate::traits::Store;

/// Source of per-instance store signatures.
static NEXT_SIGNATURE: AtomicU32 = AtomicU32::new(1);

/// Id of the root object every in-memory store starts with.
pub const ROOT_ID: PssId = PssId::new(1);

/// How to undo one object's changes inside a transaction.
#[derive(Clone, Debug)]
enum UndoRecord {
    /// The object was allocated inside the transaction: delete it.
    Created,
    /// The object existed: restore these bytes.
    Modified(Vec<u8>),
}

#[derive(Debug)]
pub(crate) struct StoreState {
    pub(crate) objects: BTreeMap<PssId, Vec<u8>>,
    pub(crate) next_id: u32,
    used: usize,
    undo: BTreeMap<PssId, UndoRecord>,
    in_transaction: bool,
    lock_count: u32,
    read_only_unlocked: bool,
    fail_after: Option<usize>,
    buddy: Option<u32>,
}

impl StoreState {
    fn fresh() -> Self {
        let mut objects = BTreeMap::new();
        objects.insert(ROOT_ID, Vec::new());
        Self {
            objects,
            next_id: ROOT_ID.get() + 1,
            used: 0,
            undo: BTreeMap::new(),
            in_transaction: false,
            lock_count: 0,
            read_only_unlocked: false,
            fail_after: None,
            buddy: None,
        }
    }

    fn object(&self, id: PssId) -> StoreResult<&Vec<u8>> {
        self.objects.get(&id).ok_or(StoreError::ObjectNotFound(id))
    }

    fn mint(&mut self) -> PssId {
        let id = PssId::new(self.next_id);
        self.next_id += 1;
        id
    }

    /// Check that resizing an object from `old` to `new` bytes fits.
    fn reserve(&self, capacity: usize, old: usize, new: usize) -> StoreResult<()> {
        if new > old && self.used - old + new > capacity {
            return Err(StoreError::NoMemory);
        }
        Ok(())
    }

    /// Consume one armed fault, failing the current call when it fires.
    fn trip_fault(&mut self) -> StoreResult<()> {
        match self.fail_after {
            Some(0) => {
                self.fail_after = None;
                warn!("injected store fault");
                Err(StoreError::NoMemory)
            }
            Some(n) => {
                self.fail_after = Some(n - 1);
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn install(&mut self, id: PssId, bytes: Vec<u8>) {
        let old = self.objects.insert(id, bytes.clone()).map_or(0, |v| v.len());
        self.used = self.used - old + bytes.len();
    }

    fn remove(&mut self, id: PssId) -> Option<Vec<u8>> {
        let removed = self.objects.remove(&id)?;
        self.used -= removed.len();
        Some(removed)
    }

    fn apply_undo(&mut self, id: PssId, record: UndoRecord) {
        match record {
            UndoRecord::Created => {
                self.remove(id);
            }
            UndoRecord::Modified(previous) => self.install(id, previous),
        }
    }

    fn record(&mut self, id: PssId) -> StoreResult<()> {
        let current = self.object(id)?.clone();
        self.in_transaction = true;
        self.undo
            .entry(id)
            .or_insert(UndoRecord::Modified(current));
        Ok(())
    }
}

/// In-memory store backed by a `BTreeMap`.
///
/// Intended for tests, embedding, and as the working copy of a persisted
/// store image. All state lives behind a `RwLock`. Object contents are
/// counted against [`StoreConfig::capacity`].
pub struct InMemoryStore {
    state: RwLock<StoreState>,
    config: StoreConfig,
    signature: u32,
}

impl InMemoryStore {
    /// Create an empty store with the default configuration.
    pub fn new() -> Self {
        Self::with_config(StoreConfig::default())
    }

    /// Create an empty store with the given configuration.
    pub fn with_config(config: StoreConfig) -> Self {
        Self::from_state(StoreState::fresh(), config)
    }

    fn from_state(state: StoreState, config: StoreConfig) -> Self {
        Self {
            state: RwLock::new(state),
            config,
            signature: NEXT_SIGNATURE.fetch_add(1, Ordering::Relaxed),
        }
    }

    pub(crate) fn from_image(image: StoreImage, config: StoreConfig) -> StoreResult<Self> {
        let mut state = StoreState::fresh();
        state.objects.clear();
        for (raw, bytes) in image.objects {
            let id = PssId::new(raw);
            if id.is_none() || raw >= image.next_id {
                return Err(StoreError::CorruptImage(format!(
                    "object id {raw} outside allocated range"
                )));
            }
            state.install(id, bytes);
        }
        if !state.objects.contains_key(&ROOT_ID) {
            return Err(StoreError::CorruptImage("missing root object".into()));
        }
        state.next_id = image.next_id;
        Ok(Self::from_state(state, config))
    }

    pub(crate) fn to_image(&self) -> StoreImage {
        let state = self.read_state();
        if state.in_transaction {
            warn!(
                pending = state.undo.len(),
                "saving store image with an open transaction"
            );
        }
        StoreImage {
            next_id: state.next_id,
            objects: state
                .objects
                .iter()
                .map(|(id, bytes)| (id.get(), bytes.clone()))
                .collect(),
        }
    }

    /// The configuration this store was built with.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Number of live objects, the root included.
    pub fn object_count(&self) -> usize {
        self.read_state().objects.len()
    }

    /// Total bytes held by live objects.
    pub fn used_bytes(&self) -> usize {
        self.read_state().used
    }

    /// Sorted list of every live object id.
    pub fn all_ids(&self) -> Vec<PssId> {
        self.read_state().objects.keys().copied().collect()
    }

    /// Arm a one-shot fault: the `n`-th subsequent mutating call (counting
    /// from zero) fails with [`StoreError::NoMemory`].
    pub fn fail_after(&self, n: usize) {
        self.write_state().fail_after = Some(n);
    }

    /// Disarm any pending fault. Returns `true` if one was still armed.
    pub fn clear_fault(&self) -> bool {
        self.write_state().fail_after.take().is_some()
    }

    /// The signature of the buddy store, if one was set.
    pub fn buddy(&self) -> Option<u32> {
        self.read_state().buddy
    }

    fn read_state(&self) -> RwLockReadGuard<'_, StoreState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, StoreState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_writable(&self, state: &StoreState) -> StoreResult<()> {
        if self.config.rom || (self.config.read_only && !state.read_only_unlocked) {
            return Err(StoreError::WriteProtected);
        }
        Ok(())
    }

    /// Lock for a mutating object call: write protection, then faults.
    fn mutate(&self) -> StoreResult<RwLockWriteGuard<'_, StoreState>> {
        let mut state = self.write_state();
        self.check_writable(&state)?;
        state.trip_fault()?;
        Ok(state)
    }

    /// Lock for a transaction call: write protection only.
    fn transact(&self) -> StoreResult<RwLockWriteGuard<'_, StoreState>> {
        let state = self.write_state();
        self.check_writable(&state)?;
        Ok(state)
    }

    fn allocate(&self, size: usize, within_transaction: bool) -> StoreResult<PssId> {
        let mut state = self.mutate()?;
        state.reserve(self.config.capacity, 0, size)?;
        let id = state.mint();
        state.install(id, vec![0u8; size]);
        if within_transaction {
            state.undo.insert(id, UndoRecord::Created);
            state.in_transaction = true;
        }
        debug!(id = %id, size, within_transaction, "new object");
        Ok(id)
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn check_range(offset: usize, len: usize, size: usize) -> StoreResult<()> {
    match offset.checked_add(len) {
        Some(end) if end <= size => Ok(()),
        _ => Err(StoreError::ObjectOverRun { offset, len, size }),
    }
}

impl Store for InMemoryStore {
    fn root_id(&self) -> StoreResult<PssId> {
        Ok(ROOT_ID)
    }

    fn new_object(&self, size: usize) -> StoreResult<PssId> {
        self.allocate(size, false)
    }

    fn erase_object(&self, id: PssId) -> StoreResult<()> {
        let mut state = self.mutate()?;
        state.object(id)?;
        state.install(id, Vec::new());
        Ok(())
    }

    fn delete_object(&self, id: PssId) -> StoreResult<()> {
        let mut state = self.mutate()?;
        state.remove(id).ok_or(StoreError::ObjectNotFound(id))?;
        if matches!(state.undo.get(&id), Some(UndoRecord::Created)) {
            state.undo.remove(&id);
        }
        debug!(id = %id, "delete object");
        Ok(())
    }

    fn set_object_size(&self, id: PssId, size: usize) -> StoreResult<()> {
        let mut state = self.mutate()?;
        let old = state.object(id)?.len();
        state.reserve(self.config.capacity, old, size)?;
        let mut bytes = state.object(id)?.clone();
        bytes.resize(size, 0);
        state.install(id, bytes);
        Ok(())
    }

    fn object_size(&self, id: PssId) -> StoreResult<usize> {
        Ok(self.read_state().object(id)?.len())
    }

    fn read(&self, id: PssId, offset: usize, buf: &mut [u8]) -> StoreResult<()> {
        let state = self.read_state();
        let bytes = state.object(id)?;
        check_range(offset, buf.len(), bytes.len())?;
        buf.copy_from_slice(&bytes[offset..offset + buf.len()]);
        Ok(())
    }

    fn write(&self, id: PssId, offset: usize, data: &[u8]) -> StoreResult<()> {
        let mut state = self.mutate()?;
        let bytes = state
            .objects
            .get_mut(&id)
            .ok_or(StoreError::ObjectNotFound(id))?;
        check_range(offset, data.len(), bytes.len())?;
        bytes[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn replace_object(&self, id: PssId, data: &[u8]) -> StoreResult<()> {
        let mut state = self.mutate()?;
        let old = state.object(id)?.len();
        state.reserve(self.config.capacity, old, data.len())?;
        state.install(id, data.to_vec());
        Ok(())
    }

    fn next_object(&self, id: PssId) -> StoreResult<PssId> {
        let state = self.read_state();
        Ok(state
            .objects
            .range((Bound::Excluded(id), Bound::Unbounded))
            .next()
            .map_or(NO_PSS_ID, |(next, _)| *next))
    }

    fn owns_object(&self, id: PssId) -> bool {
        self.read_state().objects.contains_key(&id)
    }

    fn store_size(&self) -> StoreResult<(usize, usize)> {
        Ok((self.config.capacity, self.read_state().used))
    }

    fn is_read_only(&self) -> bool {
        self.config.rom || (self.config.read_only && !self.read_state().read_only_unlocked)
    }

    fn is_rom(&self) -> bool {
        self.config.rom
    }

    fn unlock_read_only(&self, unlocked: bool) -> StoreResult<()> {
        if self.config.rom {
            return Err(StoreError::WriteProtected);
        }
        self.write_state().read_only_unlocked = unlocked;
        Ok(())
    }

    fn lock_store(&self) -> StoreResult<()> {
        self.write_state().lock_count += 1;
        Ok(())
    }

    fn unlock_store(&self) -> StoreResult<()> {
        let mut state = self.write_state();
        if state.lock_count == 0 {
            return Err(StoreError::IntegrityViolation(
                "unlock_store without matching lock_store".into(),
            ));
        }
        state.lock_count -= 1;
        Ok(())
    }

    fn is_locked(&self) -> bool {
        self.read_state().lock_count > 0
    }

    fn store_kind(&self) -> &'static str {
        "Internal"
    }

    fn signature(&self) -> u32 {
        self.signature
    }

    fn set_buddy(&self, buddy: Option<u32>) -> StoreResult<()> {
        self.write_state().buddy = buddy;
        Ok(())
    }

    fn format(&self) -> StoreResult<()> {
        let mut state = self.transact()?;
        let lock_count = state.lock_count;
        *state = StoreState::fresh();
        state.lock_count = lock_count;
        debug!(signature = self.signature, "store formatted");
        Ok(())
    }

    fn check_integrity(&self) -> StoreResult<()> {
        let state = self.read_state();
        let used: usize = state.objects.values().map(Vec::len).sum();
        if used != state.used {
            return Err(StoreError::IntegrityViolation(format!(
                "used bytes {} but objects hold {used}",
                state.used
            )));
        }
        if used > self.config.capacity {
            return Err(StoreError::IntegrityViolation(format!(
                "used bytes {used} exceed capacity {}",
                self.config.capacity
            )));
        }
        for (id, record) in &state.undo {
            if matches!(record, UndoRecord::Created) && !state.objects.contains_key(id) {
                return Err(StoreError::IntegrityViolation(format!(
                    "undo record for missing object {id}"
                )));
            }
        }
        if !state.undo.is_empty() && !state.in_transaction {
            return Err(StoreError::IntegrityViolation(
                "undo records outside a transaction".into(),
            ));
        }
        Ok(())
    }

    fn new_within_transaction(&self, size: usize) -> StoreResult<PssId> {
        self.allocate(size, true)
    }

    fn start_transaction_against(&self, id: PssId) -> StoreResult<()> {
        self.transact()?.record(id)
    }

    fn add_to_current_transaction(&self, id: PssId) -> StoreResult<()> {
        self.transact()?.record(id)
    }

    fn separately_abort(&self, id: PssId) -> StoreResult<()> {
        let mut state = self.transact()?;
        match state.undo.remove(&id) {
            Some(record) => {
                debug!(id = %id, ?record, "separately abort");
                state.apply_undo(id, record);
            }
            None => debug!(id = %id, "separately abort: nothing recorded"),
        }
        if state.undo.is_empty() {
            state.in_transaction = false;
        }
        Ok(())
    }

    fn abort(&self) -> StoreResult<()> {
        let mut state = self.transact()?;
        let undo = std::mem::take(&mut state.undo);
        if !undo.is_empty() {
            warn!(records = undo.len(), "aborting transaction");
        }
        for (id, record) in undo.into_iter().rev() {
            state.apply_undo(id, record);
        }
        state.in_transaction = false;
        Ok(())
    }

    fn commit(&self) -> StoreResult<()> {
        let mut state = self.transact()?;
        state.undo.clear();
        state.in_transaction = false;
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.read_state().in_transaction
    }

    fn in_separate_transaction(&self, id: PssId) -> bool {
        self.read_state().undo.contains_key(&id)
    }
}

impl std::fmt::Debug for InMemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.read_state();
        f.debug_struct("InMemoryStore")
            .field("signature", &self.signature)
            .field("object_count", &state.objects.len())
            .field("used", &state.used)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with(bytes: &[u8]) -> (InMemoryStore, PssId) {
        let store = InMemoryStore::new();
        let id = store.new_object(bytes.len()).unwrap();
        store.write(id, 0, bytes).unwrap();
        (store, id)
    }

    // -----------------------------------------------------------------------
    // Core CRUD
    // -----------------------------------------------------------------------

    #[test]
    fn new_store_has_empty_root() {
        let store = InMemoryStore::new();
        let root = store.root_id().unwrap();
        assert_eq!(root, ROOT_ID);
        assert_eq!(store.object_size(root).unwrap(), 0);
        assert_eq!(store.object_count(), 1);
    }

    #[test]
    fn new_object_is_zero_filled() {
        let store = InMemoryStore::new();
        let id = store.new_object(16).unwrap();
        assert_eq!(store.read_object(id).unwrap(), vec![0u8; 16]);
        assert_eq!(store.used_bytes(), 16);
    }

    #[test]
    fn write_and_read_back() {
        let (store, id) = store_with(b"hello world");
        let mut buf = [0u8; 5];
        store.read(id, 6, &mut buf).unwrap();
        assert_eq!(&buf, b"world");
    }

    #[test]
    fn ids_are_unique() {
        let store = InMemoryStore::new();
        let a = store.new_object(0).unwrap();
        let b = store.new_object(0).unwrap();
        assert_ne!(a, b);
        assert!(a.is_some() && b.is_some());
    }

    #[test]
    fn read_past_end_is_overrun() {
        let (store, id) = store_with(b"abc");
        let mut buf = [0u8; 4];
        let err = store.read(id, 0, &mut buf).unwrap_err();
        assert!(matches!(
            err,
            StoreError::ObjectOverRun { offset: 0, len: 4, size: 3 }
        ));
    }

    #[test]
    fn write_past_end_is_overrun() {
        let (store, id) = store_with(b"abc");
        assert!(matches!(
            store.write(id, 2, b"xy").unwrap_err(),
            StoreError::ObjectOverRun { .. }
        ));
        assert_eq!(store.read_object(id).unwrap(), b"abc");
    }

    #[test]
    fn missing_object_errors() {
        let store = InMemoryStore::new();
        let id = PssId::new(999);
        assert!(store.object_size(id).unwrap_err().is_not_found());
        assert!(store.delete_object(id).unwrap_err().is_not_found());
        assert!(!store.owns_object(id));
    }

    #[test]
    fn erase_keeps_identity() {
        let (store, id) = store_with(b"payload");
        store.erase_object(id).unwrap();
        assert!(store.owns_object(id));
        assert_eq!(store.object_size(id).unwrap(), 0);
        assert_eq!(store.used_bytes(), 0);
    }

    #[test]
    fn set_object_size_grows_and_shrinks() {
        let (store, id) = store_with(b"abcd");
        store.set_object_size(id, 6).unwrap();
        assert_eq!(store.read_object(id).unwrap(), b"abcd\0\0");
        store.set_object_size(id, 2).unwrap();
        assert_eq!(store.read_object(id).unwrap(), b"ab");
        assert_eq!(store.used_bytes(), 2);
    }

    #[test]
    fn replace_object_resizes() {
        let (store, id) = store_with(b"short");
        store.replace_object(id, b"a longer payload").unwrap();
        assert_eq!(store.read_object(id).unwrap(), b"a longer payload");
        assert_eq!(store.used_bytes(), 16);
    }

    #[test]
    fn delete_frees_space() {
        let (store, id) = store_with(&[1u8; 100]);
        store.delete_object(id).unwrap();
        assert_eq!(store.used_bytes(), 0);
        assert_eq!(store.object_count(), 1);
    }

    // -----------------------------------------------------------------------
    // Capacity and protection
    // -----------------------------------------------------------------------

    #[test]
    fn allocation_beyond_capacity_fails() {
        let store = InMemoryStore::with_config(StoreConfig::with_capacity(10));
        let id = store.new_object(8).unwrap();
        assert!(store.new_object(3).unwrap_err().is_no_memory());
        assert!(store.set_object_size(id, 11).unwrap_err().is_no_memory());
        store.set_object_size(id, 10).unwrap();
        assert_eq!(store.store_size().unwrap(), (10, 10));
    }

    #[test]
    fn read_only_store_rejects_mutation() {
        let store = InMemoryStore::with_config(StoreConfig {
            read_only: true,
            ..Default::default()
        });
        assert!(store.is_read_only());
        assert!(matches!(
            store.new_object(1).unwrap_err(),
            StoreError::WriteProtected
        ));

        store.unlock_read_only(true).unwrap();
        assert!(!store.is_read_only());
        store.new_object(1).unwrap();

        store.unlock_read_only(false).unwrap();
        assert!(store.is_read_only());
    }

    #[test]
    fn rom_cannot_be_unlocked() {
        let store = InMemoryStore::with_config(StoreConfig {
            rom: true,
            ..Default::default()
        });
        assert!(store.is_rom());
        assert!(matches!(
            store.unlock_read_only(true).unwrap_err(),
            StoreError::WriteProtected
        ));
        assert!(matches!(store.format().unwrap_err(), StoreError::WriteProtected));
    }

    #[test]
    fn lock_store_is_reentrant() {
        let store = InMemoryStore::new();
        store.lock_store().unwrap();
        store.lock_store().unwrap();
        store.unlock_store().unwrap();
        assert!(store.is_locked());
        store.unlock_store().unwrap();
        assert!(!store.is_locked());
        assert!(store.unlock_store().is_err());
    }

    // -----------------------------------------------------------------------
    // Enumeration and housekeeping
    // -----------------------------------------------------------------------

    #[test]
    fn next_object_enumerates_in_order() {
        let store = InMemoryStore::new();
        let a = store.new_object(0).unwrap();
        let b = store.new_object(0).unwrap();

        let mut seen = Vec::new();
        let mut id = store.next_object(NO_PSS_ID).unwrap();
        while id.is_some() {
            seen.push(id);
            id = store.next_object(id).unwrap();
        }
        assert_eq!(seen, vec![ROOT_ID, a, b]);
    }

    #[test]
    fn format_resets_everything() {
        let (store, id) = store_with(b"data");
        store.format().unwrap();
        assert!(!store.owns_object(id));
        assert_eq!(store.object_count(), 1);
        assert_eq!(store.used_bytes(), 0);
        store.check_integrity().unwrap();
    }

    #[test]
    fn xip_is_not_implemented() {
        let store = InMemoryStore::new();
        assert!(matches!(
            store.new_xip_object(4).unwrap_err(),
            StoreError::CallNotImplemented(_)
        ));
        assert!(store.address(ROOT_ID).is_err());
    }

    #[test]
    fn signatures_distinguish_instances() {
        let a = InMemoryStore::new();
        let b = InMemoryStore::new();
        assert!(a.is_same_store(&a));
        assert!(!a.is_same_store(&b));
        a.set_buddy(Some(b.signature())).unwrap();
        assert_eq!(a.buddy(), Some(b.signature()));
    }

    // -----------------------------------------------------------------------
    // Transactions
    // -----------------------------------------------------------------------

    #[test]
    fn abort_deletes_objects_created_within_transaction() {
        let store = InMemoryStore::new();
        let id = store.new_within_transaction(32).unwrap();
        assert!(store.in_transaction());
        assert!(store.in_separate_transaction(id));

        store.abort().unwrap();
        assert!(!store.owns_object(id));
        assert!(!store.in_transaction());
        assert_eq!(store.used_bytes(), 0);
    }

    #[test]
    fn abort_restores_modified_objects() {
        let (store, id) = store_with(b"before");
        store.start_transaction_against(id).unwrap();
        store.replace_object(id, b"after, and longer").unwrap();
        store.abort().unwrap();
        assert_eq!(store.read_object(id).unwrap(), b"before");
        assert_eq!(store.used_bytes(), 6);
    }

    #[test]
    fn abort_restores_deleted_objects() {
        let (store, id) = store_with(b"keep me");
        store.start_transaction_against(id).unwrap();
        store.delete_object(id).unwrap();
        store.abort().unwrap();
        assert_eq!(store.read_object(id).unwrap(), b"keep me");
    }

    #[test]
    fn separately_abort_touches_one_object() {
        let store = InMemoryStore::new();
        let a = store.new_within_transaction(4).unwrap();
        let b = store.new_within_transaction(4).unwrap();

        store.separately_abort(a).unwrap();
        assert!(!store.owns_object(a));
        assert!(store.owns_object(b));
        assert!(store.in_transaction());

        store.separately_abort(b).unwrap();
        assert!(!store.in_transaction());
    }

    #[test]
    fn separately_abort_without_record_is_noop() {
        let (store, id) = store_with(b"x");
        store.separately_abort(id).unwrap();
        assert!(store.owns_object(id));
    }

    #[test]
    fn commit_keeps_changes() {
        let store = InMemoryStore::new();
        let id = store.new_within_transaction(4).unwrap();
        store.commit().unwrap();
        assert!(!store.in_transaction());
        assert!(!store.in_separate_transaction(id));
        store.abort().unwrap();
        assert!(store.owns_object(id));
    }

    #[test]
    fn deleting_a_provisional_object_drops_its_record() {
        let store = InMemoryStore::new();
        let id = store.new_within_transaction(4).unwrap();
        store.delete_object(id).unwrap();
        assert!(!store.in_separate_transaction(id));
        store.check_integrity().unwrap();
        store.abort().unwrap();
        assert!(!store.owns_object(id));
    }

    #[test]
    fn add_to_current_transaction_records_preimage() {
        let (store, id) = store_with(b"one");
        let other = store.new_within_transaction(0).unwrap();
        store.add_to_current_transaction(id).unwrap();
        store.write(id, 0, b"two").unwrap();
        store.abort().unwrap();
        assert!(!store.owns_object(other));
        assert_eq!(store.read_object(id).unwrap(), b"one");
    }

    // -----------------------------------------------------------------------
    // Fault injection
    // -----------------------------------------------------------------------

    #[test]
    fn fault_fires_once_on_nth_mutation() {
        let store = InMemoryStore::new();
        store.fail_after(1);
        store.new_object(1).unwrap();
        assert!(store.new_object(1).unwrap_err().is_no_memory());
        store.new_object(1).unwrap();
        assert!(!store.clear_fault());
    }

    #[test]
    fn reads_do_not_consume_faults() {
        let (store, id) = store_with(b"abc");
        store.fail_after(0);
        store.read_object(id).unwrap();
        store.object_size(id).unwrap();
        assert!(store.clear_fault());
    }

    // -----------------------------------------------------------------------
    // Concurrency
    // -----------------------------------------------------------------------

    #[test]
    fn concurrent_allocations_are_safe() {
        use std::sync::Arc;
        use std::thread;

        let store = Arc::new(InMemoryStore::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for _ in 0..50 {
                        let id = store.new_object(8).unwrap();
                        store.write(id, 0, &[i as u8; 8]).unwrap();
                        assert_eq!(store.read_object(id).unwrap(), vec![i as u8; 8]);
                        store.delete_object(id).unwrap();
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().expect("thread should not panic");
        }
        assert_eq!(store.object_count(), 1);
        store.check_integrity().unwrap();
    }

    #[test]
    fn debug_format() {
        let store = InMemoryStore::new();
        let debug = format!("{store:?}");
        assert!(debug.contains("InMemoryStore"));
        assert!(debug.contains("object_count"));
    }
}
