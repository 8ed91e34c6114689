use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use pss_store::{Store, StoreResult, XipObjectInfo};
use pss_types::PssId;

use crate::monitor::StoreMonitor;

/// Call counts per path, for diagnostics and tests.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MuxStats {
    /// Calls delegated straight to the wrapped store.
    pub direct: usize,
    /// Calls routed through the monitor.
    pub monitored: usize,
}

/// Serializing decorator around a store.
///
/// Every call holds one store-wide mutex for its whole duration, so at most
/// one caller is inside the wrapped store at a time. Read-only calls go
/// straight to the wrapped store; mutating calls go through a
/// [`StoreMonitor`] wrapping the same store. Errors pass through unchanged.
///
/// The wrapped store must not be used directly once it is wrapped.
pub struct MuxStore<S: Store + ?Sized> {
    lock: Mutex<()>,
    store: Arc<S>,
    monitor: StoreMonitor<S>,
    direct_calls: AtomicUsize,
}

impl<S: Store> MuxStore<S> {
    /// Take ownership of `store` and wrap it.
    pub fn new(store: S) -> Self {
        Self::from_arc(Arc::new(store))
    }
}

impl<S: Store + ?Sized> MuxStore<S> {
    /// Wrap a store that is already shared.
    pub fn from_arc(store: Arc<S>) -> Self {
        Self {
            lock: Mutex::new(()),
            monitor: StoreMonitor::new(Arc::clone(&store)),
            store,
            direct_calls: AtomicUsize::new(0),
        }
    }

    /// The wrapped store, for inspection once all callers are done.
    pub fn inner(&self) -> &S {
        &self.store
    }

    pub fn stats(&self) -> MuxStats {
        MuxStats {
            direct: self.direct_calls.load(Ordering::Relaxed),
            monitored: self.monitor.calls(),
        }
    }

    /// Block until the store-wide lock is free. The guard releases it on
    /// every exit path. A poisoned lock is taken over, since the guarded
    /// value is `()`.
    fn acquire(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn direct(&self) -> (MutexGuard<'_, ()>, &S) {
        let guard = self.acquire();
        self.direct_calls.fetch_add(1, Ordering::Relaxed);
        (guard, &self.store)
    }

    fn monitored(&self) -> (MutexGuard<'_, ()>, &StoreMonitor<S>) {
        (self.acquire(), &self.monitor)
    }
}

impl<S: Store + ?Sized> Store for MuxStore<S> {
    // -----------------------------------------------------------------------
    // Direct path
    // -----------------------------------------------------------------------

    fn root_id(&self) -> StoreResult<PssId> {
        let (_guard, store) = self.direct();
        store.root_id()
    }

    fn object_size(&self, id: PssId) -> StoreResult<usize> {
        let (_guard, store) = self.direct();
        store.object_size(id)
    }

    fn read(&self, id: PssId, offset: usize, buf: &mut [u8]) -> StoreResult<()> {
        let (_guard, store) = self.direct();
        store.read(id, offset, buf)
    }

    fn read_object(&self, id: PssId) -> StoreResult<Vec<u8>> {
        let (_guard, store) = self.direct();
        store.read_object(id)
    }

    fn next_object(&self, id: PssId) -> StoreResult<PssId> {
        let (_guard, store) = self.direct();
        store.next_object(id)
    }

    fn owns_object(&self, id: PssId) -> bool {
        let (_guard, store) = self.direct();
        store.owns_object(id)
    }

    fn is_read_only(&self) -> bool {
        let (_guard, store) = self.direct();
        store.is_read_only()
    }

    fn is_rom(&self) -> bool {
        let (_guard, store) = self.direct();
        store.is_rom()
    }

    fn unlock_read_only(&self, unlocked: bool) -> StoreResult<()> {
        let (_guard, store) = self.direct();
        store.unlock_read_only(unlocked)
    }

    fn is_locked(&self) -> bool {
        let (_guard, store) = self.direct();
        store.is_locked()
    }

    fn store_kind(&self) -> &'static str {
        let (_guard, store) = self.direct();
        store.store_kind()
    }

    fn signature(&self) -> u32 {
        let (_guard, store) = self.direct();
        store.signature()
    }

    fn is_same_store(&self, other: &dyn Store) -> bool {
        // `other` may be this mux; compare signatures without re-entering it.
        let mine = self.signature();
        mine == other.signature()
    }

    fn set_buddy(&self, buddy: Option<u32>) -> StoreResult<()> {
        let (_guard, store) = self.direct();
        store.set_buddy(buddy)
    }

    fn set_store(&self, replacement: Arc<dyn Store>) -> StoreResult<()> {
        let (_guard, store) = self.direct();
        store.set_store(replacement)
    }

    fn sleep(&self) -> StoreResult<()> {
        let (_guard, store) = self.direct();
        store.sleep()
    }

    fn vpp_off(&self) -> StoreResult<()> {
        let (_guard, store) = self.direct();
        store.vpp_off()
    }

    fn address(&self, id: PssId) -> StoreResult<usize> {
        let (_guard, store) = self.direct();
        store.address(id)
    }

    fn calc_xip_object_size(&self, size: usize) -> StoreResult<usize> {
        let (_guard, store) = self.direct();
        store.calc_xip_object_size(size)
    }

    fn get_xip_object_info(&self, id: PssId) -> StoreResult<XipObjectInfo> {
        let (_guard, store) = self.direct();
        store.get_xip_object_info(id)
    }

    fn in_transaction(&self) -> bool {
        let (_guard, store) = self.direct();
        store.in_transaction()
    }

    fn in_separate_transaction(&self, id: PssId) -> bool {
        let (_guard, store) = self.direct();
        store.in_separate_transaction(id)
    }

    // -----------------------------------------------------------------------
    // Monitor path
    // -----------------------------------------------------------------------

    fn new_object(&self, size: usize) -> StoreResult<PssId> {
        let (_guard, monitor) = self.monitored();
        monitor.new_object(size)
    }

    fn erase_object(&self, id: PssId) -> StoreResult<()> {
        let (_guard, monitor) = self.monitored();
        monitor.erase_object(id)
    }

    fn delete_object(&self, id: PssId) -> StoreResult<()> {
        let (_guard, monitor) = self.monitored();
        monitor.delete_object(id)
    }

    fn set_object_size(&self, id: PssId, size: usize) -> StoreResult<()> {
        let (_guard, monitor) = self.monitored();
        monitor.set_object_size(id, size)
    }

    fn write(&self, id: PssId, offset: usize, data: &[u8]) -> StoreResult<()> {
        let (_guard, monitor) = self.monitored();
        monitor.write(id, offset, data)
    }

    fn replace_object(&self, id: PssId, data: &[u8]) -> StoreResult<()> {
        let (_guard, monitor) = self.monitored();
        monitor.replace_object(id, data)
    }

    fn store_size(&self) -> StoreResult<(usize, usize)> {
        let (_guard, monitor) = self.monitored();
        monitor.store_size()
    }

    fn format(&self) -> StoreResult<()> {
        let (_guard, monitor) = self.monitored();
        monitor.format()
    }

    fn needs_format(&self) -> StoreResult<bool> {
        let (_guard, monitor) = self.monitored();
        monitor.needs_format()
    }

    fn lock_store(&self) -> StoreResult<()> {
        let (_guard, monitor) = self.monitored();
        monitor.lock_store()
    }

    fn unlock_store(&self) -> StoreResult<()> {
        let (_guard, monitor) = self.monitored();
        monitor.unlock_store()
    }

    fn idle(&self) -> StoreResult<bool> {
        let (_guard, monitor) = self.monitored();
        monitor.idle()
    }

    fn check_integrity(&self) -> StoreResult<()> {
        let (_guard, monitor) = self.monitored();
        monitor.check_integrity()
    }

    fn new_xip_object(&self, size: usize) -> StoreResult<PssId> {
        let (_guard, monitor) = self.monitored();
        monitor.new_xip_object(size)
    }

    fn new_within_transaction(&self, size: usize) -> StoreResult<PssId> {
        let (_guard, monitor) = self.monitored();
        monitor.new_within_transaction(size)
    }

    fn start_transaction_against(&self, id: PssId) -> StoreResult<()> {
        let (_guard, monitor) = self.monitored();
        monitor.start_transaction_against(id)
    }

    fn add_to_current_transaction(&self, id: PssId) -> StoreResult<()> {
        let (_guard, monitor) = self.monitored();
        monitor.add_to_current_transaction(id)
    }

    fn separately_abort(&self, id: PssId) -> StoreResult<()> {
        let (_guard, monitor) = self.monitored();
        monitor.separately_abort(id)
    }

    fn abort(&self) -> StoreResult<()> {
        let (_guard, monitor) = self.monitored();
        monitor.abort()
    }

    fn commit(&self) -> StoreResult<()> {
        let (_guard, monitor) = self.monitored();
        monitor.commit()
    }
}

impl<S: Store + ?Sized> std::fmt::Debug for MuxStore<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MuxStore")
            .field("kind", &self.store.store_kind())
            .field("stats", &self.stats())
            .finish()
    }
}
