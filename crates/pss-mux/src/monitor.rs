use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use pss_store::{Store, StoreResult};
use pss_types::PssId;
use tracing::debug_span;

/// The execution context that mutating store calls are funnelled through.
///
/// Every method is a pass-through to the wrapped store inside a `monitor`
/// span. The monitor does no locking of its own; [`MuxStore`](crate::MuxStore)
/// holds the lock around each call.
pub struct StoreMonitor<S: Store + ?Sized> {
    store: Arc<S>,
    calls: AtomicUsize,
}

macro_rules! monitored {
    ($(fn $name:ident(&self $(, $arg:ident: $ty:ty)*) -> $ret:ty;)*) => {
        $(
            pub fn $name(&self $(, $arg: $ty)*) -> $ret {
                let _span = debug_span!("monitor", call = stringify!($name)).entered();
                self.calls.fetch_add(1, Ordering::Relaxed);
                self.store.$name($($arg),*)
            }
        )*
    };
}

impl<S: Store + ?Sized> StoreMonitor<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of calls routed through this monitor.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }

    monitored! {
        fn new_object(&self, size: usize) -> StoreResult<PssId>;
        fn erase_object(&self, id: PssId) -> StoreResult<()>;
        fn delete_object(&self, id: PssId) -> StoreResult<()>;
        fn set_object_size(&self, id: PssId, size: usize) -> StoreResult<()>;
        fn write(&self, id: PssId, offset: usize, data: &[u8]) -> StoreResult<()>;
        fn replace_object(&self, id: PssId, data: &[u8]) -> StoreResult<()>;
        fn store_size(&self) -> StoreResult<(usize, usize)>;
        fn format(&self) -> StoreResult<()>;
        fn needs_format(&self) -> StoreResult<bool>;
        fn lock_store(&self) -> StoreResult<()>;
        fn unlock_store(&self) -> StoreResult<()>;
        fn idle(&self) -> StoreResult<bool>;
        fn check_integrity(&self) -> StoreResult<()>;
        fn new_xip_object(&self, size: usize) -> StoreResult<PssId>;
        fn new_within_transaction(&self, size: usize) -> StoreResult<PssId>;
        fn start_transaction_against(&self, id: PssId) -> StoreResult<()>;
        fn add_to_current_transaction(&self, id: PssId) -> StoreResult<()>;
        fn separately_abort(&self, id: PssId) -> StoreResult<()>;
        fn abort(&self) -> StoreResult<()>;
        fn commit(&self) -> StoreResult<()>;
    }
}
