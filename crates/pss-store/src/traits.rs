use std::sync::Arc;

use pss_types::{PssId, NO_PSS_ID};

use crate::error::{StoreError, StoreResult};

/// Location and extent of an execute-in-place object.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct XipObjectInfo {
    pub address: usize,
    pub size: usize,
}

/// A flat, mutable namespace of variable-size byte objects keyed by [`PssId`].
///
/// All implementations must satisfy these invariants:
/// - An object's lifetime is explicit (`new_object` / `delete_object`) and
///   independent of every other object.
/// - Every mutating call can fail. Partial writes are never rolled back
///   automatically; callers undo their own work through the transaction
///   calls (`separately_abort`, `abort`).
/// - Only a single `new_within_transaction` call is atomic. Grouping several
///   objects into one logical unit is the caller's convention.
///
/// Methods take `&self`; implementations guard their own state so a store can
/// be shared behind an `Arc`.
pub trait Store: Send + Sync {
    // -----------------------------------------------------------------------
    // Objects
    // -----------------------------------------------------------------------

    /// The well-known root object of this store.
    fn root_id(&self) -> StoreResult<PssId>;

    /// Allocate a zero-filled object of `size` bytes.
    fn new_object(&self, size: usize) -> StoreResult<PssId>;

    /// Truncate an object to zero bytes, keeping its identity.
    fn erase_object(&self, id: PssId) -> StoreResult<()>;

    /// Remove an object.
    fn delete_object(&self, id: PssId) -> StoreResult<()>;

    /// Grow (zero-filling) or shrink an object.
    fn set_object_size(&self, id: PssId, size: usize) -> StoreResult<()>;

    /// Current size of an object in bytes.
    fn object_size(&self, id: PssId) -> StoreResult<usize>;

    /// Fill `buf` from the object starting at `offset`.
    fn read(&self, id: PssId, offset: usize, buf: &mut [u8]) -> StoreResult<()>;

    /// Overwrite bytes of the object starting at `offset`. The write must
    /// fit inside the current object size.
    fn write(&self, id: PssId, offset: usize, data: &[u8]) -> StoreResult<()>;

    /// Resize the object to `data.len()` and overwrite it in one call.
    fn replace_object(&self, id: PssId, data: &[u8]) -> StoreResult<()> {
        self.set_object_size(id, data.len())?;
        self.write(id, 0, data)
    }

    /// Read an entire object.
    fn read_object(&self, id: PssId) -> StoreResult<Vec<u8>> {
        let size = self.object_size(id)?;
        let mut buf = vec![0u8; size];
        self.read(id, 0, &mut buf)?;
        Ok(buf)
    }

    /// Enumerate objects: the id following `id`, or [`NO_PSS_ID`] at the end.
    /// Pass [`NO_PSS_ID`] to start. Backends without enumeration return
    /// [`NO_PSS_ID`] immediately.
    fn next_object(&self, _id: PssId) -> StoreResult<PssId> {
        Ok(NO_PSS_ID)
    }

    /// Whether `id` names a live object in this store.
    fn owns_object(&self, id: PssId) -> bool {
        self.object_size(id).is_ok()
    }

    // -----------------------------------------------------------------------
    // Store-wide state
    // -----------------------------------------------------------------------

    /// `(total, used)` bytes.
    fn store_size(&self) -> StoreResult<(usize, usize)>;

    fn is_read_only(&self) -> bool;

    fn is_rom(&self) -> bool {
        false
    }

    /// Temporarily lift (`true`) or restore (`false`) read-only protection.
    fn unlock_read_only(&self, _unlocked: bool) -> StoreResult<()> {
        Err(StoreError::CallNotImplemented("unlock_read_only"))
    }

    /// Reentrant store lock.
    fn lock_store(&self) -> StoreResult<()>;

    fn unlock_store(&self) -> StoreResult<()>;

    fn is_locked(&self) -> bool;

    /// A short name for the backend, e.g. `"Internal"`.
    fn store_kind(&self) -> &'static str;

    /// A value unique to this store instance.
    fn signature(&self) -> u32;

    fn is_same_store(&self, other: &dyn Store) -> bool {
        self.signature() == other.signature()
    }

    /// Pair this store with another (identified by signature).
    fn set_buddy(&self, _buddy: Option<u32>) -> StoreResult<()> {
        Ok(())
    }

    /// Point a proxy store at a new backing store.
    fn set_store(&self, _store: Arc<dyn Store>) -> StoreResult<()> {
        Err(StoreError::CallNotImplemented("set_store"))
    }

    fn format(&self) -> StoreResult<()>;

    fn needs_format(&self) -> StoreResult<bool> {
        Ok(false)
    }

    /// Background housekeeping. Returns `true` if more idle time is wanted.
    fn idle(&self) -> StoreResult<bool> {
        Ok(false)
    }

    fn check_integrity(&self) -> StoreResult<()> {
        Ok(())
    }

    // Power hooks.
    fn sleep(&self) -> StoreResult<()> {
        Ok(())
    }

    fn vpp_off(&self) -> StoreResult<()> {
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Execute-in-place
    // -----------------------------------------------------------------------

    fn address(&self, _id: PssId) -> StoreResult<usize> {
        Err(StoreError::CallNotImplemented("address"))
    }

    fn calc_xip_object_size(&self, _size: usize) -> StoreResult<usize> {
        Err(StoreError::CallNotImplemented("calc_xip_object_size"))
    }

    fn get_xip_object_info(&self, _id: PssId) -> StoreResult<XipObjectInfo> {
        Err(StoreError::CallNotImplemented("get_xip_object_info"))
    }

    fn new_xip_object(&self, _size: usize) -> StoreResult<PssId> {
        Err(StoreError::CallNotImplemented("new_xip_object"))
    }

    // -----------------------------------------------------------------------
    // Transactions
    // -----------------------------------------------------------------------

    /// Allocate an object that is undone if the surrounding transaction is
    /// aborted instead of committed.
    fn new_within_transaction(&self, size: usize) -> StoreResult<PssId>;

    /// Begin a transaction (if none is open) and record `id`'s current
    /// contents for undo.
    fn start_transaction_against(&self, id: PssId) -> StoreResult<()>;

    /// Record `id`'s current contents in the open transaction.
    fn add_to_current_transaction(&self, id: PssId) -> StoreResult<()>;

    /// Undo the transaction's changes to `id` alone.
    fn separately_abort(&self, id: PssId) -> StoreResult<()>;

    /// Undo every change recorded in the open transaction.
    fn abort(&self) -> StoreResult<()>;

    /// Keep every change recorded in the open transaction.
    fn commit(&self) -> StoreResult<()>;

    fn in_transaction(&self) -> bool;

    /// Whether `id` has a pending undo record.
    fn in_separate_transaction(&self, id: PssId) -> bool;
}
