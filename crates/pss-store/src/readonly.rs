use std::sync::Arc;

use pss_types::PssId;

use crate::error::{StoreError, StoreResult};
use crate::traits::{Store, XipObjectInfo};

/// Read-only view of another store.
///
/// Reads and queries pass through; every mutating call fails with
/// [`StoreError::CallNotImplemented`] without reaching the inner store.
pub struct ReadOnlyStore {
    inner: Arc<dyn Store>,
}

impl ReadOnlyStore {
    pub fn new(inner: Arc<dyn Store>) -> Self {
        Self { inner }
    }
}

fn refuse<T>(call: &'static str) -> StoreResult<T> {
    Err(StoreError::CallNotImplemented(call))
}

impl Store for ReadOnlyStore {
    fn root_id(&self) -> StoreResult<PssId> {
        self.inner.root_id()
    }

    fn new_object(&self, _size: usize) -> StoreResult<PssId> {
        refuse("new_object")
    }

    fn erase_object(&self, _id: PssId) -> StoreResult<()> {
        refuse("erase_object")
    }

    fn delete_object(&self, _id: PssId) -> StoreResult<()> {
        refuse("delete_object")
    }

    fn set_object_size(&self, _id: PssId, _size: usize) -> StoreResult<()> {
        refuse("set_object_size")
    }

    fn object_size(&self, id: PssId) -> StoreResult<usize> {
        self.inner.object_size(id)
    }

    fn read(&self, id: PssId, offset: usize, buf: &mut [u8]) -> StoreResult<()> {
        self.inner.read(id, offset, buf)
    }

    fn write(&self, _id: PssId, _offset: usize, _data: &[u8]) -> StoreResult<()> {
        refuse("write")
    }

    fn replace_object(&self, _id: PssId, _data: &[u8]) -> StoreResult<()> {
        refuse("replace_object")
    }

    fn next_object(&self, id: PssId) -> StoreResult<PssId> {
        self.inner.next_object(id)
    }

    fn owns_object(&self, id: PssId) -> bool {
        self.inner.owns_object(id)
    }

    fn store_size(&self) -> StoreResult<(usize, usize)> {
        self.inner.store_size()
    }

    fn is_read_only(&self) -> bool {
        true
    }

    fn is_rom(&self) -> bool {
        self.inner.is_rom()
    }

    fn lock_store(&self) -> StoreResult<()> {
        self.inner.lock_store()
    }

    fn unlock_store(&self) -> StoreResult<()> {
        self.inner.unlock_store()
    }

    fn is_locked(&self) -> bool {
        self.inner.is_locked()
    }

    fn store_kind(&self) -> &'static str {
        self.inner.store_kind()
    }

    fn signature(&self) -> u32 {
        self.inner.signature()
    }

    fn format(&self) -> StoreResult<()> {
        refuse("format")
    }

    fn address(&self, id: PssId) -> StoreResult<usize> {
        self.inner.address(id)
    }

    fn get_xip_object_info(&self, id: PssId) -> StoreResult<XipObjectInfo> {
        self.inner.get_xip_object_info(id)
    }

    fn new_within_transaction(&self, _size: usize) -> StoreResult<PssId> {
        refuse("new_within_transaction")
    }

    fn start_transaction_against(&self, _id: PssId) -> StoreResult<()> {
        refuse("start_transaction_against")
    }

    fn add_to_current_transaction(&self, _id: PssId) -> StoreResult<()> {
        refuse("add_to_current_transaction")
    }

    fn separately_abort(&self, _id: PssId) -> StoreResult<()> {
        refuse("separately_abort")
    }

    fn abort(&self) -> StoreResult<()> {
        refuse("abort")
    }

    fn commit(&self) -> StoreResult<()> {
        refuse("commit")
    }

    fn in_transaction(&self) -> bool {
        self.inner.in_transaction()
    }

    fn in_separate_transaction(&self, id: PssId) -> bool {
        self.inner.in_separate_transaction(id)
    }
}
