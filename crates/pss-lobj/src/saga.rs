use pss_store::{Store, StoreResult};
use pss_types::PssId;
use tracing::{debug, warn};

/// Compensating transaction for a multi-object construction.
///
/// Every object is allocated with `new_within_transaction` and remembered.
/// Unless [`commit`](Self::commit) is reached, dropping the saga undoes each
/// object with `separately_abort`, newest first, and deletes any that
/// survive the undo (another caller may have committed the shared
/// transaction in between).
pub(crate) struct Saga<'a> {
    store: &'a dyn Store,
    created: Vec<PssId>,
    committed: bool,
}

impl<'a> Saga<'a> {
    pub(crate) fn begin(store: &'a dyn Store) -> Self {
        Self {
            store,
            created: Vec::new(),
            committed: false,
        }
    }

    pub(crate) fn store(&self) -> &'a dyn Store {
        self.store
    }

    /// Allocate a provisional object of `size` bytes.
    pub(crate) fn new_object(&mut self, size: usize) -> StoreResult<PssId> {
        let id = self.store.new_within_transaction(size)?;
        self.created.push(id);
        Ok(id)
    }

    /// Allocate a provisional object holding `data`.
    pub(crate) fn new_object_with(&mut self, data: &[u8]) -> StoreResult<PssId> {
        let id = self.new_object(data.len())?;
        if !data.is_empty() {
            self.store.write(id, 0, data)?;
        }
        Ok(id)
    }

    /// Keep everything. Ends the store's open transaction.
    pub(crate) fn commit(mut self) -> StoreResult<()> {
        self.store.commit()?;
        self.committed = true;
        Ok(())
    }

    fn rollback(&mut self) {
        warn!(objects = self.created.len(), "rolling back construction");
        for &id in self.created.iter().rev() {
            if let Err(e) = self.store.separately_abort(id) {
                warn!(id = %id, error = %e, "separate abort failed");
            }
            if self.store.owns_object(id) {
                match self.store.delete_object(id) {
                    Ok(()) => debug!(id = %id, "deleted object that outlived its undo"),
                    Err(e) => warn!(id = %id, error = %e, "rollback delete failed"),
                }
            }
        }
    }
}

impl Drop for Saga<'_> {
    fn drop(&mut self) {
        if !self.committed && !self.created.is_empty() {
            self.rollback();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pss_store::InMemoryStore;

    #[test]
    fn dropped_saga_removes_everything() {
        let store = InMemoryStore::new();
        let before = store.object_count();
        {
            let mut saga = Saga::begin(&store);
            saga.new_object(8).unwrap();
            saga.new_object_with(b"abc").unwrap();
        }
        assert_eq!(store.object_count(), before);
        assert!(!store.in_transaction());
    }

    #[test]
    fn committed_saga_keeps_objects() {
        let store = InMemoryStore::new();
        let mut saga = Saga::begin(&store);
        let a = saga.new_object_with(b"kept").unwrap();
        saga.commit().unwrap();
        assert_eq!(store.read_object(a).unwrap(), b"kept");
        assert!(!store.in_transaction());
    }

    #[test]
    fn rollback_deletes_objects_committed_by_someone_else() {
        let store = InMemoryStore::new();
        let before = store.object_count();
        {
            let mut saga = Saga::begin(&store);
            saga.new_object(4).unwrap();
            store.commit().unwrap();
            saga.new_object(4).unwrap();
        }
        assert_eq!(store.object_count(), before);
    }

    #[test]
    fn failed_step_unwinds_prior_steps() {
        let store = InMemoryStore::new();
        let before = store.object_count();
        let result = (|| -> StoreResult<()> {
            let mut saga = Saga::begin(&store);
            saga.new_object(4)?;
            store.fail_after(0);
            saga.new_object(4)?;
            saga.commit()
        })();
        assert!(result.unwrap_err().is_no_memory());
        assert_eq!(store.object_count(), before);
    }
}
