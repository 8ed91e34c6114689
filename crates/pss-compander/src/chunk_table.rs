use std::ops::Range;
use std::sync::Arc;

use pss_store::{Store, StoreError};
use pss_types::{PssId, NO_PSS_ID, PSS_ID_SIZE};
use tracing::{debug, trace, warn};

use crate::error::{CompanderError, CompanderResult};
use crate::traits::{TransactionKind, TransactionReport, TX_SKIP_EMPTY};

/// How a chunk's stored bytes are to be interpreted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChunkRead {
    /// Nothing stored: the chunk reads as zeros.
    Zero,
    /// Stored verbatim and already copied into the caller's buffer.
    Raw,
    /// Compressed; this many bytes were copied into the scratch buffer.
    Compressed(usize),
}

/// The chunk table of one large object: one [`PssId`] per `block_size`
/// slice of the logical content, in order.
pub struct ChunkTable {
    store: Arc<dyn Store>,
    table_id: PssId,
    ids: Vec<PssId>,
    block_size: usize,
}

impl ChunkTable {
    /// Read the table object `table_id` from `store`.
    pub fn load(store: Arc<dyn Store>, table_id: PssId, block_size: usize) -> CompanderResult<Self> {
        let bytes = store.read_object(table_id)?;
        let ids = PssId::decode_table(&bytes).map_err(|e| {
            StoreError::BadPackage(format!("chunk table {table_id}: {e}"))
        })?;
        trace!(table = %table_id, chunks = ids.len(), "chunk table loaded");
        Ok(Self {
            store,
            table_id,
            ids,
            block_size,
        })
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn table_id(&self) -> PssId {
        self.table_id
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn ids(&self) -> &[PssId] {
        &self.ids
    }

    pub fn chunk_id(&self, index: usize) -> CompanderResult<PssId> {
        self.ids.get(index).copied().ok_or_else(|| {
            StoreError::ObjectOverRun {
                offset: index * PSS_ID_SIZE,
                len: PSS_ID_SIZE,
                size: self.ids.len() * PSS_ID_SIZE,
            }
            .into()
        })
    }

    /// Map a byte range onto chunk indices. `offset` must sit on a chunk
    /// boundary and the range must lie within the table.
    pub fn chunk_range(&self, offset: usize, len: usize) -> CompanderResult<Range<usize>> {
        if offset % self.block_size != 0 {
            return Err(CompanderError::Misaligned {
                offset,
                len,
                block_size: self.block_size,
            });
        }
        let first = offset / self.block_size;
        let last = first + len.div_ceil(self.block_size);
        if last > self.ids.len() {
            return Err(StoreError::ObjectOverRun {
                offset,
                len,
                size: self.ids.len() * self.block_size,
            }
            .into());
        }
        Ok(first..last)
    }

    /// On-store size of chunk `index`.
    pub fn stored_len(&self, index: usize) -> CompanderResult<usize> {
        let id = self.chunk_id(index)?;
        if id.is_none() {
            return Ok(0);
        }
        Ok(self.store.object_size(id)?)
    }

    /// Fetch chunk `index` for a read of `buf.len()` logical bytes. Raw
    /// chunks land in `buf`, compressed ones in `scratch`.
    pub fn load_chunk(
        &self,
        index: usize,
        buf: &mut [u8],
        scratch: &mut [u8],
    ) -> CompanderResult<ChunkRead> {
        let id = self.chunk_id(index)?;
        let stored = self.stored_len(index)?;
        if stored == 0 {
            return Ok(ChunkRead::Zero);
        }
        if stored == buf.len() {
            self.store.read(id, 0, buf)?;
            return Ok(ChunkRead::Raw);
        }
        if stored > buf.len() || stored > scratch.len() {
            return Err(CompanderError::NoMemory {
                needed: stored,
                capacity: buf.len().min(scratch.len()),
            });
        }
        self.store.read(id, 0, &mut scratch[..stored])?;
        Ok(ChunkRead::Compressed(stored))
    }

    /// Delete a chunk object that never made it into the table.
    fn discard(&self, id: PssId) {
        if let Err(e) = self.store.delete_object(id) {
            warn!(table = %self.table_id, id = %id, error = %e, "orphaned chunk not deleted");
        }
    }

    /// Replace chunk `index`'s stored bytes. An unallocated entry gets a new
    /// object and the table is rewritten.
    pub fn store_chunk(&mut self, index: usize, bytes: &[u8]) -> CompanderResult<()> {
        let id = self.chunk_id(index)?;
        if id.is_some() {
            self.store.replace_object(id, bytes)?;
            return Ok(());
        }
        let id = self.store.new_object(bytes.len())?;
        if let Err(e) = self.store.write(id, 0, bytes) {
            self.discard(id);
            return Err(e.into());
        }
        self.ids[index] = id;
        if let Err(e) = self.store.write(self.table_id, index * PSS_ID_SIZE, &id.to_be_bytes()) {
            self.ids[index] = NO_PSS_ID;
            self.discard(id);
            return Err(e.into());
        }
        debug!(table = %self.table_id, index, id = %id, "chunk allocated");
        Ok(())
    }

    /// Truncate chunk `index` to zero bytes so it reads back as zeros.
    pub fn clear_chunk(&mut self, index: usize) -> CompanderResult<()> {
        let id = self.chunk_id(index)?;
        if id.is_some() {
            self.store.erase_object(id)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for ChunkTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkTable")
            .field("table_id", &self.table_id)
            .field("chunks", &self.ids.len())
            .field("block_size", &self.block_size)
            .finish()
    }
}

/// The chunk-table transaction helper every compander delegates to.
///
/// `Start` opens a transaction against the table and records each chunk,
/// `Add` records the table and each chunk in the open transaction, and
/// `Abort` separately undoes each chunk and then the table. With
/// [`TX_SKIP_EMPTY`] set, chunks stored as zero bytes are left out.
pub fn transaction_against(
    table: &ChunkTable,
    kind: TransactionKind,
    flags: u32,
    shared: bool,
) -> CompanderResult<TransactionReport> {
    let store = table.store();
    let mut chunks = Vec::with_capacity(table.len());
    for (index, &id) in table.ids().iter().enumerate() {
        if id.is_none() {
            continue;
        }
        if flags & TX_SKIP_EMPTY != 0 && table.stored_len(index)? == 0 {
            continue;
        }
        chunks.push(id);
    }

    match kind {
        TransactionKind::Start => {
            store.start_transaction_against(table.table_id())?;
            for &id in &chunks {
                store.add_to_current_transaction(id)?;
            }
        }
        TransactionKind::Add => {
            store.add_to_current_transaction(table.table_id())?;
            for &id in &chunks {
                store.add_to_current_transaction(id)?;
            }
        }
        TransactionKind::Abort => {
            for &id in chunks.iter().rev() {
                store.separately_abort(id)?;
            }
            store.separately_abort(table.table_id())?;
        }
    }

    let report = TransactionReport {
        shared,
        objects: chunks.len() + 1,
    };
    debug!(table = %table.table_id(), ?kind, objects = report.objects, shared, "chunk transaction");
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pss_store::InMemoryStore;

    fn table_with(store: &Arc<InMemoryStore>, chunks: usize) -> PssId {
        let ids: Vec<PssId> = (0..chunks).map(|_| store.new_object(0).unwrap()).collect();
        let table = store.new_object(chunks * PSS_ID_SIZE).unwrap();
        store.write(table, 0, &PssId::encode_table(&ids)).unwrap();
        table
    }

    fn load(store: &Arc<InMemoryStore>, table: PssId) -> ChunkTable {
        let dyn_store: Arc<dyn Store> = store.clone();
        ChunkTable::load(dyn_store, table, 1024).unwrap()
    }

    // -----------------------------------------------------------------------
    // Layout
    // -----------------------------------------------------------------------

    #[test]
    fn load_decodes_ids() {
        let store = Arc::new(InMemoryStore::new());
        let table = load(&store, table_with(&store, 3));
        assert_eq!(table.len(), 3);
        assert!(table.ids().iter().all(|id| id.is_some()));
    }

    #[test]
    fn ragged_table_is_bad_package() {
        let store = Arc::new(InMemoryStore::new());
        let id = store.new_object(6).unwrap();
        let dyn_store: Arc<dyn Store> = store.clone();
        let err = ChunkTable::load(dyn_store, id, 1024).unwrap_err();
        assert!(matches!(err, CompanderError::Store(StoreError::BadPackage(_))));
    }

    #[test]
    fn chunk_range_checks_alignment_and_bounds() {
        let store = Arc::new(InMemoryStore::new());
        let table = load(&store, table_with(&store, 2));
        assert_eq!(table.chunk_range(0, 2048).unwrap(), 0..2);
        assert_eq!(table.chunk_range(1024, 10).unwrap(), 1..2);
        assert!(matches!(
            table.chunk_range(10, 10).unwrap_err(),
            CompanderError::Misaligned { offset: 10, .. }
        ));
        assert!(matches!(
            table.chunk_range(1024, 2048).unwrap_err(),
            CompanderError::Store(StoreError::ObjectOverRun { .. })
        ));
    }

    // -----------------------------------------------------------------------
    // Chunk access
    // -----------------------------------------------------------------------

    #[test]
    fn fresh_chunk_reads_zero() {
        let store = Arc::new(InMemoryStore::new());
        let table = load(&store, table_with(&store, 1));
        let mut buf = [1u8; 16];
        let mut scratch = [0u8; 1032];
        assert_eq!(table.load_chunk(0, &mut buf, &mut scratch).unwrap(), ChunkRead::Zero);
    }

    #[test]
    fn stored_length_selects_interpretation() {
        let store = Arc::new(InMemoryStore::new());
        let mut table = load(&store, table_with(&store, 2));
        let mut scratch = [0u8; 1032];

        table.store_chunk(0, &[9u8; 16]).unwrap();
        let mut buf = [0u8; 16];
        assert_eq!(table.load_chunk(0, &mut buf, &mut scratch).unwrap(), ChunkRead::Raw);
        assert_eq!(buf, [9u8; 16]);

        table.store_chunk(1, &[1, 2, 3]).unwrap();
        let mut buf = [0u8; 16];
        assert_eq!(
            table.load_chunk(1, &mut buf, &mut scratch).unwrap(),
            ChunkRead::Compressed(3)
        );
        assert_eq!(&scratch[..3], &[1, 2, 3]);

        let mut small = [0u8; 2];
        assert!(table.load_chunk(1, &mut small, &mut scratch).unwrap_err().is_no_memory());
    }

    #[test]
    fn clear_chunk_truncates() {
        let store = Arc::new(InMemoryStore::new());
        let mut table = load(&store, table_with(&store, 1));
        table.store_chunk(0, &[5u8; 10]).unwrap();
        assert_eq!(table.stored_len(0).unwrap(), 10);
        table.clear_chunk(0).unwrap();
        assert_eq!(table.stored_len(0).unwrap(), 0);
    }

    #[test]
    fn unallocated_entry_gets_an_object() {
        let store = Arc::new(InMemoryStore::new());
        let table_id = store.new_object(PSS_ID_SIZE).unwrap();
        let mut table = load(&store, table_id);
        assert_eq!(table.chunk_id(0).unwrap(), NO_PSS_ID);
        assert_eq!(table.stored_len(0).unwrap(), 0);

        table.store_chunk(0, &[7u8; 4]).unwrap();
        let id = table.chunk_id(0).unwrap();
        assert!(id.is_some());

        let reloaded = load(&store, table_id);
        assert_eq!(reloaded.chunk_id(0).unwrap(), id);
    }

    #[test]
    fn failed_allocation_leaves_no_orphan() {
        let store = Arc::new(InMemoryStore::new());
        let table_id = store.new_object(PSS_ID_SIZE).unwrap();
        let mut table = load(&store, table_id);
        let before = store.object_count();

        // Chunk write fails, then the table update fails.
        for n in [1, 2] {
            store.fail_after(n);
            assert!(table.store_chunk(0, &[7u8; 4]).unwrap_err().is_no_memory());
            assert_eq!(store.object_count(), before);
            assert_eq!(table.chunk_id(0).unwrap(), NO_PSS_ID);
            assert_eq!(load(&store, table_id).chunk_id(0).unwrap(), NO_PSS_ID);
        }

        table.store_chunk(0, &[7u8; 4]).unwrap();
        assert_eq!(store.object_count(), before + 1);
    }

    // -----------------------------------------------------------------------
    // Transactions
    // -----------------------------------------------------------------------

    #[test]
    fn start_then_abort_restores_chunks() {
        let store = Arc::new(InMemoryStore::new());
        let mut table = load(&store, table_with(&store, 2));
        table.store_chunk(0, &[1u8; 8]).unwrap();

        let report = transaction_against(&table, TransactionKind::Start, 0, false).unwrap();
        assert_eq!(report, TransactionReport { shared: false, objects: 3 });
        assert!(store.in_transaction());

        table.store_chunk(0, &[2u8; 4]).unwrap();
        table.store_chunk(1, &[3u8; 4]).unwrap();

        transaction_against(&table, TransactionKind::Abort, 0, false).unwrap();
        assert!(!store.in_transaction());
        let id0 = table.chunk_id(0).unwrap();
        let id1 = table.chunk_id(1).unwrap();
        assert_eq!(store.read_object(id0).unwrap(), vec![1u8; 8]);
        assert_eq!(store.object_size(id1).unwrap(), 0);
    }

    #[test]
    fn skip_empty_leaves_out_zero_chunks() {
        let store = Arc::new(InMemoryStore::new());
        let mut table = load(&store, table_with(&store, 3));
        table.store_chunk(2, &[1u8; 8]).unwrap();

        let report =
            transaction_against(&table, TransactionKind::Start, TX_SKIP_EMPTY, true).unwrap();
        assert_eq!(report, TransactionReport { shared: true, objects: 2 });
        assert!(!store.in_separate_transaction(table.chunk_id(0).unwrap()));
        assert!(store.in_separate_transaction(table.chunk_id(2).unwrap()));
        store.commit().unwrap();
    }
}
