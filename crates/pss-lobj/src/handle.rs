use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use pss_compander::{StoreCompander, TransactionKind, TransactionReport};
use pss_store::StoreError;
use pss_types::{chunk_count, PssId};
use tracing::{trace, warn};

use crate::error::LargeObjectResult;

/// A chunk held in memory with writes not yet pushed through the compander.
struct DirtyChunk {
    index: usize,
    bytes: Vec<u8>,
}

pub(crate) struct HandleState {
    compander: Box<dyn StoreCompander>,
    size: usize,
    block: usize,
    dirty: Option<DirtyChunk>,
}

impl HandleState {
    pub(crate) fn new(compander: Box<dyn StoreCompander>, size: usize) -> Self {
        let block = compander.block_size();
        Self {
            compander,
            size,
            block,
            dirty: None,
        }
    }

    fn chunk_len(&self, index: usize) -> usize {
        self.block.min(self.size - index * self.block)
    }

    fn check_range(&self, offset: usize, len: usize) -> LargeObjectResult<()> {
        match offset.checked_add(len) {
            Some(end) if end <= self.size => Ok(()),
            _ => Err(StoreError::ObjectOverRun {
                offset,
                len,
                size: self.size,
            }
            .into()),
        }
    }

    fn check_chunk(&self, index: usize) -> LargeObjectResult<()> {
        if index >= chunk_count(self.size, self.block) {
            return Err(StoreError::ObjectOverRun {
                offset: index * self.block,
                len: self.block,
                size: self.size,
            }
            .into());
        }
        Ok(())
    }

    fn check_writable(&self) -> LargeObjectResult<()> {
        if self.compander.is_read_only() {
            return Err(StoreError::WriteProtected.into());
        }
        Ok(())
    }

    /// Current logical contents of chunk `index`.
    fn load(&mut self, index: usize) -> LargeObjectResult<Vec<u8>> {
        if let Some(dirty) = self.dirty.as_ref().filter(|d| d.index == index) {
            return Ok(dirty.bytes.clone());
        }
        let mut bytes = vec![0u8; self.chunk_len(index)];
        self.compander.read(index * self.block, &mut bytes)?;
        Ok(bytes)
    }

    pub(crate) fn flush(&mut self) -> LargeObjectResult<()> {
        if let Some(dirty) = self.dirty.take() {
            trace!(index = dirty.index, "flushing dirty chunk");
            if let Err(e) = self.compander.write(dirty.index * self.block, &dirty.bytes) {
                self.dirty = Some(dirty);
                return Err(e.into());
            }
        }
        Ok(())
    }

    fn read_at(&mut self, offset: usize, buf: &mut [u8]) -> LargeObjectResult<()> {
        self.check_range(offset, buf.len())?;
        let mut done = 0;
        while done < buf.len() {
            let pos = offset + done;
            let index = pos / self.block;
            let within = pos % self.block;
            let take = (self.chunk_len(index) - within).min(buf.len() - done);
            let out = &mut buf[done..done + take];
            let whole = within == 0 && take == self.chunk_len(index);
            let dirty_here = self.dirty.as_ref().is_some_and(|d| d.index == index);
            if whole && !dirty_here {
                self.compander.read(index * self.block, out)?;
            } else {
                let chunk = self.load(index)?;
                out.copy_from_slice(&chunk[within..within + take]);
            }
            done += take;
        }
        Ok(())
    }

    fn write_at(&mut self, offset: usize, data: &[u8]) -> LargeObjectResult<()> {
        self.check_writable()?;
        self.check_range(offset, data.len())?;
        let mut done = 0;
        while done < data.len() {
            let pos = offset + done;
            let index = pos / self.block;
            let within = pos % self.block;
            let len = self.chunk_len(index);
            let take = (len - within).min(data.len() - done);

            if self.dirty.as_ref().map(|d| d.index) != Some(index) {
                self.flush()?;
                let bytes = if within == 0 && take == len {
                    vec![0u8; len]
                } else {
                    self.load(index)?
                };
                self.dirty = Some(DirtyChunk { index, bytes });
            }
            if let Some(dirty) = self.dirty.as_mut() {
                dirty.bytes[within..within + take].copy_from_slice(&data[done..done + take]);
            }
            done += take;
        }
        Ok(())
    }

    fn write_chunk(&mut self, index: usize, data: &[u8]) -> LargeObjectResult<()> {
        self.check_writable()?;
        self.check_chunk(index)?;
        let len = self.chunk_len(index);
        if data.len() != len {
            return Err(StoreError::ObjectOverRun {
                offset: index * self.block,
                len: data.len(),
                size: self.size,
            }
            .into());
        }
        if self.dirty.as_ref().is_some_and(|d| d.index == index) {
            self.dirty = None;
        }
        self.compander.write(index * self.block, data)?;
        Ok(())
    }
}

/// An open large object.
///
/// Byte-range writes are staged one chunk at a time: writing into a
/// different chunk, calling [`flush`](Self::flush), or dropping the handle
/// pushes the staged chunk through the compander. Whole-chunk calls go
/// straight through.
pub struct LargeObject {
    id: PssId,
    size: usize,
    block: usize,
    state: Arc<Mutex<HandleState>>,
}

impl LargeObject {
    pub(crate) fn new(id: PssId, state: HandleState) -> Self {
        Self {
            id,
            size: state.size,
            block: state.block,
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub(crate) fn shared_state(&self) -> &Arc<Mutex<HandleState>> {
        &self.state
    }

    fn lock(&self) -> MutexGuard<'_, HandleState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Root id of the object.
    pub fn id(&self) -> PssId {
        self.id
    }

    /// Logical size in bytes.
    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn block_size(&self) -> usize {
        self.block
    }

    pub fn chunk_count(&self) -> usize {
        chunk_count(self.size, self.block)
    }

    pub fn is_read_only(&self) -> bool {
        self.lock().compander.is_read_only()
    }

    /// Name of the compander bound to this object.
    pub fn compander_name(&self) -> &'static str {
        self.lock().compander.name()
    }

    /// Whether a staged chunk is waiting to be flushed.
    pub fn has_pending_writes(&self) -> bool {
        self.lock().dirty.is_some()
    }

    /// Fill `buf` from the object starting at any byte `offset`.
    pub fn read_at(&self, offset: usize, buf: &mut [u8]) -> LargeObjectResult<()> {
        self.lock().read_at(offset, buf)
    }

    /// Overwrite bytes starting at any byte `offset`.
    pub fn write_at(&self, offset: usize, data: &[u8]) -> LargeObjectResult<()> {
        self.lock().write_at(offset, data)
    }

    /// The logical contents of chunk `index`.
    pub fn read_chunk(&self, index: usize) -> LargeObjectResult<Vec<u8>> {
        let mut state = self.lock();
        state.check_chunk(index)?;
        state.load(index)
    }

    /// Replace chunk `index`. `data` must be exactly the chunk's length.
    pub fn write_chunk(&self, index: usize, data: &[u8]) -> LargeObjectResult<()> {
        self.lock().write_chunk(index, data)
    }

    /// Read the whole object.
    pub fn read_all(&self) -> LargeObjectResult<Vec<u8>> {
        let mut out = vec![0u8; self.size];
        self.read_at(0, &mut out)?;
        Ok(out)
    }

    pub fn flush(&self) -> LargeObjectResult<()> {
        self.lock().flush()
    }

    /// Run a transaction step over the object's chunk table and chunks.
    /// Staged writes are flushed before `Start`/`Add` and dropped on `Abort`.
    pub fn transaction(&self, kind: TransactionKind, flags: u32) -> LargeObjectResult<TransactionReport> {
        let mut state = self.lock();
        match kind {
            TransactionKind::Abort => state.dirty = None,
            TransactionKind::Start | TransactionKind::Add => state.flush()?,
        }
        Ok(state.compander.do_transaction_against(kind, flags)?)
    }
}

impl Drop for LargeObject {
    fn drop(&mut self) {
        if let Err(e) = self.lock().flush() {
            warn!(id = %self.id, error = %e, "flush on close failed");
        }
    }
}

impl std::fmt::Debug for LargeObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LargeObject")
            .field("id", &self.id)
            .field("size", &self.size)
            .field("block", &self.block)
            .finish()
    }
}
