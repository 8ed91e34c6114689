use std::sync::Arc;

use pss_store::{Store, StoreError};
use pss_types::PssId;
use tracing::debug;

use crate::chunk_table::{transaction_against, ChunkRead, ChunkTable};
use crate::codec::{CodecSet, CodecSpec};
use crate::error::{CompanderError, CompanderResult};
use crate::pool::{CodecPool, CompanderSource};
use crate::traits::{StoreCompander, TransactionKind, TransactionReport};

/// State a compander holds once bound by `init`.
pub(crate) struct Bound {
    pub(crate) table: ChunkTable,
    pub(crate) source: CompanderSource,
    pub(crate) read_only: bool,
}

impl Bound {
    pub(crate) fn new(
        store: Arc<dyn Store>,
        table_id: PssId,
        shared: bool,
        read_only: bool,
        pool: &Arc<CodecPool>,
        spec: CodecSpec,
        block_size: usize,
    ) -> CompanderResult<Self> {
        Ok(Self {
            table: ChunkTable::load(store, table_id, block_size)?,
            source: CompanderSource::new(shared, pool, spec, block_size)?,
            read_only,
        })
    }

    /// Split `len` bytes at `offset` into `(chunk index, byte range)` pairs.
    pub(crate) fn pieces(
        &self,
        offset: usize,
        len: usize,
    ) -> CompanderResult<Vec<(usize, std::ops::Range<usize>)>> {
        let block = self.table.block_size();
        let chunks = self.table.chunk_range(offset, len)?;
        Ok(chunks
            .enumerate()
            .map(|(n, index)| {
                let start = n * block;
                (index, start..(start + block).min(len))
            })
            .collect())
    }

    pub(crate) fn check_writable(&self) -> CompanderResult<()> {
        if self.read_only {
            return Err(StoreError::WriteProtected.into());
        }
        Ok(())
    }
}

/// Decompress `packed` into `buf`, which must come out exactly full.
pub(crate) fn expand_into(
    codec: &mut CodecSet,
    index: usize,
    packed: usize,
    buf: &mut [u8],
) -> CompanderResult<()> {
    let CodecSet {
        decompressor,
        scratch,
        ..
    } = codec;
    let produced = decompressor.decompress(&scratch[..packed], buf)?;
    if produced != buf.len() {
        return Err(CompanderError::CorruptChunk {
            index,
            reason: format!("expanded to {produced} bytes, expected {}", buf.len()),
        });
    }
    Ok(())
}

/// Compress `data` and store the smaller of the packed and raw forms.
pub(crate) fn pack_and_store(
    codec: &mut CodecSet,
    table: &mut ChunkTable,
    index: usize,
    data: &[u8],
) -> CompanderResult<()> {
    let packed = codec.compressor.compress(data)?;
    if packed.len() < data.len() {
        table.store_chunk(index, &packed)
    } else {
        table.store_chunk(index, data)
    }
}

/// The default compander: each chunk is compressed on its own with a byte
/// codec and stored in one object listed in the chunk table.
pub struct ChunkTableCompander {
    name: &'static str,
    spec: CodecSpec,
    pool: Arc<CodecPool>,
    block_size: usize,
    bound: Option<Bound>,
}

impl ChunkTableCompander {
    pub fn new(name: &'static str, spec: CodecSpec, pool: Arc<CodecPool>, block_size: usize) -> Self {
        Self {
            name,
            spec,
            pool,
            block_size,
            bound: None,
        }
    }

    pub fn spec(&self) -> CodecSpec {
        self.spec
    }

    /// Whether codecs come from the shared pool. `false` before `init`.
    pub fn is_shared(&self) -> bool {
        self.bound.as_ref().is_some_and(|b| b.source.is_shared())
    }

    fn bound(&mut self) -> CompanderResult<&mut Bound> {
        self.bound.as_mut().ok_or(CompanderError::NotInitialized)
    }
}

impl StoreCompander for ChunkTableCompander {
    fn name(&self) -> &'static str {
        self.name
    }

    fn init(
        &mut self,
        store: Arc<dyn Store>,
        table_id: PssId,
        _parms_id: PssId,
        shared: bool,
        read_only: bool,
    ) -> CompanderResult<()> {
        let bound = Bound::new(
            store,
            table_id,
            shared,
            read_only,
            &self.pool,
            self.spec,
            self.block_size,
        )?;
        debug!(
            compander = self.name,
            table = %table_id,
            chunks = bound.table.len(),
            shared,
            "compander bound"
        );
        self.bound = Some(bound);
        Ok(())
    }

    fn block_size(&self) -> usize {
        self.block_size
    }

    fn read(&mut self, offset: usize, buf: &mut [u8]) -> CompanderResult<()> {
        let bound = self.bound()?;
        let pieces = bound.pieces(offset, buf.len())?;
        let Bound { table, source, .. } = bound;
        for (index, range) in pieces {
            let out = &mut buf[range];
            source.with_codec(|codec| match table.load_chunk(index, out, &mut codec.scratch)? {
                ChunkRead::Zero => {
                    out.fill(0);
                    Ok(())
                }
                ChunkRead::Raw => Ok(()),
                ChunkRead::Compressed(n) => expand_into(codec, index, n, out),
            })?;
        }
        Ok(())
    }

    fn write(&mut self, offset: usize, data: &[u8]) -> CompanderResult<()> {
        let bound = self.bound()?;
        bound.check_writable()?;
        let pieces = bound.pieces(offset, data.len())?;
        let Bound { table, source, .. } = bound;
        for (index, range) in pieces {
            let chunk = &data[range];
            source.with_codec(|codec| pack_and_store(codec, table, index, chunk))?;
        }
        Ok(())
    }

    fn do_transaction_against(
        &mut self,
        kind: TransactionKind,
        flags: u32,
    ) -> CompanderResult<TransactionReport> {
        let bound = self.bound()?;
        let shared = bound.source.is_shared();
        transaction_against(&bound.table, kind, flags, shared)
    }

    fn is_read_only(&self) -> bool {
        self.bound.as_ref().is_some_and(|b| b.read_only)
    }
}

impl std::fmt::Debug for ChunkTableCompander {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkTableCompander")
            .field("name", &self.name)
            .field("spec", &self.spec)
            .field("block_size", &self.block_size)
            .field("table", &self.bound.as_ref().map(|b| &b.table))
            .finish()
    }
}
