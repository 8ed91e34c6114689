use std::sync::Arc;

use pss_store::Store;
use pss_types::PssId;
use tracing::{debug, trace};

use crate::chunk_table::{transaction_against, ChunkRead};
use crate::chunked::{expand_into, pack_and_store, Bound};
use crate::codec::CodecSpec;
use crate::error::{CompanderError, CompanderResult};
use crate::pool::CodecPool;
use crate::traits::{StoreCompander, TransactionKind, TransactionReport};

const WORD: usize = std::mem::size_of::<u32>();

/// `dst[i] ^= src[i]` over `dst.len()` words, eight at a time.
fn xor_run(dst: &mut [u32], src: &[u32]) {
    let src = &src[..dst.len()];
    let mut d = dst.chunks_exact_mut(8);
    let mut s = src.chunks_exact(8);
    for (d8, s8) in (&mut d).zip(&mut s) {
        d8[0] ^= s8[0];
        d8[1] ^= s8[1];
        d8[2] ^= s8[2];
        d8[3] ^= s8[3];
        d8[4] ^= s8[4];
        d8[5] ^= s8[5];
        d8[6] ^= s8[6];
        d8[7] ^= s8[7];
    }
    for (dw, sw) in d.into_remainder().iter_mut().zip(s.remainder()) {
        *dw ^= sw;
    }
}

/// Replace every row after the first with its XOR against the row above.
/// Rows are processed bottom-up so each one is XORed with original pixels.
/// A short final row is XORed over the words it has.
pub fn delta_encode(words: &mut [u32], row_words: usize) {
    if row_words == 0 {
        return;
    }
    let rows = words.len().div_ceil(row_words);
    for row in (1..rows).rev() {
        let (above, rest) = words.split_at_mut(row * row_words);
        let n = row_words.min(rest.len());
        let cur = &mut rest[..n];
        xor_run(cur, &above[(row - 1) * row_words..]);
    }
}

/// Inverse of [`delta_encode`]: rows are rebuilt top-down.
pub fn delta_decode(words: &mut [u32], row_words: usize) {
    if row_words == 0 {
        return;
    }
    let rows = words.len().div_ceil(row_words);
    for row in 1..rows {
        let (above, rest) = words.split_at_mut(row * row_words);
        let n = row_words.min(rest.len());
        let cur = &mut rest[..n];
        xor_run(cur, &above[(row - 1) * row_words..]);
    }
}

fn to_words(bytes: &[u8]) -> Vec<u32> {
    bytes
        .chunks_exact(WORD)
        .map(|w| u32::from_ne_bytes([w[0], w[1], w[2], w[3]]))
        .collect()
}

fn from_words(words: &[u32], bytes: &mut [u8]) {
    for (w, out) in words.iter().zip(bytes.chunks_exact_mut(WORD)) {
        out.copy_from_slice(&w.to_ne_bytes());
    }
}

/// Row arithmetic for one buffer length.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct RowGeometry {
    len: usize,
    words: usize,
    row_words: usize,
}

/// Compander for pixel maps: each chunk is delta-coded row against row
/// before it reaches the byte codec, so flat or repeating images compress
/// well. An all-zero chunk is stored as an empty object.
///
/// The parameter object holds the row width in bytes as a big-endian `u32`;
/// it must be a non-zero multiple of four.
pub struct PixelMapCompander {
    spec: CodecSpec,
    pool: Arc<CodecPool>,
    block_size: usize,
    row_bytes: usize,
    bound: Option<Bound>,
    geometry: Option<RowGeometry>,
    recomputes: usize,
}

impl PixelMapCompander {
    pub const NAME: &'static str = "CPixelMapCompander";

    pub fn new(spec: CodecSpec, pool: Arc<CodecPool>, block_size: usize) -> Self {
        Self {
            spec,
            pool,
            block_size,
            row_bytes: 0,
            bound: None,
            geometry: None,
            recomputes: 0,
        }
    }

    /// Encode a row width as a parameter blob.
    pub fn parameters(row_bytes: u32) -> [u8; 4] {
        row_bytes.to_be_bytes()
    }

    pub fn row_bytes(&self) -> usize {
        self.row_bytes
    }

    /// How many times the row geometry has been recomputed.
    pub fn geometry_recomputes(&self) -> usize {
        self.recomputes
    }

    fn geometry(&mut self, len: usize) -> RowGeometry {
        match self.geometry {
            Some(g) if g.len == len => g,
            _ => {
                let g = RowGeometry {
                    len,
                    words: len / WORD,
                    row_words: self.row_bytes / WORD,
                };
                self.recomputes += 1;
                trace!(len, row_words = g.row_words, "row geometry recomputed");
                self.geometry = Some(g);
                g
            }
        }
    }

    fn read_params(store: &dyn Store, parms_id: PssId) -> CompanderResult<usize> {
        if parms_id.is_none() {
            return Err(CompanderError::MissingParameters(Self::NAME));
        }
        let blob = store.read_object(parms_id)?;
        let raw: [u8; 4] = blob.as_slice().try_into().map_err(|_| {
            CompanderError::BadParameters(format!("expected 4 bytes, got {}", blob.len()))
        })?;
        let row_bytes = u32::from_be_bytes(raw) as usize;
        if row_bytes == 0 || row_bytes % WORD != 0 {
            return Err(CompanderError::BadParameters(format!(
                "row width {row_bytes} is not a positive multiple of {WORD}"
            )));
        }
        Ok(row_bytes)
    }

    fn bound(&mut self) -> CompanderResult<&mut Bound> {
        self.bound.as_mut().ok_or(CompanderError::NotInitialized)
    }
}

impl StoreCompander for PixelMapCompander {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn init(
        &mut self,
        store: Arc<dyn Store>,
        table_id: PssId,
        parms_id: PssId,
        shared: bool,
        read_only: bool,
    ) -> CompanderResult<()> {
        let row_bytes = Self::read_params(store.as_ref(), parms_id)?;
        let bound = Bound::new(
            store,
            table_id,
            shared,
            read_only,
            &self.pool,
            self.spec,
            self.block_size,
        )?;
        debug!(table = %table_id, row_bytes, shared, "pixel map compander bound");
        self.row_bytes = row_bytes;
        self.geometry = None;
        self.bound = Some(bound);
        Ok(())
    }

    fn block_size(&self) -> usize {
        self.block_size
    }

    fn read(&mut self, offset: usize, buf: &mut [u8]) -> CompanderResult<()> {
        let pieces = self.bound()?.pieces(offset, buf.len())?;
        for (index, range) in pieces {
            let out = &mut buf[range];
            let geometry = self.geometry(out.len());
            let Bound { table, source, .. } = self.bound()?;
            let filled = source.with_codec(|codec| match table.load_chunk(index, out, &mut codec.scratch)? {
                ChunkRead::Zero => Ok(false),
                ChunkRead::Raw => Ok(true),
                ChunkRead::Compressed(n) => expand_into(codec, index, n, out).map(|()| true),
            })?;
            if !filled {
                out.fill(0);
                continue;
            }
            let mut words = to_words(out);
            delta_decode(&mut words[..geometry.words], geometry.row_words);
            from_words(&words, out);
        }
        Ok(())
    }

    fn write(&mut self, offset: usize, data: &[u8]) -> CompanderResult<()> {
        let bound = self.bound()?;
        bound.check_writable()?;
        let pieces = bound.pieces(offset, data.len())?;
        for (index, range) in pieces {
            let chunk = &data[range];
            if chunk.iter().all(|&b| b == 0) {
                self.bound()?.table.clear_chunk(index)?;
                continue;
            }
            let geometry = self.geometry(chunk.len());
            let mut encoded = chunk.to_vec();
            let mut words = to_words(&encoded);
            delta_encode(&mut words[..geometry.words], geometry.row_words);
            from_words(&words, &mut encoded);

            let Bound { table, source, .. } = self.bound()?;
            source.with_codec(|codec| pack_and_store(codec, table, index, &encoded))?;
        }
        Ok(())
    }

    /// Always reports shared-style bookkeeping, whatever mode the codecs
    /// were bound in.
    fn do_transaction_against(
        &mut self,
        kind: TransactionKind,
        flags: u32,
    ) -> CompanderResult<TransactionReport> {
        let bound = self.bound()?;
        transaction_against(&bound.table, kind, flags, true)
    }

    fn is_read_only(&self) -> bool {
        self.bound.as_ref().is_some_and(|b| b.read_only)
    }
}

impl std::fmt::Debug for PixelMapCompander {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PixelMapCompander")
            .field("spec", &self.spec)
            .field("row_bytes", &self.row_bytes)
            .field("table", &self.bound.as_ref().map(|b| &b.table))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk_table::ChunkTable;
    use pss_store::InMemoryStore;
    use pss_types::PSS_ID_SIZE;
    use proptest::prelude::*;

    const BLOCK: usize = 1024;

    struct Fixture {
        store: Arc<InMemoryStore>,
        table: PssId,
        parms: PssId,
        pool: Arc<CodecPool>,
    }

    impl Fixture {
        fn new(chunks: usize, row_bytes: u32) -> Self {
            let store = Arc::new(InMemoryStore::new());
            let ids: Vec<PssId> = (0..chunks).map(|_| store.new_object(0).unwrap()).collect();
            let table = store.new_object(chunks * PSS_ID_SIZE).unwrap();
            store.write(table, 0, &PssId::encode_table(&ids)).unwrap();
            let parms = store.new_object(4).unwrap();
            store
                .write(parms, 0, &PixelMapCompander::parameters(row_bytes))
                .unwrap();
            Self {
                store,
                table,
                parms,
                pool: Arc::new(CodecPool::new()),
            }
        }

        fn compander(&self, shared: bool) -> PixelMapCompander {
            let mut c = PixelMapCompander::new(CodecSpec::DEFAULT, self.pool.clone(), BLOCK);
            c.init(self.store.clone(), self.table, self.parms, shared, false)
                .unwrap();
            c
        }

        fn stored_len(&self, index: usize) -> usize {
            ChunkTable::load(self.store.clone(), self.table, BLOCK)
                .unwrap()
                .stored_len(index)
                .unwrap()
        }
    }

    fn gradient(len: usize, row_bytes: usize) -> Vec<u8> {
        (0..len).map(|i| ((i / row_bytes) * 3 + i % 5) as u8).collect()
    }

    // -----------------------------------------------------------------------
    // Delta coding
    // -----------------------------------------------------------------------

    #[test]
    fn delta_of_identical_rows_is_zero_after_first() {
        let mut words: Vec<u32> = [1, 2, 3].repeat(4);
        delta_encode(&mut words, 3);
        assert_eq!(&words[..3], &[1, 2, 3]);
        assert!(words[3..].iter().all(|&w| w == 0));
        delta_decode(&mut words, 3);
        assert_eq!(words, [1, 2, 3].repeat(4));
    }

    #[test]
    fn short_final_row_is_delta_coded() {
        let original: Vec<u32> = (1..=11).collect();
        let mut words = original.clone();
        delta_encode(&mut words, 4);
        assert_eq!(words[8], 9 ^ 5);
        assert_eq!(words[10], 11 ^ 7);
        delta_decode(&mut words, 4);
        assert_eq!(words, original);
    }

    #[test]
    fn zero_row_width_is_identity() {
        let mut words = vec![5u32, 6, 7];
        delta_encode(&mut words, 0);
        assert_eq!(words, vec![5, 6, 7]);
    }

    proptest! {
        #[test]
        fn delta_roundtrips_any_geometry(
            row_words in 1usize..=40,
            rows in 1usize..=12,
            tail in 0usize..=7,
            seed in any::<u32>(),
        ) {
            let len = row_words * rows + tail;
            let original: Vec<u32> = (0..len as u32)
                .map(|i| i.wrapping_mul(2_654_435_761).wrapping_add(seed))
                .collect();
            let mut words = original.clone();
            delta_encode(&mut words, row_words);
            delta_decode(&mut words, row_words);
            prop_assert_eq!(words, original);
        }

        #[test]
        fn compander_roundtrips_any_chunk(
            row_words in 1u32..=64,
            data in proptest::collection::vec(any::<u8>(), 1..=BLOCK),
        ) {
            let fx = Fixture::new(1, row_words * 4);
            let mut c = fx.compander(false);
            c.write(0, &data).unwrap();
            let mut out = vec![0xEEu8; data.len()];
            c.read(0, &mut out).unwrap();
            prop_assert_eq!(out, data);
        }
    }

    // -----------------------------------------------------------------------
    // Compander
    // -----------------------------------------------------------------------

    #[test]
    fn image_rows_roundtrip_and_compress() {
        let fx = Fixture::new(2, 64);
        let mut c = fx.compander(false);
        let data = gradient(2 * BLOCK, 64);
        c.write(0, &data).unwrap();
        assert!(fx.stored_len(0) < BLOCK);

        let mut out = vec![0u8; 2 * BLOCK];
        c.read(0, &mut out).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn all_zero_chunk_is_stored_empty() {
        let fx = Fixture::new(1, 16);
        let mut c = fx.compander(false);
        c.write(0, &[3u8; BLOCK]).unwrap();
        assert!(fx.stored_len(0) > 0);

        c.write(0, &[0u8; BLOCK]).unwrap();
        assert_eq!(fx.stored_len(0), 0);

        for len in [BLOCK, 100, 4] {
            let mut out = vec![0xFFu8; len];
            c.read(0, &mut out).unwrap();
            assert!(out.iter().all(|&b| b == 0));
        }
    }

    #[test]
    fn unaligned_tail_bytes_survive() {
        let fx = Fixture::new(1, 8);
        let mut c = fx.compander(true);
        let data = gradient(BLOCK - 3, 8);
        c.write(0, &data).unwrap();
        let mut out = vec![0u8; data.len()];
        c.read(0, &mut out).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn geometry_is_recomputed_only_on_length_change() {
        let fx = Fixture::new(3, 32);
        let mut c = fx.compander(false);
        c.write(0, &gradient(2 * BLOCK, 32)).unwrap();
        assert_eq!(c.geometry_recomputes(), 1);

        c.write(2 * BLOCK, &gradient(200, 32)).unwrap();
        assert_eq!(c.geometry_recomputes(), 2);

        let mut out = vec![0u8; 200];
        c.read(2 * BLOCK, &mut out).unwrap();
        assert_eq!(c.geometry_recomputes(), 2);

        let mut out = vec![0u8; BLOCK];
        c.read(0, &mut out).unwrap();
        assert_eq!(c.geometry_recomputes(), 3);
    }

    #[test]
    fn missing_parameters_are_rejected() {
        let fx = Fixture::new(1, 16);
        let mut c = PixelMapCompander::new(CodecSpec::DEFAULT, fx.pool.clone(), BLOCK);
        let err = c
            .init(fx.store.clone(), fx.table, PssId::default(), false, false)
            .unwrap_err();
        assert!(matches!(err, CompanderError::MissingParameters("CPixelMapCompander")));
    }

    #[test]
    fn odd_row_width_is_rejected() {
        let fx = Fixture::new(1, 10);
        let mut c = PixelMapCompander::new(CodecSpec::DEFAULT, fx.pool.clone(), BLOCK);
        let err = c
            .init(fx.store.clone(), fx.table, fx.parms, false, false)
            .unwrap_err();
        assert!(matches!(err, CompanderError::BadParameters(_)));
    }

    // Characterization: transaction bookkeeping is reported as shared even
    // when the compander was bound with private codecs.
    #[test]
    fn transaction_always_reports_shared() {
        let fx = Fixture::new(2, 16);
        let mut c = fx.compander(false);
        let report = c.do_transaction_against(TransactionKind::Start, 0).unwrap();
        assert!(report.shared);
        assert_eq!(report.objects, 3);
        c.do_transaction_against(TransactionKind::Abort, 0).unwrap();
        assert!(!fx.store.in_transaction());
    }
}
