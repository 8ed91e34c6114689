use std::sync::Arc;

use pss_store::Store;
use pss_types::PssId;

use crate::error::CompanderResult;

/// Which transaction step [`StoreCompander::do_transaction_against`] performs
/// over the compander's objects.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransactionKind {
    /// Open a transaction against the chunk table and record every chunk.
    Start,
    /// Record every chunk in the already-open transaction.
    Add,
    /// Undo the chunk table and every chunk separately.
    Abort,
}

/// Outcome of a transaction step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransactionReport {
    /// Whether the step ran in shared-codec style.
    pub shared: bool,
    /// Number of store objects the step touched.
    pub objects: usize,
}

/// Transaction flag: skip chunks whose stored size is zero.
pub const TX_SKIP_EMPTY: u32 = 1;

/// A stateful adapter that compresses one logical object into fixed-size
/// chunks held in a store.
///
/// A compander is created unbound by a registry factory and bound to its
/// objects with [`init`](Self::init). `read` and `write` take offsets that
/// are multiples of [`block_size`](Self::block_size); a buffer may span
/// several chunks, and only the final chunk of the object may be short.
/// Reads must ask for each chunk's exact logical length.
pub trait StoreCompander: Send {
    /// Registry name persisted alongside objects that use this compander.
    fn name(&self) -> &'static str;

    /// Bind to `store`. `table_id` names the chunk table; `parms_id` names
    /// the parameter object or is [`NO_PSS_ID`](pss_types::NO_PSS_ID).
    /// `shared` selects pooled codecs over a private set.
    fn init(
        &mut self,
        store: Arc<dyn Store>,
        table_id: PssId,
        parms_id: PssId,
        shared: bool,
        read_only: bool,
    ) -> CompanderResult<()>;

    /// Chunk granularity in bytes.
    fn block_size(&self) -> usize;

    fn read(&mut self, offset: usize, buf: &mut [u8]) -> CompanderResult<()>;

    fn write(&mut self, offset: usize, data: &[u8]) -> CompanderResult<()>;

    fn do_transaction_against(
        &mut self,
        kind: TransactionKind,
        flags: u32,
    ) -> CompanderResult<TransactionReport>;

    fn is_read_only(&self) -> bool;
}
