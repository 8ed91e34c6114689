use pss_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CompanderError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("destination too small: need {needed} bytes, have {capacity}")]
    NoMemory { needed: usize, capacity: usize },

    #[error("no compander registered under {0:?}")]
    UnknownCompander(String),

    #[error("codec failure: {0}")]
    Codec(String),

    #[error("access at offset {offset} (len {len}) is not aligned to block size {block_size}")]
    Misaligned {
        offset: usize,
        len: usize,
        block_size: usize,
    },

    #[error("{0} requires a parameter object")]
    MissingParameters(&'static str),

    #[error("bad compander parameters: {0}")]
    BadParameters(String),

    #[error("compander used before init")]
    NotInitialized,

    #[error("corrupt chunk {index}: {reason}")]
    CorruptChunk { index: usize, reason: String },
}

impl CompanderError {
    /// `true` if this is, or wraps, an out-of-memory condition.
    pub fn is_no_memory(&self) -> bool {
        match self {
            Self::NoMemory { .. } => true,
            Self::Store(e) => e.is_no_memory(),
            _ => false,
        }
    }

    /// `true` if this wraps [`StoreError::ObjectNotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Store(e) if e.is_not_found())
    }
}

pub type CompanderResult<T> = Result<T, CompanderError>;
