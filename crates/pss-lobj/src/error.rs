use pss_compander::CompanderError;
use pss_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LargeObjectError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Compander(#[from] CompanderError),

    #[error("pipe I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed backup stream: {0}")]
    BadStream(String),

    #[error("object of {0} bytes is too large for a root record")]
    TooLarge(usize),
}

impl LargeObjectError {
    /// `true` if the underlying cause is a missing store object.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Store(e) => e.is_not_found(),
            Self::Compander(e) => e.is_not_found(),
            _ => false,
        }
    }

    /// `true` if the underlying cause is an out-of-memory condition.
    pub fn is_no_memory(&self) -> bool {
        match self {
            Self::Store(e) => e.is_no_memory(),
            Self::Compander(e) => e.is_no_memory(),
            _ => false,
        }
    }

    /// `true` if the object or store refused a write.
    pub fn is_write_protected(&self) -> bool {
        matches!(
            self,
            Self::Store(StoreError::WriteProtected)
                | Self::Compander(CompanderError::Store(StoreError::WriteProtected))
        )
    }
}

pub type LargeObjectResult<T> = Result<T, LargeObjectError>;
