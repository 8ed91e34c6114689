use pss_types::PssId;

/// Errors from store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The requested object does not exist in this store.
    #[error("object not found: {0}")]
    ObjectNotFound(PssId),

    /// The store (or a destination buffer) has no room for the request.
    #[error("out of store memory")]
    NoMemory,

    /// The store is read-only or ROM.
    #[error("store is write-protected")]
    WriteProtected,

    /// A root record is malformed or incomplete.
    #[error("bad package: {0}")]
    BadPackage(String),

    /// A root record carries an unsupported kind or version.
    #[error("bad package version: expected {expected}, found {found}")]
    BadPackageVersion { expected: u32, found: u32 },

    /// A read or write reaches past the end of an object or buffer.
    #[error("object overrun: offset {offset} + len {len} exceeds size {size}")]
    ObjectOverRun {
        offset: usize,
        len: usize,
        size: usize,
    },

    /// The backend does not support this call.
    #[error("call not implemented: {0}")]
    CallNotImplemented(&'static str),

    /// Internal bookkeeping disagrees with the stored objects.
    #[error("integrity violation: {0}")]
    IntegrityViolation(String),

    /// A persisted store image failed validation.
    #[error("corrupt store image: {0}")]
    CorruptImage(String),

    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// I/O error from image persistence.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Returns `true` for [`StoreError::ObjectNotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ObjectNotFound(_))
    }

    /// Returns `true` for [`StoreError::NoMemory`].
    pub fn is_no_memory(&self) -> bool {
        matches!(self, Self::NoMemory)
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
