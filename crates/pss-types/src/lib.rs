//! Foundation types for the persistent store stack.
//!
//! Every other `pss-*` crate depends on `pss-types`.
//!
//! # Key Types
//!
//! - [`PssId`]: opaque 32-bit object identifier, unique within one store
//! - [`FourCc`]: four-character code used for signatures and magic values
//! - [`SUB_PAGE_SIZE`]: the default chunk granularity of large objects

pub mod error;
pub mod fourcc;
pub mod id;

pub use error::TypeError;
pub use fourcc::FourCc;
pub use id::{PssId, NO_PSS_ID};

/// Default chunk granularity for large objects (1 KiB).
pub const SUB_PAGE_SIZE: usize = 1024;

/// Size in bytes of one [`PssId`] when written into a chunk table.
pub const PSS_ID_SIZE: usize = std::mem::size_of::<u32>();

/// Round `n` up to the next multiple of four.
pub const fn long_align(n: usize) -> usize {
    (n + 3) & !3
}

/// Number of `block_size` chunks needed to hold `size` bytes.
pub const fn chunk_count(size: usize, block_size: usize) -> usize {
    size.div_ceil(block_size)
}
