//! Chunked, compressed large objects.
//!
//! A large object lives in an ordinary [`Store`](pss_store::Store) as a
//! graph of plain objects:
//!
//! ```text
//! root (32 bytes) --> compander name
//!                 --> compander parameters (optional)
//!                 --> chunk table --> chunk 0, chunk 1, ...
//! ```
//!
//! [`LargeObjectStore`] builds, copies, streams and removes these graphs.
//! Construction runs as a saga: every object is allocated provisionally
//! and undone one by one if a later step fails, and the root only gains
//! its `paok` signature once everything else is in place.
//!
//! # Key Types
//!
//! - [`LargeObjectStore`] -- create / restore / delete / duplicate / backup
//! - [`LargeObject`] -- an open object with byte-range and chunk I/O
//! - [`Pipe`] -- byte transport for streaming in and out
//! - [`ProgressCallback`] -- progress reports for long operations
//! - [`LargeObjectAllocator`] -- per-compander creation hook

pub mod allocator;
pub mod config;
pub mod error;
pub mod handle;
pub mod pipe;
pub mod progress;
pub mod root;
mod saga;
pub mod store;

pub use allocator::{ChunkTableAllocator, LargeObjectAllocator, PixelMapAllocator};
pub use config::LargeObjectConfig;
pub use error::{LargeObjectError, LargeObjectResult};
pub use handle::LargeObject;
pub use pipe::{MemoryPipe, Pipe, StreamPipe};
pub use progress::{ProgressCallback, ProgressReport};
pub use root::{LargeObjectRoot, PackageRoot, RootFlags, PAOK};
pub use store::{CreateOptions, LargeObjectInfo, LargeObjectStore, STREAM_HEADER_SIZE};
