//! Block compression for chunked store objects.
//!
//! A large object's content is split into fixed-size chunks, each stored in
//! its own store object and listed in a chunk table. A [`StoreCompander`]
//! is bound to one chunk table and moves whole chunks in and out through a
//! byte codec.
//!
//! # Layers
//!
//! - [`Compressor`] / [`Decompressor`] -- stateless byte codecs (zstd)
//! - [`CodecPool`] / [`CompanderSource`] -- pooled or private codec sets
//! - [`ChunkTable`] -- chunk ids, stored-size rules, transaction helper
//! - [`ChunkTableCompander`] / [`PixelMapCompander`] -- the companders
//! - [`CompanderRegistry`] -- name to compander factory
//!
//! # Stored form
//!
//! A chunk object of length zero reads as zeros. One whose length equals
//! the chunk's logical length holds raw bytes. Anything shorter is
//! compressed. Companders never store a compressed form that is not
//! strictly smaller than the input.

pub mod chunk_table;
pub mod chunked;
pub mod codec;
pub mod error;
pub mod pixel;
pub mod pool;
pub mod registry;
pub mod traits;

pub use chunk_table::{transaction_against, ChunkRead, ChunkTable};
pub use chunked::ChunkTableCompander;
pub use codec::{CodecSet, CodecSpec, Compressor, Decompressor, ZstdCompressor, ZstdDecompressor};
pub use error::{CompanderError, CompanderResult};
pub use pixel::{delta_decode, delta_encode, PixelMapCompander};
pub use pool::{CodecPool, CompanderSource, PooledCodec};
pub use registry::{
    CompanderEnv, CompanderFactory, CompanderRegistry, LZ_COMPANDER, PIXEL_MAP_COMPANDER,
    SIMPLE_COMPANDER,
};
pub use traits::{StoreCompander, TransactionKind, TransactionReport, TX_SKIP_EMPTY};
