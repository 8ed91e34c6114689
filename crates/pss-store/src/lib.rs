//! Byte-object storage for the persistent store stack.
//!
//! A store is a flat namespace of mutable, variable-size byte objects keyed
//! by [`PssId`](pss_types::PssId). The store never interprets object
//! contents; grouping objects into larger structures is the business of the
//! layers above.
//!
//! # Backends
//!
//! All backends implement the [`Store`] trait:
//!
//! - [`InMemoryStore`] -- `BTreeMap`-based store with transactions, fault
//!   injection, and image persistence
//! - [`ReadOnlyStore`] -- read-only view that refuses every mutation
//!
//! # Helpers
//!
//! - [`CachedReadStore`] -- read-through cache over one object
//!
//! # Design Rules
//!
//! 1. Only single-object allocation within a transaction is atomic.
//! 2. Rollback is always explicit (`separately_abort`, `abort`).
//! 3. All errors are propagated, never silently ignored.

pub mod cached;
pub mod config;
pub mod error;
pub mod image;
pub mod memory;
pub mod readonly;
pub mod traits;

pub use cached::CachedReadStore;
pub use config::StoreConfig;
pub use error::{StoreError, StoreResult};
pub use image::StoreImage;
pub use memory::InMemoryStore;
pub use readonly::ReadOnlyStore;
pub use traits::{Store, XipObjectInfo};
