//! Concurrency-serializing store decorator.
//!
//! [`MuxStore`] makes one store safely callable from many threads: each call
//! holds a single store-wide mutex. Read-only calls reach the wrapped store
//! directly, while mutating calls are routed through a [`StoreMonitor`], the
//! distinguished context in which mutation happens.

pub mod monitor;
pub mod mux;

pub use monitor::StoreMonitor;
pub use mux::{MuxStats, MuxStore};
