//! Library error hierarchy. The CLI boundary wraps these in `anyhow::Result`
//! the way the teacher's own `main.rs`/`handlers.rs` wrap its library calls;
//! this type exists so downstream callers of the library crate get a
//! documented, matchable error contract instead of being forced onto
//! `anyhow` themselves (the pattern `ptree-core` uses at its own library
//! boundary).

use std::path::PathBuf;

use thiserror::Error as ThisError;

/// Capacity signal caught and retried entirely inside the store wrapper;
/// never escapes [`Error::TransientStoreCapacity`] to a caller in practice,
/// but is exposed so the wrapper's retry loop can match on it internally.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CapacityKind {
    MapFull,
    MapResized,
}

#[derive(Debug, ThisError)]
pub enum Error {
    /// `MapFull`/`MapResized` - recovered locally by the transaction
    /// wrapper's retry loop; surfacing this variant indicates a bug in the
    /// wrapper, since every caller-visible `transact` call retries it away.
    #[error("transient store capacity signal: {0:?}")]
    TransientStoreCapacity(CapacityKind),

    /// Corruption, schema version mismatch, or an I/O failure opening the
    /// environment: not recoverable within the current process.
    #[error("fatal store error: {0}")]
    StoreFatal(String),

    /// A per-entry problem during scan or hash (stat failed, non-regular
    /// file, invalid name, open/mmap failure): logged and skipped, never
    /// aborts the surrounding operation.
    #[error("skippable I/O error for {path}: {reason}")]
    IoSkippable { path: PathBuf, reason: String },

    /// An entry scheduled for hashing no longer matched store state by the
    /// time its result was ready; silently dropped by the hash queue.
    #[error("queue entry raced with a concurrent store update: {0}")]
    QueueRaced(String),

    /// Invalid configuration at startup; the process reports and exits.
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),
}

pub type Result<T> = std::result::Result<T, Error>;
