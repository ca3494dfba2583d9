//! repotap: local content-addressed repository indexer. Walks published
//! directory trees, BLAKE3-hashes every file into an embedded transactional
//! store, and writes peer-syncable manifests under an `obj/` directory.

pub mod codec;
pub mod engine;
pub mod error;
pub mod hash;
pub mod hasher;
pub mod manifest;
pub mod mount;
pub mod path;
pub mod queue;
pub mod scanner;
pub mod store;
pub mod types;
pub mod utils;

pub use error::{CapacityKind, Error, Result};
pub use types::{Config, Engine, PublishedPath};
