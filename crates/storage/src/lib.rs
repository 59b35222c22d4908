//! Chunked array storage for gridstore
//!
//! This crate implements the persistent side of an archive:
//! - [`Store`]: byte-blob key-value backends ([`FilesystemStore`], [`MemoryStore`])
//! - [`format`]: the checksummed chunk byte format
//! - [`Codec`]: scale-offset quantization and zstd compression
//! - [`Array`]: metadata-only creation, region read/write, resize and append
//! - [`Archive`]: coordinate and variable arrays grouped under one root
//!
//! Nothing here knows about chunk planning or retries; those live in
//! `gridstore-engine`.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod archive;
pub mod array;
pub mod codec;
pub mod format;
pub mod store;

pub use archive::{Archive, ArchiveMetadata};
pub use array::{Array, ArrayMetadata};
pub use codec::{Codec, Compression, ScaleOffset};
pub use store::{FilesystemStore, KeyLocks, MemoryStore, Store, StoreRef};

use std::path::Path;
use std::sync::Arc;

/// Open a filesystem store rooted at `path` as a shared handle
pub fn open_store(path: impl AsRef<Path>) -> gridstore_core::Result<StoreRef> {
    Ok(Arc::new(FilesystemStore::open(path)?))
}
