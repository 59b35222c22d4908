//! Dataset sources
//!
//! A [`DatasetSource`] produces a fresh [`MemDataset`] each time it is
//! opened. The write controller opens its source again on every attempt, so
//! a source that hands back bad data once gets a second chance.

use crate::document::DatasetDocument;
use gridstore_core::{MemDataset, Region, Result};
use gridstore_storage::{open_store, Archive};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Something that can be materialised as a dataset
pub trait DatasetSource: Send + Sync {
    /// Load the dataset
    fn open(&self) -> Result<MemDataset>;

    /// Human-readable description used in logs
    fn describe(&self) -> String;
}

/// JSON dataset document on disk
#[derive(Debug, Clone)]
pub struct JsonFileSource {
    path: PathBuf,
}

impl JsonFileSource {
    /// Source reading `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl DatasetSource for JsonFileSource {
    fn open(&self) -> Result<MemDataset> {
        debug!(path = %self.path.display(), "reading dataset document");
        DatasetDocument::read(&self.path)?.into_dataset()
    }

    fn describe(&self) -> String {
        format!("json:{}", self.path.display())
    }
}

/// An existing archive read in full
#[derive(Debug, Clone)]
pub struct ArchiveSource {
    path: PathBuf,
}

impl ArchiveSource {
    /// Source reading the archive rooted at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl DatasetSource for ArchiveSource {
    fn open(&self) -> Result<MemDataset> {
        debug!(path = %self.path.display(), "loading archive");
        Archive::open(open_store(&self.path)?)?.load(&Region::new())
    }

    fn describe(&self) -> String {
        format!("archive:{}", self.path.display())
    }
}

/// An in-memory dataset, cloned on every open
#[derive(Clone, Default)]
pub struct MemorySource {
    dataset: MemDataset,
}

impl MemorySource {
    /// Wrap `dataset`
    pub fn new(dataset: MemDataset) -> Self {
        Self { dataset }
    }
}

impl fmt::Debug for MemorySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemorySource")
            .field("variables", &self.dataset.variables().len())
            .finish()
    }
}

impl DatasetSource for MemorySource {
    fn open(&self) -> Result<MemDataset> {
        Ok(self.dataset.clone())
    }

    fn describe(&self) -> String {
        "memory".into()
    }
}

impl From<MemDataset> for MemorySource {
    fn from(dataset: MemDataset) -> Self {
        Self::new(dataset)
    }
}

/// Pick a source for `path`: a directory holding an archive, else a JSON document
pub fn open_source(path: impl AsRef<Path>) -> Box<dyn DatasetSource> {
    let path = path.as_ref();
    if path.is_dir() && path.join("archive.json").is_file() {
        Box::new(ArchiveSource::new(path))
    } else {
        Box::new(JsonFileSource::new(path))
    }
}
