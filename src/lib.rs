//! # gridstore
//!
//! Chunked, compressed archives for gridded time-series datasets, built so
//! that many independent writers can fill one archive in parallel.
//!
//! ## Quick Start
//!
//! ```no_run
//! use gridstore::prelude::*;
//!
//! # fn main() -> gridstore::Result<()> {
//! let sample = DatasetDocument::read("sample.json")?.into_dataset()?;
//!
//! // One metadata-only template for the whole year
//! build_template(
//!     &sample,
//!     "./waves",
//!     parse_datetime("2000-01-01")?,
//!     parse_datetime("2000-12-31")?,
//!     None,
//!     &ChunkPlan::new().with("time", 24),
//! )?;
//!
//! // Each worker writes its own slice; the region is located from the
//! // fragment's time coordinate
//! let fragment = DatasetDocument::read("january.json")?.into_dataset()?;
//! write_region(&fragment, "./waves", None, &ConverterConfig::default())?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Layers
//!
//! - [`gridstore_core`]: data model and errors
//! - [`gridstore_storage`]: stores, chunk format, arrays and archives
//! - [`gridstore_engine`]: chunk planning, templates, region location and
//!   the retrying write controller
//!
//! This crate re-exports all three and adds the free functions in [`api`].

#![warn(missing_docs)]

pub mod api;
pub mod prelude;

pub use api::{append, build_template, convert, recommend_chunks, validate_chunks, write_region};

pub use gridstore_core::time::{date_range, format_datetime, parse_datetime};
pub use gridstore_core::{
    AccessPattern, Attributes, ChunkPlan, Coordinate, CoordinateValues, DType, Dataset,
    DimensionSpec, Error, Frequency, MemDataset, MissingCheckSpec, Region, Result, Variable,
};
pub use gridstore_engine::{
    locate, open_source, ArchiveSource, ChunkAdvisor, ChunkRecommendation, ChunkValidation,
    ChunkValidator, Converter, ConverterBuilder, ConverterConfig, DatasetDocument, DatasetSource,
    JsonFileSource, MemorySource, ProcessOptions, RetryPolicy, TemplateBuilder, WriteController,
    WriteMode, WriteSummary,
};
pub use gridstore_storage::{
    open_store, Archive, Compression, FilesystemStore, MemoryStore, Store, StoreRef,
};
