//! Chunk planning and parallel region writes for gridstore
//!
//! This crate sits between datasets and the storage engine:
//!
//! | Module | Role |
//! |--------|------|
//! | [`chunking`] | Chunk advisor and validator |
//! | [`config`] | Structured configuration and legacy option translation |
//! | [`source`], [`document`] | Where fragments come from |
//! | [`processing`], [`packing`], [`encoding`] | Preparing fragments and their storage layout |
//! | [`template`] | Metadata-only archive skeletons spanning the full extent |
//! | [`locator`] | Where a fragment belongs in an archive |
//! | [`controller`] | Write, verify and retry |
//! | [`converter`] | The configured facade over all of the above |
//!
//! Parallel writers each run their own [`Converter::write_region`] against a
//! shared template; the archive's shape never changes after the template is
//! built, and writers must not overlap along the sequence dimension.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod chunking;
pub mod config;
pub mod controller;
pub mod converter;
pub mod document;
pub mod encoding;
pub mod locator;
pub mod packing;
pub mod processing;
pub mod source;
pub mod template;

pub use chunking::{
    default_target_chunk_size_bytes, recommend_chunks, set_default_target_chunk_size_bytes,
    validate_chunks, ChunkAdvisor, ChunkRecommendation, ChunkValidation, ChunkValidator,
};
pub use config::{ConverterConfig, LegacyOptions};
pub use controller::{RetryPolicy, WriteController, WriteMode, WriteOutcome, WriteSummary};
pub use converter::{Converter, ConverterBuilder};
pub use document::DatasetDocument;
pub use encoding::VariableEncoder;
pub use locator::locate;
pub use packing::{add_valid_range_attributes, Packer};
pub use processing::ProcessOptions;
pub use source::{open_source, ArchiveSource, DatasetSource, JsonFileSource, MemorySource};
pub use template::TemplateBuilder;
