//! Free-function entry points.
//!
//! Each function builds a [`Converter`] from the given configuration and
//! runs one operation against a filesystem archive at `archive`. Use
//! [`Converter`] directly to reuse one configuration across calls or to read
//! fragments from other sources.

use crate::{
    AccessPattern, ChunkPlan, ChunkRecommendation, ChunkValidation, Converter, ConverterConfig,
    DimensionSpec, Frequency, MemDataset, MemorySource, ProcessOptions, Region, Result,
    WriteSummary,
};
use chrono::NaiveDateTime;
use gridstore_core::time::format_datetime;
use gridstore_storage::{open_store, Archive};
use std::path::Path;

/// Recommend chunk lengths for `dims`.
///
/// `target_chunk_size_bytes` falls back to the process-wide default when
/// `None`.
pub fn recommend_chunks(
    dims: &[DimensionSpec],
    dtype_size_bytes: usize,
    pattern: AccessPattern,
    target_chunk_size_bytes: Option<f64>,
) -> Result<ChunkRecommendation> {
    gridstore_engine::recommend_chunks(dims, dtype_size_bytes, pattern, target_chunk_size_bytes)
}

/// Assess a caller-supplied chunk plan for `dims`.
pub fn validate_chunks(
    plan: &ChunkPlan,
    dims: &[DimensionSpec],
    dtype_size_bytes: usize,
) -> Result<ChunkValidation> {
    gridstore_engine::validate_chunks(plan, dims, dtype_size_bytes)
}

/// Build a metadata-only archive spanning `global_start..=global_end`.
///
/// `freq` is inferred from the sample's time axis when `None`. Dimensions
/// missing from `chunk_plan` fall back to the variable's own chunking, then
/// to the full dimension length.
pub fn build_template(
    sample: &MemDataset,
    archive: impl AsRef<Path>,
    global_start: NaiveDateTime,
    global_end: NaiveDateTime,
    freq: Option<Frequency>,
    chunk_plan: &ChunkPlan,
) -> Result<Archive> {
    let mut config = ConverterConfig::default();
    config.time.global_start = Some(format_datetime(&global_start));
    config.time.global_end = Some(format_datetime(&global_end));
    config.time.freq = freq;
    config.chunking = chunk_plan.clone();
    Converter::new(config)?.create_template(&MemorySource::new(sample.clone()), open_store(archive)?, false)
}

/// Write `fragment` into `archive`, locating the region when `region` is `None`.
pub fn write_region(
    fragment: &MemDataset,
    archive: impl AsRef<Path>,
    region: Option<Region>,
    config: &ConverterConfig,
) -> Result<WriteSummary> {
    Converter::new(config.clone())?.write_region(
        &MemorySource::new(fragment.clone()),
        open_store(archive)?,
        region,
        &ProcessOptions::new(),
    )
}

/// Create `archive` from `dataset`.
pub fn convert(
    dataset: &MemDataset,
    archive: impl AsRef<Path>,
    config: &ConverterConfig,
    overwrite: bool,
) -> Result<WriteSummary> {
    Converter::new(config.clone())?.convert(
        &MemorySource::new(dataset.clone()),
        open_store(archive)?,
        overwrite,
        &ProcessOptions::new(),
    )
}

/// Extend `archive` with the entries of `dataset` past its last time.
pub fn append(dataset: &MemDataset, archive: impl AsRef<Path>, config: &ConverterConfig) -> Result<WriteSummary> {
    Converter::new(config.clone())?.append(
        &MemorySource::new(dataset.clone()),
        open_store(archive)?,
        &ProcessOptions::new(),
    )
}
