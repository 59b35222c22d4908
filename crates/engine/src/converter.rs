//! Converter facade
//!
//! [`Converter`] ties the pieces together behind one configured handle:
//! chunk planning, template creation and the three write modes.
//!
//! # Example
//!
//! ```no_run
//! use gridstore_engine::{Converter, JsonFileSource, ProcessOptions};
//! use gridstore_storage::open_store;
//!
//! # fn main() -> gridstore_core::Result<()> {
//! let converter = Converter::builder()
//!     .chunk("time", 24)
//!     .retries_on_missing(3)
//!     .build()?;
//! let store = open_store("/data/waves")?;
//! converter.convert(&JsonFileSource::new("day1.json"), store.clone(), false, &ProcessOptions::new())?;
//! converter.append(&JsonFileSource::new("day2.json"), store, &ProcessOptions::new())?;
//! # Ok(())
//! # }
//! ```

use crate::chunking::{ChunkAdvisor, ChunkRecommendation, ChunkValidation, ChunkValidator};
use crate::config::ConverterConfig;
use crate::controller::{WriteController, WriteMode, WriteSummary};
use crate::encoding::VariableEncoder;
use crate::processing::{process, ProcessOptions};
use crate::source::{DatasetSource, MemorySource};
use crate::template::TemplateBuilder;
use gridstore_core::{
    AccessPattern, Attributes, ChunkPlan, Dataset, DimensionSpec, Frequency, MemDataset,
    MissingCheckSpec, Region, Result,
};
use gridstore_storage::{Archive, Compression, StoreRef};
use std::path::Path;
use tracing::{debug, warn};

/// Configured entry point for planning and writing archives
#[derive(Debug, Clone, Default)]
pub struct Converter {
    config: ConverterConfig,
}

impl Converter {
    /// Converter using `config`, validated first
    pub fn new(config: ConverterConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Start a builder with default settings
    pub fn builder() -> ConverterBuilder {
        ConverterBuilder::new()
    }

    /// Converter configured from a `.json` or `.toml` file
    pub fn from_config_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::new(ConverterConfig::from_file(path)?)
    }

    /// Configuration in use
    pub fn config(&self) -> &ConverterConfig {
        &self.config
    }

    /// Recommend chunking for `dims` with the configured pattern and budget
    pub fn recommend_chunks(&self, dims: &[DimensionSpec], dtype_size_bytes: usize) -> Result<ChunkRecommendation> {
        recommend(&self.config, dims, dtype_size_bytes)
    }

    /// Diagnose a caller-supplied chunk plan
    pub fn validate_chunks(
        &self,
        plan: &ChunkPlan,
        dims: &[DimensionSpec],
        dtype_size_bytes: usize,
    ) -> Result<ChunkValidation> {
        validator(&self.config).validate(plan, dims, dtype_size_bytes)
    }

    /// Chunk plan for writing `ds` with dimensions `dims`
    ///
    /// The configured plan is used as-is after logging the validator's
    /// warnings; without one the advisor plans the layout.
    pub fn plan_for(&self, ds: &MemDataset, dims: &[DimensionSpec]) -> Result<ChunkPlan> {
        plan_layout(&self.config, ds, dims)
    }

    fn controller(&self, plan: ChunkPlan) -> Result<WriteController> {
        let encoder = VariableEncoder::from_config(&self.config, plan)?;
        Ok(WriteController::new(self.config.clone(), encoder))
    }

    /// Create a template archive in `store` from `sample`
    pub fn create_template(&self, sample: &dyn DatasetSource, store: StoreRef, overwrite: bool) -> Result<Archive> {
        let sample = process(sample.open()?, &self.config, &ProcessOptions::new())?;
        let builder = TemplateBuilder::from_config(&self.config)?;
        let dims = builder.dimensions(&sample)?;
        let plan = self.plan_for(&sample, &dims)?;
        builder
            .encoder(VariableEncoder::from_config(&self.config, plan)?)
            .build(&sample, store, overwrite)
    }

    /// Create a fresh archive in `store` from `input`
    ///
    /// Without configured chunking every attempt plans the layout from the
    /// data it read.
    pub fn convert(
        &self,
        input: &dyn DatasetSource,
        store: StoreRef,
        overwrite: bool,
        options: &ProcessOptions,
    ) -> Result<WriteSummary> {
        self.controller(self.config.chunking.clone())?
            .with_layout_planning(self.config.chunking.is_empty())
            .run(input, store, WriteMode::Convert { overwrite }, options)
    }

    /// Extend the archive in `store` with entries of `input` past its end
    pub fn append(&self, input: &dyn DatasetSource, store: StoreRef, options: &ProcessOptions) -> Result<WriteSummary> {
        self.controller(self.config.chunking.clone())?
            .run(input, store, WriteMode::Append, options)
    }

    /// Write `input` into a region of the archive in `store`
    ///
    /// The region is located from `input`'s sequence coordinate when `None`.
    pub fn write_region(
        &self,
        input: &dyn DatasetSource,
        store: StoreRef,
        region: Option<Region>,
        options: &ProcessOptions,
    ) -> Result<WriteSummary> {
        self.controller(self.config.chunking.clone())?
            .run(input, store, WriteMode::Region { region }, options)
    }

    /// [`Converter::convert`] for an in-memory dataset
    pub fn convert_dataset(&self, ds: MemDataset, store: StoreRef, overwrite: bool) -> Result<WriteSummary> {
        self.convert(&MemorySource::new(ds), store, overwrite, &ProcessOptions::new())
    }
}

fn advisor(config: &ConverterConfig) -> ChunkAdvisor {
    ChunkAdvisor::new().with_sequence_dim(config.time.dim.clone())
}

fn validator(config: &ConverterConfig) -> ChunkValidator {
    ChunkValidator {
        target_chunk_size_bytes: config.target_chunk_size_bytes(),
        ..ChunkValidator::new()
    }
}

fn recommend(config: &ConverterConfig, dims: &[DimensionSpec], dtype_size_bytes: usize) -> Result<ChunkRecommendation> {
    advisor(config).recommend(
        dims,
        dtype_size_bytes,
        config.access_pattern,
        config.target_chunk_size_bytes(),
    )
}

/// Chunk plan for writing `ds` with dimensions `dims` under `config`
pub(crate) fn plan_layout(config: &ConverterConfig, ds: &MemDataset, dims: &[DimensionSpec]) -> Result<ChunkPlan> {
    let Some(dtype_size) = ds.variables().iter().map(|v| v.dtype.size_bytes()).max() else {
        return Ok(config.chunking.clone());
    };
    let dims: Vec<DimensionSpec> = dims.iter().filter(|d| d.length > 0).cloned().collect();
    if !config.chunking.is_empty() {
        let report = validator(config).validate(&config.chunking, &dims, dtype_size)?;
        for w in &report.warnings {
            warn!(plan = %config.chunking, "{}", w);
        }
        return Ok(config.chunking.clone());
    }
    let rec = recommend(config, &dims, dtype_size)?;
    for w in &rec.warnings {
        warn!("{}", w);
    }
    debug!(
        plan = %rec.chunks,
        size_mb = rec.estimated_chunk_size_mb(),
        notes = ?rec.notes,
        "planned chunking"
    );
    Ok(rec.chunks)
}

/// Builder for [`Converter`]
#[derive(Debug, Clone, Default)]
pub struct ConverterBuilder {
    config: ConverterConfig,
}

impl ConverterBuilder {
    /// Builder with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing configuration
    pub fn config(mut self, config: ConverterConfig) -> Self {
        self.config = config;
        self
    }

    /// Fix the chunk length along `dim`
    pub fn chunk(mut self, dim: impl Into<String>, length: usize) -> Self {
        self.config.chunking.insert(dim, length);
        self
    }

    /// Replace the chunk plan
    pub fn chunking(mut self, plan: ChunkPlan) -> Self {
        self.config.chunking = plan;
        self
    }

    /// Payload compression
    pub fn compression(mut self, method: Compression) -> Self {
        self.config.compression.method = method;
        self
    }

    /// Enable scale-offset packing at `bits` width
    pub fn packing(mut self, bits: u8) -> Self {
        self.config.packing.enabled = true;
        self.config.packing.bits = bits;
        self
    }

    /// Sequence dimension, also used as the append dimension
    pub fn time_dim(mut self, dim: impl Into<String>) -> Self {
        let dim = dim.into();
        self.config.time.append_dim = dim.clone();
        self.config.time.dim = dim;
        self
    }

    /// Template step
    pub fn freq(mut self, freq: Frequency) -> Self {
        self.config.time.freq = Some(freq);
        self
    }

    /// Keep only these variables
    pub fn include(mut self, names: Vec<String>) -> Self {
        self.config.variables.include = names;
        self
    }

    /// Drop these variables
    pub fn exclude(mut self, names: Vec<String>) -> Self {
        self.config.variables.exclude = names;
        self
    }

    /// Global attributes applied on every write
    pub fn attrs(mut self, attrs: Attributes) -> Self {
        self.config.attrs = attrs;
        self
    }

    /// Retries after the first attempt
    pub fn retries_on_missing(mut self, retries: u32) -> Self {
        self.config.missing_data.retries_on_missing = retries;
        self
    }

    /// Variables verified after each write
    pub fn missing_check_vars(mut self, spec: MissingCheckSpec) -> Self {
        self.config.missing_data.missing_check_vars = spec;
        self
    }

    /// Backoff unit between retries
    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.missing_data.retry_backoff_ms = ms;
        self
    }

    /// Advisor budget
    pub fn target_chunk_size_mb(mut self, mb: f64) -> Self {
        self.config.target_chunk_size_mb = Some(mb);
        self
    }

    /// Advisor access pattern
    pub fn access_pattern(mut self, pattern: AccessPattern) -> Self {
        self.config.access_pattern = pattern;
        self
    }

    /// Validate and build
    pub fn build(self) -> Result<Converter> {
        Converter::new(self.config)
    }
}
