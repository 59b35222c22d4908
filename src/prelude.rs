//! Convenient imports for gridstore.
//!
//! ```no_run
//! use gridstore::prelude::*;
//!
//! # fn main() -> gridstore::Result<()> {
//! let converter = Converter::builder().chunk("time", 24).build()?;
//! let store = open_store("./waves")?;
//! converter.convert(&JsonFileSource::new("day1.json"), store, false, &ProcessOptions::new())?;
//! # Ok(())
//! # }
//! ```

// Entry points
pub use crate::api::{append, build_template, convert, recommend_chunks, validate_chunks, write_region};
pub use crate::{Converter, ConverterBuilder, ConverterConfig};

// Error handling
pub use crate::{Error, Result};

// Data model
pub use crate::{
    AccessPattern, Attributes, ChunkPlan, Coordinate, DType, Dataset, DimensionSpec, Frequency,
    MemDataset, MissingCheckSpec, Region, Variable,
};
pub use crate::{format_datetime, parse_datetime};

// Sources and storage
pub use crate::{open_source, open_store, DatasetDocument, DatasetSource, JsonFileSource, MemorySource};
pub use crate::{ProcessOptions, WriteSummary};

pub use serde_json::json;
