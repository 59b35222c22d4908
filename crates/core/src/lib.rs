//! Core types for gridstore
//!
//! This crate defines the vocabulary shared by every other gridstore crate:
//! - [`DimensionSpec`], [`ChunkPlan`], [`AccessPattern`], [`Region`]: the chunk
//!   layout data model
//! - [`Dataset`] and [`MemDataset`]: the dataset abstraction consumed by the
//!   template builder and the write controller
//! - [`Frequency`] and the time-axis helpers in [`time`]
//! - [`Error`]: the error taxonomy surfaced by all public operations

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod dataset;
pub mod error;
pub mod time;
pub mod types;

pub use dataset::{Attributes, Coordinate, CoordinateValues, Dataset, MemDataset, Variable};
pub use error::{Error, Result};
pub use time::Frequency;
pub use types::{AccessPattern, ChunkPlan, DType, DimensionSpec, MissingCheckSpec, Region};
