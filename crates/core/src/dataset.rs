//! Dataset abstraction
//!
//! The [`Dataset`] trait is the only view the template builder, the region
//! locator and the write controller have of gridded data: named dimensions,
//! named 1-D coordinates, named N-D variables, and string-keyed attributes at
//! dataset and variable granularity.
//!
//! [`MemDataset`] is the in-memory implementation every source materialises
//! into. Variable payloads are `ndarray::ArrayD<f64>` with NaN marking missing
//! cells, whatever the declared storage [`DType`].

use crate::error::{Error, Result};
use crate::time::{format_datetime, to_epoch_seconds};
use crate::types::{DType, DimensionSpec};
use chrono::NaiveDateTime;
use ndarray::{ArrayD, Axis};
use std::collections::BTreeMap;

/// String-keyed attribute map (dataset- or variable-level)
pub type Attributes = BTreeMap<String, serde_json::Value>;

/// Values of a 1-D coordinate
#[derive(Debug, Clone, PartialEq)]
pub enum CoordinateValues {
    /// Timestamps (sequence axes)
    Time(Vec<NaiveDateTime>),
    /// Numeric labels (latitude, longitude, depth, ...)
    Numeric(Vec<f64>),
}

impl CoordinateValues {
    /// Number of labels
    pub fn len(&self) -> usize {
        match self {
            CoordinateValues::Time(v) => v.len(),
            CoordinateValues::Numeric(v) => v.len(),
        }
    }

    /// Check for an empty axis
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn select(&self, indices: &[usize]) -> CoordinateValues {
        match self {
            CoordinateValues::Time(v) => CoordinateValues::Time(indices.iter().map(|&i| v[i]).collect()),
            CoordinateValues::Numeric(v) => {
                CoordinateValues::Numeric(indices.iter().map(|&i| v[i]).collect())
            }
        }
    }
}

/// A named 1-D coordinate along the dimension of the same name
#[derive(Debug, Clone, PartialEq)]
pub struct Coordinate {
    /// Coordinate (and dimension) name
    pub name: String,
    /// Labels
    pub values: CoordinateValues,
    /// Coordinate attributes
    pub attrs: Attributes,
}

impl Coordinate {
    /// Create a time coordinate
    pub fn time(name: impl Into<String>, values: Vec<NaiveDateTime>) -> Self {
        Self {
            name: name.into(),
            values: CoordinateValues::Time(values),
            attrs: Attributes::new(),
        }
    }

    /// Create a numeric coordinate
    pub fn numeric(name: impl Into<String>, values: Vec<f64>) -> Self {
        Self {
            name: name.into(),
            values: CoordinateValues::Numeric(values),
            attrs: Attributes::new(),
        }
    }

    /// Attach attributes, builder style
    pub fn with_attrs(mut self, attrs: Attributes) -> Self {
        self.attrs = attrs;
        self
    }

    /// Number of labels
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check for an empty axis
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Timestamps, if this is a time coordinate
    pub fn as_time(&self) -> Option<&[NaiveDateTime]> {
        match &self.values {
            CoordinateValues::Time(v) => Some(v),
            CoordinateValues::Numeric(_) => None,
        }
    }

    /// Labels as numbers; timestamps become epoch seconds
    pub fn to_numeric(&self) -> Vec<f64> {
        match &self.values {
            CoordinateValues::Time(v) => v.iter().map(|t| to_epoch_seconds(t) as f64).collect(),
            CoordinateValues::Numeric(v) => v.clone(),
        }
    }

    /// Human-readable label at `index`
    pub fn label(&self, index: usize) -> Option<String> {
        match &self.values {
            CoordinateValues::Time(v) => v.get(index).map(format_datetime),
            CoordinateValues::Numeric(v) => v.get(index).map(|x| x.to_string()),
        }
    }
}

/// A named N-D variable
#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    /// Variable name
    pub name: String,
    /// Dimension names, one per axis of `data`
    pub dims: Vec<String>,
    /// Payload; NaN marks missing cells
    pub data: ArrayD<f64>,
    /// Storage element type
    pub dtype: DType,
    /// Variable attributes
    pub attrs: Attributes,
    /// Chunking the variable was read with, if any
    pub chunks: Option<Vec<usize>>,
}

impl Variable {
    /// Create a float64 variable
    pub fn new(name: impl Into<String>, dims: Vec<String>, data: ArrayD<f64>) -> Self {
        Self {
            name: name.into(),
            dims,
            data,
            dtype: DType::Float64,
            attrs: Attributes::new(),
            chunks: None,
        }
    }

    /// Set the storage dtype, builder style
    pub fn with_dtype(mut self, dtype: DType) -> Self {
        self.dtype = dtype;
        self
    }

    /// Attach attributes, builder style
    pub fn with_attrs(mut self, attrs: Attributes) -> Self {
        self.attrs = attrs;
        self
    }

    /// Record prior chunking, builder style
    pub fn with_chunks(mut self, chunks: Vec<usize>) -> Self {
        self.chunks = Some(chunks);
        self
    }

    /// Shape of the payload
    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    /// Axis index of `dim`
    pub fn axis_of(&self, dim: &str) -> Option<usize> {
        self.dims.iter().position(|d| d == dim)
    }

    /// Number of missing cells
    pub fn missing_count(&self) -> usize {
        self.data.iter().filter(|v| v.is_nan()).count()
    }

    /// Numeric attribute lookup
    pub fn attr_f64(&self, key: &str) -> Option<f64> {
        self.attrs.get(key).and_then(|v| v.as_f64())
    }
}

/// Read-only view of a gridded dataset
///
/// Implementations expose dimensions in a stable order; coordinate and
/// variable names are listed in insertion order.
pub trait Dataset {
    /// Ordered dimensions
    fn dimensions(&self) -> Vec<DimensionSpec>;

    /// Coordinate named `name`
    fn coordinate(&self, name: &str) -> Option<&Coordinate>;

    /// Names of all coordinates
    fn coordinate_names(&self) -> Vec<&str>;

    /// Variable named `name`
    fn variable(&self, name: &str) -> Option<&Variable>;

    /// Names of all variables
    fn variable_names(&self) -> Vec<&str>;

    /// Dataset-level attributes
    fn attributes(&self) -> &Attributes;

    /// Length of dimension `name`
    fn dimension_length(&self, name: &str) -> Option<usize> {
        self.dimensions()
            .into_iter()
            .find(|d| d.name == name)
            .map(|d| d.length)
    }
}

/// In-memory dataset
///
/// Adding coordinates and variables checks dimension lengths for consistency;
/// a dimension first seen on a variable is registered with that variable's
/// axis length.
///
/// # Examples
///
/// ```
/// use gridstore_core::{Coordinate, Dataset, MemDataset, Variable};
/// use ndarray::ArrayD;
///
/// let mut ds = MemDataset::new();
/// ds.add_coordinate(Coordinate::numeric("lat", vec![-10.0, 0.0, 10.0])).unwrap();
/// let data = ArrayD::zeros(ndarray::IxDyn(&[3]));
/// ds.add_variable(Variable::new("depth", vec!["lat".into()], data)).unwrap();
/// assert_eq!(ds.dimension_length("lat"), Some(3));
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemDataset {
    dims: Vec<DimensionSpec>,
    coords: Vec<Coordinate>,
    vars: Vec<Variable>,
    attrs: Attributes,
}

impl MemDataset {
    /// Create an empty dataset
    pub fn new() -> Self {
        Self::default()
    }

    fn register_dimension(&mut self, name: &str, length: usize, owner: &str) -> Result<()> {
        match self.dims.iter().find(|d| d.name == name) {
            Some(existing) if existing.length != length => Err(Error::StructuralMismatch(format!(
                "'{}' has length {} along '{}', dataset has {}",
                owner, length, name, existing.length
            ))),
            Some(_) => Ok(()),
            None => {
                self.dims.push(DimensionSpec::new(name, length));
                Ok(())
            }
        }
    }

    /// Add or replace a coordinate
    pub fn add_coordinate(&mut self, coord: Coordinate) -> Result<()> {
        self.coords.retain(|c| c.name != coord.name);
        if let Some(d) = self.dims.iter_mut().find(|d| d.name == coord.name) {
            let in_use = self.vars.iter().any(|v| v.dims.contains(&coord.name));
            if in_use && d.length != coord.len() {
                return Err(Error::StructuralMismatch(format!(
                    "coordinate '{}' has {} labels, dimension has length {}",
                    coord.name,
                    coord.len(),
                    d.length
                )));
            }
            d.length = coord.len();
        } else {
            self.dims.push(DimensionSpec::new(coord.name.clone(), coord.len()));
        }
        self.coords.push(coord);
        Ok(())
    }

    /// Add or replace a variable
    pub fn add_variable(&mut self, var: Variable) -> Result<()> {
        if var.dims.len() != var.data.ndim() {
            return Err(Error::StructuralMismatch(format!(
                "variable '{}' names {} dimensions but has {} axes",
                var.name,
                var.dims.len(),
                var.data.ndim()
            )));
        }
        for (dim, &len) in var.dims.iter().zip(var.data.shape()) {
            self.register_dimension(dim, len, &var.name)?;
        }
        self.vars.retain(|v| v.name != var.name);
        self.vars.push(var);
        Ok(())
    }

    /// Remove a variable, returning it
    pub fn remove_variable(&mut self, name: &str) -> Option<Variable> {
        let idx = self.vars.iter().position(|v| v.name == name)?;
        Some(self.vars.remove(idx))
    }

    /// Keep only variables for which `keep` returns true
    pub fn retain_variables(&mut self, mut keep: impl FnMut(&str) -> bool) {
        self.vars.retain(|v| keep(&v.name));
    }

    /// Mutable access to dataset attributes
    pub fn attributes_mut(&mut self) -> &mut Attributes {
        &mut self.attrs
    }

    /// Mutable access to a variable
    pub fn variable_mut(&mut self, name: &str) -> Option<&mut Variable> {
        self.vars.iter_mut().find(|v| v.name == name)
    }

    /// All variables in insertion order
    pub fn variables(&self) -> &[Variable] {
        &self.vars
    }

    /// All coordinates in insertion order
    pub fn coordinates(&self) -> &[Coordinate] {
        &self.coords
    }

    /// Keep only the listed positions along `dim`
    ///
    /// Applies to the coordinate named `dim` and to every variable that spans
    /// it. Indices must be in bounds.
    pub fn select_along(&mut self, dim: &str, indices: &[usize]) -> Result<()> {
        let len = self
            .dimension_length(dim)
            .ok_or_else(|| Error::NotFound(format!("dimension '{}'", dim)))?;
        if let Some(&bad) = indices.iter().find(|&&i| i >= len) {
            return Err(Error::OutOfExtent(format!(
                "index {} out of bounds for '{}' (length {})",
                bad, dim, len
            )));
        }
        for coord in self.coords.iter_mut().filter(|c| c.name == dim) {
            coord.values = coord.values.select(indices);
        }
        for var in self.vars.iter_mut() {
            if let Some(axis) = var.axis_of(dim) {
                var.data = var.data.select(Axis(axis), indices);
            }
        }
        if let Some(d) = self.dims.iter_mut().find(|d| d.name == dim) {
            d.length = indices.len();
        }
        Ok(())
    }
}

impl Dataset for MemDataset {
    fn dimensions(&self) -> Vec<DimensionSpec> {
        self.dims.clone()
    }

    fn coordinate(&self, name: &str) -> Option<&Coordinate> {
        self.coords.iter().find(|c| c.name == name)
    }

    fn coordinate_names(&self) -> Vec<&str> {
        self.coords.iter().map(|c| c.name.as_str()).collect()
    }

    fn variable(&self, name: &str) -> Option<&Variable> {
        self.vars.iter().find(|v| v.name == name)
    }

    fn variable_names(&self) -> Vec<&str> {
        self.vars.iter().map(|v| v.name.as_str()).collect()
    }

    fn attributes(&self) -> &Attributes {
        &self.attrs
    }
}
