//! JSON dataset documents
//!
//! The interchange format read by [`JsonFileSource`](crate::source::JsonFileSource):
//!
//! ```json
//! {
//!   "attributes": {"title": "wave hindcast"},
//!   "coordinates": [
//!     {"kind": "time", "name": "time", "values": ["2000-01-01", "2000-01-02"]},
//!     {"kind": "numeric", "name": "lat", "values": [-10.0, 0.0, 10.0]}
//!   ],
//!   "variables": [
//!     {"name": "hs", "dims": ["time", "lat"], "dtype": "float32",
//!      "data": [1.0, 1.1, null, 1.3, 1.4, 1.5]}
//!   ]
//! }
//! ```
//!
//! Variable data is flat in row-major order; `null` marks a missing cell.

use gridstore_core::time::{format_datetime, parse_datetime};
use gridstore_core::{
    Attributes, Coordinate, CoordinateValues, DType, Dataset, Error, MemDataset, Result, Variable,
};
use ndarray::{ArrayD, IxDyn};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Serialized dataset
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatasetDocument {
    /// Global attributes
    #[serde(default)]
    pub attributes: Attributes,
    /// Coordinates
    #[serde(default)]
    pub coordinates: Vec<CoordinateDocument>,
    /// Variables
    #[serde(default)]
    pub variables: Vec<VariableDocument>,
}

/// Serialized coordinate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum CoordinateDocument {
    /// Timestamps as strings
    Time {
        /// Coordinate name
        name: String,
        /// Timestamps
        values: Vec<String>,
        /// Attributes
        #[serde(default, skip_serializing_if = "Attributes::is_empty")]
        attributes: Attributes,
    },
    /// Numeric labels
    Numeric {
        /// Coordinate name
        name: String,
        /// Labels
        values: Vec<f64>,
        /// Attributes
        #[serde(default, skip_serializing_if = "Attributes::is_empty")]
        attributes: Attributes,
    },
}

/// Serialized variable
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableDocument {
    /// Variable name
    pub name: String,
    /// Dimension names
    pub dims: Vec<String>,
    /// Shape; derived from coordinate lengths when omitted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shape: Option<Vec<usize>>,
    /// Storage dtype
    #[serde(default = "default_dtype")]
    pub dtype: DType,
    /// Row-major data, `null` = missing
    pub data: Vec<Option<f64>>,
    /// Attributes
    #[serde(default, skip_serializing_if = "Attributes::is_empty")]
    pub attributes: Attributes,
    /// Chunking the data was produced with
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunks: Option<Vec<usize>>,
}

fn default_dtype() -> DType {
    DType::Float64
}

impl DatasetDocument {
    /// Read a document from a JSON file
    pub fn read(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = std::fs::read(path.as_ref())?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Write the document to a JSON file
    pub fn write(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path.as_ref(), serde_json::to_vec_pretty(self)?)?;
        Ok(())
    }

    /// Build the in-memory dataset
    pub fn into_dataset(self) -> Result<MemDataset> {
        let mut ds = MemDataset::new();
        *ds.attributes_mut() = self.attributes;
        for coord in self.coordinates {
            let coord = match coord {
                CoordinateDocument::Time {
                    name,
                    values,
                    attributes,
                } => {
                    let times = values
                        .iter()
                        .map(|s| parse_datetime(s))
                        .collect::<Result<Vec<_>>>()
                        .map_err(|e| Error::Serialization(format!("coordinate '{}': {}", name, e)))?;
                    Coordinate::time(name, times).with_attrs(attributes)
                }
                CoordinateDocument::Numeric {
                    name,
                    values,
                    attributes,
                } => Coordinate::numeric(name, values).with_attrs(attributes),
            };
            ds.add_coordinate(coord)?;
        }
        for var in self.variables {
            let shape = match var.shape {
                Some(shape) => shape,
                None => var
                    .dims
                    .iter()
                    .map(|d| {
                        ds.dimension_length(d).ok_or_else(|| {
                            Error::StructuralMismatch(format!(
                                "variable '{}' uses dimension '{}' without a coordinate or shape",
                                var.name, d
                            ))
                        })
                    })
                    .collect::<Result<Vec<_>>>()?,
            };
            let values: Vec<f64> = var.data.iter().map(|v| v.unwrap_or(f64::NAN)).collect();
            let data = ArrayD::from_shape_vec(IxDyn(&shape), values).map_err(|e| {
                Error::StructuralMismatch(format!("variable '{}': {}", var.name, e))
            })?;
            let mut variable = Variable::new(var.name, var.dims, data)
                .with_dtype(var.dtype)
                .with_attrs(var.attributes);
            variable.chunks = var.chunks;
            ds.add_variable(variable)?;
        }
        Ok(ds)
    }

    /// Serialize an in-memory dataset
    pub fn from_dataset(ds: &MemDataset) -> Self {
        let coordinates = ds
            .coordinates()
            .iter()
            .map(|c| match &c.values {
                CoordinateValues::Time(v) => CoordinateDocument::Time {
                    name: c.name.clone(),
                    values: v.iter().map(format_datetime).collect(),
                    attributes: c.attrs.clone(),
                },
                CoordinateValues::Numeric(v) => CoordinateDocument::Numeric {
                    name: c.name.clone(),
                    values: v.clone(),
                    attributes: c.attrs.clone(),
                },
            })
            .collect();
        let variables = ds
            .variables()
            .iter()
            .map(|v| VariableDocument {
                name: v.name.clone(),
                dims: v.dims.clone(),
                shape: Some(v.shape().to_vec()),
                dtype: v.dtype,
                data: v.data.iter().map(|x| if x.is_nan() { None } else { Some(*x) }).collect(),
                attributes: v.attrs.clone(),
                chunks: v.chunks.clone(),
            })
            .collect();
        Self {
            attributes: ds.attributes().clone(),
            coordinates,
            variables,
        }
    }
}
