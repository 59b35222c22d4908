//! Archives: named coordinate and variable arrays sharing one store
//!
//! Layout under the store root:
//!
//! - `archive.json`: [`ArchiveMetadata`] (attributes, member names)
//! - `coords/<name>/...`: one 1-D array per coordinate
//! - `vars/<name>/...`: one N-D array per variable
//!
//! Time coordinates are persisted as int64 seconds since the Unix epoch with
//! a `units` attribute and come back as timestamps when read.

use crate::array::{Array, ArrayMetadata};
use crate::codec::{Codec, Compression};
use crate::store::StoreRef;
use gridstore_core::time::{from_epoch_seconds, EPOCH_SECONDS_UNITS};
use gridstore_core::{
    Attributes, Coordinate, CoordinateValues, DType, DimensionSpec, Error, MemDataset, Region,
    Result, Variable,
};
use ndarray::{ArrayD, IxDyn};
use serde::{Deserialize, Serialize};
use std::ops::Range;
use tracing::{debug, info};

/// Current archive metadata version
pub const ARCHIVE_FORMAT_VERSION: u32 = 1;

const ARCHIVE_KEY: &str = "archive.json";
const UNITS_ATTR: &str = "units";

/// Root document of an archive
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArchiveMetadata {
    /// Metadata document version
    pub format_version: u32,
    /// Global attributes
    #[serde(default)]
    pub attributes: Attributes,
    /// Coordinate names in creation order
    #[serde(default)]
    pub coordinates: Vec<String>,
    /// Variable names in creation order
    #[serde(default)]
    pub variables: Vec<String>,
}

/// Handle to an archive
#[derive(Debug, Clone)]
pub struct Archive {
    store: StoreRef,
    meta: ArchiveMetadata,
}

fn coord_path(name: &str) -> String {
    format!("coords/{}", name)
}

fn var_path(name: &str) -> String {
    format!("vars/{}", name)
}

/// Length of a coordinate array's single axis
fn axis_length(array: &Array, name: &str) -> Result<usize> {
    array
        .shape()
        .first()
        .copied()
        .ok_or_else(|| Error::Corruption(format!("coordinate '{}' is stored without an axis", name)))
}

impl Archive {
    /// Check whether `store` holds an archive
    pub fn exists(store: &StoreRef) -> Result<bool> {
        store.exists(ARCHIVE_KEY)
    }

    /// Create an empty archive
    ///
    /// Fails with [`Error::ArchiveExists`] if one is present and `overwrite`
    /// is false; with `overwrite` the previous content is removed first.
    pub fn create(store: StoreRef, attributes: Attributes, overwrite: bool) -> Result<Self> {
        if Self::exists(&store)? {
            if !overwrite {
                return Err(Error::ArchiveExists(
                    "pass overwrite to replace the existing archive".into(),
                ));
            }
            info!("removing existing archive before create");
            store.erase_prefix("")?;
        }
        let archive = Self {
            store,
            meta: ArchiveMetadata {
                format_version: ARCHIVE_FORMAT_VERSION,
                attributes,
                ..Default::default()
            },
        };
        archive.write_metadata()?;
        Ok(archive)
    }

    /// Open an existing archive
    pub fn open(store: StoreRef) -> Result<Self> {
        let bytes = store
            .get(ARCHIVE_KEY)?
            .ok_or_else(|| Error::NotFound("no archive in store".into()))?;
        let meta: ArchiveMetadata = serde_json::from_slice(&bytes)?;
        if meta.format_version != ARCHIVE_FORMAT_VERSION {
            return Err(Error::Corruption(format!(
                "unsupported archive format version {}",
                meta.format_version
            )));
        }
        Ok(Self { store, meta })
    }

    fn write_metadata(&self) -> Result<()> {
        let doc = serde_json::to_vec_pretty(&self.meta)?;
        self.store.set(ARCHIVE_KEY, &doc)
    }

    /// Underlying store
    pub fn store(&self) -> &StoreRef {
        &self.store
    }

    /// Root metadata
    pub fn metadata(&self) -> &ArchiveMetadata {
        &self.meta
    }

    /// Global attributes
    pub fn attributes(&self) -> &Attributes {
        &self.meta.attributes
    }

    /// Replace the global attributes
    pub fn set_attributes(&mut self, attributes: Attributes) -> Result<()> {
        self.meta.attributes = attributes;
        self.write_metadata()
    }

    /// Coordinate names
    pub fn coordinate_names(&self) -> &[String] {
        &self.meta.coordinates
    }

    /// Variable names
    pub fn variable_names(&self) -> &[String] {
        &self.meta.variables
    }

    /// Persist a coordinate, replacing any previous one of the same name
    pub fn write_coordinate(&mut self, coord: &Coordinate) -> Result<()> {
        let (dtype, values, attrs) = match &coord.values {
            CoordinateValues::Time(_) => {
                let mut attrs = coord.attrs.clone();
                attrs.insert(UNITS_ATTR.into(), EPOCH_SECONDS_UNITS.into());
                (DType::Int64, coord.to_numeric(), attrs)
            }
            CoordinateValues::Numeric(v) => (DType::Float64, v.clone(), coord.attrs.clone()),
        };
        let len = values.len();
        let meta = ArrayMetadata::new(vec![coord.name.clone()], vec![len], vec![len.max(1)], dtype)
            .with_codec(Codec::new(Compression::None))
            .with_attributes(attrs);
        let array = Array::create(self.store.clone(), &coord_path(&coord.name), meta)?;
        let data = ArrayD::from_shape_vec(IxDyn(&[len]), values)?;
        array.write_region(&[0..len], data.view())?;
        if !self.meta.coordinates.contains(&coord.name) {
            self.meta.coordinates.push(coord.name.clone());
            self.write_metadata()?;
        }
        debug!(coordinate = %coord.name, len, "wrote coordinate");
        Ok(())
    }

    /// Extend a persisted coordinate with `coord`'s values
    pub fn append_coordinate(&self, coord: &Coordinate) -> Result<()> {
        let mut array = self.coordinate_array(&coord.name)?;
        let is_time = array.metadata().attributes.get(UNITS_ATTR)
            == Some(&serde_json::Value::from(EPOCH_SECONDS_UNITS));
        if is_time != coord.as_time().is_some() {
            return Err(Error::StructuralMismatch(format!(
                "coordinate '{}' kind differs from the archive",
                coord.name
            )));
        }
        let values = coord.to_numeric();
        let data = ArrayD::from_shape_vec(IxDyn(&[values.len()]), values)?;
        array.append(0, data.view())
    }

    /// Read a persisted coordinate
    pub fn read_coordinate(&self, name: &str) -> Result<Coordinate> {
        self.read_coordinate_range(name, None)
    }

    fn read_coordinate_range(&self, name: &str, range: Option<Range<usize>>) -> Result<Coordinate> {
        let array = self.coordinate_array(name)?;
        let range = match range {
            Some(r) => r,
            None => 0..axis_length(&array, name)?,
        };
        let raw = array.read_region(&[range])?;
        let mut attrs = array.metadata().attributes.clone();
        let is_time = attrs.get(UNITS_ATTR) == Some(&serde_json::Value::from(EPOCH_SECONDS_UNITS));
        let coord = if is_time {
            attrs.remove(UNITS_ATTR);
            let times = raw
                .iter()
                .map(|&s| from_epoch_seconds(s as i64))
                .collect::<Result<Vec<_>>>()?;
            Coordinate::time(name, times)
        } else {
            Coordinate::numeric(name, raw.iter().copied().collect())
        };
        Ok(coord.with_attrs(attrs))
    }

    /// Array backing coordinate `name`
    pub fn coordinate_array(&self, name: &str) -> Result<Array> {
        if !self.meta.coordinates.iter().any(|c| c == name) {
            return Err(Error::NotFound(format!("coordinate '{}'", name)));
        }
        Array::open(self.store.clone(), &coord_path(name))
    }

    /// Declare a variable array (metadata only)
    pub fn create_variable(&mut self, name: &str, meta: ArrayMetadata) -> Result<Array> {
        let array = Array::create(self.store.clone(), &var_path(name), meta)?;
        if !self.meta.variables.iter().any(|v| v == name) {
            self.meta.variables.push(name.to_string());
            self.write_metadata()?;
        }
        Ok(array)
    }

    /// Array backing variable `name`
    pub fn variable(&self, name: &str) -> Result<Array> {
        if !self.meta.variables.iter().any(|v| v == name) {
            return Err(Error::NotFound(format!("variable '{}'", name)));
        }
        Array::open(self.store.clone(), &var_path(name))
    }

    /// Dimensions with their current lengths
    ///
    /// Coordinates come first in creation order, then dimensions that only
    /// appear on variables.
    pub fn dimensions(&self) -> Result<Vec<DimensionSpec>> {
        let mut dims: Vec<DimensionSpec> = Vec::new();
        for name in &self.meta.coordinates {
            let array = self.coordinate_array(name)?;
            dims.push(DimensionSpec::new(name.clone(), axis_length(&array, name)?));
        }
        for name in &self.meta.variables {
            let array = self.variable(name)?;
            for (dim, &len) in array.dimension_names().iter().zip(array.shape()) {
                if !dims.iter().any(|d| &d.name == dim) {
                    dims.push(DimensionSpec::new(dim.clone(), len));
                }
            }
        }
        Ok(dims)
    }

    /// Materialise the archive, or the part of it inside `region`
    pub fn load(&self, region: &Region) -> Result<MemDataset> {
        let mut ds = MemDataset::new();
        *ds.attributes_mut() = self.meta.attributes.clone();
        for name in &self.meta.coordinates {
            ds.add_coordinate(self.read_coordinate_range(name, region.get(name))?)?;
        }
        for name in &self.meta.variables {
            let array = self.variable(name)?;
            let ranges = region.ranges_for(array.dimension_names(), array.shape())?;
            let data = array.read_region(&ranges)?;
            let meta = array.metadata();
            let var = Variable::new(name.clone(), meta.dimension_names.clone(), data)
                .with_dtype(meta.dtype)
                .with_attrs(meta.attributes.clone())
                .with_chunks(meta.chunks.clone());
            ds.add_variable(var)?;
        }
        Ok(ds)
    }

    /// Read variable `name` inside `region`
    pub fn read_variable(&self, name: &str, region: &Region) -> Result<ArrayD<f64>> {
        let array = self.variable(name)?;
        let ranges = region.ranges_for(array.dimension_names(), array.shape())?;
        array.read_region(&ranges)
    }
}
