//! Chunked N-D arrays
//!
//! An array lives under a key prefix `<path>` of a [`Store`]:
//!
//! - `<path>/array.json` holds the [`ArrayMetadata`] document
//! - `<path>/c/<i>.<j>.<k>` holds the chunk at grid position `(i, j, k)`
//!
//! Creating an array writes metadata only. Chunks that were never written
//! read back as the fill value, so a freshly created array of any size costs
//! one small document. Edge chunks are stored at full chunk size, padded with
//! the fill value.
//!
//! Writes that cover a chunk only partially read the existing chunk, patch
//! it and write it back while holding the store's per-key lock.

use crate::codec::Codec;
use crate::format::{decode_chunk, encode_chunk};
use crate::store::StoreRef;
use gridstore_core::{Attributes, DType, Error, Result};
use ndarray::{ArrayD, ArrayViewD, IxDyn, Slice};
use serde::{Deserialize, Serialize};
use std::ops::Range;
use tracing::{debug, trace};

/// Current array metadata version
pub const ARRAY_FORMAT_VERSION: u32 = 1;

const METADATA_KEY: &str = "array.json";

/// Persistent description of an array
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrayMetadata {
    /// Metadata document version
    pub format_version: u32,
    /// Array shape
    pub shape: Vec<usize>,
    /// Chunk shape, one entry per axis
    pub chunks: Vec<usize>,
    /// Declared element type
    pub dtype: DType,
    /// Dimension name per axis
    pub dimension_names: Vec<String>,
    /// Fill value; `None` means NaN for floats and the type maximum for integers
    pub fill_value: Option<f64>,
    /// Filter and compression
    #[serde(default)]
    pub codec: Codec,
    /// Free-form attributes
    #[serde(default)]
    pub attributes: Attributes,
}

impl ArrayMetadata {
    /// Metadata for a new array with default codec and no attributes
    pub fn new(dimension_names: Vec<String>, shape: Vec<usize>, chunks: Vec<usize>, dtype: DType) -> Self {
        Self {
            format_version: ARRAY_FORMAT_VERSION,
            shape,
            chunks,
            dtype,
            dimension_names,
            fill_value: None,
            codec: Codec::default(),
            attributes: Attributes::new(),
        }
    }

    /// Set the codec, builder style
    pub fn with_codec(mut self, codec: Codec) -> Self {
        self.codec = codec;
        self
    }

    /// Set the fill value, builder style
    pub fn with_fill_value(mut self, fill_value: Option<f64>) -> Self {
        self.fill_value = fill_value;
        self
    }

    /// Set the attributes, builder style
    pub fn with_attributes(mut self, attributes: Attributes) -> Self {
        self.attributes = attributes;
        self
    }

    fn validate(&self) -> Result<()> {
        let ndim = self.shape.len();
        if self.chunks.len() != ndim || self.dimension_names.len() != ndim {
            return Err(Error::StructuralMismatch(format!(
                "array has {} axes but {} chunk lengths and {} dimension names",
                ndim,
                self.chunks.len(),
                self.dimension_names.len()
            )));
        }
        if let Some(pos) = self.chunks.iter().position(|&c| c == 0) {
            return Err(Error::Planning(format!(
                "chunk length along '{}' must be at least 1",
                self.dimension_names[pos]
            )));
        }
        Ok(())
    }

    /// Value a cell holds in memory before any data is written
    pub fn missing_value(&self) -> f64 {
        match (self.codec.scale_offset, self.dtype.is_float(), self.fill_value) {
            (None, true, Some(fill)) => fill,
            _ => f64::NAN,
        }
    }

    fn chunk_len(&self) -> usize {
        self.chunks.iter().product()
    }
}

/// Handle to a stored array
#[derive(Debug, Clone)]
pub struct Array {
    store: StoreRef,
    path: String,
    meta: ArrayMetadata,
}

impl Array {
    /// Declare a new array, writing metadata only
    ///
    /// Any chunks left under `path` by a previous array are removed.
    pub fn create(store: StoreRef, path: &str, meta: ArrayMetadata) -> Result<Self> {
        meta.validate()?;
        let path = path.trim_matches('/').to_string();
        store.erase_prefix(&format!("{}/c", path))?;
        let array = Self { store, path, meta };
        array.write_metadata()?;
        debug!(
            path = %array.path,
            shape = ?array.meta.shape,
            chunks = ?array.meta.chunks,
            dtype = %array.meta.dtype,
            "created array"
        );
        Ok(array)
    }

    /// Open an existing array
    pub fn open(store: StoreRef, path: &str) -> Result<Self> {
        let path = path.trim_matches('/').to_string();
        let bytes = store
            .get(&format!("{}/{}", path, METADATA_KEY))?
            .ok_or_else(|| Error::NotFound(format!("array '{}'", path)))?;
        let meta: ArrayMetadata = serde_json::from_slice(&bytes)?;
        if meta.format_version != ARRAY_FORMAT_VERSION {
            return Err(Error::Corruption(format!(
                "array '{}' has unsupported format version {}",
                path, meta.format_version
            )));
        }
        meta.validate()?;
        Ok(Self { store, path, meta })
    }

    fn write_metadata(&self) -> Result<()> {
        let doc = serde_json::to_vec_pretty(&self.meta)?;
        self.store.set(&format!("{}/{}", self.path, METADATA_KEY), &doc)
    }

    /// Key prefix of this array
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Metadata document
    pub fn metadata(&self) -> &ArrayMetadata {
        &self.meta
    }

    /// Current shape
    pub fn shape(&self) -> &[usize] {
        &self.meta.shape
    }

    /// Chunk shape
    pub fn chunks(&self) -> &[usize] {
        &self.meta.chunks
    }

    /// Dimension names
    pub fn dimension_names(&self) -> &[String] {
        &self.meta.dimension_names
    }

    /// Replace the attributes and persist them
    pub fn set_attributes(&mut self, attributes: Attributes) -> Result<()> {
        self.meta.attributes = attributes;
        self.write_metadata()
    }

    /// Number of chunks physically present
    pub fn stored_chunk_count(&self) -> Result<usize> {
        Ok(self.store.list_prefix(&format!("{}/c/", self.path))?.len())
    }

    fn chunk_key(&self, index: &[usize]) -> String {
        if index.is_empty() {
            return format!("{}/c/0", self.path);
        }
        let parts: Vec<String> = index.iter().map(|i| i.to_string()).collect();
        format!("{}/c/{}", self.path, parts.join("."))
    }

    fn check_ranges(&self, ranges: &[Range<usize>]) -> Result<()> {
        if ranges.len() != self.meta.shape.len() {
            return Err(Error::StructuralMismatch(format!(
                "array '{}' has {} axes, selection has {}",
                self.path,
                self.meta.shape.len(),
                ranges.len()
            )));
        }
        for ((r, &len), dim) in ranges.iter().zip(&self.meta.shape).zip(&self.meta.dimension_names) {
            if r.start > r.end || r.end > len {
                return Err(Error::OutOfExtent(format!(
                    "selection {}:{} along '{}' exceeds length {} of '{}'",
                    r.start, r.end, dim, len, self.path
                )));
            }
        }
        Ok(())
    }

    /// Grid positions of every chunk intersecting `ranges`
    fn intersecting_chunks(&self, ranges: &[Range<usize>]) -> Vec<Vec<usize>> {
        let mut out: Vec<Vec<usize>> = vec![Vec::new()];
        for (r, &c) in ranges.iter().zip(&self.meta.chunks) {
            if r.is_empty() {
                return Vec::new();
            }
            let span = (r.start / c)..((r.end + c - 1) / c);
            out = out
                .into_iter()
                .flat_map(|prefix| {
                    span.clone().map(move |i| {
                        let mut next = prefix.clone();
                        next.push(i);
                        next
                    })
                })
                .collect();
        }
        out
    }

    fn chunk_bounds(&self, index: &[usize]) -> Vec<Range<usize>> {
        index
            .iter()
            .zip(&self.meta.chunks)
            .zip(&self.meta.shape)
            .map(|((&i, &c), &len)| (i * c)..((i + 1) * c).min(len))
            .collect()
    }

    fn read_chunk(&self, key: &str) -> Result<Option<ArrayD<f64>>> {
        let bytes = match self.store.get(key)? {
            Some(bytes) => bytes,
            None => return Ok(None),
        };
        let (dtype, mut values) = decode_chunk(&bytes)?;
        let expected = self.meta.codec.storage_dtype(self.meta.dtype);
        if dtype != expected || values.len() != self.meta.chunk_len() {
            return Err(Error::Corruption(format!(
                "chunk '{}' holds {} {} elements, expected {} {}",
                key,
                values.len(),
                dtype,
                self.meta.chunk_len(),
                expected
            )));
        }
        self.meta
            .codec
            .decode_values(&mut values, self.meta.dtype, self.meta.fill_value);
        Ok(Some(ArrayD::from_shape_vec(IxDyn(&self.meta.chunks), values)?))
    }

    fn write_chunk(&self, key: &str, chunk: &ArrayD<f64>) -> Result<()> {
        let mut values: Vec<f64> = chunk.iter().copied().collect();
        self.meta
            .codec
            .encode_values(&mut values, self.meta.dtype, self.meta.fill_value);
        let storage = self.meta.codec.storage_dtype(self.meta.dtype);
        let blob = encode_chunk(&values, storage, self.meta.codec.compression.chunk_compression())?;
        self.store.set(key, &blob)?;
        trace!(key, bytes = blob.len(), "wrote chunk");
        Ok(())
    }

    /// Read the cells inside `ranges`
    pub fn read_region(&self, ranges: &[Range<usize>]) -> Result<ArrayD<f64>> {
        self.check_ranges(ranges)?;
        let lens: Vec<usize> = ranges.iter().map(|r| r.len()).collect();
        let mut out = ArrayD::from_elem(IxDyn(&lens), self.meta.missing_value());

        for index in self.intersecting_chunks(ranges) {
            let chunk = match self.read_chunk(&self.chunk_key(&index))? {
                Some(chunk) => chunk,
                None => continue,
            };
            let bounds = self.chunk_bounds(&index);
            let overlap: Vec<Range<usize>> = bounds
                .iter()
                .zip(ranges)
                .map(|(b, r)| b.start.max(r.start)..b.end.min(r.end))
                .collect();
            let src = chunk.slice_each_axis(|ax| {
                let i = ax.axis.index();
                Slice::from((overlap[i].start - bounds[i].start)..(overlap[i].end - bounds[i].start))
            });
            out.slice_each_axis_mut(|ax| {
                let i = ax.axis.index();
                Slice::from((overlap[i].start - ranges[i].start)..(overlap[i].end - ranges[i].start))
            })
            .assign(&src);
        }
        Ok(out)
    }

    /// Read the whole array
    pub fn read_all(&self) -> Result<ArrayD<f64>> {
        let ranges: Vec<Range<usize>> = self.meta.shape.iter().map(|&n| 0..n).collect();
        self.read_region(&ranges)
    }

    /// Write `data` into the cells inside `ranges`
    ///
    /// Every cell of the selection is overwritten, whatever it held before.
    pub fn write_region(&self, ranges: &[Range<usize>], data: ArrayViewD<'_, f64>) -> Result<()> {
        self.check_ranges(ranges)?;
        let lens: Vec<usize> = ranges.iter().map(|r| r.len()).collect();
        if data.shape() != lens.as_slice() {
            return Err(Error::StructuralMismatch(format!(
                "data of shape {:?} does not fit selection of shape {:?} in '{}'",
                data.shape(),
                lens,
                self.path
            )));
        }

        for index in self.intersecting_chunks(ranges) {
            let key = self.chunk_key(&index);
            let bounds = self.chunk_bounds(&index);
            let overlap: Vec<Range<usize>> = bounds
                .iter()
                .zip(ranges)
                .map(|(b, r)| b.start.max(r.start)..b.end.min(r.end))
                .collect();
            let covers_chunk = overlap.iter().zip(&bounds).all(|(o, b)| o == b);

            let lock = self.store.key_lock(&key);
            let _guard = lock.lock();
            let existing = if covers_chunk { None } else { self.read_chunk(&key)? };
            let mut chunk = existing
                .unwrap_or_else(|| ArrayD::from_elem(IxDyn(&self.meta.chunks), self.meta.missing_value()));

            let src = data.slice_each_axis(|ax| {
                let i = ax.axis.index();
                Slice::from((overlap[i].start - ranges[i].start)..(overlap[i].end - ranges[i].start))
            });
            chunk
                .slice_each_axis_mut(|ax| {
                    let i = ax.axis.index();
                    Slice::from((overlap[i].start - bounds[i].start)..(overlap[i].end - bounds[i].start))
                })
                .assign(&src);
            self.write_chunk(&key, &chunk)?;
        }
        Ok(())
    }

    /// Change the shape, keeping existing cells
    ///
    /// Chunks lying wholly outside a shrunk shape are deleted.
    pub fn resize(&mut self, shape: Vec<usize>) -> Result<()> {
        if shape.len() != self.meta.shape.len() {
            return Err(Error::StructuralMismatch(format!(
                "cannot resize {}-axis array '{}' to {} axes",
                self.meta.shape.len(),
                self.path,
                shape.len()
            )));
        }
        let shrunk = shape.iter().zip(&self.meta.shape).any(|(new, old)| new < old);
        if shrunk {
            let old: Vec<Range<usize>> = self.meta.shape.iter().map(|&n| 0..n).collect();
            for index in self.intersecting_chunks(&old) {
                let outside = index
                    .iter()
                    .zip(&self.meta.chunks)
                    .zip(&shape)
                    .any(|((&i, &c), &len)| i * c >= len);
                if outside {
                    self.store.erase(&self.chunk_key(&index))?;
                }
            }
        }
        debug!(path = %self.path, from = ?self.meta.shape, to = ?shape, "resized array");
        self.meta.shape = shape;
        self.write_metadata()
    }

    /// Grow along `axis` and write `data` into the new cells
    pub fn append(&mut self, axis: usize, data: ArrayViewD<'_, f64>) -> Result<()> {
        let ndim = self.meta.shape.len();
        if axis >= ndim || data.ndim() != ndim {
            return Err(Error::StructuralMismatch(format!(
                "cannot append {}-axis data along axis {} of {}-axis array '{}'",
                data.ndim(),
                axis,
                ndim,
                self.path
            )));
        }
        for (i, (&have, &got)) in self.meta.shape.iter().zip(data.shape()).enumerate() {
            if i != axis && have != got {
                return Err(Error::StructuralMismatch(format!(
                    "append to '{}': axis '{}' has length {} in data, {} in array",
                    self.path, self.meta.dimension_names[i], got, have
                )));
            }
        }
        let base = self.meta.shape[axis];
        let mut shape = self.meta.shape.clone();
        shape[axis] = base + data.shape()[axis];
        self.resize(shape)?;
        let ranges: Vec<Range<usize>> = self
            .meta
            .shape
            .iter()
            .enumerate()
            .map(|(i, &n)| if i == axis { base..n } else { 0..n })
            .collect();
        self.write_region(&ranges, data)
    }
}
