//! Chunk layout data model
//!
//! This module defines the value types that flow between the advisor, the
//! template builder and every writer:
//! - [`DimensionSpec`]: a named dimension with its length
//! - [`ChunkPlan`]: per-dimension chunk lengths
//! - [`AccessPattern`]: which dimension class should receive larger chunks
//! - [`Region`]: half-open index ranges locating a fragment inside an archive
//! - [`MissingCheckSpec`]: which variables are verified after a write
//! - [`DType`]: element type of a stored array

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Range;
use std::str::FromStr;

/// A named dimension and its length
///
/// # Examples
///
/// ```
/// use gridstore_core::DimensionSpec;
///
/// let time = DimensionSpec::new("time", 365);
/// assert_eq!(time.name, "time");
/// assert_eq!(time.length, 365);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DimensionSpec {
    /// Dimension name
    pub name: String,
    /// Number of entries along the dimension
    pub length: usize,
}

impl DimensionSpec {
    /// Create a new dimension spec
    pub fn new(name: impl Into<String>, length: usize) -> Self {
        Self {
            name: name.into(),
            length,
        }
    }
}

impl fmt::Display for DimensionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.name, self.length)
    }
}

/// Build an ordered dimension list from `(name, length)` pairs.
pub fn dimensions<'a>(pairs: impl IntoIterator<Item = (&'a str, usize)>) -> Vec<DimensionSpec> {
    pairs
        .into_iter()
        .map(|(name, length)| DimensionSpec::new(name, length))
        .collect()
}

/// Mapping from dimension name to chunk length
///
/// Dimensions absent from the plan default to their full length when the plan
/// is resolved against a dimension list. Resolution also clamps every length
/// into `[1, dimension_length]`.
///
/// The textual form is `"time:100,lat:50,lon:100"`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChunkPlan(BTreeMap<String, usize>);

impl ChunkPlan {
    /// Create an empty plan
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a chunk length for `dim`, builder style
    pub fn with(mut self, dim: impl Into<String>, length: usize) -> Self {
        self.0.insert(dim.into(), length);
        self
    }

    /// Set the chunk length for `dim`
    pub fn insert(&mut self, dim: impl Into<String>, length: usize) -> Option<usize> {
        self.0.insert(dim.into(), length)
    }

    /// Chunk length for `dim`, if specified
    pub fn get(&self, dim: &str) -> Option<usize> {
        self.0.get(dim).copied()
    }

    /// Number of dimensions with an explicit chunk length
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check whether the plan specifies nothing
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over `(dimension, chunk length)` pairs in name order
    pub fn iter(&self) -> impl Iterator<Item = (&str, usize)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Overlay `other` on top of this plan, `other` winning on conflicts
    pub fn merged(&self, other: &ChunkPlan) -> ChunkPlan {
        let mut out = self.clone();
        for (dim, len) in other.iter() {
            out.insert(dim, len);
        }
        out
    }

    /// Resolve the plan against an ordered dimension list
    ///
    /// Unspecified dimensions take their full length. Every result lies in
    /// `[1, max(dimension_length, 1)]`.
    pub fn resolve(&self, dims: &[DimensionSpec]) -> Vec<usize> {
        dims.iter()
            .map(|d| {
                let upper = d.length.max(1);
                self.get(&d.name).unwrap_or(upper).clamp(1, upper)
            })
            .collect()
    }

    /// Realized element count of one chunk under this plan
    pub fn elements(&self, dims: &[DimensionSpec]) -> u128 {
        self.resolve(dims).iter().map(|&c| c as u128).product()
    }
}

impl FromIterator<(String, usize)> for ChunkPlan {
    fn from_iter<I: IntoIterator<Item = (String, usize)>>(iter: I) -> Self {
        ChunkPlan(iter.into_iter().collect())
    }
}

impl fmt::Display for ChunkPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.iter().map(|(k, v)| format!("{}:{}", k, v)).collect();
        write!(f, "{}", parts.join(","))
    }
}

impl FromStr for ChunkPlan {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut plan = ChunkPlan::new();
        for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (dim, len) = part
                .split_once(':')
                .ok_or_else(|| Error::Planning(format!("expected <dim>:<length>, got '{}'", part)))?;
            let len: usize = len
                .trim()
                .parse()
                .map_err(|_| Error::Planning(format!("invalid chunk length in '{}'", part)))?;
            plan.insert(dim.trim(), len);
        }
        Ok(plan)
    }
}

/// Declared access pattern for chunk sizing
///
/// - `Temporal`: long time series at few locations; chunks are long along the
///   sequence dimension and small along extent dimensions
/// - `Spatial`: full maps at few time steps; the inverse
/// - `Balanced`: equal weighting
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessPattern {
    /// Favour the sequence dimension
    Temporal,
    /// Favour the extent dimensions
    Spatial,
    /// Weight all dimensions equally
    #[default]
    Balanced,
}

impl AccessPattern {
    /// Lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessPattern::Temporal => "temporal",
            AccessPattern::Spatial => "spatial",
            AccessPattern::Balanced => "balanced",
        }
    }
}

impl fmt::Display for AccessPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccessPattern {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "temporal" => Ok(AccessPattern::Temporal),
            "spatial" => Ok(AccessPattern::Spatial),
            "balanced" => Ok(AccessPattern::Balanced),
            other => Err(Error::Planning(format!(
                "unknown access pattern '{}' (expected temporal, spatial or balanced)",
                other
            ))),
        }
    }
}

/// Half-open index ranges per dimension
///
/// Dimensions absent from a region are written in full. The textual form is
/// `"time=5:10,lat=0:500"`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region(BTreeMap<String, Range<usize>>);

impl Region {
    /// Create an empty region
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a range for `dim`, builder style
    pub fn with(mut self, dim: impl Into<String>, range: Range<usize>) -> Self {
        self.0.insert(dim.into(), range);
        self
    }

    /// Set the range for `dim`
    pub fn insert(&mut self, dim: impl Into<String>, range: Range<usize>) {
        self.0.insert(dim.into(), range);
    }

    /// Range for `dim`, if constrained
    pub fn get(&self, dim: &str) -> Option<Range<usize>> {
        self.0.get(dim).cloned()
    }

    /// Iterate over `(dimension, range)` pairs in name order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Range<usize>)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Check whether no dimension is constrained
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Ranges for an array with the given dimension names and shape
    ///
    /// Unconstrained dimensions cover `0..shape[i]`. Fails with
    /// [`Error::OutOfExtent`] when a range reaches past the array's shape.
    pub fn ranges_for(&self, dims: &[String], shape: &[usize]) -> Result<Vec<Range<usize>>> {
        dims.iter()
            .zip(shape)
            .map(|(dim, &len)| match self.get(dim) {
                Some(r) if r.start > r.end || r.end > len => Err(Error::OutOfExtent(format!(
                    "region {}={}:{} exceeds dimension length {}",
                    dim, r.start, r.end, len
                ))),
                Some(r) => Ok(r),
                None => Ok(0..len),
            })
            .collect()
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .iter()
            .map(|(k, r)| format!("{}={}:{}", k, r.start, r.end))
            .collect();
        write!(f, "{}", parts.join(","))
    }
}

impl FromStr for Region {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut region = Region::new();
        for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let bad = || Error::OutOfExtent(format!("expected <dim>=<start>:<end>, got '{}'", part));
            let (dim, span) = part.split_once('=').ok_or_else(bad)?;
            let (start, end) = span.split_once(':').ok_or_else(bad)?;
            let start: usize = start.trim().parse().map_err(|_| bad())?;
            let end: usize = end.trim().parse().map_err(|_| bad())?;
            if start > end {
                return Err(bad());
            }
            region.insert(dim.trim(), start..end);
        }
        Ok(region)
    }
}

/// Which variables are verified for missing-data regressions after a write
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "MissingCheckRepr", into = "MissingCheckRepr")]
pub enum MissingCheckSpec {
    /// Every variable written
    #[default]
    All,
    /// Only the named variables
    Variables(Vec<String>),
    /// Verification off
    Disabled,
}

impl MissingCheckSpec {
    /// Check whether verification runs at all
    pub fn is_enabled(&self) -> bool {
        !matches!(self, MissingCheckSpec::Disabled)
    }
}

impl FromStr for MissingCheckSpec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "all" => Ok(MissingCheckSpec::All),
            "none" | "off" | "disabled" | "" => Ok(MissingCheckSpec::Disabled),
            list => Ok(MissingCheckSpec::Variables(
                list.split(',')
                    .map(|v| v.trim().to_string())
                    .filter(|v| !v.is_empty())
                    .collect(),
            )),
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum MissingCheckRepr {
    Keyword(String),
    List(Vec<String>),
}

impl TryFrom<MissingCheckRepr> for MissingCheckSpec {
    type Error = Error;

    fn try_from(repr: MissingCheckRepr) -> Result<Self> {
        match repr {
            MissingCheckRepr::Keyword(k) => match k.as_str() {
                "all" => Ok(MissingCheckSpec::All),
                "none" | "off" | "disabled" => Ok(MissingCheckSpec::Disabled),
                other => Err(Error::InvalidConfig(format!(
                    "missing_check_vars must be 'all', 'none' or a list, got '{}'",
                    other
                ))),
            },
            MissingCheckRepr::List(vars) => Ok(MissingCheckSpec::Variables(vars)),
        }
    }
}

impl From<MissingCheckSpec> for MissingCheckRepr {
    fn from(spec: MissingCheckSpec) -> Self {
        match spec {
            MissingCheckSpec::All => MissingCheckRepr::Keyword("all".into()),
            MissingCheckSpec::Disabled => MissingCheckRepr::Keyword("none".into()),
            MissingCheckSpec::Variables(vars) => MissingCheckRepr::List(vars),
        }
    }
}

/// Element type of a stored array
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    /// 32-bit float
    Float32,
    /// 64-bit float
    Float64,
    /// Signed 8-bit integer
    Int8,
    /// Signed 16-bit integer
    Int16,
    /// Signed 32-bit integer
    Int32,
    /// Signed 64-bit integer
    Int64,
    /// Unsigned 8-bit integer
    UInt8,
    /// Unsigned 16-bit integer
    UInt16,
    /// Unsigned 32-bit integer
    UInt32,
}

impl DType {
    /// Size of one element in bytes
    pub fn size_bytes(&self) -> usize {
        match self {
            DType::Int8 | DType::UInt8 => 1,
            DType::Int16 | DType::UInt16 => 2,
            DType::Float32 | DType::Int32 | DType::UInt32 => 4,
            DType::Float64 | DType::Int64 => 8,
        }
    }

    /// Check whether NaN is representable
    pub fn is_float(&self) -> bool {
        matches!(self, DType::Float32 | DType::Float64)
    }

    /// Representable range for integer types, `None` for floats
    pub fn integer_range(&self) -> Option<(f64, f64)> {
        match self {
            DType::Float32 | DType::Float64 => None,
            DType::Int8 => Some((i8::MIN as f64, i8::MAX as f64)),
            DType::Int16 => Some((i16::MIN as f64, i16::MAX as f64)),
            DType::Int32 => Some((i32::MIN as f64, i32::MAX as f64)),
            DType::Int64 => Some((i64::MIN as f64, i64::MAX as f64)),
            DType::UInt8 => Some((0.0, u8::MAX as f64)),
            DType::UInt16 => Some((0.0, u16::MAX as f64)),
            DType::UInt32 => Some((0.0, u32::MAX as f64)),
        }
    }

    /// Stable on-disk code
    pub fn code(&self) -> u8 {
        match self {
            DType::Float32 => 1,
            DType::Float64 => 2,
            DType::Int8 => 3,
            DType::Int16 => 4,
            DType::Int32 => 5,
            DType::Int64 => 6,
            DType::UInt8 => 7,
            DType::UInt16 => 8,
            DType::UInt32 => 9,
        }
    }

    /// Inverse of [`DType::code`]
    pub fn from_code(code: u8) -> Option<DType> {
        Some(match code {
            1 => DType::Float32,
            2 => DType::Float64,
            3 => DType::Int8,
            4 => DType::Int16,
            5 => DType::Int32,
            6 => DType::Int64,
            7 => DType::UInt8,
            8 => DType::UInt16,
            9 => DType::UInt32,
            _ => return None,
        })
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DType::Float32 => "float32",
            DType::Float64 => "float64",
            DType::Int8 => "int8",
            DType::Int16 => "int16",
            DType::Int32 => "int32",
            DType::Int64 => "int64",
            DType::UInt8 => "uint8",
            DType::UInt16 => "uint16",
            DType::UInt32 => "uint32",
        };
        f.write_str(name)
    }
}
