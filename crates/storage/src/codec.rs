//! Value codecs
//!
//! A [`Codec`] turns in-memory values (f64, NaN = missing) into the storage
//! domain of an array and back:
//!
//! 1. an optional linear [`ScaleOffset`] filter quantizes floats to 8, 16 or
//!    32 bit integer codes, reserving the top code for missing cells;
//! 2. integer arrays without a filter map missing cells to the array's fill
//!    value;
//! 3. the resulting elements are compressed per [`Compression`].

use crate::format::ChunkCompression;
use gridstore_core::{DType, Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Chunk payload compression
///
/// Textual forms: `"none"`, `"zstd"`, `"zstd:<level>"`. The form
/// `"blosc:zstd:<level>"` is accepted for compatibility and maps to zstd.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Compression {
    /// No compression
    None,
    /// zstd at `level`
    Zstd {
        /// zstd compression level
        level: i32,
    },
}

impl Default for Compression {
    fn default() -> Self {
        Compression::Zstd { level: 3 }
    }
}

impl Compression {
    pub(crate) fn chunk_compression(&self) -> ChunkCompression {
        match *self {
            Compression::None => ChunkCompression::None,
            Compression::Zstd { level } => ChunkCompression::Zstd(level),
        }
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Compression::None => f.write_str("none"),
            Compression::Zstd { level } => write!(f, "zstd:{}", level),
        }
    }
}

impl FromStr for Compression {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim().to_ascii_lowercase();
        let spec = s.strip_prefix("blosc:").unwrap_or(&s);
        let parsed = match spec.split_once(':') {
            None if spec == "none" || spec.is_empty() => Some(Compression::None),
            None if spec == "zstd" => Some(Compression::default()),
            Some(("zstd", level)) => level.parse().ok().map(|level| Compression::Zstd { level }),
            _ => None,
        };
        match parsed {
            Some(Compression::Zstd { level }) if !(1..=22).contains(&level) => Err(
                Error::InvalidConfig(format!("zstd level {} outside 1..=22", level)),
            ),
            Some(c) => Ok(c),
            None => Err(Error::InvalidConfig(format!(
                "unsupported compression '{}' (use none, zstd or zstd:<level>)",
                s
            ))),
        }
    }
}

impl TryFrom<String> for Compression {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<Compression> for String {
    fn from(c: Compression) -> Self {
        c.to_string()
    }
}

/// Linear quantization filter
///
/// `code = round((value - offset) / scale)`, `value = code * scale + offset`.
/// With `scale = (max - min) / (2^bits - 1)` and
/// `offset = min + 2^(bits-1) * scale`, `min` maps to the lowest signed code
/// and `max` to the highest, which doubles as the missing sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScaleOffset {
    /// Value step per integer code
    pub scale: f64,
    /// Value at code zero
    pub offset: f64,
    /// Code width: 8, 16 or 32
    pub bits: u8,
}

impl ScaleOffset {
    /// Compute the filter covering `[min, max]` at `bits` width
    ///
    /// # Examples
    ///
    /// ```
    /// use gridstore_storage::ScaleOffset;
    ///
    /// let so = ScaleOffset::from_range(0.0, 255.0, 8).unwrap();
    /// assert_eq!(so.scale, 1.0);
    /// assert_eq!(so.offset, 128.0);
    /// ```
    pub fn from_range(min: f64, max: f64, bits: u8) -> Result<Self> {
        if !matches!(bits, 8 | 16 | 32) {
            return Err(Error::InvalidConfig(format!(
                "packing bits must be 8, 16 or 32, got {}",
                bits
            )));
        }
        if !min.is_finite() || !max.is_finite() || max < min {
            return Err(Error::InvalidConfig(format!(
                "invalid packing range [{}, {}]",
                min, max
            )));
        }
        let scale = if max == min {
            1.0
        } else {
            (max - min) / (2f64.powi(bits as i32) - 1.0)
        };
        let offset = min + 2f64.powi(bits as i32 - 1) * scale;
        Ok(Self { scale, offset, bits })
    }

    /// Integer storage type of the codes
    pub fn storage_dtype(&self) -> DType {
        match self.bits {
            8 => DType::Int8,
            16 => DType::Int16,
            _ => DType::Int32,
        }
    }

    /// Code reserved for missing cells
    pub fn missing_code(&self) -> f64 {
        2f64.powi(self.bits as i32 - 1) - 1.0
    }

    fn min_code(&self) -> f64 {
        -(2f64.powi(self.bits as i32 - 1))
    }

    /// Quantize one value
    pub fn encode(&self, value: f64) -> f64 {
        if value.is_nan() {
            return self.missing_code();
        }
        ((value - self.offset) / self.scale)
            .round()
            .clamp(self.min_code(), self.missing_code() - 1.0)
    }

    /// Invert [`ScaleOffset::encode`]
    pub fn decode(&self, code: f64) -> f64 {
        if code == self.missing_code() {
            f64::NAN
        } else {
            code * self.scale + self.offset
        }
    }
}

/// Filter and compression settings of one array
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Codec {
    /// Optional quantization filter
    #[serde(default)]
    pub scale_offset: Option<ScaleOffset>,
    /// Payload compression
    #[serde(default)]
    pub compression: Compression,
}

impl Codec {
    /// Codec with compression only
    pub fn new(compression: Compression) -> Self {
        Self {
            scale_offset: None,
            compression,
        }
    }

    /// Attach a quantization filter, builder style
    pub fn with_scale_offset(mut self, filter: ScaleOffset) -> Self {
        self.scale_offset = Some(filter);
        self
    }

    /// Element type written to chunks for an array declared as `dtype`
    pub fn storage_dtype(&self, dtype: DType) -> DType {
        self.scale_offset.map(|f| f.storage_dtype()).unwrap_or(dtype)
    }

    /// Map in-memory values into the storage domain
    pub fn encode_values(&self, values: &mut [f64], dtype: DType, fill_value: Option<f64>) {
        if let Some(filter) = self.scale_offset {
            values.iter_mut().for_each(|v| *v = filter.encode(*v));
            return;
        }
        if let Some((lo, hi)) = dtype.integer_range() {
            let fill = fill_value.unwrap_or(hi);
            for v in values.iter_mut() {
                *v = if v.is_nan() { fill } else { v.clamp(lo, hi) };
            }
        }
    }

    /// Map stored values back to in-memory values
    pub fn decode_values(&self, values: &mut [f64], dtype: DType, fill_value: Option<f64>) {
        if let Some(filter) = self.scale_offset {
            values.iter_mut().for_each(|v| *v = filter.decode(*v));
            return;
        }
        if let Some((_, hi)) = dtype.integer_range() {
            let fill = fill_value.unwrap_or(hi);
            values.iter_mut().filter(|v| **v == fill).for_each(|v| *v = f64::NAN);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compression_parse_forms() {
        assert_eq!("none".parse::<Compression>().unwrap(), Compression::None);
        assert_eq!("zstd".parse::<Compression>().unwrap(), Compression::Zstd { level: 3 });
        assert_eq!("zstd:9".parse::<Compression>().unwrap(), Compression::Zstd { level: 9 });
        assert_eq!(
            "blosc:zstd:3".parse::<Compression>().unwrap(),
            Compression::Zstd { level: 3 }
        );
        assert!("lz4".parse::<Compression>().is_err());
        assert!("zstd:99".parse::<Compression>().is_err());
    }

    #[test]
    fn test_compression_serde_as_string() {
        let json = serde_json::to_string(&Compression::Zstd { level: 5 }).unwrap();
        assert_eq!(json, "\"zstd:5\"");
        let back: Compression = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Compression::Zstd { level: 5 });
    }

    #[test]
    fn test_scale_offset_formula() {
        let so = ScaleOffset::from_range(-10.0, 10.0, 16).unwrap();
        assert!((so.scale - 20.0 / 65535.0).abs() < 1e-15);
        assert!((so.offset - (-10.0 + 32768.0 * so.scale)).abs() < 1e-12);
        assert_eq!(so.storage_dtype(), DType::Int16);
    }

    #[test]
    fn test_scale_offset_round_trip_within_half_step() {
        let so = ScaleOffset::from_range(0.0, 30.0, 16).unwrap();
        for v in [0.0, 0.123, 7.5, 29.99] {
            let back = so.decode(so.encode(v));
            assert!((back - v).abs() <= so.scale / 2.0 + 1e-12, "{} -> {}", v, back);
        }
    }

    #[test]
    fn test_scale_offset_missing_sentinel() {
        let so = ScaleOffset::from_range(0.0, 1.0, 8).unwrap();
        assert_eq!(so.encode(f64::NAN), 127.0);
        assert!(so.decode(127.0).is_nan());
        assert_eq!(so.encode(5.0), 126.0);
        assert_eq!(so.encode(-5.0), -128.0);
    }

    #[test]
    fn test_constant_range_uses_unit_scale() {
        let so = ScaleOffset::from_range(4.0, 4.0, 8).unwrap();
        assert_eq!(so.scale, 1.0);
        assert!(ScaleOffset::from_range(0.0, 1.0, 12).is_err());
        assert!(ScaleOffset::from_range(1.0, 0.0, 8).is_err());
    }

    #[test]
    fn test_integer_fill_mapping() {
        let codec = Codec::default();
        let mut values = vec![1.0, f64::NAN, 300.0];
        codec.encode_values(&mut values, DType::UInt8, Some(255.0));
        assert_eq!(values, vec![1.0, 255.0, 255.0]);
        codec.decode_values(&mut values, DType::UInt8, Some(255.0));
        assert_eq!(values[0], 1.0);
        assert!(values[1].is_nan());
    }
}
