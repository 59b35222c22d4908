//! Converter configuration
//!
//! [`ConverterConfig`] is the single structured configuration consumed by the
//! [`Converter`](crate::Converter). Every section has defaults, so a config
//! file only needs the fields it changes:
//!
//! ```toml
//! target_chunk_size_mb = 20.0
//! access_pattern = "temporal"
//!
//! [chunking]
//! time = 100
//!
//! [compression]
//! method = "zstd:3"
//!
//! [missing_data]
//! retries_on_missing = 3
//! missing_check_vars = ["hs", "tp"]
//! ```
//!
//! Files are read as JSON or TOML depending on their extension. Flat
//! option sets from older releases go through [`legacy`].

pub mod legacy;

use gridstore_core::time::parse_datetime;
use gridstore_core::{AccessPattern, Attributes, ChunkPlan, Error, Frequency, MissingCheckSpec, Result};
use gridstore_storage::Compression;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub use legacy::{LegacyOptions, LegacyOptionsV1};

/// Highest accepted `retries_on_missing`
pub const MAX_RETRIES_ON_MISSING: u32 = 10;

/// Complete converter configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConverterConfig {
    /// Explicit chunk lengths; when empty the advisor plans the layout
    pub chunking: ChunkPlan,
    /// Payload compression
    pub compression: CompressionConfig,
    /// Scale-offset packing
    pub packing: PackingConfig,
    /// Sequence axis settings
    pub time: TimeConfig,
    /// Variable selection
    pub variables: VariableConfig,
    /// Global attributes applied to every written dataset
    pub attrs: Attributes,
    /// Verification and retry settings
    pub missing_data: MissingDataConfig,
    /// Advisor budget in MiB; the process default when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_chunk_size_mb: Option<f64>,
    /// Access pattern handed to the advisor
    pub access_pattern: AccessPattern,
}

/// Compression section
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    /// `"none"`, `"zstd"` or `"zstd:<level>"`
    pub method: Compression,
}

/// Packing section
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PackingConfig {
    /// Quantize variables that declare `valid_min`/`valid_max`
    pub enabled: bool,
    /// Code width: 8, 16 or 32
    pub bits: u8,
}

impl Default for PackingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bits: 16,
        }
    }
}

/// Sequence axis section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeConfig {
    /// Name of the sequence dimension
    pub dim: String,
    /// Dimension appended along
    pub append_dim: String,
    /// First entry of a template's axis
    #[serde(skip_serializing_if = "Option::is_none")]
    pub global_start: Option<String>,
    /// Last entry of a template's axis (inclusive)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub global_end: Option<String>,
    /// Template step; inferred from the sample when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub freq: Option<Frequency>,
    /// Step used when nothing can be inferred
    pub default_freq: Frequency,
}

impl Default for TimeConfig {
    fn default() -> Self {
        Self {
            dim: "time".into(),
            append_dim: "time".into(),
            global_start: None,
            global_end: None,
            freq: None,
            default_freq: Frequency::DAILY,
        }
    }
}

/// Variable selection section
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VariableConfig {
    /// Keep only these variables (all when empty)
    pub include: Vec<String>,
    /// Drop these variables
    pub exclude: Vec<String>,
}

/// Verification and retry section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MissingDataConfig {
    /// Retries after the first attempt, `0..=10`
    pub retries_on_missing: u32,
    /// Variables verified after each write
    pub missing_check_vars: MissingCheckSpec,
    /// Backoff unit; retry `n` sleeps `n` units
    pub retry_backoff_ms: u64,
}

impl Default for MissingDataConfig {
    fn default() -> Self {
        Self {
            retries_on_missing: 0,
            missing_check_vars: MissingCheckSpec::All,
            retry_backoff_ms: 100,
        }
    }
}

fn invalid(msg: impl Into<String>) -> Error {
    Error::InvalidConfig(msg.into())
}

impl ConverterConfig {
    /// Parse a JSON document
    pub fn from_json_str(s: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(s).map_err(|e| invalid(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s).map_err(|e| invalid(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a `.json` or `.toml` file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_str(&text),
            Some("toml") => Self::from_toml_str(&text),
            _ => Self::from_json_str(&text).or_else(|_| Self::from_toml_str(&text)),
        }
    }

    /// Write to a `.json` or `.toml` file
    pub fn to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let text = match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => toml::to_string_pretty(self).map_err(|e| Error::Serialization(e.to_string()))?,
            _ => serde_json::to_string_pretty(self)?,
        };
        std::fs::write(path, text)?;
        Ok(())
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<()> {
        if self.missing_data.retries_on_missing > MAX_RETRIES_ON_MISSING {
            return Err(invalid(format!(
                "retries_on_missing must be between 0 and {}, got {}",
                MAX_RETRIES_ON_MISSING, self.missing_data.retries_on_missing
            )));
        }
        if !matches!(self.packing.bits, 8 | 16 | 32) {
            return Err(invalid(format!(
                "packing bits must be 8, 16 or 32, got {}",
                self.packing.bits
            )));
        }
        if let Some(mb) = self.target_chunk_size_mb {
            if !(mb.is_finite() && mb > 0.0) {
                return Err(invalid(format!("target_chunk_size_mb must be positive, got {}", mb)));
            }
        }
        if let Some((dim, _)) = self.chunking.iter().find(|(_, len)| *len == 0) {
            return Err(invalid(format!("chunk length for '{}' must be at least 1", dim)));
        }
        if self.time.dim.is_empty() || self.time.append_dim.is_empty() {
            return Err(invalid("time dimension names must not be empty"));
        }
        let start = self.global_start()?;
        let end = self.global_end()?;
        if let (Some(start), Some(end)) = (start, end) {
            if end < start {
                return Err(invalid("global_end precedes global_start"));
            }
        }
        Ok(())
    }

    /// Parsed `time.global_start`
    pub fn global_start(&self) -> Result<Option<chrono::NaiveDateTime>> {
        self.time
            .global_start
            .as_deref()
            .map(|s| parse_datetime(s).map_err(|e| invalid(e.to_string())))
            .transpose()
    }

    /// Parsed `time.global_end`
    pub fn global_end(&self) -> Result<Option<chrono::NaiveDateTime>> {
        self.time
            .global_end
            .as_deref()
            .map(|s| parse_datetime(s).map_err(|e| invalid(e.to_string())))
            .transpose()
    }

    /// Advisor budget in bytes, if configured
    pub fn target_chunk_size_bytes(&self) -> Option<f64> {
        self.target_chunk_size_mb.map(|mb| mb * crate::chunking::MIB)
    }
}
