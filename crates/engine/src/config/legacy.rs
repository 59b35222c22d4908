//! Legacy flat options
//!
//! Early releases took a flat bag of keyword options. They are accepted only
//! through [`LegacyOptions`], tagged by version, and converted once into a
//! [`ConverterConfig`] by [`LegacyOptions::translate`].
//!
//! ```json
//! {"version": "1", "chunking": {"time": 24}, "compression": "blosc:zstd:3",
//!  "packing": true, "packing_bits": 8, "retries_on_missing": 2}
//! ```

use super::ConverterConfig;
use gridstore_core::{ChunkPlan, MissingCheckSpec, Result};
use gridstore_storage::Compression;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Versioned legacy option set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "version")]
pub enum LegacyOptions {
    /// First-generation flat options
    #[serde(rename = "1")]
    V1(LegacyOptionsV1),
}

/// First-generation flat options
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LegacyOptionsV1 {
    /// Chunk length per dimension
    pub chunking: Option<BTreeMap<String, usize>>,
    /// Compression string, e.g. `"blosc:zstd:3"`
    pub compression: Option<String>,
    /// Enable packing
    pub packing: Option<bool>,
    /// Packing width
    pub packing_bits: Option<u8>,
    /// Sequence dimension name
    pub time_dim: Option<String>,
    /// Append dimension name
    pub append_dim: Option<String>,
    /// Retry bound
    pub retries_on_missing: Option<u32>,
    /// Verified variables
    pub missing_check_vars: Option<MissingCheckSpec>,
}

impl LegacyOptions {
    /// Parse a JSON legacy document
    pub fn from_json_str(s: &str) -> Result<Self> {
        serde_json::from_str(s).map_err(|e| gridstore_core::Error::InvalidConfig(e.to_string()))
    }

    /// Convert into a validated structured configuration
    pub fn translate(self) -> Result<ConverterConfig> {
        match self {
            LegacyOptions::V1(v1) => v1.translate(),
        }
    }
}

impl LegacyOptionsV1 {
    fn translate(self) -> Result<ConverterConfig> {
        let mut config = ConverterConfig::default();
        if let Some(chunking) = self.chunking {
            config.chunking = chunking.into_iter().collect::<ChunkPlan>();
        }
        if let Some(method) = self.compression {
            config.compression.method = method.parse::<Compression>()?;
        }
        if let Some(enabled) = self.packing {
            config.packing.enabled = enabled;
        }
        if let Some(bits) = self.packing_bits {
            config.packing.bits = bits;
        }
        if let Some(dim) = self.time_dim {
            config.time.dim = dim;
        }
        if let Some(dim) = self.append_dim {
            config.time.append_dim = dim;
        }
        if let Some(retries) = self.retries_on_missing {
            config.missing_data.retries_on_missing = retries;
        }
        if let Some(vars) = self.missing_check_vars {
            config.missing_data.missing_check_vars = vars;
        }
        config.validate()?;
        debug!("translated v1 legacy options");
        Ok(config)
    }
}
